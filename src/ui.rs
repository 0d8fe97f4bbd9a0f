use crate::{
    market::Side,
    view::{
        MarketDisplay,
        Notification,
        NotificationLevel,
    },
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{
        Event,
        EventStream,
        KeyCode,
        KeyEvent,
        KeyEventKind,
        KeyModifiers,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use futures::StreamExt;
use ratatui::{
    prelude::*,
    widgets::*,
};
use rust_decimal::Decimal;
use std::io::stdout;

const VISIBLE_NOTIFICATIONS: usize = 6;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UserEvent {
    Quit,
    Redraw,
    Connect,
    Disconnect,
    SwitchAccount,
    SelectSide(Side),
    StakeUp,
    StakeDown,
    SetStake(String),
    SubmitBet,
    ClaimReward,
    Refresh,
}

#[derive(Debug, Default)]
pub struct UiState {
    mode: Mode,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
enum Mode {
    #[default]
    Normal,
    StakeInput(StakeInputState),
    QuitModal,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct StakeInputState {
    buffer: String,
}

/// Everything drawn in one frame.
#[derive(Clone, Debug)]
pub struct Screen {
    pub title: String,
    pub resolution: String,
    pub backend: String,
    pub display: MarketDisplay,
    pub status: String,
    /// Label of the action currently awaiting the chain.
    pub busy: Option<String>,
    pub notifications: Vec<Notification>,
}

pub type InputEventReceiver = EventStream;

pub fn input_event_stream() -> InputEventReceiver {
    EventStream::new()
}

pub async fn next_raw_event(events: &mut InputEventReceiver) -> Result<Event> {
    match events.next().await {
        Some(event) => Ok(event?),
        None => Err(eyre!("terminal input stream closed")),
    }
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    // One persistent Terminal keeps buffers across draws
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

pub fn draw(state: &mut UiState, screen: &Screen) -> Result<()> {
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, state, screen))?;
        state.terminal = Some(term);
    }
    Ok(())
}

/// Maps a terminal event to a user action, updating modal state on the way.
pub fn interpret_event(state: &mut UiState, event: Event) -> Option<UserEvent> {
    let key = match event {
        Event::Key(key) => key,
        Event::Resize(..) => return Some(UserEvent::Redraw),
        _ => return None,
    };
    if key.kind != KeyEventKind::Press {
        return None;
    }
    if is_ctrl_c(&key) {
        return Some(UserEvent::Quit);
    }
    match &mut state.mode {
        Mode::StakeInput(input) => match key.code {
            KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            KeyCode::Enter => {
                let text = std::mem::take(&mut input.buffer);
                state.mode = Mode::Normal;
                Some(UserEvent::SetStake(text))
            }
            KeyCode::Backspace => {
                input.buffer.pop();
                Some(UserEvent::Redraw)
            }
            KeyCode::Char(c) if c.is_ascii_digit() || (c == '.' && !input.buffer.contains('.')) => {
                input.buffer.push(c);
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
        Mode::QuitModal => match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => Some(UserEvent::Quit),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
        Mode::Normal => match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                state.mode = Mode::QuitModal;
                Some(UserEvent::Redraw)
            }
            KeyCode::Char('c') => Some(UserEvent::Connect),
            KeyCode::Char('d') => Some(UserEvent::Disconnect),
            KeyCode::Char('a') => Some(UserEvent::SwitchAccount),
            KeyCode::Char('y') => Some(UserEvent::SelectSide(Side::Yes)),
            KeyCode::Char('n') => Some(UserEvent::SelectSide(Side::No)),
            KeyCode::Char('+') | KeyCode::Char('=') | KeyCode::Up => Some(UserEvent::StakeUp),
            KeyCode::Char('-') | KeyCode::Down => Some(UserEvent::StakeDown),
            KeyCode::Char('e') => {
                state.mode = Mode::StakeInput(StakeInputState::default());
                Some(UserEvent::Redraw)
            }
            KeyCode::Enter => Some(UserEvent::SubmitBet),
            KeyCode::Char('r') => Some(UserEvent::ClaimReward),
            KeyCode::Char('f') => Some(UserEvent::Refresh),
            _ => None,
        },
    }
}

fn is_ctrl_c(key: &KeyEvent) -> bool {
    key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
}

fn ui(f: &mut Frame, state: &UiState, screen: &Screen) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(7),
            Constraint::Length(7),
            Constraint::Min(5),
            Constraint::Length(3),
        ])
        .split(f.area());

    draw_header(f, chunks[0], screen);
    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(chunks[1]);
    draw_market_panel(f, middle[0], &screen.display);
    draw_wallet_panel(f, middle[1], &screen.display);
    draw_bet_panel(f, chunks[2], screen);
    draw_notifications(f, chunks[3], screen);
    draw_help(f, chunks[4]);
    draw_modals(f, state);
}

fn draw_header(f: &mut Frame, area: Rect, screen: &Screen) {
    let lines = vec![
        Line::styled(
            screen.title.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Line::from(format!("{} | backend: {}", screen.resolution, screen.backend)),
    ];
    let header = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Freight Market"));
    f.render_widget(header, area);
}

fn draw_market_panel(f: &mut Frame, area: Rect, display: &MarketDisplay) {
    let dim = if display.has_market_data {
        Style::default()
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let lines = vec![
        Line::styled(format!("Probability YES: {}", display.probability), dim),
        Line::from(vec![
            Span::styled(
                format!("YES {}", format_price(display.yes_price)),
                Style::default().fg(Color::Green),
            ),
            Span::raw("   "),
            Span::styled(
                format!("NO {}", format_price(display.no_price)),
                Style::default().fg(Color::Red),
            ),
        ]),
        Line::styled(format!("Volume: {}", display.volume), dim),
        Line::styled(
            if display.has_market_data {
                "Live figures".to_string()
            } else {
                "Waiting for market data".to_string()
            },
            Style::default().fg(Color::DarkGray),
        ),
    ];
    let widget =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Market"));
    f.render_widget(widget, area);
}

fn draw_wallet_panel(f: &mut Frame, area: Rect, display: &MarketDisplay) {
    let mut lines = vec![Line::from(format!("Account: {}", display.account_label()))];
    match &display.position {
        Some(position) => {
            for side in [Side::Yes, Side::No] {
                lines.push(Line::from(format!("{side} stake: {}", position.stake(side))));
            }
            lines.push(Line::from(format!("Total: {}", position.total())));
        }
        None if display.account.is_some() => {
            lines.push(Line::styled(
                "Position loading…",
                Style::default().fg(Color::DarkGray),
            ));
        }
        None => {
            lines.push(Line::styled(
                "Press c to connect a wallet",
                Style::default().fg(Color::DarkGray),
            ));
        }
    }
    let widget =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Wallet"));
    f.render_widget(widget, area);
}

fn draw_bet_panel(f: &mut Frame, area: Rect, screen: &Screen) {
    let display = &screen.display;
    let side_span = |side: Side| {
        let selected = display.side == Some(side);
        let style = match (side, selected) {
            (Side::Yes, true) => Style::default()
                .fg(Color::Black)
                .bg(Color::Green)
                .add_modifier(Modifier::BOLD),
            (Side::No, true) => Style::default()
                .fg(Color::Black)
                .bg(Color::Red)
                .add_modifier(Modifier::BOLD),
            (_, false) => Style::default().fg(Color::DarkGray),
        };
        Span::styled(format!(" {side} "), style)
    };
    let profit = match display.potential_profit {
        Some(profit) => format_amount(profit),
        None => "-".to_string(),
    };
    let action = match (&screen.busy, display.submitting || display.claiming) {
        (Some(label), _) => Line::styled(label.clone(), Style::default().fg(Color::Yellow)),
        (None, true) => Line::styled("Waiting for the chain…", Style::default().fg(Color::Yellow)),
        (None, false) if display.account.is_none() => {
            Line::styled("Connect a wallet to bet", Style::default().fg(Color::DarkGray))
        }
        (None, false) => Line::from("Enter to place bet"),
    };
    let lines = vec![
        Line::from(vec![Span::raw("Side: "), side_span(Side::Yes), Span::raw(" "), side_span(Side::No)]),
        Line::from(format!("Stake: {}", display.stake)),
        Line::from(format!("Potential profit: {profit}")),
        Line::styled(screen.status.clone(), Style::default().fg(Color::Cyan)),
        action,
    ];
    let widget =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Place Bet"));
    f.render_widget(widget, area);
}

fn draw_notifications(f: &mut Frame, area: Rect, screen: &Screen) {
    let mut lines: Vec<Line> = Vec::new();
    if screen.notifications.is_empty() {
        lines.push(Line::styled("Nothing yet", Style::default().fg(Color::DarkGray)));
    }
    for notification in screen.notifications.iter().rev().take(VISIBLE_NOTIFICATIONS) {
        lines.push(Line::styled(
            format!("{}: {}", notification.title, notification.body),
            level_style(notification.level),
        ));
    }
    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Notifications"));
    f.render_widget(widget, area);
}

fn draw_help(f: &mut Frame, area: Rect) {
    let help = Paragraph::new(
        "c connect | y/n side | +/- stake | e edit stake | Enter bet | r claim | f refresh | a switch account | d disconnect | q quit",
    )
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

fn draw_modals(f: &mut Frame, state: &UiState) {
    match &state.mode {
        Mode::StakeInput(input) => {
            let area = centered_rect(40, 20, f.area());
            let block = Block::default().borders(Borders::ALL).title("Stake");
            let p = Paragraph::new(format!(
                "Amount: {}\nEnter=confirm Esc=cancel digits and . to edit",
                input.buffer
            ));
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
        Mode::QuitModal => {
            let area = centered_rect(30, 15, f.area());
            let block = Block::default().borders(Borders::ALL).title("Quit");
            let p = Paragraph::new("Quit freight-market? (y/n)");
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
        Mode::Normal => {}
    }
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    let vertical = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1]);

    vertical[1]
}

fn level_style(level: NotificationLevel) -> Style {
    match level {
        NotificationLevel::Info => Style::default(),
        NotificationLevel::Success => Style::default().fg(Color::Green),
        NotificationLevel::Warning => Style::default().fg(Color::Yellow),
        NotificationLevel::Error => Style::default().fg(Color::Red),
    }
}

fn format_price(price: Decimal) -> String {
    format!("{:.2}", price)
}

fn format_amount(amount: Decimal) -> String {
    amount.round_dp(6).normalize().to_string()
}
