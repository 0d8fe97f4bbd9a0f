use crate::{
    backend::{
        MarketContract,
        WalletExtension,
    },
    error::ClientError,
    ui,
    view::{
        MarketView,
        Notification,
        NotificationLevel,
    },
    watcher::WalletChangeWatcher,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinSet;
use tracing::{
    debug,
    info,
    warn,
};

/// Static text and terminal behaviour for one run of the market screen.
#[derive(Clone, Debug)]
pub struct AppSettings {
    pub title: String,
    pub resolution: String,
    pub backend_label: String,
    pub refresh_interval: Duration,
    /// Leave the alternate screen while wallet actions run, so a keystore
    /// password prompt is visible.
    pub release_terminal_for_wallet: bool,
}

/// A user action that waits on the wallet or the chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    SubmitBet,
    ClaimReward,
    Refresh,
    Connect,
    SwitchAccount,
    Disconnect,
}

impl Action {
    fn done_label(self) -> &'static str {
        match self {
            Action::SubmitBet => "Bet placed",
            Action::ClaimReward => "Reward claimed",
            Action::Refresh => "Refreshed",
            Action::Connect => "Wallet connected",
            Action::SwitchAccount => "Account switch requested",
            Action::Disconnect => "Disconnected",
        }
    }

    /// Actions that may open a keystore password prompt on the terminal.
    fn prompts_wallet(self) -> bool {
        matches!(self, Action::Connect | Action::SwitchAccount)
    }
}

#[derive(Debug)]
pub struct ActionOutcome {
    pub action: Action,
    pub result: Result<(), ClientError>,
}

async fn perform<W, C>(view: Arc<MarketView<W, C>>, action: Action) -> ActionOutcome
where
    W: WalletExtension,
    C: MarketContract,
{
    let result = match action {
        Action::SubmitBet => view.submit_bet().await.map(drop),
        Action::ClaimReward => view.claim_reward().await.map(drop),
        Action::Refresh => {
            view.refresh().await;
            Ok(())
        }
        Action::Connect => view.connect().await.map(drop),
        Action::SwitchAccount => view.switch_account().await.map(drop),
        Action::Disconnect => view.disconnect().await,
    };
    ActionOutcome { action, result }
}

/// Runs user actions off the event loop so redraws, input and interrupts
/// keep flowing while the chain answers.
#[derive(Default)]
pub struct ActionRunner {
    tasks: JoinSet<ActionOutcome>,
}

impl ActionRunner {
    pub fn spawn<W, C>(&mut self, view: &Arc<MarketView<W, C>>, action: Action)
    where
        W: WalletExtension,
        C: MarketContract,
    {
        debug!(?action, "starting action");
        self.tasks.spawn(perform(view.clone(), action));
    }

    pub fn is_busy(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Next finished action. Never resolves while idle, so it can sit in a
    /// `select!` arm.
    pub async fn next_completed(&mut self) -> ActionOutcome {
        loop {
            match self.tasks.join_next().await {
                Some(Ok(outcome)) => return outcome,
                Some(Err(err)) => warn!(%err, "action task ended abnormally"),
                None => std::future::pending::<()>().await,
            }
        }
    }

    /// Aborts whatever is still in flight.
    pub async fn shutdown(&mut self) {
        self.tasks.shutdown().await;
    }
}

struct Frame {
    status: String,
    busy: Option<String>,
}

impl Frame {
    fn screen<W, C>(&self, view: &MarketView<W, C>, settings: &AppSettings) -> ui::Screen
    where
        W: WalletExtension,
        C: MarketContract,
    {
        ui::Screen {
            title: settings.title.clone(),
            resolution: settings.resolution.clone(),
            backend: settings.backend_label.clone(),
            display: view.display(),
            status: self.status.clone(),
            busy: self.busy.clone(),
            notifications: view.notifications(),
        }
    }

    fn finish(&mut self, outcome: ActionOutcome, still_busy: bool) {
        if !still_busy {
            self.busy = None;
        }
        self.status = match outcome.result {
            Ok(()) => outcome.action.done_label().to_string(),
            // The view already raised a notification for the failure.
            Err(err) => format!("Last action failed: {err}"),
        };
    }
}

pub async fn run_app<W, C>(view: Arc<MarketView<W, C>>, settings: AppSettings) -> Result<()>
where
    W: WalletExtension,
    C: MarketContract,
{
    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();

    info!(backend = %settings.backend_label, "starting market screen");
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(&view, &settings, &mut ui_state, &mut input_events).await;
    ui::terminal_exit()?;
    res
}

async fn run_loop<W, C>(
    view: &Arc<MarketView<W, C>>,
    settings: &AppSettings,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
) -> Result<()>
where
    W: WalletExtension,
    C: MarketContract,
{
    let store = view.store().clone();
    let watcher = WalletChangeWatcher::subscribe(store.clone());
    let poller = store.spawn_poller(settings.refresh_interval);
    let mut snapshots = store.subscribe();

    let mut frame = Frame {
        status: "Loading market…".to_string(),
        busy: None,
    };
    let mut actions = ActionRunner::default();
    ui::draw(ui_state, &frame.screen(view, settings)).wrap_err("initial draw failed")?;

    // A wallet that already authorized us connects silently.
    if store.probe_existing_account().await.is_none() {
        view.refresh().await;
    }
    frame.status = "Ready".to_string();
    ui::draw(ui_state, &frame.screen(view, settings)).wrap_err("draw after startup failed")?;

    let res = loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    warn!("session store closed");
                    break Ok(());
                }
                if let Err(err) = ui::draw(ui_state, &frame.screen(view, settings))
                    .wrap_err("draw after session update failed")
                {
                    break Err(err);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt, exiting");
                break Ok(());
            }
            outcome = actions.next_completed() => {
                frame.finish(outcome, actions.is_busy());
                if let Err(err) = ui::draw(ui_state, &frame.screen(view, settings))
                    .wrap_err("draw after action failed")
                {
                    break Err(err);
                }
            }
            raw_ev = ui::next_raw_event(input_events) => {
                let event = match raw_ev {
                    Ok(event) => event,
                    Err(err) => break Err(err),
                };
                let Some(ev) = ui::interpret_event(ui_state, event) else {
                    continue;
                };
                if ev == ui::UserEvent::Quit {
                    break Ok(());
                }
                if let Err(err) =
                    handle_event(view, settings, ui_state, &mut frame, &mut actions, ev).await
                {
                    break Err(err);
                }
                if let Err(err) = ui::draw(ui_state, &frame.screen(view, settings))
                    .wrap_err("draw after user action failed")
                {
                    break Err(err);
                }
            }
        }
    };

    actions.shutdown().await;
    poller.shutdown().await;
    if let Some(watcher) = watcher {
        watcher.shutdown().await;
    }
    info!("market screen closed");
    res
}

async fn handle_event<W, C>(
    view: &Arc<MarketView<W, C>>,
    settings: &AppSettings,
    ui_state: &mut ui::UiState,
    frame: &mut Frame,
    actions: &mut ActionRunner,
    ev: ui::UserEvent,
) -> Result<()>
where
    W: WalletExtension,
    C: MarketContract,
{
    let (action, label) = match ev {
        ui::UserEvent::Quit | ui::UserEvent::Redraw => return Ok(()),
        ui::UserEvent::SelectSide(side) => {
            view.select_side(side);
            return Ok(());
        }
        ui::UserEvent::StakeUp => {
            view.step_stake_up();
            return Ok(());
        }
        ui::UserEvent::StakeDown => {
            view.step_stake_down();
            return Ok(());
        }
        ui::UserEvent::SetStake(text) => {
            match view.set_stake_text(&text) {
                Ok(stake) => frame.status = format!("Stake set to {stake}"),
                Err(err) => {
                    view.notify(Notification::new(
                        NotificationLevel::Warning,
                        "Invalid stake",
                        err.to_string(),
                    ));
                }
            }
            return Ok(());
        }
        ui::UserEvent::SubmitBet => {
            let label = view
                .intent()
                .map(|intent| format!("Placing {} on {}…", intent.stake, intent.side))
                .unwrap_or_else(|| "Placing bet…".to_string());
            (Action::SubmitBet, label)
        }
        ui::UserEvent::ClaimReward => (Action::ClaimReward, "Claiming reward…".to_string()),
        ui::UserEvent::Refresh => (Action::Refresh, "Refreshing…".to_string()),
        ui::UserEvent::Connect => (Action::Connect, "Connecting wallet…".to_string()),
        ui::UserEvent::SwitchAccount => (Action::SwitchAccount, "Switching account…".to_string()),
        ui::UserEvent::Disconnect => (Action::Disconnect, "Disconnecting…".to_string()),
    };

    show_processing_status(view, settings, ui_state, frame, label)?;
    if action.prompts_wallet() && settings.release_terminal_for_wallet {
        // The keystore prompt reads the terminal, so input stays parked until
        // it returns.
        ui::terminal_exit()?;
        let outcome = perform(view.clone(), action).await;
        ui::terminal_enter(ui_state)?;
        frame.finish(outcome, actions.is_busy());
    } else {
        actions.spawn(view, action);
    }
    Ok(())
}

fn show_processing_status<W, C>(
    view: &MarketView<W, C>,
    settings: &AppSettings,
    ui_state: &mut ui::UiState,
    frame: &mut Frame,
    label: impl Into<String>,
) -> Result<()>
where
    W: WalletExtension,
    C: MarketContract,
{
    let label = label.into();
    frame.status = label.clone();
    frame.busy = Some(label);
    ui::draw(ui_state, &frame.screen(view, settings)).wrap_err("draw while processing failed")
}
