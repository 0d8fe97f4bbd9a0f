//! Display model and user actions for the market screen.

use crate::{
    backend::{
        MarketContract,
        WalletExtension,
    },
    config::{
        COLD_START_NO_PRICE,
        COLD_START_YES_PRICE,
    },
    error::{
        ClientError,
        ClientResult,
        ErrorKind,
        Precondition,
    },
    market::{
        Address,
        BetIntent,
        MarketStats,
        Side,
        TransactionReceipt,
        UserPosition,
        short_address,
    },
    session::{
        SessionSnapshot,
        SessionStore,
    },
    units::{
        self,
        DEFAULT_STAKE,
        StakeInputError,
    },
};
use rust_decimal::Decimal;
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        Mutex,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
};
use tracing::{
    error,
    info,
    warn,
};

const MAX_NOTIFICATIONS: usize = 50;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn new(
        level: NotificationLevel,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            level,
            title: title.into(),
            body: body.into(),
        }
    }

    /// Kind-specific copy for a failed `action`.
    pub fn from_error(action: &str, err: &ClientError) -> Self {
        let (level, title, body) = match err {
            ClientError::PreconditionFailed(precondition) => (
                NotificationLevel::Warning,
                format!("Cannot {action}"),
                precondition.to_string(),
            ),
            ClientError::WalletUnavailable(reason) => (
                NotificationLevel::Error,
                "Wallet required".to_string(),
                format!("No wallet is available ({reason})."),
            ),
            ClientError::UserRejected(_) => (
                NotificationLevel::Warning,
                "Request rejected".to_string(),
                format!("The wallet declined to {action}."),
            ),
            ClientError::NetworkMismatchUnresolvable { expected, reason } => (
                NotificationLevel::Error,
                "Wrong network".to_string(),
                format!("Could not switch to chain {expected}: {reason}"),
            ),
            ClientError::ReadFailure(reason) => (
                NotificationLevel::Warning,
                "Market data unavailable".to_string(),
                format!("Showing the last known figures ({reason})."),
            ),
            ClientError::InsufficientFunds(_) => (
                NotificationLevel::Error,
                "Insufficient funds".to_string(),
                "The wallet balance cannot cover this stake and fees.".to_string(),
            ),
            ClientError::TransactionReverted(reason) => (
                NotificationLevel::Error,
                "Transaction failed".to_string(),
                format!("Failed to {action}: {reason}"),
            ),
        };
        Self::new(level, title, body)
    }
}

/// A busy indicator that clears when its guard is dropped.
#[derive(Clone, Debug, Default)]
struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    fn try_acquire(&self) -> Option<BusyGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(self.0.clone()))
    }

    fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Draft {
    side: Option<Side>,
    stake: Decimal,
}

impl Default for Draft {
    fn default() -> Self {
        Self {
            side: None,
            stake: DEFAULT_STAKE,
        }
    }
}

/// Everything the market screen renders, derived from one snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MarketDisplay {
    pub account: Option<Address>,
    pub connecting: bool,
    pub yes_price: Decimal,
    pub no_price: Decimal,
    pub probability: String,
    pub volume: Decimal,
    pub position: Option<UserPosition>,
    pub side: Option<Side>,
    pub stake: Decimal,
    pub potential_profit: Option<Decimal>,
    pub submitting: bool,
    pub claiming: bool,
    pub has_market_data: bool,
}

impl MarketDisplay {
    pub fn account_label(&self) -> String {
        match (&self.account, self.connecting) {
            (Some(account), _) => short_address(account),
            (None, true) => "connecting…".to_string(),
            (None, false) => "not connected".to_string(),
        }
    }
}

/// Price of one unit of `side`, falling back to the cold-start odds before
/// the first market read.
pub fn display_price(stats: Option<&MarketStats>, side: Side) -> Decimal {
    match (stats, side) {
        (Some(stats), side) => Decimal::from(stats.percentage(side)) / Decimal::ONE_HUNDRED,
        (None, Side::Yes) => COLD_START_YES_PRICE,
        (None, Side::No) => COLD_START_NO_PRICE,
    }
}

/// Profit of `stake` at `price` under the linear payout model, so that
/// `stake + profit == stake / price`.
pub fn compute_potential_profit(stake: Decimal, price: Decimal) -> ClientResult<Decimal> {
    if price <= Decimal::ZERO {
        return Err(Precondition::NonPositivePrice.into());
    }
    let payout = stake
        .checked_div(price)
        .ok_or_else(|| Precondition::StakeOutOfRange(stake.to_string()))?;
    Ok(payout - stake)
}

pub struct MarketView<W, C> {
    store: Arc<SessionStore<W, C>>,
    draft: Mutex<Draft>,
    submitting: BusyFlag,
    claiming: BusyFlag,
    notifications: Mutex<VecDeque<Notification>>,
}

impl<W, C> MarketView<W, C>
where
    W: WalletExtension,
    C: MarketContract,
{
    pub fn new(store: Arc<SessionStore<W, C>>) -> Self {
        Self {
            store,
            draft: Mutex::new(Draft::default()),
            submitting: BusyFlag::default(),
            claiming: BusyFlag::default(),
            notifications: Mutex::new(VecDeque::new()),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore<W, C>> {
        &self.store
    }

    fn draft(&self) -> Draft {
        *crate::backend::lock(&self.draft)
    }

    fn update_draft(&self, change: impl FnOnce(&mut Draft)) {
        change(&mut crate::backend::lock(&self.draft));
    }

    pub fn display(&self) -> MarketDisplay {
        self.display_for(&self.store.snapshot())
    }

    pub fn display_for(&self, snapshot: &SessionSnapshot) -> MarketDisplay {
        let draft = self.draft();
        let stats = snapshot.market.as_ref();
        let yes_price = display_price(stats, Side::Yes);
        let no_price = display_price(stats, Side::No);
        let potential_profit = draft.side.and_then(|side| {
            compute_potential_profit(draft.stake, display_price(stats, side)).ok()
        });
        let probability = match stats {
            Some(stats) => format!("{}%", stats.yes_percentage),
            None => format!("{}%", (yes_price * Decimal::ONE_HUNDRED).normalize()),
        };
        MarketDisplay {
            account: snapshot.state.account(),
            connecting: snapshot.state.is_connecting(),
            yes_price,
            no_price,
            probability,
            volume: stats.map(MarketStats::total_volume).unwrap_or_default(),
            position: snapshot.position.clone(),
            side: draft.side,
            stake: draft.stake,
            potential_profit,
            submitting: self.submitting.is_set(),
            claiming: self.claiming.is_set(),
            has_market_data: stats.is_some(),
        }
    }

    pub fn select_side(&self, side: Side) {
        self.update_draft(|draft| draft.side = Some(side));
        let stake = self.draft().stake;
        self.notify(Notification::new(
            NotificationLevel::Info,
            format!("You selected {side}"),
            format!("You're betting {stake} on {side}"),
        ));
    }

    pub fn set_stake(&self, stake: Decimal) {
        let stake = if stake.is_sign_negative() {
            Decimal::ZERO
        } else {
            stake.normalize()
        };
        self.update_draft(|draft| draft.stake = stake);
    }

    pub fn set_stake_text(&self, input: &str) -> Result<Decimal, StakeInputError> {
        let stake = units::parse_stake(input)?;
        self.set_stake(stake);
        Ok(stake)
    }

    pub fn step_stake_up(&self) {
        self.update_draft(|draft| draft.stake = units::step_up(draft.stake));
    }

    pub fn step_stake_down(&self) {
        self.update_draft(|draft| draft.stake = units::step_down(draft.stake));
    }

    /// The bet the user has fully specified, if any.
    pub fn intent(&self) -> Option<BetIntent> {
        let draft = self.draft();
        draft.side.map(|side| BetIntent {
            side,
            stake: draft.stake,
        })
    }

    pub fn potential_profit(&self) -> ClientResult<Decimal> {
        let draft = self.draft();
        let side = draft.side.ok_or(Precondition::NoSideSelected)?;
        let price = display_price(self.store.snapshot().market.as_ref(), side);
        compute_potential_profit(draft.stake, price)
    }

    /// Validates the draft, submits it and refreshes exactly once afterwards.
    ///
    /// Local validation failures leave the draft untouched and never reach
    /// the chain. Any attempt that does reach the chain consumes the draft.
    pub async fn submit_bet(&self) -> ClientResult<TransactionReceipt> {
        let Some(_busy) = self.submitting.try_acquire() else {
            return Err(self.fail("place bet", Precondition::SubmissionInFlight.into()));
        };
        let intent = match self.validated_intent() {
            Ok(intent) => intent,
            Err(precondition) => return Err(self.fail("place bet", precondition.into())),
        };

        self.update_draft(|draft| *draft = Draft::default());
        let result = self
            .store
            .client()
            .submit_bet(intent.side, intent.stake)
            .await;
        self.store.refresh().await;

        match result {
            Ok(receipt) => {
                info!(side = %receipt.side, stake = %receipt.stake, "bet placed");
                let tx = receipt
                    .tx_id
                    .as_deref()
                    .map(|id| format!(" (tx {id})"))
                    .unwrap_or_default();
                self.notify(Notification::new(
                    NotificationLevel::Success,
                    "Bet placed!",
                    format!("You bet {} on {}{tx}", receipt.stake, receipt.side),
                ));
                Ok(receipt)
            }
            Err(err) => Err(self.fail("place bet", err)),
        }
    }

    fn validated_intent(&self) -> Result<BetIntent, Precondition> {
        if !self.store.state().is_connected() {
            return Err(Precondition::NotConnected);
        }
        let draft = self.draft();
        let side = draft.side.ok_or(Precondition::NoSideSelected)?;
        if draft.stake <= Decimal::ZERO {
            return Err(Precondition::NonPositiveStake);
        }
        units::to_base_units(draft.stake, self.store.client().decimals())?;
        Ok(BetIntent {
            side,
            stake: draft.stake,
        })
    }

    /// Claims winnings for the connected account, then refreshes once.
    pub async fn claim_reward(&self) -> ClientResult<bool> {
        let Some(_busy) = self.claiming.try_acquire() else {
            return Err(self.fail("claim reward", Precondition::SubmissionInFlight.into()));
        };
        if !self.store.state().is_connected() {
            return Err(self.fail("claim reward", Precondition::NotConnected.into()));
        }
        let result = self.store.client().claim_reward().await;
        self.store.refresh().await;
        match result {
            Ok(claimed) => {
                self.notify(Notification::new(
                    NotificationLevel::Success,
                    "Reward claimed",
                    "Winnings were sent to your wallet.",
                ));
                Ok(claimed)
            }
            Err(err) => Err(self.fail("claim reward", err)),
        }
    }

    pub async fn connect(&self) -> ClientResult<Address> {
        match self.store.connect().await {
            Ok(account) => {
                self.notify(Notification::new(
                    NotificationLevel::Success,
                    "Connected",
                    format!("Wallet {}", short_address(&account)),
                ));
                Ok(account)
            }
            Err(err) => Err(self.fail("connect", err)),
        }
    }

    pub async fn disconnect(&self) -> ClientResult<()> {
        match self.store.disconnect().await {
            Ok(()) => {
                self.notify(Notification::new(
                    NotificationLevel::Info,
                    "Disconnected",
                    "Wallet access was revoked.",
                ));
                Ok(())
            }
            Err(err) => Err(self.fail("disconnect", err)),
        }
    }

    /// Moves the wallet to its next account; the session follows through the
    /// account-change stream.
    pub async fn switch_account(&self) -> ClientResult<Option<Address>> {
        if !self.store.state().is_connected() {
            return Err(self.fail("switch account", Precondition::NotConnected.into()));
        }
        match self.store.client().switch_account().await {
            Ok(Some(account)) => {
                self.notify(Notification::new(
                    NotificationLevel::Info,
                    "Account switched",
                    format!("Now using {}", short_address(&account)),
                ));
                Ok(Some(account))
            }
            Ok(None) => {
                self.notify(Notification::new(
                    NotificationLevel::Info,
                    "No other account",
                    "The wallet holds a single account.",
                ));
                Ok(None)
            }
            Err(err) => Err(self.fail("switch account", err)),
        }
    }

    /// Manual refresh; read failures are reported here, unlike timer refreshes.
    pub async fn refresh(&self) {
        let report = self.store.refresh().await;
        if let Some(err) = report.stats_error.or(report.position_error) {
            self.notify(Notification::from_error("refresh", &err));
        }
    }

    fn fail(&self, action: &str, err: ClientError) -> ClientError {
        match err.kind() {
            ErrorKind::PreconditionFailed | ErrorKind::UserRejected => {
                warn!(%err, action, "action not completed")
            }
            _ => error!(%err, action, "action failed"),
        }
        self.notify(Notification::from_error(action, &err));
        err
    }

    pub fn notify(&self, notification: Notification) {
        let mut notifications = crate::backend::lock(&self.notifications);
        notifications.push_back(notification);
        while notifications.len() > MAX_NOTIFICATIONS {
            notifications.pop_front();
        }
    }

    /// Most recent last.
    pub fn notifications(&self) -> Vec<Notification> {
        crate::backend::lock(&self.notifications)
            .iter()
            .cloned()
            .collect()
    }

    pub fn latest_notification(&self) -> Option<Notification> {
        crate::backend::lock(&self.notifications).back().cloned()
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn display_price__uses_percentages_or_cold_start() {
        // given
        let stats = MarketStats {
            yes_volume: dec("100"),
            no_volume: dec("50"),
            yes_percentage: 67,
            no_percentage: 33,
        };

        // then
        assert_eq!(display_price(Some(&stats), Side::Yes), dec("0.67"));
        assert_eq!(display_price(Some(&stats), Side::No), dec("0.33"));
        assert_eq!(display_price(None, Side::Yes), dec("0.68"));
        assert_eq!(display_price(None, Side::No), dec("0.32"));
    }

    #[test]
    fn compute_potential_profit__matches_linear_payout() {
        assert_eq!(compute_potential_profit(dec("1"), dec("0.5")).unwrap(), dec("1"));
        assert_eq!(compute_potential_profit(dec("0.05"), dec("1")).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn compute_potential_profit__rejects_non_positive_price() {
        assert_eq!(
            compute_potential_profit(dec("1"), Decimal::ZERO),
            Err(ClientError::PreconditionFailed(Precondition::NonPositivePrice))
        );
        assert!(compute_potential_profit(dec("1"), dec("-0.2")).is_err());
    }

    #[test]
    fn notification__copy_is_kind_specific() {
        let funds = Notification::from_error("place bet", &ClientError::InsufficientFunds("x".into()));
        let rejected = Notification::from_error("place bet", &ClientError::UserRejected("x".into()));
        let local = Notification::from_error("place bet", &Precondition::NoSideSelected.into());

        assert_eq!(funds.title, "Insufficient funds");
        assert_eq!(funds.level, NotificationLevel::Error);
        assert_eq!(rejected.level, NotificationLevel::Warning);
        assert_eq!(local.title, "Cannot place bet");
        assert_eq!(local.body, "select YES or NO first");
    }

    #[test]
    fn busy_flag__clears_when_guard_drops() {
        // given
        let flag = BusyFlag::default();

        // when
        let guard = flag.try_acquire();

        // then
        assert!(guard.is_some());
        assert!(flag.is_set());
        assert!(flag.try_acquire().is_none());
        drop(guard);
        assert!(!flag.is_set());
    }

    proptest! {
        #[test]
        fn compute_potential_profit__stake_plus_profit_is_payout(
            stake_thousandths in 0u64..1_000_000_000,
            price_percent in 1u32..=100,
        ) {
            let stake = Decimal::new(stake_thousandths as i64, 3);
            let price = Decimal::new(i64::from(price_percent), 2);
            let profit = compute_potential_profit(stake, price).unwrap();
            prop_assert_eq!(stake + profit, stake / price);
        }
    }
}
