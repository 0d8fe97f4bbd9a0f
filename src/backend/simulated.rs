//! In-process wallet and market used by `--simulated` and by the test suite.

use super::{
    AccountListeners,
    AccountsSubscription,
    ContractError,
    ExtensionError,
    ListenerId,
    MarketContract,
    RawMarketStats,
    RawPosition,
    TxOutcome,
    WalletExtension,
    lock,
};
use crate::market::{
    Address,
    Side,
};
use std::{
    collections::{
        HashMap,
        HashSet,
    },
    sync::{
        Mutex,
        atomic::{
            AtomicUsize,
            Ordering,
        },
    },
    time::Duration,
};
use tracing::debug;

/// How the simulated extension answers `switch_network`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SwitchBehaviour {
    #[default]
    Accept,
    Reject,
    Fail,
}

#[derive(Debug)]
struct WalletState {
    accounts: Vec<Address>,
    authorized: Vec<Address>,
    chain_id: u64,
    reject_requests: bool,
    switch: SwitchBehaviour,
    request_delay: Option<Duration>,
}

#[derive(Debug)]
pub struct SimulatedWallet {
    state: Mutex<WalletState>,
    listeners: Mutex<AccountListeners>,
    request_calls: AtomicUsize,
}

impl SimulatedWallet {
    /// A wallet holding `accounts`, none of them authorized yet.
    pub fn new(accounts: Vec<Address>, chain_id: u64) -> Self {
        Self {
            state: Mutex::new(WalletState {
                accounts,
                authorized: Vec::new(),
                chain_id,
                reject_requests: false,
                switch: SwitchBehaviour::Accept,
                request_delay: None,
            }),
            listeners: Mutex::new(AccountListeners::default()),
            request_calls: AtomicUsize::new(0),
        }
    }

    /// Marks the first account as already authorized, as if approved in an
    /// earlier session.
    pub fn with_preauthorized(self) -> Self {
        {
            let mut state = lock(&self.state);
            let first = state.accounts.first().copied();
            state.authorized = first.into_iter().collect();
        }
        self
    }

    pub fn set_reject_requests(&self, reject: bool) {
        lock(&self.state).reject_requests = reject;
    }

    pub fn set_switch_behaviour(&self, behaviour: SwitchBehaviour) {
        lock(&self.state).switch = behaviour;
    }

    pub fn set_request_delay(&self, delay: Option<Duration>) {
        lock(&self.state).request_delay = delay;
    }

    /// Changes the authorized accounts from the extension side and notifies listeners.
    pub fn set_authorized(&self, accounts: Vec<Address>) {
        lock(&self.state).authorized = accounts.clone();
        lock(&self.listeners).emit(&accounts);
    }

    pub fn chain_id(&self) -> u64 {
        lock(&self.state).chain_id
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn request_calls(&self) -> usize {
        self.request_calls.load(Ordering::SeqCst)
    }
}

impl WalletExtension for SimulatedWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, ExtensionError> {
        self.request_calls.fetch_add(1, Ordering::SeqCst);
        let delay = lock(&self.state).request_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = lock(&self.state);
        if state.reject_requests {
            return Err(ExtensionError::Rejected(
                "account access request declined".to_string(),
            ));
        }
        if state.authorized.is_empty() {
            let Some(first) = state.accounts.first().copied() else {
                return Err(ExtensionError::Unavailable(
                    "wallet holds no accounts".to_string(),
                ));
            };
            state.authorized = vec![first];
        }
        Ok(state.authorized.clone())
    }

    async fn authorized_accounts(&self) -> Result<Vec<Address>, ExtensionError> {
        Ok(lock(&self.state).authorized.clone())
    }

    async fn switch_network(&self, chain_id: u64) -> Result<(), ExtensionError> {
        let mut state = lock(&self.state);
        if state.chain_id == chain_id {
            return Ok(());
        }
        match state.switch {
            SwitchBehaviour::Accept => {
                debug!(from = state.chain_id, to = chain_id, "simulated network switch");
                state.chain_id = chain_id;
                Ok(())
            }
            SwitchBehaviour::Reject => Err(ExtensionError::Rejected(format!(
                "switch to chain {chain_id} declined"
            ))),
            SwitchBehaviour::Fail => Err(ExtensionError::SwitchFailed(format!(
                "chain {chain_id} is not configured in the wallet"
            ))),
        }
    }

    fn on_accounts_changed(&self) -> Result<AccountsSubscription, ExtensionError> {
        Ok(lock(&self.listeners).subscribe())
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        lock(&self.listeners).remove(id)
    }

    async fn revoke_accounts(&self) -> Result<(), ExtensionError> {
        lock(&self.state).authorized.clear();
        lock(&self.listeners).emit(&[]);
        Ok(())
    }

    async fn switch_account(&self) -> Result<Option<Address>, ExtensionError> {
        let next = {
            let mut state = lock(&self.state);
            let Some(current) = state.authorized.first().copied() else {
                return Err(ExtensionError::Rejected(
                    "no account is authorized".to_string(),
                ));
            };
            let position = state.accounts.iter().position(|a| *a == current);
            let next_index = position.map_or(0, |i| (i + 1) % state.accounts.len());
            let Some(next) = state.accounts.get(next_index).copied() else {
                return Ok(None);
            };
            if next == current {
                return Ok(None);
            }
            state.authorized = vec![next];
            next
        };
        lock(&self.listeners).emit(&[next]);
        Ok(Some(next))
    }
}

#[derive(Debug)]
struct MarketState {
    yes_volume: u64,
    no_volume: u64,
    reported_percentages: Option<(u64, u64)>,
    positions: HashMap<Address, RawPosition>,
    balances: HashMap<Address, u64>,
    winner: Option<Side>,
    closed: bool,
    claimed: HashSet<Address>,
    fail_stats: bool,
    fail_positions: bool,
    position_delay: Option<Duration>,
    submit_delay: Option<Duration>,
    tx_counter: u64,
}

/// Counts of every call that reached the simulated contract.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CallCounts {
    pub stats_reads: usize,
    pub position_reads: usize,
    pub bets: usize,
    pub claims: usize,
}

#[derive(Debug)]
pub struct SimulatedMarket {
    state: Mutex<MarketState>,
    counts: Mutex<CallCounts>,
}

impl SimulatedMarket {
    /// An empty book.
    pub fn new() -> Self {
        Self::with_volumes(0, 0)
    }

    /// A book with the given base-unit volumes on each side.
    pub fn with_volumes(yes_volume: u64, no_volume: u64) -> Self {
        Self {
            state: Mutex::new(MarketState {
                yes_volume,
                no_volume,
                reported_percentages: None,
                positions: HashMap::new(),
                balances: HashMap::new(),
                winner: None,
                closed: false,
                claimed: HashSet::new(),
                fail_stats: false,
                fail_positions: false,
                position_delay: None,
                submit_delay: None,
                tx_counter: 0,
            }),
            counts: Mutex::new(CallCounts::default()),
        }
    }

    /// The demo book: 68 and 32 whole units of a `decimals`-place asset.
    pub fn seeded(decimals: u32) -> Self {
        let unit = 10u64.checked_pow(decimals).unwrap_or(1);
        Self::with_volumes(68 * unit, 32 * unit)
    }

    pub fn fund(&self, account: Address, amount: u64) {
        let mut state = lock(&self.state);
        *state.balances.entry(account).or_default() += amount;
    }

    pub fn balance(&self, account: &Address) -> u64 {
        lock(&self.state)
            .balances
            .get(account)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_position(&self, account: Address, position: RawPosition) {
        lock(&self.state).positions.insert(account, position);
    }

    /// Makes `get_market_stats` report these percentages instead of deriving them.
    pub fn set_reported_percentages(&self, percentages: Option<(u64, u64)>) {
        lock(&self.state).reported_percentages = percentages;
    }

    pub fn set_closed(&self, closed: bool) {
        lock(&self.state).closed = closed;
    }

    pub fn resolve(&self, winner: Side) {
        let mut state = lock(&self.state);
        state.winner = Some(winner);
        state.closed = true;
    }

    pub fn set_fail_stats(&self, fail: bool) {
        lock(&self.state).fail_stats = fail;
    }

    pub fn set_fail_positions(&self, fail: bool) {
        lock(&self.state).fail_positions = fail;
    }

    pub fn set_position_delay(&self, delay: Option<Duration>) {
        lock(&self.state).position_delay = delay;
    }

    /// Delays bets and claims, as if waiting for block inclusion.
    pub fn set_submit_delay(&self, delay: Option<Duration>) {
        lock(&self.state).submit_delay = delay;
    }

    pub fn counts(&self) -> CallCounts {
        *lock(&self.counts)
    }

    async fn wait_for_inclusion(&self) {
        let delay = lock(&self.state).submit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn next_tx_id(state: &mut MarketState) -> String {
        state.tx_counter += 1;
        format!("0x{:064x}", state.tx_counter)
    }
}

impl Default for SimulatedMarket {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketContract for SimulatedMarket {
    async fn market_stats(&self) -> Result<RawMarketStats, ContractError> {
        lock(&self.counts).stats_reads += 1;
        let state = lock(&self.state);
        if state.fail_stats {
            return Err(ContractError::Rpc("connection refused".to_string()));
        }
        let (yes_percentage, no_percentage) = match state.reported_percentages {
            Some(reported) => reported,
            None => derived_percentages(state.yes_volume, state.no_volume),
        };
        Ok(RawMarketStats {
            yes_volume: state.yes_volume,
            no_volume: state.no_volume,
            yes_percentage,
            no_percentage,
        })
    }

    async fn user_position(&self, account: Address) -> Result<RawPosition, ContractError> {
        lock(&self.counts).position_reads += 1;
        let delay = lock(&self.state).position_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = lock(&self.state);
        if state.fail_positions {
            return Err(ContractError::Rpc("request timed out".to_string()));
        }
        Ok(state.positions.get(&account).copied().unwrap_or_default())
    }

    async fn place_bet(
        &self,
        account: Address,
        side: Side,
        amount: u64,
    ) -> Result<TxOutcome, ContractError> {
        lock(&self.counts).bets += 1;
        self.wait_for_inclusion().await;
        let mut state = lock(&self.state);
        if state.closed {
            return Err(ContractError::Reverted("market is closed".to_string()));
        }
        if amount == 0 {
            return Err(ContractError::Reverted("bet amount is zero".to_string()));
        }
        let balance = state.balances.get(&account).copied().unwrap_or_default();
        if balance < amount {
            return Err(ContractError::InsufficientFunds(format!(
                "balance {balance} is below {amount}"
            )));
        }
        state.balances.insert(account, balance - amount);
        let position = state.positions.entry(account).or_default();
        match side {
            Side::Yes => position.yes_stake = position.yes_stake.saturating_add(amount),
            Side::No => position.no_stake = position.no_stake.saturating_add(amount),
        }
        match side {
            Side::Yes => state.yes_volume = state.yes_volume.saturating_add(amount),
            Side::No => state.no_volume = state.no_volume.saturating_add(amount),
        }
        let tx_id = Self::next_tx_id(&mut state);
        Ok(TxOutcome { tx_id: Some(tx_id) })
    }

    async fn claim_reward(&self, account: Address) -> Result<TxOutcome, ContractError> {
        lock(&self.counts).claims += 1;
        self.wait_for_inclusion().await;
        let mut state = lock(&self.state);
        let Some(winner) = state.winner else {
            return Err(ContractError::Reverted("market is not resolved".to_string()));
        };
        if state.claimed.contains(&account) {
            return Err(ContractError::Reverted("reward already claimed".to_string()));
        }
        let position = state.positions.get(&account).copied().unwrap_or_default();
        let (winning_stake, winning_volume) = match winner {
            Side::Yes => (position.yes_stake, state.yes_volume),
            Side::No => (position.no_stake, state.no_volume),
        };
        if winning_stake == 0 || winning_volume == 0 {
            return Err(ContractError::Reverted("nothing to claim".to_string()));
        }
        let total = u128::from(state.yes_volume) + u128::from(state.no_volume);
        let payout = u128::from(winning_stake) * total / u128::from(winning_volume);
        let payout = u64::try_from(payout).unwrap_or(u64::MAX);
        state.claimed.insert(account);
        *state.balances.entry(account).or_default() += payout;
        let tx_id = Self::next_tx_id(&mut state);
        Ok(TxOutcome { tx_id: Some(tx_id) })
    }
}

fn derived_percentages(yes_volume: u64, no_volume: u64) -> (u64, u64) {
    let total = u128::from(yes_volume) + u128::from(no_volume);
    if total == 0 {
        return (50, 50);
    }
    let yes = (u128::from(yes_volume) * 100 + total / 2) / total;
    let yes = yes as u64;
    (yes, 100 - yes)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    fn account(n: u8) -> Address {
        Address::new([n; 32])
    }

    #[tokio::test]
    async fn place_bet__moves_funds_into_the_book() {
        // given
        let market = SimulatedMarket::with_volumes(100, 50);
        market.fund(account(1), 1_000);

        // when
        let outcome = market.place_bet(account(1), Side::No, 200).await.unwrap();

        // then
        assert!(outcome.tx_id.is_some());
        assert_eq!(market.balance(&account(1)), 800);
        let stats = market.market_stats().await.unwrap();
        assert_eq!(stats.no_volume, 250);
        let position = market.user_position(account(1)).await.unwrap();
        assert_eq!(position.no_stake, 200);
    }

    #[tokio::test]
    async fn place_bet__rejects_overdraw_and_closed_market() {
        // given
        let market = SimulatedMarket::new();
        market.fund(account(1), 10);

        // when
        let overdraw = market.place_bet(account(1), Side::Yes, 11).await;
        market.set_closed(true);
        let closed = market.place_bet(account(1), Side::Yes, 1).await;

        // then
        assert!(matches!(overdraw, Err(ContractError::InsufficientFunds(_))));
        assert!(matches!(closed, Err(ContractError::Reverted(_))));
        assert_eq!(market.balance(&account(1)), 10);
    }

    #[tokio::test]
    async fn claim_reward__second_claim_reverts() {
        // given
        let market = SimulatedMarket::with_volumes(100, 100);
        market.set_position(
            account(1),
            RawPosition {
                yes_stake: 50,
                no_stake: 0,
            },
        );
        market.resolve(Side::Yes);

        // when
        let first = market.claim_reward(account(1)).await;
        let second = market.claim_reward(account(1)).await;

        // then
        assert!(first.is_ok());
        assert_eq!(market.balance(&account(1)), 100);
        assert_eq!(
            second,
            Err(ContractError::Reverted("reward already claimed".to_string()))
        );
    }

    #[test]
    fn derived_percentages__always_sum_to_hundred() {
        assert_eq!(derived_percentages(100, 50), (67, 33));
        assert_eq!(derived_percentages(0, 0), (50, 50));
        assert_eq!(derived_percentages(1, 2), (33, 67));
    }

    #[tokio::test]
    async fn switch_account__rotates_and_notifies() {
        // given
        let wallet = SimulatedWallet::new(vec![account(1), account(2)], 0).with_preauthorized();
        let mut sub = wallet.on_accounts_changed().unwrap();

        // when
        let next = wallet.switch_account().await.unwrap();

        // then
        assert_eq!(next, Some(account(2)));
        assert_eq!(sub.receiver.try_recv().unwrap(), vec![account(2)]);
        assert_eq!(wallet.authorized_accounts().await.unwrap(), vec![account(2)]);
    }

    #[tokio::test]
    async fn switch_network__follows_configured_behaviour() {
        // given
        let wallet = SimulatedWallet::new(vec![account(1)], 0);

        // when
        wallet.set_switch_behaviour(SwitchBehaviour::Fail);
        let failed = wallet.switch_network(9).await;
        wallet.set_switch_behaviour(SwitchBehaviour::Accept);
        let accepted = wallet.switch_network(9).await;

        // then
        assert!(matches!(failed, Err(ExtensionError::SwitchFailed(_))));
        assert!(accepted.is_ok());
        assert_eq!(wallet.chain_id(), 9);
    }
}
