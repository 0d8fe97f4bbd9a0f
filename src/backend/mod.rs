//! The two external boundaries the client talks to: the wallet extension that
//! holds accounts and signs, and the market contract that holds the book.
//!
//! Both are traits so the same session logic runs against a live Fuel node
//! ([`fuel`]) or the in-process market ([`simulated`]).

use crate::market::{
    Address,
    Side,
};
use std::{
    collections::BTreeMap,
    sync::{
        Mutex,
        MutexGuard,
        PoisonError,
    },
};
use thiserror::Error;
use tokio::sync::mpsc;

pub mod fuel;
pub mod simulated;

/// `get_market_stats()` as returned by the contract, in base units.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RawMarketStats {
    pub yes_volume: u64,
    pub no_volume: u64,
    pub yes_percentage: u64,
    pub no_percentage: u64,
}

/// `get_user_position(account)` in base units.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RawPosition {
    pub yes_stake: u64,
    pub no_stake: u64,
}

/// An included transaction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TxOutcome {
    pub tx_id: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ExtensionError {
    #[error("wallet extension unavailable: {0}")]
    Unavailable(String),
    #[error("user rejected the request: {0}")]
    Rejected(String),
    #[error("network switch failed: {0}")]
    SwitchFailed(String),
    #[error("wallet extension error: {0}")]
    Other(String),
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ContractError {
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("signing rejected: {0}")]
    Rejected(String),
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("reverted: {0}")]
    Reverted(String),
}

pub type ListenerId = u64;

/// A registered account-change listener. The receiver yields the full
/// authorized account list on every change, active account first.
#[derive(Debug)]
pub struct AccountsSubscription {
    pub id: ListenerId,
    pub receiver: mpsc::UnboundedReceiver<Vec<Address>>,
}

pub trait WalletExtension: Send + Sync + 'static {
    /// Interactive: may prompt the user to authorize an account.
    fn request_accounts(
        &self,
    ) -> impl Future<Output = Result<Vec<Address>, ExtensionError>> + Send;

    /// Accounts authorized earlier. Never prompts.
    fn authorized_accounts(
        &self,
    ) -> impl Future<Output = Result<Vec<Address>, ExtensionError>> + Send;

    fn switch_network(
        &self,
        chain_id: u64,
    ) -> impl Future<Output = Result<(), ExtensionError>> + Send;

    fn on_accounts_changed(&self) -> Result<AccountsSubscription, ExtensionError>;

    /// Returns `false` when `id` was not registered.
    fn remove_listener(&self, id: ListenerId) -> bool;

    fn revoke_accounts(&self) -> impl Future<Output = Result<(), ExtensionError>> + Send;

    /// Activates the next account. The change itself is delivered to listeners.
    fn switch_account(
        &self,
    ) -> impl Future<Output = Result<Option<Address>, ExtensionError>> + Send;
}

pub trait MarketContract: Send + Sync + 'static {
    fn market_stats(
        &self,
    ) -> impl Future<Output = Result<RawMarketStats, ContractError>> + Send;

    fn user_position(
        &self,
        account: Address,
    ) -> impl Future<Output = Result<RawPosition, ContractError>> + Send;

    /// Payable; `amount` base units of the base asset are forwarded with the call.
    fn place_bet(
        &self,
        account: Address,
        side: Side,
        amount: u64,
    ) -> impl Future<Output = Result<TxOutcome, ContractError>> + Send;

    fn claim_reward(
        &self,
        account: Address,
    ) -> impl Future<Output = Result<TxOutcome, ContractError>> + Send;
}

/// Listener bookkeeping shared by the extension implementations.
#[derive(Debug, Default)]
pub struct AccountListeners {
    next_id: ListenerId,
    senders: BTreeMap<ListenerId, mpsc::UnboundedSender<Vec<Address>>>,
}

impl AccountListeners {
    pub fn subscribe(&mut self) -> AccountsSubscription {
        let (tx, receiver) = mpsc::unbounded_channel();
        self.next_id += 1;
        let id = self.next_id;
        self.senders.insert(id, tx);
        AccountsSubscription { id, receiver }
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        self.senders.remove(&id).is_some()
    }

    pub fn emit(&self, accounts: &[Address]) {
        if self.is_empty() {
            tracing::debug!(accounts = accounts.len(), "account change with no listener");
            return;
        }
        for tx in self.senders.values() {
            let _ = tx.send(accounts.to_vec());
        }
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
