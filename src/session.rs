//! Process-wide wallet session and market mirror.
//!
//! [`SessionStore`] is the only writer of the shared [`SessionSnapshot`];
//! everything else observes it through a `watch` receiver. Every observable
//! change bumps `version` exactly once, and a refresh that finds nothing new
//! publishes nothing.

use crate::{
    backend::{
        MarketContract,
        WalletExtension,
    },
    chain::ChainClient,
    error::{
        ClientError,
        ClientResult,
        Precondition,
    },
    market::{
        Address,
        MarketStats,
        UserPosition,
    },
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{
        oneshot,
        watch,
    },
    task::JoinHandle,
    time::{
        self,
        Instant,
        MissedTickBehavior,
    },
};
use tracing::{
    debug,
    info,
    warn,
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SessionState {
    #[default]
    Disconnected,
    /// A `connect()` call is in flight.
    Connecting,
    Connected(Address),
}

impl SessionState {
    pub fn account(&self) -> Option<Address> {
        match self {
            SessionState::Connected(account) => Some(*account),
            _ => None,
        }
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, SessionState::Connecting)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected(_))
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionSnapshot {
    pub version: u64,
    pub state: SessionState,
    /// Last successfully read market figures; kept across failed reads.
    pub market: Option<MarketStats>,
    /// Position of the connected account. `None` while disconnected.
    pub position: Option<UserPosition>,
}

/// What one `refresh()` did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RefreshReport {
    pub stats_error: Option<ClientError>,
    pub position_error: Option<ClientError>,
    /// A position read finished after the account changed and was dropped.
    pub stale_position: bool,
    pub changed: bool,
}

pub struct SessionStore<W, C> {
    client: Arc<ChainClient<W, C>>,
    tx: watch::Sender<SessionSnapshot>,
}

impl<W, C> SessionStore<W, C>
where
    W: WalletExtension,
    C: MarketContract,
{
    pub fn new(client: Arc<ChainClient<W, C>>) -> Self {
        let (tx, _) = watch::channel(SessionSnapshot::default());
        Self { client, tx }
    }

    pub fn client(&self) -> &Arc<ChainClient<W, C>> {
        &self.client
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.tx.borrow().state
    }

    /// Applies `change`; publishes and bumps the version only when it reports
    /// a modification.
    fn modify(&self, change: impl FnOnce(&mut SessionSnapshot) -> bool) -> bool {
        self.tx.send_if_modified(|snapshot| {
            let changed = change(snapshot);
            if changed {
                snapshot.version += 1;
            }
            changed
        })
    }

    /// Adopts an account authorized in an earlier session without prompting.
    pub async fn probe_existing_account(&self) -> Option<Address> {
        let account = self.client.current_account().await?;
        let entered = self.modify(|snapshot| {
            if snapshot.state != SessionState::Disconnected {
                return false;
            }
            snapshot.state = SessionState::Connected(account);
            snapshot.position = None;
            true
        });
        if !entered {
            return None;
        }
        info!(%account, "resumed previously authorized account");
        self.refresh().await;
        Some(account)
    }

    /// Runs the interactive connect flow. `Connecting` is held only while the
    /// wallet call is in flight, including when this future is dropped.
    pub async fn connect(&self) -> ClientResult<Address> {
        let mut rejection = None;
        self.modify(|snapshot| match snapshot.state {
            SessionState::Disconnected => {
                snapshot.state = SessionState::Connecting;
                true
            }
            SessionState::Connecting => {
                rejection = Some(Precondition::ConnectInFlight);
                false
            }
            SessionState::Connected(_) => {
                rejection = Some(Precondition::AlreadyConnected);
                false
            }
        });
        if let Some(precondition) = rejection {
            return Err(precondition.into());
        }

        let guard = ConnectingGuard { store: self };
        let account = match self.client.connect().await {
            Ok(account) => account,
            Err(err) => {
                warn!(%err, "wallet connection failed");
                drop(guard);
                return Err(err);
            }
        };
        self.modify(|snapshot| {
            snapshot.state = SessionState::Connected(account);
            if snapshot.position.as_ref().map(|p| p.account) != Some(account) {
                snapshot.position = None;
            }
            true
        });
        drop(guard);

        self.refresh().await;
        Ok(account)
    }

    /// Drops the local session and asks the wallet to revoke access. Market
    /// figures are kept.
    pub async fn disconnect(&self) -> ClientResult<()> {
        let mut rejection = None;
        let left = self.modify(|snapshot| match snapshot.state {
            SessionState::Connected(_) => {
                snapshot.state = SessionState::Disconnected;
                snapshot.position = None;
                true
            }
            SessionState::Connecting => {
                rejection = Some(Precondition::ConnectInFlight);
                false
            }
            SessionState::Disconnected => false,
        });
        if let Some(precondition) = rejection {
            return Err(precondition.into());
        }
        if !left {
            return Ok(());
        }
        info!("wallet disconnected");
        if let Err(err) = self.client.revoke().await {
            warn!(%err, "wallet did not acknowledge revocation");
        }
        Ok(())
    }

    /// Feeds an account-change notification into the state machine.
    pub async fn handle_accounts_changed(&self, accounts: Vec<Address>) {
        let next = accounts.first().copied();
        let mut refresh = false;
        self.modify(|snapshot| match (snapshot.state, next) {
            (SessionState::Connecting, _) => {
                debug!(?next, "account change ignored while connecting");
                false
            }
            (SessionState::Disconnected, None) => false,
            (SessionState::Disconnected, Some(account)) => {
                info!(%account, "account authorized from the wallet");
                snapshot.state = SessionState::Connected(account);
                snapshot.position = None;
                refresh = true;
                true
            }
            (SessionState::Connected(_), None) => {
                info!("wallet reported no accounts; disconnecting");
                snapshot.state = SessionState::Disconnected;
                snapshot.position = None;
                true
            }
            (SessionState::Connected(current), Some(account)) if current == account => false,
            (SessionState::Connected(_), Some(account)) => {
                info!(%account, "active account changed");
                snapshot.state = SessionState::Connected(account);
                snapshot.position = None;
                refresh = true;
                true
            }
        });
        if refresh {
            self.refresh().await;
        }
    }

    /// Reads market stats, and the position too when connected, then applies
    /// both in one publish. A failed read keeps the previous value.
    pub async fn refresh(&self) -> RefreshReport {
        let account = self.state().account();
        let (stats, position) = tokio::join!(self.client.read_market_stats(), async {
            match account {
                Some(account) => Some(self.client.read_user_position(account).await),
                None => None,
            }
        });

        let mut stale_position = false;
        let changed = self.modify(|snapshot| {
            let mut changed = false;
            if let Ok(stats) = &stats
                && snapshot.market.as_ref() != Some(stats)
            {
                snapshot.market = Some(stats.clone());
                changed = true;
            }
            if let Some(Ok(position)) = &position {
                if snapshot.state.account() != Some(position.account) {
                    stale_position = true;
                } else if snapshot.position.as_ref() != Some(position) {
                    snapshot.position = Some(position.clone());
                    changed = true;
                }
            }
            changed
        });

        let stats_error = stats.err();
        if let Some(err) = &stats_error {
            warn!(%err, "market stats refresh failed; keeping last known figures");
        }
        let position_error = position.and_then(Result::err);
        if let Some(err) = &position_error {
            warn!(%err, "position refresh failed; keeping last known position");
        }
        if stale_position {
            debug!("discarded position read for a previous account");
        }
        RefreshReport {
            stats_error,
            position_error,
            stale_position,
            changed,
        }
    }

    /// Starts the periodic refresh. The timer only runs while an account is
    /// connected and restarts from zero on each new connection.
    pub fn spawn_poller(self: &Arc<Self>, interval: Duration) -> PollerHandle {
        let store = Arc::clone(self);
        let mut rx = self.subscribe();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            loop {
                let connected = tokio::select! {
                    _ = &mut shutdown_rx => break,
                    res = rx.wait_for(|snapshot| snapshot.state.is_connected()) => res.is_ok(),
                };
                if !connected {
                    break;
                }
                let mut ticker = time::interval_at(Instant::now() + interval, interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = &mut shutdown_rx => return,
                        _ = ticker.tick() => {
                            if !store.state().is_connected() {
                                debug!("poller idle until an account connects");
                                break;
                            }
                            store.refresh().await;
                        }
                    }
                }
            }
        });
        PollerHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Reverts `Connecting` to `Disconnected` unless the connect flow moved on.
struct ConnectingGuard<'a, W, C>
where
    W: WalletExtension,
    C: MarketContract,
{
    store: &'a SessionStore<W, C>,
}

impl<W, C> Drop for ConnectingGuard<'_, W, C>
where
    W: WalletExtension,
    C: MarketContract,
{
    fn drop(&mut self) {
        self.store.modify(|snapshot| {
            if snapshot.state.is_connecting() {
                snapshot.state = SessionState::Disconnected;
                true
            } else {
                false
            }
        });
    }
}

/// Owns the poller task. Dropping it aborts the task.
pub struct PollerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Stops the timer and waits for an in-flight refresh to finish.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            warn!(%err, "poller task ended abnormally");
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
