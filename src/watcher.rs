use crate::{
    backend::{
        ListenerId,
        MarketContract,
        WalletExtension,
    },
    session::SessionStore,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{
    debug,
    info,
    warn,
};

/// Forwards the wallet's account-change notifications into the session.
pub struct WalletChangeWatcher;

impl WalletChangeWatcher {
    /// Registers one listener and spawns the forwarding task. Returns `None`
    /// when there is no extension to listen to.
    pub fn subscribe<W, C>(store: Arc<SessionStore<W, C>>) -> Option<WatcherHandle<W>>
    where
        W: WalletExtension,
        C: MarketContract,
    {
        let extension = store.client().extension()?.clone();
        let subscription = match extension.on_accounts_changed() {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!(%err, "cannot watch wallet account changes");
                return None;
            }
        };
        let listener = subscription.id;
        let mut receiver = subscription.receiver;
        info!(listener, "watching wallet account changes");

        let task = tokio::spawn(async move {
            while let Some(accounts) = receiver.recv().await {
                debug!(count = accounts.len(), "wallet accounts changed");
                store.handle_accounts_changed(accounts).await;
            }
            debug!("account change stream closed");
        });

        Some(WatcherHandle {
            extension,
            listener: Some(listener),
            task: Some(task),
        })
    }
}

/// Owns the wallet listener. The listener is removed exactly once, by
/// [`WatcherHandle::shutdown`] or on drop.
pub struct WatcherHandle<W>
where
    W: WalletExtension,
{
    extension: Arc<W>,
    listener: Option<ListenerId>,
    task: Option<JoinHandle<()>>,
}

impl<W> WatcherHandle<W>
where
    W: WalletExtension,
{
    pub fn listener(&self) -> Option<ListenerId> {
        self.listener
    }

    /// Removes the listener, then waits for the forwarding task to drain.
    pub async fn shutdown(mut self) {
        self.release();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            warn!(%err, "account watcher ended abnormally");
        }
    }

    fn release(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        if self.extension.remove_listener(listener) {
            debug!(listener, "wallet listener removed");
        } else {
            warn!(listener, "wallet listener was already gone");
        }
    }
}

impl<W> Drop for WatcherHandle<W>
where
    W: WalletExtension,
{
    fn drop(&mut self) {
        self.release();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        backend::simulated::{
            SimulatedMarket,
            SimulatedWallet,
        },
        chain::ChainClient,
        config::MarketConfig,
        market::Address,
        session::SessionState,
    };

    fn account(n: u8) -> Address {
        Address::new([n; 32])
    }

    fn setup(
        wallet: Option<SimulatedWallet>,
    ) -> (
        Arc<SessionStore<SimulatedWallet, SimulatedMarket>>,
        Option<Arc<SimulatedWallet>>,
    ) {
        let wallet = wallet.map(Arc::new);
        let client = ChainClient::new(
            wallet.clone(),
            Arc::new(SimulatedMarket::new()),
            &MarketConfig::default(),
        );
        (Arc::new(SessionStore::new(Arc::new(client))), wallet)
    }

    #[tokio::test]
    async fn subscribe__without_extension_is_none() {
        let (store, _) = setup(None);
        assert!(WalletChangeWatcher::subscribe(store).is_none());
    }

    #[tokio::test]
    async fn shutdown__leaves_no_listener() {
        // given
        let (store, wallet) = setup(Some(SimulatedWallet::new(vec![account(1)], 0)));
        let wallet = wallet.unwrap();
        let handle = WalletChangeWatcher::subscribe(store).unwrap();
        assert_eq!(wallet.listener_count(), 1);

        // when
        handle.shutdown().await;

        // then
        assert_eq!(wallet.listener_count(), 0);
    }

    #[tokio::test]
    async fn drop__removes_listener_once() {
        // given
        let (store, wallet) = setup(Some(SimulatedWallet::new(vec![account(1)], 0)));
        let wallet = wallet.unwrap();
        let first = WalletChangeWatcher::subscribe(store.clone()).unwrap();
        let second = WalletChangeWatcher::subscribe(store).unwrap();
        let first_id = first.listener().unwrap();

        // when
        drop(first);

        // then
        assert_eq!(wallet.listener_count(), 1);
        assert!(!wallet.remove_listener(first_id));
        second.shutdown().await;
        assert_eq!(wallet.listener_count(), 0);
    }

    #[tokio::test]
    async fn notification__reaches_session() {
        // given
        let (store, wallet) = setup(Some(SimulatedWallet::new(vec![account(1)], 0)));
        let wallet = wallet.unwrap();
        let mut rx = store.subscribe();
        let handle = WalletChangeWatcher::subscribe(store.clone()).unwrap();

        // when
        wallet.set_authorized(vec![account(1)]);
        rx.wait_for(|snapshot| snapshot.state.is_connected())
            .await
            .unwrap();

        // then
        assert_eq!(store.state(), SessionState::Connected(account(1)));
        handle.shutdown().await;
    }
}
