use crate::support::{
    TestContext,
    alice,
    bob,
};
use freight_market::{
    session::SessionState,
    watcher::WalletChangeWatcher,
};

#[tokio::test]
async fn watcher__follows_account_switch_then_revocation() {
    // given
    let ctx = TestContext::new();
    let watcher = WalletChangeWatcher::subscribe(ctx.store()).unwrap();
    let mut rx = ctx.store().subscribe();
    ctx.view().connect().await.unwrap();

    // when
    let switched = ctx.view().switch_account().await.unwrap();
    rx.wait_for(|snapshot| snapshot.state == SessionState::Connected(bob()))
        .await
        .unwrap();

    // then
    assert_eq!(switched, Some(bob()));
    assert_ne!(ctx.store().state(), SessionState::Connected(alice()));

    // when
    ctx.wallet().set_authorized(Vec::new());
    rx.wait_for(|snapshot| snapshot.state == SessionState::Disconnected)
        .await
        .unwrap();

    // then
    assert_eq!(ctx.store().snapshot().position, None);
    watcher.shutdown().await;
}

#[tokio::test]
async fn watcher__teardown_leaves_no_listeners() {
    // given
    let ctx = TestContext::new();
    let first = WalletChangeWatcher::subscribe(ctx.store()).unwrap();
    let second = WalletChangeWatcher::subscribe(ctx.store()).unwrap();
    assert_eq!(ctx.wallet().listener_count(), 2);

    // when
    first.shutdown().await;
    drop(second);

    // then
    assert_eq!(ctx.wallet().listener_count(), 0);
}

#[tokio::test]
async fn watcher__authorization_from_wallet_connects_session() {
    // given
    let ctx = TestContext::new();
    let watcher = WalletChangeWatcher::subscribe(ctx.store()).unwrap();
    let mut rx = ctx.store().subscribe();

    // when
    ctx.wallet().set_authorized(vec![bob()]);
    rx.wait_for(|snapshot| snapshot.position.is_some())
        .await
        .unwrap();

    // then
    assert_eq!(ctx.store().state(), SessionState::Connected(bob()));
    assert_eq!(ctx.wallet().request_calls(), 0);
    watcher.shutdown().await;
}
