use crate::support::{
    TestContext,
    UNIT,
    alice,
    dec,
};
use freight_market::{
    backend::simulated::SimulatedMarket,
    error::{
        ClientError,
        ErrorKind,
        Precondition,
    },
    market::Side,
    view::NotificationLevel,
};
use std::time::Duration;

#[tokio::test]
async fn submit_bet__without_account_fails_before_reaching_chain() {
    // given
    let ctx = TestContext::new();
    let view = ctx.view();
    view.select_side(Side::Yes);
    view.set_stake(dec("0.05"));

    // when
    let err = view.submit_bet().await.unwrap_err();

    // then
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    assert_eq!(ctx.market().counts().bets, 0);
    let intent = view.intent().unwrap();
    assert_eq!(intent.side, Side::Yes);
    assert_eq!(intent.stake, dec("0.05"));
}

#[tokio::test]
async fn submit_bet__refreshes_exactly_once_after_success() {
    // given
    let ctx = TestContext::with_market(SimulatedMarket::with_volumes(UNIT, UNIT));
    let view = ctx.view();
    view.connect().await.unwrap();
    view.select_side(Side::No);
    view.set_stake(dec("0.02"));
    let before = ctx.market().counts();

    // when
    let receipt = view.submit_bet().await.unwrap();

    // then
    let after = ctx.market().counts();
    assert_eq!(receipt.base_units, 20_000_000);
    assert_eq!(after.bets, before.bets + 1);
    assert_eq!(after.stats_reads, before.stats_reads + 1);
    assert_eq!(after.position_reads, before.position_reads + 1);
    let position = ctx.store().snapshot().position.unwrap();
    assert_eq!(position.no_stake, dec("0.02"));
    assert_eq!(view.intent(), None);
    assert_eq!(
        view.latest_notification().map(|n| n.level),
        Some(NotificationLevel::Success)
    );
}

#[tokio::test]
async fn submit_bet__refreshes_once_even_when_refresh_fails() {
    // given
    let ctx = TestContext::new();
    let view = ctx.view();
    view.connect().await.unwrap();
    view.select_side(Side::No);
    view.set_stake(dec("0.02"));
    ctx.market().set_fail_stats(true);
    ctx.market().set_fail_positions(true);
    let before = ctx.market().counts();

    // when
    let res = view.submit_bet().await;

    // then
    assert!(res.is_ok());
    let after = ctx.market().counts();
    assert_eq!(after.stats_reads, before.stats_reads + 1);
    assert_eq!(after.position_reads, before.position_reads + 1);
}

#[tokio::test]
async fn submit_bet__insufficient_funds_consumes_draft() {
    // given
    let ctx = TestContext::new();
    let view = ctx.view();
    view.connect().await.unwrap();
    view.select_side(Side::Yes);
    view.set_stake(dec("25"));

    // when
    let err = view.submit_bet().await.unwrap_err();

    // then
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    assert_eq!(view.intent(), None);
    assert_eq!(ctx.market().balance(&alice()), 10 * UNIT);
    assert_eq!(
        view.latest_notification().map(|n| n.level),
        Some(NotificationLevel::Error)
    );
}

#[tokio::test]
async fn submit_bet__too_precise_stake_is_refused_locally() {
    // given
    let ctx = TestContext::new();
    let view = ctx.view();
    view.connect().await.unwrap();
    view.select_side(Side::Yes);
    view.set_stake(dec("0.0000000001"));

    // when
    let err = view.submit_bet().await.unwrap_err();

    // then
    assert!(matches!(
        err,
        ClientError::PreconditionFailed(Precondition::StakeTooPrecise { .. })
    ));
    assert_eq!(ctx.market().counts().bets, 0);
    assert!(view.intent().is_some());
}

#[tokio::test(start_paused = true)]
async fn submit_bet__second_submit_while_in_flight_is_rejected() {
    // given
    let ctx = TestContext::new();
    let view = ctx.view();
    view.connect().await.unwrap();
    view.select_side(Side::Yes);
    view.set_stake(dec("0.5"));
    ctx.market().set_submit_delay(Some(Duration::from_secs(5)));
    let first = tokio::spawn({
        let view = view.clone();
        async move { view.submit_bet().await }
    });
    while !view.display().submitting {
        tokio::task::yield_now().await;
    }

    // when
    let second = view.submit_bet().await;

    // then
    assert!(matches!(
        second,
        Err(ClientError::PreconditionFailed(
            Precondition::SubmissionInFlight
        ))
    ));
    assert!(first.await.unwrap().is_ok());
    assert_eq!(ctx.market().counts().bets, 1);
    assert!(!view.display().submitting);
}

#[tokio::test]
async fn claim_reward__pays_out_after_resolution() {
    // given
    let ctx = TestContext::new();
    let view = ctx.view();
    view.connect().await.unwrap();
    view.select_side(Side::Yes);
    view.set_stake(dec("1"));
    view.submit_bet().await.unwrap();
    assert_eq!(ctx.market().balance(&alice()), 9 * UNIT);
    ctx.market().resolve(Side::Yes);

    // when
    let claimed = view.claim_reward().await.unwrap();

    // then
    assert!(claimed);
    assert_eq!(ctx.market().balance(&alice()), 10 * UNIT);
    let again = view.claim_reward().await.unwrap_err();
    assert_eq!(again.kind(), ErrorKind::TransactionReverted);
}

#[tokio::test]
async fn display__cold_start_prices_before_first_read() {
    let ctx = TestContext::new();
    let display = ctx.view().display();
    assert!(!display.has_market_data);
    assert_eq!(display.yes_price, dec("0.68"));
    assert_eq!(display.no_price, dec("0.32"));
    assert_eq!(display.probability, "68%");
}

#[tokio::test]
async fn potential_profit__follows_selected_side_price() {
    // given
    let ctx = TestContext::with_market(SimulatedMarket::with_volumes(3 * UNIT, UNIT));
    let view = ctx.view();
    view.refresh().await;

    // when
    view.select_side(Side::No);
    view.set_stake(dec("1"));

    // then
    // NO trades at 0.25, so one unit returns four
    assert_eq!(view.potential_profit().unwrap(), dec("3"));
}
