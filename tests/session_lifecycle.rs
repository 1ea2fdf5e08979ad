use fellowship_relay::services::{
    coordinator::{CoordinatorConfig, FellowshipError, FellowshipHandle},
    metrics::Metrics,
};
use std::sync::atomic::Ordering;
use tokio::time::{sleep, timeout, Duration, Instant};

fn spawn_with(metrics: Metrics) -> FellowshipHandle {
    FellowshipHandle::spawn(
        CoordinatorConfig {
            session_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(10),
        },
        metrics,
    )
}

#[tokio::test(start_paused = true)]
async fn idle_member_expires_and_its_parked_fetch_is_told_so() {
    let metrics = Metrics::new();
    let fellowship = spawn_with(metrics.clone());
    let alice = fellowship.fetch("g", "alice", "").await.unwrap().session;

    let started = Instant::now();
    let result = fellowship.fetch("g", "alice", alice.clone()).await;

    match result {
        Err(FellowshipError::Expired { session }) => assert_eq!(session, alice),
        other => panic!("expected expiry, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_secs(60));

    let stats = fellowship.stats().await.unwrap();
    assert_eq!(stats.members, 0);
    assert_eq!(stats.groups, 0);
    assert_eq!(metrics.sessions_expired.load(Ordering::Relaxed), 1);

    // The old token now names nothing: delivers are dropped, fetches start over.
    fellowship.deliver("g", "bob", alice.clone(), "late").unwrap();
    let rejoined = fellowship.fetch("g", "alice", alice.clone()).await.unwrap();
    assert_ne!(rejoined.session, alice);
    assert!(rejoined.messages.is_empty());
    assert_eq!(metrics.stale_deliveries.load(Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn polling_member_is_kept_alive() {
    let fellowship = spawn_with(Metrics::new());
    let alice = fellowship.fetch("g", "alice", "").await.unwrap().session;

    for _ in 0..5 {
        let poll = timeout(
            Duration::from_secs(30),
            fellowship.fetch("g", "alice", alice.clone()),
        )
        .await;
        assert!(poll.is_err(), "nothing to report, poll times out");
    }

    let stats = fellowship.stats().await.unwrap();
    assert_eq!(stats.members, 1);
    assert_eq!(stats.pending_fetches, 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_fetch_keeps_joins_for_the_next_one() {
    let metrics = Metrics::new();
    let fellowship = spawn_with(metrics.clone());
    let alice = fellowship.fetch("g", "alice", "").await.unwrap().session;
    sleep(Duration::from_millis(500)).await;
    let carol = fellowship.fetch("g", "carol", "").await.unwrap().session;
    sleep(Duration::from_millis(500)).await;

    let parked = fellowship.begin_fetch("g", "alice", alice.clone()).unwrap();
    sleep(Duration::from_secs(1)).await;
    drop(parked);

    fellowship.deliver("g", carol.clone(), alice.clone(), "hey").unwrap();
    let update = fellowship.fetch("g", "alice", alice).await.unwrap();

    assert_eq!(update.members, vec![carol.clone()]);
    assert_eq!(update.messages[&carol], vec!["hey"]);
    assert_eq!(metrics.cancelled_fetches.load(Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn fetch_dropped_before_its_wake_keeps_joins_for_the_next_one() {
    let fellowship = spawn_with(Metrics::new());
    let alice = fellowship.fetch("g", "alice", "").await.unwrap().session;
    sleep(Duration::from_millis(500)).await;
    let carol = fellowship.fetch("g", "carol", "").await.unwrap().session;
    sleep(Duration::from_millis(500)).await;

    let parked = fellowship.begin_fetch("g", "alice", alice.clone()).unwrap();
    sleep(Duration::from_secs(1)).await;
    // The deliver is queued ahead of the cancel, so the coordinator finds the
    // waiter already abandoned when it tries to wake it.
    fellowship.deliver("g", carol.clone(), alice.clone(), "hey").unwrap();
    drop(parked);

    let update = fellowship.fetch("g", "alice", alice).await.unwrap();
    assert_eq!(update.members, vec![carol.clone()]);
    assert_eq!(update.messages[&carol], vec!["hey"]);
}

#[tokio::test(start_paused = true)]
async fn update_missed_by_a_timed_out_poll_is_delivered_next_time() {
    let fellowship = spawn_with(Metrics::new());
    let alice = fellowship.fetch("g", "alice", "").await.unwrap().session;
    sleep(Duration::from_millis(500)).await;
    let carol = fellowship.fetch("g", "carol", "").await.unwrap().session;
    sleep(Duration::from_millis(500)).await;

    let parked = fellowship.begin_fetch("g", "alice", alice.clone()).unwrap();
    fellowship.deliver("g", carol.clone(), alice.clone(), "hey").unwrap();
    fellowship.stats().await.unwrap();
    drop(parked);

    let update = fellowship.fetch("g", "alice", alice).await.unwrap();
    assert_eq!(update.members, vec![carol.clone()]);
    assert_eq!(update.messages[&carol], vec!["hey"]);
}

#[tokio::test]
async fn cancelling_one_waiter_keeps_the_others_in_order() {
    let fellowship = spawn_with(Metrics::new());
    let alice = fellowship.fetch("g", "alice", "").await.unwrap().session;

    let first = fellowship.begin_fetch("g", "alice", alice.clone()).unwrap();
    let second = fellowship.begin_fetch("g", "alice", alice.clone()).unwrap();
    let third = fellowship.begin_fetch("g", "alice", alice.clone()).unwrap();
    drop(second);

    fellowship.deliver("g", "bob", alice.clone(), "a").unwrap();
    fellowship.deliver("g", "bob", alice.clone(), "b").unwrap();

    assert_eq!(first.wait().await.unwrap().messages["bob"], vec!["a"]);
    assert_eq!(third.wait().await.unwrap().messages["bob"], vec!["b"]);
    assert_eq!(fellowship.stats().await.unwrap().pending_fetches, 0);
}

#[tokio::test]
async fn shutdown_finishes_queued_work_first() {
    let fellowship = spawn_with(Metrics::new());
    let alice = fellowship.fetch("g", "alice", "").await.unwrap().session;

    fellowship.deliver("g", "bob", alice.clone(), "before").unwrap();
    let queued = fellowship.begin_fetch("g", "alice", alice.clone()).unwrap();
    fellowship.shutdown().await;

    let update = queued.wait().await.expect("queued before shutdown");
    assert_eq!(update.messages["bob"], vec!["before"]);

    assert!(matches!(
        fellowship.stats().await,
        Err(FellowshipError::ShutdownInProgress)
    ));
    // A second shutdown is harmless.
    fellowship.shutdown().await;
}
