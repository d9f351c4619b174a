mod common;

use std::sync::Arc;

use common::{block, eventually, harness, settle, validator, MockChain};
use valwatch_core::notify::Broadcaster;
use valwatch_core::{
    ReportingScheduler, Store, Subscriptions, SubscriptionStore, TrackerConfig, WatchError,
};

fn subscriptions(h: &common::Harness, track_all: bool) -> Subscriptions {
    Subscriptions::new(h.engine.registry(), h.store.clone() as Arc<dyn Store>, track_all)
}

#[tokio::test]
async fn subscribe_is_idempotent_per_target() {
    let v = validator(1, "Alpha");
    let chain = MockChain::new();
    chain.add(&v);
    let h = harness(chain, TrackerConfig::default());
    let subs = subscriptions(&h, false);

    subs.subscribe(&v.operator, "chat-1").await.unwrap();
    subs.subscribe(&v.operator, "chat-1").await.unwrap();
    let sub = subs.subscribe(&v.operator, "chat-2").await.unwrap();
    assert_eq!(sub.subscribers.len(), 2);

    let stored = h.store.find_subscription(&v.operator).await.unwrap().unwrap();
    let targets: Vec<&str> = stored.subscribers.iter().map(|s| s.target.as_str()).collect();
    assert_eq!(targets, vec!["chat-1", "chat-2"]);
    assert_eq!(subs.subscriptions_of("chat-2").await.unwrap(), vec![v.operator.clone()]);
}

#[tokio::test]
async fn subscribe_rejects_bad_input() {
    let v = validator(1, "Alpha");
    let chain = MockChain::new();
    chain.add(&v);
    chain.set_jailed(&v.operator, true);
    let h = harness(chain, TrackerConfig::default());
    let subs = subscriptions(&h, false);

    let err = subs.subscribe("cosmos1notanoperator", "chat-1").await.unwrap_err();
    assert!(matches!(err, WatchError::InvalidAddress(_)));

    let err = subs.subscribe(&v.operator, "chat-1").await.unwrap_err();
    assert!(matches!(err, WatchError::Rejected(_)), "got {err:?}");
    assert!(h.store.find_subscription(&v.operator).await.unwrap().is_none());
}

#[tokio::test]
async fn last_unsubscribe_deletes_record() {
    let v = validator(1, "Alpha");
    let chain = MockChain::new();
    chain.add(&v);
    let h = harness(chain, TrackerConfig::default());
    let subs = subscriptions(&h, false);

    subs.subscribe(&v.operator, "chat-1").await.unwrap();
    subs.subscribe(&v.operator, "chat-2").await.unwrap();
    subs.unsubscribe(&v.operator, "chat-1").await.unwrap();
    assert!(h.store.find_subscription(&v.operator).await.unwrap().is_some());

    subs.unsubscribe(&v.operator, "chat-2").await.unwrap();
    assert!(h.store.find_subscription(&v.operator).await.unwrap().is_none());

    let err = subs.unsubscribe(&v.operator, "chat-2").await.unwrap_err();
    assert!(matches!(err, WatchError::NotFound(_)));
}

#[tokio::test]
async fn unsubscribe_keeps_record_when_tracking_all() {
    let v = validator(1, "Alpha");
    let chain = MockChain::new();
    chain.add(&v);
    let h = harness(chain, TrackerConfig::default());
    let subs = subscriptions(&h, true);

    subs.subscribe(&v.operator, "chat-1").await.unwrap();
    subs.unsubscribe(&v.operator, "chat-1").await.unwrap();
    let sub = h.store.find_subscription(&v.operator).await.unwrap().unwrap();
    assert!(sub.subscribers.is_empty());
}

// ─── Reports ──────────────────────────────────────────────────────────────────

fn scheduler(h: &common::Harness, interval: u64) -> ReportingScheduler {
    ReportingScheduler::new(
        interval,
        h.chain.clone(),
        h.store.clone() as Arc<dyn Store>,
        Broadcaster::new(h.notifier.clone()),
    )
}

#[tokio::test]
async fn report_compares_interval_snapshots() {
    let v = validator(1, "Alpha");
    let chain = MockChain::new();
    chain.add(&v);
    let mut later = v.info.clone();
    later.commission.rate = 0.07;
    later.tokens = 1_500_000_000;
    chain
        .at_height
        .lock()
        .unwrap()
        .insert((v.operator.clone(), 20_000), later);
    let h = harness(chain, TrackerConfig::default());
    subscriptions(&h, false).subscribe(&v.operator, "chat-1").await.unwrap();

    let sent = scheduler(&h, 10_000).run(20_000).await.unwrap();
    assert_eq!(sent, 1);
    assert!(eventually(|| h.notifier.count_containing("Report for Alpha") == 1).await);

    let (_, text) = h.notifier.messages().remove(0);
    assert!(text.contains("blocks 10000..20000"), "{text}");
    assert!(text.contains("Commission rate: 5.00% → 7.00% (+2.00)"), "{text}");
    assert!(text.contains("Total tokens: 1000.00 → 1500.00 (+500.00)"), "{text}");
    assert!(text.contains("Voting power: 10.00% → 15.00% (+5.00)"), "{text}");
}

#[tokio::test]
async fn failing_validator_does_not_abort_report_pass() {
    let good = validator(1, "Alpha");
    let bad = validator(2, "Beta");
    let chain = MockChain::new();
    chain.add(&good);
    chain.add(&bad);
    let h = harness(chain, TrackerConfig::default());
    let subs = subscriptions(&h, false);
    subs.subscribe(&good.operator, "chat-1").await.unwrap();
    subs.subscribe(&bad.operator, "chat-1").await.unwrap();
    h.chain.fail(&bad.operator);

    let sent = scheduler(&h, 100).run(300).await.unwrap();
    assert_eq!(sent, 1);
    assert!(eventually(|| h.notifier.count_containing("Report for") == 1).await);
    assert_eq!(h.notifier.count_containing("Report for Alpha"), 1);
}

#[tokio::test]
async fn engine_triggers_reports_on_interval_crossing() {
    let v = validator(1, "Alpha");
    let chain = MockChain::new();
    chain.add(&v);
    let h = harness(
        chain,
        TrackerConfig {
            report_interval: 10,
            ..Default::default()
        },
    );
    subscriptions(&h, false).subscribe(&v.operator, "chat-1").await.unwrap();

    for height in 5..10 {
        h.engine.handle_block(block(height, &[&v.hex])).await;
    }
    settle().await;
    assert_eq!(h.notifier.count_containing("Report for"), 0);

    for height in 10..=12 {
        h.engine.handle_block(block(height, &[&v.hex])).await;
    }
    assert!(eventually(|| h.notifier.count_containing("Report for Alpha") == 1).await);
    settle().await;
    assert_eq!(h.notifier.count_containing("Report for"), 1);
}
