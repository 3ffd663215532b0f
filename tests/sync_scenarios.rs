//! Multi-instance sync scenarios over the in-process transport.
//!
//! Every cache here shares one [`MemoryTransport`] bus, so no backend is
//! needed. Pub/sub keeps no history: tests wait for subscriptions to be in
//! place (via `subscriber_count`) before writing what a peer must see.
//!
//! Run with: `cargo test --test sync_scenarios`

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use telemetry_cache::notification::{codec, Path, TypedValue, Update};
use telemetry_cache::{
    Cache, CacheConfig, InMemoryCache, MemoryTransport, Notification, ReadMode, ReadOptions, SubscribeResponse,
    SyncState, CONTROL_CHANNEL,
};

// =============================================================================
// Helpers
// =============================================================================

fn config() -> CacheConfig {
    CacheConfig {
        write_timeout_ms: 1_000,
        ..Default::default()
    }
}

fn cache_on(bus: &MemoryTransport, config: CacheConfig) -> Cache {
    Cache::with_transport(config, Arc::new(InMemoryCache::new()), Arc::new(bus.peer()))
}

fn update(target: &str, path: &str, value: i64) -> SubscribeResponse {
    SubscribeResponse::update(Notification {
        timestamp: value,
        prefix: Some(Path::with_target(target)),
        update: vec![Update::new(path.parse().unwrap(), TypedValue::IntVal(value))],
        ..Default::default()
    })
}

async fn eventually<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        sleep(Duration::from_millis(10)).await;
    }
}

/// Latest value cached for `subscription` / `target`, if any.
async fn cached_value(cache: &Cache, subscription: &str, target: &str) -> Option<TypedValue> {
    let snapshot = cache.read().await.unwrap();
    snapshot
        .get(subscription)?
        .iter()
        .find(|n| n.target() == Some(target))?
        .update
        .first()?
        .val
        .clone()
}

async fn wait_for_value(cache: &Cache, subscription: &str, target: &str, expected: TypedValue) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if cached_value(cache, subscription, target).await.as_ref() == Some(&expected) {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {}/{} = {:?}",
            subscription,
            target,
            expected
        );
        sleep(Duration::from_millis(10)).await;
    }
}

// =============================================================================
// Write-through path
// =============================================================================

#[tokio::test]
async fn write_publishes_on_subscription_target_channel() {
    let bus = MemoryTransport::new();
    let cache = cache_on(&bus, config());
    let ctx = CancellationToken::new();

    cache.write(&ctx, "sub1", &update("router1", "interface/description", 1)).await;

    assert_eq!(cached_value(&cache, "sub1", "router1").await, Some(TypedValue::IntVal(1)));

    let control = bus.published_on(CONTROL_CHANNEL);
    assert_eq!(control.len(), 1);
    assert_eq!(control[0].payload, b"sub1");
    assert_eq!(bus.published_on("sub1.router1").len(), 1);

    cache.stop().await;
}

#[tokio::test]
async fn interface_description_scenario() {
    let bus = MemoryTransport::new();
    let cache = cache_on(&bus, config());
    let ctx = CancellationToken::new();

    let notification = Notification {
        timestamp: 1_700_000_000_000_000_000,
        prefix: Some(Path::with_target("router1")),
        update: vec![Update::new(
            "interface[name=ethernet-1/1]/description".parse().unwrap(),
            TypedValue::AsciiVal("interface_description".into()),
        )],
        ..Default::default()
    };
    let response = SubscribeResponse::update(notification.clone());
    cache.write(&ctx, "sub1", &response).await;

    let snapshot = cache.read().await.unwrap();
    assert_eq!(snapshot["sub1"], vec![notification]);

    let data = bus.published_on("sub1.router1");
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].payload, codec::encode(&response).unwrap());

    // A second notification for the same subscription is not announced again
    let control_before = bus.published_on(CONTROL_CHANNEL).len();
    cache.write(&ctx, "sub1", &update("router1", "interface[name=ethernet-1/2]/description", 2)).await;
    assert_eq!(bus.published_on(CONTROL_CHANNEL).len(), control_before);

    cache.stop().await;
}

#[tokio::test]
async fn second_write_does_not_reannounce() {
    let bus = MemoryTransport::new();
    let cache = cache_on(&bus, config());
    let ctx = CancellationToken::new();

    cache.write(&ctx, "sub1", &update("router1", "a", 1)).await;
    cache.write(&ctx, "sub1", &update("router2", "a", 2)).await;

    assert_eq!(bus.published_on(CONTROL_CHANNEL).len(), 1);
    assert_eq!(bus.published_on("sub1.router1").len(), 1);
    assert_eq!(bus.published_on("sub1.router2").len(), 1);
    assert_eq!(cache.stats().announced_channels, 1);

    cache.stop().await;
}

#[tokio::test]
async fn missing_target_is_stored_locally_but_not_published() {
    let bus = MemoryTransport::new();
    let cache = cache_on(&bus, config());
    let ctx = CancellationToken::new();

    let response = SubscribeResponse::update(Notification {
        timestamp: 1,
        prefix: None,
        update: vec![Update::new("a/b".parse().unwrap(), TypedValue::BoolVal(true))],
        ..Default::default()
    });
    cache.write(&ctx, "sub1", &response).await;

    assert!(cache.read().await.unwrap().contains_key("sub1"));
    // Announced, but nothing on any data channel
    assert_eq!(bus.published_on(CONTROL_CHANNEL).len(), 1);
    assert_eq!(bus.published().len(), 1);

    cache.stop().await;
}

#[tokio::test]
async fn sync_marker_is_announced_but_not_published() {
    let bus = MemoryTransport::new();
    let cache = cache_on(&bus, config());

    cache
        .write(&CancellationToken::new(), "sub1", &SubscribeResponse::sync_response())
        .await;

    let published = bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].channel, CONTROL_CHANNEL);

    cache.stop().await;
}

#[tokio::test]
async fn cancelled_caller_still_writes_locally() {
    let bus = MemoryTransport::new();
    let cache = cache_on(&bus, config());
    let ctx = CancellationToken::new();
    ctx.cancel();

    cache.write(&ctx, "sub1", &update("router1", "a", 5)).await;

    assert_eq!(cached_value(&cache, "sub1", "router1").await, Some(TypedValue::IntVal(5)));
    assert!(bus.published().is_empty());

    cache.stop().await;
}

#[tokio::test]
async fn concurrent_writers_announce_and_start_once() {
    let bus = MemoryTransport::new();
    let cache = Arc::new(cache_on(&bus, config()));

    let writers: Vec<_> = (0..8)
        .map(|i| {
            let cache = cache.clone();
            tokio::spawn(async move {
                let ctx = CancellationToken::new();
                for j in 0..10 {
                    let target = format!("router{}", i);
                    cache.write(&ctx, "sub1", &update(&target, "a", j)).await;
                }
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }

    assert_eq!(bus.published_on(CONTROL_CHANNEL).len(), 1);
    eventually("channel task", || cache.stats().started_channels == 1).await;
    // Give any duplicate request time to show up
    sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.stats().started_channels, 1);

    cache.stop().await;
}

// =============================================================================
// Convergence between peers
// =============================================================================

#[tokio::test]
async fn two_peers_converge() {
    let bus = MemoryTransport::new();
    let a = cache_on(&bus, config());
    let b = cache_on(&bus, config());
    let ctx = CancellationToken::new();

    // Both discovery loops listen on the control channel
    eventually("control subscriptions", || bus.subscriber_count() == 2).await;

    // First write announces; both peers start consuming sub1
    a.write(&ctx, "sub1", &update("router1", "a", 1)).await;
    eventually("channel tasks", || a.stats().started_channels == 1 && b.stats().started_channels == 1).await;
    eventually("data subscriptions", || bus.subscriber_count() == 4).await;

    a.write(&ctx, "sub1", &update("router1", "a", 2)).await;
    wait_for_value(&b, "sub1", "router1", TypedValue::IntVal(2)).await;

    // And back the other way
    b.write(&ctx, "sub1", &update("router2", "a", 3)).await;
    wait_for_value(&a, "sub1", "router2", TypedValue::IntVal(3)).await;

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn similar_subscription_names_stay_separate() {
    let bus = MemoryTransport::new();
    let a = cache_on(&bus, config());
    let b = cache_on(&bus, config());
    let ctx = CancellationToken::new();

    eventually("control subscriptions", || bus.subscriber_count() == 2).await;
    a.write(&ctx, "sub1", &update("r1", "a", 1)).await;
    a.write(&ctx, "sub10", &update("r1", "a", 10)).await;
    eventually("data subscriptions", || bus.subscriber_count() == 6).await;

    a.write(&ctx, "sub1", &update("r1", "a", 11)).await;
    wait_for_value(&b, "sub1", "r1", TypedValue::IntVal(11)).await;

    a.write(&ctx, "sub10", &update("r1", "a", 100)).await;
    wait_for_value(&b, "sub10", "r1", TypedValue::IntVal(100)).await;
    sleep(Duration::from_millis(50)).await;

    // sub1 never saw sub10 data
    assert_eq!(cached_value(&b, "sub1", "r1").await, Some(TypedValue::IntVal(11)));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn dotted_subscription_names_stay_separate() {
    let bus = MemoryTransport::new();
    let a = cache_on(&bus, config());
    let b = cache_on(&bus, config());
    let ctx = CancellationToken::new();

    eventually("control subscriptions", || bus.subscriber_count() == 2).await;
    a.write(&ctx, "sub", &update("r0", "a", 1)).await;
    a.write(&ctx, "sub.a", &update("r1", "a", 1)).await;
    eventually("data subscriptions", || bus.subscriber_count() == 6).await;

    a.write(&ctx, "sub", &update("r0", "a", 2)).await;
    a.write(&ctx, "sub.a", &update("r1", "a", 3)).await;
    wait_for_value(&b, "sub", "r0", TypedValue::IntVal(2)).await;
    wait_for_value(&b, "sub.a", "r1", TypedValue::IntVal(3)).await;
    sleep(Duration::from_millis(50)).await;

    // "sub." also matches "sub.a.r1", which must not land under "sub"
    for cache in [&a, &b] {
        let snapshot = cache.read().await.unwrap();
        let targets: Vec<_> = snapshot["sub"].iter().filter_map(Notification::target).collect();
        assert_eq!(targets, vec!["r0"]);
    }

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn late_joiner_catches_up_after_epoch_reset() {
    let bus = MemoryTransport::new();
    let fast_reset = CacheConfig {
        channel_reset_secs: 1,
        ..config()
    };
    let a = cache_on(&bus, fast_reset.clone());
    let ctx = CancellationToken::new();

    eventually("control subscription", || bus.subscriber_count() == 1).await;
    a.write(&ctx, "sub1", &update("router1", "a", 1)).await;
    eventually("data subscription", || bus.subscriber_count() == 2).await;

    let b = cache_on(&bus, fast_reset);
    eventually("late control subscription", || bus.subscriber_count() == 3).await;

    // Still in the same epoch: no re-announcement, b knows nothing
    a.write(&ctx, "sub1", &update("router1", "a", 2)).await;
    assert_eq!(bus.published_on(CONTROL_CHANNEL).len(), 1);
    assert_eq!(b.stats().started_channels, 0);

    // After the reset the next write announces again
    eventually("epoch reset", || a.stats().announced_channels == 0).await;
    a.write(&ctx, "sub1", &update("router1", "a", 3)).await;
    assert_eq!(bus.published_on(CONTROL_CHANNEL).len(), 2);
    eventually("late joiner channel task", || b.stats().started_channels == 1).await;
    eventually("late joiner data subscription", || bus.subscriber_count() == 4).await;

    a.write(&ctx, "sub1", &update("router1", "a", 4)).await;
    wait_for_value(&b, "sub1", "router1", TypedValue::IntVal(4)).await;

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn remote_writes_reach_local_stream_subscribers() {
    let bus = MemoryTransport::new();
    let a = cache_on(&bus, config());
    let b = cache_on(&bus, config());
    let ctx = CancellationToken::new();

    eventually("control subscriptions", || bus.subscriber_count() == 2).await;
    a.write(&ctx, "sub1", &update("router1", "a", 1)).await;
    eventually("data subscriptions", || bus.subscriber_count() == 4).await;

    let watch = CancellationToken::new();
    let mut updates = b.subscribe(
        watch.clone(),
        ReadOptions {
            subscription: Some("sub1".into()),
            target: Some("router9".into()),
            mode: ReadMode::Stream,
            updates_only: true,
            ..Default::default()
        },
    );

    a.write(&ctx, "sub1", &update("router9", "a", 9)).await;

    let got = tokio::time::timeout(Duration::from_secs(5), updates.recv())
        .await
        .expect("notification within timeout")
        .expect("stream open");
    assert_eq!(got.subscription, "sub1");
    assert_eq!(got.notification.target(), Some("router9"));

    watch.cancel();
    a.stop().await;
    b.stop().await;
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn stop_closes_transport_and_keeps_local_data() {
    let bus = MemoryTransport::new();
    let transport = Arc::new(bus.peer());
    let cache = Cache::with_transport(config(), Arc::new(InMemoryCache::new()), transport.clone());
    let ctx = CancellationToken::new();

    cache.write(&ctx, "sub1", &update("router1", "a", 1)).await;
    cache.stop().await;

    assert_eq!(cache.state(), SyncState::Stopped);
    assert!(transport.is_closed());

    // Writes after stop stay local
    let published = bus.published().len();
    cache.write(&ctx, "sub1", &update("router1", "a", 2)).await;
    assert_eq!(bus.published().len(), published);
    assert_eq!(cached_value(&cache, "sub1", "router1").await, Some(TypedValue::IntVal(2)));
}

#[tokio::test]
async fn delete_target_is_local_only() {
    let bus = MemoryTransport::new();
    let cache = cache_on(&bus, config());
    let ctx = CancellationToken::new();

    cache.write(&ctx, "sub1", &update("router1", "a", 1)).await;
    cache.write(&ctx, "sub2", &update("router1", "a", 1)).await;
    let published = bus.published().len();

    cache.delete_target("router1").await;

    assert_eq!(cached_value(&cache, "sub1", "router1").await, None);
    assert_eq!(cached_value(&cache, "sub2", "router1").await, None);
    assert_eq!(bus.published().len(), published);

    cache.stop().await;
}
