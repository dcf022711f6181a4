use std::sync::Arc;
use std::time::Duration;

use kagami_api::{AssetBehavior, MockAssets};
use kagami_browse::{await_gate, GateOutcome, PreloadConfig};
use tokio::time::Instant;

fn cfg() -> PreloadConfig {
    PreloadConfig { count: 4, threshold: 0.75, timeout: Duration::from_millis(1200) }
}

fn urls() -> Vec<String> {
    (0..4).map(|i| format!("u{i}")).collect()
}

#[tokio::test(start_paused = true)]
async fn opens_as_soon_as_threshold_is_met() {
    let assets = Arc::new(MockAssets::new(AssetBehavior::Ready(Duration::from_millis(100))));
    assets.set("u3", AssetBehavior::Hang);
    let t0 = Instant::now();
    let out = await_gate(assets.clone(), urls(), cfg()).await;
    assert_eq!(out, GateOutcome::Ready { ready: 3 });
    assert_eq!(t0.elapsed(), Duration::from_millis(100));
    assert_eq!(assets.requested().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn no_ready_assets_swaps_exactly_at_timeout() {
    let assets = Arc::new(MockAssets::new(AssetBehavior::Hang));
    let t0 = Instant::now();
    let out = await_gate(assets, urls(), cfg()).await;
    assert_eq!(out, GateOutcome::TimedOut { ready: 0 });
    assert_eq!(t0.elapsed(), Duration::from_millis(1200));
}

#[tokio::test(start_paused = true)]
async fn failed_assets_never_open_the_gate_early() {
    let assets = Arc::new(MockAssets::new(AssetBehavior::Fail(Duration::from_millis(10))));
    assets.set("u0", AssetBehavior::Ready(Duration::from_millis(10)));
    let t0 = Instant::now();
    let out = await_gate(assets, urls(), cfg()).await;
    assert_eq!(out, GateOutcome::TimedOut { ready: 1 });
    assert_eq!(t0.elapsed(), Duration::from_millis(1200));
}
