//! In-memory collaborators for tests and the CLI replay command.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use kagami_core::{CatalogItem, EntityKind, FilterDefaults, FilterState, QueryResponse};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{guard, ApiError, ApiResult, AssetLoader, AssetReadiness, CancelToken, CatalogApi, EntityName};

struct MockInner {
    catalog_size: u64,
    delay: Duration,
    page_delays: FxHashMap<u32, Duration>,
    query_delays: FxHashMap<String, Duration>,
    fail_next: Option<ApiError>,
    fail_names: bool,
    ignore_cancel: bool,
    names: FxHashMap<(EntityKind, String), String>,
    log: Vec<FilterState>,
}

impl MockInner {
    fn delay_for(&self, state: &FilterState) -> Duration {
        if let Some(d) = state.query.as_ref().and_then(|q| self.query_delays.get(q)) {
            return *d;
        }
        self.page_delays.get(&state.page).copied().unwrap_or(self.delay)
    }
}

/// Synthetic catalog. Every filter narrows the result count; items are derived from
/// their global position so pages are stable across calls.
pub struct MockApi {
    inner: Mutex<MockInner>,
    calls: AtomicUsize,
    name_calls: AtomicUsize,
    total_calls: AtomicUsize,
}

impl Default for MockApi {
    fn default() -> Self {
        Self {
            inner: Mutex::new(MockInner {
                catalog_size: 1000,
                delay: Duration::from_millis(50),
                page_delays: FxHashMap::default(),
                query_delays: FxHashMap::default(),
                fail_next: None,
                fail_names: false,
                ignore_cancel: false,
                names: FxHashMap::default(),
                log: Vec::new(),
            }),
            calls: AtomicUsize::new(0),
            name_calls: AtomicUsize::new(0),
            total_calls: AtomicUsize::new(0),
        }
    }
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_catalog_size(self, n: u64) -> Self {
        self.lock().catalog_size = n;
        self
    }

    pub fn with_delay(self, d: Duration) -> Self {
        self.lock().delay = d;
        self
    }

    pub fn with_page_delay(self, page: u32, d: Duration) -> Self {
        self.lock().page_delays.insert(page, d);
        self
    }

    /// Latency for requests whose text query equals `q`.
    pub fn with_query_delay(self, q: &str, d: Duration) -> Self {
        self.lock().query_delays.insert(q.to_string(), d);
        self
    }

    pub fn with_name(self, kind: EntityKind, id: &str, name: &str) -> Self {
        self.lock().names.insert((kind, id.to_string()), name.to_string());
        self
    }

    /// Keep running after cancellation and deliver the (stale) response anyway.
    pub fn ignoring_cancellation(self) -> Self {
        self.lock().ignore_cancel = true;
        self
    }

    pub fn fail_next(&self, err: ApiError) {
        self.lock().fail_next = Some(err);
    }

    pub fn fail_names(&self, on: bool) {
        self.lock().fail_names = on;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn name_calls(&self) -> usize {
        self.name_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// States received so far, in call order.
    pub fn call_log(&self) -> Vec<FilterState> {
        self.lock().log.clone()
    }

    fn page_of(&self, state: &FilterState, delay: Duration) -> QueryResponse {
        let size = self.lock().catalog_size;
        let total = size / (1 + state.active_filters() as u64);
        let limit = u64::from(state.limit.max(1));
        let total_pages = u32::try_from(total.div_ceil(limit)).unwrap_or(u32::MAX);
        let start = u64::from(state.page.saturating_sub(1)) * limit;
        let end = (start + limit).min(total);
        let label = state.query.as_deref().unwrap_or("Title");
        let items = (start..end)
            .map(|i| {
                let n = i + 1;
                CatalogItem {
                    id: format!("v{n}"),
                    title: format!("{label} #{n}"),
                    image_url: Some(format!("https://img.example/cv/{n}.jpg")),
                    released: Some(format!("{}-01-01", 1990 + (n % 35))),
                    rating: Some(((n * 7) % 100) as u32),
                    votes: ((n * 13) % 5000) as u32,
                }
            })
            .collect();
        QueryResponse {
            items,
            total,
            total_pages,
            timing_ms: delay.as_millis() as u64,
        }
    }
}

#[async_trait::async_trait]
impl CatalogApi for MockApi {
    async fn query(
        &self,
        state: &FilterState,
        _defaults: &FilterDefaults,
        token: &CancelToken,
    ) -> ApiResult<QueryResponse> {
        let (delay, ignore_cancel) = {
            let mut g = self.lock();
            g.log.push(state.clone());
            (g.delay_for(state), g.ignore_cancel)
        };
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug!(page = state.page, generation = token.generation(), delay_ms = %delay.as_millis(), "mock: query");
        if ignore_cancel {
            tokio::time::sleep(delay).await;
        } else {
            guard(token, async {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .await?;
        }
        let failed = self.lock().fail_next.take();
        if let Some(err) = failed {
            debug!(error = %err, "mock: injected failure");
            return Err(err);
        }
        Ok(self.page_of(state, delay))
    }

    async fn resolve_names(&self, ids: &[(EntityKind, String)]) -> ApiResult<Vec<EntityName>> {
        self.name_calls.fetch_add(1, Ordering::SeqCst);
        let g = self.lock();
        if g.fail_names {
            return Err(ApiError::Network("names unavailable".into()));
        }
        Ok(ids
            .iter()
            .filter_map(|(kind, id)| {
                g.names.get(&(*kind, id.clone())).map(|name| EntityName {
                    kind: *kind,
                    id: id.clone(),
                    name: name.clone(),
                })
            })
            .collect())
    }

    async fn catalog_total(&self) -> ApiResult<u64> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock().catalog_size)
    }
}

/// How a [`MockAssets`] url behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetBehavior {
    Ready(Duration),
    Fail(Duration),
    /// Never settles.
    Hang,
}

pub struct MockAssets {
    default: Mutex<AssetBehavior>,
    per_url: Mutex<FxHashMap<String, AssetBehavior>>,
    requested: Mutex<Vec<String>>,
}

impl Default for MockAssets {
    fn default() -> Self {
        Self::new(AssetBehavior::Ready(Duration::from_millis(20)))
    }
}

impl MockAssets {
    pub fn new(default: AssetBehavior) -> Self {
        Self {
            default: Mutex::new(default),
            per_url: Mutex::new(FxHashMap::default()),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn set_default(&self, b: AssetBehavior) {
        *self.default.lock().unwrap_or_else(PoisonError::into_inner) = b;
    }

    pub fn set(&self, url: &str, b: AssetBehavior) {
        self.per_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), b);
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn behavior(&self, url: &str) -> AssetBehavior {
        let per = self.per_url.lock().unwrap_or_else(PoisonError::into_inner);
        match per.get(url) {
            Some(b) => *b,
            None => *self.default.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

#[async_trait::async_trait]
impl AssetLoader for MockAssets {
    async fn preload(&self, url: &str) -> AssetReadiness {
        self.requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());
        match self.behavior(url) {
            AssetBehavior::Ready(d) => {
                tokio::time::sleep(d).await;
                AssetReadiness::Ready
            }
            AssetBehavior::Fail(d) => {
                tokio::time::sleep(d).await;
                AssetReadiness::Failed
            }
            AssetBehavior::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pages_are_stable_and_bounded() {
        let api = MockApi::new().with_catalog_size(50);
        let d = FilterDefaults::default();
        let s = FilterState::new(&d).with_page(3);
        let r = api.query(&s, &d, &CancelToken::detached()).await.unwrap();
        assert_eq!(r.total, 50);
        assert_eq!(r.total_pages, 3);
        assert_eq!(r.items.len(), 2);
        assert_eq!(r.items[0].id, "v49");
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn query_observes_cancellation() {
        let api = MockApi::new().with_delay(Duration::from_secs(1));
        let d = FilterDefaults::default();
        let token = CancelToken::new(1);
        token.cancel();
        let res = api.query(&FilterState::new(&d), &d, &token).await;
        assert_eq!(res, Err(ApiError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn names_skip_unknown_ids() {
        let api = MockApi::new().with_name(EntityKind::Tag, "g1", "Romance");
        let out = api
            .resolve_names(&[(EntityKind::Tag, "g1".into()), (EntityKind::Tag, "g2".into())])
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "Romance");
    }
}
