//! Query orchestrator: owns the active filter state and drives the fetch lifecycle.
//!
//! All state lives here and is mutated only on the caller's thread. Background tasks
//! (timers, requests, preloads) report back through [`UiUpdate`] messages which are
//! applied by [`QueryOrchestrator::process_updates`] or [`QueryOrchestrator::settle`].

#![forbid(unsafe_code)]

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use kagami_api::{AssetLoader, CatalogApi, TokenSlot};
use kagami_codec::FilterCodec;
use kagami_core::facet::{apply_facets, facets_from_state};
use kagami_core::{
    Axis, CatalogItem, Density, EntityKind, FacetMode, FilterDefaults, FilterState, IdList,
    QueryKey, QueryResponse, RangeAxis, SelectedFacet, Slot, SortDir, SortKey,
};
use kagami_store::ResultCache;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::BrowseConfig;
use crate::machine::{Effect, QueryMachine, QueryPhase};
use crate::model::{BrowseView, Committed, PrefetchState, Toggle, UiUpdate};
use crate::preload::{PreloadBuffer, SwapDecision};
use crate::snapshot::NavSnapshot;

pub struct QueryOrchestrator {
    pub(crate) api: Arc<dyn CatalogApi>,
    pub(crate) assets: Arc<dyn AssetLoader>,
    pub(crate) codec: FilterCodec,
    pub(crate) cfg: BrowseConfig,
    pub(crate) state: FilterState,
    pub(crate) facets: Vec<SelectedFacet>,
    pub(crate) machine: QueryMachine,
    pub(crate) slot: TokenSlot,
    pub(crate) cache: ResultCache,
    pub(crate) prefetch: PrefetchState,
    pub(crate) buffer: PreloadBuffer<CatalogItem>,
    pub(crate) committed: Option<Committed>,
    pub(crate) error: Option<String>,
    pub(crate) names_requested: bool,
    pub(crate) tx: mpsc::UnboundedSender<UiUpdate>,
    pub(crate) tasks: FuturesUnordered<JoinHandle<()>>,
    rx: mpsc::UnboundedReceiver<UiUpdate>,
    url: String,
    url_changed: bool,
}

impl QueryOrchestrator {
    pub fn new(api: Arc<dyn CatalogApi>, assets: Arc<dyn AssetLoader>, cfg: BrowseConfig) -> Self {
        let defaults = cfg.filter_defaults();
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            api,
            assets,
            state: FilterState::new(&defaults),
            codec: FilterCodec::new(defaults),
            facets: Vec::new(),
            machine: QueryMachine::new(),
            slot: TokenSlot::new(),
            cache: ResultCache::with_capacity(cfg.cache_cap),
            prefetch: PrefetchState::default(),
            buffer: PreloadBuffer::new(cfg.preload()),
            committed: None,
            error: None,
            names_requested: false,
            tx,
            tasks: FuturesUnordered::new(),
            rx,
            url: String::new(),
            url_changed: false,
            cfg,
        }
    }

    pub fn defaults(&self) -> &FilterDefaults {
        self.codec.defaults()
    }

    pub fn config(&self) -> &BrowseConfig {
        &self.cfg
    }

    pub fn api(&self) -> Arc<dyn CatalogApi> {
        self.api.clone()
    }

    pub fn state(&self) -> &FilterState {
        &self.state
    }

    pub fn facets(&self) -> &[SelectedFacet] {
        &self.facets
    }

    pub fn committed(&self) -> Option<&Committed> {
        self.committed.as_ref()
    }

    pub fn cached(&self, state: &FilterState) -> bool {
        self.cache.contains(&QueryKey::derive(state, self.codec.defaults()))
    }

    /// Encoded form of the current state (without `?`).
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The shareable query string, once per change. Replace vs push is the host's call.
    pub fn take_url_change(&mut self) -> Option<String> {
        std::mem::take(&mut self.url_changed).then(|| self.url.clone())
    }

    /// Initialise from the current URL and fetch immediately.
    pub fn mount(&mut self, query: &str) {
        let decoded = self.codec.decode(query);
        info!(filters = decoded.state.active_filters(), facets = decoded.facets.len(), "query: mount");
        self.state = decoded.state;
        self.facets = decoded.facets;
        self.url = query.trim_start_matches('?').to_string();
        self.sync_url();
        self.start_name_resolution();
        self.fetch_now();
    }

    /// Adopt a navigation snapshot wholesale: no request, no skeleton.
    pub fn restore(&mut self, snap: NavSnapshot) {
        self.slot.cancel();
        self.machine.restored();
        self.error = None;
        let key = QueryKey::derive(&snap.state, self.codec.defaults());
        self.state = snap.state.clone();
        self.facets = snap.facets;
        self.committed = Some(Committed {
            state: snap.state,
            key,
            total: snap.total,
            total_pages: snap.total_pages,
            timing_ms: 0,
        });
        self.buffer.replace(snap.items);
        self.url = self.codec.encode(&self.state, &self.facets);
        self.url_changed = false;
        self.names_requested = true;
        debug!(items = self.buffer.displayed().len(), "query: restored from snapshot");
    }

    /// Capture what is on screen for back-navigation to `url`. Nothing is captured while
    /// an edit, fetch or swap is pending.
    pub fn snapshot(&self, url: &str) -> Option<NavSnapshot> {
        let c = self.committed.as_ref()?;
        let pending = matches!(self.machine.phase(), QueryPhase::Debouncing { .. } | QueryPhase::Fetching { .. });
        if pending || c.state != self.state || self.buffer.view().is_swapping {
            debug!(url = %url, "query: snapshot skipped; results do not match url");
            return None;
        }
        Some(NavSnapshot {
            url: url.to_string(),
            state: c.state.clone(),
            facets: self.facets.clone(),
            items: self.buffer.displayed().to_vec(),
            total: c.total,
            total_pages: c.total_pages,
            captured_at: Utc::now(),
        })
    }

    // ----------------- edits -----------------

    pub fn set_query(&mut self, q: &str) {
        let q = q.to_string();
        self.edit(move |s| s.query = Some(q));
    }

    pub fn set_first_char(&mut self, c: Option<char>) {
        self.edit(move |s| s.first_char = c);
    }

    pub fn set_sort(&mut self, key: SortKey, dir: SortDir) {
        self.edit(move |s| {
            s.sort = key;
            s.sort_dir = dir;
        });
    }

    pub fn set_axis(&mut self, axis: Axis, include: Slot<IdList>, exclude: Slot<IdList>) {
        self.edit(move |s| {
            let a = s.axis_mut(axis);
            a.include = include;
            a.exclude = exclude;
        });
    }

    /// Drop one id from the effective include/exclude list; the rest is kept explicitly.
    pub fn remove_axis_value(&mut self, axis: Axis, mode: FacetMode, id: &str) {
        let d = self.codec.defaults();
        let current = match mode {
            FacetMode::Include => self.state.effective_include(axis, d),
            FacetMode::Exclude => self.state.effective_exclude(axis, d),
        };
        let Some(mut rest) = current.cloned() else { return };
        if !rest.remove(id) {
            return;
        }
        self.edit(move |s| {
            let a = s.axis_mut(axis);
            match mode {
                FacetMode::Include => a.include = Slot::Set(rest),
                FacetMode::Exclude => a.exclude = Slot::Set(rest),
            }
        });
    }

    pub fn set_range(&mut self, axis: RangeAxis, min: Option<u32>, max: Option<u32>) {
        self.edit(move |s| {
            let r = s.range_mut(axis);
            r.min = min;
            r.max = max;
        });
    }

    /// Removing either end of a range clears the pair.
    pub fn remove_range(&mut self, axis: RangeAxis) {
        self.set_range(axis, None, None);
    }

    pub fn set_toggle(&mut self, t: Toggle) {
        self.edit(move |s| match t {
            Toggle::IncludeChildren(on) => s.include_children = on,
            Toggle::Spoiler(level) => s.spoiler = level,
        });
    }

    pub fn add_facet(&mut self, facet: SelectedFacet) {
        let mut next = self.facets.clone();
        next.retain(|f| !(f.kind == facet.kind && f.id == facet.id));
        next.push(facet);
        self.edit_facets(next);
    }

    pub fn remove_facet(&mut self, kind: EntityKind, id: &str) {
        let mut next = self.facets.clone();
        next.retain(|f| !(f.kind == kind && f.id == id));
        self.edit_facets(next);
    }

    fn edit_facets(&mut self, next: Vec<SelectedFacet>) {
        self.facets = next.clone();
        self.edit(move |s| apply_facets(s, &next));
    }

    /// Pagination bypasses the debounce window.
    pub fn set_page(&mut self, page: u32) {
        let page = page.max(1);
        if page == self.state.page {
            return;
        }
        self.state.page = page;
        self.sync_url();
        self.fetch_now();
    }

    /// Density decides page size and K; the query restarts at page one.
    pub fn set_density(&mut self, density: Density) {
        if density == self.cfg.density {
            return;
        }
        self.cfg.density = density;
        self.codec = FilterCodec::new(self.cfg.filter_defaults());
        self.buffer.set_config(self.cfg.preload());
        self.state.limit = density.page_size();
        self.state.page = 1;
        self.state.normalize(self.codec.defaults());
        self.sync_url();
        self.fetch_now();
    }

    /// Reset to the documented defaults and fetch without waiting.
    pub fn clear_filters(&mut self) {
        info!(active = self.state.active_filters(), "query: clear filters");
        self.state = FilterState::new(self.codec.defaults());
        self.facets.clear();
        self.sync_url();
        self.fetch_now();
    }

    pub fn retry(&mut self) {
        info!("query: retry");
        self.fetch_now();
    }

    fn edit(&mut self, f: impl FnOnce(&mut FilterState)) {
        let before = self.state.clone();
        f(&mut self.state);
        self.state.page = 1;
        self.state.normalize(self.codec.defaults());
        self.facets = facets_from_state(&self.state, &self.facets);
        self.sync_url();
        if self.state == before {
            return;
        }
        if let Effect::ArmDebounce { seq, cancel_in_flight } = self.machine.edit() {
            if cancel_in_flight {
                self.slot.cancel();
                debug!("query: in-flight request superseded by edit");
            }
            self.spawn_debounce(seq);
        }
    }

    fn sync_url(&mut self) {
        let next = self.codec.encode(&self.state, &self.facets);
        if next != self.url {
            self.url = next;
            self.url_changed = true;
        }
    }

    // ----------------- fetch path -----------------

    fn fetch_now(&mut self) {
        let pagination_only = self
            .committed
            .as_ref()
            .map_or(false, |c| c.state.page != self.state.page && c.state.same_except_page(&self.state));
        if let Effect::StartFetch { pagination_only } = self.machine.immediate(pagination_only) {
            self.start_fetch(pagination_only);
        }
    }

    pub(crate) fn start_fetch(&mut self, pagination_only: bool) {
        let defaults = self.codec.defaults().clone();
        let state = self.state.clone();
        let key = QueryKey::derive(&state, &defaults);
        if let Some(entry) = self.cache.take(&key) {
            counter!("result_cache_hit_total", 1u64);
            info!(page = state.page, pagination_only, "query: cache hit");
            self.slot.cancel();
            if let Effect::Commit = self.machine.cache_hit() {
                self.commit(key, state, entry.response, true);
            }
            return;
        }
        self.cancel_prefetch_of(&key);
        let token = self.slot.supersede();
        if let Some(Effect::ArmOverlay { generation }) = self.machine.fetch_started(token.generation(), pagination_only) {
            self.spawn_overlay_timer(generation);
        }
        self.spawn_query(token, key, state, defaults);
    }

    fn commit(&mut self, key: QueryKey, state: FilterState, response: QueryResponse, skip: bool) {
        self.error = None;
        let QueryResponse { items, total, total_pages, timing_ms } = response;
        let has_items = !items.is_empty();
        self.committed = Some(Committed { state: state.clone(), key, total, total_pages, timing_ms });
        match self.buffer.swap(items, |it| it.image_url.clone(), skip) {
            SwapDecision::Swapped => debug!(skip, "preload: swapped immediately"),
            SwapDecision::Wait { ticket, urls } => self.spawn_gate(ticket, urls),
        }
        if has_items && total_pages > 1 {
            self.schedule_prefetch(&state, total_pages);
        }
    }

    // ----------------- update loop -----------------

    /// Drain pending updates without blocking (host frame loop).
    pub fn process_updates(&mut self) -> usize {
        let mut processed = 0usize;
        while processed < 256 {
            match self.rx.try_recv() {
                Ok(update) => {
                    self.apply(update);
                    processed += 1;
                }
                Err(_) => break,
            }
        }
        while let Some(Some(_)) = self.tasks.next().now_or_never() {}
        processed
    }

    /// Apply updates until every background task finished.
    pub async fn settle(&mut self) {
        loop {
            let update = tokio::select! {
                biased;
                Some(update) = self.rx.recv() => Some(update),
                done = self.tasks.next() => {
                    if done.is_none() {
                        break;
                    }
                    None
                }
            };
            if let Some(update) = update {
                self.apply(update);
            }
        }
        self.process_updates();
    }

    fn apply(&mut self, update: UiUpdate) {
        match update {
            UiUpdate::DebounceElapsed { seq } => {
                if let Effect::StartFetch { pagination_only } = self.machine.debounce_elapsed(seq) {
                    self.start_fetch(pagination_only);
                }
            }
            UiUpdate::OverlayDue { generation } => {
                if let Effect::ShowOverlay = self.machine.overlay_due(generation) {
                    debug!(generation, "query: overlay shown");
                }
            }
            UiUpdate::Fetched { generation, key, state, response } => {
                let effect = if self.slot.is_current(generation) {
                    self.machine.settled_ok(generation)
                } else {
                    Effect::Discard
                };
                match effect {
                    Effect::Commit => {
                        self.slot.release(generation);
                        self.commit(key, state, response, false);
                    }
                    _ => debug!(generation, "query: stale response dropped"),
                }
            }
            UiUpdate::FetchFailed { generation, error } => {
                let effect = if self.slot.is_current(generation) {
                    self.machine.settled_err(generation, &error)
                } else {
                    Effect::Discard
                };
                match effect {
                    Effect::Fail => {
                        self.slot.release(generation);
                        self.error = Some(error.user_message());
                        self.committed = None;
                        self.buffer.clear();
                    }
                    _ => debug!(generation, "query: stale failure dropped"),
                }
            }
            UiUpdate::GateOpened { ticket, outcome } => {
                if self.buffer.complete(ticket) {
                    debug!(ticket, ?outcome, "preload: swapped");
                } else {
                    debug!(ticket, "preload: superseded swap ignored");
                }
            }
            UiUpdate::Prefetched { batch, key, response } => {
                if batch == self.prefetch.batch {
                    self.prefetch.in_flight.remove(&key);
                }
                if let Some(response) = response {
                    counter!("prefetch_total", 1u64);
                    self.cache.put(key, response);
                }
            }
            UiUpdate::NamesResolved(names) => {
                for n in names {
                    if let Some(f) = self.facets.iter_mut().find(|f| f.kind == n.kind && f.id == n.id) {
                        f.display_name = Some(n.name);
                    }
                }
                self.sync_url();
            }
            UiUpdate::NamesFailed(error) => {
                debug!(error = %error, "names: lookup failed; ids stay as labels");
            }
        }
    }

    pub fn view(&self) -> BrowseView<'_> {
        let b = self.buffer.view();
        let (total, total_pages, page) = match &self.committed {
            Some(c) => (c.total, c.total_pages, c.state.page),
            None => (0, 0, self.state.page),
        };
        BrowseView {
            items: b.display_items,
            total,
            total_pages,
            page,
            facets: &self.facets,
            phase: self.machine.phase(),
            searching: self.machine.overlay_visible(),
            loading: self.machine.searching(),
            is_swapping: b.is_swapping,
            skeleton: b.display_items.is_empty() && !b.empty && self.error.is_none(),
            empty: b.empty && self.error.is_none(),
            error: self.error.as_deref(),
            can_retry: self.machine.failed(),
        }
    }
}

impl Drop for QueryOrchestrator {
    fn drop(&mut self) {
        self.slot.cancel();
        if let Some(t) = self.prefetch.token.take() {
            t.cancel();
        }
        for h in self.tasks.iter() {
            h.abort();
        }
    }
}
