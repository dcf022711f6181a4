#![forbid(unsafe_code)]

use kagami_api::{ApiError, CancelToken, EntityName};
use kagami_core::{CatalogItem, FilterState, QueryKey, QueryResponse, SelectedFacet, SpoilerLevel};
use rustc_hash::FxHashSet;

use crate::machine::QueryPhase;
use crate::preload::GateOutcome;

/// Messages from background tasks to the orchestrator, drained on its own thread.
#[derive(Debug)]
pub enum UiUpdate {
    DebounceElapsed { seq: u64 },
    OverlayDue { generation: u64 },
    Fetched { generation: u64, key: QueryKey, state: FilterState, response: QueryResponse },
    FetchFailed { generation: u64, error: ApiError },
    GateOpened { ticket: u64, outcome: GateOutcome },
    Prefetched { batch: u64, key: QueryKey, response: Option<QueryResponse> },
    NamesResolved(Vec<EntityName>),
    NamesFailed(String),
}

/// Metadata of the last committed result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub state: FilterState,
    pub key: QueryKey,
    pub total: u64,
    pub total_pages: u32,
    pub timing_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    IncludeChildren(bool),
    Spoiler(SpoilerLevel),
}

#[derive(Default)]
pub(crate) struct PrefetchState {
    pub batch: u64,
    pub token: Option<CancelToken>,
    pub in_flight: FxHashSet<QueryKey>,
}

/// What the host renders.
#[derive(Debug, Clone, Copy)]
pub struct BrowseView<'a> {
    pub items: &'a [CatalogItem],
    pub total: u64,
    pub total_pages: u32,
    pub page: u32,
    pub facets: &'a [SelectedFacet],
    pub phase: QueryPhase,
    /// Full overlay: a non-pagination request outlived the overlay delay.
    pub searching: bool,
    /// A non-pagination request is in flight (soft indicator only).
    pub loading: bool,
    pub is_swapping: bool,
    /// Nothing to show yet and no result set ever arrived.
    pub skeleton: bool,
    pub empty: bool,
    pub error: Option<&'a str>,
    pub can_retry: bool,
}
