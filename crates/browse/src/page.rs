//! Browse page glue: snapshot restore on back-navigation, fresh fetch otherwise,
//! and scroll hand-off to the shared coordinator.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use kagami_persist::{AggregateCache, DurableStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::orchestrator::QueryOrchestrator;
use crate::scroll::{ScrollCoordinator, ScrollHost};
use crate::snapshot::{discard_nav, save_nav, take_nav_matching};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Adopted a navigation snapshot; no request was made.
    Restored,
    Fetching,
}

pub struct BrowsePage {
    route: String,
    orch: QueryOrchestrator,
    scroll: Arc<ScrollCoordinator>,
    aggregates: Option<AggregateCache<Arc<dyn DurableStore>>>,
}

impl BrowsePage {
    pub fn new(route: impl Into<String>, orch: QueryOrchestrator, scroll: Arc<ScrollCoordinator>) -> Self {
        Self { route: route.into(), orch, scroll, aggregates: None }
    }

    pub fn with_aggregates(mut self, store: Arc<dyn DurableStore>, ttl: Duration) -> Self {
        self.aggregates = Some(AggregateCache::new(store, ttl));
        self
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn orchestrator(&self) -> &QueryOrchestrator {
        &self.orch
    }

    pub fn orchestrator_mut(&mut self) -> &mut QueryOrchestrator {
        &mut self.orch
    }

    /// Route plus the current query string.
    pub fn current_url(&self) -> String {
        match self.orch.url() {
            "" => self.route.clone(),
            q => format!("{}?{}", self.route, q),
        }
    }

    /// Page mounted at `url`. Back-navigation with a snapshot for exactly this url
    /// restores it; anything else decodes the url and fetches.
    pub fn open(
        &mut self,
        url: &str,
        host: Arc<dyn ScrollHost>,
        layout: watch::Receiver<u32>,
    ) -> (OpenOutcome, Option<JoinHandle<()>>) {
        let query = url.split_once('?').map_or("", |(_, q)| q);
        let session = self.scroll.session().clone();
        let snap = if self.scroll.forward_pending() {
            discard_nav(&session, &self.route);
            None
        } else {
            take_nav_matching(&session, &self.route, url)
        };
        let outcome = match snap {
            Some(snap) => {
                info!(url = %url, items = snap.items.len(), "page: restored from snapshot");
                self.orch.restore(snap);
                OpenOutcome::Restored
            }
            None => {
                self.orch.mount(query);
                OpenOutcome::Fetching
            }
        };
        let watcher = self.scroll.on_route_settled(&self.route, host, layout);
        (outcome, watcher)
    }

    /// Outbound link: capture the view for back-navigation and persist the offset.
    pub fn leave(&self, offset: u32) {
        let url = self.current_url();
        if let Some(snap) = self.orch.snapshot(&url) {
            save_nav(self.scroll.session(), &self.route, &snap);
        }
        self.scroll.on_link_activated(&self.route, offset);
    }

    /// Own content finished loading; apply any offset still pending for this route.
    pub fn content_settled(&self, host: &dyn ScrollHost) -> Option<u32> {
        self.scroll.consume_pending(&self.route, host)
    }

    /// Whole-catalog count, cached durably for the aggregate TTL.
    pub async fn catalog_total(&self) -> Option<u64> {
        let cache = self.aggregates.as_ref()?;
        let api = self.orch.api();
        match cache.get_or_fetch("catalog_total", || async move { api.catalog_total().await }).await {
            Ok(total) => Some(total),
            Err(e) => {
                warn!(error = %e, "page: catalog total unavailable");
                None
            }
        }
    }
}
