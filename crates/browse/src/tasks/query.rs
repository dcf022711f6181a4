#![forbid(unsafe_code)]

use kagami_api::CancelToken;
use kagami_core::{FilterDefaults, FilterState, QueryKey};
use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::model::UiUpdate;
use crate::orchestrator::QueryOrchestrator;
use crate::preload::await_gate;

impl QueryOrchestrator {
    pub(crate) fn spawn_debounce(&mut self, seq: u64) {
        let tx = self.tx.clone();
        let delay = self.cfg.debounce;
        self.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(UiUpdate::DebounceElapsed { seq });
        }));
    }

    pub(crate) fn spawn_overlay_timer(&mut self, generation: u64) {
        let tx = self.tx.clone();
        let delay = self.cfg.overlay_delay;
        self.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(UiUpdate::OverlayDue { generation });
        }));
    }

    pub(crate) fn spawn_query(&mut self, token: CancelToken, key: QueryKey, state: FilterState, defaults: FilterDefaults) {
        let api = self.api.clone();
        let tx = self.tx.clone();
        let generation = token.generation();
        info!(generation, page = state.page, filters = state.active_filters(), "query: fetch start");
        self.tasks.push(tokio::spawn(async move {
            let t0 = Instant::now();
            let res = api.query(&state, &defaults, &token).await;
            let took_ms = t0.elapsed().as_millis() as u64;
            match res {
                Ok(response) => {
                    counter!("query_fetch_total", 1u64);
                    histogram!("query_fetch_ms", took_ms as f64);
                    info!(generation, took_ms, items = response.items.len(), total = response.total, "query: fetch ok");
                    let _ = tx.send(UiUpdate::Fetched { generation, key, state, response });
                }
                Err(e) if e.is_cancellation() => {
                    debug!(generation, took_ms, "query: cancelled");
                }
                Err(e) => {
                    counter!("query_fetch_failed_total", 1u64);
                    warn!(generation, took_ms, error = %e, "query: fetch failed");
                    let _ = tx.send(UiUpdate::FetchFailed { generation, error: e });
                }
            }
        }));
    }

    /// Preload the leading assets of a pending list, then hand the ticket back.
    pub(crate) fn spawn_gate(&mut self, ticket: u64, urls: Vec<String>) {
        let assets = self.assets.clone();
        let tx = self.tx.clone();
        let cfg = *self.buffer.config();
        debug!(ticket, assets = urls.len(), "preload: gate armed");
        self.tasks.push(tokio::spawn(async move {
            let outcome = await_gate(assets, urls, cfg).await;
            let _ = tx.send(UiUpdate::GateOpened { ticket, outcome });
        }));
    }
}
