#![forbid(unsafe_code)]

use kagami_api::{guard, ApiError, CancelToken};
use kagami_core::{FilterState, QueryKey};
use tracing::debug;

use crate::model::UiUpdate;
use crate::orchestrator::QueryOrchestrator;
use crate::preload::{await_gate, PreloadConfig};

impl QueryOrchestrator {
    /// The primary request is about to fetch `key`: drop the batch that would fetch it too.
    pub(crate) fn cancel_prefetch_of(&mut self, key: &QueryKey) {
        if !self.prefetch.in_flight.contains(key) {
            return;
        }
        if let Some(token) = self.prefetch.token.take() {
            token.cancel();
        }
        self.prefetch.in_flight.clear();
        debug!(batch = self.prefetch.batch, "prefetch: batch cancelled by primary request");
    }

    /// Warm neighbouring pages of `base`. A new batch cancels the previous one.
    pub(crate) fn schedule_prefetch(&mut self, base: &FilterState, total_pages: u32) {
        if let Some(old) = self.prefetch.token.take() {
            old.cancel();
        }
        self.prefetch.in_flight.clear();
        self.prefetch.batch += 1;
        let batch = self.prefetch.batch;

        let page = base.page;
        let ahead = (1..=self.cfg.prefetch_ahead)
            .map(|i| page.saturating_add(i))
            .filter(|&n| n <= total_pages);
        let behind = (1..=self.cfg.prefetch_behind).filter(|&i| page > i).map(|i| page - i);
        let defaults = self.codec.defaults().clone();
        let mut jobs: Vec<(QueryKey, FilterState)> = Vec::new();
        for n in ahead.chain(behind) {
            let state = base.with_page(n);
            let key = QueryKey::derive(&state, &defaults);
            if self.cache.contains(&key) || self.prefetch.in_flight.contains(&key) {
                continue;
            }
            self.prefetch.in_flight.insert(key.clone());
            jobs.push((key, state));
        }
        if jobs.is_empty() {
            return;
        }

        let token = CancelToken::new(batch);
        self.prefetch.token = Some(token.clone());
        let api = self.api.clone();
        let assets = self.assets.clone();
        let tx = self.tx.clone();
        let delay = self.cfg.prefetch_delay;
        let warm = PreloadConfig { threshold: 1.0, ..*self.buffer.config() };
        debug!(batch, pages = jobs.len(), "prefetch: scheduled");

        self.tasks.push(tokio::spawn(async move {
            let waited = guard(&token, async {
                tokio::time::sleep(delay).await;
                Ok::<(), ApiError>(())
            })
            .await;
            if waited.is_err() {
                debug!(batch, "prefetch: batch cancelled before start");
                for (key, _) in jobs {
                    let _ = tx.send(UiUpdate::Prefetched { batch, key, response: None });
                }
                return;
            }
            let work = jobs.into_iter().map(|(key, state)| {
                let api = api.clone();
                let assets = assets.clone();
                let tx = tx.clone();
                let token = token.clone();
                let defaults = defaults.clone();
                async move {
                    match api.query(&state, &defaults, &token).await {
                        Ok(response) => {
                            let urls: Vec<String> = response
                                .items
                                .iter()
                                .take(warm.count)
                                .filter_map(|it| it.image_url.clone())
                                .collect();
                            debug!(batch, page = state.page, "prefetch: page cached");
                            let _ = tx.send(UiUpdate::Prefetched { batch, key, response: Some(response) });
                            if !urls.is_empty() {
                                await_gate(assets, urls, warm).await;
                            }
                        }
                        Err(e) => {
                            debug!(batch, page = state.page, error = %e, "prefetch: dropped");
                            let _ = tx.send(UiUpdate::Prefetched { batch, key, response: None });
                        }
                    }
                }
            });
            futures::future::join_all(work).await;
        }));
    }
}
