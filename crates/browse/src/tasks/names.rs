#![forbid(unsafe_code)]

use kagami_core::facet::unresolved;
use tracing::debug;

use crate::model::UiUpdate;
use crate::orchestrator::QueryOrchestrator;

impl QueryOrchestrator {
    /// One batched lookup for facets that arrived as bare ids.
    pub(crate) fn start_name_resolution(&mut self) {
        if self.names_requested {
            return;
        }
        let ids = unresolved(&self.facets);
        if ids.is_empty() {
            return;
        }
        self.names_requested = true;
        let api = self.api.clone();
        let tx = self.tx.clone();
        debug!(count = ids.len(), "names: resolving");
        self.tasks.push(tokio::spawn(async move {
            let update = match api.resolve_names(&ids).await {
                Ok(names) => UiUpdate::NamesResolved(names),
                Err(e) => UiUpdate::NamesFailed(e.to_string()),
            };
            let _ = tx.send(update);
        }));
    }
}
