//! Navigation scroll-state coordination.
//!
//! [`NavigationContext`] holds the transitions: a forward marker set on link activation
//! and consumed on the next route settlement, and at most one pending offset waiting for
//! the document to grow. [`ScrollCoordinator`] drives it against a [`ScrollHost`] and a
//! layout-height channel, with one watcher task per settled navigation.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use kagami_store::SessionStore;
use metrics::counter;
use once_cell::sync::OnceCell;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::BrowseConfig;
use crate::snapshot::{save_scroll, take_scroll};

/// What the page should do once its route settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleAction {
    /// Forward navigation: start at the top.
    ScrollTop,
    Restore(u32),
    /// Offset not reachable yet: content is hidden until the layout grows or the watch
    /// times out.
    AwaitLayout { generation: u64, offset: u32 },
    /// Back navigation without a stored offset.
    Stay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingScroll {
    pub route: String,
    pub offset: u32,
}

#[derive(Debug, Default)]
pub struct NavigationContext {
    forward: bool,
    pending: Option<PendingScroll>,
    generation: u64,
    watching: bool,
    hidden: bool,
}

fn reachable(offset: u32, doc_height: u32, viewport: u32) -> bool {
    doc_height.saturating_sub(viewport) >= offset
}

impl NavigationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link_activated(&mut self) {
        self.forward = true;
    }

    pub fn forward_pending(&self) -> bool {
        self.forward
    }

    /// Start a new navigation lifecycle. Anything pending from the previous one is dropped.
    pub fn route_settled(&mut self, route: &str, stored: Option<u32>, doc_height: u32, viewport: u32) -> SettleAction {
        self.generation += 1;
        self.pending = None;
        self.watching = false;
        self.hidden = false;
        if std::mem::take(&mut self.forward) {
            return SettleAction::ScrollTop;
        }
        let Some(offset) = stored else { return SettleAction::Stay };
        if reachable(offset, doc_height, viewport) {
            return SettleAction::Restore(offset);
        }
        self.pending = Some(PendingScroll { route: route.to_string(), offset });
        self.watching = true;
        self.hidden = true;
        SettleAction::AwaitLayout { generation: self.generation, offset }
    }

    /// The document grew; returns the offset to scroll to once it is reachable.
    pub fn layout_changed(&mut self, generation: u64, doc_height: u32, viewport: u32) -> Option<u32> {
        if !self.watching || generation != self.generation {
            return None;
        }
        let offset = self.pending.as_ref()?.offset;
        if !reachable(offset, doc_height, viewport) {
            return None;
        }
        self.pending = None;
        self.watching = false;
        self.hidden = false;
        Some(offset)
    }

    /// The watch expired: reveal and scroll to the stored offset; the host clamps it to
    /// what is reachable. The offset stays pending so the page can consume it after its
    /// own content settles.
    pub fn watch_timed_out(&mut self, generation: u64) -> Option<u32> {
        if !self.watching || generation != self.generation {
            return None;
        }
        self.watching = false;
        self.hidden = false;
        self.pending.as_ref().map(|p| p.offset)
    }

    /// Explicit consumption by a page whose content has settled. Stops any watcher.
    pub fn consume_pending(&mut self, route: &str) -> Option<u32> {
        if self.pending.as_ref().map_or(true, |p| p.route != route) {
            return None;
        }
        let p = self.pending.take()?;
        if self.watching {
            self.watching = false;
            self.generation += 1;
        }
        self.hidden = false;
        Some(p.offset)
    }

    pub fn pending(&self) -> Option<&PendingScroll> {
        self.pending.as_ref()
    }

    pub fn content_hidden(&self) -> bool {
        self.hidden
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// The rendering surface the coordinator scrolls.
pub trait ScrollHost: Send + Sync {
    fn scroll_to(&self, offset: u32);
    fn set_content_hidden(&self, hidden: bool);
    fn viewport_height(&self) -> u32;
}

type SharedContext = Arc<Mutex<NavigationContext>>;

fn lock(ctx: &SharedContext) -> MutexGuard<'_, NavigationContext> {
    ctx.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ScrollCoordinator {
    ctx: SharedContext,
    session: Arc<SessionStore>,
    watch_timeout: Duration,
    generation: watch::Sender<u64>,
}

static GLOBAL: OnceCell<Arc<ScrollCoordinator>> = OnceCell::new();

impl ScrollCoordinator {
    pub fn new(session: Arc<SessionStore>, watch_timeout: Duration) -> Self {
        let (generation, _) = watch::channel(0);
        Self { ctx: Arc::new(Mutex::new(NavigationContext::new())), session, watch_timeout, generation }
    }

    /// Process-wide instance backed by its own session store.
    pub fn global() -> Arc<ScrollCoordinator> {
        GLOBAL
            .get_or_init(|| {
                let cfg = BrowseConfig::from_env();
                Arc::new(Self::new(Arc::new(SessionStore::new()), cfg.scroll_watch))
            })
            .clone()
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// Outbound navigation from a link: persist `offset` for `route` and mark forward.
    pub fn on_link_activated(&self, route: &str, offset: u32) {
        save_scroll(&self.session, route, offset);
        lock(&self.ctx).link_activated();
        debug!(route = %route, offset, "scroll: link activated");
    }

    pub fn forward_pending(&self) -> bool {
        lock(&self.ctx).forward_pending()
    }

    pub fn content_hidden(&self) -> bool {
        lock(&self.ctx).content_hidden()
    }

    /// Route settled. Returns the layout watcher when the stored offset is not reachable yet.
    pub fn on_route_settled(
        &self,
        route: &str,
        host: Arc<dyn ScrollHost>,
        layout: watch::Receiver<u32>,
    ) -> Option<JoinHandle<()>> {
        let stored = take_scroll(&self.session, route).map(|s| s.offset);
        let doc_height = *layout.borrow();
        let (action, generation, was_hidden) = {
            let mut ctx = lock(&self.ctx);
            let was_hidden = ctx.content_hidden();
            let action = ctx.route_settled(route, stored, doc_height, host.viewport_height());
            (action, ctx.generation(), was_hidden)
        };
        self.generation.send_replace(generation);
        // a superseded watcher no longer reveals; undo its hide here
        if was_hidden && !matches!(action, SettleAction::AwaitLayout { .. }) {
            host.set_content_hidden(false);
            debug!(route = %route, "scroll: revealed content hidden by previous navigation");
        }
        match action {
            SettleAction::ScrollTop => {
                host.scroll_to(0);
                None
            }
            SettleAction::Stay => None,
            SettleAction::Restore(offset) => {
                host.scroll_to(offset);
                counter!("scroll_restore_total", 1u64);
                debug!(route = %route, offset, "scroll: restored");
                None
            }
            SettleAction::AwaitLayout { generation, offset } => {
                host.set_content_hidden(true);
                debug!(route = %route, offset, doc_height, "scroll: waiting for layout");
                Some(self.spawn_watcher(generation, host, layout))
            }
        }
    }

    fn spawn_watcher(&self, generation: u64, host: Arc<dyn ScrollHost>, mut layout: watch::Receiver<u32>) -> JoinHandle<()> {
        let ctx = self.ctx.clone();
        let mut gen_rx = self.generation.subscribe();
        let timeout = self.watch_timeout;
        tokio::spawn(async move {
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);
            let mut layout_open = true;
            loop {
                tokio::select! {
                    _ = &mut deadline => {
                        let offset = lock(&ctx).watch_timed_out(generation);
                        if let Some(offset) = offset {
                            host.scroll_to(offset);
                            host.set_content_hidden(false);
                            debug!(offset, "scroll: watch timed out; revealed");
                        }
                        break;
                    }
                    changed = layout.changed(), if layout_open => {
                        if changed.is_err() {
                            layout_open = false;
                            continue;
                        }
                        let height = *layout.borrow_and_update();
                        let offset = lock(&ctx).layout_changed(generation, height, host.viewport_height());
                        if let Some(offset) = offset {
                            host.scroll_to(offset);
                            host.set_content_hidden(false);
                            counter!("scroll_restore_total", 1u64);
                            debug!(offset, height, "scroll: restored after layout growth");
                            break;
                        }
                    }
                    changed = gen_rx.changed() => {
                        if changed.is_err() || *gen_rx.borrow() != generation {
                            debug!(generation, "scroll: stale watcher torn down");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// A page finished loading its own content: apply the pending offset for `route`.
    pub fn consume_pending(&self, route: &str, host: &dyn ScrollHost) -> Option<u32> {
        let (offset, generation) = {
            let mut ctx = lock(&self.ctx);
            let offset = ctx.consume_pending(route)?;
            (offset, ctx.generation())
        };
        self.generation.send_replace(generation);
        host.scroll_to(offset);
        host.set_content_hidden(false);
        counter!("scroll_restore_total", 1u64);
        debug!(route = %route, offset, "scroll: pending offset consumed");
        Some(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Host {
        scrolls: Mutex<Vec<u32>>,
        hidden: Mutex<Vec<bool>>,
    }

    impl ScrollHost for Host {
        fn scroll_to(&self, offset: u32) {
            self.scrolls.lock().unwrap().push(offset);
        }
        fn set_content_hidden(&self, hidden: bool) {
            self.hidden.lock().unwrap().push(hidden);
        }
        fn viewport_height(&self) -> u32 {
            800
        }
    }

    impl Host {
        fn scrolls(&self) -> Vec<u32> {
            self.scrolls.lock().unwrap().clone()
        }
        fn hidden(&self) -> Vec<bool> {
            self.hidden.lock().unwrap().clone()
        }
    }

    fn coordinator() -> ScrollCoordinator {
        ScrollCoordinator::new(Arc::new(SessionStore::new()), Duration::from_millis(1500))
    }

    #[test]
    fn context_forward_marker_is_consumed_once() {
        let mut ctx = NavigationContext::new();
        ctx.link_activated();
        assert_eq!(ctx.route_settled("/v/1", Some(500), 5000, 800), SettleAction::ScrollTop);
        assert_eq!(ctx.route_settled("/v/1", Some(500), 5000, 800), SettleAction::Restore(500));
        assert_eq!(ctx.route_settled("/v/1", None, 5000, 800), SettleAction::Stay);
    }

    #[test]
    fn context_new_navigation_invalidates_watch() {
        let mut ctx = NavigationContext::new();
        let SettleAction::AwaitLayout { generation, .. } = ctx.route_settled("/a", Some(3000), 900, 800) else {
            panic!("expected layout wait")
        };
        assert!(ctx.content_hidden());
        ctx.route_settled("/b", None, 900, 800);
        assert_eq!(ctx.layout_changed(generation, 10_000, 800), None);
        assert_eq!(ctx.watch_timed_out(generation), None);
        assert!(!ctx.content_hidden());
    }

    #[tokio::test(start_paused = true)]
    async fn restores_after_layout_growth() {
        let c = coordinator();
        let host = Arc::new(Host::default());
        let (height_tx, height_rx) = watch::channel(1000u32);
        c.on_link_activated("/browse", 2400);
        c.on_route_settled("/v/9", host.clone(), height_rx.clone());
        assert_eq!(host.scrolls(), vec![0]);

        let watcher = c.on_route_settled("/browse", host.clone(), height_rx).expect("watcher");
        assert!(c.content_hidden());
        height_tx.send(2000).unwrap();
        tokio::task::yield_now().await;
        height_tx.send(3300).unwrap();
        watcher.await.unwrap();
        assert_eq!(host.scrolls(), vec![0, 2400]);
        assert_eq!(host.hidden(), vec![true, false]);
        assert!(!c.content_hidden());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reveals_and_page_can_consume_later() {
        let c = coordinator();
        let host = Arc::new(Host::default());
        let (_height_tx, height_rx) = watch::channel(1000u32);
        c.on_link_activated("/browse", 2400);
        c.on_route_settled("/v/9", host.clone(), height_rx.clone());
        let watcher = c.on_route_settled("/browse", host.clone(), height_rx).expect("watcher");
        let t0 = tokio::time::Instant::now();
        watcher.await.unwrap();
        assert_eq!(t0.elapsed(), Duration::from_millis(1500));
        assert_eq!(host.scrolls(), vec![0, 2400]);
        assert!(!c.content_hidden());

        assert_eq!(c.consume_pending("/browse", host.as_ref()), Some(2400));
        assert_eq!(c.consume_pending("/browse", host.as_ref()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_watcher_does_not_scroll_new_page() {
        let c = coordinator();
        let host = Arc::new(Host::default());
        let (old_tx, old_rx) = watch::channel(1000u32);
        c.on_link_activated("/browse", 2400);
        c.on_route_settled("/v/9", host.clone(), old_rx.clone());
        let stale = c.on_route_settled("/browse", host.clone(), old_rx).expect("watcher");

        let (_new_tx, new_rx) = watch::channel(5000u32);
        assert!(c.on_route_settled("/other", host.clone(), new_rx).is_none());
        stale.await.unwrap();
        let _ = old_tx.send(9000);
        assert_eq!(host.scrolls(), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn new_navigation_reveals_content_hidden_by_superseded_watch() {
        let c = coordinator();
        let host = Arc::new(Host::default());
        let (_old_tx, old_rx) = watch::channel(1000u32);
        c.on_link_activated("/browse", 2400);
        c.on_route_settled("/v/9", host.clone(), old_rx.clone());
        let stale = c.on_route_settled("/browse", host.clone(), old_rx).expect("watcher");
        assert_eq!(host.hidden(), vec![true]);

        let (_new_tx, new_rx) = watch::channel(1000u32);
        assert!(c.on_route_settled("/other", host.clone(), new_rx).is_none());
        stale.await.unwrap();
        assert!(!c.content_hidden());
        assert_eq!(host.hidden(), vec![true, false]);
        assert_eq!(host.scrolls(), vec![0]);
    }
}
