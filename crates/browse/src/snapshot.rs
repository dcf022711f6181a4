#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use kagami_core::{CatalogItem, FilterState, SelectedFacet};
use kagami_store::SessionStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Scroll offset persisted for one route on outbound navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollSnapshot {
    pub route: String,
    pub offset: u32,
    pub captured_at: DateTime<Utc>,
}

/// Fully formed view captured on outbound navigation, valid only for the exact URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavSnapshot {
    pub url: String,
    pub state: FilterState,
    pub facets: Vec<SelectedFacet>,
    pub items: Vec<CatalogItem>,
    pub total: u64,
    pub total_pages: u32,
    pub captured_at: DateTime<Utc>,
}

fn scroll_key(route: &str) -> String {
    format!("scroll:{route}")
}

fn nav_key(route: &str) -> String {
    format!("nav:{route}")
}

pub fn save_scroll(session: &SessionStore, route: &str, offset: u32) {
    let snap = ScrollSnapshot { route: route.to_string(), offset, captured_at: Utc::now() };
    session.put(&scroll_key(route), &snap);
}

pub fn take_scroll(session: &SessionStore, route: &str) -> Option<ScrollSnapshot> {
    session.take(&scroll_key(route))
}

pub fn save_nav(session: &SessionStore, route: &str, snap: &NavSnapshot) {
    session.put(&nav_key(route), snap);
}

/// Consume the navigation snapshot for `route`; it is returned only when it was captured
/// for exactly `url`. A mismatch discards it.
pub fn take_nav_matching(session: &SessionStore, route: &str, url: &str) -> Option<NavSnapshot> {
    let snap: NavSnapshot = session.take(&nav_key(route))?;
    if snap.url == url {
        return Some(snap);
    }
    debug!(captured = %snap.url, requested = %url, "snapshot: url mismatch; discarded");
    None
}

/// Forward navigation never restores; drop whatever was captured for `route`.
pub fn discard_nav(session: &SessionStore, route: &str) -> bool {
    session.remove(&nav_key(route))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(url: &str) -> NavSnapshot {
        NavSnapshot {
            url: url.into(),
            state: FilterState::default(),
            facets: Vec::new(),
            items: Vec::new(),
            total: 0,
            total_pages: 0,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn exact_match_only_and_consumed_once() {
        let s = SessionStore::new();
        save_nav(&s, "/browse", &snap("/browse?q=a"));
        assert!(take_nav_matching(&s, "/browse", "/browse?q=b").is_none());
        assert!(take_nav_matching(&s, "/browse", "/browse?q=a").is_none());

        save_nav(&s, "/browse", &snap("/browse?q=a"));
        assert!(take_nav_matching(&s, "/browse", "/browse?q=a").is_some());
        assert!(take_nav_matching(&s, "/browse", "/browse?q=a").is_none());
    }

    #[test]
    fn scroll_offsets_are_take_once() {
        let s = SessionStore::new();
        save_scroll(&s, "/browse", 900);
        assert_eq!(take_scroll(&s, "/browse").map(|x| x.offset), Some(900));
        assert!(take_scroll(&s, "/browse").is_none());
    }
}
