//! Kagami core types: filter state, facets, query keys and catalog results.
//! Pure data; no I/O.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod facet;
pub mod filter;
pub mod key;

pub use facet::{EntityKind, FacetMode, SelectedFacet};
pub use filter::{
    Axis, AxisDefault, AxisFilter, EntityFilter, FilterDefaults, FilterState, IdList, RangeAxis,
    RangeFilter, Slot, SortDir, SortKey, SpoilerLevel,
};
pub use key::QueryKey;

/// One catalog entry as returned by the remote query collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub title: String,
    /// Cover image; drives asset preloading.
    pub image_url: Option<String>,
    pub released: Option<String>,
    /// Bayesian rating scaled by 10 (e.g. 78 = 7.8).
    pub rating: Option<u32>,
    pub votes: u32,
}

/// Stable response shape of a catalog query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QueryResponse {
    pub items: Vec<CatalogItem>,
    pub total: u64,
    pub total_pages: u32,
    pub timing_ms: u64,
}

/// Display density; decides the default page size and how many covers are preloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Density {
    Grid,
    List,
    Table,
}

impl Density {
    pub fn page_size(self) -> u32 {
        match self {
            Density::Grid => 24,
            Density::List => 20,
            Density::Table => 50,
        }
    }

    /// Number of leading items whose assets gate a swap.
    pub fn preload_count(self) -> usize {
        match self {
            Density::Grid => 12,
            Density::List => 6,
            Density::Table => 0,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grid" => Some(Density::Grid),
            "list" => Some(Density::List),
            "table" => Some(Density::Table),
            _ => None,
        }
    }
}

pub mod prelude {
    pub use super::{
        Axis, CatalogItem, Density, EntityKind, FacetMode, FilterDefaults, FilterState, IdList,
        QueryKey, QueryResponse, RangeAxis, SelectedFacet, Slot,
    };
}
