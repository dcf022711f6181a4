//! Selected facets: the user-facing projection of the id-only entity filters.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::filter::FilterState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Tag,
    Trait,
    Staff,
}

impl EntityKind {
    pub const COUNT: usize = 3;
    pub const ALL: [EntityKind; EntityKind::COUNT] =
        [EntityKind::Tag, EntityKind::Trait, EntityKind::Staff];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Tag => "tag",
            EntityKind::Trait => "trait",
            EntityKind::Staff => "staff",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tag" => Some(EntityKind::Tag),
            "trait" => Some(EntityKind::Trait),
            "staff" => Some(EntityKind::Staff),
            _ => None,
        }
    }

    /// Catalog id prefix (`g12` is a tag, `i7` a trait, `s3` a staff entry).
    pub fn id_prefix(self) -> char {
        match self {
            EntityKind::Tag => 'g',
            EntityKind::Trait => 'i',
            EntityKind::Staff => 's',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FacetMode {
    Include,
    Exclude,
}

/// A removable chip for one entity filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectedFacet {
    pub id: String,
    /// `None` until the name has been resolved (links that carried bare ids).
    pub display_name: Option<String>,
    pub mode: FacetMode,
    pub kind: EntityKind,
}

impl SelectedFacet {
    pub fn new(kind: EntityKind, id: impl Into<String>, mode: FacetMode) -> Self {
        Self { id: id.into(), display_name: None, mode, kind }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.display_name = if name.trim().is_empty() { None } else { Some(name) };
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.display_name.is_some()
    }

    /// Chip text; the raw id stands in until a name is known.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    fn same_target(&self, kind: EntityKind, id: &str) -> bool {
        self.kind == kind && self.id == id
    }
}

/// Project the entity filters of `state` into facets, reusing names from `known`.
pub fn facets_from_state(state: &FilterState, known: &[SelectedFacet]) -> Vec<SelectedFacet> {
    let mut out = Vec::new();
    for kind in EntityKind::ALL {
        let ent = state.entity(kind);
        let modes = [(FacetMode::Include, &ent.include), (FacetMode::Exclude, &ent.exclude)];
        for (mode, ids) in modes {
            for id in ids.iter() {
                let name = known
                    .iter()
                    .find(|f| f.same_target(kind, id))
                    .and_then(|f| f.display_name.clone());
                out.push(SelectedFacet { id: id.to_string(), display_name: name, mode, kind });
            }
        }
    }
    out
}

/// Rebuild the entity filters of `state` from a facet list.
pub fn apply_facets(state: &mut FilterState, facets: &[SelectedFacet]) {
    for kind in EntityKind::ALL {
        let ent = state.entity_mut(kind);
        ent.include = Default::default();
        ent.exclude = Default::default();
    }
    for f in facets {
        let ent = state.entity_mut(f.kind);
        match f.mode {
            FacetMode::Include => {
                ent.exclude.remove(&f.id);
                ent.include.push(&f.id);
            }
            FacetMode::Exclude => {
                ent.include.remove(&f.id);
                ent.exclude.push(&f.id);
            }
        }
    }
}

/// Facets still waiting for a display name.
pub fn unresolved(facets: &[SelectedFacet]) -> Vec<(EntityKind, String)> {
    facets
        .iter()
        .filter(|f| !f.is_resolved())
        .map(|f| (f.kind, f.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockstep_keeps_known_names() {
        let facets = vec![
            SelectedFacet::new(EntityKind::Tag, "g12", FacetMode::Include).with_name("Romance"),
            SelectedFacet::new(EntityKind::Trait, "i4", FacetMode::Exclude),
        ];
        let mut state = FilterState::default();
        apply_facets(&mut state, &facets);
        assert_eq!(state.entity(EntityKind::Tag).include.joined(), "g12");
        assert_eq!(state.entity(EntityKind::Trait).exclude.joined(), "i4");

        let back = facets_from_state(&state, &facets);
        assert_eq!(back, facets);
        assert_eq!(unresolved(&back), vec![(EntityKind::Trait, "i4".to_string())]);
    }

    #[test]
    fn later_mode_wins_for_same_id() {
        let facets = vec![
            SelectedFacet::new(EntityKind::Tag, "g1", FacetMode::Include),
            SelectedFacet::new(EntityKind::Tag, "g1", FacetMode::Exclude),
        ];
        let mut state = FilterState::default();
        apply_facets(&mut state, &facets);
        assert!(state.entity(EntityKind::Tag).include.is_empty());
        assert_eq!(state.entity(EntityKind::Tag).exclude.joined(), "g1");
    }
}
