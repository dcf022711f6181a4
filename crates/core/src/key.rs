#![forbid(unsafe_code)]

use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};

use crate::facet::EntityKind;
use crate::filter::{Axis, FilterDefaults, FilterState, IdList, RangeAxis};

/// Canonical identity of a query, used to address cached results.
///
/// Derived from the normalized state with defaults resolved and id lists sorted, so
/// semantically equal states map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn derive(state: &FilterState, d: &FilterDefaults) -> Self {
        let s = state.normalized(d);
        let mut out = String::with_capacity(128);
        let _ = write!(out, "q={:?};", s.query.as_deref().unwrap_or(""));
        if let Some(c) = s.first_char {
            let _ = write!(out, "fc={};", c);
        }
        let _ = write!(out, "s={}.{};p={};l={};", s.sort.as_str(), s.sort_dir.as_str(), s.page, s.limit);
        for axis in Axis::ALL {
            let inc = s.effective_include(axis, d);
            let exc = s.effective_exclude(axis, d);
            if inc.is_none() && exc.is_none() {
                continue;
            }
            let _ = write!(out, "{}=+{}-{};", axis.param(), sorted(inc), sorted(exc));
        }
        for axis in RangeAxis::ALL {
            let r = s.range(axis);
            if r.is_unset() {
                continue;
            }
            let lo = r.min.map(|v| v.to_string()).unwrap_or_default();
            let hi = r.max.map(|v| v.to_string()).unwrap_or_default();
            let _ = write!(out, "{}={}..{};", axis.min_param(), lo, hi);
        }
        let _ = write!(out, "ch={};sp={};", u8::from(s.include_children), s.spoiler.as_u8());
        for kind in EntityKind::ALL {
            let e = s.entity(kind);
            if e.is_empty() {
                continue;
            }
            let _ = write!(
                out,
                "{}=+{}-{};",
                kind.as_str(),
                sorted(Some(&e.include)),
                sorted(Some(&e.exclude))
            );
        }
        QueryKey(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn sorted(list: Option<&IdList>) -> String {
    list.map(|l| l.sorted().join(",")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Slot;

    #[test]
    fn equal_semantics_equal_keys() {
        let d = FilterDefaults::default().with_axis_include(Axis::Language, IdList::parse("en"));
        let a = FilterState::new(&d);
        let mut b = FilterState::new(&d);
        b.axis_mut(Axis::Language).include = Slot::Set(IdList::parse("en"));
        b.query = Some("   ".into());
        assert_eq!(QueryKey::derive(&a, &d), QueryKey::derive(&b, &d));

        let mut c = FilterState::new(&d);
        c.axis_mut(Axis::Platform).include = Slot::Set(IdList::parse("win,lin"));
        let mut e = FilterState::new(&d);
        e.axis_mut(Axis::Platform).include = Slot::Set(IdList::parse("lin,win"));
        assert_eq!(QueryKey::derive(&c, &d), QueryKey::derive(&e, &d));
    }

    #[test]
    fn cleared_default_changes_key() {
        let d = FilterDefaults::default().with_axis_include(Axis::Language, IdList::parse("en"));
        let a = FilterState::new(&d);
        let mut b = FilterState::new(&d);
        b.axis_mut(Axis::Language).include = Slot::Cleared;
        assert_ne!(QueryKey::derive(&a, &d), QueryKey::derive(&b, &d));
    }

    #[test]
    fn page_is_part_of_identity() {
        let d = FilterDefaults::default();
        let s = FilterState::new(&d);
        assert_ne!(QueryKey::derive(&s, &d), QueryKey::derive(&s.with_page(2), &d));
    }
}
