//! Filter state: the canonical in-memory form of the active catalog query.
//!
//! Categorical axes distinguish "use the default" from "the user cleared the default"
//! through [`Slot`]; everything else stores resolved values and is compared against
//! [`FilterDefaults`] when encoding.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::facet::EntityKind;

/// Three-way setting for a categorical list.
///
/// `Unset` defers to the configured default, `Cleared` means the user removed the
/// default explicitly, `Set` carries a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot<T> {
    Unset,
    Cleared,
    Set(T),
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot::Unset
    }
}

impl<T> Slot<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, Slot::Unset)
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            Slot::Set(v) => Some(v),
            _ => None,
        }
    }

    /// Resolve against a default: `Unset` falls back, `Cleared` yields nothing.
    pub fn effective<'a>(&'a self, default: Option<&'a T>) -> Option<&'a T> {
        match self {
            Slot::Unset => default,
            Slot::Cleared => None,
            Slot::Set(v) => Some(v),
        }
    }
}

/// Ordered, de-duplicated list of identifiers; serialized as a comma-joined string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IdList(SmallVec<[String; 4]>);

impl IdList {
    /// Parse a comma-joined list. Blank segments are dropped, duplicates keep first position.
    pub fn parse(raw: &str) -> Self {
        Self::from_ids(raw.split(','))
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = IdList::default();
        for id in ids {
            out.push(id.as_ref());
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|s| s == id)
    }

    /// Append an id; returns false for blanks and duplicates.
    pub fn push(&mut self, id: &str) -> bool {
        let id = id.trim();
        if id.is_empty() || self.contains(id) {
            return false;
        }
        self.0.push(id.to_string());
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|s| s != id);
        self.0.len() != before
    }

    pub fn joined(&self) -> String {
        self.0.join(",")
    }

    /// Sorted view used for identity keys (order in the URL is cosmetic).
    pub fn sorted(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.iter().collect();
        v.sort_unstable();
        v
    }
}

/// Categorical axes that carry include/exclude lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    Language,
    Platform,
    Length,
    AgeRating,
    DevStatus,
}

impl Axis {
    pub const COUNT: usize = 5;
    pub const ALL: [Axis; Axis::COUNT] = [
        Axis::Language,
        Axis::Platform,
        Axis::Length,
        Axis::AgeRating,
        Axis::DevStatus,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn param(self) -> &'static str {
        match self {
            Axis::Language => "olang",
            Axis::Platform => "platform",
            Axis::Length => "length",
            Axis::AgeRating => "age",
            Axis::DevStatus => "devstatus",
        }
    }

    pub fn exclude_param(self) -> &'static str {
        match self {
            Axis::Language => "exclude_olang",
            Axis::Platform => "exclude_platform",
            Axis::Length => "exclude_length",
            Axis::AgeRating => "exclude_age",
            Axis::DevStatus => "exclude_devstatus",
        }
    }
}

/// Include/exclude pair for one categorical axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AxisFilter {
    pub include: Slot<IdList>,
    pub exclude: Slot<IdList>,
}

/// Configured default lists for one axis.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AxisDefault {
    pub include: Option<IdList>,
    pub exclude: Option<IdList>,
}

impl AxisFilter {
    pub fn is_unset(&self) -> bool {
        self.include.is_unset() && self.exclude.is_unset()
    }

    /// Collapse equivalent encodings into one canonical form.
    ///
    /// An exclude list next to an `Unset` include turns the include into `Cleared`:
    /// the user filtered by exclusion only, and a reload must not reapply the default
    /// include.
    pub fn normalize(&mut self, d: &AxisDefault) {
        if matches!(&self.include, Slot::Set(v) if v.is_empty()) {
            self.include = Slot::Cleared;
        }
        if matches!(&self.exclude, Slot::Set(v) if v.is_empty()) {
            self.exclude = Slot::Cleared;
        }
        match &self.exclude {
            Slot::Set(v) if d.exclude.as_ref() == Some(v) => self.exclude = Slot::Unset,
            Slot::Cleared if d.exclude.is_none() => self.exclude = Slot::Unset,
            _ => {}
        }
        if matches!(self.exclude, Slot::Set(_)) {
            if self.include.is_unset() {
                self.include = Slot::Cleared;
            }
            return;
        }
        match &self.include {
            Slot::Set(v) if d.include.as_ref() == Some(v) => self.include = Slot::Unset,
            Slot::Cleared if d.include.is_none() => self.include = Slot::Unset,
            _ => {}
        }
    }
}

/// Numeric range axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RangeAxis {
    Year,
    Rating,
    Votes,
}

impl RangeAxis {
    pub const COUNT: usize = 3;
    pub const ALL: [RangeAxis; RangeAxis::COUNT] =
        [RangeAxis::Year, RangeAxis::Rating, RangeAxis::Votes];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn min_param(self) -> &'static str {
        match self {
            RangeAxis::Year => "min_year",
            RangeAxis::Rating => "min_rating",
            RangeAxis::Votes => "min_votes",
        }
    }

    pub fn max_param(self) -> &'static str {
        match self {
            RangeAxis::Year => "max_year",
            RangeAxis::Rating => "max_rating",
            RangeAxis::Votes => "max_votes",
        }
    }
}

/// Independent lower/upper bound; either may be unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RangeFilter {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

impl RangeFilter {
    pub fn is_unset(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    fn normalize(&mut self) {
        if let (Some(lo), Some(hi)) = (self.min, self.max) {
            if lo > hi {
                self.min = Some(hi);
                self.max = Some(lo);
            }
        }
    }
}

/// Include/exclude ids for one entity kind (tags, traits, staff).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EntityFilter {
    pub include: IdList,
    pub exclude: IdList,
}

impl EntityFilter {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    fn normalize(&mut self) {
        let include = self.include.clone();
        for id in include.iter() {
            self.exclude.remove(id);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortKey {
    Rating,
    Released,
    Votes,
    Title,
}

impl SortKey {
    pub fn as_str(self) -> &'static str {
        match self {
            SortKey::Rating => "rating",
            SortKey::Released => "released",
            SortKey::Votes => "votes",
            SortKey::Title => "title",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rating" => Some(SortKey::Rating),
            "released" => Some(SortKey::Released),
            "votes" => Some(SortKey::Votes),
            "title" => Some(SortKey::Title),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDir::Asc => "asc",
            SortDir::Desc => "desc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Some(SortDir::Asc),
            "desc" => Some(SortDir::Desc),
            _ => None,
        }
    }
}

/// How much spoiler content tag/trait chips and results may reveal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpoilerLevel {
    Hide,
    Minor,
    All,
}

impl SpoilerLevel {
    pub fn as_u8(self) -> u8 {
        match self {
            SpoilerLevel::Hide => 0,
            SpoilerLevel::Minor => 1,
            SpoilerLevel::All => 2,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(SpoilerLevel::Hide),
            1 => Some(SpoilerLevel::Minor),
            2 => Some(SpoilerLevel::All),
            _ => None,
        }
    }
}

/// Upper bound for page size accepted from a URL.
pub const MAX_LIMIT: u32 = 100;

/// Documented defaults. Fields equal to these are omitted from the shareable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDefaults {
    pub sort: SortKey,
    pub sort_dir: SortDir,
    pub limit: u32,
    pub include_children: bool,
    pub spoiler: SpoilerLevel,
    pub axes: [AxisDefault; Axis::COUNT],
}

impl Default for FilterDefaults {
    fn default() -> Self {
        Self {
            sort: SortKey::Rating,
            sort_dir: SortDir::Desc,
            limit: 24,
            include_children: true,
            spoiler: SpoilerLevel::Hide,
            axes: Default::default(),
        }
    }
}

impl FilterDefaults {
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.clamp(1, MAX_LIMIT);
        self
    }

    pub fn with_axis_include(mut self, axis: Axis, ids: IdList) -> Self {
        self.axes[axis.index()].include = Some(ids);
        self
    }

    pub fn axis(&self, axis: Axis) -> &AxisDefault {
        &self.axes[axis.index()]
    }
}

/// The active query: text, categorical, range and entity filters, sort and pagination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterState {
    pub query: Option<String>,
    pub first_char: Option<char>,
    pub sort: SortKey,
    pub sort_dir: SortDir,
    pub page: u32,
    pub limit: u32,
    pub axes: [AxisFilter; Axis::COUNT],
    pub ranges: [RangeFilter; RangeAxis::COUNT],
    pub include_children: bool,
    pub spoiler: SpoilerLevel,
    pub entities: [EntityFilter; EntityKind::COUNT],
}

impl Default for FilterState {
    fn default() -> Self {
        Self::new(&FilterDefaults::default())
    }
}

impl FilterState {
    /// Fresh state at the documented defaults, first page.
    pub fn new(d: &FilterDefaults) -> Self {
        Self {
            query: None,
            first_char: None,
            sort: d.sort,
            sort_dir: d.sort_dir,
            page: 1,
            limit: d.limit,
            axes: Default::default(),
            ranges: Default::default(),
            include_children: d.include_children,
            spoiler: d.spoiler,
            entities: Default::default(),
        }
    }

    pub fn axis(&self, axis: Axis) -> &AxisFilter {
        &self.axes[axis.index()]
    }

    pub fn axis_mut(&mut self, axis: Axis) -> &mut AxisFilter {
        &mut self.axes[axis.index()]
    }

    pub fn range(&self, axis: RangeAxis) -> &RangeFilter {
        &self.ranges[axis.index()]
    }

    pub fn range_mut(&mut self, axis: RangeAxis) -> &mut RangeFilter {
        &mut self.ranges[axis.index()]
    }

    pub fn entity(&self, kind: EntityKind) -> &EntityFilter {
        &self.entities[kind.index()]
    }

    pub fn entity_mut(&mut self, kind: EntityKind) -> &mut EntityFilter {
        &mut self.entities[kind.index()]
    }

    pub fn effective_include<'a>(&'a self, axis: Axis, d: &'a FilterDefaults) -> Option<&'a IdList> {
        self.axis(axis).include.effective(d.axis(axis).include.as_ref())
    }

    pub fn effective_exclude<'a>(&'a self, axis: Axis, d: &'a FilterDefaults) -> Option<&'a IdList> {
        self.axis(axis).exclude.effective(d.axis(axis).exclude.as_ref())
    }

    pub fn normalize(&mut self, d: &FilterDefaults) {
        self.query = self
            .query
            .take()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty());
        self.first_char = self
            .first_char
            .map(|c| c.to_ascii_lowercase())
            .filter(|c| c.is_ascii_alphanumeric());
        self.page = self.page.max(1);
        self.limit = if self.limit == 0 { d.limit } else { self.limit.min(MAX_LIMIT) };
        for axis in Axis::ALL {
            self.axes[axis.index()].normalize(d.axis(axis));
        }
        for r in self.ranges.iter_mut() {
            r.normalize();
        }
        for e in self.entities.iter_mut() {
            e.normalize();
        }
    }

    pub fn normalized(&self, d: &FilterDefaults) -> Self {
        let mut out = self.clone();
        out.normalize(d);
        out
    }

    /// Same query on another page.
    pub fn with_page(&self, page: u32) -> Self {
        let mut out = self.clone();
        out.page = page.max(1);
        out
    }

    /// Whether `other` differs from `self` only by page number.
    pub fn same_except_page(&self, other: &FilterState) -> bool {
        self.with_page(1) == other.with_page(1)
    }

    /// Number of user-visible active filters (chips), excluding sort and pagination.
    pub fn active_filters(&self) -> usize {
        let mut n = usize::from(self.query.is_some()) + usize::from(self.first_char.is_some());
        n += self.axes.iter().filter(|a| !a.is_unset()).count();
        n += self.ranges.iter().filter(|r| !r.is_unset()).count();
        n += self
            .entities
            .iter()
            .map(|e| e.include.len() + e.exclude.len())
            .sum::<usize>();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_list_parse_trims_and_dedupes() {
        let l = IdList::parse(" win, lin ,,win,mac ");
        assert_eq!(l.joined(), "win,lin,mac");
        assert_eq!(l.sorted(), vec!["lin", "mac", "win"]);
    }

    #[test]
    fn exclude_only_clears_include() {
        let d = FilterDefaults::default();
        let mut s = FilterState::new(&d);
        s.axis_mut(Axis::Platform).exclude = Slot::Set(IdList::parse("win"));
        s.normalize(&d);
        assert_eq!(s.axis(Axis::Platform).include, Slot::Cleared);
        assert_eq!(s.effective_include(Axis::Platform, &d), None);
    }

    #[test]
    fn include_equal_to_default_collapses() {
        let d = FilterDefaults::default().with_axis_include(Axis::Language, IdList::parse("en"));
        let mut s = FilterState::new(&d);
        s.axis_mut(Axis::Language).include = Slot::Set(IdList::parse("en"));
        s.normalize(&d);
        assert!(s.axis(Axis::Language).include.is_unset());
        assert_eq!(s.effective_include(Axis::Language, &d).map(|l| l.joined()), Some("en".into()));
    }

    #[test]
    fn cleared_default_survives_normalize() {
        let d = FilterDefaults::default().with_axis_include(Axis::Language, IdList::parse("en"));
        let mut s = FilterState::new(&d);
        s.axis_mut(Axis::Language).include = Slot::Set(IdList::default());
        s.normalize(&d);
        assert_eq!(s.axis(Axis::Language).include, Slot::Cleared);
        assert_eq!(s.effective_include(Axis::Language, &d), None);
    }

    #[test]
    fn normalize_is_idempotent_and_swaps_ranges() {
        let d = FilterDefaults::default();
        let mut s = FilterState::new(&d);
        s.query = Some("  fate  ".into());
        s.page = 0;
        s.range_mut(RangeAxis::Year).min = Some(2010);
        s.range_mut(RangeAxis::Year).max = Some(2001);
        let once = s.normalized(&d);
        assert_eq!(once.query.as_deref(), Some("fate"));
        assert_eq!(once.page, 1);
        assert_eq!(once.range(RangeAxis::Year).min, Some(2001));
        assert_eq!(once.normalized(&d), once);
    }

    #[test]
    fn page_only_difference_detected() {
        let s = FilterState::default();
        assert!(s.same_except_page(&s.with_page(4)));
        let mut t = s.with_page(4);
        t.query = Some("x".into());
        assert!(!s.same_except_page(&t));
    }
}
