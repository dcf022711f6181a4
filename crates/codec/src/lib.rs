//! Kagami codec: maps `FilterState` + facets to the shareable query string and back.
//!
//! Encoding omits fields equal to their default and writes entity facets as
//! `kind:id:name` triples. Decoding never fails: bad values fall back to defaults and a
//! malformed facet list decodes as empty.

#![forbid(unsafe_code)]

use kagami_core::facet::{apply_facets, facets_from_state};
use kagami_core::{
    Axis, EntityKind, FacetMode, FilterDefaults, FilterState, IdList, RangeAxis, SelectedFacet,
    Slot, SortDir, SortKey, SpoilerLevel,
};
use once_cell::sync::Lazy;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use regex::Regex;
use tracing::debug;

/// Characters escaped inside a facet display name (segment and list separators).
const NAME_SET: &AsciiSet = &CONTROLS.add(b'%').add(b':').add(b',');

static ENTITY_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][1-9][0-9]{0,8}$").unwrap());

pub const P_QUERY: &str = "q";
pub const P_FIRST_CHAR: &str = "fc";
pub const P_SORT: &str = "s";
pub const P_ORDER: &str = "o";
pub const P_PAGE: &str = "p";
pub const P_LIMIT: &str = "l";
pub const P_CHILDREN: &str = "children";
pub const P_SPOILER: &str = "spoil";
pub const P_FACETS: &str = "facets";
pub const P_EXCLUDE_FACETS: &str = "exclude_facets";

/// Result of decoding a query string.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub state: FilterState,
    pub facets: Vec<SelectedFacet>,
}

impl Decoded {
    /// True when some facet arrived as a bare id and still needs a name lookup.
    pub fn needs_names(&self) -> bool {
        self.facets.iter().any(|f| !f.is_resolved())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilterCodec {
    defaults: FilterDefaults,
}

impl FilterCodec {
    pub fn new(defaults: FilterDefaults) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &FilterDefaults {
        &self.defaults
    }

    pub fn encode(&self, state: &FilterState, facets: &[SelectedFacet]) -> String {
        let d = &self.defaults;
        let s = state.normalized(d);
        let facets = facets_from_state(&s, facets);
        let mut ser = form_urlencoded::Serializer::new(String::new());
        if let Some(q) = &s.query {
            ser.append_pair(P_QUERY, q);
        }
        if let Some(c) = s.first_char {
            ser.append_pair(P_FIRST_CHAR, c.encode_utf8(&mut [0u8; 4]));
        }
        if s.sort != d.sort {
            ser.append_pair(P_SORT, s.sort.as_str());
        }
        if s.sort_dir != d.sort_dir {
            ser.append_pair(P_ORDER, s.sort_dir.as_str());
        }
        if s.page != 1 {
            ser.append_pair(P_PAGE, &s.page.to_string());
        }
        if s.limit != d.limit {
            ser.append_pair(P_LIMIT, &s.limit.to_string());
        }
        for axis in Axis::ALL {
            let a = s.axis(axis);
            append_slot(&mut ser, axis.param(), &a.include);
            append_slot(&mut ser, axis.exclude_param(), &a.exclude);
        }
        for axis in RangeAxis::ALL {
            let r = s.range(axis);
            if let Some(v) = r.min {
                ser.append_pair(axis.min_param(), &v.to_string());
            }
            if let Some(v) = r.max {
                ser.append_pair(axis.max_param(), &v.to_string());
            }
        }
        if s.include_children != d.include_children {
            ser.append_pair(P_CHILDREN, if s.include_children { "1" } else { "0" });
        }
        if s.spoiler != d.spoiler {
            ser.append_pair(P_SPOILER, &s.spoiler.as_u8().to_string());
        }
        for (param, mode) in [(P_FACETS, FacetMode::Include), (P_EXCLUDE_FACETS, FacetMode::Exclude)] {
            let segs: Vec<String> = facets.iter().filter(|f| f.mode == mode).map(encode_facet).collect();
            if !segs.is_empty() {
                ser.append_pair(param, &segs.join(","));
            }
        }
        ser.finish()
    }

    /// Decode a query string (a leading `?`, a full URL or a `#fragment` are tolerated).
    pub fn decode(&self, query: &str) -> Decoded {
        let d = &self.defaults;
        let raw = query.split_once('?').map(|(_, q)| q).unwrap_or(query);
        let raw = raw.split('#').next().unwrap_or("");
        let mut s = FilterState::new(d);
        let mut named: Vec<SelectedFacet> = Vec::new();
        let mut bare: Vec<SelectedFacet> = Vec::new();
        for (k, v) in form_urlencoded::parse(raw.as_bytes()) {
            match k.as_ref() {
                P_QUERY => s.query = Some(v.into_owned()),
                P_FIRST_CHAR => {
                    let mut it = v.chars();
                    s.first_char = match (it.next(), it.next()) {
                        (Some(c), None) => Some(c),
                        _ => None,
                    };
                }
                P_SORT => s.sort = SortKey::parse(&v).unwrap_or(d.sort),
                P_ORDER => s.sort_dir = SortDir::parse(&v).unwrap_or(d.sort_dir),
                P_PAGE => s.page = v.parse().unwrap_or(1),
                P_LIMIT => s.limit = v.parse().unwrap_or(d.limit),
                P_CHILDREN => {
                    s.include_children = match v.as_ref() {
                        "0" | "false" => false,
                        "1" | "true" => true,
                        _ => d.include_children,
                    }
                }
                P_SPOILER => {
                    s.spoiler = v
                        .parse::<u8>()
                        .ok()
                        .and_then(SpoilerLevel::from_u8)
                        .unwrap_or(d.spoiler)
                }
                P_FACETS => named.extend(parse_facets(&v, FacetMode::Include)),
                P_EXCLUDE_FACETS => named.extend(parse_facets(&v, FacetMode::Exclude)),
                other => apply_param(&mut s, &mut bare, other, &v),
            }
        }
        named.extend(bare);
        apply_facets(&mut s, &named);
        s.normalize(d);
        let facets = facets_from_state(&s, &named);
        Decoded { state: s, facets }
    }
}

fn append_slot(ser: &mut form_urlencoded::Serializer<'_, String>, param: &str, slot: &Slot<IdList>) {
    match slot {
        Slot::Unset => {}
        Slot::Cleared => {
            ser.append_pair(param, "");
        }
        Slot::Set(v) => {
            ser.append_pair(param, &v.joined());
        }
    }
}

fn apply_param(s: &mut FilterState, bare: &mut Vec<SelectedFacet>, key: &str, v: &str) {
    for axis in Axis::ALL {
        if key == axis.param() {
            s.axis_mut(axis).include = Slot::Set(IdList::parse(v));
            return;
        }
        if key == axis.exclude_param() {
            s.axis_mut(axis).exclude = Slot::Set(IdList::parse(v));
            return;
        }
    }
    for axis in RangeAxis::ALL {
        if key == axis.min_param() {
            s.range_mut(axis).min = v.parse().ok();
            return;
        }
        if key == axis.max_param() {
            s.range_mut(axis).max = v.parse().ok();
            return;
        }
    }
    let (mode, kind_str) = match key.strip_prefix("exclude_") {
        Some(rest) => (FacetMode::Exclude, rest),
        None => (FacetMode::Include, key),
    };
    if let Some(kind) = EntityKind::parse(kind_str) {
        for id in IdList::parse(v).iter() {
            if valid_id(kind, id) {
                bare.push(SelectedFacet::new(kind, id, mode));
            } else {
                debug!(param = %key, id = %id, "codec: dropping invalid entity id");
            }
        }
        return;
    }
    debug!(param = %key, "codec: ignoring unknown parameter");
}

fn valid_id(kind: EntityKind, id: &str) -> bool {
    id.starts_with(kind.id_prefix()) && ENTITY_ID.is_match(id)
}

fn encode_facet(f: &SelectedFacet) -> String {
    match &f.display_name {
        Some(name) => format!("{}:{}:{}", f.kind.as_str(), f.id, utf8_percent_encode(name, NAME_SET)),
        None => format!("{}:{}", f.kind.as_str(), f.id),
    }
}

/// Parse a comma-joined facet list. Any malformed segment rejects the whole list.
fn parse_facets(raw: &str, mode: FacetMode) -> Vec<SelectedFacet> {
    if raw.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    for seg in raw.split(',') {
        match parse_facet(seg, mode) {
            Some(f) => out.push(f),
            None => {
                debug!(segment = %seg, "codec: malformed facet segment; list dropped");
                return Vec::new();
            }
        }
    }
    out
}

fn parse_facet(seg: &str, mode: FacetMode) -> Option<SelectedFacet> {
    let mut parts = seg.splitn(3, ':');
    let kind = EntityKind::parse(parts.next()?)?;
    let id = parts.next()?;
    if !valid_id(kind, id) {
        return None;
    }
    let facet = SelectedFacet::new(kind, id, mode);
    match parts.next() {
        Some(name) => {
            let name = percent_decode_str(name).decode_utf8().ok()?;
            Some(facet.with_name(name.into_owned()))
        }
        None => Some(facet),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(q: &str) -> Vec<(String, String)> {
        form_urlencoded::parse(q.as_bytes()).into_owned().collect()
    }

    #[test]
    fn defaults_encode_to_empty_string() {
        let codec = FilterCodec::default();
        assert_eq!(codec.encode(&FilterState::default(), &[]), "");
    }

    #[test]
    fn exclude_only_writes_explicit_empty_include() {
        let codec = FilterCodec::default();
        let mut s = FilterState::default();
        s.axis_mut(Axis::Platform).exclude = Slot::Set(IdList::parse("win"));
        let q = codec.encode(&s, &[]);
        let p = pairs(&q);
        assert!(p.contains(&("platform".to_string(), String::new())));
        assert!(p.contains(&("exclude_platform".to_string(), "win".to_string())));

        let back = codec.decode(&q);
        let d = codec.defaults();
        assert_eq!(back.state.axis(Axis::Platform).include, Slot::Cleared);
        assert_eq!(back.state.effective_include(Axis::Platform, d), None);
        assert_eq!(
            back.state.effective_exclude(Axis::Platform, d).map(|l| l.joined()),
            Some("win".to_string())
        );
    }

    #[test]
    fn explicit_empty_blocks_default_on_reload() {
        let d = FilterDefaults::default().with_axis_include(Axis::Language, IdList::parse("ja"));
        let codec = FilterCodec::new(d.clone());
        let mut s = FilterState::new(&d);
        s.axis_mut(Axis::Language).exclude = Slot::Set(IdList::parse("zh"));
        let back = codec.decode(&codec.encode(&s, &[]));
        assert_eq!(back.state.effective_include(Axis::Language, &d), None);

        let plain = codec.decode("");
        assert_eq!(plain.state.effective_include(Axis::Language, &d).map(|l| l.joined()), Some("ja".into()));
    }

    #[test]
    fn facet_triples_carry_names() {
        let codec = FilterCodec::default();
        let facets = vec![
            SelectedFacet::new(EntityKind::Tag, "g12", FacetMode::Include).with_name("Slice, of: Life"),
            SelectedFacet::new(EntityKind::Staff, "s9", FacetMode::Exclude).with_name("100% Orange"),
        ];
        let mut s = FilterState::default();
        apply_facets(&mut s, &facets);
        let q = codec.encode(&s, &facets);
        let back = codec.decode(&q);
        assert_eq!(back.facets, facets);
        assert!(!back.needs_names());
    }

    #[test]
    fn bare_ids_decode_unresolved() {
        let codec = FilterCodec::default();
        let back = codec.decode("?tag=g1,g2&exclude_trait=i5&staff=bogus");
        assert_eq!(back.state.entity(EntityKind::Tag).include.joined(), "g1,g2");
        assert_eq!(back.state.entity(EntityKind::Trait).exclude.joined(), "i5");
        assert!(back.state.entity(EntityKind::Staff).is_empty());
        assert_eq!(back.facets.len(), 3);
        assert!(back.needs_names());
    }

    #[test]
    fn malformed_facets_yield_empty_list_not_failure() {
        let codec = FilterCodec::default();
        let back = codec.decode("q=fate&facets=tag:g1:Ok,nonsense&p=3");
        assert!(back.facets.is_empty());
        assert_eq!(back.state.query.as_deref(), Some("fate"));
        assert_eq!(back.state.page, 3);
    }

    #[test]
    fn junk_values_fall_back_to_defaults() {
        let codec = FilterCodec::default();
        let d = codec.defaults().clone();
        let back = codec.decode("https://example.org/v?p=zero&l=-4&s=nope&spoil=9&min_year=abc#top");
        assert_eq!(back.state, FilterState::new(&d));
    }
}
