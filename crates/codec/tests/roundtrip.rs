use kagami_codec::FilterCodec;
use kagami_core::facet::{apply_facets, facets_from_state};
use kagami_core::{
    Axis, EntityKind, FacetMode, FilterDefaults, FilterState, IdList, RangeAxis, SelectedFacet,
    Slot, SortDir, SortKey, SpoilerLevel,
};
use proptest::prelude::*;

fn slot() -> impl Strategy<Value = Slot<IdList>> {
    prop_oneof![
        Just(Slot::Unset),
        Just(Slot::Cleared),
        prop::collection::vec("[a-z]{2,4}", 0..4).prop_map(|v| Slot::Set(IdList::from_ids(v))),
    ]
}

fn range() -> impl Strategy<Value = (Option<u32>, Option<u32>)> {
    (prop::option::of(0u32..3000), prop::option::of(0u32..3000))
}

fn facet() -> impl Strategy<Value = SelectedFacet> {
    let kind = prop_oneof![Just(EntityKind::Tag), Just(EntityKind::Trait), Just(EntityKind::Staff)];
    let mode = prop_oneof![Just(FacetMode::Include), Just(FacetMode::Exclude)];
    (kind, 1u32..5000, mode, prop::option::of("[A-Za-z0-9 :,%+&=]{1,10}")).prop_map(
        |(kind, n, mode, name)| {
            let f = SelectedFacet::new(kind, format!("{}{}", kind.id_prefix(), n), mode);
            match name {
                Some(name) => f.with_name(name),
                None => f,
            }
        },
    )
}

prop_compose! {
    fn state()(
        query in prop::option::of("[a-z ]{0,12}"),
        first_char in prop::option::of("[a-z0-9]"),
        sort in prop_oneof![Just(SortKey::Rating), Just(SortKey::Released), Just(SortKey::Votes), Just(SortKey::Title)],
        dir in prop_oneof![Just(SortDir::Asc), Just(SortDir::Desc)],
        page in 1u32..60,
        limit in 1u32..=100,
        axes in prop::collection::vec((slot(), slot()), Axis::COUNT),
        ranges in prop::collection::vec(range(), RangeAxis::COUNT),
        children in any::<bool>(),
        spoiler in 0u8..3,
    ) -> FilterState {
        let mut s = FilterState::default();
        s.query = query;
        s.first_char = first_char.and_then(|c| c.chars().next());
        s.sort = sort;
        s.sort_dir = dir;
        s.page = page;
        s.limit = limit;
        for (axis, (inc, exc)) in Axis::ALL.into_iter().zip(axes) {
            s.axis_mut(axis).include = inc;
            s.axis_mut(axis).exclude = exc;
        }
        for (axis, (lo, hi)) in RangeAxis::ALL.into_iter().zip(ranges) {
            s.range_mut(axis).min = lo;
            s.range_mut(axis).max = hi;
        }
        s.include_children = children;
        s.spoiler = SpoilerLevel::from_u8(spoiler).unwrap_or(SpoilerLevel::Hide);
        s
    }
}

fn defaults() -> FilterDefaults {
    FilterDefaults::default().with_axis_include(Axis::Language, IdList::parse("en,ja"))
}

proptest! {
    #[test]
    fn decode_inverts_encode(mut s in state(), facets in prop::collection::vec(facet(), 0..6)) {
        let d = defaults();
        let codec = FilterCodec::new(d.clone());
        apply_facets(&mut s, &facets);
        let expected = s.normalized(&d);
        let expected_facets = facets_from_state(&expected, &facets);

        let decoded = codec.decode(&codec.encode(&s, &facets));
        prop_assert_eq!(&decoded.state, &expected);
        prop_assert_eq!(&decoded.facets, &expected_facets);
    }

    #[test]
    fn encoding_is_canonical(s in state()) {
        let d = defaults();
        let codec = FilterCodec::new(d.clone());
        let once = codec.encode(&s, &[]);
        let twice = codec.encode(&codec.decode(&once).state, &[]);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn decode_never_panics(raw in ".{0,80}") {
        let codec = FilterCodec::new(defaults());
        let out = codec.decode(&raw);
        prop_assert!(out.state.page >= 1);
        prop_assert!(out.state.limit >= 1 && out.state.limit <= 100);
    }
}
