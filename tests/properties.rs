//! Property tests for slugs, registry bitmasks and chunk placement.

use heritage_publisher::{ChunkAccumulator, RegistryTable, ResourceId, SlugGenerator};
use proptest::prelude::*;
use std::collections::HashSet;

proptest! {
    #[test]
    fn test_slugs_unique_within_run(
        entries in prop::collection::vec(("[A-Za-z][A-Za-z _]{0,19}", "[a-f0-9]{6,12}"), 1..60)
    ) {
        let mut slugs = SlugGenerator::new();
        let mut seen = HashSet::new();
        for (title, id) in &entries {
            let slug = slugs.to_slug(title, &ResourceId::new(id.as_str()), None).unwrap();
            prop_assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
            prop_assert!(!slug.starts_with('-'));
            prop_assert!(seen.insert(slug));
        }
        prop_assert_eq!(slugs.len(), entries.len());
    }

    #[test]
    fn test_slug_determinism(title in "[A-Za-z][A-Za-z ]{0,30}", id in "[a-f0-9]{8}") {
        let id = ResourceId::new(id);
        let first = SlugGenerator::new().to_slug(&title, &id, None).unwrap();
        let second = SlugGenerator::new().to_slug(&title, &id, None).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_encode_matches_positions(
        names in prop::collection::btree_set("[a-z]{3,8}", 1..20),
        mask in any::<u32>()
    ) {
        let names: Vec<String> = names.into_iter().collect();
        let table = RegistryTable::from_names(&names);
        let mask = u64::from(mask) & ((1u64 << names.len()) - 1);
        let selected: Vec<&str> = names
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, n)| n.as_str())
            .collect();
        prop_assert_eq!(table.encode(&selected), mask);
    }

    #[test]
    fn test_encode_ignores_unknown(names in prop::collection::vec("[a-z]{3,8}", 0..10)) {
        let table = RegistryTable::from_names(["known"]);
        let unknown: Vec<String> = names.into_iter().filter(|n| n != "known").collect();
        prop_assert_eq!(table.encode(&unknown), 0);
        prop_assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_chunks_follow_running_total(
        lengths in prop::collection::vec(0usize..500, 1..50),
        size in 1usize..1000
    ) {
        let mut acc = ChunkAccumulator::new(size);
        let mut total = 0;
        let mut previous = 0;
        for len in lengths {
            total += len;
            let chunk = acc.place("g", len);
            prop_assert_eq!(chunk, total / size);
            prop_assert!(chunk >= previous);
            previous = chunk;
        }
    }
}

#[test]
fn test_encode_example() {
    let table = RegistryTable::from_names(["a", "b", "c"]);
    assert_eq!(table.encode(&["a", "b"]), 3);
    assert_eq!(table.encode(&["d"]), 0);
    assert_eq!(table.len(), 3);
}
