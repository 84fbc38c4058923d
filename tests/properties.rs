//! Property-based tests: round-trip laws, distance metric invariants,
//! and hash validity over random inputs.

use proptest::prelude::*;

use synapsedb::vector::distance::{cosine_distance, euclidean_distance, manhattan_distance};
use synapsedb::storage::{is_null_hash, is_valid_hash, NULL_HASH};
use synapsedb::{Config, NewNoun, NounType, SynapseDB};

const DIM: usize = 8;

fn open_db() -> SynapseDB {
    SynapseDB::open_in_memory(Config {
        dimensions: DIM,
        ..Config::for_testing()
    })
    .unwrap()
}

fn finite_vector() -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-100.0f32..100.0, DIM)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Saved vectors read back exactly, at the configured dimension.
    #[test]
    fn prop_noun_vector_roundtrip(vector in finite_vector()) {
        let db = open_db();
        let id = db
            .add_noun(NewNoun::from_vector(vector.clone(), NounType::Concept))
            .unwrap();
        let noun = db.get_noun(id).unwrap().unwrap();
        prop_assert_eq!(noun.vector.len(), DIM);
        prop_assert_eq!(noun.vector, vector);
        db.close().unwrap();
    }

    /// Euclidean distance satisfies the triangle inequality.
    #[test]
    fn prop_euclidean_triangle_inequality(
        a in finite_vector(),
        b in finite_vector(),
        c in finite_vector(),
    ) {
        let ab = euclidean_distance(&a, &b);
        let bc = euclidean_distance(&b, &c);
        let ac = euclidean_distance(&a, &c);
        // Small epsilon for f32 accumulation
        prop_assert!(ac <= ab + bc + 1e-3);
    }

    /// Distances are symmetric and zero on identical inputs.
    #[test]
    fn prop_distances_symmetric(a in finite_vector(), b in finite_vector()) {
        prop_assert!((euclidean_distance(&a, &b) - euclidean_distance(&b, &a)).abs() < 1e-5);
        prop_assert!((manhattan_distance(&a, &b) - manhattan_distance(&b, &a)).abs() < 1e-3);
        prop_assert!((cosine_distance(&a, &b) - cosine_distance(&b, &a)).abs() < 1e-5);
        prop_assert!(euclidean_distance(&a, &a) < 1e-6);
    }

    /// Distances are never negative.
    #[test]
    fn prop_distances_non_negative(a in finite_vector(), b in finite_vector()) {
        prop_assert!(euclidean_distance(&a, &b) >= 0.0);
        prop_assert!(manhattan_distance(&a, &b) >= 0.0);
        prop_assert!(cosine_distance(&a, &b) >= 0.0);
    }

    /// A string validates as a content hash iff it is 64 lowercase hex
    /// characters and not the null sentinel.
    #[test]
    fn prop_hash_validity(hash in "[a-f0-9]{64}") {
        if hash == NULL_HASH {
            prop_assert!(!is_valid_hash(&hash));
            prop_assert!(is_null_hash(&hash));
        } else {
            prop_assert!(is_valid_hash(&hash));
            prop_assert!(!is_null_hash(&hash));
        }
    }

    /// Strings of the wrong shape never validate.
    #[test]
    fn prop_malformed_hashes_rejected(hash in "[a-zA-Z0-9]{0,63}") {
        prop_assert!(!is_valid_hash(&hash));
    }

    /// Live per-type counts always sum to the live total.
    #[test]
    fn prop_type_counts_sum_to_total(
        type_picks in proptest::collection::vec(0usize..31, 1..12),
    ) {
        let db = open_db();
        for (i, pick) in type_picks.iter().enumerate() {
            let vector: Vec<f32> = (0..DIM).map(|d| (i + d) as f32 * 0.1).collect();
            db.add_noun(NewNoun::from_vector(vector, NounType::ALL[*pick]))
                .unwrap();
        }
        let report = db.get_statistics(&Default::default()).unwrap();
        let by_type: u64 = report.statistics.noun_counts.iter().map(|&c| c as u64).sum();
        prop_assert_eq!(by_type, report.statistics.total_nouns());
        prop_assert_eq!(by_type, type_picks.len() as u64);
        db.close().unwrap();
    }
}
