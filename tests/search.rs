//! Integration tests for the vector search surface: ranking, the
//! soft-delete filter, dimension rejection, thresholds, and result
//! monotonicity under growing k.

use synapsedb::{
    Config, MetadataPredicate, NewNoun, NounType, SearchOptions, SynapseDB, MAX_QUERY_LIMIT,
};

const DIM: usize = 8;

fn open_db() -> SynapseDB {
    SynapseDB::open_in_memory(Config {
        dimensions: DIM,
        ..Config::for_testing()
    })
    .unwrap()
}

fn make_vector(seed: u64) -> Vec<f32> {
    (0..DIM)
        .map(|i| (seed as f32 * 0.1 + i as f32 * 0.01).sin())
        .collect()
}

fn seeded_db(seeds: &[u64]) -> (SynapseDB, Vec<synapsedb::NounId>) {
    let db = open_db();
    let ids = seeds
        .iter()
        .map(|&seed| {
            db.add_noun(NewNoun::from_vector(make_vector(seed), NounType::Concept))
                .unwrap()
        })
        .collect();
    (db, ids)
}

#[test]
fn test_insert_and_retrieve_scenario() {
    let db = open_db();
    let vector = vec![0.1; DIM];
    let id = db
        .add_noun(
            NewNoun::from_vector(vector.clone(), NounType::Concept)
                .with_metadata_entry("label", "alpha"),
        )
        .unwrap();

    let noun = db.get_noun(id).unwrap().unwrap();
    assert_eq!(
        noun.metadata.get("label").and_then(|v| v.as_str()),
        Some("alpha")
    );

    let results = db
        .search_vector(
            &vector,
            &SearchOptions {
                limit: 1,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(results.items.len(), 1);
    assert_eq!(results.items[0].noun.id, id);
    db.close().unwrap();
}

#[test]
fn test_results_ranked_by_similarity() {
    let (db, ids) = seeded_db(&(0..20).collect::<Vec<_>>());

    let results = db
        .search_vector(
            &make_vector(10),
            &SearchOptions {
                limit: 5,
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(results.items.len(), 5);
    // The exact match leads, scores descend
    assert_eq!(results.items[0].noun.id, ids[10]);
    for window in results.items.windows(2) {
        assert!(window[0].score >= window[1].score);
    }
    db.close().unwrap();
}

#[test]
fn test_soft_delete_filter_scenario() {
    let db = open_db();
    let vector = make_vector(5);
    let a = db
        .add_noun(NewNoun::from_vector(vector.clone(), NounType::Concept))
        .unwrap();
    let b = db
        .add_noun(NewNoun::from_vector(vector.clone(), NounType::Concept))
        .unwrap();

    db.delete_noun(a).unwrap();

    let results = db
        .search_vector(
            &vector,
            &SearchOptions {
                limit: 10,
                ..Default::default()
            },
        )
        .unwrap();
    let ids: Vec<_> = results.items.iter().map(|h| h.noun.id).collect();
    assert_eq!(ids, vec![b]);

    db.restore_noun(a).unwrap();

    let results = db
        .search_vector(
            &vector,
            &SearchOptions {
                limit: 10,
                ..Default::default()
            },
        )
        .unwrap();
    let ids: Vec<_> = results.items.iter().map(|h| h.noun.id).collect();
    assert!(ids.contains(&a));
    assert!(ids.contains(&b));
    db.close().unwrap();
}

#[test]
fn test_deleted_noun_not_readable_until_restored() {
    let db = open_db();
    let id = db
        .add_noun(NewNoun::from_vector(make_vector(1), NounType::Concept))
        .unwrap();

    db.delete_noun(id).unwrap();
    assert!(db.get_noun(id).unwrap().is_none());

    db.restore_noun(id).unwrap();
    assert!(db.get_noun(id).unwrap().is_some());
    db.close().unwrap();
}

#[test]
fn test_dimension_rejection_scenario() {
    let db = open_db();
    let err = db
        .add_noun(NewNoun::from_vector(vec![0.5, 0.5], NounType::Concept))
        .unwrap_err();
    assert!(err.is_validation());

    // Corpus unchanged
    let report = db.get_statistics(&Default::default()).unwrap();
    assert_eq!(report.storage.noun_count, 0);

    // Query-side rejection too
    let err = db
        .search_vector(&[0.5, 0.5], &Default::default())
        .unwrap_err();
    assert!(err.is_validation());
    db.close().unwrap();
}

#[test]
fn test_search_empty_corpus_returns_empty() {
    let db = open_db();
    let results = db
        .search_vector(&make_vector(1), &Default::default())
        .unwrap();
    assert!(results.items.is_empty());
    assert!(!results.has_more);
    db.close().unwrap();
}

#[test]
fn test_monotonic_results_under_growing_k() {
    let (db, _) = seeded_db(&(0..30).collect::<Vec<_>>());

    let query = make_vector(12);
    let small: Vec<_> = db
        .search_vector(
            &query,
            &SearchOptions {
                limit: 5,
                ..Default::default()
            },
        )
        .unwrap()
        .items
        .into_iter()
        .map(|h| h.noun.id)
        .collect();
    let large: Vec<_> = db
        .search_vector(
            &query,
            &SearchOptions {
                limit: 6,
                ..Default::default()
            },
        )
        .unwrap()
        .items
        .into_iter()
        .map(|h| h.noun.id)
        .collect();

    for id in &small {
        assert!(large.contains(id), "k+1 results must contain k results");
    }
    db.close().unwrap();
}

#[test]
fn test_threshold_filters_weak_hits() {
    let (db, ids) = seeded_db(&[1, 100]);

    let results = db
        .search_vector(
            &make_vector(1),
            &SearchOptions {
                limit: 10,
                threshold: Some(0.99),
                ..Default::default()
            },
        )
        .unwrap();

    let hit_ids: Vec<_> = results.items.iter().map(|h| h.noun.id).collect();
    assert!(hit_ids.contains(&ids[0]));
    assert!(!hit_ids.contains(&ids[1]), "distant vector fails the threshold");
    db.close().unwrap();
}

#[test]
fn test_noun_type_filter() {
    let db = open_db();
    let vector = make_vector(1);
    let person = db
        .add_noun(NewNoun::from_vector(vector.clone(), NounType::Person))
        .unwrap();
    db.add_noun(NewNoun::from_vector(vector.clone(), NounType::Location))
        .unwrap();

    let results = db
        .search_vector(
            &vector,
            &SearchOptions {
                limit: 10,
                noun_type: Some(NounType::Person),
                ..Default::default()
            },
        )
        .unwrap();
    let ids: Vec<_> = results.items.iter().map(|h| h.noun.id).collect();
    assert_eq!(ids, vec![person]);
    db.close().unwrap();
}

#[test]
fn test_item_ids_filter() {
    let (db, ids) = seeded_db(&[1, 2, 3]);

    let results = db
        .search_vector(
            &make_vector(1),
            &SearchOptions {
                limit: 10,
                item_ids: Some(vec![ids[2]]),
                ..Default::default()
            },
        )
        .unwrap();
    let hit_ids: Vec<_> = results.items.iter().map(|h| h.noun.id).collect();
    assert_eq!(hit_ids, vec![ids[2]]);
    db.close().unwrap();
}

#[test]
fn test_metadata_filter_on_search() {
    let db = open_db();
    let vector = make_vector(1);
    let tagged = db
        .add_noun(
            NewNoun::from_vector(vector.clone(), NounType::Document)
                .with_metadata_entry("lang", "rust"),
        )
        .unwrap();
    db.add_noun(
        NewNoun::from_vector(vector.clone(), NounType::Document)
            .with_metadata_entry("lang", "python"),
    )
    .unwrap();

    let results = db
        .search_vector(
            &vector,
            &SearchOptions {
                limit: 10,
                filter: Some(MetadataPredicate::eq("lang", "rust")),
                ..Default::default()
            },
        )
        .unwrap();
    let ids: Vec<_> = results.items.iter().map(|h| h.noun.id).collect();
    assert_eq!(ids, vec![tagged]);
    db.close().unwrap();
}

#[test]
fn test_limit_cap_enforced() {
    let db = open_db();
    let err = db
        .search_vector(
            &make_vector(1),
            &SearchOptions {
                limit: MAX_QUERY_LIMIT + 1,
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("exceeds maximum"));
    db.close().unwrap();
}

#[test]
fn test_cache_coherence_after_write() {
    let db = open_db();
    let vector = make_vector(1);

    let a = db
        .add_noun(NewNoun::from_vector(vector.clone(), NounType::Concept))
        .unwrap();

    // Prime the cache
    let first = db
        .search_vector(
            &vector,
            &SearchOptions {
                limit: 10,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(first.items.len(), 1);

    // A write whose results the cached query would cover
    let b = db
        .add_noun(NewNoun::from_vector(vector.clone(), NounType::Concept))
        .unwrap();

    let second = db
        .search_vector(
            &vector,
            &SearchOptions {
                limit: 10,
                ..Default::default()
            },
        )
        .unwrap();
    let ids: Vec<_> = second.items.iter().map(|h| h.noun.id).collect();
    assert!(ids.contains(&a));
    assert!(ids.contains(&b), "cached results must reflect the write");
    db.close().unwrap();
}
