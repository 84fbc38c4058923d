//! Integration tests for soft delete and the periodic cleanup pass:
//! tombstone lifecycle, counter accounting, age thresholds, and the
//! storage-then-graph-then-index removal ordering.

use std::time::Duration;

use synapsedb::storage::StorageAdapter;
use synapsedb::{
    CleanupConfig, Config, NewNoun, NewVerb, NounType, SynapseDB, VerbDirection, VerbType,
};

const DIM: usize = 8;

fn make_vector(seed: u64) -> Vec<f32> {
    (0..DIM)
        .map(|i| (seed as f32 * 0.1 + i as f32 * 0.01).sin())
        .collect()
}

/// Cleanup configured for determinism: disabled background task, zero
/// age threshold so `run_cleanup()` reclaims immediately.
fn open_db_with_instant_cleanup() -> SynapseDB {
    SynapseDB::open_in_memory(Config {
        dimensions: DIM,
        cleanup: CleanupConfig {
            enabled: false,
            interval: Duration::from_secs(900),
            max_age: Duration::ZERO,
        },
        ..Config::for_testing()
    })
    .unwrap()
}

fn open_db_with_long_max_age() -> SynapseDB {
    SynapseDB::open_in_memory(Config {
        dimensions: DIM,
        cleanup: CleanupConfig {
            enabled: false,
            interval: Duration::from_secs(900),
            max_age: Duration::from_secs(3600),
        },
        ..Config::for_testing()
    })
    .unwrap()
}

#[test]
fn test_delete_is_soft() {
    let db = open_db_with_long_max_age();
    let id = db
        .add_noun(NewNoun::from_vector(make_vector(1), NounType::Concept))
        .unwrap();

    db.delete_noun(id).unwrap();

    // Invisible through the public surface
    assert!(db.get_noun(id).unwrap().is_none());
    // But still in storage and in the graph until cleanup
    assert_eq!(db.storage_for_test().count_nouns().unwrap(), 1);
    let raw = db.storage_for_test().get_noun(id).unwrap().unwrap();
    assert!(raw.is_deleted());
    assert!(raw.system().deleted_at.is_some());
    db.close().unwrap();
}

#[test]
fn test_delete_twice_is_idempotent() {
    let db = open_db_with_long_max_age();
    let id = db
        .add_noun(NewNoun::from_vector(make_vector(1), NounType::Concept))
        .unwrap();

    db.delete_noun(id).unwrap();
    db.delete_noun(id).unwrap();

    let report = db.get_statistics(&Default::default()).unwrap();
    // Counted down exactly once
    assert_eq!(report.statistics.total_nouns(), 0);
    db.close().unwrap();
}

#[test]
fn test_counters_track_live_entities() {
    let db = open_db_with_long_max_age();
    let a = db
        .add_noun(NewNoun::from_vector(make_vector(1), NounType::Concept))
        .unwrap();
    db.add_noun(NewNoun::from_vector(make_vector(2), NounType::Concept))
        .unwrap();

    let report = db.get_statistics(&Default::default()).unwrap();
    assert_eq!(report.statistics.total_nouns(), 2);

    db.delete_noun(a).unwrap();
    let report = db.get_statistics(&Default::default()).unwrap();
    assert_eq!(report.statistics.total_nouns(), 1);

    db.restore_noun(a).unwrap();
    let report = db.get_statistics(&Default::default()).unwrap();
    assert_eq!(report.statistics.total_nouns(), 2);

    // Sum of per-type counts equals total live count
    let by_type: u64 = report
        .statistics
        .noun_counts
        .iter()
        .map(|&c| c as u64)
        .sum();
    assert_eq!(by_type, report.statistics.total_nouns());
    db.close().unwrap();
}

#[test]
fn test_cleanup_respects_max_age() {
    let db = open_db_with_long_max_age();
    let id = db
        .add_noun(NewNoun::from_vector(make_vector(1), NounType::Concept))
        .unwrap();
    db.delete_noun(id).unwrap();

    // Young tombstone survives the pass
    let purged = db.run_cleanup().unwrap();
    assert_eq!(purged, 0);
    assert_eq!(db.storage_for_test().count_nouns().unwrap(), 1);
    db.close().unwrap();
}

#[test]
fn test_cleanup_hard_removes_old_tombstones() {
    let db = open_db_with_instant_cleanup();
    let keep = db
        .add_noun(NewNoun::from_vector(make_vector(1), NounType::Concept))
        .unwrap();
    let gone = db
        .add_noun(NewNoun::from_vector(make_vector(2), NounType::Concept))
        .unwrap();

    db.delete_noun(gone).unwrap();
    let purged = db.run_cleanup().unwrap();
    assert_eq!(purged, 1);

    // Hard-removed everywhere
    assert!(db.storage_for_test().get_noun(gone).unwrap().is_none());
    assert_eq!(db.storage_for_test().count_nouns().unwrap(), 1);

    // The survivor is untouched and searchable
    let results = db
        .search_vector(&make_vector(1), &Default::default())
        .unwrap();
    assert_eq!(results.items[0].noun.id, keep);
    db.close().unwrap();
}

#[test]
fn test_restore_after_cleanup_is_gone() {
    let db = open_db_with_instant_cleanup();
    let id = db
        .add_noun(NewNoun::from_vector(make_vector(1), NounType::Concept))
        .unwrap();
    db.delete_noun(id).unwrap();
    db.run_cleanup().unwrap();

    // Nothing left to restore
    let err = db.restore_noun(id).unwrap_err();
    assert!(err.is_not_found());
    db.close().unwrap();
}

#[test]
fn test_cleanup_cascades_to_touching_verbs() {
    let db = open_db_with_instant_cleanup();
    let a = db
        .add_noun(NewNoun::from_vector(make_vector(1), NounType::Person))
        .unwrap();
    let b = db
        .add_noun(NewNoun::from_vector(make_vector(2), NounType::Person))
        .unwrap();
    let verb = db.add_verb(NewVerb::new(a, b, VerbType::Knows)).unwrap();

    db.delete_noun(a).unwrap();
    db.run_cleanup().unwrap();

    // No dangling verb after the endpoint is purged
    assert!(db.get_verb(verb).unwrap().is_none());
    assert!(db
        .get_verbs_for_noun(b, VerbDirection::Both)
        .unwrap()
        .is_empty());
    db.close().unwrap();
}

#[test]
fn test_cleanup_reclaims_deleted_verbs() {
    let db = open_db_with_instant_cleanup();
    let a = db
        .add_noun(NewNoun::from_vector(make_vector(1), NounType::Person))
        .unwrap();
    let b = db
        .add_noun(NewNoun::from_vector(make_vector(2), NounType::Person))
        .unwrap();
    let verb = db.add_verb(NewVerb::new(a, b, VerbType::Knows)).unwrap();

    db.delete_verb(verb).unwrap();
    let purged = db.run_cleanup().unwrap();
    assert_eq!(purged, 1);

    assert!(db.get_verb(verb).unwrap().is_none());
    // Endpoints are untouched
    assert!(db.get_noun(a).unwrap().is_some());
    assert!(db.get_noun(b).unwrap().is_some());
    db.close().unwrap();
}

#[test]
fn test_deleted_verb_edges_not_traversed() {
    let db = open_db_with_long_max_age();
    let a = db
        .add_noun(NewNoun::from_vector(make_vector(1), NounType::Person))
        .unwrap();
    let b = db
        .add_noun(NewNoun::from_vector(make_vector(2), NounType::Person))
        .unwrap();
    let verb = db.add_verb(NewVerb::new(a, b, VerbType::Knows)).unwrap();
    db.delete_verb(verb).unwrap();

    let results = db
        .find(
            synapsedb::TripleQuery::new()
                .connected(synapsedb::ConnectedClause {
                    from: Some(a),
                    max_depth: 1,
                    ..Default::default()
                })
                .limit(10),
        )
        .unwrap();
    assert!(results.items.is_empty());
    db.close().unwrap();
}
