//! Integration tests for verbs: CRUD, computed scoring, endpoint
//! validation, and placeholder auto-creation during streaming ingest.

use synapsedb::storage::StorageAdapter;
use synapsedb::{
    Config, Mode, NewNoun, NewVerb, NounType, SynapseDB, VerbDirection, VerbType,
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

fn db_with_pair() -> (SynapseDB, synapsedb::NounId, synapsedb::NounId) {
    let db = open_db();
    let a = db
        .add_noun(NewNoun::from_vector(make_vector(1), NounType::Person))
        .unwrap();
    let b = db
        .add_noun(NewNoun::from_vector(make_vector(2), NounType::Organization))
        .unwrap();
    (db, a, b)
}

#[test]
fn test_add_get_roundtrip() {
    let (db, a, b) = db_with_pair();

    let id = db
        .add_verb(
            NewVerb::new(a, b, VerbType::MemberOf)
                .with_weight(0.7)
                .with_confidence(0.9),
        )
        .unwrap();

    let verb = db.get_verb(id).unwrap().unwrap();
    assert_eq!(verb.source, a);
    assert_eq!(verb.target, b);
    assert_eq!(verb.verb_type, VerbType::MemberOf);
    assert_eq!(verb.weight, 0.7);
    assert_eq!(verb.confidence, 0.9);
    db.close().unwrap();
}

#[test]
fn test_verb_vector_is_endpoint_average() {
    let (db, a, b) = db_with_pair();
    let id = db.add_verb(NewVerb::new(a, b, VerbType::Knows)).unwrap();

    let verb = db.get_verb(id).unwrap().unwrap();
    let vector = verb.vector.expect("verb carries a vector");
    let va = make_vector(1);
    let vb = make_vector(2);
    for (i, component) in vector.iter().enumerate() {
        let expected = (va[i] + vb[i]) / 2.0;
        assert!((component - expected).abs() < 1e-6);
    }
    db.close().unwrap();
}

#[test]
fn test_unspecified_scores_are_computed() {
    let (db, a, b) = db_with_pair();
    let id = db.add_verb(NewVerb::new(a, b, VerbType::WorksWith)).unwrap();

    let verb = db.get_verb(id).unwrap().unwrap();
    assert!((0.0..=1.0).contains(&verb.weight));
    assert!((0.0..=1.0).contains(&verb.confidence));
    // Freshly-touched similar endpoints score well above zero
    assert!(verb.weight > 0.2);
    assert!(verb.confidence > 0.4);
    db.close().unwrap();
}

#[test]
fn test_explicit_scores_override_computation() {
    let (db, a, b) = db_with_pair();
    let id = db
        .add_verb(NewVerb::new(a, b, VerbType::Knows).with_weight(0.05))
        .unwrap();

    let verb = db.get_verb(id).unwrap().unwrap();
    assert_eq!(verb.weight, 0.05);
    db.close().unwrap();
}

#[test]
fn test_self_relation_rejected() {
    let (db, a, _) = db_with_pair();
    let err = db.add_verb(NewVerb::new(a, a, VerbType::Knows)).unwrap_err();
    assert!(err.is_validation());
    db.close().unwrap();
}

#[test]
fn test_missing_endpoint_rejected_in_normal_mode() {
    let (db, a, _) = db_with_pair();
    let err = db
        .add_verb(NewVerb::new(a, synapsedb::NounId::new(), VerbType::Uses))
        .unwrap_err();
    assert!(err.is_not_found());
    db.close().unwrap();
}

#[test]
fn test_direction_filtering() {
    let (db, a, b) = db_with_pair();
    let c = db
        .add_noun(NewNoun::from_vector(make_vector(3), NounType::Person))
        .unwrap();

    let outgoing = db.add_verb(NewVerb::new(a, b, VerbType::MemberOf)).unwrap();
    let incoming = db.add_verb(NewVerb::new(c, a, VerbType::Knows)).unwrap();

    let out = db.get_verbs_for_noun(a, VerbDirection::Outgoing).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].id, outgoing);

    let inc = db.get_verbs_for_noun(a, VerbDirection::Incoming).unwrap();
    assert_eq!(inc.len(), 1);
    assert_eq!(inc[0].id, incoming);

    let both = db.get_verbs_for_noun(a, VerbDirection::Both).unwrap();
    assert_eq!(both.len(), 2);
    db.close().unwrap();
}

#[test]
fn test_delete_verb_excludes_from_listing() {
    let (db, a, b) = db_with_pair();
    let id = db.add_verb(NewVerb::new(a, b, VerbType::Knows)).unwrap();

    db.delete_verb(id).unwrap();

    assert!(db
        .get_verbs_for_noun(a, VerbDirection::Both)
        .unwrap()
        .is_empty());
    // The record itself still reads back (soft delete)
    assert!(db.get_verb(id).unwrap().unwrap().is_deleted());
    db.close().unwrap();
}

#[test]
fn test_endpoints_exist_for_every_live_verb() {
    let (db, a, b) = db_with_pair();
    db.add_verb(NewVerb::new(a, b, VerbType::Knows)).unwrap();

    for verb in db.get_verbs_for_noun(a, VerbDirection::Both).unwrap() {
        assert!(db.get_noun(verb.source).unwrap().is_some());
        assert!(db.get_noun(verb.target).unwrap().is_some());
    }
    db.close().unwrap();
}

#[test]
fn test_placeholder_auto_create_under_write_only() {
    let db = SynapseDB::open_in_memory(Config {
        dimensions: DIM,
        mode: Mode::WriteOnly {
            allow_direct_reads: true,
        },
        auto_create_missing_nouns: true,
        ..Config::for_testing()
    })
    .unwrap();

    let id = db
        .add_verb_external("x", "y", VerbType::RelatedTo)
        .unwrap();
    let verb = db.get_verb(id).unwrap().unwrap();

    // Both endpoints exist as placeholders
    for endpoint in [verb.source, verb.target] {
        let noun = db.get_noun(endpoint).unwrap().unwrap();
        assert!(noun.is_placeholder());
    }

    // Re-ingesting the same external ids reuses the placeholders
    let second = db
        .add_verb_external("x", "y", VerbType::Supports)
        .unwrap();
    let second_verb = db.get_verb(second).unwrap().unwrap();
    assert_eq!(second_verb.source, verb.source);
    assert_eq!(second_verb.target, verb.target);
    db.close().unwrap();
}

#[test]
fn test_placeholders_excluded_from_find() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("synapse");

    // Streaming ingest phase: write-only with placeholder creation
    {
        let db = SynapseDB::open(
            &path,
            Config {
                dimensions: DIM,
                mode: Mode::WriteOnly {
                    allow_direct_reads: true,
                },
                auto_create_missing_nouns: true,
                ..Config::for_testing()
            },
        )
        .unwrap();
        db.add_verb_external("x", "y", VerbType::RelatedTo).unwrap();
        db.close().unwrap();
    }

    // Query phase: reopen in normal mode (write-only rejects search)
    let db = SynapseDB::open(
        &path,
        Config {
            dimensions: DIM,
            ..Config::for_testing()
        },
    )
    .unwrap();
    let a = db
        .add_noun(NewNoun::from_vector(make_vector(1), NounType::Concept))
        .unwrap();

    let results = db.find(synapsedb::TripleQuery::new().limit(100)).unwrap();
    let ids: Vec<_> = results.items.iter().map(|h| h.noun.id).collect();
    assert_eq!(ids, vec![a], "placeholders must stay out of results");
    // But the placeholders are still in storage
    assert_eq!(db.storage_for_test().count_nouns().unwrap(), 3);
    db.close().unwrap();
}

#[test]
fn test_auto_create_disabled_in_normal_mode() {
    let db = SynapseDB::open_in_memory(Config {
        dimensions: DIM,
        auto_create_missing_nouns: true,
        ..Config::for_testing()
    })
    .unwrap();

    // Normal mode: auto-creation is a write-only-mode affordance
    let err = db
        .add_verb_external("x", "y", VerbType::RelatedTo)
        .unwrap_err();
    assert!(err.is_not_found());
    db.close().unwrap();
}
