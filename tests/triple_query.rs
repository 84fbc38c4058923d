//! Integration tests for the triple-intelligence planner: fused
//! scoring, graph-first execution, metadata-only queries, and
//! pagination cursor stability.

use synapsedb::{
    Config, ConnectedClause, MetadataPredicate, NewNoun, NewVerb, NounId, NounType, QueryMode,
    SynapseDB, TripleQuery, VerbType,
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

#[test]
fn test_fusion_scenario_metadata_and_vector() {
    let db = open_db();
    let query_vector = make_vector(5);

    // 100 nouns; the first 10 are vector-close to the query and tagged
    // with the target year, the rest are distant and untagged
    let mut tagged = Vec::new();
    for i in 0..100u64 {
        let (vector, year) = if i < 10 {
            (make_vector(5 + i % 2), 2024i64)
        } else {
            (make_vector(100 + i), 1999i64)
        };
        let id = db
            .add_noun(
                NewNoun::from_vector(vector, NounType::Document)
                    .with_metadata_entry("year", year),
            )
            .unwrap();
        if i < 10 {
            tagged.push(id);
        }
    }

    let results = db
        .find(
            TripleQuery::new()
                .like_vector(query_vector)
                .where_clause(MetadataPredicate::eq("year", 2024i64))
                .limit(5),
        )
        .unwrap();

    assert_eq!(results.items.len(), 5);
    for hit in &results.items {
        assert!(tagged.contains(&hit.noun.id), "only tagged nouns qualify");
        assert!(!hit.noun.is_deleted());
    }
    // Ordered by fused score descending
    for window in results.items.windows(2) {
        assert!(window[0].score >= window[1].score);
    }
    db.close().unwrap();
}

#[test]
fn test_metadata_only_query() {
    let db = open_db();
    let mut expected = Vec::new();
    for i in 0..10u64 {
        let id = db
            .add_noun(
                NewNoun::from_vector(make_vector(i), NounType::Document)
                    .with_metadata_entry("year", (2020 + (i % 2)) as i64),
            )
            .unwrap();
        if i % 2 == 1 {
            expected.push(id);
        }
    }

    let results = db
        .find(
            TripleQuery::new()
                .where_clause(MetadataPredicate::eq("year", 2021i64))
                .limit(10),
        )
        .unwrap();

    let mut ids: Vec<_> = results.items.iter().map(|h| h.noun.id).collect();
    ids.sort();
    expected.sort();
    assert_eq!(ids, expected);
    db.close().unwrap();
}

#[test]
fn test_range_predicate_query() {
    let db = open_db();
    for year in 2018..2025i64 {
        db.add_noun(
            NewNoun::from_vector(make_vector(year as u64), NounType::Event)
                .with_metadata_entry("year", year),
        )
        .unwrap();
    }

    let results = db
        .find(
            TripleQuery::new()
                .where_clause(MetadataPredicate::gte("year", 2022i64))
                .limit(10),
        )
        .unwrap();
    assert_eq!(results.items.len(), 3);
    for hit in &results.items {
        let year = hit.noun.metadata.get("year").and_then(|v| v.as_f64()).unwrap();
        assert!(year >= 2022.0);
    }
    db.close().unwrap();
}

/// Builds a chain a -> b -> c -> d with a vector-similar decoy that is
/// not connected to anything.
fn graph_fixture(db: &SynapseDB) -> (Vec<NounId>, NounId) {
    let ids: Vec<NounId> = (0..4u64)
        .map(|i| {
            db.add_noun(NewNoun::from_vector(make_vector(i), NounType::Concept))
                .unwrap()
        })
        .collect();
    for pair in ids.windows(2) {
        db.add_verb(NewVerb::new(pair[0], pair[1], VerbType::DependsOn))
            .unwrap();
    }
    let decoy = db
        .add_noun(NewNoun::from_vector(make_vector(1), NounType::Concept))
        .unwrap();
    (ids, decoy)
}

#[test]
fn test_graph_traversal_query() {
    let db = open_db();
    let (ids, decoy) = graph_fixture(&db);

    let results = db
        .find(
            TripleQuery::new()
                .connected(ConnectedClause {
                    from: Some(ids[0]),
                    max_depth: 2,
                    ..Default::default()
                })
                .limit(10),
        )
        .unwrap();

    let hit_ids: Vec<_> = results.items.iter().map(|h| h.noun.id).collect();
    assert!(hit_ids.contains(&ids[1]));
    assert!(hit_ids.contains(&ids[2]));
    assert!(!hit_ids.contains(&ids[3]), "beyond max_depth");
    assert!(!hit_ids.contains(&decoy), "not connected");
    assert!(!hit_ids.contains(&ids[0]), "the anchor itself is not a result");

    // Closer hops rank higher
    let first = results.items.first().unwrap();
    assert_eq!(first.noun.id, ids[1]);
    db.close().unwrap();
}

#[test]
fn test_graph_first_intersects_metadata_and_reranks() {
    let db = open_db();
    let anchor = db
        .add_noun(NewNoun::from_vector(make_vector(0), NounType::Person))
        .unwrap();
    let tagged = db
        .add_noun(
            NewNoun::from_vector(make_vector(1), NounType::Document)
                .with_metadata_entry("status", "published"),
        )
        .unwrap();
    let untagged = db
        .add_noun(NewNoun::from_vector(make_vector(2), NounType::Document))
        .unwrap();
    db.add_verb(NewVerb::new(anchor, tagged, VerbType::AuthoredBy))
        .unwrap();
    db.add_verb(NewVerb::new(anchor, untagged, VerbType::AuthoredBy))
        .unwrap();

    let results = db
        .find(
            TripleQuery::new()
                .like_vector(make_vector(1))
                .where_clause(MetadataPredicate::eq("status", "published"))
                .connected(ConnectedClause {
                    from: Some(anchor),
                    max_depth: 1,
                    ..Default::default()
                })
                .limit(10),
        )
        .unwrap();

    let hit_ids: Vec<_> = results.items.iter().map(|h| h.noun.id).collect();
    assert!(hit_ids.contains(&tagged));
    db.close().unwrap();
}

#[test]
fn test_via_restricts_traversal() {
    let db = open_db();
    let a = db
        .add_noun(NewNoun::from_vector(make_vector(0), NounType::Person))
        .unwrap();
    let owned = db
        .add_noun(NewNoun::from_vector(make_vector(1), NounType::Thing))
        .unwrap();
    let known = db
        .add_noun(NewNoun::from_vector(make_vector(2), NounType::Person))
        .unwrap();
    db.add_verb(NewVerb::new(a, owned, VerbType::Owns)).unwrap();
    db.add_verb(NewVerb::new(a, known, VerbType::Knows)).unwrap();

    let results = db
        .find(
            TripleQuery::new()
                .connected(ConnectedClause {
                    from: Some(a),
                    via: Some(vec![VerbType::Owns]),
                    max_depth: 1,
                    ..Default::default()
                })
                .limit(10),
        )
        .unwrap();

    let hit_ids: Vec<_> = results.items.iter().map(|h| h.noun.id).collect();
    assert_eq!(hit_ids, vec![owned]);
    db.close().unwrap();
}

#[test]
fn test_empty_where_excludes_soft_deleted() {
    let db = open_db();
    let a = db
        .add_noun(NewNoun::from_vector(make_vector(1), NounType::Concept))
        .unwrap();
    let b = db
        .add_noun(NewNoun::from_vector(make_vector(2), NounType::Concept))
        .unwrap();

    db.delete_noun(a).unwrap();

    let results = db.find(TripleQuery::new().limit(10)).unwrap();
    let ids: Vec<_> = results.items.iter().map(|h| h.noun.id).collect();
    assert_eq!(ids, vec![b]);

    db.restore_noun(a).unwrap();
    let results = db.find(TripleQuery::new().limit(10)).unwrap();
    assert_eq!(results.items.len(), 2);
    db.close().unwrap();
}

#[test]
fn test_pagination_cursor_stability() {
    let db = open_db();
    for i in 0..25u64 {
        db.add_noun(NewNoun::from_vector(make_vector(i), NounType::Concept))
            .unwrap();
    }

    let full: Vec<_> = db
        .find(TripleQuery::new().limit(20))
        .unwrap()
        .items
        .into_iter()
        .map(|h| h.noun.id)
        .collect();

    let first_page = db.find(TripleQuery::new().limit(10)).unwrap();
    assert!(first_page.has_more);
    let cursor = first_page.next_cursor.clone().expect("cursor on partial page");

    let second_page = db
        .find(TripleQuery::new().limit(10).cursor(cursor))
        .unwrap();

    let mut combined: Vec<_> = first_page.items.iter().map(|h| h.noun.id).collect();
    combined.extend(second_page.items.iter().map(|h| h.noun.id));

    // No overlap, no gaps: two pages of 10 equal one page of 20
    assert_eq!(combined, full);
    db.close().unwrap();
}

#[test]
fn test_corrupted_cursor_degrades_to_first_page() {
    let db = open_db();
    for i in 0..5u64 {
        db.add_noun(NewNoun::from_vector(make_vector(i), NounType::Concept))
            .unwrap();
    }

    let clean = db.find(TripleQuery::new().limit(3)).unwrap();
    let garbled = db
        .find(TripleQuery::new().limit(3).cursor("!!not-a-cursor!!"))
        .unwrap();

    let clean_ids: Vec<_> = clean.items.iter().map(|h| h.noun.id).collect();
    let garbled_ids: Vec<_> = garbled.items.iter().map(|h| h.noun.id).collect();
    assert_eq!(clean_ids, garbled_ids);
    db.close().unwrap();
}

#[test]
fn test_mode_override_vector_requires_like() {
    let db = open_db();
    let err = db
        .find(TripleQuery::new().mode(QueryMode::Vector))
        .unwrap_err();
    assert!(err.is_validation());
    db.close().unwrap();
}

#[test]
fn test_like_id_clause() {
    let db = open_db();
    let a = db
        .add_noun(NewNoun::from_vector(make_vector(1), NounType::Concept))
        .unwrap();
    let near = db
        .add_noun(NewNoun::from_vector(make_vector(2), NounType::Concept))
        .unwrap();
    db.add_noun(NewNoun::from_vector(make_vector(60), NounType::Concept))
        .unwrap();

    let results = db.find(TripleQuery::new().like_id(a).limit(2)).unwrap();
    let ids: Vec<_> = results.items.iter().map(|h| h.noun.id).collect();
    assert_eq!(ids[0], a, "a noun is most similar to itself");
    assert_eq!(ids[1], near);
    db.close().unwrap();
}

#[test]
fn test_include_deleted_opt_in() {
    let db = open_db();
    let a = db
        .add_noun(NewNoun::from_vector(make_vector(1), NounType::Concept))
        .unwrap();
    db.delete_noun(a).unwrap();

    let excluded = db.find(TripleQuery::new().limit(10)).unwrap();
    assert!(excluded.items.is_empty());

    let included = db
        .find(TripleQuery::new().limit(10).include_deleted())
        .unwrap();
    assert_eq!(included.items.len(), 1);
    assert!(included.items[0].noun.is_deleted());
    db.close().unwrap();
}
