//! Graph traversal over the verb graph.
//!
//! Breadth-first frontier expansion from an anchor noun, following
//! verbs in either direction, optionally restricted to a set of verb
//! types. Tombstoned verbs and endpoints are not traversed.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::Result;
use crate::storage::StorageAdapter;
use crate::types::NounId;
use crate::verb::VerbType;

/// Expands the frontier around `seed` up to `max_depth` hops.
///
/// Returns noun ids mapped to their minimum hop distance; the seed
/// itself appears at depth 0. Edges through soft-deleted verbs are
/// skipped.
pub fn expand_frontier(
    storage: &dyn StorageAdapter,
    seed: NounId,
    via: Option<&[VerbType]>,
    max_depth: usize,
) -> Result<HashMap<NounId, usize>> {
    let mut depths: HashMap<NounId, usize> = HashMap::new();
    depths.insert(seed, 0);

    let mut queue: VecDeque<(NounId, usize)> = VecDeque::new();
    queue.push_back((seed, 0));

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for verb in storage.get_verbs_touching(current)? {
            if verb.is_deleted() {
                continue;
            }
            if let Some(via) = via {
                if !via.contains(&verb.verb_type) {
                    continue;
                }
            }
            let other = if verb.source == current {
                verb.target
            } else {
                verb.source
            };
            let next_depth = depth + 1;
            let entry = depths.entry(other).or_insert(usize::MAX);
            if next_depth < *entry {
                *entry = next_depth;
                queue.push_back((other, next_depth));
            }
        }
    }

    Ok(depths)
}

/// Intersects two frontier maps, keeping the larger of the two depths
/// for each noun present in both (the hop budget a path consumes when
/// it must reach both anchors).
pub fn intersect_frontiers(
    a: HashMap<NounId, usize>,
    b: &HashMap<NounId, usize>,
) -> HashMap<NounId, usize> {
    a.into_iter()
        .filter_map(|(id, depth_a)| b.get(&id).map(|depth_b| (id, depth_a.max(*depth_b))))
        .collect()
}

/// Proximity score for a hop distance: 1 at the anchor, decaying with
/// each hop. Raw input to the fusion scorer (min-max normalized there).
#[inline]
pub fn proximity(depth: usize) -> f32 {
    1.0 / (1.0 + depth as f32)
}

/// Drops anchors (depth 0) from a frontier, leaving reachable nouns.
pub fn without_anchors(frontier: HashMap<NounId, usize>) -> HashMap<NounId, usize> {
    frontier.into_iter().filter(|(_, d)| *d > 0).collect()
}

/// Convenience: the reachable set as ids only.
pub fn frontier_ids(frontier: &HashMap<NounId, usize>) -> HashSet<NounId> {
    frontier.keys().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metadata::{MetadataMap, SystemMetadata};
    use crate::noun::{Noun, NounType};
    use crate::storage::MemoryStorage;
    use crate::types::{Timestamp, VerbId};
    use crate::verb::Verb;

    fn make_noun() -> Noun {
        let mut metadata = MetadataMap::new();
        SystemMetadata::default().apply_to(&mut metadata);
        Noun {
            id: NounId::new(),
            noun_type: NounType::Concept,
            vector: vec![0.0; 4],
            metadata,
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
            created_by: "default".to_string(),
        }
    }

    fn link(
        storage: &MemoryStorage,
        source: NounId,
        target: NounId,
        verb_type: VerbType,
    ) -> VerbId {
        let verb = Verb {
            id: VerbId::new(),
            source,
            target,
            verb_type,
            weight: 0.5,
            confidence: 0.5,
            vector: None,
            metadata: MetadataMap::new(),
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
            created_by: "default".to_string(),
        };
        storage.save_verb(&verb).unwrap();
        verb.id
    }

    /// Chain: a -> b -> c -> d
    fn chain(storage: &MemoryStorage) -> Vec<NounId> {
        let nouns: Vec<Noun> = (0..4).map(|_| make_noun()).collect();
        for noun in &nouns {
            storage.save_noun(noun).unwrap();
        }
        let ids: Vec<NounId> = nouns.iter().map(|n| n.id).collect();
        for pair in ids.windows(2) {
            link(storage, pair[0], pair[1], VerbType::RelatedTo);
        }
        ids
    }

    #[test]
    fn test_depth_limits_expansion() {
        let storage = MemoryStorage::new(&Config::for_testing());
        let ids = chain(&storage);

        let frontier = expand_frontier(&storage, ids[0], None, 2).unwrap();
        assert_eq!(frontier.get(&ids[0]), Some(&0));
        assert_eq!(frontier.get(&ids[1]), Some(&1));
        assert_eq!(frontier.get(&ids[2]), Some(&2));
        assert!(!frontier.contains_key(&ids[3]));
    }

    #[test]
    fn test_traversal_is_bidirectional() {
        let storage = MemoryStorage::new(&Config::for_testing());
        let ids = chain(&storage);

        // From the middle, both directions are reachable
        let frontier = expand_frontier(&storage, ids[2], None, 1).unwrap();
        assert!(frontier.contains_key(&ids[1]));
        assert!(frontier.contains_key(&ids[3]));
    }

    #[test]
    fn test_via_filters_verb_types() {
        let storage = MemoryStorage::new(&Config::for_testing());
        let a = make_noun();
        let b = make_noun();
        let c = make_noun();
        for n in [&a, &b, &c] {
            storage.save_noun(n).unwrap();
        }
        link(&storage, a.id, b.id, VerbType::Uses);
        link(&storage, a.id, c.id, VerbType::Owns);

        let frontier =
            expand_frontier(&storage, a.id, Some(&[VerbType::Uses]), 2).unwrap();
        assert!(frontier.contains_key(&b.id));
        assert!(!frontier.contains_key(&c.id));
    }

    #[test]
    fn test_deleted_verbs_not_traversed() {
        let storage = MemoryStorage::new(&Config::for_testing());
        let a = make_noun();
        let b = make_noun();
        storage.save_noun(&a).unwrap();
        storage.save_noun(&b).unwrap();

        let verb_id = link(&storage, a.id, b.id, VerbType::RelatedTo);
        let mut metadata = MetadataMap::new();
        SystemMetadata {
            deleted: true,
            deleted_at: Some(Timestamp::now()),
            ..Default::default()
        }
        .apply_to(&mut metadata);
        storage.save_verb_metadata(verb_id, &metadata).unwrap();

        let frontier = expand_frontier(&storage, a.id, None, 2).unwrap();
        assert!(!frontier.contains_key(&b.id));
    }

    #[test]
    fn test_shortest_depth_wins() {
        let storage = MemoryStorage::new(&Config::for_testing());
        let a = make_noun();
        let b = make_noun();
        let c = make_noun();
        for n in [&a, &b, &c] {
            storage.save_noun(n).unwrap();
        }
        // Two paths to c: a->c direct and a->b->c
        link(&storage, a.id, b.id, VerbType::RelatedTo);
        link(&storage, b.id, c.id, VerbType::RelatedTo);
        link(&storage, a.id, c.id, VerbType::RelatedTo);

        let frontier = expand_frontier(&storage, a.id, None, 3).unwrap();
        assert_eq!(frontier.get(&c.id), Some(&1));
    }

    #[test]
    fn test_intersect_frontiers() {
        let storage = MemoryStorage::new(&Config::for_testing());
        let ids = chain(&storage);

        let from_start = expand_frontier(&storage, ids[0], None, 3).unwrap();
        let from_end = expand_frontier(&storage, ids[3], None, 3).unwrap();
        let both = intersect_frontiers(from_start, &from_end);

        // Everything on the chain reaches both ends within 3 hops
        assert_eq!(both.len(), 4);
        // Middle nodes carry the larger of the two distances
        assert_eq!(both.get(&ids[1]), Some(&2));
    }

    #[test]
    fn test_proximity_decays() {
        assert_eq!(proximity(0), 1.0);
        assert!(proximity(1) > proximity(2));
        assert!(proximity(2) > proximity(3));
    }

    #[test]
    fn test_without_anchors() {
        let storage = MemoryStorage::new(&Config::for_testing());
        let ids = chain(&storage);
        let frontier = expand_frontier(&storage, ids[0], None, 2).unwrap();
        let reachable = without_anchors(frontier);
        assert!(!reachable.contains_key(&ids[0]));
        assert!(reachable.contains_key(&ids[1]));
    }
}
