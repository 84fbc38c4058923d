//! Entity registry and auto-registration augmentations.
//!
//! Streaming ingest tags writes with external identifiers (source-system
//! keys). The registry maps external id → entity uuid through a bounded
//! LRU with a TTL, so duplicate ingest of the same external entity
//! short-circuits to the already-created noun instead of writing twice.
//!
//! Persistence is hybrid: the map lives in memory for speed and is
//! snapshotted to a system document on shutdown and loadable at
//! initialization, so dedup survives restarts without a write per
//! registration.

use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::error::Result;
use crate::storage::{StorageAdapter, WalOp};
use crate::types::{EntityRef, NounId};

use super::{Augmentation, AugmentationContext, WriteDecision, WriteOutcome, WriteRequest};

/// System document the registry snapshots into.
const REGISTRY_DOC: &str = "entity-registry";

#[derive(Serialize, Deserialize)]
struct RegistrySnapshot {
    entries: Vec<(String, NounId)>,
}

struct RegistryEntry {
    id: NounId,
    registered_at: Instant,
}

/// External-id → uuid registry (priority 95).
pub struct EntityRegistry {
    ttl: Duration,
    entries: Mutex<LruCache<String, RegistryEntry>>,
    storage: RwLock<Option<Arc<dyn StorageAdapter>>>,
}

impl EntityRegistry {
    /// Creates a registry with the configured bounds.
    pub fn new(config: &RegistryConfig) -> Self {
        let capacity =
            std::num::NonZeroUsize::new(config.capacity.max(1)).expect("non-zero capacity");
        Self {
            ttl: config.ttl,
            entries: Mutex::new(LruCache::new(capacity)),
            storage: RwLock::new(None),
        }
    }

    /// Resolves an external id to a noun, if registered and fresh.
    pub fn resolve(&self, external_id: &str) -> Option<NounId> {
        let mut entries = self.entries.lock().expect("registry lock");
        match entries.get(external_id) {
            Some(entry) if entry.registered_at.elapsed() < self.ttl => Some(entry.id),
            Some(_) => {
                // Expired: drop so a fresh ingest re-registers
                entries.pop(external_id);
                None
            }
            None => None,
        }
    }

    /// Registers (or refreshes) an external id mapping.
    pub fn register(&self, external_id: impl Into<String>, id: NounId) {
        self.entries.lock().expect("registry lock").push(
            external_id.into(),
            RegistryEntry {
                id,
                registered_at: Instant::now(),
            },
        );
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("registry lock").len()
    }

    /// Returns true if no entries are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persists the current map to the registry system document.
    pub fn persist(&self) -> Result<()> {
        let storage = self.storage.read().expect("storage ref lock");
        let Some(storage) = storage.as_ref() else {
            return Ok(());
        };
        let entries = self.entries.lock().expect("registry lock");
        let snapshot = RegistrySnapshot {
            entries: entries
                .iter()
                .map(|(external, entry)| (external.clone(), entry.id))
                .collect(),
        };
        drop(entries);
        storage.save_system_doc(REGISTRY_DOC, &serde_json::to_string(&snapshot)?)?;
        Ok(())
    }
}

impl Augmentation for EntityRegistry {
    fn name(&self) -> &'static str {
        "entity-registry"
    }

    fn priority(&self) -> u8 {
        95
    }

    fn initialize(&self, ctx: &AugmentationContext) -> Result<()> {
        *self.storage.write().expect("storage ref lock") = Some(Arc::clone(&ctx.storage));

        // Load the persisted snapshot; entries start a fresh TTL window
        if let Some(json) = ctx.storage.get_system_doc(REGISTRY_DOC)? {
            match serde_json::from_str::<RegistrySnapshot>(&json) {
                Ok(snapshot) => {
                    let count = snapshot.entries.len();
                    let mut entries = self.entries.lock().expect("registry lock");
                    for (external, id) in snapshot.entries {
                        entries.push(
                            external,
                            RegistryEntry {
                                id,
                                registered_at: Instant::now(),
                            },
                        );
                    }
                    debug!(count, "Entity registry loaded");
                }
                Err(e) => warn!(error = %e, "Discarding unreadable registry snapshot"),
            }
        }
        Ok(())
    }

    fn before_write(&self, request: &mut WriteRequest) -> Result<WriteDecision> {
        // Duplicate streaming insert: answer with the registered id
        if request.op == WalOp::AddNoun {
            if let Some(external_id) = &request.external_id {
                if let Some(existing) = self.resolve(external_id) {
                    debug!(external_id = %external_id, id = %existing, "Duplicate ingest short-circuited");
                    return Ok(WriteDecision::ShortCircuit(Some(serde_json::json!({
                        "id": existing.to_string(),
                    }))));
                }
            }
        }
        Ok(WriteDecision::Continue)
    }

    fn shutdown(&self) {
        if let Err(e) = self.persist() {
            warn!(error = %e, "Failed to persist entity registry");
        }
    }
}

/// Auto-registration augmentation (priority 85): after a successful
/// insert carrying an external id, records the mapping in the registry.
pub struct AutoRegisterEntities {
    registry: Arc<EntityRegistry>,
}

impl AutoRegisterEntities {
    /// Creates the hook over a shared registry.
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        Self { registry }
    }
}

impl Augmentation for AutoRegisterEntities {
    fn name(&self) -> &'static str {
        "auto-register-entities"
    }

    fn priority(&self) -> u8 {
        85
    }

    fn after_write(&self, request: &WriteRequest, outcome: &WriteOutcome) -> Result<()> {
        if !outcome.success || request.op != WalOp::AddNoun {
            return Ok(());
        }
        if let (Some(external_id), EntityRef::Noun(id)) = (&request.external_id, request.entity) {
            self.registry.register(external_id.clone(), id);
        }
        Ok(())
    }
}
