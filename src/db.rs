//! SynapseDB main struct and lifecycle operations.
//!
//! The [`SynapseDB`] struct is the primary interface for interacting
//! with the engine. It provides methods for:
//!
//! - Opening and closing a storage root
//! - Creating, reading, updating, and soft-deleting nouns and verbs
//! - Vector search and triple-intelligence queries
//! - Statistics, backup/restore, and blob access
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use synapsedb::{Config, NewNoun, NounType, SynapseDB};
//!
//! // Open or create a storage root
//! let db = SynapseDB::open("./synapse", Config::default())?;
//!
//! // Add a noun with a pre-computed vector
//! let id = db.add_noun(
//!     NewNoun::from_vector(vec![0.1; 384], NounType::Concept)
//!         .with_metadata_entry("label", "alpha"),
//! )?;
//!
//! // Search
//! let results = db.search_vector(&vec![0.1; 384], &Default::default())?;
//!
//! // Close when done
//! db.close()?;
//! ```
//!
//! # Thread Safety
//!
//! `SynapseDB` is `Send + Sync` and can be shared across threads using
//! `Arc`. Searches share read guards on the index; writes serialize per
//! entity through striped locks, and storage persistence flows through
//! the batching writer thread.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::cache::{cache_key, CacheStats, DataChange, TieredCache};
use crate::config::{Config, Mode, MAX_QUERY_LIMIT};
use crate::embedding::{probe_dimensions, EmbeddingService};
use crate::error::{NotFoundError, Result, StorageError, SynapseError, ValidationError};
use crate::metadata::{
    flatten, merge_preserving_system, MetadataIndex, MetadataIndexSnapshot, MetadataPredicate,
    Partition, SystemMetadata, DELETED_KEY,
};
use crate::noun::{
    validate_new_noun, validate_noun_update, NewNoun, Noun, NounData, NounType, NounUpdate,
};
use crate::pipeline::{
    Augmentation, AugmentationContext, AutoRegisterEntities, BatchItem, BatchProcessor,
    ConnectionPool, EntityRegistry, Pipeline, RequestDeduplicator, VerbScoring, WalAugmentation,
    WriteRequest,
};
use crate::query::{
    plan, LikeClause, PlannerContext, QueryParser, QueryResults, TripleQuery,
};
use crate::stats::{Statistics, StatisticsSnapshot};
use crate::storage::{
    open_storage, wal::DEFAULT_SEGMENT_BYTES, with_retry, ChangeOp, GetOptions, Pagination,
    StorageAdapter, StorageStatus, ThrottleTelemetry, WalOp, WriteAheadLog,
};
use crate::types::{EntityRef, NounId, Timestamp, Vector, VerbId};
use crate::vector::{distance::average, HnswIndex, HnswNodeRecord, NodeStore};
use crate::verb::{validate_new_verb, NewVerb, Verb, VerbDirection, VerbType};

/// Write-lock striping width.
const LOCK_STRIPES: usize = 64;

/// Eager index loading is refused above this corpus size unless the
/// caller opted into lazy loading explicitly.
const INTELLIGENT_LOAD_MAX_EAGER: u64 = 250_000;

/// System document name for the metadata index snapshot.
const METADATA_INDEX_DOC: &str = "metadata-index";

/// Options for the vector search surface.
#[derive(Clone, Debug)]
pub struct SearchOptions {
    /// Metadata predicate filter.
    pub filter: Option<MetadataPredicate>,
    /// Restrict to one noun type.
    pub noun_type: Option<NounType>,
    /// Restrict to an explicit id set.
    pub item_ids: Option<Vec<NounId>>,
    /// Minimum similarity for hits.
    pub threshold: Option<f32>,
    /// Result limit (≤ 10 000). Default: 10
    pub limit: usize,
    /// Result offset.
    pub offset: Option<usize>,
    /// Continuation cursor; supersedes `offset`.
    pub cursor: Option<String>,
    /// Include soft-deleted nouns.
    pub include_deleted: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            filter: None,
            noun_type: None,
            item_ids: None,
            threshold: None,
            limit: 10,
            offset: None,
            cursor: None,
            include_deleted: false,
        }
    }
}

/// Options for the statistics surface.
#[derive(Clone, Debug, Default)]
pub struct StatisticsOptions {
    /// Restrict per-service counters to one service.
    pub service: Option<String>,
    /// Recount type counters from the live index before snapshotting.
    pub force_refresh: bool,
}

/// Aggregated statistics, including throttle telemetry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatisticsReport {
    /// Counter snapshot (possibly filtered to one service).
    pub statistics: StatisticsSnapshot,
    /// Adapter status and counts.
    pub storage: StorageStatus,
    /// Throttle telemetry ring.
    pub throttling: ThrottleTelemetry,
    /// Query cache counters.
    pub cache: CacheStats,
    /// Unacknowledged write-ahead records.
    pub wal_pending: usize,
}

/// Full-corpus export.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupData {
    /// Every noun, including soft-deleted ones.
    pub nouns: Vec<Noun>,
    /// Every verb, including soft-deleted ones.
    pub verbs: Vec<Verb>,
    /// Graph-global record at export time.
    pub hnsw_system: Option<crate::vector::HnswSystemRecord>,
    /// Statistics at export time.
    pub statistics: StatisticsSnapshot,
}

/// Options for restore.
#[derive(Clone, Debug, Default)]
pub struct RestoreOptions {
    /// Clear existing contents before importing.
    pub clear_existing: bool,
}

/// Builder for attaching optional collaborators before opening.
///
/// The core engine functions with every optional component absent;
/// text embedding and natural-language queries then fail with a
/// missing-component validation error rather than a panic.
pub struct SynapseDBBuilder {
    config: Config,
    path: Option<std::path::PathBuf>,
    embedding: Option<Box<dyn EmbeddingService>>,
    parser: Option<Box<dyn QueryParser>>,
}

impl SynapseDBBuilder {
    /// Starts a builder with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            path: None,
            embedding: None,
            parser: None,
        }
    }

    /// Sets the storage root (omit for an in-memory engine).
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Attaches an embedding service.
    pub fn embedding(mut self, service: Box<dyn EmbeddingService>) -> Self {
        self.embedding = Some(service);
        self
    }

    /// Attaches a natural-language query parser.
    pub fn query_parser(mut self, parser: Box<dyn QueryParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Opens the engine.
    pub fn open(self) -> Result<SynapseDB> {
        SynapseDB::open_with(self.path.as_deref(), self.config, self.embedding, self.parser)
    }
}

/// Pages graph nodes from the storage adapter (lazy load / optimized
/// variant).
struct AdapterNodeStore(Arc<dyn StorageAdapter>);

impl NodeStore for AdapterNodeStore {
    fn load_node(&self, id: &EntityRef) -> Result<Option<HnswNodeRecord>> {
        self.0.get_hnsw_node(id)
    }
}

struct Core {
    config: Config,
    storage: Arc<dyn StorageAdapter>,
    index: HnswIndex,
    metadata_index: MetadataIndex,
    stats: Statistics,
    pipeline: Pipeline,
    wal: Arc<WalAugmentation>,
    batch: Arc<BatchProcessor>,
    registry: Arc<EntityRegistry>,
    scoring: Arc<VerbScoring>,
    query_cache: TieredCache<QueryResults>,
    noun_cache: TieredCache<Noun>,
    locks: Vec<Mutex<()>>,
    embedding: Option<Box<dyn EmbeddingService>>,
    parser: Option<Box<dyn QueryParser>>,
    last_change_seen: Mutex<Timestamp>,
}

struct Worker {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

/// The main SynapseDB engine handle.
///
/// Create an instance with [`SynapseDB::open()`] (or
/// [`builder`](SynapseDB::builder) to attach collaborators) and close
/// it with [`SynapseDB::close()`].
pub struct SynapseDB {
    core: Arc<Core>,
    workers: Mutex<Vec<Worker>>,
}

impl std::fmt::Debug for SynapseDB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynapseDB")
            .field("dimensions", &self.core.config.dimensions)
            .field("mode", &self.core.config.mode)
            .field("index_len", &self.core.index.len())
            .finish_non_exhaustive()
    }
}

impl SynapseDB {
    /// Opens or creates an engine over a filesystem storage root.
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        Self::open_with(Some(path.as_ref()), config, None, None)
    }

    /// Opens an ephemeral in-memory engine (tests, scratch workloads).
    pub fn open_in_memory(config: Config) -> Result<Self> {
        Self::open_with(None, config, None, None)
    }

    /// Starts a builder for attaching optional collaborators.
    pub fn builder(config: Config) -> SynapseDBBuilder {
        SynapseDBBuilder::new(config)
    }

    fn open_with(
        path: Option<&Path>,
        config: Config,
        embedding: Option<Box<dyn EmbeddingService>>,
        parser: Option<Box<dyn QueryParser>>,
    ) -> Result<Self> {
        // Validate configuration first
        config.validate()?;
        info!("Opening SynapseDB");

        // Resolve storage
        let storage: Arc<dyn StorageAdapter> = Arc::from(open_storage(path, &config)?);

        // Probe the embedding collaborator before anything is written
        if let Some(service) = embedding.as_deref() {
            probe_dimensions(service, config.dimensions)?;
        }

        // Construct components (phase one: registration, no context)
        let wal_log = match (path, config.test_mode) {
            (Some(path), false) => Some(WriteAheadLog::open(
                path.join(crate::storage::layout::WAL_DIR),
                DEFAULT_SEGMENT_BYTES,
            )?),
            _ => None,
        };
        let wal = Arc::new(WalAugmentation::new(wal_log));
        let pool = Arc::new(ConnectionPool::default());
        let registry = Arc::new(EntityRegistry::new(&config.registry));
        let auto_register = Arc::new(AutoRegisterEntities::new(Arc::clone(&registry)));
        let batch = Arc::new(BatchProcessor::new(&config.batch));
        let dedup = Arc::new(RequestDeduplicator::new(&config.dedup));
        let scoring = Arc::new(VerbScoring::new(config.distance));

        let pipeline = Pipeline::new();
        pipeline.register(Arc::clone(&wal) as Arc<dyn Augmentation>)?;
        pipeline.register(pool)?;
        pipeline.register(Arc::clone(&registry) as Arc<dyn Augmentation>)?;
        pipeline.register(auto_register)?;
        pipeline.register(Arc::clone(&batch) as Arc<dyn Augmentation>)?;
        pipeline.register(dedup)?;
        pipeline.register(Arc::clone(&scoring) as Arc<dyn Augmentation>)?;

        // Phase two: initialize with the runtime context
        pipeline.initialize(&AugmentationContext {
            storage: Arc::clone(&storage),
            config: config.clone(),
        })?;

        let core = Core {
            index: HnswIndex::new(config.dimensions, config.distance, &config.hnsw),
            metadata_index: MetadataIndex::new(),
            stats: Statistics::new(),
            query_cache: TieredCache::new(&config.cache),
            noun_cache: TieredCache::new(&config.cache),
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            // The adapter change ring is in-memory and empty at open,
            // so the cursor can start at the epoch without replaying
            // another session's history
            last_change_seen: Mutex::new(Timestamp::from_millis(0)),
            storage,
            pipeline,
            wal,
            batch,
            registry,
            scoring,
            embedding,
            parser,
            config,
        };

        core.load_state()?;
        core.replay_wal()?;

        let core = Arc::new(core);
        let db = Self {
            workers: Mutex::new(Vec::new()),
            core,
        };
        db.start_background_tasks();

        info!(
            dimensions = db.core.config.dimensions,
            mode = db.core.config.mode.name(),
            nouns = db.core.stats.total_nouns(),
            "SynapseDB opened successfully"
        );
        Ok(db)
    }

    /// Closes the engine, flushing derived state and stopping
    /// background tasks.
    ///
    /// Consumes the handle; the storage root is unlocked once the
    /// adapter drops.
    #[instrument(skip(self))]
    pub fn close(self) -> Result<()> {
        info!("Closing SynapseDB");
        self.stop_background_tasks();

        self.core.persist_graph_updates()?;
        self.core.flush_derived()?;
        self.core.pipeline.shutdown();
        self.core.storage.flush()?;

        info!("SynapseDB closed successfully");
        Ok(())
    }

    /// Returns a reference to the engine configuration.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.core.config
    }

    /// Configured vector dimension.
    #[inline]
    pub fn dimensions(&self) -> usize {
        self.core.config.dimensions
    }

    /// Returns the storage adapter for integration testing.
    ///
    /// Hidden from documentation; production code should use the
    /// public engine surface.
    #[doc(hidden)]
    pub fn storage_for_test(&self) -> &dyn StorageAdapter {
        self.core.storage.as_ref()
    }

    // =====================================================================
    // Noun CRUD
    // =====================================================================

    /// Adds a noun, returning its id.
    ///
    /// The vector comes from the input directly or from the embedding
    /// collaborator for text payloads. Duplicate streaming ingest
    /// (matching external id inside the registry window) returns the
    /// existing id without writing.
    #[instrument(skip(self, input), fields(noun_type = %input.noun_type))]
    pub fn add_noun(&self, input: NewNoun) -> Result<NounId> {
        let core = &self.core;
        core.guard_write("add_noun")?;
        validate_new_noun(&input, core.config.dimensions)?;

        let vector = core.resolve_vector(&input.data)?;
        let service = input
            .service
            .clone()
            .unwrap_or_else(|| core.config.default_service.clone());

        let now = Timestamp::now();
        let mut metadata = input.metadata;
        SystemMetadata {
            deleted: false,
            deleted_at: None,
            placeholder: false,
            created_by: Some(service.clone()),
        }
        .apply_to(&mut metadata);

        let noun = Noun {
            id: NounId::new(),
            noun_type: input.noun_type,
            vector,
            metadata,
            created_at: now,
            updated_at: now,
            created_by: service.clone(),
        };

        let mut request = WriteRequest::new(WalOp::AddNoun, EntityRef::Noun(noun.id), service)
            .with_params(serde_json::to_value(&noun)?)
            .with_external_id(input.external_id);

        let (value, executed) = core.pipeline.execute(&mut request, &mut |_| {
            core.persist_new_noun(&noun)?;
            Ok(Some(json!({ "id": noun.id.to_string() })))
        })?;

        if executed {
            info!(id = %noun.id, "Noun added");
            return Ok(noun.id);
        }
        parse_id_value(&value).ok_or_else(|| {
            SynapseError::conflict(noun.id, "write coalesced without a usable outcome")
        })
    }

    /// Retrieves a noun by id.
    ///
    /// Honors the soft-delete filter: tombstoned nouns read as `None`.
    #[instrument(skip(self))]
    pub fn get_noun(&self, id: NounId) -> Result<Option<Noun>> {
        let core = &self.core;
        core.guard_direct_read("get_noun")?;

        let key = id.to_string();
        if let Some(noun) = core.noun_cache.get(&key) {
            return Ok(Some(noun));
        }

        let noun = with_retry(&core.config.retry, || core.storage.get_noun(id))?;
        match noun {
            Some(noun) if !noun.is_deleted() => {
                core.noun_cache.put(key, noun.clone());
                Ok(Some(noun))
            }
            _ => Ok(None),
        }
    }

    /// Updates a noun's data and/or metadata.
    ///
    /// A data change re-embeds (for text) and re-links the vector in
    /// the index; metadata merges into the existing map with the
    /// reserved namespace preserved.
    #[instrument(skip(self, update))]
    pub fn update_noun(&self, id: NounId, update: NounUpdate) -> Result<()> {
        let core = &self.core;
        core.guard_write("update_noun")?;
        validate_noun_update(&update, core.config.dimensions)?;

        let existing = core
            .storage
            .get_noun(id)?
            .filter(|n| !n.is_deleted())
            .ok_or_else(|| SynapseError::from(NotFoundError::noun(id)))?;

        let new_vector = match &update.data {
            Some(data) => Some(core.resolve_vector(data)?),
            None => None,
        };
        let vector_changed = new_vector
            .as_ref()
            .map(|v| *v != existing.vector)
            .unwrap_or(false);

        let mut updated = existing.clone();
        if let Some(vector) = new_vector {
            updated.vector = vector;
        }
        if let Some(metadata) = update.metadata {
            merge_preserving_system(&mut updated.metadata, metadata);
        }
        updated.updated_at = Timestamp::now();

        let mut request = WriteRequest::new(
            WalOp::UpdateNoun,
            EntityRef::Noun(id),
            updated.created_by.clone(),
        )
        .with_params(json!({
            "id": id.to_string(),
            "vector": updated.vector,
            "metadata": updated.metadata,
        }));

        core.pipeline.execute(&mut request, &mut |_| {
            core.apply_noun_update(&existing, &updated, vector_changed)?;
            Ok(Some(json!({ "id": id.to_string() })))
        })?;

        info!(id = %id, vector_changed, "Noun updated");
        Ok(())
    }

    /// Soft-deletes a noun.
    ///
    /// The noun stays in storage and in the graph, excluded from query
    /// results, until the periodic cleanup hard-removes it. Deleting an
    /// already-deleted noun is a no-op.
    #[instrument(skip(self))]
    pub fn delete_noun(&self, id: NounId) -> Result<()> {
        self.set_noun_tombstone(id, true)
    }

    /// Restores a soft-deleted noun.
    #[instrument(skip(self))]
    pub fn restore_noun(&self, id: NounId) -> Result<()> {
        self.set_noun_tombstone(id, false)
    }

    fn set_noun_tombstone(&self, id: NounId, deleted: bool) -> Result<()> {
        let core = &self.core;
        core.guard_write(if deleted { "delete_noun" } else { "restore_noun" })?;

        let existing = core
            .storage
            .get_noun(id)?
            .ok_or_else(|| SynapseError::from(NotFoundError::noun(id)))?;
        let mut system = existing.system();
        if system.deleted == deleted {
            return Ok(());
        }

        let mut metadata = existing.metadata.clone();
        system.deleted = deleted;
        system.deleted_at = deleted.then(Timestamp::now);
        system.apply_to(&mut metadata);

        let op = if deleted {
            WalOp::DeleteNoun
        } else {
            WalOp::RestoreNoun
        };
        let mut request = WriteRequest::new(op, EntityRef::Noun(id), existing.created_by.clone())
            .with_params(json!({ "id": id.to_string(), "metadata": metadata }));

        core.pipeline.execute(&mut request, &mut |_| {
            core.apply_tombstone(&existing, &metadata, deleted)?;
            Ok(Some(json!({ "id": id.to_string() })))
        })?;

        info!(id = %id, deleted, "Noun tombstone updated");
        Ok(())
    }

    // =====================================================================
    // Verb CRUD
    // =====================================================================

    /// Adds a verb between two existing nouns.
    ///
    /// Unspecified weight/confidence are computed by the scoring
    /// augmentation. Under write-only mode with
    /// `auto_create_missing_nouns`, absent endpoints are created as
    /// placeholders (excluded from search results).
    #[instrument(skip(self, input), fields(verb_type = %input.verb_type))]
    pub fn add_verb(&self, input: NewVerb) -> Result<VerbId> {
        let core = &self.core;
        core.guard_write("add_verb")?;
        validate_new_verb(&input)?;

        let source = core.resolve_endpoint(input.source)?;
        let target = core.resolve_endpoint(input.target)?;

        let service = input
            .service
            .clone()
            .unwrap_or_else(|| core.config.default_service.clone());

        let (weight, confidence) = match (input.weight, input.confidence) {
            (Some(w), Some(c)) => (w, c),
            (explicit_weight, explicit_confidence) => {
                let pair_frequency = core.pair_frequency(source.id, target.id)?;
                let (w, c) = core.scoring.score(&source, &target, pair_frequency);
                (
                    explicit_weight.unwrap_or(w),
                    explicit_confidence.unwrap_or(c),
                )
            }
        };

        // A verb's vector is the mean of its endpoints; placeholder
        // endpoints carry no signal, so such verbs go unindexed
        let vector = (!source.is_placeholder()
            && !target.is_placeholder()
            && source.vector.len() == target.vector.len()
            && !source.vector.is_empty())
        .then(|| average(&source.vector, &target.vector));

        let now = Timestamp::now();
        let mut metadata = input.metadata;
        SystemMetadata {
            deleted: false,
            deleted_at: None,
            placeholder: false,
            created_by: Some(service.clone()),
        }
        .apply_to(&mut metadata);

        let verb = Verb {
            id: VerbId::new(),
            source: source.id,
            target: target.id,
            verb_type: input.verb_type,
            weight,
            confidence,
            vector,
            metadata,
            created_at: now,
            updated_at: now,
            created_by: service.clone(),
        };

        let mut request = WriteRequest::new(WalOp::AddVerb, EntityRef::Verb(verb.id), service)
            .with_params(serde_json::to_value(&verb)?);

        let (value, executed) = core.pipeline.execute(&mut request, &mut |_| {
            core.persist_new_verb(&verb)?;
            Ok(Some(json!({ "id": verb.id.to_string() })))
        })?;

        if executed {
            info!(id = %verb.id, "Verb added");
            return Ok(verb.id);
        }
        parse_verb_id_value(&value).ok_or_else(|| {
            SynapseError::conflict(verb.id, "write coalesced without a usable outcome")
        })
    }

    /// Adds a verb between externally-identified endpoints.
    ///
    /// External ids resolve through the entity registry; unresolved ids
    /// are auto-created as placeholders under write-only mode with
    /// `auto_create_missing_nouns` and registered for subsequent
    /// lookups.
    #[instrument(skip(self))]
    pub fn add_verb_external(
        &self,
        source_external: &str,
        target_external: &str,
        verb_type: VerbType,
    ) -> Result<VerbId> {
        let core = &self.core;
        core.guard_write("add_verb")?;

        let source = core.resolve_external_endpoint(source_external)?;
        let target = core.resolve_external_endpoint(target_external)?;
        self.add_verb(NewVerb::new(source, target, verb_type))
    }

    /// Retrieves a verb by id.
    ///
    /// Unlike [`get_noun`](Self::get_noun), a tombstoned verb is still
    /// returned: graph traversal needs the record to skip the edge, and
    /// verb lookups are an internal surface.
    #[instrument(skip(self))]
    pub fn get_verb(&self, id: VerbId) -> Result<Option<Verb>> {
        self.core.guard_direct_read("get_verb")?;
        with_retry(&self.core.config.retry, || self.core.storage.get_verb(id))
    }

    /// All live verbs touching a noun, in the given direction.
    #[instrument(skip(self))]
    pub fn get_verbs_for_noun(
        &self,
        id: NounId,
        direction: VerbDirection,
    ) -> Result<Vec<Verb>> {
        self.core.guard_direct_read("get_verbs_for_noun")?;
        let verbs = self.core.storage.get_verbs_touching(id)?;
        Ok(verbs
            .into_iter()
            .filter(|v| !v.is_deleted())
            .filter(|v| match direction {
                VerbDirection::Outgoing => v.source == id,
                VerbDirection::Incoming => v.target == id,
                VerbDirection::Both => true,
            })
            .collect())
    }

    /// Soft-deletes a verb.
    #[instrument(skip(self))]
    pub fn delete_verb(&self, id: VerbId) -> Result<()> {
        let core = &self.core;
        core.guard_write("delete_verb")?;

        let existing = core
            .storage
            .get_verb(id)?
            .ok_or_else(|| SynapseError::from(NotFoundError::verb(id)))?;
        if existing.is_deleted() {
            return Ok(());
        }

        let mut metadata = existing.metadata.clone();
        SystemMetadata {
            deleted: true,
            deleted_at: Some(Timestamp::now()),
            ..existing.system()
        }
        .apply_to(&mut metadata);

        let mut request =
            WriteRequest::new(WalOp::DeleteVerb, EntityRef::Verb(id), existing.created_by.clone())
                .with_params(json!({ "id": id.to_string(), "metadata": metadata }));

        core.pipeline.execute(&mut request, &mut |_| {
            core.apply_verb_tombstone(&existing, &metadata)?;
            Ok(Some(json!({ "id": id.to_string() })))
        })?;

        info!(id = %id, "Verb deleted");
        Ok(())
    }

    // =====================================================================
    // Search and queries
    // =====================================================================

    /// Vector similarity search.
    ///
    /// Returns ranked hits with optional metadata/type/id filtering.
    /// An empty corpus yields empty results, never an error.
    #[instrument(skip(self, vector, opts))]
    pub fn search_vector(&self, vector: &[f32], opts: &SearchOptions) -> Result<QueryResults> {
        let query = self.search_query(LikeClause::Vector(vector.to_vec()), opts);
        self.find(query)
    }

    /// Similarity search over text, embedded via the collaborator.
    #[instrument(skip(self, text, opts))]
    pub fn search_text(&self, text: &str, opts: &SearchOptions) -> Result<QueryResults> {
        let query = self.search_query(LikeClause::Text(text.to_string()), opts);
        self.find(query)
    }

    fn search_query(&self, like: LikeClause, opts: &SearchOptions) -> TripleQuery {
        TripleQuery {
            like: Some(like),
            where_clause: opts.filter.clone(),
            connected: None,
            mode: crate::query::QueryMode::Auto,
            limit: opts.limit,
            offset: opts.offset,
            cursor: opts.cursor.clone(),
            include_deleted: opts.include_deleted,
            noun_type: opts.noun_type,
            item_ids: opts.item_ids.clone(),
            threshold: opts.threshold,
            weights: Default::default(),
        }
    }

    /// Executes a structured triple-intelligence query.
    ///
    /// Queries without metadata filters are served from the result
    /// cache when possible; filtered queries bypass it.
    #[instrument(skip(self, query))]
    pub fn find(&self, mut query: TripleQuery) -> Result<QueryResults> {
        let core = &self.core;
        core.guard_search("find")?;

        if query.limit > MAX_QUERY_LIMIT {
            return Err(ValidationError::limit_exceeded(query.limit, MAX_QUERY_LIMIT).into());
        }

        // Resolve text clauses through the embedding collaborator
        if let Some(LikeClause::Text(text)) = &query.like {
            let service = core.embedding.as_deref().ok_or_else(|| {
                SynapseError::from(ValidationError::missing_component(
                    "embedding service",
                    "text similarity requires an attached embedding service",
                ))
            })?;
            let vector = service.embed(text)?;
            query.like = Some(LikeClause::Vector(vector));
        }

        // Metadata-filtered queries bypass the cache
        let cache_slot = query
            .where_clause
            .is_none()
            .then(|| core.query_cache_key(&query));
        if let Some(key) = &cache_slot {
            if let Some(results) = core.query_cache.get(key) {
                return Ok(results);
            }
        }

        let ctx = PlannerContext {
            index: &core.index,
            metadata_index: &core.metadata_index,
            storage: core.storage.as_ref(),
            distance: core.config.distance,
        };
        let results = plan::execute(&ctx, &query)?;

        if let Some(key) = cache_slot {
            core.query_cache.put(key, results.clone());
        }
        Ok(results)
    }

    /// Executes a natural-language query via the parser collaborator.
    #[instrument(skip(self))]
    pub fn find_text(&self, query: &str) -> Result<QueryResults> {
        let parsed = {
            let parser = self.core.parser.as_deref().ok_or_else(|| {
                SynapseError::from(ValidationError::missing_component(
                    "query parser",
                    "natural-language queries require an attached parser",
                ))
            })?;
            parser.parse(query)?
        };
        self.find(parsed)
    }

    // =====================================================================
    // Statistics, maintenance, backup
    // =====================================================================

    /// Aggregated statistics with throttle telemetry.
    #[instrument(skip(self, opts))]
    pub fn get_statistics(&self, opts: &StatisticsOptions) -> Result<StatisticsReport> {
        let core = &self.core;
        if opts.force_refresh {
            core.refresh_type_counts();
        }
        let mut statistics = core.stats.snapshot();
        if let Some(service) = &opts.service {
            statistics.services.retain(|name, _| name == service);
        }
        Ok(StatisticsReport {
            statistics,
            storage: core.storage.status()?,
            throttling: core.storage.throttle_telemetry(),
            cache: core.query_cache.stats(),
            wal_pending: core.wal.pending(),
        })
    }

    /// Runs one cleanup pass, hard-removing tombstones older than the
    /// configured age. Returns the number of entities purged.
    ///
    /// Normally driven by the background task; exposed for
    /// deterministic testing and manual compaction.
    #[instrument(skip(self))]
    pub fn run_cleanup(&self) -> Result<usize> {
        self.core.run_cleanup()
    }

    /// Applies changes recorded by the adapter since the last
    /// reconciliation (another process writing the same root).
    /// Returns the number of changes applied.
    #[instrument(skip(self))]
    pub fn reconcile_changes(&self) -> Result<usize> {
        self.core.reconcile_changes()
    }

    /// Exports the full corpus.
    #[instrument(skip(self))]
    pub fn backup(&self) -> Result<BackupData> {
        let core = &self.core;
        core.guard_search("backup")?;

        Ok(BackupData {
            nouns: core.collect_all_nouns()?,
            verbs: core.collect_all_verbs()?,
            hnsw_system: Some(core.index.system_record()),
            statistics: core.stats.snapshot(),
        })
    }

    /// Imports a backup, optionally clearing existing contents first.
    #[instrument(skip(self, data, opts), fields(nouns = data.nouns.len(), verbs = data.verbs.len()))]
    pub fn restore(&self, data: BackupData, opts: &RestoreOptions) -> Result<()> {
        let core = &self.core;
        core.guard_write("restore")?;

        if opts.clear_existing {
            core.storage.clear()?;
            core.index.rebuild_from_vectors(std::iter::empty())?;
            core.metadata_index.clear();
            core.stats.reset();
            core.query_cache.clear();
            core.noun_cache.clear();
        }

        for noun in &data.nouns {
            core.persist_new_noun(noun)?;
        }
        for verb in &data.verbs {
            core.persist_new_verb(verb)?;
        }
        core.persist_graph_updates()?;
        // The import path counted tombstoned entities as live; recount
        // from the index
        core.refresh_type_counts();
        core.flush_derived()?;

        info!("Restore complete");
        Ok(())
    }

    // =====================================================================
    // Blobs (virtual-filesystem collaborator surface)
    // =====================================================================

    /// Stores a content-addressed payload.
    pub fn put_blob(&self, bytes: &[u8]) -> Result<crate::storage::BlobRef> {
        self.core.guard_write("put_blob")?;
        self.core.storage.put_blob(bytes)
    }

    /// Reads a payload, acquiring a reference.
    pub fn get_blob(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        self.core.guard_direct_read("get_blob")?;
        self.core.storage.get_blob(hash)
    }

    /// Releases a payload reference; reclaims at zero.
    pub fn release_blob(&self, hash: &str) -> Result<bool> {
        self.core.guard_write("release_blob")?;
        self.core.storage.release_blob(hash)
    }

    // =====================================================================
    // Background tasks
    // =====================================================================

    fn start_background_tasks(&self) {
        let mut workers = self.workers.lock().expect("workers lock");

        if self.core.config.cleanup.enabled {
            workers.push(spawn_worker(
                "synapse-cleanup",
                self.core.config.cleanup.interval,
                Arc::clone(&self.core),
                |core| {
                    // Background tasks log and continue
                    if let Err(e) = core.run_cleanup() {
                        warn!(error = %e, "Cleanup pass failed");
                    }
                },
            ));
        }

        workers.push(spawn_worker(
            "synapse-flush",
            self.core.config.metadata_flush_interval,
            Arc::clone(&self.core),
            |core| {
                if let Err(e) = core.flush_derived() {
                    warn!(error = %e, "Derived-state flush failed");
                }
                core.query_cache.tick_update_cycle(true);
                core.noun_cache.tick_update_cycle(true);
            },
        ));
    }

    fn stop_background_tasks(&self) {
        let mut workers = self.workers.lock().expect("workers lock");
        for worker in workers.iter_mut() {
            let _ = worker.stop.send(());
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
        workers.clear();
    }
}

impl Drop for SynapseDB {
    fn drop(&mut self) {
        self.stop_background_tasks();
    }
}

fn spawn_worker(
    name: &'static str,
    interval: Duration,
    core: Arc<Core>,
    task: impl Fn(&Core) + Send + 'static,
) -> Worker {
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => task(&core),
                _ => return,
            }
        })
        .expect("spawn background worker");
    Worker {
        stop: stop_tx,
        handle: Some(handle),
    }
}

fn parse_id_value(value: &Option<serde_json::Value>) -> Option<NounId> {
    value
        .as_ref()?
        .get("id")?
        .as_str()
        .and_then(NounId::parse)
}

fn parse_verb_id_value(value: &Option<serde_json::Value>) -> Option<VerbId> {
    value
        .as_ref()?
        .get("id")?
        .as_str()
        .and_then(VerbId::parse)
}

impl Core {
    // =====================================================================
    // Guards and small helpers
    // =====================================================================

    fn guard_write(&self, operation: &str) -> Result<()> {
        if !self.config.mode.allows_writes() {
            return Err(
                ValidationError::mode_violation(operation, self.config.mode.name()).into(),
            );
        }
        Ok(())
    }

    fn guard_search(&self, operation: &str) -> Result<()> {
        if !self.config.mode.allows_search() {
            return Err(
                ValidationError::mode_violation(operation, self.config.mode.name()).into(),
            );
        }
        Ok(())
    }

    fn guard_direct_read(&self, operation: &str) -> Result<()> {
        if !self.config.mode.allows_direct_reads() {
            return Err(
                ValidationError::mode_violation(operation, self.config.mode.name()).into(),
            );
        }
        Ok(())
    }

    fn id_lock(&self, id: uuid::Uuid) -> &Mutex<()> {
        let stripe = id.as_bytes()[15] as usize % self.locks.len();
        &self.locks[stripe]
    }

    fn resolve_vector(&self, data: &NounData) -> Result<Vector> {
        match data {
            NounData::Vector(vector) => Ok(vector.clone()),
            NounData::Text(text) => {
                let service = self.embedding.as_deref().ok_or_else(|| {
                    SynapseError::from(ValidationError::missing_component(
                        "embedding service",
                        "text payloads require an attached embedding service",
                    ))
                })?;
                let vector = service.embed(text)?;
                if vector.len() != self.config.dimensions {
                    return Err(ValidationError::dimension_mismatch(
                        self.config.dimensions,
                        vector.len(),
                    )
                    .into());
                }
                Ok(vector)
            }
        }
    }

    fn note_stats(&self, f: impl FnOnce(&Statistics)) {
        if self.config.mode.allows_statistics_updates() {
            f(&self.stats);
        }
    }

    fn invalidate(&self, change: DataChange, ids: &[NounId]) {
        // Conservative: any write clears all query-result entries;
        // per-entity entries evict precisely
        let _ = change;
        self.query_cache.clear();
        for id in ids {
            self.noun_cache.remove(&id.to_string());
        }
    }

    fn query_cache_key(&self, query: &TripleQuery) -> String {
        let like_part = match &query.like {
            Some(LikeClause::Vector(v)) => {
                use sha2::Digest;
                let mut hasher = sha2::Sha256::new();
                for component in v {
                    hasher.update(component.to_le_bytes());
                }
                hex::encode(hasher.finalize())
            }
            Some(LikeClause::Id(id)) => id.to_string(),
            Some(LikeClause::Text(text)) => text.clone(),
            None => String::new(),
        };
        cache_key([
            ("like", like_part),
            ("mode", format!("{:?}", query.mode)),
            ("limit", query.limit.to_string()),
            ("offset", format!("{:?}", query.offset)),
            ("cursor", format!("{:?}", query.cursor)),
            ("type", format!("{:?}", query.noun_type)),
            ("ids", format!("{:?}", query.item_ids)),
            ("threshold", format!("{:?}", query.threshold)),
            ("deleted", query.include_deleted.to_string()),
            (
                "connected",
                format!(
                    "{:?}",
                    query.connected.as_ref().map(|c| (c.from, c.to, &c.via, c.max_depth))
                ),
            ),
        ])
    }

    // =====================================================================
    // Write-path execution
    // =====================================================================

    fn persist_new_noun(&self, noun: &Noun) -> Result<()> {
        let _guard = self.id_lock(noun.id.0).lock().expect("stripe lock");

        // Storage first (source of truth), then the derived structures
        with_retry(&self.config.retry, || {
            self.batch.submit(
                BatchItem::SaveNoun(Box::new(noun.clone())),
                self.config.timeouts.add,
            )
        })?;
        self.index.insert(EntityRef::Noun(noun.id), &noun.vector)?;
        self.metadata_index.index_entity(
            Partition::Noun(noun.noun_type),
            EntityRef::Noun(noun.id),
            &noun.metadata,
        );

        self.note_stats(|stats| {
            stats.noun_added(&noun.created_by, noun.noun_type);
            stats.metadata_written(&noun.created_by);
            let fields: Vec<(String, crate::metadata::MetadataValue)> = flatten(&noun.metadata);
            stats.track_field_names(fields.iter().map(|(path, _)| path.as_str()));
        });

        self.persist_graph_updates()?;
        self.invalidate(DataChange::Add, &[noun.id]);
        Ok(())
    }

    fn apply_noun_update(&self, old: &Noun, new: &Noun, vector_changed: bool) -> Result<()> {
        let _guard = self.id_lock(new.id.0).lock().expect("stripe lock");

        with_retry(&self.config.retry, || {
            self.batch.submit(
                BatchItem::SaveNoun(Box::new(new.clone())),
                self.config.timeouts.add,
            )
        })?;

        if vector_changed {
            // Re-link: the graph has no vector-update primitive
            self.index.remove(EntityRef::Noun(new.id))?;
            self.index.insert(EntityRef::Noun(new.id), &new.vector)?;
        }
        self.metadata_index.reindex_entity(
            Partition::Noun(new.noun_type),
            EntityRef::Noun(new.id),
            &old.metadata,
            &new.metadata,
        );

        self.note_stats(|stats| {
            stats.metadata_written(&new.created_by);
            let fields: Vec<(String, crate::metadata::MetadataValue)> = flatten(&new.metadata);
            stats.track_field_names(fields.iter().map(|(path, _)| path.as_str()));
        });

        self.persist_graph_updates()?;
        self.invalidate(DataChange::Update, &[new.id]);
        Ok(())
    }

    fn apply_tombstone(
        &self,
        noun: &Noun,
        metadata: &crate::metadata::MetadataMap,
        deleted: bool,
    ) -> Result<()> {
        let _guard = self.id_lock(noun.id.0).lock().expect("stripe lock");

        with_retry(&self.config.retry, || {
            self.batch.submit(
                BatchItem::SaveNounMetadata(noun.id, metadata.clone()),
                self.config.timeouts.delete,
            )
        })?;
        self.metadata_index.reindex_entity(
            Partition::Noun(noun.noun_type),
            EntityRef::Noun(noun.id),
            &noun.metadata,
            metadata,
        );

        self.note_stats(|stats| {
            if deleted {
                stats.noun_removed(&noun.created_by, noun.noun_type);
            } else {
                stats.noun_added(&noun.created_by, noun.noun_type);
            }
        });

        self.invalidate(DataChange::Delete, &[noun.id]);
        Ok(())
    }

    fn persist_new_verb(&self, verb: &Verb) -> Result<()> {
        let _guard = self.id_lock(verb.id.0).lock().expect("stripe lock");

        with_retry(&self.config.retry, || {
            self.batch.submit(
                BatchItem::SaveVerb(Box::new(verb.clone())),
                self.config.timeouts.add,
            )
        })?;
        if let Some(vector) = &verb.vector {
            self.index.insert(EntityRef::Verb(verb.id), vector)?;
        }
        self.metadata_index.index_entity(
            Partition::Verb(verb.verb_type),
            EntityRef::Verb(verb.id),
            &verb.metadata,
        );

        self.note_stats(|stats| {
            stats.verb_added(&verb.created_by, verb.verb_type);
        });

        self.persist_graph_updates()?;
        self.invalidate(DataChange::Add, &[verb.source, verb.target]);
        Ok(())
    }

    fn apply_verb_tombstone(
        &self,
        verb: &Verb,
        metadata: &crate::metadata::MetadataMap,
    ) -> Result<()> {
        let _guard = self.id_lock(verb.id.0).lock().expect("stripe lock");

        with_retry(&self.config.retry, || {
            self.batch.submit(
                BatchItem::SaveVerbMetadata(verb.id, metadata.clone()),
                self.config.timeouts.delete,
            )
        })?;
        self.metadata_index.reindex_entity(
            Partition::Verb(verb.verb_type),
            EntityRef::Verb(verb.id),
            &verb.metadata,
            metadata,
        );
        self.note_stats(|stats| {
            stats.verb_removed(&verb.created_by, verb.verb_type);
        });
        self.invalidate(DataChange::Delete, &[verb.source, verb.target]);
        Ok(())
    }

    /// Persists dirty graph nodes and the graph-global record.
    fn persist_graph_updates(&self) -> Result<()> {
        let dirty = self.index.take_dirty();
        for id in dirty {
            if let Some(record) = self.index.node_record(id)? {
                with_retry(&self.config.retry, || {
                    self.batch.submit(
                        BatchItem::SaveHnswNode(Box::new(record.clone())),
                        self.config.timeouts.add,
                    )
                })?;
            }
        }
        with_retry(&self.config.retry, || {
            self.batch.submit(
                BatchItem::SaveHnswSystem(self.index.system_record()),
                self.config.timeouts.add,
            )
        })?;
        self.note_stats(|stats| stats.set_hnsw_size(self.index.len() as u64));
        Ok(())
    }

    fn resolve_endpoint(&self, id: NounId) -> Result<Noun> {
        if let Some(noun) = self.storage.get_noun(id)? {
            return Ok(noun);
        }

        let auto_create = self.config.auto_create_missing_nouns
            && matches!(self.config.mode, Mode::WriteOnly { .. });
        if !auto_create {
            return Err(NotFoundError::noun(id).into());
        }

        self.create_placeholder(id)
    }

    fn resolve_external_endpoint(&self, external_id: &str) -> Result<NounId> {
        if let Some(id) = self.registry.resolve(external_id) {
            return Ok(id);
        }

        let auto_create = self.config.auto_create_missing_nouns
            && matches!(self.config.mode, Mode::WriteOnly { .. });
        if !auto_create {
            return Err(NotFoundError::noun(external_id).into());
        }

        let placeholder = self.create_placeholder(NounId::new())?;
        self.registry.register(external_id, placeholder.id);
        Ok(placeholder.id)
    }

    /// Creates a placeholder noun satisfying a verb endpoint during
    /// streaming ingest. Placeholders carry a zero vector and are
    /// excluded from search results by the planner.
    fn create_placeholder(&self, id: NounId) -> Result<Noun> {
        let now = Timestamp::now();
        let mut metadata = crate::metadata::MetadataMap::new();
        SystemMetadata {
            deleted: false,
            deleted_at: None,
            placeholder: true,
            created_by: Some(self.config.default_service.clone()),
        }
        .apply_to(&mut metadata);

        let noun = Noun {
            id,
            noun_type: NounType::Thing,
            vector: vec![0.0; self.config.dimensions],
            metadata,
            created_at: now,
            updated_at: now,
            created_by: self.config.default_service.clone(),
        };
        self.persist_new_noun(&noun)?;
        debug!(id = %noun.id, "Placeholder noun created");
        Ok(noun)
    }

    fn pair_frequency(&self, source: NounId, target: NounId) -> Result<usize> {
        Ok(self
            .storage
            .get_verbs_touching(source)?
            .iter()
            .filter(|v| {
                (v.source == source && v.target == target)
                    || (v.source == target && v.target == source)
            })
            .count())
    }

    // =====================================================================
    // Open-time state loading
    // =====================================================================

    fn load_state(&self) -> Result<()> {
        // Statistics snapshot
        if let Some(snapshot) = self.storage.get_statistics()? {
            self.stats.load_snapshot(&snapshot);
        }

        // Metadata index: persisted snapshot unless a rebuild was
        // requested
        let mut have_metadata = false;
        if !self.config.rebuild_metadata_on_open {
            if let Some(json) = self.storage.get_system_doc(METADATA_INDEX_DOC)? {
                match serde_json::from_str::<MetadataIndexSnapshot>(&json) {
                    Ok(snapshot) => {
                        self.metadata_index.load_snapshot(snapshot);
                        have_metadata = true;
                    }
                    Err(e) => warn!(error = %e, "Discarding unreadable metadata index snapshot"),
                }
            }
        }
        if !have_metadata {
            self.rebuild_metadata_index()?;
        }

        // HNSW graph: eager load, or lazy paging for large corpora
        let corpus = self.storage.count_nouns()? + self.storage.count_verbs()?;
        let lazy = self.config.lazy_load || corpus > INTELLIGENT_LOAD_MAX_EAGER;
        if lazy {
            if corpus > INTELLIGENT_LOAD_MAX_EAGER && !self.config.lazy_load {
                warn!(corpus, "Corpus exceeds eager-load budget; switching to lazy loading");
            }
            let system = self.storage.get_hnsw_system()?.unwrap_or_default();
            self.index.restore_system(&system, corpus as usize)?;
            self.index
                .attach_store(Arc::new(AdapterNodeStore(Arc::clone(&self.storage))), 0)?;
        } else if corpus > 0 {
            let records = self.storage.all_hnsw_nodes()?;
            let system = self.storage.get_hnsw_system()?;
            self.index.load(records, system.as_ref())?;
        }
        self.note_stats(|stats| stats.set_hnsw_size(self.index.len() as u64));

        // Fresh statistics for a storage root without a snapshot
        if self.storage.get_statistics()?.is_none() && corpus > 0 {
            self.refresh_type_counts();
        }

        Ok(())
    }

    /// Rebuilds the metadata index from entity records.
    fn rebuild_metadata_index(&self) -> Result<()> {
        self.metadata_index.clear();

        let mut cursor: Option<String> = None;
        loop {
            let page = self.storage.get_nouns(&GetOptions {
                pagination: Pagination {
                    limit: Some(1000),
                    cursor: cursor.clone(),
                    ..Default::default()
                },
                include_deleted: true,
                ..Default::default()
            })?;
            for noun in &page.items {
                self.metadata_index.index_entity(
                    Partition::Noun(noun.noun_type),
                    EntityRef::Noun(noun.id),
                    &noun.metadata,
                );
            }
            if !page.has_more {
                break;
            }
            cursor = page.next_cursor;
        }

        let mut cursor: Option<String> = None;
        loop {
            let page = self.storage.get_verbs(&GetOptions {
                pagination: Pagination {
                    limit: Some(1000),
                    cursor: cursor.clone(),
                    ..Default::default()
                },
                include_deleted: true,
                ..Default::default()
            })?;
            for verb in &page.items {
                self.metadata_index.index_entity(
                    Partition::Verb(verb.verb_type),
                    EntityRef::Verb(verb.id),
                    &verb.metadata,
                );
            }
            if !page.has_more {
                break;
            }
            cursor = page.next_cursor;
        }

        debug!("Metadata index rebuilt from storage");
        Ok(())
    }

    /// Replays unacknowledged write-ahead records, idempotently by id.
    fn replay_wal(&self) -> Result<()> {
        let records = self.wal.replay()?;
        if records.is_empty() {
            return Ok(());
        }
        info!(count = records.len(), "Replaying unacknowledged write-ahead records");

        for record in records {
            let params: serde_json::Value = serde_json::from_str(&record.params)
                .map_err(|e| StorageError::wal(format!("unreadable replay params: {}", e)))?;
            let applied = self.replay_record(record.op, &params);
            match applied {
                Ok(()) => self.wal.ack(record.seq)?,
                Err(e) => {
                    // Leave the record for the next replay attempt
                    warn!(seq = record.seq, error = %e, "Replay of record failed");
                }
            }
        }
        Ok(())
    }

    fn replay_record(&self, op: WalOp, params: &serde_json::Value) -> Result<()> {
        match op {
            WalOp::AddNoun => {
                let noun: Noun = serde_json::from_value(params.clone())?;
                if self.storage.get_noun(noun.id)?.is_none() {
                    self.persist_new_noun(&noun)?;
                }
            }
            WalOp::AddVerb => {
                let verb: Verb = serde_json::from_value(params.clone())?;
                if self.storage.get_verb(verb.id)?.is_none() {
                    self.persist_new_verb(&verb)?;
                }
            }
            WalOp::UpdateNoun | WalOp::DeleteNoun | WalOp::RestoreNoun => {
                let id = params
                    .get("id")
                    .and_then(|v| v.as_str())
                    .and_then(NounId::parse)
                    .ok_or_else(|| StorageError::wal("replay record without id"))?;
                if let Some(existing) = self.storage.get_noun(id)? {
                    let metadata = params
                        .get("metadata")
                        .cloned()
                        .map(serde_json::from_value)
                        .transpose()?
                        .unwrap_or_else(|| existing.metadata.clone());
                    let mut updated = existing.clone();
                    updated.metadata = metadata;
                    if let Some(vector) = params.get("vector") {
                        if let Ok(vector) = serde_json::from_value::<Vector>(vector.clone()) {
                            updated.vector = vector;
                        }
                    }
                    let vector_changed = updated.vector != existing.vector;
                    self.apply_noun_update(&existing, &updated, vector_changed)?;
                }
            }
            WalOp::DeleteVerb => {
                let id = params
                    .get("id")
                    .and_then(|v| v.as_str())
                    .and_then(VerbId::parse)
                    .ok_or_else(|| StorageError::wal("replay record without id"))?;
                if let Some(existing) = self.storage.get_verb(id)? {
                    let metadata = params
                        .get("metadata")
                        .cloned()
                        .map(serde_json::from_value)
                        .transpose()?
                        .unwrap_or_else(|| existing.metadata.clone());
                    self.apply_verb_tombstone(&existing, &metadata)?;
                }
            }
            WalOp::PurgeNoun => {
                let id = params
                    .get("id")
                    .and_then(|v| v.as_str())
                    .and_then(NounId::parse)
                    .ok_or_else(|| StorageError::wal("replay record without id"))?;
                self.purge_noun(id)?;
            }
        }
        Ok(())
    }

    // =====================================================================
    // Cleanup and reconciliation
    // =====================================================================

    /// One cleanup pass over tombstoned entities.
    fn run_cleanup(&self) -> Result<usize> {
        let max_age = self.config.cleanup.max_age;
        let now = Timestamp::now();
        let tombstoned = self
            .metadata_index
            .query(&MetadataPredicate::eq(DELETED_KEY, true), None);

        let mut purged = 0usize;
        for entity in tombstoned {
            let old_enough = |meta: &crate::metadata::MetadataMap| {
                SystemMetadata::from_metadata(meta)
                    .deleted_at
                    .map(|at| now.millis_since(at) as u128 >= max_age.as_millis())
                    .unwrap_or(false)
            };

            match entity {
                EntityRef::Noun(id) => {
                    let Some(metadata) = self.storage.get_noun_metadata(id)? else {
                        continue;
                    };
                    if old_enough(&metadata) {
                        self.purge_noun(id)?;
                        purged += 1;
                    }
                }
                EntityRef::Verb(id) => {
                    let Some(metadata) = self.storage.get_verb_metadata(id)? else {
                        continue;
                    };
                    if old_enough(&metadata) {
                        self.purge_verb(id)?;
                        purged += 1;
                    }
                }
            }
        }

        if purged > 0 {
            info!(purged, "Cleanup pass reclaimed tombstones");
            self.persist_graph_updates()?;
        }
        Ok(purged)
    }

    /// Hard-removes a noun: storage first, then graph, then metadata
    /// index, so a crash mid-removal leaves the derived structures
    /// pointing at a storage tombstone rather than storage pointing at
    /// missing graph nodes.
    fn purge_noun(&self, id: NounId) -> Result<()> {
        let _guard = self.id_lock(id.0).lock().expect("stripe lock");

        let Some(noun) = self.storage.get_noun(id)? else {
            return Ok(());
        };

        // Cascade: verbs referencing a purged noun would dangle
        let touching = self.storage.get_verbs_touching(id)?;

        self.storage.delete_noun(id)?;
        self.index.remove(EntityRef::Noun(id))?;
        self.metadata_index
            .unindex_entity(Partition::Noun(noun.noun_type), EntityRef::Noun(id), &noun.metadata);

        for verb in touching {
            self.purge_verb(verb.id)?;
        }

        self.invalidate(DataChange::Delete, &[id]);
        debug!(id = %id, "Noun purged");
        Ok(())
    }

    fn purge_verb(&self, id: VerbId) -> Result<()> {
        let Some(verb) = self.storage.get_verb(id)? else {
            return Ok(());
        };
        self.storage.delete_verb(id)?;
        self.index.remove(EntityRef::Verb(id))?;
        self.metadata_index.unindex_entity(
            Partition::Verb(verb.verb_type),
            EntityRef::Verb(id),
            &verb.metadata,
        );
        // A live verb purged by cascade still counts as removed
        if !verb.is_deleted() {
            self.note_stats(|stats| stats.verb_removed(&verb.created_by, verb.verb_type));
        }
        debug!(id = %id, "Verb purged");
        Ok(())
    }

    /// Applies adapter-recorded changes to the in-memory indexes.
    fn reconcile_changes(&self) -> Result<usize> {
        let since = *self.last_change_seen.lock().expect("change cursor lock");
        let changes = self.storage.get_changes_since(since, 1000)?;
        if changes.is_empty() {
            return Ok(0);
        }

        let mut latest = since;
        let count = changes.len();
        for change in changes {
            latest = latest.max(change.timestamp);
            self.query_cache.note_external_change();

            match (change.operation, change.entity_id) {
                (ChangeOp::Delete, EntityRef::Noun(id)) => {
                    self.index.remove(EntityRef::Noun(id))?;
                    for noun_type in NounType::ALL {
                        self.metadata_index
                            .purge_entity(Partition::Noun(noun_type), EntityRef::Noun(id));
                    }
                    self.noun_cache.remove(&id.to_string());
                }
                (ChangeOp::Delete, EntityRef::Verb(id)) => {
                    self.index.remove(EntityRef::Verb(id))?;
                    for verb_type in VerbType::ALL {
                        self.metadata_index
                            .purge_entity(Partition::Verb(verb_type), EntityRef::Verb(id));
                    }
                }
                (_, EntityRef::Noun(id)) => {
                    if let Some(noun) = self.storage.get_noun(id)? {
                        self.metadata_index
                            .purge_entity(Partition::Noun(noun.noun_type), EntityRef::Noun(id));
                        self.metadata_index.index_entity(
                            Partition::Noun(noun.noun_type),
                            EntityRef::Noun(id),
                            &noun.metadata,
                        );
                        self.index.remove(EntityRef::Noun(id))?;
                        self.index.insert(EntityRef::Noun(id), &noun.vector)?;
                        self.noun_cache.remove(&id.to_string());
                    }
                }
                (_, EntityRef::Verb(id)) => {
                    if let Some(verb) = self.storage.get_verb(id)? {
                        self.metadata_index
                            .purge_entity(Partition::Verb(verb.verb_type), EntityRef::Verb(id));
                        self.metadata_index.index_entity(
                            Partition::Verb(verb.verb_type),
                            EntityRef::Verb(id),
                            &verb.metadata,
                        );
                        if let Some(vector) = &verb.vector {
                            self.index.remove(EntityRef::Verb(id))?;
                            self.index.insert(EntityRef::Verb(id), vector)?;
                        }
                    }
                }
            }
        }

        *self.last_change_seen.lock().expect("change cursor lock") = latest;
        self.query_cache.clear();
        debug!(count, "Reconciled external changes");
        Ok(count)
    }

    // =====================================================================
    // Derived-state flush and statistics refresh
    // =====================================================================

    fn flush_derived(&self) -> Result<()> {
        if self.metadata_index.take_dirty() {
            let snapshot = self.metadata_index.snapshot();
            self.storage
                .save_system_doc(METADATA_INDEX_DOC, &serde_json::to_string(&snapshot)?)?;
        }
        if self.stats.take_dirty() {
            self.storage.save_statistics(&self.stats.snapshot())?;
        }
        self.registry.persist()?;
        self.wal.checkpoint()?;
        Ok(())
    }

    /// Recounts the live per-type counters from the metadata index.
    fn refresh_type_counts(&self) {
        if !self.config.mode.allows_statistics_updates() {
            return;
        }
        let deleted: HashSet<EntityRef> = self
            .metadata_index
            .query(&MetadataPredicate::eq(DELETED_KEY, true), None);

        let snapshot = self.stats.snapshot();
        let mut refreshed = snapshot.clone();
        refreshed.noun_counts = NounType::ALL
            .iter()
            .map(|t| {
                self.metadata_index
                    .universe(Some(Partition::Noun(*t)))
                    .iter()
                    .filter(|e| !deleted.contains(e))
                    .count() as u32
            })
            .collect();
        refreshed.verb_counts = VerbType::ALL
            .iter()
            .map(|t| {
                self.metadata_index
                    .universe(Some(Partition::Verb(*t)))
                    .iter()
                    .filter(|e| !deleted.contains(e))
                    .count() as u32
            })
            .collect();
        self.stats.load_snapshot(&refreshed);
    }

    // =====================================================================
    // Backup collection
    // =====================================================================

    fn collect_all_nouns(&self) -> Result<Vec<Noun>> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.storage.get_nouns(&GetOptions {
                pagination: Pagination {
                    limit: Some(1000),
                    cursor: cursor.clone(),
                    ..Default::default()
                },
                include_deleted: true,
                ..Default::default()
            })?;
            out.extend(page.items);
            if !page.has_more {
                return Ok(out);
            }
            cursor = page.next_cursor;
        }
    }

    fn collect_all_verbs(&self) -> Result<Vec<Verb>> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.storage.get_verbs(&GetOptions {
                pagination: Pagination {
                    limit: Some(1000),
                    cursor: cursor.clone(),
                    ..Default::default()
                },
                include_deleted: true,
                ..Default::default()
            })?;
            out.extend(page.items);
            if !page.has_more {
                return Ok(out);
            }
            cursor = page.next_cursor;
        }
    }
}

// SynapseDB is auto Send + Sync: every component is Send + Sync and the
// core is shared behind an Arc.
