//! The write-path augmentation chain.
//!
//! Every mutating operation flows through a priority-ordered chain of
//! interceptors. Each interceptor sees the request before the write
//! (where it may mutate the request or short-circuit with a cached
//! outcome) and after (where it observes the outcome). Higher priority
//! runs first:
//!
//! | Priority | Augmentation        | Concern                                |
//! |----------|---------------------|----------------------------------------|
//! |      100 | write-ahead log     | durability before the operation        |
//! |      100 | connection pool     | bounds concurrent storage operations   |
//! |       95 | entity registry     | external-id → uuid dedup for ingest    |
//! |       85 | auto-register       | records external ids after inserts     |
//! |       80 | batch processor     | group-commits storage writes           |
//! |       50 | request dedup       | coalesces identical ops in a window    |
//! |       10 | verb scoring        | fills defaulted weight/confidence      |
//!
//! Initialization is two-phase: augmentations register with the
//! pipeline at construction (no context), then `initialize` runs with
//! a context carrying the storage handle. No reference cycle exists
//! during construction.

mod batch;
mod dedup;
mod pool;
mod registry;
mod scoring;
mod wal;

pub use batch::{BatchItem, BatchProcessor};
pub use dedup::RequestDeduplicator;
pub use pool::ConnectionPool;
pub use registry::{AutoRegisterEntities, EntityRegistry};
pub use scoring::VerbScoring;
pub use wal::WalAugmentation;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::config::Config;
use crate::error::{Result, SynapseError};
use crate::storage::{StorageAdapter, WalOp};
use crate::types::EntityRef;

/// A mutating operation as the chain sees it.
#[derive(Clone, Debug)]
pub struct WriteRequest {
    /// Operation kind.
    pub op: WalOp,
    /// Entity the operation targets.
    pub entity: EntityRef,
    /// Service attribution.
    pub service: String,
    /// JSON-encoded operation parameters (WAL payload, dedup key
    /// input).
    pub params: serde_json::Value,
    /// External identifier supplied by streaming ingest, if any.
    pub external_id: Option<String>,
    /// Sequence number assigned by the write-ahead log interceptor.
    pub wal_seq: Option<u64>,
}

impl WriteRequest {
    /// Builds a request for the given operation and entity.
    pub fn new(op: WalOp, entity: EntityRef, service: impl Into<String>) -> Self {
        Self {
            op,
            entity,
            service: service.into(),
            params: serde_json::Value::Null,
            external_id: None,
            wal_seq: None,
        }
    }

    /// Attaches the JSON parameter payload.
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Attaches an external identifier.
    pub fn with_external_id(mut self, external_id: Option<String>) -> Self {
        self.external_id = external_id;
        self
    }
}

/// What a `before_write` interceptor decided.
#[derive(Clone, Debug)]
pub enum WriteDecision {
    /// Proceed down the chain and execute the operation.
    Continue,
    /// Skip the operation; the carried value is the outcome the caller
    /// should observe (e.g. the id of an entity already ingested).
    ShortCircuit(Option<serde_json::Value>),
}

/// Outcome of an executed operation, observed by `after_write`.
#[derive(Clone, Debug)]
pub struct WriteOutcome {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Operation result value (e.g. the created id), when successful.
    pub value: Option<serde_json::Value>,
}

impl WriteOutcome {
    /// A successful outcome carrying a value.
    pub fn ok(value: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            value,
        }
    }

    /// A failed outcome.
    pub fn failed() -> Self {
        Self {
            success: false,
            value: None,
        }
    }
}

/// Context handed to augmentations during phase-two initialization.
pub struct AugmentationContext {
    /// The resolved storage adapter.
    pub storage: Arc<dyn StorageAdapter>,
    /// Engine configuration.
    pub config: Config,
}

/// One interceptor in the chain.
///
/// All hooks have default no-op implementations; each augmentation
/// implements the small capability set it needs.
pub trait Augmentation: Send + Sync {
    /// Stable name for logs and registration errors.
    fn name(&self) -> &'static str;

    /// Chain position; higher runs first.
    fn priority(&self) -> u8;

    /// Phase-two initialization with the runtime context.
    fn initialize(&self, _ctx: &AugmentationContext) -> Result<()> {
        Ok(())
    }

    /// Runs before the operation executes. May mutate the request or
    /// short-circuit with a cached outcome.
    fn before_write(&self, _request: &mut WriteRequest) -> Result<WriteDecision> {
        Ok(WriteDecision::Continue)
    }

    /// Observes the operation's outcome.
    fn after_write(&self, _request: &WriteRequest, _outcome: &WriteOutcome) -> Result<()> {
        Ok(())
    }

    /// Releases background resources on engine close.
    fn shutdown(&self) {}
}

/// The priority-ordered chain.
pub struct Pipeline {
    augmentations: RwLock<Vec<Arc<dyn Augmentation>>>,
    initialized: AtomicBool,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self {
            augmentations: RwLock::new(Vec::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Phase one: registers an augmentation (no context yet).
    ///
    /// Registration after initialization is a programming error and is
    /// rejected.
    pub fn register(&self, augmentation: Arc<dyn Augmentation>) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Err(SynapseError::config(format!(
                "cannot register augmentation '{}' after initialization",
                augmentation.name()
            )));
        }
        let mut chain = self.augmentations.write().expect("pipeline lock");
        chain.push(augmentation);
        // Stable sort: equal priorities keep registration order
        chain.sort_by_key(|a| std::cmp::Reverse(a.priority()));
        Ok(())
    }

    /// Phase two: initializes every augmentation with the context.
    pub fn initialize(&self, ctx: &AugmentationContext) -> Result<()> {
        let chain = self.augmentations.read().expect("pipeline lock");
        for augmentation in chain.iter() {
            augmentation.initialize(ctx)?;
            debug!(
                name = augmentation.name(),
                priority = augmentation.priority(),
                "Augmentation initialized"
            );
        }
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Executes an operation through the chain.
    ///
    /// Each augmentation's `before_write` runs in priority order; a
    /// short-circuit skips the rest of the chain and the operation
    /// itself. `after_write` hooks unwind in reverse for exactly the
    /// augmentations whose `before_write` ran — the interceptor
    /// nesting of `(operation, params, next)`.
    ///
    /// Returns the outcome value and whether the operation actually
    /// executed (false when short-circuited).
    pub fn execute(
        &self,
        request: &mut WriteRequest,
        op: &mut dyn FnMut(&mut WriteRequest) -> Result<Option<serde_json::Value>>,
    ) -> Result<(Option<serde_json::Value>, bool)> {
        let chain = self.augmentations.read().expect("pipeline lock");
        Self::run_chain(&chain, request, op)
    }

    fn run_chain(
        chain: &[Arc<dyn Augmentation>],
        request: &mut WriteRequest,
        op: &mut dyn FnMut(&mut WriteRequest) -> Result<Option<serde_json::Value>>,
    ) -> Result<(Option<serde_json::Value>, bool)> {
        let Some((augmentation, rest)) = chain.split_first() else {
            return op(request).map(|value| (value, true));
        };

        match augmentation.before_write(request)? {
            WriteDecision::ShortCircuit(value) => {
                debug!(
                    name = augmentation.name(),
                    op = request.op.as_str(),
                    "Write short-circuited"
                );
                Ok((value, false))
            }
            WriteDecision::Continue => {
                let result = Self::run_chain(rest, request, op);
                let outcome = match &result {
                    Ok((value, _)) => WriteOutcome::ok(value.clone()),
                    Err(_) => WriteOutcome::failed(),
                };
                if let Err(e) = augmentation.after_write(request, &outcome) {
                    tracing::warn!(
                        name = augmentation.name(),
                        error = %e,
                        "Augmentation after-write hook failed"
                    );
                }
                result
            }
        }
    }

    /// Shuts every augmentation down, in reverse priority order.
    pub fn shutdown(&self) {
        let chain = self.augmentations.read().expect("pipeline lock");
        for augmentation in chain.iter().rev() {
            augmentation.shutdown();
        }
    }

    /// Names in execution order, for diagnostics.
    pub fn names(&self) -> Vec<&'static str> {
        self.augmentations
            .read()
            .expect("pipeline lock")
            .iter()
            .map(|a| a.name())
            .collect()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("augmentations", &self.names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::types::NounId;
    use std::sync::atomic::AtomicUsize;

    struct Recorder {
        name: &'static str,
        priority: u8,
        order: Arc<std::sync::Mutex<Vec<&'static str>>>,
        calls: AtomicUsize,
        short_circuit: bool,
    }

    impl Augmentation for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }
        fn priority(&self) -> u8 {
            self.priority
        }
        fn before_write(&self, _request: &mut WriteRequest) -> Result<WriteDecision> {
            self.order.lock().unwrap().push(self.name);
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.short_circuit {
                Ok(WriteDecision::ShortCircuit(Some(serde_json::json!("cached"))))
            } else {
                Ok(WriteDecision::Continue)
            }
        }
    }

    fn recorder(
        name: &'static str,
        priority: u8,
        order: &Arc<std::sync::Mutex<Vec<&'static str>>>,
        short_circuit: bool,
    ) -> Arc<Recorder> {
        Arc::new(Recorder {
            name,
            priority,
            order: Arc::clone(order),
            calls: AtomicUsize::new(0),
            short_circuit,
        })
    }

    fn request() -> WriteRequest {
        WriteRequest::new(WalOp::AddNoun, EntityRef::Noun(NounId::new()), "test")
    }

    #[test]
    fn test_priority_ordering() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pipeline = Pipeline::new();
        pipeline.register(recorder("low", 10, &order, false)).unwrap();
        pipeline.register(recorder("high", 100, &order, false)).unwrap();
        pipeline.register(recorder("mid", 50, &order, false)).unwrap();

        let mut req = request();
        let (_, executed) = pipeline.execute(&mut req, &mut |_| Ok(None)).unwrap();
        assert!(executed);
        assert_eq!(*order.lock().unwrap(), vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_equal_priority_keeps_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pipeline = Pipeline::new();
        pipeline.register(recorder("first", 100, &order, false)).unwrap();
        pipeline.register(recorder("second", 100, &order, false)).unwrap();

        let mut req = request();
        pipeline.execute(&mut req, &mut |_| Ok(None)).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_short_circuit_skips_rest_and_operation() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pipeline = Pipeline::new();
        let skipped = recorder("skipped", 10, &order, false);
        pipeline.register(recorder("breaker", 90, &order, true)).unwrap();
        let skipped_dyn: Arc<dyn Augmentation> = Arc::clone(&skipped) as Arc<dyn Augmentation>;
        pipeline.register(skipped_dyn).unwrap();

        let mut req = request();
        let mut ran = false;
        let (value, executed) = pipeline
            .execute(&mut req, &mut |_| {
                ran = true;
                Ok(None)
            })
            .unwrap();

        assert!(!executed);
        assert!(!ran, "operation must not run after a short-circuit");
        assert_eq!(value, Some(serde_json::json!("cached")));
        assert_eq!(skipped.calls.load(Ordering::SeqCst), 0);
    }

    struct AfterRecorder {
        priority: u8,
        afters: Arc<std::sync::Mutex<Vec<u8>>>,
        short_circuit: bool,
    }

    impl Augmentation for AfterRecorder {
        fn name(&self) -> &'static str {
            "after-recorder"
        }
        fn priority(&self) -> u8 {
            self.priority
        }
        fn before_write(&self, _request: &mut WriteRequest) -> Result<WriteDecision> {
            if self.short_circuit {
                Ok(WriteDecision::ShortCircuit(None))
            } else {
                Ok(WriteDecision::Continue)
            }
        }
        fn after_write(&self, _request: &WriteRequest, _outcome: &WriteOutcome) -> Result<()> {
            self.afters.lock().unwrap().push(self.priority);
            Ok(())
        }
    }

    #[test]
    fn test_after_hooks_unwind_in_reverse_for_ran_augmentations() {
        let afters = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pipeline = Pipeline::new();
        for (priority, short_circuit) in [(100u8, false), (80, false), (50, true), (10, false)] {
            pipeline
                .register(Arc::new(AfterRecorder {
                    priority,
                    afters: Arc::clone(&afters),
                    short_circuit,
                }))
                .unwrap();
        }

        let mut req = request();
        let (_, executed) = pipeline.execute(&mut req, &mut |_| Ok(None)).unwrap();

        assert!(!executed);
        // The short-circuiter (50) and everything below it never ran
        // their after hooks; 80 and 100 unwind in reverse
        assert_eq!(*afters.lock().unwrap(), vec![80, 100]);
    }

    #[test]
    fn test_two_phase_init_rejects_late_registration() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pipeline = Pipeline::new();
        pipeline.register(recorder("early", 50, &order, false)).unwrap();

        let ctx = AugmentationContext {
            storage: Arc::new(MemoryStorage::new(&Config::for_testing())),
            config: Config::for_testing(),
        };
        pipeline.initialize(&ctx).unwrap();

        let err = pipeline
            .register(recorder("late", 50, &order, false))
            .unwrap_err();
        assert!(err.to_string().contains("after initialization"));
    }

    #[test]
    fn test_write_outcome_constructors() {
        let ok = WriteOutcome::ok(Some(serde_json::json!(1)));
        assert!(ok.success);
        assert!(ok.value.is_some());

        let failed = WriteOutcome::failed();
        assert!(!failed.success);
        assert!(failed.value.is_none());
    }
}
