//! Batch processing augmentation.
//!
//! Storage persistence runs through a dedicated writer thread that
//! accumulates operations up to `max_batch_size` or `max_wait` and then
//! applies the batch in arrival order, acknowledging each submitter.
//! Callers block on their acknowledgement (bounded by the operation
//! timeout), so a completed write is durably in storage.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::config::BatchConfig;
use crate::error::{Result, StorageError, SynapseError};
use crate::metadata::MetadataMap;
use crate::noun::Noun;
use crate::storage::StorageAdapter;
use crate::types::{EntityRef, NounId, VerbId};
use crate::vector::{HnswNodeRecord, HnswSystemRecord};
use crate::verb::Verb;

use super::{Augmentation, AugmentationContext};

/// One storage operation routed through the writer thread.
#[derive(Clone, Debug)]
pub enum BatchItem {
    /// Persist a noun.
    SaveNoun(Box<Noun>),
    /// Persist a verb.
    SaveVerb(Box<Verb>),
    /// Replace a noun's metadata record.
    SaveNounMetadata(NounId, MetadataMap),
    /// Replace a verb's metadata record.
    SaveVerbMetadata(VerbId, MetadataMap),
    /// Persist a graph node record.
    SaveHnswNode(Box<HnswNodeRecord>),
    /// Persist the graph-global record.
    SaveHnswSystem(HnswSystemRecord),
    /// Hard-remove a noun's records.
    DeleteNoun(NounId),
    /// Hard-remove a verb's records.
    DeleteVerb(VerbId),
    /// Remove a graph node record.
    DeleteHnswNode(EntityRef),
}

struct Job {
    item: BatchItem,
    // Errors cross the channel as strings; SynapseError is not Clone
    ack: Sender<std::result::Result<(), String>>,
}

struct Worker {
    tx: Sender<Job>,
    handle: Option<JoinHandle<()>>,
}

/// The batching writer (priority 80).
pub struct BatchProcessor {
    config: BatchConfig,
    worker: Mutex<Option<Worker>>,
}

impl BatchProcessor {
    /// Creates an idle processor; the writer thread starts at
    /// initialization.
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            config: config.clone(),
            worker: Mutex::new(None),
        }
    }

    /// Submits an operation and blocks until the batch containing it
    /// is applied.
    pub fn submit(&self, item: BatchItem, timeout: Duration) -> Result<()> {
        let ack_rx = {
            let worker = self.worker.lock().expect("batch lock");
            let Some(worker) = worker.as_ref() else {
                return Err(SynapseError::config(
                    "batch processor used before initialization",
                ));
            };
            let (ack_tx, ack_rx) = bounded(1);
            worker
                .tx
                .send(Job { item, ack: ack_tx })
                .map_err(|_| StorageError::transient("batch writer stopped"))?;
            ack_rx
        };

        match ack_rx.recv_timeout(timeout) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(StorageError::transient(message).into()),
            Err(_) => Err(StorageError::transient(format!(
                "batched write not acknowledged within {:?}",
                timeout
            ))
            .into()),
        }
    }

    fn run_worker(
        rx: Receiver<Job>,
        storage: Arc<dyn StorageAdapter>,
        max_batch_size: usize,
        max_wait: Duration,
    ) {
        loop {
            // Block for the first job of a batch
            let Ok(first) = rx.recv() else {
                debug!("Batch writer stopping");
                return;
            };

            let mut batch = vec![first];
            let deadline = Instant::now() + max_wait;
            while batch.len() < max_batch_size {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match rx.recv_timeout(remaining) {
                    Ok(job) => batch.push(job),
                    Err(_) => break,
                }
            }

            debug!(size = batch.len(), "Applying write batch");
            for job in batch {
                let outcome = apply(&*storage, &job.item).map_err(|e| e.to_string());
                // A dropped submitter (timeout) is not an error here
                let _ = job.ack.send(outcome);
            }
        }
    }

    /// Stops the writer thread, draining nothing further.
    pub fn stop(&self) {
        let mut worker = self.worker.lock().expect("batch lock");
        if let Some(mut worker) = worker.take() {
            drop(worker.tx);
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    warn!("Batch writer thread panicked");
                }
            }
        }
    }
}

fn apply(storage: &dyn StorageAdapter, item: &BatchItem) -> Result<()> {
    match item {
        BatchItem::SaveNoun(noun) => storage.save_noun(noun),
        BatchItem::SaveVerb(verb) => storage.save_verb(verb),
        BatchItem::SaveNounMetadata(id, metadata) => {
            storage.save_noun_metadata(*id, metadata).map(|_| ())
        }
        BatchItem::SaveVerbMetadata(id, metadata) => {
            storage.save_verb_metadata(*id, metadata).map(|_| ())
        }
        BatchItem::SaveHnswNode(record) => storage.save_hnsw_node(record),
        BatchItem::SaveHnswSystem(record) => storage.save_hnsw_system(record),
        BatchItem::DeleteNoun(id) => storage.delete_noun(*id).map(|_| ()),
        BatchItem::DeleteVerb(id) => storage.delete_verb(*id).map(|_| ()),
        BatchItem::DeleteHnswNode(id) => storage.delete_hnsw_node(id).map(|_| ()),
    }
}

impl Augmentation for BatchProcessor {
    fn name(&self) -> &'static str {
        "batch-processor"
    }

    fn priority(&self) -> u8 {
        80
    }

    fn initialize(&self, ctx: &AugmentationContext) -> Result<()> {
        let mut worker = self.worker.lock().expect("batch lock");
        if worker.is_some() {
            return Ok(());
        }

        // Bounded queue: submitters back-pressure instead of ballooning
        let (tx, rx) = bounded::<Job>(self.config.max_batch_size * 2);
        let storage = Arc::clone(&ctx.storage);
        let max_batch_size = self.config.max_batch_size;
        let max_wait = self.config.max_wait;

        let handle = std::thread::Builder::new()
            .name("synapse-batch-writer".to_string())
            .spawn(move || Self::run_worker(rx, storage, max_batch_size, max_wait))
            .map_err(|e| SynapseError::resource(format!("cannot spawn batch writer: {}", e)))?;

        *worker = Some(Worker {
            tx,
            handle: Some(handle),
        });
        Ok(())
    }

    fn shutdown(&self) {
        self.stop();
    }
}

impl Drop for BatchProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}
