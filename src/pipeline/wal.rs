//! Write-ahead log augmentation.
//!
//! Highest-priority interceptor: appends a durable record before any
//! other augmentation or the operation itself runs, and acknowledges it
//! once the operation succeeds. Records left unacknowledged by a crash
//! are replayed on the next open (idempotently by entity id).
//!
//! Disabled under test mode, where the log handle is absent and every
//! hook is a no-op.

use tracing::warn;

use crate::error::Result;
use crate::storage::{WalRecord, WriteAheadLog};

use super::{Augmentation, WriteDecision, WriteOutcome, WriteRequest};

/// The WAL interceptor (priority 100).
pub struct WalAugmentation {
    log: Option<WriteAheadLog>,
}

impl WalAugmentation {
    /// Wraps a log handle; `None` disables the interceptor (test mode
    /// or path-less storage).
    pub fn new(log: Option<WriteAheadLog>) -> Self {
        Self { log }
    }

    /// Returns true if durability is active.
    pub fn is_enabled(&self) -> bool {
        self.log.is_some()
    }

    /// Unacknowledged records for startup replay.
    pub fn replay(&self) -> Result<Vec<WalRecord>> {
        match &self.log {
            Some(log) => log.replay(),
            None => Ok(Vec::new()),
        }
    }

    /// Number of unacknowledged records.
    pub fn pending(&self) -> usize {
        self.log.as_ref().map(|log| log.pending()).unwrap_or(0)
    }

    /// Acknowledges a replayed record after it was re-applied.
    pub fn ack(&self, seq: u64) -> Result<()> {
        match &self.log {
            Some(log) => log.ack(seq),
            None => Ok(()),
        }
    }

    /// Prunes fully-acknowledged segments.
    pub fn checkpoint(&self) -> Result<()> {
        match &self.log {
            Some(log) => log.checkpoint(),
            None => Ok(()),
        }
    }
}

impl Augmentation for WalAugmentation {
    fn name(&self) -> &'static str {
        "write-ahead-log"
    }

    fn priority(&self) -> u8 {
        100
    }

    fn before_write(&self, request: &mut WriteRequest) -> Result<WriteDecision> {
        if let Some(log) = &self.log {
            let seq = log.append(request.op, &request.params)?;
            request.wal_seq = Some(seq);
        }
        Ok(WriteDecision::Continue)
    }

    fn after_write(&self, request: &WriteRequest, outcome: &WriteOutcome) -> Result<()> {
        // Failed operations stay unacknowledged: replay retries them
        if outcome.success {
            if let (Some(log), Some(seq)) = (&self.log, request.wal_seq) {
                log.ack(seq)?;
            }
        }
        Ok(())
    }

    fn shutdown(&self) {
        if let Some(log) = &self.log {
            if let Err(e) = log.checkpoint() {
                warn!(error = %e, "Log checkpoint on shutdown failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::wal::DEFAULT_SEGMENT_BYTES;
    use crate::storage::WalOp;
    use crate::types::{EntityRef, NounId};
    use tempfile::tempdir;

    fn request() -> WriteRequest {
        WriteRequest::new(WalOp::AddNoun, EntityRef::Noun(NounId::new()), "test")
            .with_params(serde_json::json!({"id": "x"}))
    }

    #[test]
    fn test_disabled_wal_is_noop() {
        let wal = WalAugmentation::new(None);
        assert!(!wal.is_enabled());

        let mut req = request();
        wal.before_write(&mut req).unwrap();
        assert!(req.wal_seq.is_none());
        assert!(wal.replay().unwrap().is_empty());
        assert_eq!(wal.pending(), 0);
    }

    #[test]
    fn test_append_then_ack_on_success() {
        let dir = tempdir().unwrap();
        let log = WriteAheadLog::open(dir.path(), DEFAULT_SEGMENT_BYTES).unwrap();
        let wal = WalAugmentation::new(Some(log));

        let mut req = request();
        wal.before_write(&mut req).unwrap();
        assert!(req.wal_seq.is_some());
        assert_eq!(wal.pending(), 1);

        wal.after_write(&req, &WriteOutcome::ok(None)).unwrap();
        assert_eq!(wal.pending(), 0);
    }

    #[test]
    fn test_failed_write_stays_pending_for_replay() {
        let dir = tempdir().unwrap();
        let log = WriteAheadLog::open(dir.path(), DEFAULT_SEGMENT_BYTES).unwrap();
        let wal = WalAugmentation::new(Some(log));

        let mut req = request();
        wal.before_write(&mut req).unwrap();
        wal.after_write(&req, &WriteOutcome::failed()).unwrap();

        assert_eq!(wal.pending(), 1);
        let replayed = wal.replay().unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].op, WalOp::AddNoun);

        // Re-application acknowledges
        wal.ack(replayed[0].seq).unwrap();
        assert_eq!(wal.pending(), 0);
    }
}
