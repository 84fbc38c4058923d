//! Request deduplication augmentation.
//!
//! Within a short window (default 5 s), identical operations coalesce:
//! the first caller executes, concurrent callers with the same key
//! block until it completes and observe its outcome, and repeat callers
//! inside the window get the cached outcome without re-executing.
//!
//! The key is the SHA-256 of the operation kind and its canonical
//! parameter encoding, so "identical" means byte-identical parameters.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::DedupConfig;
use crate::error::Result;

use super::{Augmentation, WriteDecision, WriteOutcome, WriteRequest};

#[derive(Clone)]
enum Slot {
    /// The first caller is still executing.
    InFlight,
    /// A completed outcome, cached until the window expires.
    Done {
        value: Option<serde_json::Value>,
        success: bool,
        at: Instant,
    },
}

struct DedupState {
    slots: HashMap<String, Slot>,
    /// Insertion order for bounded pruning.
    order: Vec<String>,
}

/// The deduplicating interceptor (priority 50).
pub struct RequestDeduplicator {
    window: Duration,
    max_keys: usize,
    state: Mutex<DedupState>,
    completed: Condvar,
}

impl RequestDeduplicator {
    /// Creates a deduplicator with the configured window and bound.
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            window: config.window,
            max_keys: config.max_keys.max(1),
            state: Mutex::new(DedupState {
                slots: HashMap::new(),
                order: Vec::new(),
            }),
            completed: Condvar::new(),
        }
    }

    /// Stable key for an operation and its parameters.
    pub fn key_of(request: &WriteRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.op.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(request.params.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Tracked keys (cached plus in-flight).
    pub fn len(&self) -> usize {
        self.state.lock().expect("dedup lock").slots.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune(state: &mut DedupState, window: Duration, max_keys: usize) {
        let now = Instant::now();
        state.slots.retain(|_, slot| match slot {
            Slot::InFlight => true,
            Slot::Done { at, .. } => now.duration_since(*at) < window,
        });
        state.order.retain(|key| state.slots.contains_key(key));

        // Bounded: drop oldest completed entries beyond the cap
        while state.slots.len() > max_keys {
            let Some(index) = state
                .order
                .iter()
                .position(|key| matches!(state.slots.get(key), Some(Slot::Done { .. })))
            else {
                break;
            };
            let key = state.order.remove(index);
            state.slots.remove(&key);
        }
    }

    /// Marks an operation's completion, waking coalesced waiters.
    fn complete(&self, key: &str, outcome: &WriteOutcome) {
        let mut state = self.state.lock().expect("dedup lock");
        state.slots.insert(
            key.to_string(),
            Slot::Done {
                value: outcome.value.clone(),
                success: outcome.success,
                at: Instant::now(),
            },
        );
        drop(state);
        self.completed.notify_all();
    }
}

impl Augmentation for RequestDeduplicator {
    fn name(&self) -> &'static str {
        "request-deduplicator"
    }

    fn priority(&self) -> u8 {
        50
    }

    fn before_write(&self, request: &mut WriteRequest) -> Result<WriteDecision> {
        let key = Self::key_of(request);
        let mut state = self.state.lock().expect("dedup lock");
        Self::prune(&mut state, self.window, self.max_keys);

        loop {
            match state.slots.get(&key) {
                Some(Slot::Done { value, success, at })
                    if at.elapsed() < self.window && *success =>
                {
                    debug!(op = request.op.as_str(), "Identical operation coalesced");
                    return Ok(WriteDecision::ShortCircuit(value.clone()));
                }
                Some(Slot::Done { .. }) => {
                    // Stale or failed: this caller re-executes
                    break;
                }
                Some(Slot::InFlight) => {
                    // Coalesce onto the in-flight execution
                    let (next, timed_out) = self
                        .completed
                        .wait_timeout(state, self.window)
                        .expect("dedup lock");
                    state = next;
                    if timed_out.timed_out() {
                        break;
                    }
                }
                None => break,
            }
        }

        state.slots.insert(key.clone(), Slot::InFlight);
        state.order.push(key);
        Ok(WriteDecision::Continue)
    }

    fn after_write(&self, request: &WriteRequest, outcome: &WriteOutcome) -> Result<()> {
        self.complete(&Self::key_of(request), outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::WalOp;
    use crate::types::{EntityRef, NounId};
    use std::sync::Arc;

    fn dedup(window_ms: u64, max_keys: usize) -> RequestDeduplicator {
        RequestDeduplicator::new(&DedupConfig {
            window: Duration::from_millis(window_ms),
            max_keys,
        })
    }

    fn request(params: serde_json::Value) -> WriteRequest {
        WriteRequest::new(WalOp::AddNoun, EntityRef::Noun(NounId::nil()), "test")
            .with_params(params)
    }

    #[test]
    fn test_identical_op_within_window_short_circuits() {
        let dedup = dedup(5000, 100);

        let mut first = request(serde_json::json!({"x": 1}));
        assert!(matches!(
            dedup.before_write(&mut first).unwrap(),
            WriteDecision::Continue
        ));
        dedup
            .after_write(&first, &WriteOutcome::ok(Some(serde_json::json!("id-1"))))
            .unwrap();

        let mut second = request(serde_json::json!({"x": 1}));
        match dedup.before_write(&mut second).unwrap() {
            WriteDecision::ShortCircuit(Some(value)) => assert_eq!(value, "id-1"),
            other => panic!("expected cached outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_different_params_do_not_coalesce() {
        let dedup = dedup(5000, 100);

        let mut first = request(serde_json::json!({"x": 1}));
        dedup.before_write(&mut first).unwrap();
        dedup.after_write(&first, &WriteOutcome::ok(None)).unwrap();

        let mut second = request(serde_json::json!({"x": 2}));
        assert!(matches!(
            dedup.before_write(&mut second).unwrap(),
            WriteDecision::Continue
        ));
    }

    #[test]
    fn test_window_expiry_re_executes() {
        let dedup = dedup(20, 100);

        let mut first = request(serde_json::json!({"x": 1}));
        dedup.before_write(&mut first).unwrap();
        dedup.after_write(&first, &WriteOutcome::ok(None)).unwrap();

        std::thread::sleep(Duration::from_millis(30));

        let mut second = request(serde_json::json!({"x": 1}));
        assert!(matches!(
            dedup.before_write(&mut second).unwrap(),
            WriteDecision::Continue
        ));
    }

    #[test]
    fn test_failed_outcomes_are_not_replayed() {
        let dedup = dedup(5000, 100);

        let mut first = request(serde_json::json!({"x": 1}));
        dedup.before_write(&mut first).unwrap();
        dedup.after_write(&first, &WriteOutcome::failed()).unwrap();

        // A failure must not short-circuit the retry
        let mut second = request(serde_json::json!({"x": 1}));
        assert!(matches!(
            dedup.before_write(&mut second).unwrap(),
            WriteDecision::Continue
        ));
    }

    #[test]
    fn test_concurrent_identical_ops_coalesce() {
        let dedup = Arc::new(dedup(5000, 100));

        let mut first = request(serde_json::json!({"x": 1}));
        dedup.before_write(&mut first).unwrap();

        // A second identical op blocks, then observes the outcome
        let waiter = {
            let dedup = Arc::clone(&dedup);
            std::thread::spawn(move || {
                let mut second = request(serde_json::json!({"x": 1}));
                dedup.before_write(&mut second).unwrap()
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        dedup
            .after_write(&first, &WriteOutcome::ok(Some(serde_json::json!("id-1"))))
            .unwrap();

        match waiter.join().unwrap() {
            WriteDecision::ShortCircuit(Some(value)) => assert_eq!(value, "id-1"),
            other => panic!("expected coalesced outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_key_cap_prunes_completed() {
        let dedup = dedup(60_000, 2);
        for i in 0..5 {
            let mut req = request(serde_json::json!({ "i": i }));
            dedup.before_write(&mut req).unwrap();
            dedup.after_write(&req, &WriteOutcome::ok(None)).unwrap();
        }
        assert!(dedup.len() <= 3, "cap plus the in-flight entry");
    }
}
