//! Backoff and throttle telemetry for storage adapters.
//!
//! When the backing store signals pressure (HTTP 429/503 conditions,
//! connection resets, timeouts), the adapter enters exponential backoff:
//! base 1 s doubling to a 30 s cap, resetting after 60 s of sustained
//! success. Every throttle event is bucketed into a 24-slot hourly ring
//! by reason and by service, surfaced through the statistics API.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::ThrottlePolicy;
use crate::error::StorageError;
use crate::types::Timestamp;

/// Why the adapter backed off.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThrottleReason {
    /// Explicit rate limiting (HTTP 429).
    RateLimited,
    /// Backend unavailable (HTTP 503).
    Unavailable,
    /// Connection reset mid-operation.
    ConnectionReset,
    /// Operation timed out.
    Timeout,
    /// Any other transient condition.
    Other,
}

impl ThrottleReason {
    /// Stable name used as the telemetry bucket key.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Unavailable => "unavailable",
            Self::ConnectionReset => "connection_reset",
            Self::Timeout => "timeout",
            Self::Other => "other",
        }
    }

    /// Classifies a storage error, returning `None` for conditions that
    /// don't warrant backoff.
    pub fn classify(err: &StorageError) -> Option<Self> {
        match err {
            StorageError::Throttled(msg) => {
                if msg.contains("503") {
                    Some(Self::Unavailable)
                } else {
                    Some(Self::RateLimited)
                }
            }
            StorageError::Transient(msg) => {
                let lower = msg.to_ascii_lowercase();
                if lower.contains("timeout") || lower.contains("timed out") {
                    Some(Self::Timeout)
                } else if lower.contains("reset") {
                    Some(Self::ConnectionReset)
                } else {
                    Some(Self::Other)
                }
            }
            _ => None,
        }
    }
}

/// One hour-slot of throttle telemetry.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HourlyThrottle {
    /// Hour-of-day slot (0-23).
    pub hour_slot: u8,
    /// Total throttle events recorded in this slot.
    pub events: u64,
    /// Events by reason name.
    pub by_reason: HashMap<String, u64>,
    /// Events by service name.
    pub by_service: HashMap<String, u64>,
}

/// Aggregated throttle telemetry, as surfaced by
/// `get_statistics_with_throttling()`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ThrottleTelemetry {
    /// Total throttle events since open.
    pub total_events: u64,
    /// Whether the adapter is currently backing off.
    pub currently_throttled: bool,
    /// Consecutive failures in the current backoff streak.
    pub consecutive_failures: u32,
    /// Current backoff delay in milliseconds, if backing off.
    pub current_delay_ms: Option<u64>,
    /// The 24-slot hourly ring (slots with no events omitted).
    pub hourly: Vec<HourlyThrottle>,
}

#[derive(Clone, Debug, Default)]
struct Bucket {
    /// Absolute epoch-hour this bucket last recorded, to expire slots
    /// that wrapped around the 24-hour ring.
    epoch_hour: i64,
    events: u64,
    by_reason: HashMap<String, u64>,
    by_service: HashMap<String, u64>,
}

struct TrackerState {
    consecutive_failures: u32,
    backoff_until: Option<Instant>,
    success_streak_start: Option<Instant>,
    total_events: u64,
    ring: Vec<Bucket>,
}

/// Tracks backoff state and throttle telemetry for one adapter.
pub struct ThrottleTracker {
    policy: ThrottlePolicy,
    state: Mutex<TrackerState>,
}

impl ThrottleTracker {
    /// Creates a tracker with the given policy.
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(TrackerState {
                consecutive_failures: 0,
                backoff_until: None,
                success_streak_start: None,
                total_events: 0,
                ring: vec![Bucket::default(); 24],
            }),
        }
    }

    /// Records a throttle event and returns the backoff delay to apply.
    pub fn record_failure(&self, reason: ThrottleReason, service: &str) -> Duration {
        let mut state = self.state.lock().expect("throttle lock");
        state.success_streak_start = None;
        state.consecutive_failures += 1;
        state.total_events += 1;

        // Exponential: base * 2^(n-1), capped
        let exponent = state.consecutive_failures.saturating_sub(1).min(16);
        let delay_ms = (self.policy.base_delay.as_millis() as u64)
            .saturating_mul(1u64 << exponent)
            .min(self.policy.max_delay.as_millis() as u64);
        let delay = Duration::from_millis(delay_ms);
        state.backoff_until = Some(Instant::now() + delay);

        // Hourly ring bucketing
        let now = Timestamp::now();
        let epoch_hour = now.as_millis() / 3_600_000;
        let slot = (epoch_hour % 24) as usize;
        let bucket = &mut state.ring[slot];
        if bucket.epoch_hour != epoch_hour {
            *bucket = Bucket {
                epoch_hour,
                ..Default::default()
            };
        }
        bucket.events += 1;
        *bucket
            .by_reason
            .entry(reason.as_str().to_string())
            .or_insert(0) += 1;
        *bucket.by_service.entry(service.to_string()).or_insert(0) += 1;

        delay
    }

    /// Records a successful operation.
    ///
    /// Backoff state resets once successes span the policy's reset
    /// window.
    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("throttle lock");
        let now = Instant::now();
        match state.success_streak_start {
            None => state.success_streak_start = Some(now),
            Some(start) => {
                if now.duration_since(start) >= self.policy.reset_after {
                    state.consecutive_failures = 0;
                    state.backoff_until = None;
                }
            }
        }
    }

    /// Returns the remaining backoff delay, if currently throttled.
    pub fn current_delay(&self) -> Option<Duration> {
        let state = self.state.lock().expect("throttle lock");
        let until = state.backoff_until?;
        let now = Instant::now();
        if until > now {
            Some(until - now)
        } else {
            None
        }
    }

    /// Returns true if operations should back off right now.
    pub fn is_throttled(&self) -> bool {
        self.current_delay().is_some()
    }

    /// Snapshot of the telemetry ring and backoff state.
    pub fn telemetry(&self) -> ThrottleTelemetry {
        let state = self.state.lock().expect("throttle lock");
        let now = Instant::now();
        let currently_throttled = state.backoff_until.map(|u| u > now).unwrap_or(false);
        let current_delay_ms = state
            .backoff_until
            .filter(|u| *u > now)
            .map(|u| (u - now).as_millis() as u64);

        let epoch_hour_now = Timestamp::now().as_millis() / 3_600_000;
        let hourly = state
            .ring
            .iter()
            .enumerate()
            .filter(|(_, b)| b.events > 0 && epoch_hour_now - b.epoch_hour < 24)
            .map(|(slot, b)| HourlyThrottle {
                hour_slot: slot as u8,
                events: b.events,
                by_reason: b.by_reason.clone(),
                by_service: b.by_service.clone(),
            })
            .collect();

        ThrottleTelemetry {
            total_events: state.total_events,
            currently_throttled,
            consecutive_failures: state.consecutive_failures,
            current_delay_ms,
            hourly,
        }
    }
}

impl std::fmt::Debug for ThrottleTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleTracker")
            .field("throttled", &self.is_throttled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy() -> ThrottlePolicy {
        ThrottlePolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(80),
            reset_after: Duration::from_millis(30),
        }
    }

    #[test]
    fn test_classify_reasons() {
        assert_eq!(
            ThrottleReason::classify(&StorageError::throttled("HTTP 429")),
            Some(ThrottleReason::RateLimited)
        );
        assert_eq!(
            ThrottleReason::classify(&StorageError::throttled("HTTP 503 unavailable")),
            Some(ThrottleReason::Unavailable)
        );
        assert_eq!(
            ThrottleReason::classify(&StorageError::transient("request timed out")),
            Some(ThrottleReason::Timeout)
        );
        assert_eq!(
            ThrottleReason::classify(&StorageError::transient("connection reset by peer")),
            Some(ThrottleReason::ConnectionReset)
        );
        assert_eq!(
            ThrottleReason::classify(&StorageError::corrupted("bad bytes")),
            None
        );
    }

    #[test]
    fn test_backoff_grows_exponentially_and_caps() {
        let tracker = ThrottleTracker::new(fast_policy());
        let d1 = tracker.record_failure(ThrottleReason::RateLimited, "svc");
        let d2 = tracker.record_failure(ThrottleReason::RateLimited, "svc");
        let d3 = tracker.record_failure(ThrottleReason::RateLimited, "svc");
        assert_eq!(d1, Duration::from_millis(10));
        assert_eq!(d2, Duration::from_millis(20));
        assert_eq!(d3, Duration::from_millis(40));

        // Cap
        for _ in 0..10 {
            tracker.record_failure(ThrottleReason::RateLimited, "svc");
        }
        let capped = tracker.record_failure(ThrottleReason::RateLimited, "svc");
        assert_eq!(capped, Duration::from_millis(80));
    }

    #[test]
    fn test_is_throttled_clears_after_delay() {
        let tracker = ThrottleTracker::new(fast_policy());
        tracker.record_failure(ThrottleReason::Timeout, "svc");
        assert!(tracker.is_throttled());
        std::thread::sleep(Duration::from_millis(15));
        assert!(!tracker.is_throttled());
    }

    #[test]
    fn test_success_window_resets_backoff() {
        let tracker = ThrottleTracker::new(fast_policy());
        tracker.record_failure(ThrottleReason::RateLimited, "svc");
        tracker.record_failure(ThrottleReason::RateLimited, "svc");

        // First success starts the streak; after the reset window a
        // second success clears the failure count
        tracker.record_success();
        std::thread::sleep(Duration::from_millis(35));
        tracker.record_success();

        let telemetry = tracker.telemetry();
        assert_eq!(telemetry.consecutive_failures, 0);

        // Next failure starts from the base delay again
        let delay = tracker.record_failure(ThrottleReason::RateLimited, "svc");
        assert_eq!(delay, Duration::from_millis(10));
    }

    #[test]
    fn test_failure_breaks_success_streak() {
        let tracker = ThrottleTracker::new(fast_policy());
        tracker.record_failure(ThrottleReason::RateLimited, "svc");
        tracker.record_success();
        tracker.record_failure(ThrottleReason::RateLimited, "svc");
        std::thread::sleep(Duration::from_millis(35));
        tracker.record_success();
        // Streak restarted after the failure, so no reset yet
        assert_eq!(tracker.telemetry().consecutive_failures, 2);
    }

    #[test]
    fn test_telemetry_buckets_by_reason_and_service() {
        let tracker = ThrottleTracker::new(fast_policy());
        tracker.record_failure(ThrottleReason::RateLimited, "ingest");
        tracker.record_failure(ThrottleReason::RateLimited, "ingest");
        tracker.record_failure(ThrottleReason::Timeout, "query");

        let telemetry = tracker.telemetry();
        assert_eq!(telemetry.total_events, 3);
        assert_eq!(telemetry.hourly.len(), 1);

        let bucket = &telemetry.hourly[0];
        assert_eq!(bucket.events, 3);
        assert_eq!(bucket.by_reason.get("rate_limited"), Some(&2));
        assert_eq!(bucket.by_reason.get("timeout"), Some(&1));
        assert_eq!(bucket.by_service.get("ingest"), Some(&2));
        assert_eq!(bucket.by_service.get("query"), Some(&1));
    }

    #[test]
    fn test_telemetry_serializes() {
        let tracker = ThrottleTracker::new(fast_policy());
        tracker.record_failure(ThrottleReason::Other, "svc");
        let json = serde_json::to_string(&tracker.telemetry()).unwrap();
        assert!(json.contains("total_events"));
    }
}
