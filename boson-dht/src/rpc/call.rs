//! Call lifecycle and timeout budgeting
//!
//! A call moves `Unsent → Sent`, may pass through `Stalled` once its
//! adaptive deadline elapses, and terminates in exactly one of
//! `Responded`, `Timeout`, `Error` or `Canceled`. The adaptive deadline
//! comes from a smoothed RTT plus jitter, floored and capped by the
//! constants in [`crate::constants`].

use std::time::Duration;

use crate::constants::{RPC_CALL_TIMEOUT_MAX, RPC_CALL_TIMEOUT_MIN, RTT_EWMA_ALPHA};
use crate::id::Id;
use crate::wire::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Unsent,
    Sent,
    /// Past the adaptive deadline; the slot is released but a late
    /// response may still feed bucket liveness
    Stalled,
    Responded,
    Timeout,
    Error,
    Canceled,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallState::Responded | CallState::Timeout | CallState::Error | CallState::Canceled
        )
    }
}

/// What a successful call resolves to
#[derive(Debug)]
pub struct CallOutcome {
    pub response: Message,
    /// Round-trip time of this exchange
    pub rtt: Duration,
    /// Verified (or learned, for calls without an expected id) responder
    pub responder: Id,
}

/// Server-wide smoothed RTT used to budget per-call timeouts.
///
/// `srtt` uses the same EWMA smoothing as the per-entry estimate;
/// `jitter` is a mean-deviation estimate in the TCP RTO style.
#[derive(Debug, Clone, Copy)]
pub struct RttEstimator {
    srtt: Option<f64>,
    jitter: f64,
}

const JITTER_GAIN: f64 = 0.25;

impl RttEstimator {
    pub fn new() -> Self {
        Self {
            srtt: None,
            jitter: 0.0,
        }
    }

    pub fn update(&mut self, sample: Duration) {
        let sample = sample.as_secs_f64() * 1000.0;
        match self.srtt {
            None => {
                self.srtt = Some(sample);
                self.jitter = sample / 2.0;
            }
            Some(srtt) => {
                self.jitter =
                    (1.0 - JITTER_GAIN) * self.jitter + JITTER_GAIN * (srtt - sample).abs();
                self.srtt = Some(RTT_EWMA_ALPHA * sample + (1.0 - RTT_EWMA_ALPHA) * srtt);
            }
        }
    }

    /// A timeout inflates the deviation so the next budget is larger
    pub fn update_timeout(&mut self, budget: Duration) {
        let budget = budget.as_secs_f64() * 1000.0;
        self.jitter = (1.0 - JITTER_GAIN) * self.jitter + JITTER_GAIN * budget;
    }

    /// `max(srtt + 2 * jitter, floor)`, capped
    pub fn timeout(&self) -> Duration {
        let Some(srtt) = self.srtt else {
            return RPC_CALL_TIMEOUT_MIN;
        };
        let ms = srtt + 2.0 * self.jitter;
        Duration::from_secs_f64(ms / 1000.0)
            .max(RPC_CALL_TIMEOUT_MIN)
            .min(RPC_CALL_TIMEOUT_MAX)
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_floor() {
        let mut est = RttEstimator::new();
        assert_eq!(est.timeout(), RPC_CALL_TIMEOUT_MIN);

        est.update(Duration::from_millis(30));
        // 30 ms RTT still floors at the minimum budget
        assert_eq!(est.timeout(), RPC_CALL_TIMEOUT_MIN);
    }

    #[test]
    fn test_timeout_cap() {
        let mut est = RttEstimator::new();
        est.update(Duration::from_secs(30));
        assert_eq!(est.timeout(), RPC_CALL_TIMEOUT_MAX);
    }

    #[test]
    fn test_ewma_tracks_samples() {
        let mut est = RttEstimator::new();
        est.update(Duration::from_millis(100));
        est.update(Duration::from_millis(200));
        // 0.3 * 200 + 0.7 * 100 = 130
        assert!((est.srtt.unwrap() - 130.0).abs() < 1e-9);
    }

    #[test]
    fn test_timeout_inflates_budget() {
        let mut est = RttEstimator::new();
        est.update(Duration::from_secs(3));
        let before = est.timeout();
        est.update_timeout(before);
        assert!(est.timeout() >= before);
    }

    #[test]
    fn test_terminal_states() {
        for state in [
            CallState::Responded,
            CallState::Timeout,
            CallState::Error,
            CallState::Canceled,
        ] {
            assert!(state.is_terminal());
        }
        for state in [CallState::Unsent, CallState::Sent, CallState::Stalled] {
            assert!(!state.is_terminal());
        }
    }
}
