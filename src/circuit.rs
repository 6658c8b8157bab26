//! Circuit breaker (C2) — per-provider in-process state machine.
//!
//! Process-local state behind one mutex per provider, the same locking
//! granularity the teacher uses for its per-key round-robin counters in
//! `PoolManager` rather than one lock over the whole map.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::models::CircuitState;

const FAILURE_THRESHOLD: u32 = 5;
const OPEN_DURATION: Duration = Duration::from_secs(30 * 60);
const HALF_OPEN_SUCCESS_THRESHOLD: u32 = 2;

#[derive(Debug, Clone)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    open_until: Option<Instant>,
    half_open_successes: u32,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            open_until: None,
            half_open_successes: 0,
        }
    }
}

/// Registry of per-provider breakers. Lost on restart — cold start is
/// fail-closed to `closed`, which spec.md §3 calls acceptable.
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<Uuid, BreakerState>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if calls to this provider should currently be
    /// skipped. As a side effect, flips `open` -> `half_open` once
    /// `open_until` has elapsed, admitting the probing request.
    pub fn is_open(&self, provider_id: Uuid) -> bool {
        let mut breakers = self.breakers.lock().unwrap();
        let entry = breakers.entry(provider_id).or_default();
        match entry.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen => false,
            CircuitState::Open => {
                if entry.open_until.map(|t| Instant::now() >= t).unwrap_or(false) {
                    entry.state = CircuitState::HalfOpen;
                    entry.half_open_successes = 0;
                    false
                } else {
                    true
                }
            }
        }
    }

    pub fn state(&self, provider_id: Uuid) -> CircuitState {
        let breakers = self.breakers.lock().unwrap();
        breakers.get(&provider_id).map(|b| b.state).unwrap_or(CircuitState::Closed)
    }

    pub fn record_success(&self, provider_id: Uuid) {
        let mut breakers = self.breakers.lock().unwrap();
        let entry = breakers.entry(provider_id).or_default();
        match entry.state {
            CircuitState::Closed => entry.failure_count = 0,
            CircuitState::HalfOpen => {
                entry.half_open_successes += 1;
                if entry.half_open_successes >= HALF_OPEN_SUCCESS_THRESHOLD {
                    *entry = BreakerState::default();
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, provider_id: Uuid) {
        let mut breakers = self.breakers.lock().unwrap();
        let entry = breakers.entry(provider_id).or_default();
        match entry.state {
            CircuitState::Closed => {
                entry.failure_count += 1;
                if entry.failure_count >= FAILURE_THRESHOLD {
                    entry.state = CircuitState::Open;
                    entry.open_until = Some(Instant::now() + OPEN_DURATION);
                }
            }
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.open_until = Some(Instant::now() + OPEN_DURATION);
                entry.half_open_successes = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Admin-triggered manual reset.
    pub fn reset(&self, provider_id: Uuid) {
        let mut breakers = self.breakers.lock().unwrap();
        breakers.insert(provider_id, BreakerState::default());
    }

    pub fn snapshot(&self) -> HashMap<Uuid, CircuitState> {
        let breakers = self.breakers.lock().unwrap();
        breakers.iter().map(|(id, b)| (*id, b.state)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_by_default() {
        let reg = CircuitBreakerRegistry::new();
        let id = Uuid::new_v4();
        assert!(!reg.is_open(id));
        assert_eq!(reg.state(id), CircuitState::Closed);
    }

    #[test]
    fn flips_open_exactly_at_threshold() {
        let reg = CircuitBreakerRegistry::new();
        let id = Uuid::new_v4();
        for _ in 0..FAILURE_THRESHOLD - 1 {
            reg.record_failure(id);
            assert_eq!(reg.state(id), CircuitState::Closed);
        }
        reg.record_failure(id);
        assert_eq!(reg.state(id), CircuitState::Open);
        assert!(reg.is_open(id));
    }

    #[test]
    fn success_resets_failure_count_when_closed() {
        let reg = CircuitBreakerRegistry::new();
        let id = Uuid::new_v4();
        for _ in 0..FAILURE_THRESHOLD - 1 {
            reg.record_failure(id);
        }
        reg.record_success(id);
        for _ in 0..FAILURE_THRESHOLD - 1 {
            reg.record_failure(id);
        }
        assert_eq!(reg.state(id), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_for_full_duration() {
        let reg = CircuitBreakerRegistry::new();
        let id = Uuid::new_v4();
        for _ in 0..FAILURE_THRESHOLD {
            reg.record_failure(id);
        }
        {
            let mut breakers = reg.breakers.lock().unwrap();
            breakers.get_mut(&id).unwrap().open_until = Some(Instant::now());
        }
        assert!(!reg.is_open(id));
        assert_eq!(reg.state(id), CircuitState::HalfOpen);
        reg.record_failure(id);
        assert_eq!(reg.state(id), CircuitState::Open);
    }

    #[test]
    fn half_open_needs_two_successes_to_close() {
        let reg = CircuitBreakerRegistry::new();
        let id = Uuid::new_v4();
        for _ in 0..FAILURE_THRESHOLD {
            reg.record_failure(id);
        }
        {
            let mut breakers = reg.breakers.lock().unwrap();
            breakers.get_mut(&id).unwrap().open_until = Some(Instant::now());
        }
        reg.is_open(id);
        reg.record_success(id);
        assert_eq!(reg.state(id), CircuitState::HalfOpen);
        reg.record_success(id);
        assert_eq!(reg.state(id), CircuitState::Closed);
    }

    #[test]
    fn manual_reset_closes_immediately() {
        let reg = CircuitBreakerRegistry::new();
        let id = Uuid::new_v4();
        for _ in 0..FAILURE_THRESHOLD {
            reg.record_failure(id);
        }
        reg.reset(id);
        assert!(!reg.is_open(id));
    }
}
