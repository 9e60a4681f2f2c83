//! Per-server health record: soft/hard failure modes and retry cooldown.

use crate::error::ErrorCode;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Ok,
    SoftFailed,
    HardFailed,
}

/// `SOFT_FAILED` is entered on protocol-level `SERVER_ERROR` / transient
/// read-write failures; `HARD_FAILED` on connect failure / fatal socket
/// error. Both carry a cooldown (`dead_until`) during which the router
/// skips the server (failover on) or reports `MC_SERVER_ERR` (failover
/// off).
#[derive(Debug, Clone)]
pub struct Health {
    pub state: HealthState,
    pub dead_until: Option<Instant>,
    pub last_error_code: ErrorCode,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            state: HealthState::Ok,
            dead_until: None,
            last_error_code: ErrorCode::Ok,
        }
    }
}

impl Health {
    pub fn is_ok(&self) -> bool {
        self.state == HealthState::Ok
    }

    /// Enter `SOFT_FAILED` with a `retry_timeout` cooldown starting now.
    pub fn mark_soft_fail(&mut self, code: ErrorCode, retry_timeout: Duration, now: Instant) {
        log::warn!("server soft-failed: {}", code);
        self.state = HealthState::SoftFailed;
        self.dead_until = Some(now + retry_timeout);
        self.last_error_code = code;
    }

    /// Enter `HARD_FAILED` with a `retry_timeout` cooldown starting now.
    pub fn mark_hard_fail(&mut self, code: ErrorCode, retry_timeout: Duration, now: Instant) {
        log::warn!("server hard-failed: {}", code);
        self.state = HealthState::HardFailed;
        self.dead_until = Some(now + retry_timeout);
        self.last_error_code = code;
    }

    /// True once `dead_until` has passed (or health was never marked
    /// dead), at which point a reconnect attempt is permitted again.
    pub fn cooldown_elapsed(&self, now: Instant) -> bool {
        self.dead_until.map(|d| now >= d).unwrap_or(true)
    }

    /// Clear health back to `OK`, e.g. after a successful reconnect.
    pub fn reset(&mut self) {
        self.state = HealthState::Ok;
        self.dead_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_then_cooldown() {
        let mut h = Health::default();
        assert!(h.is_ok());
        let now = Instant::now();
        h.mark_soft_fail(ErrorCode::McServerErr, Duration::from_secs(5), now);
        assert_eq!(HealthState::SoftFailed, h.state);
        assert!(!h.cooldown_elapsed(now));
        assert!(h.cooldown_elapsed(now + Duration::from_secs(6)));
    }

    #[test]
    fn test_reset() {
        let mut h = Health::default();
        h.mark_hard_fail(ErrorCode::SendErr, Duration::from_secs(5), Instant::now());
        h.reset();
        assert!(h.is_ok());
        assert_eq!(None, h.dead_until);
    }
}
