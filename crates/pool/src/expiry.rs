//! Expiration policies for idle transports.
//!
//! A policy is a pure predicate over a slot's metadata and the current
//! time. The pool evaluates it in two places: lazily, when an idle slot is
//! pulled for a caller, and periodically, from the cluster's maintenance
//! sweep, so long-idle transports are reclaimed even when traffic stops.

use std::time::{Duration, Instant};

use crate::slot::PooledTransport;

/// Decides whether an idle transport is too stale to lend out again.
pub trait ExpirationPolicy<T>: Send + Sync + 'static {
    /// Returns `true` if the slot must be destroyed rather than reused.
    fn is_expired(&self, slot: &PooledTransport<T>, now: Instant) -> bool;
}

/// Expire a transport once it has sat unused for the given timeout.
///
/// This is the default policy, at 10 seconds.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutSinceLastUse {
    timeout: Duration,
}

impl TimeoutSinceLastUse {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TimeoutSinceLastUse {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl<T> ExpirationPolicy<T> for TimeoutSinceLastUse {
    fn is_expired(&self, slot: &PooledTransport<T>, now: Instant) -> bool {
        now.saturating_duration_since(slot.last_used_at()) >= self.timeout
    }
}

/// Expire a transport a fixed time after allocation, however busy it has
/// been since. Caps total connection lifetime, which some servers require.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutSinceAllocation {
    timeout: Duration,
}

impl TimeoutSinceAllocation {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl<T> ExpirationPolicy<T> for TimeoutSinceAllocation {
    fn is_expired(&self, slot: &PooledTransport<T>, now: Instant) -> bool {
        now.saturating_duration_since(slot.allocated_at()) >= self.timeout
    }
}

/// Never expire. Transports are only destroyed on validation failure,
/// discard or shutdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverExpire;

impl<T> ExpirationPolicy<T> for NeverExpire {
    fn is_expired(&self, _slot: &PooledTransport<T>, _now: Instant) -> bool {
        false
    }
}
