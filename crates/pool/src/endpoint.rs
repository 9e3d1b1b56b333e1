//! The single-endpoint transport pool.
//!
//! One `EndpointPool` manages a bounded set of connections to one remote
//! endpoint: a core of connections kept warm, a hard ceiling on the total,
//! an idle queue reused most-recently-returned first, and a FIFO queue of
//! callers waiting for capacity.
//!
//! # Locking
//!
//! All slot bookkeeping (idle queue, live count, waiter queue, closed
//! flag) sits behind one `parking_lot::Mutex`. Allocator I/O (connect,
//! probe, teardown) always runs outside that lock, so a slow handshake
//! never stalls unrelated acquire/release traffic. Every waiter grant is
//! sent while the lock is held, which lets a timed-out waiter resolve the
//! grant-vs-timeout race deterministically.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use courier_common::{CourierError, CourierResult};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::allocator::TransportAllocator;
use crate::config::ClusterConfig;
use crate::expiry::ExpirationPolicy;
use crate::lease::TransportLease;
use crate::slot::PooledTransport;

/// A bounded pool of transports for one endpoint.
///
/// Cheaply cloneable handle; clones share the same pool. Normally obtained
/// through a [`TransportCluster`](crate::cluster::TransportCluster), but
/// usable standalone:
///
/// ```ignore
/// let pool = EndpointPool::new(descriptor, &config);
/// let lease = pool.acquire(Duration::from_secs(5)).await?;
/// // use &*lease ...
/// lease.release().await;
/// ```
pub struct EndpointPool<A: TransportAllocator> {
    inner: Arc<PoolInner<A>>,
}

impl<A: TransportAllocator> Clone for EndpointPool<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PoolInner<A: TransportAllocator> {
    descriptor: A::Descriptor,
    /// Display form of the descriptor, cached for log fields.
    endpoint: String,
    allocator: Arc<A>,
    expiry: Arc<dyn ExpirationPolicy<A::Transport>>,
    core_size: usize,
    max_size: usize,
    close_grace: Duration,
    state: Mutex<PoolState<A>>,
    next_waiter_id: AtomicU64,
    total_allocated: AtomicU64,
    total_reused: AtomicU64,
    total_expired: AtomicU64,
    total_trimmed: AtomicU64,
    total_invalid: AtomicU64,
    total_discarded: AtomicU64,
    total_timed_out: AtomicU64,
}

struct PoolState<A: TransportAllocator> {
    /// Idle slots, most recently returned at the back.
    idle: VecDeque<PooledTransport<A::Transport>>,
    /// Transports that exist or are being allocated: active loans + idle
    /// slots + in-flight allocation reservations. Never exceeds max_size.
    live: usize,
    /// Callers parked waiting for capacity, eldest at the front.
    waiters: VecDeque<Waiter<A>>,
    closed: bool,
}

struct Waiter<A: TransportAllocator> {
    id: u64,
    tx: oneshot::Sender<Grant<A>>,
}

/// What a parked waiter is woken with.
enum Grant<A: TransportAllocator> {
    /// A released transport, handed over directly.
    Transport(GrantedSlot<A>),
    /// Capacity opened up; the reservation is already held, go allocate.
    Permit(AllocPermit<A>),
}

/// A slot in flight to a waiter. If the waiter vanished before polling the
/// grant, dropping this reparks the slot instead of leaking it.
struct GrantedSlot<A: TransportAllocator> {
    pool: EndpointPool<A>,
    slot: Option<PooledTransport<A::Transport>>,
}

impl<A: TransportAllocator> GrantedSlot<A> {
    fn into_slot(mut self) -> Option<PooledTransport<A::Transport>> {
        self.slot.take()
    }
}

impl<A: TransportAllocator> Drop for GrantedSlot<A> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.repark(slot);
        }
    }
}

/// A reservation of one live-count unit for an allocation in progress.
/// Dropped without `disarm`, it returns the unit and wakes the next
/// waiter, so a failed or abandoned allocation never strands capacity.
struct AllocPermit<A: TransportAllocator> {
    pool: EndpointPool<A>,
    armed: bool,
}

impl<A: TransportAllocator> AllocPermit<A> {
    fn new(pool: EndpointPool<A>) -> Self {
        Self { pool, armed: true }
    }

    /// Consume the permit: the allocated transport now carries the unit.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<A: TransportAllocator> Drop for AllocPermit<A> {
    fn drop(&mut self) {
        if self.armed {
            let pool = self.pool.clone();
            let mut state = pool.inner.state.lock();
            state.live -= 1;
            pool.wake_permit(&mut state);
        }
    }
}

impl<A: TransportAllocator> EndpointPool<A> {
    /// Create a pool for one endpoint from the cluster configuration.
    ///
    /// The core is not prewarmed here; call [`prewarm`](Self::prewarm)
    /// (the cluster spawns it on lazy pool creation).
    pub fn new(descriptor: A::Descriptor, config: &ClusterConfig<A>) -> Self {
        let endpoint = descriptor.to_string();
        debug!(
            endpoint = %endpoint,
            core_size = config.core_size(),
            max_size = config.max_size(),
            "creating endpoint pool"
        );
        Self {
            inner: Arc::new(PoolInner {
                descriptor,
                endpoint,
                allocator: config.allocator(),
                expiry: config.expiration_policy(),
                core_size: config.core_size(),
                max_size: config.max_size(),
                close_grace: config.close_grace(),
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    live: 0,
                    waiters: VecDeque::new(),
                    closed: false,
                }),
                next_waiter_id: AtomicU64::new(0),
                total_allocated: AtomicU64::new(0),
                total_reused: AtomicU64::new(0),
                total_expired: AtomicU64::new(0),
                total_trimmed: AtomicU64::new(0),
                total_invalid: AtomicU64::new(0),
                total_discarded: AtomicU64::new(0),
                total_timed_out: AtomicU64::new(0),
            }),
        }
    }

    /// The endpoint this pool connects to, in display form.
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// The descriptor this pool was created for.
    pub fn descriptor(&self) -> &A::Descriptor {
        &self.inner.descriptor
    }

    /// Borrow a transport, waiting up to `timeout` for capacity.
    ///
    /// Resolution order: a valid idle transport (most recently returned
    /// first, expired ones destroyed on the way), then a fresh allocation
    /// if the pool is below its ceiling, then FIFO parking until a holder
    /// releases or discards. An allocation failure is surfaced to this
    /// caller without any internal retry.
    ///
    /// # Errors
    ///
    /// [`CourierError::Allocation`] if opening a new transport failed,
    /// [`CourierError::PoolExhausted`] if `timeout` elapsed while parked,
    /// [`CourierError::PoolClosed`] after [`close`](Self::close).
    pub async fn acquire(&self, timeout: Duration) -> CourierResult<TransportLease<A>> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut expired = Vec::new();
            let mut candidate = None;
            let mut permit = None;
            let mut parked = None;
            {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(CourierError::closed(self.inner.endpoint.as_str()));
                }
                let now = Instant::now();
                while let Some(slot) = state.idle.pop_back() {
                    if self.inner.expiry.is_expired(&slot, now) {
                        state.live -= 1;
                        expired.push(slot);
                    } else {
                        candidate = Some(slot);
                        break;
                    }
                }
                if candidate.is_none() {
                    if state.live < self.inner.max_size {
                        state.live += 1;
                        permit = Some(AllocPermit::new(self.clone()));
                    } else {
                        let id = self.inner.next_waiter_id.fetch_add(1, Ordering::Relaxed);
                        let (tx, rx) = oneshot::channel();
                        state.waiters.push_back(Waiter { id, tx });
                        parked = Some((id, rx));
                    }
                }
            }

            for slot in expired {
                self.inner.total_expired.fetch_add(1, Ordering::Relaxed);
                self.destroy(slot, "expired").await;
            }

            if let Some(mut slot) = candidate {
                if self.inner.allocator.validate(slot.transport_mut()).await {
                    self.inner.total_reused.fetch_add(1, Ordering::Relaxed);
                    trace!(
                        endpoint = %self.inner.endpoint,
                        use_count = slot.use_count() + 1,
                        "reusing idle transport"
                    );
                    return Ok(self.lend(slot));
                }
                // Stale connection: free its slot and keep looking.
                self.inner.total_invalid.fetch_add(1, Ordering::Relaxed);
                {
                    let mut state = self.inner.state.lock();
                    state.live -= 1;
                    self.wake_permit(&mut state);
                }
                self.destroy(slot, "failed validation").await;
                continue;
            }

            if let Some(permit) = permit {
                return self.allocate_with(permit).await;
            }

            let Some((id, mut rx)) = parked else {
                continue;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut rx).await {
                Ok(Ok(Grant::Transport(granted))) => match granted.into_slot() {
                    Some(slot) => return Ok(self.lend(slot)),
                    None => continue,
                },
                Ok(Ok(Grant::Permit(permit))) => return self.allocate_with(permit).await,
                Ok(Err(_)) => {
                    // Sender dropped without a grant: the pool closed.
                    return Err(CourierError::closed(self.inner.endpoint.as_str()));
                }
                Err(_) => {
                    let still_parked = {
                        let mut state = self.inner.state.lock();
                        match state.waiters.iter().position(|w| w.id == id) {
                            Some(pos) => {
                                state.waiters.remove(pos);
                                true
                            }
                            None => false,
                        }
                    };
                    if !still_parked {
                        // A grant raced our timeout. Grants are sent under
                        // the lock, so it is visible now; dropping it
                        // reparks the slot / frees the reservation.
                        if let Ok(grant) = rx.try_recv() {
                            drop(grant);
                        }
                    }
                    self.inner.total_timed_out.fetch_add(1, Ordering::Relaxed);
                    return Err(CourierError::exhausted(
                        self.inner.endpoint.as_str(),
                        timeout.as_millis() as u64,
                    ));
                }
            }
        }
    }

    /// Pre-allocate transports up to the core size. Best-effort: the first
    /// allocation failure is logged and ends the warmup.
    pub async fn prewarm(&self) {
        let target = self.inner.core_size.min(self.inner.max_size);
        loop {
            let permit = {
                let mut state = self.inner.state.lock();
                if state.closed || state.live >= target {
                    return;
                }
                state.live += 1;
                AllocPermit::new(self.clone())
            };
            match self.inner.allocator.allocate(&self.inner.descriptor).await {
                Ok(transport) => {
                    permit.disarm();
                    self.inner.total_allocated.fetch_add(1, Ordering::Relaxed);
                    let slot = PooledTransport::new(transport);
                    let mut closed_slot = None;
                    {
                        let mut state = self.inner.state.lock();
                        if state.closed {
                            state.live -= 1;
                            closed_slot = Some(slot);
                        } else {
                            self.hand_off_or_park(&mut state, slot);
                        }
                    }
                    if let Some(slot) = closed_slot {
                        self.destroy(slot, "pool closed during prewarm").await;
                        return;
                    }
                }
                Err(err) => {
                    drop(permit);
                    warn!(
                        endpoint = %self.inner.endpoint,
                        error = %err,
                        "prewarm allocation failed"
                    );
                    return;
                }
            }
        }
    }

    /// Destroy idle transports that have expired or exceed the core size.
    ///
    /// Run periodically by the cluster's maintenance task so long-idle
    /// transports are reclaimed even when no acquire traffic arrives.
    /// Returns the number of transports destroyed.
    pub async fn shrink_to_core(&self) -> usize {
        let mut stale = Vec::new();
        let mut surplus = Vec::new();
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return 0;
            }
            let now = Instant::now();
            let mut kept = VecDeque::with_capacity(state.idle.len());
            while let Some(slot) = state.idle.pop_front() {
                if self.inner.expiry.is_expired(&slot, now) {
                    stale.push(slot);
                } else {
                    kept.push_back(slot);
                }
            }
            state.idle = kept;
            while state.idle.len() > self.inner.core_size {
                if let Some(slot) = state.idle.pop_front() {
                    surplus.push(slot);
                }
            }
            state.live -= stale.len() + surplus.len();
            self.wake_permit(&mut state);
        }
        let reaped = stale.len() + surplus.len();
        for slot in stale {
            self.inner.total_expired.fetch_add(1, Ordering::Relaxed);
            self.destroy(slot, "expired").await;
        }
        for slot in surplus {
            self.inner.total_trimmed.fetch_add(1, Ordering::Relaxed);
            self.destroy(slot, "idle beyond core size").await;
        }
        reaped
    }

    /// Close the pool: fail parked waiters, destroy idle transports, then
    /// wait up to the configured grace for active loans to come home.
    ///
    /// Idempotent. Leases released after close are destroyed without
    /// error; new `acquire` calls fail immediately with `PoolClosed`.
    pub async fn close(&self) -> CourierResult<()> {
        let idle_slots = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.live -= idle.len();
            // Dropping the senders fails every parked acquire with
            // PoolClosed.
            state.waiters.clear();
            idle
        };
        for slot in idle_slots {
            self.destroy(slot, "pool closing").await;
        }

        let deadline = Instant::now() + self.inner.close_grace;
        loop {
            let live = self.inner.state.lock().live;
            if live == 0 {
                break;
            }
            if Instant::now() > deadline {
                warn!(
                    endpoint = %self.inner.endpoint,
                    outstanding = live,
                    "close grace elapsed with transports still on loan"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        info!(endpoint = %self.inner.endpoint, "endpoint pool closed");
        Ok(())
    }

    /// Snapshot of the pool's current occupancy and lifetime counters.
    pub fn stats(&self) -> PoolStats {
        let (active, idle, live, waiting) = {
            let state = self.inner.state.lock();
            (
                state.live - state.idle.len(),
                state.idle.len(),
                state.live,
                state.waiters.len(),
            )
        };
        PoolStats {
            endpoint: self.inner.endpoint.clone(),
            active,
            idle,
            live,
            waiting,
            core_size: self.inner.core_size,
            max_size: self.inner.max_size,
            total_allocated: self.inner.total_allocated.load(Ordering::Relaxed),
            total_reused: self.inner.total_reused.load(Ordering::Relaxed),
            total_expired: self.inner.total_expired.load(Ordering::Relaxed),
            total_trimmed: self.inner.total_trimmed.load(Ordering::Relaxed),
            total_invalid: self.inner.total_invalid.load(Ordering::Relaxed),
            total_discarded: self.inner.total_discarded.load(Ordering::Relaxed),
            total_timed_out: self.inner.total_timed_out.load(Ordering::Relaxed),
        }
    }

    // ========================================================================
    // Lease plumbing
    // ========================================================================

    pub(crate) async fn release_slot(&self, mut slot: PooledTransport<A::Transport>) {
        slot.touch();
        let doomed = {
            let mut state = self.inner.state.lock();
            if state.closed {
                state.live -= 1;
                Some(slot)
            } else {
                self.hand_off_or_park(&mut state, slot);
                None
            }
        };
        match doomed {
            Some(slot) => self.destroy(slot, "released after close").await,
            None => trace!(endpoint = %self.inner.endpoint, "transport released"),
        }
    }

    pub(crate) async fn discard_slot(&self, slot: PooledTransport<A::Transport>) {
        {
            let mut state = self.inner.state.lock();
            state.live -= 1;
            self.wake_permit(&mut state);
        }
        self.inner.total_discarded.fetch_add(1, Ordering::Relaxed);
        debug!(endpoint = %self.inner.endpoint, "transport discarded by holder");
        self.destroy(slot, "discarded").await;
    }

    /// Synchronous return path used by lease/grant drops. Bookkeeping
    /// only; a transport stranded by a post-close drop relies on its own
    /// `Drop` for teardown since the allocator cannot run here.
    pub(crate) fn repark(&self, mut slot: PooledTransport<A::Transport>) {
        slot.touch();
        let mut state = self.inner.state.lock();
        if state.closed {
            state.live -= 1;
            drop(state);
            trace!(endpoint = %self.inner.endpoint, "transport dropped after close");
        } else {
            self.hand_off_or_park(&mut state, slot);
            drop(state);
            trace!(endpoint = %self.inner.endpoint, "lease dropped; transport reparked");
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn lend(&self, mut slot: PooledTransport<A::Transport>) -> TransportLease<A> {
        slot.mark_borrowed();
        TransportLease::new(self.clone(), slot)
    }

    async fn allocate_with(&self, permit: AllocPermit<A>) -> CourierResult<TransportLease<A>> {
        match self.inner.allocator.allocate(&self.inner.descriptor).await {
            Ok(transport) => {
                permit.disarm();
                self.inner.total_allocated.fetch_add(1, Ordering::Relaxed);
                debug!(endpoint = %self.inner.endpoint, "allocated new transport");
                Ok(self.lend(PooledTransport::new(transport)))
            }
            Err(err) => {
                // Dropping the permit frees the reservation and wakes the
                // next waiter; the error goes to this caller untouched.
                drop(permit);
                warn!(
                    endpoint = %self.inner.endpoint,
                    error = %err,
                    "transport allocation failed"
                );
                Err(err)
            }
        }
    }

    async fn destroy(&self, slot: PooledTransport<A::Transport>, reason: &'static str) {
        trace!(endpoint = %self.inner.endpoint, reason = reason, "destroying transport");
        self.inner.allocator.deallocate(slot.into_transport()).await;
    }

    /// Hand a slot to the eldest waiter, or queue it idle. Callers hold
    /// the state lock. Keeps the invariant that the idle queue and the
    /// waiter queue are never both non-empty.
    fn hand_off_or_park(&self, state: &mut PoolState<A>, slot: PooledTransport<A::Transport>) {
        let mut slot = slot;
        while let Some(waiter) = state.waiters.pop_front() {
            let granted = GrantedSlot {
                pool: self.clone(),
                slot: Some(slot),
            };
            match waiter.tx.send(Grant::Transport(granted)) {
                Ok(()) => return,
                Err(grant) => {
                    // Receiver gone (caller dropped its acquire). Recover
                    // the slot without recursing into the guard's drop,
                    // which would re-take the lock we hold.
                    match grant {
                        Grant::Transport(mut granted) => match granted.slot.take() {
                            Some(recovered) => slot = recovered,
                            None => return,
                        },
                        Grant::Permit(mut permit) => {
                            permit.armed = false;
                            return;
                        }
                    }
                }
            }
        }
        state.idle.push_back(slot);
    }

    /// Wake the eldest waiter with an allocation permit if capacity is
    /// available. Callers hold the state lock and have just freed a unit.
    fn wake_permit(&self, state: &mut PoolState<A>) {
        while !state.closed && state.live < self.inner.max_size {
            let Some(waiter) = state.waiters.pop_front() else {
                return;
            };
            state.live += 1;
            match waiter.tx.send(Grant::Permit(AllocPermit::new(self.clone()))) {
                Ok(()) => return,
                Err(grant) => {
                    // Receiver gone; undo the reservation in place (the
                    // guard must not run its drop under our lock) and try
                    // the next waiter.
                    state.live -= 1;
                    if let Grant::Permit(mut permit) = grant {
                        permit.armed = false;
                    }
                }
            }
        }
    }
}

impl<A: TransportAllocator> fmt::Debug for EndpointPool<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("EndpointPool")
            .field("endpoint", &self.inner.endpoint)
            .field("live", &state.live)
            .field("idle", &state.idle.len())
            .field("waiting", &state.waiters.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Endpoint this pool serves
    pub endpoint: String,
    /// Transports currently on loan (includes in-flight allocations)
    pub active: usize,
    /// Transports waiting idle in the pool
    pub idle: usize,
    /// Total live transports (active + idle + reservations)
    pub live: usize,
    /// Callers parked waiting for capacity
    pub waiting: usize,
    /// Configured core size
    pub core_size: usize,
    /// Configured ceiling
    pub max_size: usize,
    /// Transports allocated over the pool's lifetime
    pub total_allocated: u64,
    /// Acquires satisfied from the idle queue
    pub total_reused: u64,
    /// Transports destroyed by the expiration policy
    pub total_expired: u64,
    /// Idle transports destroyed for exceeding the core size
    pub total_trimmed: u64,
    /// Transports destroyed after failing validation
    pub total_invalid: u64,
    /// Transports discarded by their holders
    pub total_discarded: u64,
    /// Acquire calls that timed out waiting for capacity
    pub total_timed_out: u64,
}

impl PoolStats {
    /// Fraction of successful acquires served without a fresh allocation.
    pub fn hit_rate(&self) -> f64 {
        let served = self.total_reused + self.total_allocated;
        if served == 0 {
            return 0.0;
        }
        self.total_reused as f64 / served as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = PoolStats {
            endpoint: "smtp.example.com:587".to_string(),
            active: 1,
            idle: 2,
            live: 3,
            waiting: 0,
            core_size: 0,
            max_size: 4,
            total_allocated: 10,
            total_reused: 90,
            total_expired: 1,
            total_trimmed: 0,
            total_invalid: 0,
            total_discarded: 2,
            total_timed_out: 0,
        };
        assert!((stats.hit_rate() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_hit_rate_empty() {
        let stats = PoolStats {
            endpoint: "smtp.example.com:587".to_string(),
            active: 0,
            idle: 0,
            live: 0,
            waiting: 0,
            core_size: 0,
            max_size: 4,
            total_allocated: 0,
            total_reused: 0,
            total_expired: 0,
            total_trimmed: 0,
            total_invalid: 0,
            total_discarded: 0,
            total_timed_out: 0,
        };
        assert_eq!(stats.hit_rate(), 0.0);
    }
}
