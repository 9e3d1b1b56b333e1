//! The borrow handle returned by `acquire`.

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::allocator::TransportAllocator;
use crate::endpoint::EndpointPool;
use crate::slot::PooledTransport;

/// An exclusive loan of one pooled transport.
///
/// While the lease is alive the transport belongs to the holder alone; the
/// pool will not lend it to anyone else, validate it, or expire it. Give it
/// back with [`release`](Self::release) when the transport is still good,
/// or [`discard`](Self::discard) after a protocol error left it unusable.
///
/// Dropping a lease without an explicit release returns the transport to
/// its pool as if released, so a forgotten lease never leaks capacity.
/// Prefer the explicit calls: they also run the allocator's teardown when
/// the pool has closed underneath the holder.
pub struct TransportLease<A: TransportAllocator> {
    pool: EndpointPool<A>,
    slot: Option<PooledTransport<A::Transport>>,
}

impl<A: TransportAllocator> TransportLease<A> {
    pub(crate) fn new(pool: EndpointPool<A>, slot: PooledTransport<A::Transport>) -> Self {
        Self {
            pool,
            slot: Some(slot),
        }
    }

    pub(crate) fn take_slot(&mut self) -> Option<PooledTransport<A::Transport>> {
        self.slot.take()
    }

    /// The endpoint this transport is connected to.
    pub fn endpoint(&self) -> &str {
        self.pool.endpoint()
    }

    /// How many times the underlying transport has been lent out,
    /// including this loan.
    pub fn use_count(&self) -> u64 {
        self.slot().use_count()
    }

    /// Return the transport to its pool for reuse.
    pub async fn release(mut self) {
        if let Some(slot) = self.take_slot() {
            let pool = self.pool.clone();
            pool.release_slot(slot).await;
        }
    }

    /// Destroy the transport instead of returning it.
    ///
    /// Use after a protocol error: the pool frees the slot immediately so a
    /// subsequent acquire allocates a fresh transport.
    pub async fn discard(mut self) {
        if let Some(slot) = self.take_slot() {
            let pool = self.pool.clone();
            pool.discard_slot(slot).await;
        }
    }

    fn slot(&self) -> &PooledTransport<A::Transport> {
        self.slot
            .as_ref()
            .expect("lease accessed after its slot was taken")
    }
}

impl<A: TransportAllocator> Deref for TransportLease<A> {
    type Target = A::Transport;

    fn deref(&self) -> &Self::Target {
        self.slot().transport()
    }
}

impl<A: TransportAllocator> DerefMut for TransportLease<A> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.slot
            .as_mut()
            .expect("lease accessed after its slot was taken")
            .transport_mut()
    }
}

impl<A: TransportAllocator> Drop for TransportLease<A> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.repark(slot);
        }
    }
}

impl<A: TransportAllocator> fmt::Debug for TransportLease<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportLease")
            .field("endpoint", &self.endpoint())
            .field("held", &self.slot.is_some())
            .finish()
    }
}
