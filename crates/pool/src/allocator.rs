//! The allocator seam between the pooling engine and the transport layer.
//!
//! The engine knows nothing about what a transport *is*: how it connects,
//! authenticates or closes. All of that lives behind [`TransportAllocator`],
//! which the pool calls to create, probe and destroy the opaque handles it
//! manages.

use std::fmt;
use std::hash::Hash;

use async_trait::async_trait;
use courier_common::CourierResult;

/// Bounds required of an endpoint/session descriptor.
///
/// A descriptor identifies one remote endpoint and carries whatever the
/// allocator needs to open a transport to it (address, credentials, ...).
/// It doubles as the cluster's partition key, hence `Eq + Hash`; `Display`
/// is used for log fields and error messages.
///
/// Blanket-implemented: any type with the right bounds qualifies.
pub trait SessionDescriptor:
    Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static
{
}

impl<T> SessionDescriptor for T where
    T: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static
{
}

/// Creates, validates and destroys transport connections.
///
/// Implementations perform real network I/O; the pool guarantees these
/// methods are never called while its internal lock is held, so a slow
/// handshake never blocks unrelated acquire/release traffic.
///
/// # Contract
///
/// - `allocate` opens a fresh transport for the descriptor. Failures
///   (connect error, auth rejection) must be reported, not swallowed;
///   the pool surfaces them to the acquiring caller verbatim.
/// - `validate` is a cheap liveness probe. It must not fail for a dead
///   transport, only answer `false`.
/// - `deallocate` closes the transport best-effort. The transport is
///   being abandoned either way, so implementations log failures rather
///   than returning them.
#[async_trait]
pub trait TransportAllocator: Send + Sync + 'static {
    /// Endpoint descriptor this allocator connects to.
    type Descriptor: SessionDescriptor;
    /// The connection handle being pooled.
    type Transport: Send + 'static;

    /// Open a new transport bound to the given descriptor.
    async fn allocate(&self, descriptor: &Self::Descriptor) -> CourierResult<Self::Transport>;

    /// Cheap liveness check for an idle transport.
    async fn validate(&self, transport: &mut Self::Transport) -> bool;

    /// Close and release a transport. Best-effort.
    async fn deallocate(&self, transport: Self::Transport);
}
