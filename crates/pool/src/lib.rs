//! Clustered pooling of reusable network-transport connections.
//!
//! Courier keeps long-lived connections to remote endpoints warm so that
//! outbound senders never pay connection setup per message. Each endpoint
//! gets its own bounded pool; a [`TransportCluster`] aggregates them
//! behind one interface keyed by session descriptor.
//!
//! - **Bounded pools**: a core kept warm, a hard ceiling, FIFO queueing
//!   with timeout once the ceiling is reached
//! - **Lifecycle management**: lazy validation on reuse, pluggable
//!   expiration policies, a background sweep that reclaims idle
//!   transports even when traffic stops
//! - **Pluggable transports**: anything that can be opened, probed and
//!   closed through a [`TransportAllocator`]
//! - **Safe failure recovery**: allocation failures surface to the one
//!   caller that hit them; cancelled waiters and dropped leases roll
//!   their bookkeeping back
//!
//! # Usage
//!
//! ```ignore
//! use std::time::Duration;
//! use courier_pool::{ClusterConfig, TransportCluster};
//!
//! let config = ClusterConfig::builder(my_allocator)
//!     .max_size(4)
//!     .expiry_timeout(Duration::from_secs(10))
//!     .build()?;
//! let cluster = TransportCluster::new(config);
//!
//! let lease = cluster.acquire(&descriptor, Duration::from_secs(5)).await?;
//! // send over &*lease ...
//! lease.release().await;
//! ```

pub mod allocator;
pub mod cluster;
pub mod config;
pub mod endpoint;
pub mod expiry;
pub mod lease;
pub mod slot;

pub use allocator::{SessionDescriptor, TransportAllocator};
pub use cluster::TransportCluster;
pub use config::{ClusterConfig, ClusterConfigBuilder};
pub use endpoint::{EndpointPool, PoolStats};
pub use expiry::{ExpirationPolicy, NeverExpire, TimeoutSinceAllocation, TimeoutSinceLastUse};
pub use lease::TransportLease;
pub use slot::PooledTransport;

// Re-export the shared error types so callers need only this crate.
pub use courier_common::{CourierError, CourierResult};
