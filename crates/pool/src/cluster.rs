//! The cluster coordinator.
//!
//! A [`TransportCluster`] owns one [`EndpointPool`] per distinct session
//! descriptor, created lazily on first acquire and exactly once even when
//! many callers race the first use. It routes acquire/release/discard
//! traffic to the right member pool, runs one background maintenance task
//! that sweeps every member, and fans out shutdown best-effort.
//!
//! The cluster does no endpoint selection of its own: callers name the
//! endpoint via the descriptor they pass, and failures stay confined to
//! that endpoint's pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use courier_common::{CourierError, CourierResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::allocator::TransportAllocator;
use crate::config::ClusterConfig;
use crate::endpoint::{EndpointPool, PoolStats};
use crate::lease::TransportLease;

/// One pool per endpoint, behind a single client-facing interface.
///
/// ```ignore
/// let cluster = TransportCluster::new(config);
/// let lease = cluster.acquire(&descriptor, Duration::from_secs(5)).await?;
/// // send traffic over &*lease ...
/// cluster.release(lease).await;
/// cluster.close_all().await?;
/// ```
///
/// Must be created inside a tokio runtime: construction spawns the
/// maintenance task that periodically reclaims expired and surplus idle
/// transports across all member pools.
pub struct TransportCluster<A: TransportAllocator> {
    inner: Arc<ClusterInner<A>>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

struct ClusterInner<A: TransportAllocator> {
    config: ClusterConfig<A>,
    pools: DashMap<A::Descriptor, EndpointPool<A>>,
    closed: AtomicBool,
}

impl<A: TransportAllocator> TransportCluster<A> {
    /// Create a cluster and start its maintenance task.
    pub fn new(config: ClusterConfig<A>) -> Self {
        let inner = Arc::new(ClusterInner {
            config,
            pools: DashMap::new(),
            closed: AtomicBool::new(false),
        });
        let sweep = Arc::clone(&inner);
        let maintenance = tokio::spawn(async move { run_maintenance(sweep).await });
        info!("transport cluster created");
        Self {
            inner,
            maintenance: Mutex::new(Some(maintenance)),
        }
    }

    /// Borrow a transport to the given endpoint, waiting up to `timeout`
    /// for capacity in that endpoint's pool.
    ///
    /// The member pool is created on first use; creation is exactly-once
    /// per descriptor under concurrent first callers.
    pub async fn acquire(
        &self,
        descriptor: &A::Descriptor,
        timeout: Duration,
    ) -> CourierResult<TransportLease<A>> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CourierError::closed(descriptor.to_string()));
        }
        let pool = self.pool_for(descriptor);
        pool.acquire(timeout).await
    }

    /// Return a lease to its member pool.
    ///
    /// The lease carries its owning pool, so routing cannot go wrong.
    pub async fn release(&self, lease: TransportLease<A>) {
        lease.release().await;
    }

    /// Destroy a lease's transport and free its slot in the member pool.
    pub async fn discard(&self, lease: TransportLease<A>) {
        lease.discard().await;
    }

    /// The member pool for a descriptor, if one has been created.
    pub fn endpoint_pool(&self, descriptor: &A::Descriptor) -> Option<EndpointPool<A>> {
        self.inner
            .pools
            .get(descriptor)
            .map(|entry| entry.value().clone())
    }

    /// Number of member pools.
    pub fn pool_count(&self) -> usize {
        self.inner.pools.len()
    }

    /// Statistics for every member pool.
    pub fn stats(&self) -> Vec<PoolStats> {
        self.inner
            .pools
            .iter()
            .map(|entry| entry.value().stats())
            .collect()
    }

    /// Close every member pool and stop the maintenance task.
    ///
    /// Best-effort fan-out: every member is closed even if an earlier one
    /// fails; the first failure is reported after all have been attempted.
    /// Idempotent; subsequent acquires fail with `PoolClosed`.
    pub async fn close_all(&self) -> CourierResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
        info!(pools = self.inner.pools.len(), "closing all endpoint pools");

        let pools: Vec<_> = self
            .inner
            .pools
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let mut first_err = None;
        for pool in pools {
            if let Err(err) = pool.close().await {
                warn!(endpoint = %pool.endpoint(), error = %err, "pool close failed");
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn pool_for(&self, descriptor: &A::Descriptor) -> EndpointPool<A> {
        if let Some(pool) = self.inner.pools.get(descriptor) {
            return pool.value().clone();
        }
        // Entry API gives atomic check-and-insert, so racing first callers
        // agree on one pool instance.
        let mut created = false;
        let pool = {
            let entry = self
                .inner
                .pools
                .entry(descriptor.clone())
                .or_insert_with(|| {
                    created = true;
                    EndpointPool::new(descriptor.clone(), &self.inner.config)
                });
            entry.value().clone()
        };
        if created {
            info!(endpoint = %descriptor, "endpoint pool created on first use");
            if self.inner.config.core_size() > 0 {
                let warm = pool.clone();
                tokio::spawn(async move { warm.prewarm().await });
            }
        }
        pool
    }
}

impl<A: TransportAllocator> Drop for TransportCluster<A> {
    fn drop(&mut self) {
        // A cluster abandoned without close_all must not leave its sweep
        // task running forever.
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
    }
}

async fn run_maintenance<A: TransportAllocator>(inner: Arc<ClusterInner<A>>) {
    let mut interval = tokio::time::interval(inner.config.sweep_interval());
    loop {
        interval.tick().await;
        if inner.closed.load(Ordering::Acquire) {
            return;
        }
        let pools: Vec<_> = inner.pools.iter().map(|entry| entry.value().clone()).collect();
        for pool in pools {
            let reaped = pool.shrink_to_core().await;
            if reaped > 0 {
                debug!(
                    endpoint = %pool.endpoint(),
                    reaped = reaped,
                    "maintenance sweep reclaimed idle transports"
                );
            }
        }
    }
}
