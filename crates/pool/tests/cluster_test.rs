//! Cluster coordinator behavior: lazy exactly-once pool creation, routing,
//! per-endpoint isolation, background sweeping and shutdown fan-out.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::MockAllocator;
use courier_pool::{ClusterConfig, CourierError, TransportCluster};
use tokio::sync::Barrier;
use tokio::time::sleep;

fn cluster_with(
    max_size: usize,
    expiry: Duration,
    sweep: Duration,
) -> (TransportCluster<MockAllocator>, Arc<MockAllocator>) {
    let config = ClusterConfig::builder(MockAllocator::new())
        .max_size(max_size)
        .expiry_timeout(expiry)
        .sweep_interval(sweep)
        .close_grace(Duration::from_secs(1))
        .build()
        .unwrap();
    let allocator = config.allocator();
    (TransportCluster::new(config), allocator)
}

#[tokio::test]
async fn test_racing_first_use_creates_one_pool() {
    let (cluster, allocator) = cluster_with(4, Duration::from_secs(10), Duration::from_secs(5));
    let cluster = Arc::new(cluster);

    let barrier = Arc::new(Barrier::new(10));
    let mut tasks = Vec::new();
    for _ in 0..10 {
        let cluster = Arc::clone(&cluster);
        let barrier = Arc::clone(&barrier);
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            let lease = cluster
                .acquire(&"smtp://primary:587".to_string(), Duration::from_secs(5))
                .await
                .unwrap();
            lease.release().await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(cluster.pool_count(), 1, "one pool per endpoint, exactly");
    assert!(
        allocator.allocated() <= 4,
        "racing callers must share one bounded pool"
    );
}

#[tokio::test]
async fn test_pools_are_partitioned_by_descriptor() {
    let (cluster, allocator) = cluster_with(4, Duration::from_secs(10), Duration::from_secs(5));

    let a = cluster
        .acquire(&"smtp://primary:587".to_string(), Duration::from_secs(1))
        .await
        .unwrap();
    let b = cluster
        .acquire(&"smtp://fallback:587".to_string(), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(cluster.pool_count(), 2);
    assert_eq!(allocator.allocated(), 2);

    cluster.release(a).await;
    cluster.release(b).await;

    let primary = cluster
        .endpoint_pool(&"smtp://primary:587".to_string())
        .unwrap();
    assert_eq!(primary.stats().idle, 1);
}

#[tokio::test]
async fn test_endpoint_failures_stay_isolated() {
    let (cluster, allocator) = cluster_with(4, Duration::from_secs(10), Duration::from_secs(5));
    allocator.fail_endpoint("smtp://broken:587");

    let err = cluster
        .acquire(&"smtp://broken:587".to_string(), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, CourierError::Allocation { .. }));

    // The healthy endpoint is untouched by its sibling's failures.
    let lease = cluster
        .acquire(&"smtp://primary:587".to_string(), Duration::from_secs(1))
        .await
        .unwrap();
    cluster.release(lease).await;

    let broken = cluster
        .endpoint_pool(&"smtp://broken:587".to_string())
        .unwrap();
    assert_eq!(broken.stats().live, 0);
}

#[tokio::test]
async fn test_discard_routes_to_member_pool() {
    let (cluster, allocator) = cluster_with(4, Duration::from_secs(10), Duration::from_secs(5));

    let lease = cluster
        .acquire(&"smtp://primary:587".to_string(), Duration::from_secs(1))
        .await
        .unwrap();
    cluster.discard(lease).await;

    let primary = cluster
        .endpoint_pool(&"smtp://primary:587".to_string())
        .unwrap();
    assert_eq!(primary.stats().live, 0);
    assert_eq!(primary.stats().total_discarded, 1);
    assert_eq!(allocator.deallocated(), 1);
}

#[tokio::test]
async fn test_background_sweep_reclaims_idle_without_demand() {
    let (cluster, allocator) = cluster_with(
        4,
        Duration::from_millis(30),
        Duration::from_millis(40),
    );

    let lease = cluster
        .acquire(&"smtp://primary:587".to_string(), Duration::from_secs(1))
        .await
        .unwrap();
    cluster.release(lease).await;

    // No further acquires: only the sweep can reclaim the idle transport.
    sleep(Duration::from_millis(300)).await;

    let primary = cluster
        .endpoint_pool(&"smtp://primary:587".to_string())
        .unwrap();
    assert_eq!(primary.stats().idle, 0);
    assert_eq!(allocator.deallocated(), 1);
}

#[tokio::test]
async fn test_prewarmed_core_on_lazy_creation() {
    let config = ClusterConfig::builder(MockAllocator::new())
        .core_size(2)
        .max_size(4)
        .build()
        .unwrap();
    let allocator = config.allocator();
    let cluster = TransportCluster::new(config);

    let lease = cluster
        .acquire(&"smtp://primary:587".to_string(), Duration::from_secs(1))
        .await
        .unwrap();
    cluster.release(lease).await;

    sleep(Duration::from_millis(100)).await;
    assert!(
        allocator.allocated() >= 2,
        "core should be warmed in the background"
    );
}

#[tokio::test]
async fn test_close_all_fans_out() {
    let (cluster, allocator) = cluster_with(4, Duration::from_secs(10), Duration::from_secs(5));

    for endpoint in ["smtp://primary:587", "smtp://fallback:587"] {
        let lease = cluster
            .acquire(&endpoint.to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        cluster.release(lease).await;
    }

    cluster.close_all().await.unwrap();
    assert_eq!(
        allocator.deallocated(),
        allocator.allocated(),
        "every idle transport destroyed on shutdown"
    );

    let err = cluster
        .acquire(&"smtp://primary:587".to_string(), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, CourierError::PoolClosed { .. }));

    // Idempotent.
    cluster.close_all().await.unwrap();
}

#[tokio::test]
async fn test_stats_cover_all_members() {
    let (cluster, _allocator) = cluster_with(4, Duration::from_secs(10), Duration::from_secs(5));

    let a = cluster
        .acquire(&"smtp://primary:587".to_string(), Duration::from_secs(1))
        .await
        .unwrap();
    let b = cluster
        .acquire(&"smtp://fallback:587".to_string(), Duration::from_secs(1))
        .await
        .unwrap();

    let stats = cluster.stats();
    assert_eq!(stats.len(), 2);
    assert!(stats.iter().all(|s| s.active == 1));

    cluster.release(a).await;
    cluster.release(b).await;
}
