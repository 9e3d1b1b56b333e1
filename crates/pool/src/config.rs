//! Cluster configuration.
//!
//! A [`ClusterConfig`] is assembled once through its builder, validated,
//! and then frozen; every endpoint pool the cluster materializes is cut
//! from this one snapshot. There is no process-global configuration.

use std::sync::Arc;
use std::time::Duration;

use courier_common::{CourierError, CourierResult};

use crate::allocator::TransportAllocator;
use crate::expiry::{ExpirationPolicy, TimeoutSinceLastUse};

/// No transports are pre-warmed by default.
pub const DEFAULT_CORE_SIZE: usize = 0;
/// Default ceiling per endpoint pool.
pub const DEFAULT_MAX_SIZE: usize = 4;
/// Default cadence of the idle-reclamation sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
/// Default time `close` waits for active loans to come home.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(30);

/// Immutable configuration for a [`TransportCluster`](crate::TransportCluster).
///
/// Defaults: core size 0, max size 4, transports expired 10 seconds after
/// last use.
///
/// ```ignore
/// let config = ClusterConfig::builder(SmtpAllocator::new(credentials))
///     .max_size(8)
///     .expiry_timeout(Duration::from_secs(30))
///     .build()?;
/// let cluster = TransportCluster::new(config);
/// ```
pub struct ClusterConfig<A: TransportAllocator> {
    allocator: Arc<A>,
    expiry: Arc<dyn ExpirationPolicy<A::Transport>>,
    core_size: usize,
    max_size: usize,
    sweep_interval: Duration,
    close_grace: Duration,
}

impl<A: TransportAllocator> std::fmt::Debug for ClusterConfig<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("core_size", &self.core_size)
            .field("max_size", &self.max_size)
            .field("sweep_interval", &self.sweep_interval)
            .field("close_grace", &self.close_grace)
            .finish()
    }
}

impl<A: TransportAllocator> Clone for ClusterConfig<A> {
    fn clone(&self) -> Self {
        Self {
            allocator: Arc::clone(&self.allocator),
            expiry: Arc::clone(&self.expiry),
            core_size: self.core_size,
            max_size: self.max_size,
            sweep_interval: self.sweep_interval,
            close_grace: self.close_grace,
        }
    }
}

impl<A: TransportAllocator> ClusterConfig<A> {
    /// Start building a configuration around the given allocator.
    pub fn builder(allocator: A) -> ClusterConfigBuilder<A> {
        ClusterConfigBuilder {
            allocator: Arc::new(allocator),
            expiry: None,
            core_size: DEFAULT_CORE_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }

    pub fn allocator(&self) -> Arc<A> {
        Arc::clone(&self.allocator)
    }

    pub fn expiration_policy(&self) -> Arc<dyn ExpirationPolicy<A::Transport>> {
        Arc::clone(&self.expiry)
    }

    pub fn core_size(&self) -> usize {
        self.core_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    pub fn close_grace(&self) -> Duration {
        self.close_grace
    }
}

/// Builder for [`ClusterConfig`]. The only phase in which the
/// configuration is mutable.
pub struct ClusterConfigBuilder<A: TransportAllocator> {
    allocator: Arc<A>,
    expiry: Option<Arc<dyn ExpirationPolicy<A::Transport>>>,
    core_size: usize,
    max_size: usize,
    sweep_interval: Duration,
    close_grace: Duration,
}

impl<A: TransportAllocator> ClusterConfigBuilder<A> {
    /// Number of transports each pool keeps warm (default 0).
    pub fn core_size(mut self, core_size: usize) -> Self {
        self.core_size = core_size;
        self
    }

    /// Hard ceiling on live transports per endpoint pool (default 4).
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Replace the expiration policy (default: expired 10 seconds after
    /// last use).
    pub fn expiration_policy(mut self, policy: impl ExpirationPolicy<A::Transport>) -> Self {
        self.expiry = Some(Arc::new(policy));
        self
    }

    /// Shorthand for a [`TimeoutSinceLastUse`] policy with the given
    /// timeout.
    pub fn expiry_timeout(self, timeout: Duration) -> Self {
        self.expiration_policy(TimeoutSinceLastUse::new(timeout))
    }

    /// Cadence of the background idle-reclamation sweep (default 5 s).
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// How long `close` waits for active loans before giving up on them
    /// (default 30 s).
    pub fn close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Validate and freeze the configuration.
    ///
    /// # Errors
    ///
    /// `CourierError::Config` if `max_size` is zero, smaller than
    /// `core_size`, or the sweep interval is zero.
    pub fn build(self) -> CourierResult<ClusterConfig<A>> {
        if self.max_size == 0 {
            return Err(CourierError::config("max_size must be at least 1"));
        }
        if self.core_size > self.max_size {
            return Err(CourierError::config(format!(
                "core_size {} exceeds max_size {}",
                self.core_size, self.max_size
            )));
        }
        if self.sweep_interval.is_zero() {
            return Err(CourierError::config("sweep_interval must be non-zero"));
        }
        Ok(ClusterConfig {
            allocator: self.allocator,
            expiry: self
                .expiry
                .unwrap_or_else(|| Arc::new(TimeoutSinceLastUse::default())),
            core_size: self.core_size,
            max_size: self.max_size,
            sweep_interval: self.sweep_interval,
            close_grace: self.close_grace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_common::CourierResult;

    struct NoopAllocator;

    #[async_trait::async_trait]
    impl TransportAllocator for NoopAllocator {
        type Descriptor = String;
        type Transport = ();

        async fn allocate(&self, _descriptor: &String) -> CourierResult<()> {
            Ok(())
        }

        async fn validate(&self, _transport: &mut ()) -> bool {
            true
        }

        async fn deallocate(&self, _transport: ()) {}
    }

    #[test]
    fn test_defaults() {
        let config = ClusterConfig::builder(NoopAllocator).build().unwrap();
        assert_eq!(config.core_size(), 0);
        assert_eq!(config.max_size(), 4);
        assert_eq!(config.sweep_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = ClusterConfig::builder(NoopAllocator)
            .core_size(2)
            .max_size(8)
            .sweep_interval(Duration::from_millis(500))
            .close_grace(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(config.core_size(), 2);
        assert_eq!(config.max_size(), 8);
        assert_eq!(config.sweep_interval(), Duration::from_millis(500));
        assert_eq!(config.close_grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_zero_max() {
        let err = ClusterConfig::builder(NoopAllocator)
            .max_size(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("max_size"));
    }

    #[test]
    fn test_rejects_core_above_max() {
        let err = ClusterConfig::builder(NoopAllocator)
            .core_size(5)
            .max_size(4)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("core_size"));
    }

    #[test]
    fn test_rejects_zero_sweep_interval() {
        let err = ClusterConfig::builder(NoopAllocator)
            .sweep_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("sweep_interval"));
    }
}
