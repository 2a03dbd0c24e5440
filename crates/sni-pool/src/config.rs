//! Pool configuration.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use crate::error::PoolError;
use crate::identity::{IdentityProvider, NoIdentity};

/// Default maximum number of physical connections per pool.
pub const DEFAULT_MAX_POOL_SIZE: u32 = 100;

/// Default time to wait for a connection, matching the default connect timeout.
pub const DEFAULT_CREATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Default bounds of the randomized replenishment interval.
pub const DEFAULT_CLEANUP_INTERVAL: RangeInclusive<Duration> =
    Duration::from_secs(120)..=Duration::from_secs(240);

/// Configuration for a connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Number of connections the replenishment cycle keeps open.
    pub min_pool_size: u32,

    /// Maximum number of tracked connections. Zero means unbounded.
    pub max_pool_size: u32,

    /// How long a checkout waits for a connection. Zero waits forever.
    pub creation_timeout: Duration,

    /// Bounds of the replenishment timer period. Each pool picks one value
    /// at random so that pools created together do not sweep in lockstep.
    pub cleanup_interval_range: RangeInclusive<Duration>,

    /// Source of the caller identity the pool is bound to.
    pub identity_provider: Arc<dyn IdentityProvider>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: 0,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            creation_timeout: DEFAULT_CREATION_TIMEOUT,
            cleanup_interval_range: DEFAULT_CLEANUP_INTERVAL,
            identity_provider: Arc::new(NoIdentity),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum pool size.
    #[must_use]
    pub fn min_pool_size(mut self, count: u32) -> Self {
        self.min_pool_size = count;
        self
    }

    /// Set the maximum pool size (0 for unbounded).
    #[must_use]
    pub fn max_pool_size(mut self, count: u32) -> Self {
        self.max_pool_size = count;
        self
    }

    /// Set the checkout timeout (zero waits forever).
    #[must_use]
    pub fn creation_timeout(mut self, timeout: Duration) -> Self {
        self.creation_timeout = timeout;
        self
    }

    /// Set the bounds of the replenishment interval.
    #[must_use]
    pub fn cleanup_interval_range(mut self, range: RangeInclusive<Duration>) -> Self {
        self.cleanup_interval_range = range;
        self
    }

    /// Set the identity provider.
    #[must_use]
    pub fn identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = provider;
        self
    }

    /// Whether `count` tracked connections leave room for another.
    pub(crate) fn has_room(&self, count: usize) -> bool {
        self.max_pool_size == 0 || count < self.max_pool_size as usize
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_pool_size != 0 && self.min_pool_size > self.max_pool_size {
            return Err(PoolError::Configuration(
                "min_pool_size cannot be greater than max_pool_size".into(),
            ));
        }
        let (low, high) = (
            *self.cleanup_interval_range.start(),
            *self.cleanup_interval_range.end(),
        );
        if low.is_zero() || low > high {
            return Err(PoolError::Configuration(
                "cleanup_interval_range must be a non-empty range of positive durations".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::identity::PoolIdentity;

    #[derive(Debug)]
    struct Fixed;

    impl IdentityProvider for Fixed {
        fn current(&self) -> PoolIdentity {
            PoolIdentity::user("S-1-5-21-7")
        }
    }

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_pool_size, 0);
        assert_eq!(config.max_pool_size, DEFAULT_MAX_POOL_SIZE);
        assert_eq!(config.creation_timeout, Duration::from_secs(15));
        assert_eq!(
            *config.cleanup_interval_range.start(),
            Duration::from_secs(120)
        );
        assert_eq!(*config.cleanup_interval_range.end(), Duration::from_secs(240));
        assert_eq!(config.identity_provider.current(), PoolIdentity::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder_methods() {
        let config = PoolConfig::new()
            .min_pool_size(2)
            .max_pool_size(5)
            .creation_timeout(Duration::from_secs(3))
            .cleanup_interval_range(Duration::from_secs(1)..=Duration::from_secs(2))
            .identity_provider(Arc::new(Fixed));

        assert_eq!(config.min_pool_size, 2);
        assert_eq!(config.max_pool_size, 5);
        assert_eq!(config.creation_timeout, Duration::from_secs(3));
        assert_eq!(*config.cleanup_interval_range.end(), Duration::from_secs(2));
        assert_eq!(
            config.identity_provider.current(),
            PoolIdentity::user("S-1-5-21-7")
        );
    }

    #[test]
    fn test_config_validation_min_greater_than_max() {
        let result = PoolConfig::new().min_pool_size(20).max_pool_size(10).validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("min_pool_size cannot be greater than max_pool_size")
        );
    }

    #[test]
    fn test_config_unbounded_max() {
        let config = PoolConfig::new().min_pool_size(20).max_pool_size(0);
        assert!(config.validate().is_ok());
        assert!(config.has_room(usize::MAX - 1));
    }

    #[test]
    fn test_config_has_room() {
        let config = PoolConfig::new().max_pool_size(2);
        assert!(config.has_room(1));
        assert!(!config.has_room(2));
    }

    #[test]
    fn test_config_validation_bad_interval() {
        let config = PoolConfig::new()
            .cleanup_interval_range(Duration::from_secs(10)..=Duration::from_secs(5));
        assert!(matches!(config.validate(), Err(PoolError::Configuration(_))));

        let config = PoolConfig::new().cleanup_interval_range(Duration::ZERO..=Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
