//! Registry of pools keyed by connection configuration.

use std::fmt;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::ConnectionFactory;
use crate::physical::ConnectOptions;
use crate::pool::Pool;

/// Identifies one pool within a [`PoolGroup`].
///
/// Connections are only shared between requests with equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    /// Server spec the connections go to.
    pub server_spec: String,
    /// Login the connections are authenticated as, if any.
    pub user: Option<String>,
    /// Whether connections use TLS.
    pub encrypted: bool,
    /// Whether connections use MARS.
    pub multiplexing: bool,
}

impl PoolKey {
    /// Key for plain connections to `server_spec`.
    pub fn new(server_spec: impl Into<String>) -> Self {
        Self {
            server_spec: server_spec.into(),
            user: None,
            encrypted: false,
            multiplexing: false,
        }
    }

    /// Set the login.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

impl From<&ConnectOptions> for PoolKey {
    fn from(options: &ConnectOptions) -> Self {
        Self {
            server_spec: options.server_spec.clone(),
            user: None,
            encrypted: options.tls.is_some(),
            multiplexing: options.multiplexing,
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.server_spec)?;
        if let Some(user) = &self.user {
            write!(f, ";user={user}")?;
        }
        write!(
            f,
            ";encrypt={};mars={}",
            self.encrypted, self.multiplexing
        )
    }
}

/// Owns one [`Pool`] per [`PoolKey`].
pub struct PoolGroup<F: ConnectionFactory> {
    pools: Mutex<HashMap<PoolKey, Pool<F>>>,
}

impl<F: ConnectionFactory> PoolGroup<F> {
    /// Create an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Get the running pool for `key`, creating and starting it if needed.
    ///
    /// `factory` is only called when a new pool is created. A pool that was
    /// shut down is replaced.
    pub fn get_or_create(
        &self,
        key: &PoolKey,
        config: &PoolConfig,
        factory: impl FnOnce() -> F,
    ) -> Result<Pool<F>, PoolError> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(key) {
            if pool.is_running() {
                return Ok(pool.clone());
            }
        }

        let pool = Pool::new(config.clone(), factory())?;
        pool.startup();
        tracing::debug!(key = %key, "pool created");
        pools.insert(key.clone(), pool.clone());
        Ok(pool)
    }

    /// The pool for `key`, if one exists.
    #[must_use]
    pub fn get(&self, key: &PoolKey) -> Option<Pool<F>> {
        self.pools.lock().get(key).cloned()
    }

    /// Clear the pool for `key`. Returns whether a pool was found.
    pub async fn clear(&self, key: &PoolKey) -> bool {
        let pool = self.get(key);
        match pool {
            Some(pool) => {
                pool.clear().await;
                true
            }
            None => false,
        }
    }

    /// Clear every pool.
    pub async fn clear_all(&self) {
        for pool in self.snapshot() {
            pool.clear().await;
        }
    }

    /// Shut down and forget the pool for `key`.
    pub async fn remove(&self, key: &PoolKey) -> bool {
        let removed = self.pools.lock().remove(key);
        match removed {
            Some(pool) => {
                pool.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Shut down and forget every pool.
    pub async fn shutdown_all(&self) {
        let pools: Vec<_> = self.pools.lock().drain().map(|(_, pool)| pool).collect();
        for pool in pools {
            pool.shutdown().await;
        }
    }

    /// Number of pools in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.lock().len()
    }

    /// Whether the group holds no pools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.lock().is_empty()
    }

    fn snapshot(&self) -> Vec<Pool<F>> {
        self.pools.lock().values().cloned().collect()
    }
}

impl<F: ConnectionFactory> Default for PoolGroup<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ConnectionFactory> fmt::Debug for PoolGroup<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolGroup")
            .field("pools", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use hashbrown::HashSet;
    use sni_tls::TlsConfig;

    #[test]
    fn test_pool_key_equality() {
        let a = PoolKey::new("tcp:db,1433").with_user("app");
        let b = PoolKey::new("tcp:db,1433").with_user("app");
        let c = PoolKey::new("tcp:db,1433").with_user("report");

        let keys: HashSet<_> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&a));
    }

    #[test]
    fn test_pool_key_from_options() {
        let options = ConnectOptions::new("db,1433")
            .tls(TlsConfig::new())
            .multiplexing(true);
        let key = PoolKey::from(&options);
        assert!(key.encrypted);
        assert!(key.multiplexing);
        assert_eq!(key.to_string(), "db,1433;encrypt=true;mars=true");
        assert_ne!(key, PoolKey::new("db,1433"));
    }
}
