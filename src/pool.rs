use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::metrics;
use crate::{Result, SplicerError};

struct HostPool {
    addrs: Mutex<VecDeque<String>>,
    permits: Arc<Semaphore>,
}

impl HostPool {
    fn new() -> Self {
        Self {
            addrs: Mutex::new(VecDeque::new()),
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    fn push(&self, addr: String) {
        self.addrs.lock().push_back(addr);
        self.permits.add_permits(1);
    }
}

/// Backend addresses grouped by the host they run on. An address may be
/// registered several times to model several processes behind one port.
#[derive(Default)]
pub struct BackendPool {
    hosts: RwLock<BTreeMap<String, Arc<HostPool>>>,
    next_fallback: AtomicUsize,
}

impl BackendPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every configured host for every port in
    /// `[tsd_start_port, tsd_end_port)`, `tsd_queries_per_port` times.
    pub fn from_config(config: &Config) -> Self {
        let pool = Self::new();
        if !config.tsd_connect_enabled {
            info!("Backend connections disabled, no pools registered");
            return pool;
        }

        for host in &config.tsd_hosts {
            for port in config.tsd_start_port..config.tsd_end_port {
                pool.register(host, &format!("{}:{}", host, port), config.tsd_queries_per_port);
            }
        }
        pool
    }

    pub fn register(&self, host: &str, addr: &str, copies: usize) {
        let pool = self
            .hosts
            .write()
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostPool::new()))
            .clone();
        for _ in 0..copies {
            pool.push(addr.to_string());
        }
        info!("Registered {} x {} for host {}", copies, addr, host);
    }

    pub fn hosts(&self) -> Vec<String> {
        self.hosts.read().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.read().is_empty()
    }

    fn pick(&self, host: Option<&str>) -> Result<(String, Arc<HostPool>)> {
        let hosts = self.hosts.read();
        if let Some(name) = host {
            if let Some(pool) = hosts.get(name) {
                return Ok((name.to_string(), pool.clone()));
            }
        }

        if hosts.is_empty() {
            return Err(SplicerError::Routing("No backend pools registered".to_string()));
        }

        let index = self.next_fallback.fetch_add(1, Ordering::Relaxed) % hosts.len();
        let (name, pool) = hosts
            .iter()
            .nth(index)
            .ok_or_else(|| SplicerError::Internal("Host index out of range".to_string()))?;
        warn!(
            "No backend pool for host {:?}, falling back to {}",
            host, name
        );
        metrics::record_host_fallback();
        Ok((name.clone(), pool.clone()))
    }

    /// Waits up to `timeout` for a free address on `host`, or on some other
    /// registered host when `host` is unknown. The address goes back to
    /// the pool when the lease is dropped.
    pub async fn acquire(&self, host: Option<&str>, timeout: Duration) -> Result<BackendLease> {
        let (name, pool) = self.pick(host)?;

        let permit = tokio::time::timeout(timeout, pool.permits.clone().acquire_owned())
            .await
            .map_err(|_| {
                SplicerError::Routing(format!(
                    "Timed out after {:?} waiting for a backend on {}",
                    timeout, name
                ))
            })?
            .map_err(|e| SplicerError::Internal(format!("Backend pool closed: {}", e)))?;

        let addr = pool
            .addrs
            .lock()
            .pop_front()
            .ok_or_else(|| SplicerError::Internal(format!("No address left on {}", name)))?;
        debug!("Acquired {} on {}", addr, name);

        Ok(BackendLease {
            host: name,
            addr: Some(addr),
            pool,
            _permit: permit,
        })
    }
}

/// A borrowed backend address.
pub struct BackendLease {
    host: String,
    addr: Option<String>,
    pool: Arc<HostPool>,
    _permit: OwnedSemaphorePermit,
}

impl BackendLease {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn addr(&self) -> &str {
        self.addr.as_deref().unwrap_or_default()
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        // the permit is released after this runs, so the address is back first
        if let Some(addr) = self.addr.take() {
            debug!("Released {} on {}", addr, self.host);
            self.pool.addrs.lock().push_back(addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_no_pools_fails_fast() {
        let pool = BackendPool::new();
        let err = pool.acquire(Some("tsd1"), WAIT).await.err().unwrap();
        assert!(matches!(err, SplicerError::Routing(_)));
    }

    #[tokio::test]
    async fn test_release_on_drop() {
        let pool = BackendPool::new();
        pool.register("tsd1", "tsd1:4242", 1);

        let lease = pool.acquire(Some("tsd1"), WAIT).await.unwrap();
        assert_eq!(lease.addr(), "tsd1:4242");
        assert!(pool.acquire(Some("tsd1"), WAIT).await.is_err());

        drop(lease);
        let again = pool.acquire(Some("tsd1"), WAIT).await.unwrap();
        assert_eq!(again.host(), "tsd1");
    }

    #[tokio::test]
    async fn test_fallback_to_registered_host() {
        let pool = BackendPool::new();
        pool.register("tsd1", "tsd1:4242", 1);

        let lease = pool.acquire(Some("unknown"), WAIT).await.unwrap();
        assert_eq!(lease.host(), "tsd1");
        let lease2 = pool.acquire(None, WAIT);
        // tsd1 is busy
        assert!(lease2.await.is_err());
    }

    #[tokio::test]
    async fn test_copies_allow_parallel_leases() {
        let pool = BackendPool::new();
        pool.register("tsd1", "tsd1:4242", 2);

        let a = pool.acquire(Some("tsd1"), WAIT).await.unwrap();
        let b = pool.acquire(Some("tsd1"), WAIT).await.unwrap();
        assert_eq!(a.addr(), b.addr());
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let pool = Arc::new(BackendPool::new());
        pool.register("tsd1", "tsd1:4242", 1);
        let lease = pool.acquire(Some("tsd1"), WAIT).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.acquire(Some("tsd1"), Duration::from_secs(5))
                    .await
                    .map(|l| l.addr().to_string())
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(lease);
        assert_eq!(waiter.await.unwrap().unwrap(), "tsd1:4242");
    }

    #[test]
    fn test_from_config_registers_port_range() {
        let config = Config {
            tsd_hosts: vec!["a".into(), "b".into()],
            tsd_start_port: 4242,
            tsd_end_port: 4245,
            ..Config::default()
        };
        let pool = BackendPool::from_config(&config);
        assert_eq!(pool.hosts(), vec!["a".to_string(), "b".to_string()]);

        let disabled = BackendPool::from_config(&Config {
            tsd_connect_enabled: false,
            ..config
        });
        assert!(disabled.is_empty());
    }
}
