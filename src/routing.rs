use async_trait::async_trait;

use crate::partitioning::{get_partition, shard_key};
use crate::Result;

/// Maps a metric and window onto the host colocated with its data.
///
/// `Ok(None)` means the lookup had no answer; the caller falls back to
/// any backend. `Err` fails the query.
#[async_trait]
pub trait LocalityResolver: Send + Sync {
    async fn resolve_host(
        &self,
        metric_key: &[u8],
        start_secs: i64,
        end_secs: i64,
    ) -> Result<Option<String>>;
}

/// Hashes the shard key of the window start onto a fixed host list.
#[derive(Debug, Clone, Default)]
pub struct HashLocalityResolver {
    hosts: Vec<String>,
}

impl HashLocalityResolver {
    pub fn new(hosts: Vec<String>) -> Self {
        Self { hosts }
    }
}

#[async_trait]
impl LocalityResolver for HashLocalityResolver {
    async fn resolve_host(
        &self,
        metric_key: &[u8],
        start_secs: i64,
        _end_secs: i64,
    ) -> Result<Option<String>> {
        if self.hosts.is_empty() {
            return Ok(None);
        }
        let key = shard_key(metric_key, start_secs);
        let partition = get_partition(&key[..], self.hosts.len());
        Ok(self.hosts.get(partition).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_hosts_resolves_nothing() {
        let resolver = HashLocalityResolver::default();
        assert_eq!(resolver.resolve_host(b"sys.cpu", 0, 3600).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_resolution_is_stable_within_bucket() {
        let resolver = HashLocalityResolver::new(vec!["rs1".into(), "rs2".into(), "rs3".into()]);
        let a = resolver.resolve_host(b"sys.cpu", 3600, 7200).await.unwrap();
        let b = resolver.resolve_host(b"sys.cpu", 3700, 7200).await.unwrap();
        assert!(a.is_some());
        assert_eq!(a, b);
    }
}
