use std::sync::Arc;

use crate::cache::{MemoryCache, NoopCache, ReadThroughCache};
use crate::config::Config;
use crate::pool::BackendPool;
use crate::routing::{HashLocalityResolver, LocalityResolver};
use crate::transport::{BackendTransport, HttpTransport};
use crate::Result;

/// Collaborators shared by every query, built once at startup.
#[derive(Clone)]
pub struct Environment {
    pub config: Arc<Config>,
    pub resolver: Arc<dyn LocalityResolver>,
    pub pool: Arc<BackendPool>,
    pub transport: Arc<dyn BackendTransport>,
    pub cache: Arc<dyn ReadThroughCache>,
}

impl Environment {
    pub fn from_config(config: Config) -> Result<Self> {
        let cache: Arc<dyn ReadThroughCache> = if config.cache_enabled {
            Arc::new(MemoryCache::new(config.cache_capacity))
        } else {
            Arc::new(NoopCache)
        };

        Ok(Self {
            resolver: Arc::new(HashLocalityResolver::new(config.region_hosts.clone())),
            pool: Arc::new(BackendPool::from_config(&config)),
            transport: Arc::new(HttpTransport::new(&config)?),
            cache,
            config: Arc::new(config),
        })
    }
}
