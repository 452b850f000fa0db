use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use super::is_private_address;
use super::provider::GeoProvider;

#[derive(Debug, Clone)]
struct CachedGeo {
    country: Option<String>,
    city: Option<String>,
    expires_at: Instant,
}

/// Memoizing geolocation resolver.
///
/// Successful provider responses are cached for a long TTL (24 h by
/// default), absent fields included. Failures are not cached, so the next
/// request for the same address retries the provider. Private and loopback
/// addresses never reach the provider and never occupy a cache slot.
pub struct GeoResolver {
    provider: Arc<dyn GeoProvider>,
    cache: DashMap<IpAddr, CachedGeo>,
    ttl: Duration,
}

impl GeoResolver {
    pub fn new(provider: Arc<dyn GeoProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Resolve (country, city) for an address. Never fails: any provider
    /// problem degrades to (None, None) after a warn log.
    pub async fn resolve(&self, address: IpAddr) -> (Option<String>, Option<String>) {
        if is_private_address(&address) {
            return (None, None);
        }

        if let Some(entry) = self.cache.get(&address) {
            if Instant::now() < entry.expires_at {
                return (entry.country.clone(), entry.city.clone());
            }
        }

        match self.provider.lookup(address).await {
            Ok(info) => {
                self.cache.insert(
                    address,
                    CachedGeo {
                        country: info.country.clone(),
                        city: info.city.clone(),
                        expires_at: Instant::now() + self.ttl,
                    },
                );
                debug!(address = %address, country = ?info.country, "Geolocation resolved");
                (info.country, info.city)
            }
            Err(err) => {
                warn!(address = %address, error = %err, "Geolocation lookup failed");
                (None, None)
            }
        }
    }

    /// Evict expired entries. Driven by the periodic cleanup loop.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.cache.retain(|_, entry| now < entry.expires_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::provider::{GeoInfo, ProviderError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CannedProvider {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl GeoProvider for CannedProvider {
        async fn lookup(&self, _address: IpAddr) -> Result<GeoInfo, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Status(429));
            }
            Ok(GeoInfo {
                country: Some("Iceland".to_string()),
                city: Some("Reykjavik".to_string()),
            })
        }
    }

    #[tokio::test]
    async fn private_addresses_skip_the_provider() {
        let provider = Arc::new(CannedProvider::new(false));
        let resolver = GeoResolver::new(provider.clone(), Duration::from_secs(60));

        for addr in ["127.0.0.1", "::1", "10.0.0.1", "192.168.1.50"] {
            let result = resolver.resolve(addr.parse().unwrap()).await;
            assert_eq!(result, (None, None));
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn public_lookups_are_cached() {
        let provider = Arc::new(CannedProvider::new(false));
        let resolver = GeoResolver::new(provider.clone(), Duration::from_secs(60));
        let addr: IpAddr = "8.8.8.8".parse().unwrap();

        let first = resolver.resolve(addr).await;
        let second = resolver.resolve(addr).await;
        assert_eq!(first.0.as_deref(), Some("Iceland"));
        assert_eq!(second.1.as_deref(), Some("Reykjavik"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_degrade_and_are_not_cached() {
        let provider = Arc::new(CannedProvider::new(true));
        let resolver = GeoResolver::new(provider.clone(), Duration::from_secs(60));
        let addr: IpAddr = "8.8.8.8".parse().unwrap();

        assert_eq!(resolver.resolve(addr).await, (None, None));
        assert_eq!(resolver.resolve(addr).await, (None, None));
        // No cache entry for failures: both calls hit the provider.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
