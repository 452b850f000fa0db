use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error};

use crate::geo::lookup::GeoResolver;
use crate::models::request::RequestContext;
use crate::storage::{GovernanceStore, NewLogEntry};

/// Post-handler stage: persists one immutable log entry per allowed request.
///
/// Best-effort relative to the user-visible response. The gateway spawns
/// this off the response path, and a store failure is logged and dropped.
pub struct RequestRecorder {
    store: Arc<dyn GovernanceStore>,
    geo: Arc<GeoResolver>,
}

impl RequestRecorder {
    pub fn new(store: Arc<dyn GovernanceStore>, geo: Arc<GeoResolver>) -> Self {
        Self { store, geo }
    }

    pub async fn record(&self, ctx: &RequestContext) {
        // Non-routable sources can't be geolocated; skip the resolver
        // outright rather than relying on its private-range policy.
        let (country, city) = if ctx.routable {
            self.geo.resolve(ctx.address).await
        } else {
            (None, None)
        };

        let entry = NewLogEntry {
            ip_address: ctx.address.to_string(),
            timestamp: Utc::now(),
            path: ctx.path.clone(),
            method: ctx.method.clone(),
            country,
            city,
            user_agent: ctx.user_agent.clone(),
        };

        match self.store.insert_request_log(&entry) {
            Ok(_) => {
                debug!(address = %ctx.address, path = %ctx.path, "Request logged");
            }
            Err(err) => {
                error!(address = %ctx.address, path = %ctx.path, error = %err, "Failed to log request");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::provider::{GeoInfo, GeoProvider, ProviderError};
    use crate::storage::sqlite::SqliteStore;
    use crate::storage::RequestLogQuery;
    use async_trait::async_trait;
    use std::net::IpAddr;
    use std::time::Duration;

    struct StaticProvider;

    #[async_trait]
    impl GeoProvider for StaticProvider {
        async fn lookup(&self, _address: IpAddr) -> Result<GeoInfo, ProviderError> {
            Ok(GeoInfo {
                country: Some("France".to_string()),
                city: Some("Paris".to_string()),
            })
        }
    }

    #[tokio::test]
    async fn records_one_enriched_entry() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let geo = Arc::new(GeoResolver::new(
            Arc::new(StaticProvider),
            Duration::from_secs(60),
        ));
        let recorder = RequestRecorder::new(store.clone(), geo);

        let mut ctx = RequestContext::new(
            "8.8.8.8".parse().unwrap(),
            true,
            "POST".to_string(),
            "/submit".to_string(),
        );
        ctx.user_agent = Some("curl/8.0".to_string());

        recorder.record(&ctx).await;

        let rows = store.query_request_log(&RequestLogQuery::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ip_address, "8.8.8.8");
        assert_eq!(rows[0].method, "POST");
        assert_eq!(rows[0].country.as_deref(), Some("France"));
        assert_eq!(rows[0].city.as_deref(), Some("Paris"));
        assert_eq!(rows[0].user_agent.as_deref(), Some("curl/8.0"));
    }

    #[tokio::test]
    async fn loopback_requests_are_logged_without_geo() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let geo = Arc::new(GeoResolver::new(
            Arc::new(StaticProvider),
            Duration::from_secs(60),
        ));
        let recorder = RequestRecorder::new(store.clone(), geo);

        let ctx = RequestContext::new(
            "127.0.0.1".parse().unwrap(),
            false,
            "GET".to_string(),
            "/".to_string(),
        );
        recorder.record(&ctx).await;

        let rows = store.query_request_log(&RequestLogQuery::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].country, None);
        assert_eq!(rows[0].city, None);
    }
}
