use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Transport(String),

    #[error("provider request timed out")]
    Timeout,

    #[error("provider returned status {0}")]
    Status(u16),

    #[error("provider returned a malformed body")]
    Malformed,
}

/// Geolocation data for a single address. Either field may be absent even on
/// a successful lookup.
#[derive(Debug, Clone, Default)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub city: Option<String>,
}

/// External geolocation source. The resolver only ever talks to this trait,
/// so tests substitute a canned implementation.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn lookup(&self, address: IpAddr) -> Result<GeoInfo, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    country_name: Option<String>,
    city: Option<String>,
}

/// HTTPS JSON provider: `GET <base_url>/<address>/json/`, expecting at least
/// `country_name` and `city` on success.
pub struct HttpGeoProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGeoProvider {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn lookup_url(&self, address: IpAddr) -> String {
        format!("{}/{}/json/", self.base_url, address)
    }
}

#[async_trait]
impl GeoProvider for HttpGeoProvider {
    async fn lookup(&self, address: IpAddr) -> Result<GeoInfo, ProviderError> {
        let resp = self
            .client
            .get(self.lookup_url(address))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body: ProviderResponse = resp.json().await.map_err(|_| ProviderError::Malformed)?;
        Ok(GeoInfo {
            country: body.country_name,
            city: body.city,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_url_shape() {
        let provider =
            HttpGeoProvider::new("https://ipapi.co/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            provider.lookup_url("1.2.3.4".parse().unwrap()),
            "https://ipapi.co/1.2.3.4/json/"
        );
    }
}
