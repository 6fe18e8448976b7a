//! Location reporters, the HTTP boundary of the publish pipeline

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use super::types::{Envelope, LocationUpdate};
use crate::config::{DeliveryConfig, RoleProfile};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("backend rejected update: {message}")]
    Rejected { message: String },
}

/// One backend endpoint that accepts location updates.
#[async_trait]
pub trait LocationReporter: Send + Sync + 'static {
    async fn report(&self, update: &LocationUpdate) -> Result<(), DeliveryError>;

    /// Human-readable endpoint for logs.
    fn endpoint(&self) -> &str;
}

/// Reporter that POSTs JSON to `{base_url}{path}`.
#[derive(Clone)]
pub struct HttpReporter {
    http: reqwest::Client,
    url: String,
}

impl HttpReporter {
    pub fn new(base_url: &str, path: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, base_url, path))
    }

    /// Share one connection pool between several endpoints.
    pub fn with_client(http: reqwest::Client, base_url: &str, path: &str) -> Self {
        Self {
            http,
            url: format!("{}{}", base_url.trim_end_matches('/'), path),
        }
    }

    /// Primary and fallback reporters for a role.
    pub fn pair(config: &DeliveryConfig, profile: &RoleProfile) -> Result<(Self, Self), DeliveryError> {
        let http = reqwest::Client::builder().timeout(config.timeout()).build()?;
        Ok((
            Self::with_client(http.clone(), &config.base_url, &profile.primary_path),
            Self::with_client(http, &config.base_url, &profile.fallback_path),
        ))
    }
}

#[async_trait]
impl LocationReporter for HttpReporter {
    async fn report(&self, update: &LocationUpdate) -> Result<(), DeliveryError> {
        let resp = self.http.post(&self.url).json(update).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status));
        }

        let envelope: Envelope = resp.json().await?;
        if envelope.success {
            Ok(())
        } else {
            Err(DeliveryError::Rejected {
                message: envelope.message.unwrap_or_else(|| "no message".to_string()),
            })
        }
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join() {
        let reporter = HttpReporter::new("http://localhost:9000/", "/api/location/update", Duration::from_secs(1))
            .unwrap();
        assert_eq!(reporter.endpoint(), "http://localhost:9000/api/location/update");
    }

    #[test]
    fn test_pair_uses_role_paths() {
        let (primary, fallback) = HttpReporter::pair(&DeliveryConfig::default(), &RoleProfile::delivery()).unwrap();
        assert!(primary.endpoint().ends_with("/api/delivery/location"));
        assert!(fallback.endpoint().ends_with("/api/location/update"));
    }
}
