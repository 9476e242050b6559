//! Transport layer: one Elasticsearch endpoint behind a reqwest client,
//! with retry/backoff for bulk submissions.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Certificate, Client, ClientBuilder, RequestBuilder};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt; // for read_to_end()
use tokio::sync::Mutex;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

use crate::audit::{AuditBuilder, What};
use crate::conf::Endpoint;
use crate::models::bulk::BulkResponse;
use crate::models::server_info::ServerInfo;

/// Oldest server major version the bulk wire format is known to work with.
pub const MIN_SUPPORTED_MAJOR: u64 = 7;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered the whole request with a non-success status.
    #[error("server responded with status {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("failed to read root certificate: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn is_retryable(&self, retry_on_status: &[u16]) -> bool {
        match self {
            TransportError::Request(err) => err.is_timeout() || err.is_connect(),
            TransportError::Status { status, .. } => retry_on_status.contains(status),
            TransportError::Io(_) => false,
        }
    }
}

/// Retry behavior for bulk submissions. Backoff is exponential (doubling
/// from `backoff`) with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub retry_on_status: Vec<u16>,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_on_status: vec![429, 502, 503, 504],
            backoff: Duration::from_millis(100),
        }
    }
}

fn inject_auth(request_builder: RequestBuilder, endpoint: &Endpoint) -> RequestBuilder {
    if endpoint.has_basic_auth() {
        request_builder.basic_auth(endpoint.get_username(), endpoint.get_password())
    } else {
        request_builder
    }
}

pub struct EsClient {
    endpoint: Endpoint,
    http_client: Client,
    retry: RetryPolicy,
    audit: Option<Mutex<AuditBuilder>>,
}

impl EsClient {
    pub fn new(endpoint: Endpoint, http_client: Client) -> Self {
        Self {
            endpoint,
            http_client,
            retry: RetryPolicy::default(),
            audit: None,
        }
    }

    /// Builds the HTTP client for `endpoint`, loading any configured root
    /// CA certificates from disk.
    pub async fn connect(endpoint: Endpoint) -> Result<Self, TransportError> {
        let mut builder = ClientBuilder::new();
        for cert_path in endpoint.get_root_certificates() {
            let mut file = File::open(cert_path).await?;
            let mut pem = Vec::new();
            file.read_to_end(&mut pem).await?;
            builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
        }
        let http_client = builder.build()?;
        Ok(Self::new(endpoint, http_client))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn with_audit(mut self, file_name: &str) -> Self {
        self.audit = Some(Mutex::new(AuditBuilder::new(file_name).await));
        self
    }

    pub fn get_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn audit(&self, what: What, data: &str) {
        if let Some(audit) = &self.audit {
            let mut audit = audit.lock().await;
            if let Err(err) = audit.append(what, data).await {
                warn!("Failed to append audit record: {}", err);
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let mut request_builder = self
            .http_client
            .get(format!("{}{}", self.endpoint.get_url(), path));
        request_builder = inject_auth(request_builder, &self.endpoint);

        let response = request_builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                reason,
            });
        }
        Ok(response.json::<T>().await?)
    }

    pub async fn server_info(&self) -> Result<ServerInfo, TransportError> {
        self.audit(What::ServerInfoRequest, self.endpoint.get_url())
            .await;
        self.get_json("/").await
    }

    /// Logs cluster identity and warns when the server looks too old for
    /// the bulk wire format this crate speaks.
    pub async fn log_server_info(&self, prefix: &str) -> Result<(), TransportError> {
        let server_info = self.server_info().await?;
        info!(
            "{}: hostname={}, name={}, uuid={}, version={}, lucene={}",
            prefix,
            server_info.get_hostname(),
            server_info.get_name(),
            server_info.get_uuid().unwrap_or("-"),
            server_info.get_version(),
            server_info.get_lucene_version().unwrap_or("-"),
        );
        match server_info.get_version_major() {
            Some(major) if major < MIN_SUPPORTED_MAJOR => {
                warn!(
                    "{}: server major version {} is below the supported minimum {}",
                    prefix, major, MIN_SUPPORTED_MAJOR
                );
            }
            None => warn!(
                "{}: could not parse server version '{}'",
                prefix,
                server_info.get_version()
            ),
            _ => {}
        }
        Ok(())
    }

    /// Submits one encoded bulk payload, retrying per the configured policy
    /// before surfacing an error.
    pub async fn bulk(&self, payload: Vec<u8>) -> Result<BulkResponse, TransportError> {
        let url = format!("{}/_bulk", self.endpoint.get_url());
        self.audit(What::BulkRequest, &format!("bytes={}", payload.len()))
            .await;

        let backoff_ms = self.retry.backoff.as_millis() as u64;
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(backoff_ms / 2)
            .map(jitter)
            .take(self.retry.max_retries);

        let result = RetryIf::spawn(
            strategy,
            || self.execute_bulk(&url, payload.clone()),
            |err: &TransportError| {
                let retry = err.is_retryable(&self.retry.retry_on_status);
                if retry {
                    debug!("Retrying bulk request after error: {}", err);
                }
                retry
            },
        )
        .await;

        match &result {
            Ok(response) => {
                self.audit(
                    What::BulkResponseOk,
                    &format!(
                        "took={} errors={} items={}",
                        response.took,
                        response.errors,
                        response.items.len()
                    ),
                )
                .await;
            }
            Err(err) => {
                self.audit(What::BulkResponseErr, &err.to_string()).await;
            }
        }
        result
    }

    async fn execute_bulk(&self, url: &str, payload: Vec<u8>) -> Result<BulkResponse, TransportError> {
        let mut request_builder = self
            .http_client
            .post(url)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(payload);
        request_builder = inject_auth(request_builder, &self.endpoint);

        let response = request_builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                reason,
            });
        }
        Ok(response.json::<BulkResponse>().await?)
    }
}

impl std::fmt::Debug for EsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EsClient")
            .field("endpoint", &self.endpoint)
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_follow_the_retry_list() {
        let policy = RetryPolicy::default();
        let retryable = TransportError::Status {
            status: 503,
            reason: String::new(),
        };
        let fatal = TransportError::Status {
            status: 400,
            reason: "mapping error".into(),
        };
        assert!(retryable.is_retryable(&policy.retry_on_status));
        assert!(!fatal.is_retryable(&policy.retry_on_status));
    }

    #[test]
    fn io_errors_are_never_retried() {
        let err = TransportError::Io(std::io::Error::other("boom"));
        assert!(!err.is_retryable(&[429, 502, 503, 504]));
    }

    #[test]
    fn default_policy_matches_documented_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.retry_on_status, vec![429, 502, 503, 504]);
        assert_eq!(policy.backoff, Duration::from_millis(100));
    }
}
