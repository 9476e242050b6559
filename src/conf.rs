use twelf::config;
use twelf::reexports::serde::{Deserialize, Serialize};

/// Layered configuration file for the `es-bulk-load` binary.
#[config]
#[derive(Debug, Default)]
pub struct Config {
    endpoints: Vec<Endpoint>,
    #[serde(default)]
    bulk: BulkSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Endpoint {
    name: String,
    url: String,
    #[serde(default)]
    basic_auth: Option<BasicAuth>,
    #[serde(default)]
    root_certificates: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BasicAuth {
    username: String,
    #[serde(default)]
    password: Option<String>,
}

/// File-level defaults for the indexer; command-line flags override them.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct BulkSettings {
    #[serde(default)]
    index: Option<String>,
    #[serde(default)]
    num_workers: Option<usize>,
    #[serde(default)]
    flush_bytes: Option<usize>,
    #[serde(default)]
    flush_interval_ms: Option<u64>,
    #[serde(default)]
    retry: RetrySettings,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct RetrySettings {
    #[serde(default)]
    max_retries: Option<usize>,
    #[serde(default)]
    retry_on_status: Option<Vec<u16>>,
    #[serde(default)]
    backoff_ms: Option<u64>,
}

impl Config {
    pub fn get_endpoints(&self) -> &Vec<Endpoint> {
        &self.endpoints
    }
    pub fn get_bulk(&self) -> &BulkSettings {
        &self.bulk
    }
}

impl Endpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into().trim_end_matches('/').to_string(),
            basic_auth: None,
            root_certificates: Vec::new(),
        }
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.basic_auth = Some(BasicAuth {
            username: username.into(),
            password,
        });
        self
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }
    pub fn get_url(&self) -> &str {
        &self.url
    }
    pub fn get_root_certificates(&self) -> &Vec<String> {
        &self.root_certificates
    }
    pub fn has_basic_auth(&self) -> bool {
        self.basic_auth.is_some()
    }
    pub fn get_username(&self) -> String {
        match &self.basic_auth {
            Some(auth) => auth.get_username().to_string(),
            None => String::default(),
        }
    }
    pub fn get_password(&self) -> Option<String> {
        self.basic_auth.as_ref().and_then(|auth| auth.get_password().clone())
    }
}

impl BasicAuth {
    pub fn get_username(&self) -> &str {
        &self.username
    }
    pub fn get_password(&self) -> &Option<String> {
        &self.password
    }
}

impl BulkSettings {
    pub fn get_index(&self) -> &Option<String> {
        &self.index
    }
    pub fn get_num_workers(&self) -> Option<usize> {
        self.num_workers
    }
    pub fn get_flush_bytes(&self) -> Option<usize> {
        self.flush_bytes
    }
    pub fn get_flush_interval_ms(&self) -> Option<u64> {
        self.flush_interval_ms
    }
    pub fn get_retry(&self) -> &RetrySettings {
        &self.retry
    }
}

impl RetrySettings {
    pub fn get_max_retries(&self) -> Option<usize> {
        self.max_retries
    }
    pub fn get_retry_on_status(&self) -> &Option<Vec<u16>> {
        &self.retry_on_status
    }
    pub fn get_backoff_ms(&self) -> Option<u64> {
        self.backoff_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_deserializes_with_optional_auth() {
        let raw = r#"{
            "name": "dst",
            "url": "https://es.example.com:9200",
            "basic_auth": {"username": "elastic", "password": "changeme"},
            "root_certificates": ["/etc/ssl/es-ca.pem"]
        }"#;
        let endpoint: Endpoint = serde_json::from_str(raw).unwrap();
        assert_eq!(endpoint.get_name(), "dst");
        assert!(endpoint.has_basic_auth());
        assert_eq!(endpoint.get_username(), "elastic");
        assert_eq!(endpoint.get_password().as_deref(), Some("changeme"));
        assert_eq!(endpoint.get_root_certificates().len(), 1);
    }

    #[test]
    fn endpoint_without_auth_has_no_credentials() {
        let raw = r#"{"name": "dst", "url": "http://localhost:9200"}"#;
        let endpoint: Endpoint = serde_json::from_str(raw).unwrap();
        assert!(!endpoint.has_basic_auth());
        assert_eq!(endpoint.get_password(), None);
    }

    #[test]
    fn constructor_strips_trailing_slash() {
        let endpoint = Endpoint::new("test", "http://localhost:9200/");
        assert_eq!(endpoint.get_url(), "http://localhost:9200");
    }

    #[test]
    fn bulk_settings_default_to_empty() {
        let settings: BulkSettings = serde_json::from_str("{}").unwrap();
        assert!(settings.get_index().is_none());
        assert!(settings.get_retry().get_max_retries().is_none());
    }
}
