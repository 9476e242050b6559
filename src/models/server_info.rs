use semver::Version as Semver;
use serde::{Deserialize, Serialize};

/// Response of the server root endpoint (`GET /`).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerInfo {
    #[serde(rename = "name")]
    hostname: String,
    #[serde(rename = "cluster_name")]
    name: String,
    #[serde(rename = "cluster_uuid")]
    uuid: Option<String>,
    version: Version,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Version {
    number: String,
    #[serde(default)]
    lucene_version: Option<String>,
}

impl ServerInfo {
    pub fn get_hostname(&self) -> &str {
        &self.hostname
    }
    pub fn get_name(&self) -> &str {
        &self.name
    }
    pub fn get_uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }
    pub fn get_version(&self) -> &str {
        &self.version.number
    }
    pub fn get_lucene_version(&self) -> Option<&str> {
        self.version.lucene_version.as_deref()
    }

    /// Major version, when the reported number parses as semver.
    pub fn get_version_major(&self) -> Option<u64> {
        Semver::parse(&self.version.number).ok().map(|v| v.major)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_root_endpoint_response() {
        let raw = r#"{
            "name": "node-1",
            "cluster_name": "docs-cluster",
            "cluster_uuid": "abc123",
            "version": {"number": "8.12.0", "lucene_version": "9.9.1"}
        }"#;
        let info: ServerInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.get_hostname(), "node-1");
        assert_eq!(info.get_name(), "docs-cluster");
        assert_eq!(info.get_version(), "8.12.0");
        assert_eq!(info.get_version_major(), Some(8));
    }

    #[test]
    fn unparseable_version_yields_no_major() {
        let raw = r#"{
            "name": "n",
            "cluster_name": "c",
            "cluster_uuid": null,
            "version": {"number": "not-a-version"}
        }"#;
        let info: ServerInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.get_version_major(), None);
    }
}
