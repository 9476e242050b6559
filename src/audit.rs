//! Optional append-only audit trail of bulk traffic.

use chrono::Utc;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};

pub enum What {
    ServerInfoRequest,
    BulkRequest,
    BulkResponseOk,
    BulkResponseErr,
}

impl What {
    pub fn as_str(&self) -> &'static str {
        match self {
            What::ServerInfoRequest => "ServerInfoRequest",
            What::BulkRequest => "BulkRequest",
            What::BulkResponseOk => "BulkResponseOk",
            What::BulkResponseErr => "BulkResponseErr",
        }
    }
}

pub struct AuditBuilder {
    file_handler: Option<File>,
}

impl AuditBuilder {
    /// Opens (or creates) the audit file in append mode. A file that cannot
    /// be opened disables auditing rather than failing the indexer.
    pub async fn new(file_name: &str) -> Self {
        if let Some(parent) = std::path::Path::new(file_name).parent() {
            let _ = fs::create_dir_all(parent).await;
        }

        let file_handler = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_name)
            .await
            .ok();

        Self { file_handler }
    }

    pub async fn append(&mut self, what: What, data: &str) -> std::io::Result<()> {
        if let Some(file) = self.file_handler.as_mut() {
            let line = format!("{} {} {}\n", Utc::now().to_rfc3339(), what.as_str(), data);
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
        }
        Ok(())
    }
}
