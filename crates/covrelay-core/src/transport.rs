//! Byte transport used by HTTP upload targets.
//!
//! A transport sends one archive as a `multipart/form-data` request and
//! reports either the server's status code or a [`TransportError`]. TLS and
//! connection handling stay inside `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::debug;

use crate::error::TransportError;

/// Form field the archive is attached under.
pub const UPLOAD_FORM_FIELD: &str = "file";

const ARCHIVE_MIME: &str = "application/zip";

/// Archive bytes plus the file name announced in the form part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ArchiveUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }
}

/// Status and body returned by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `upload` to `url` as the [`UPLOAD_FORM_FIELD`] file part of a
    /// multipart form.
    async fn send(&self, url: &str, upload: ArchiveUpload)
        -> Result<TransportResponse, TransportError>;
}

/// `reqwest`-backed transport with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("covrelay/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Configuration(e.to_string()))?;
        Ok(Self { client })
    }
}

fn upload_form(upload: ArchiveUpload) -> Result<Form, TransportError> {
    let part = Part::bytes(upload.bytes)
        .file_name(upload.file_name)
        .mime_str(ARCHIVE_MIME)?;
    Ok(Form::new().part(UPLOAD_FORM_FIELD, part))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        url: &str,
        upload: ArchiveUpload,
    ) -> Result<TransportResponse, TransportError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| TransportError::Configuration(format!("invalid upload URL '{url}': {e}")))?;
        debug!(
            "Sending {} ({} bytes) to {}",
            upload.file_name,
            upload.bytes.len(),
            url
        );

        let response = self
            .client
            .post(url)
            .multipart(upload_form(upload)?)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(TransportResponse { status, body })
    }
}
