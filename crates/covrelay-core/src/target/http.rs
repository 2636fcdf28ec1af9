//! HTTP upload target.
//!
//! Packages the snapshot into a zip archive and POSTs it to the analysis
//! server, addressed by application partition and commit.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::archive::ArchivePackager;
use crate::domain::{Application, CommitDescriptor, CoverageSnapshot, OutcomeKind, UploadOutcome};
use crate::error::TransportError;
use crate::obs;
use crate::target::{TargetFactory, UploadTarget};
use crate::transport::{ArchiveUpload, Transport};

/// Query parameter carrying the application marker.
pub const PARTITION_PARAM: &str = "partition";
/// Query parameter carrying `branch:timestamp`.
pub const COMMIT_PARAM: &str = "t";
/// File name announced for the archive part of the upload form.
pub const UPLOAD_FILE_NAME: &str = "coverage.zip";

pub struct HttpUploadTarget {
    base_url: String,
    application: Application,
    commit: CommitDescriptor,
    packager: ArchivePackager,
    transport: Arc<dyn Transport>,
}

impl HttpUploadTarget {
    pub fn new(
        base_url: impl Into<String>,
        application: Application,
        commit: CommitDescriptor,
        packager: ArchivePackager,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            application,
            commit,
            packager,
            transport,
        }
    }

    pub fn commit(&self) -> &CommitDescriptor {
        &self.commit
    }

    /// Destination URL with partition and commit parameters appended.
    pub fn upload_url(&self) -> Result<String, String> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| format!("invalid upload URL '{}': {}", self.base_url, e))?;
        url.query_pairs_mut()
            .append_pair(PARTITION_PARAM, self.application.marker())
            .append_pair(COMMIT_PARAM, &self.commit.to_string());
        Ok(url.into())
    }

    async fn try_upload(&self, snapshot: &CoverageSnapshot) -> UploadOutcome {
        let url = match self.upload_url() {
            Ok(url) => url,
            Err(reason) => {
                error!(
                    "Failed to upload coverage for {}. The configuration is probably incorrect: {}",
                    self.application, reason
                );
                return UploadOutcome::failed(OutcomeKind::Configuration, reason);
            }
        };
        debug!("Uploading coverage to {}", url);

        let archive = match self.packager.build(snapshot.report()) {
            Ok(archive) => archive,
            Err(e) => {
                error!("Failed to compile coverage zip file for upload to {}: {}", url, e);
                return UploadOutcome::failed(
                    OutcomeKind::Packaging,
                    format!("failed to build coverage archive: {e}"),
                );
            }
        };

        let upload = ArchiveUpload::new(UPLOAD_FILE_NAME, archive);
        match self.transport.send(&url, upload).await {
            Ok(response) if response.is_success() => {
                UploadOutcome::delivered(format!("uploaded to {} ({})", url, response.status))
            }
            Ok(response) => {
                error!(
                    "Failed to upload coverage to {}. Request failed with error code {}. Error:\n{}",
                    url, response.status, response.body
                );
                UploadOutcome::failed(
                    OutcomeKind::Rejected,
                    format!(
                        "request failed with error code {}: {}",
                        response.status, response.body
                    ),
                )
            }
            Err(TransportError::Io(reason)) => {
                error!(
                    "Failed to upload coverage to {}. Probably a network problem: {}",
                    url, reason
                );
                UploadOutcome::failed(
                    OutcomeKind::Network,
                    format!("probably a network problem: {reason}"),
                )
            }
            Err(TransportError::Configuration(reason)) => {
                error!(
                    "Failed to upload coverage to {}. The configuration is probably incorrect: {}",
                    url, reason
                );
                UploadOutcome::failed(
                    OutcomeKind::Configuration,
                    format!("the configuration is probably incorrect: {reason}"),
                )
            }
        }
    }
}

#[async_trait]
impl UploadTarget for HttpUploadTarget {
    async fn upload(&self, snapshot: &CoverageSnapshot) -> UploadOutcome {
        let started = Instant::now();
        let outcome = self.try_upload(snapshot).await;
        obs::emit_upload_finished(
            &self.describe(),
            started.elapsed().as_millis() as u64,
            &outcome,
        );
        outcome
    }

    fn describe(&self) -> String {
        format!("Uploading to {} ({} @ {})", self.base_url, self.application, self.commit)
    }

    // Local re-upload is unsupported for this target; mark_for_retry keeps
    // the default no-op.
}

/// Builds [`HttpUploadTarget`]s sharing one transport and packager.
pub struct HttpTargetFactory {
    base_url: String,
    packager: ArchivePackager,
    transport: Arc<dyn Transport>,
}

impl HttpTargetFactory {
    pub fn new(
        base_url: impl Into<String>,
        auxiliary_files: Vec<PathBuf>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            packager: ArchivePackager::new(auxiliary_files),
            transport,
        }
    }
}

impl TargetFactory for HttpTargetFactory {
    fn build(&self, commit: &CommitDescriptor, application: &Application) -> Arc<dyn UploadTarget> {
        Arc::new(HttpUploadTarget::new(
            self.base_url.clone(),
            application.clone(),
            commit.clone(),
            self.packager.clone(),
            Arc::clone(&self.transport),
        ))
    }
}
