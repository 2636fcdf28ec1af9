//! Upload targets and the factories that build them once an application's
//! commit is known.

pub mod directory;
pub mod http;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{Application, CommitDescriptor, CoverageSnapshot, UploadOutcome};

pub use directory::{DirectoryTarget, DirectoryTargetFactory};
pub use http::{HttpTargetFactory, HttpUploadTarget};

/// One destination for coverage archives.
///
/// `upload` makes a single delivery attempt and reports the result as an
/// [`UploadOutcome`]; it never fails in the `Result` sense.
#[async_trait]
pub trait UploadTarget: Send + Sync {
    async fn upload(&self, snapshot: &CoverageSnapshot) -> UploadOutcome;

    /// Human readable destination, used in logs.
    fn describe(&self) -> String;

    /// Remember `coverage_file` for a later local re-upload.
    ///
    /// Retry support is optional per target type. The default does nothing.
    fn mark_for_retry(&self, coverage_file: &Path) {
        let _ = coverage_file;
    }
}

/// Builds the target for an application from its resolved commit.
pub trait TargetFactory: Send + Sync {
    fn build(&self, commit: &CommitDescriptor, application: &Application) -> Arc<dyn UploadTarget>;
}

/// Adapts a closure into a [`TargetFactory`].
pub struct FnTargetFactory<F>(pub F);

impl<F> TargetFactory for FnTargetFactory<F>
where
    F: Fn(&CommitDescriptor, &Application) -> Arc<dyn UploadTarget> + Send + Sync,
{
    fn build(&self, commit: &CommitDescriptor, application: &Application) -> Arc<dyn UploadTarget> {
        (self.0)(commit, application)
    }
}
