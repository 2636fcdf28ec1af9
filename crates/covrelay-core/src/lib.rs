//! covrelay core library
//!
//! Routes coverage snapshots to per-application analysis servers whose
//! address is only known once the application's `git.properties` has been
//! found in its deployed artifact.
//!
//! ## Flow
//!
//! - [`MetadataLocator`] scans artifacts on a background worker.
//! - [`DelayedUploadRegistry::resolve`] creates an [`UploadTarget`] for an
//!   application the first time its commit is found.
//! - [`DelayedUploadRegistry::dispatch`] sends a snapshot to every resolved
//!   target; unresolved applications are skipped.
//! - [`ShutdownFlushHook`] performs one final dispatch on termination.

pub mod archive;
pub mod config;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod fakes;
pub mod locator;
pub mod obs;
pub mod properties;
pub mod registry;
pub mod shutdown;
pub mod target;
pub mod telemetry;
pub mod transport;

pub use archive::{build_archive, ArchivePackager, COVERAGE_ENTRY_NAME};
pub use config::{ApplicationConfig, RelayConfig};
pub use discovery::discover_application;
pub use domain::{Application, CommitDescriptor, CoverageSnapshot, OutcomeKind, UploadOutcome};
pub use error::{ConfigError, LocateError, PackageError, TransportError};
pub use locator::{locate, MetadataLocator, GIT_PROPERTIES_FILE_NAME};
pub use properties::Properties;
pub use registry::DelayedUploadRegistry;
pub use shutdown::{shutdown_signal, ShutdownFlushHook, ShutdownRegistration, SnapshotSource};
pub use target::{
    DirectoryTarget, DirectoryTargetFactory, FnTargetFactory, HttpTargetFactory, HttpUploadTarget,
    TargetFactory, UploadTarget,
};
pub use telemetry::init_tracing;
pub use transport::{ArchiveUpload, HttpTransport, Transport, TransportResponse, UPLOAD_FORM_FIELD};

/// covrelay version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
