//! Wires artifact scans to registry resolution.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::domain::Application;
use crate::locator::MetadataLocator;
use crate::registry::DelayedUploadRegistry;

/// Schedule a scan of `artifact` that resolves `application` when its
/// `git.properties` is found.
///
/// Returns `false` without scheduling anything when the application already
/// has a target. The check only covers this application; scans for other
/// applications are unaffected.
pub fn discover_application(
    registry: &Arc<DelayedUploadRegistry>,
    locator: &MetadataLocator,
    application: Application,
    artifact: impl Into<PathBuf>,
) -> bool {
    let artifact = artifact.into();
    if registry.is_resolved(&application) {
        debug!(
            "{} is already resolved, not scanning {}",
            application,
            artifact.display()
        );
        return false;
    }

    let registry = Arc::clone(registry);
    locator.locate_async(artifact, move |commit| {
        registry.resolve(application, commit);
    });
    true
}
