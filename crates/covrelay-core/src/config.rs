//! Relay configuration.
//!
//! Loaded from a TOML file or from `COVRELAY_*` environment variables.
//!
//! ```toml
//! upload_url = "https://analysis.example.com/api/coverage"
//! coverage_file = "/var/coverage/coverage.xml"
//! auxiliary_files = ["/var/coverage/test-execution.json"]
//! timeout_secs = 30
//!
//! [[applications]]
//! marker = "com.example.shop.Main"
//! artifact = "/opt/deploy/shop.jar"
//! ```

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::archive::COVERAGE_ENTRY_NAME;
use crate::domain::Application;
use crate::error::ConfigError;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_DUMP_INTERVAL_SECS: u64 = 60;

/// An application to route coverage for and the artifact carrying its
/// `git.properties`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApplicationConfig {
    pub marker: String,
    pub artifact: PathBuf,
}

impl ApplicationConfig {
    pub fn application(&self) -> Application {
        Application::new(self.marker.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Base URL of the analysis server's upload endpoint.
    pub upload_url: Option<String>,
    /// Write archives to this directory instead of uploading them.
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub auxiliary_files: Vec<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_dump_interval_secs")]
    pub dump_interval_secs: u64,
    /// Report written by the instrumentation engine.
    pub coverage_file: Option<PathBuf>,
    #[serde(default)]
    pub applications: Vec<ApplicationConfig>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_dump_interval_secs() -> u64 {
    DEFAULT_DUMP_INTERVAL_SECS
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upload_url: None,
            output_dir: None,
            auxiliary_files: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            dump_interval_secs: DEFAULT_DUMP_INTERVAL_SECS,
            coverage_file: None,
            applications: Vec::new(),
        }
    }
}

impl RelayConfig {
    /// Parse a TOML document. Call [`RelayConfig::validate`] once every
    /// override has been applied.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Build the config from `COVRELAY_*` environment variables.
    ///
    /// `COVRELAY_APPLICATIONS` lists `marker=artifact` pairs separated by `;`.
    /// `COVRELAY_AUXILIARY_FILES` uses the platform path-list separator.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            upload_url: lookup("COVRELAY_UPLOAD_URL"),
            output_dir: lookup("COVRELAY_OUTPUT_DIR").map(PathBuf::from),
            coverage_file: lookup("COVRELAY_COVERAGE_FILE").map(PathBuf::from),
            ..Self::default()
        };

        if let Some(files) = lookup("COVRELAY_AUXILIARY_FILES") {
            config.auxiliary_files = std::env::split_paths(&files)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        if let Some(raw) = lookup("COVRELAY_TIMEOUT_SECS") {
            config.timeout_secs = parse_secs("COVRELAY_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("COVRELAY_DUMP_INTERVAL_SECS") {
            config.dump_interval_secs = parse_secs("COVRELAY_DUMP_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("COVRELAY_APPLICATIONS") {
            config.applications = parse_applications(&raw)?;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upload_url.is_none() && self.output_dir.is_none() {
            return Err(ConfigError::Missing("upload_url or output_dir"));
        }
        if self.applications.is_empty() {
            return Err(ConfigError::Missing("applications"));
        }
        if let Some(app) = self.applications.iter().find(|a| a.marker.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                key: "applications",
                reason: format!("empty marker for artifact {}", app.artifact.display()),
            });
        }
        let mut entry_names = BTreeSet::new();
        for file in &self.auxiliary_files {
            let name = file.file_name().ok_or_else(|| ConfigError::Invalid {
                key: "auxiliary_files",
                reason: format!("{} has no file name", file.display()),
            })?;
            if name == OsStr::new(COVERAGE_ENTRY_NAME) || !entry_names.insert(name) {
                return Err(ConfigError::Invalid {
                    key: "auxiliary_files",
                    reason: format!(
                        "{} would be stored as {} more than once in the upload archive",
                        file.display(),
                        name.to_string_lossy()
                    ),
                });
            }
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "timeout_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.dump_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "dump_interval_secs",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn dump_interval(&self) -> Duration {
        Duration::from_secs(self.dump_interval_secs)
    }
}

fn parse_secs(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|e| ConfigError::Invalid {
        key,
        reason: format!("'{raw}': {e}"),
    })
}

fn parse_applications(raw: &str) -> Result<Vec<ApplicationConfig>, ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (marker, artifact) = pair.split_once('=').ok_or_else(|| ConfigError::Invalid {
                key: "COVRELAY_APPLICATIONS",
                reason: format!("expected marker=artifact, got '{pair}'"),
            })?;
            Ok(ApplicationConfig {
                marker: marker.trim().to_string(),
                artifact: PathBuf::from(artifact.trim()),
            })
        })
        .collect()
}
