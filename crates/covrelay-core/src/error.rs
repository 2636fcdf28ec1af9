//! Error types for covrelay-core

use std::path::PathBuf;

use thiserror::Error;

/// Failures while looking for `git.properties` inside an artifact.
///
/// A missing metadata file is not an error; `locate` returns `Ok(None)`.
#[derive(Error, Debug)]
pub enum LocateError {
    /// The entry exists but lacks a required field or has a bad timestamp.
    #[error("invalid git.properties in {entry} of {}: {reason}", .artifact.display())]
    InvalidMetadata {
        artifact: PathBuf,
        entry: String,
        reason: String,
    },

    /// The artifact could not be opened or read as an archive.
    #[error("reading {} for obtaining commit descriptor from git.properties failed: {source}", .artifact.display())]
    Io {
        artifact: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while building the upload archive.
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("cannot read auxiliary file {}: {source}", .path.display())]
    AuxiliaryFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("auxiliary file {} has no file name", .0.display())]
    UnnamedAuxiliaryFile(PathBuf),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures raised by a transport before any status code is available.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Network unreachable, timeout, reset.
    #[error("I/O failure: {0}")]
    Io(String),

    /// Malformed URL or a client that cannot be set up.
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            TransportError::Configuration(err.to_string())
        } else {
            TransportError::Io(err.to_string())
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
