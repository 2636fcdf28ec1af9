//! Upload archive packaging.
//!
//! Every archive starts with the coverage report under [`COVERAGE_ENTRY_NAME`]
//! followed by each auxiliary file under its base file name.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::PackageError;

/// Entry name of the coverage report inside every upload archive.
pub const COVERAGE_ENTRY_NAME: &str = "coverage.xml";

/// Builds upload archives for a fixed set of auxiliary files.
#[derive(Debug, Clone, Default)]
pub struct ArchivePackager {
    auxiliary_files: Vec<PathBuf>,
}

impl ArchivePackager {
    pub fn new(auxiliary_files: Vec<PathBuf>) -> Self {
        Self { auxiliary_files }
    }

    pub fn auxiliary_files(&self) -> &[PathBuf] {
        &self.auxiliary_files
    }

    pub fn build(&self, payload: &[u8]) -> Result<Vec<u8>, PackageError> {
        build_archive(payload, &self.auxiliary_files)
    }
}

/// Build a zip archive holding `payload` and every file in `auxiliary_files`.
///
/// Auxiliary files are read fully into memory. A file that cannot be read
/// fails the whole build.
pub fn build_archive(payload: &[u8], auxiliary_files: &[PathBuf]) -> Result<Vec<u8>, PackageError> {
    let options = SimpleFileOptions::default();
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    writer.start_file(COVERAGE_ENTRY_NAME, options)?;
    writer.write_all(payload)?;
    // Flush only; finishing the writer here would end the archive.
    writer.flush()?;

    for path in auxiliary_files {
        let name = entry_name(path)?;
        let content = std::fs::read(path).map_err(|source| PackageError::AuxiliaryFile {
            path: path.clone(),
            source,
        })?;
        writer.start_file(name, options)?;
        writer.write_all(&content)?;
    }

    Ok(writer.finish()?.into_inner())
}

fn entry_name(path: &Path) -> Result<String, PackageError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| PackageError::UnnamedAuxiliaryFile(path.to_path_buf()))
}
