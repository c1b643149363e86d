use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::result::ZipError;

use crate::delta::DeltaError;

/// The primary error type for all operations in the `recovery-pack` crate.
#[derive(Debug, Error)]
pub enum PackError {
    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io { source: io::Error, path: PathBuf },

    /// A write or close was attempted on an archive that has already been finalized.
    #[error("archive has already been closed")]
    ArchiveClosed,

    /// An error from the underlying `zip` codec, passed through unchanged.
    #[error("zip error: {0}")]
    Zip(#[from] ZipError),

    /// A line of the partition table did not have the expected five fields.
    #[error("malformed fstab line {line_number}: \"{line}\"")]
    FstabParse { line_number: usize, line: String },

    /// A mount point was requested that the partition table does not describe.
    #[error("unknown partition '{0}'")]
    UnknownPartition(String),

    /// The partition exists but its filesystem type cannot be addressed by `applypatch`.
    #[error("unsupported partition type '{fs_type}' for '{mount_point}'")]
    UnsupportedPartitionType { mount_point: String, fs_type: String },

    /// A required partition image is absent or empty.
    #[error("missing {0} image")]
    MissingImage(&'static str),

    /// A malformed line in the build info file.
    #[error("invalid build info line {line_number}: {reason}")]
    BuildInfo { line_number: usize, reason: String },

    /// The install script could not be parsed.
    #[error("invalid install script: {0}")]
    InvalidScript(String),

    /// The install script parsed but disagrees with the images, fstab or artifact.
    #[error("install script mismatch: {0}")]
    ScriptMismatch(String),

    /// An error from the binary delta codec.
    #[error(transparent)]
    Delta(#[from] DeltaError),

    /// An error during serialization of a build summary.
    #[error("serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl PackError {
    /// Builds a closure that attaches `path` to an I/O error.
    pub fn io_at(path: &Path) -> impl FnOnce(io::Error) -> PackError + '_ {
        move |source| PackError::Io { source, path: path.to_path_buf() }
    }
}

// Generic IO error conversion that doesn't require a path
impl From<io::Error> for PackError {
    fn from(err: io::Error) -> Self {
        PackError::Io { source: err, path: PathBuf::new() }
    }
}

pub type Result<T, E = PackError> = std::result::Result<T, E>;
