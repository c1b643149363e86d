//! Common utilities and types module.
// Shared structs, digests, constants.

use std::path::Path;

use serde::Serialize;
use sha1::{Digest, Sha1};

use crate::error::{PackError, Result};

/// Lowercase hex SHA-1 of `data`.
pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// A named partition image held in memory.
///
/// The size and SHA-1 are computed once, when the image is constructed, and
/// reused by every consumer afterwards.
#[derive(Debug, Clone)]
pub struct PartitionImage {
    name: String,
    data: Vec<u8>,
    sha1: String,
}

impl PartitionImage {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        let sha1 = sha1_hex(&data);
        Self { name: name.into(), data, sha1 }
    }

    /// Reads an image from disk, naming it after the file name.
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(PackError::io_at(path))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, data))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn sha1(&self) -> &str {
        &self.sha1
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn identity(&self) -> ImageIdentity {
        ImageIdentity { name: self.name.clone(), size: self.size(), sha1: self.sha1.clone() }
    }
}

/// Size and digest of an image, as reported in build summaries.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ImageIdentity {
    pub name: String,
    pub size: u64,
    pub sha1: String,
}
