//! Places named byte blobs under a logical prefix.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{PackError, Result};

/// Where generated artifacts go.
///
/// Logical paths use `/` separators and are relative to the sink's prefix
/// (for example `etc/recovery.img` under `SYSTEM`).
pub trait OutputSink {
    fn put(&mut self, logical_path: &str, data: &[u8]) -> Result<()>;

    /// Returns the blob previously placed at `logical_path`, if any.
    fn get(&self, logical_path: &str) -> Result<Option<Vec<u8>>>;

    /// Removes a blob. Removing a missing blob is not an error.
    fn remove(&mut self, logical_path: &str) -> Result<()>;
}

/// Keeps everything in memory. Handy for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    blobs: BTreeMap<String, Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.blobs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl OutputSink for MemorySink {
    fn put(&mut self, logical_path: &str, data: &[u8]) -> Result<()> {
        self.blobs.insert(logical_path.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, logical_path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(logical_path).cloned())
    }

    fn remove(&mut self, logical_path: &str) -> Result<()> {
        self.blobs.remove(logical_path);
        Ok(())
    }
}

/// Writes blobs to `root/prefix/logical_path` on disk.
///
/// Each write goes to a temporary file in the destination directory and is
/// renamed into place, so readers never see a half-written blob.
#[derive(Debug, Clone)]
pub struct DirSink {
    base: PathBuf,
}

impl DirSink {
    pub fn new(root: &Path, prefix: &str) -> Self {
        Self { base: root.join(prefix) }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn resolve(&self, logical_path: &str) -> PathBuf {
        logical_path
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.base.clone(), |acc, part| acc.join(part))
    }
}

impl OutputSink for DirSink {
    fn put(&mut self, logical_path: &str, data: &[u8]) -> Result<()> {
        let dest = self.resolve(logical_path);
        let parent = dest.parent().unwrap_or(&self.base).to_path_buf();
        fs::create_dir_all(&parent).map_err(PackError::io_at(&parent))?;

        let mut tmp = NamedTempFile::new_in(&parent).map_err(PackError::io_at(&parent))?;
        tmp.write_all(data).map_err(PackError::io_at(tmp.path()))?;
        tmp.persist(&dest).map_err(|e| PackError::Io { source: e.error, path: dest.clone() })?;
        Ok(())
    }

    fn get(&self, logical_path: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(logical_path);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PackError::Io { source: e, path }),
        }
    }

    fn remove(&mut self, logical_path: &str) -> Result<()> {
        let path = self.resolve(logical_path);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PackError::Io { source: e, path }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn dir_sink_round_trip() {
        let dir = tempdir().unwrap();
        let mut sink = DirSink::new(dir.path(), "SYSTEM");

        assert_eq!(sink.get("etc/recovery.img").unwrap(), None);
        sink.put("etc/recovery.img", b"image").unwrap();
        assert_eq!(fs::read(dir.path().join("SYSTEM/etc/recovery.img")).unwrap(), b"image");
        assert_eq!(sink.get("etc/recovery.img").unwrap().as_deref(), Some(&b"image"[..]));

        sink.remove("etc/recovery.img").unwrap();
        sink.remove("etc/recovery.img").unwrap();
        assert_eq!(sink.get("etc/recovery.img").unwrap(), None);

        // Only the blob itself was left behind, no scratch files.
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("SYSTEM/etc")).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn memory_sink_overwrites() {
        let mut sink = MemorySink::new();
        sink.put("a", b"1").unwrap();
        sink.put("a", b"2").unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.get("a").unwrap(), Some(b"2".to_vec()));
    }
}
