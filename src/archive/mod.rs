//! # Deterministic zip output
//!
//! This module wraps a [`zip::ZipWriter`] so that every entry it writes carries
//! normalized metadata: a fixed 2009-01-01 timestamp, explicit permission bits
//! and an explicitly chosen compression method. Two runs over the same ordered
//! inputs produce the same archive bytes, whatever the wall clock or the input
//! files' own timestamps say.

use std::fs::File;
use std::io::{self, Seek, Write};
use std::path::Path;

use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::{PackError, Result};

/// Permission bits used when neither the caller nor a carried-in record supplies any.
pub const DEFAULT_PERMISSIONS: u32 = 0o644;

/// MS-DOS date word for 2009-01-01: ((2009 - 1980) << 9) | (1 << 5) | 1.
const FIXED_DOS_DATE: u16 = 0x3A21;
const FIXED_DOS_TIME: u16 = 0;

/// The timestamp stamped on every entry: 2009-01-01 00:00:00.
pub fn fixed_timestamp() -> DateTime {
    DateTime::from_msdos(FIXED_DOS_DATE, FIXED_DOS_TIME)
}

/// Size above which an entry is written with zip64 extended size fields.
///
/// The threshold is owned by the writer and never changes while it is in use;
/// entries bigger than it are admitted one at a time by flagging just that
/// entry as large.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SizeThreshold(u64);

impl SizeThreshold {
    pub const DEFAULT: SizeThreshold = SizeThreshold((1 << 31) - 1);

    pub const fn new(limit: u64) -> Self {
        SizeThreshold(limit)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether an entry of `len` bytes needs extended size fields.
    pub const fn needs_zip64(self, len: u64) -> bool {
        len > self.0
    }
}

impl Default for SizeThreshold {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Compression applied to one entry. Always chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    Stored,
    Deflated,
}

impl Compression {
    fn method(self) -> CompressionMethod {
        match self {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Deflated => CompressionMethod::Deflated,
        }
    }

    fn from_method(method: CompressionMethod) -> Option<Self> {
        match method {
            CompressionMethod::Stored => Some(Compression::Stored),
            CompressionMethod::Deflated => Some(Compression::Deflated),
            _ => None,
        }
    }
}

/// A metadata record carried in from elsewhere, typically another archive.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub name: String,
    /// Unix permission bits. `None` falls back to [`DEFAULT_PERMISSIONS`].
    pub permissions: Option<u32>,
    pub compression: Option<Compression>,
    /// Ignored on write; entries always get [`fixed_timestamp`].
    pub last_modified: Option<DateTime>,
}

impl EntryInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), permissions: None, compression: None, last_modified: None }
    }

    pub fn with_permissions(mut self, mode: u32) -> Self {
        self.permissions = Some(mode);
        self
    }

    /// Captures the metadata of an entry read from an existing archive.
    pub fn from_zip_file(file: &zip::read::ZipFile<'_>) -> Self {
        Self {
            name: file.name().to_string(),
            permissions: file.unix_mode().map(|mode| mode & 0o777),
            compression: Compression::from_method(file.compression()),
            last_modified: Some(file.last_modified()),
        }
    }
}

/// Either a bare archive name or a full metadata record.
#[derive(Debug, Clone)]
pub enum EntryName {
    Name(String),
    Info(EntryInfo),
}

impl From<&str> for EntryName {
    fn from(name: &str) -> Self {
        EntryName::Name(name.to_string())
    }
}

impl From<String> for EntryName {
    fn from(name: String) -> Self {
        EntryName::Name(name)
    }
}

impl From<EntryInfo> for EntryName {
    fn from(info: EntryInfo) -> Self {
        EntryName::Info(info)
    }
}

/// Per-call options. Explicit values always win over a carried-in [`EntryInfo`].
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    /// Archive name for [`DeterministicZip::write_file`]; defaults to the file path.
    pub arcname: Option<String>,
    pub permissions: Option<u32>,
    pub compression: Option<Compression>,
}

impl EntryOptions {
    pub fn arcname(mut self, name: impl Into<String>) -> Self {
        self.arcname = Some(name.into());
        self
    }

    pub fn permissions(mut self, mode: u32) -> Self {
        self.permissions = Some(mode);
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }
}

/// The normalized metadata actually written for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMetadata<'a> {
    pub name: &'a str,
    pub permissions: u32,
    pub compression: Compression,
}

impl<'a> EntryMetadata<'a> {
    fn resolve(name: &'a EntryName, options: &EntryOptions) -> Self {
        let (raw_name, carried_mode, carried_compression) = match name {
            EntryName::Name(n) => (n.as_str(), None, None),
            EntryName::Info(info) => (info.name.as_str(), info.permissions, info.compression),
        };
        Self {
            name: strip_leading_separators(raw_name),
            permissions: options.permissions.or(carried_mode).unwrap_or(DEFAULT_PERMISSIONS) & 0o777,
            compression: options.compression.or(carried_compression).unwrap_or_default(),
        }
    }

    fn file_options(&self, large_file: bool) -> FileOptions {
        FileOptions::default()
            .compression_method(self.compression.method())
            .last_modified_time(fixed_timestamp())
            .unix_permissions(self.permissions)
            .large_file(large_file)
    }
}

/// Archive names never start with `/`.
pub fn strip_leading_separators(name: &str) -> &str {
    name.trim_start_matches('/')
}

/// A zip writer that stamps deterministic metadata on every entry.
///
/// # Example
///
/// ```no_run
/// use recovery_pack::archive::{Compression, DeterministicZip, EntryOptions};
///
/// let mut zip = DeterministicZip::create("out.zip".as_ref())?;
/// zip.write_bytes("META/version", b"1", &EntryOptions::default())?;
/// zip.write_file("boot.img".as_ref(), &EntryOptions::default().compression(Compression::Deflated))?;
/// zip.close()?;
/// # Ok::<(), recovery_pack::PackError>(())
/// ```
pub struct DeterministicZip<W: Write + Seek> {
    inner: Option<ZipWriter<W>>,
    size_threshold: SizeThreshold,
    entries: usize,
}

impl DeterministicZip<File> {
    /// Creates (or truncates) an archive file on disk.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(PackError::io_at(path))?;
        Ok(Self::new(file))
    }
}

impl<W: Write + Seek> DeterministicZip<W> {
    pub fn new(writer: W) -> Self {
        Self::with_size_threshold(writer, SizeThreshold::DEFAULT)
    }

    pub fn with_size_threshold(writer: W, size_threshold: SizeThreshold) -> Self {
        Self { inner: Some(ZipWriter::new(writer)), size_threshold, entries: 0 }
    }

    pub fn size_threshold(&self) -> SizeThreshold {
        self.size_threshold
    }

    /// Number of entries written so far.
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    fn writer(&mut self) -> Result<&mut ZipWriter<W>> {
        self.inner.as_mut().ok_or(PackError::ArchiveClosed)
    }

    /// Streams the file at `path` into the archive.
    ///
    /// The entry is named after `options.arcname`, or the path itself with any
    /// leading `/` removed. The input file's metadata is only read, never modified.
    pub fn write_file(&mut self, path: &Path, options: &EntryOptions) -> Result<()> {
        self.writer()?;
        let mut file = File::open(path).map_err(PackError::io_at(path))?;
        let len = file.metadata().map_err(PackError::io_at(path))?.len();

        let name = EntryName::Name(match &options.arcname {
            Some(arcname) => arcname.clone(),
            None => path.to_string_lossy().into_owned(),
        });
        let meta = EntryMetadata::resolve(&name, options);
        let large_file = self.size_threshold.needs_zip64(len);
        debug!(name = meta.name, len, mode = %format!("{:o}", meta.permissions), large_file, "writing file entry");

        let writer = self.writer()?;
        writer.start_file(meta.name, meta.file_options(large_file))?;
        io::copy(&mut file, writer).map_err(PackError::io_at(path))?;
        self.entries += 1;
        Ok(())
    }

    /// Writes an in-memory buffer as one entry.
    ///
    /// A carried-in [`EntryInfo`] keeps its permission bits and compression
    /// unless `options` overrides them; its timestamp is always replaced.
    pub fn write_bytes(&mut self, name: impl Into<EntryName>, contents: &[u8], options: &EntryOptions) -> Result<()> {
        let name = name.into();
        let meta = EntryMetadata::resolve(&name, options);
        let large_file = self.size_threshold.needs_zip64(contents.len() as u64);
        debug!(name = meta.name, len = contents.len(), mode = %format!("{:o}", meta.permissions), large_file, "writing bytes entry");

        let writer = self.writer()?;
        writer.start_file(meta.name, meta.file_options(large_file))?;
        writer.write_all(contents)?;
        self.entries += 1;
        Ok(())
    }

    /// Writes the central directory and hands back the underlying writer.
    ///
    /// A second call fails with [`PackError::ArchiveClosed`].
    pub fn close(&mut self) -> Result<W> {
        let mut writer = self.inner.take().ok_or(PackError::ArchiveClosed)?;
        let inner = writer.finish()?;
        debug!(entries = self.entries, "archive closed");
        Ok(inner)
    }
}
