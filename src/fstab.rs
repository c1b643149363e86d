//! # Partition table
//!
//! Parses `recovery.fstab` (version 2) records of the form
//! `device mount_point fs_type mount_flags fs_mgr_flags` into a lookup keyed
//! by mount point. The patch generator uses it to resolve the `boot` and
//! `recovery` partitions.

use std::collections::BTreeMap;

use crate::error::{PackError, Result};

/// One partition described by the fstab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub mount_point: String,
    pub device: String,
    pub fs_type: String,
    pub mount_flags: String,
    pub fs_mgr_flags: String,
    /// `length=` from the fs_mgr flags, 0 when absent.
    pub length: i64,
    /// `context=` from the mount flags.
    pub context: Option<String>,
}

impl Partition {
    /// The partition type prefix understood by `applypatch` (`EMMC:`, `MTD:`).
    pub fn applypatch_type(&self) -> Result<&'static str> {
        match self.fs_type.as_str() {
            "emmc" => Ok("EMMC"),
            "mtd" => Ok("MTD"),
            other => Err(PackError::UnsupportedPartitionType {
                mount_point: self.mount_point.clone(),
                fs_type: other.to_string(),
            }),
        }
    }
}

/// Mount-point → partition mapping. Built once per build, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Fstab {
    partitions: BTreeMap<String, Partition>,
}

fn key_for(mount_point: &str) -> &str {
    let trimmed = mount_point.trim_start_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

impl Fstab {
    /// Parses the whole text of an fstab file.
    pub fn load(text: &str) -> Result<Self> {
        Self::from_lines(text.lines())
    }

    /// Parses fstab records one line at a time.
    ///
    /// Blank lines and `#` comments are skipped, as are vold-managed entries.
    pub fn from_lines<I, S>(lines: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut partitions = BTreeMap::new();
        for (idx, raw) in lines.into_iter().enumerate() {
            let line = raw.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let pieces: Vec<&str> = line.split_whitespace().collect();
            let [device, mount_point, fs_type, mount_flags, fs_mgr_flags] = pieces[..] else {
                return Err(PackError::FstabParse { line_number: idx + 1, line: line.to_string() });
            };

            if fs_mgr_flags.split(',').any(|f| f.starts_with("voldmanaged=")) {
                continue;
            }

            let mut length = 0i64;
            for flag in fs_mgr_flags.split(',') {
                if let Some(value) = flag.strip_prefix("length=") {
                    length = value.parse().map_err(|_| PackError::FstabParse {
                        line_number: idx + 1,
                        line: line.to_string(),
                    })?;
                }
            }

            let context = mount_flags
                .split(',')
                .find_map(|f| f.strip_prefix("context="))
                .map(str::to_string);

            let partition = Partition {
                mount_point: mount_point.to_string(),
                device: device.to_string(),
                fs_type: fs_type.to_string(),
                mount_flags: mount_flags.to_string(),
                fs_mgr_flags: fs_mgr_flags.to_string(),
                length,
                context,
            };
            partitions.insert(key_for(mount_point).to_string(), partition);
        }
        Ok(Self { partitions })
    }

    /// Looks up a partition by mount point, with or without the leading `/`.
    pub fn get(&self, mount_point: &str) -> Result<&Partition> {
        self.partitions
            .get(key_for(mount_point))
            .ok_or_else(|| PackError::UnknownPartition(mount_point.to_string()))
    }

    /// `(applypatch type, device)` for a mount point.
    pub fn type_and_device(&self, mount_point: &str) -> Result<(&'static str, &str)> {
        let partition = self.get(mount_point)?;
        Ok((partition.applypatch_type()?, partition.device.as_str()))
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }
}
