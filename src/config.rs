//! Build info (`misc_info.txt`): `key=value` settings that accompany the images.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{PackError, Result};

/// The only recovery.fstab layout this crate reads.
pub const SUPPORTED_FSTAB_VERSION: u32 = 2;

#[derive(Debug, Clone, Default)]
pub struct BuildInfo {
    values: BTreeMap<String, String>,
}

impl BuildInfo {
    pub fn parse(text: &str) -> Result<Self> {
        let mut values = BTreeMap::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(PackError::BuildInfo { line_number: idx + 1, reason: format!("expected key=value, got \"{line}\"") });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(PackError::BuildInfo { line_number: idx + 1, reason: "empty key".into() });
            }
            values.insert(key.to_string(), value.trim().to_string());
        }

        let info = Self { values };
        let version = info.fstab_version()?;
        if version != SUPPORTED_FSTAB_VERSION {
            return Err(PackError::BuildInfo {
                line_number: 0,
                reason: format!("unsupported fstab_version {version}"),
            });
        }
        Ok(info)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(PackError::io_at(path))?;
        Self::parse(&text)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// `full_recovery_image=true` forces the full-image strategy.
    pub fn full_recovery_image(&self) -> bool {
        self.get("full_recovery_image") == Some("true")
    }

    pub fn fstab_version(&self) -> Result<u32> {
        match self.get("fstab_version") {
            None => Ok(SUPPORTED_FSTAB_VERSION),
            Some(v) => v.parse().map_err(|_| PackError::BuildInfo {
                line_number: 0,
                reason: format!("fstab_version is not a number: \"{v}\""),
            }),
        }
    }
}
