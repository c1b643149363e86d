//! Renders `install-recovery.sh`.
//!
//! The text is re-parsed by [`crate::validate`], which shares no
//! code with this renderer. Field order, field count and the digest algorithm
//! are part of that contract.

use std::fmt;

use serde::Serialize;

/// Which artifact the script installs.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Flash the target image shipped verbatim.
    Full,
    /// Rebuild the target from the on-device source plus a delta.
    #[serde(rename = "patch")]
    Delta,
}

impl Strategy {
    pub fn tag(self) -> &'static str {
        match self {
            Strategy::Full => "full",
            Strategy::Delta => "patch",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// `TYPE:device:size:sha1`, the partition reference understood by `applypatch`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PartitionRef {
    pub partition_type: String,
    pub device: String,
    pub size: u64,
    pub sha1: String,
}

impl fmt::Display for PartitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.partition_type, self.device, self.size, self.sha1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallScript {
    pub strategy: Strategy,
    pub source: PartitionRef,
    pub target: PartitionRef,
    /// On-device path of the shipped artifact.
    pub artifact: String,
    /// On-device path of the bonus resource, delta only.
    pub bonus: Option<String>,
}

impl InstallScript {
    pub fn render(&self) -> String {
        let mut args = Vec::new();
        match self.strategy {
            Strategy::Full => args.push(format!("--flash {}", self.artifact)),
            Strategy::Delta => {
                if let Some(bonus) = &self.bonus {
                    args.push(format!("--bonus {bonus}"));
                }
                args.push(format!("--patch {}", self.artifact));
            }
        }
        args.push(format!("--source {}", self.source));
        args.push(format!("--target {}", self.target));

        let mut out = String::new();
        out.push_str("#!/system/bin/sh\n");
        out.push_str(&format!("RECOVERY_STRATEGY={}\n", self.strategy));
        out.push_str(&format!("if ! applypatch --check {}; then\n", self.target));
        out.push_str("  applypatch \\\n");
        let last = args.len() - 1;
        for (i, arg) in args.iter().enumerate() {
            let tail = if i == last { " && \\" } else { " \\" };
            out.push_str(&format!("          {arg}{tail}\n"));
        }
        out.push_str("      log -t recovery \"Installing new recovery image: succeeded\" || \\\n");
        out.push_str("      log -t recovery \"Installing new recovery image: failed\"\n");
        out.push_str("else\n");
        out.push_str("  log -t recovery \"Recovery image already installed\"\n");
        out.push_str("fi\n");
        out
    }
}
