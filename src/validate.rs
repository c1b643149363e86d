//! Independent check of `install-recovery.sh`.
//!
//! The parser here reads the script back token by token without using the
//! renderer's types, then cross-checks what it found against the fstab, the
//! partition images and the shipped artifact.

use std::path::Path;

use tracing::{info, warn};

use crate::common::{sha1_hex, PartitionImage};
use crate::delta;
use crate::error::{PackError, Result};
use crate::fstab::Fstab;

/// One `TYPE:device:size:sha1` argument as found in the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPartition {
    pub partition_type: String,
    pub device: String,
    pub size: u64,
    pub sha1: String,
}

impl ScriptPartition {
    fn parse(arg: &str) -> Result<Self> {
        // The device itself may contain ':' so split from both ends.
        let (partition_type, rest) = arg
            .split_once(':')
            .ok_or_else(|| PackError::InvalidScript(format!("bad partition argument '{arg}'")))?;
        let mut tail = rest.rsplitn(3, ':');
        let (Some(sha1), Some(size), Some(device)) = (tail.next(), tail.next(), tail.next()) else {
            return Err(PackError::InvalidScript(format!("bad partition argument '{arg}'")));
        };
        let size = size
            .parse()
            .map_err(|_| PackError::InvalidScript(format!("bad size in '{arg}'")))?;
        if sha1.len() != 40 || !sha1.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(PackError::InvalidScript(format!("bad sha1 in '{arg}'")));
        }
        Ok(Self {
            partition_type: partition_type.to_string(),
            device: device.to_string(),
            size,
            sha1: sha1.to_ascii_lowercase(),
        })
    }
}

/// What an install script says it will do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedScript {
    /// `full` or `patch`.
    pub strategy: String,
    pub check: ScriptPartition,
    pub source: ScriptPartition,
    pub target: ScriptPartition,
    pub artifact: String,
    pub bonus: Option<String>,
}

/// The argument following `name`, without a trailing `;`.
fn flag_value<'t>(tokens: &[&'t str], name: &str) -> Option<&'t str> {
    tokens.windows(2).find(|w| w[0] == name).map(|w| w[1].trim_end_matches(';'))
}

/// Parses the text of an install script.
pub fn parse_install_script(text: &str) -> Result<ParsedScript> {
    let mut strategy = None;
    let mut tokens = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if let Some(tag) = line.strip_prefix("RECOVERY_STRATEGY=") {
            strategy = Some(tag.to_string());
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        tokens.extend(line.split_whitespace().filter(|t| *t != "\\"));
    }

    let strategy = strategy.ok_or_else(|| PackError::InvalidScript("missing RECOVERY_STRATEGY".into()))?;
    let required = |name: &str| flag_value(&tokens, name).ok_or_else(|| PackError::InvalidScript(format!("missing {name}")));

    let artifact_flag = match strategy.as_str() {
        "full" => "--flash",
        "patch" => "--patch",
        other => return Err(PackError::InvalidScript(format!("unknown strategy '{other}'"))),
    };

    Ok(ParsedScript {
        check: ScriptPartition::parse(required("--check")?)?,
        source: ScriptPartition::parse(required("--source")?)?,
        target: ScriptPartition::parse(required("--target")?)?,
        artifact: required(artifact_flag)?.to_string(),
        bonus: flag_value(&tokens, "--bonus").map(str::to_string),
        strategy,
    })
}

fn expect_eq<T: PartialEq + std::fmt::Debug>(what: &str, script: T, actual: T) -> Result<()> {
    if script != actual {
        return Err(PackError::ScriptMismatch(format!("{what}: script has {script:?}, expected {actual:?}")));
    }
    Ok(())
}

fn check_partition(label: &str, found: &ScriptPartition, fstab: &Fstab, mount_point: &str) -> Result<()> {
    let (partition_type, device) = fstab.type_and_device(mount_point)?;
    expect_eq(&format!("{label} type"), found.partition_type.as_str(), partition_type)?;
    expect_eq(&format!("{label} device"), found.device.as_str(), device)
}

fn check_image(label: &str, found: &ScriptPartition, image: &PartitionImage) -> Result<()> {
    expect_eq(&format!("{label} size"), found.size, image.size())?;
    expect_eq(&format!("{label} sha1"), found.sha1.as_str(), image.sha1())
}

/// Cross-checks a parsed script.
///
/// `source`/`target` are checked when given; a patch can only be verified
/// with the source image at hand.
pub fn check_install_script(
    script: &ParsedScript,
    fstab: &Fstab,
    source: Option<&PartitionImage>,
    target: Option<&PartitionImage>,
    artifact: &[u8],
    bonus: Option<&[u8]>,
) -> Result<()> {
    expect_eq("--check", &script.check, &script.target)?;
    check_partition("source", &script.source, fstab, "/boot")?;
    check_partition("target", &script.target, fstab, "/recovery")?;

    if let Some(source) = source {
        check_image("source", &script.source, source)?;
    }
    if let Some(target) = target {
        check_image("target", &script.target, target)?;
    }

    let rebuilt_sha1 = match script.strategy.as_str() {
        "full" => sha1_hex(artifact),
        _ => {
            let source = source.ok_or(PackError::MissingImage("boot"))?;
            sha1_hex(&delta::apply(source.data(), bonus, artifact)?)
        }
    };
    expect_eq("installed recovery sha1", rebuilt_sha1.as_str(), script.target.sha1.as_str())?;
    info!(strategy = %script.strategy, "install-recovery script validated");
    Ok(())
}

/// Maps an on-device `/system/...` path to the package's `SYSTEM/...`.
fn package_path(root: &Path, device_path: &str) -> Result<std::path::PathBuf> {
    let rel = device_path
        .strip_prefix("/system/")
        .ok_or_else(|| PackError::InvalidScript(format!("'{device_path}' is not under /system")))?;
    if rel.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err(PackError::InvalidScript(format!("'{device_path}' is not a plain path under /system")));
    }
    Ok(rel.split('/').fold(root.join("SYSTEM"), |acc, part| acc.join(part)))
}

fn load_optional(path: &Path) -> Result<Option<PartitionImage>> {
    if !path.exists() {
        return Ok(None);
    }
    PartitionImage::from_path(path).map(Some)
}

/// Validates `SYSTEM/bin/install-recovery.sh` inside an unpacked package directory.
///
/// Images are taken from `IMAGES/boot.img` and `IMAGES/recovery.img`.
pub fn validate_install_recovery_script(root: &Path, fstab: &Fstab) -> Result<ParsedScript> {
    let script_path = root.join("SYSTEM").join("bin").join("install-recovery.sh");
    let text = std::fs::read_to_string(&script_path).map_err(PackError::io_at(&script_path))?;
    let script = parse_install_script(&text)?;

    let boot = load_optional(&root.join("IMAGES").join("boot.img"))?;
    let recovery = load_optional(&root.join("IMAGES").join("recovery.img"))?;
    if boot.is_none() || recovery.is_none() {
        warn!("IMAGES/boot.img or IMAGES/recovery.img not present, skipping image checks");
    }

    let artifact_path = package_path(root, &script.artifact)?;
    let artifact = std::fs::read(&artifact_path).map_err(PackError::io_at(&artifact_path))?;
    let bonus = match &script.bonus {
        Some(device_path) => {
            let path = package_path(root, device_path)?;
            Some(std::fs::read(&path).map_err(PackError::io_at(&path))?)
        }
        None => None,
    };

    check_install_script(&script, fstab, boot.as_ref(), recovery.as_ref(), &artifact, bonus.as_deref())?;
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA_A: &str = "a9993e364706816aba3e25717850c26c9cd0d89d";
    const SHA_B: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

    #[test]
    fn parses_device_with_colons() {
        let p = ScriptPartition::parse(&format!("EMMC:/dev/block/platform/a:b/boot:24:{SHA_A}")).unwrap();
        assert_eq!(p.partition_type, "EMMC");
        assert_eq!(p.device, "/dev/block/platform/a:b/boot");
        assert_eq!(p.size, 24);
        assert_eq!(p.sha1, SHA_A);
    }

    #[test]
    fn rejects_bad_partition_arguments() {
        assert!(ScriptPartition::parse("EMMC").is_err());
        assert!(ScriptPartition::parse(&format!("EMMC:/dev/boot:big:{SHA_A}")).is_err());
        assert!(ScriptPartition::parse("EMMC:/dev/boot:24:nothex").is_err());
    }

    #[test]
    fn parses_script_fields() {
        let text = format!(
            "#!/system/bin/sh\nRECOVERY_STRATEGY=full\nif ! applypatch --check EMMC:/r:3:{SHA_A}; then\n  applypatch \\\n          --flash /system/etc/recovery.img \\\n          --source EMMC:/b:0:{SHA_B} \\\n          --target EMMC:/r:3:{SHA_A} && \\\nfi\n"
        );
        let parsed = parse_install_script(&text).unwrap();
        assert_eq!(parsed.strategy, "full");
        assert_eq!(parsed.artifact, "/system/etc/recovery.img");
        assert_eq!(parsed.check, parsed.target);
        assert_eq!(parsed.source.size, 0);
        assert_eq!(parsed.bonus, None);
    }

    #[test]
    fn missing_strategy_is_invalid() {
        assert!(matches!(parse_install_script("#!/system/bin/sh\n"), Err(PackError::InvalidScript(_))));
    }

    #[test]
    fn package_paths_stay_under_system() {
        let root = Path::new("/pkg");
        assert_eq!(
            package_path(root, "/system/etc/recovery.img").unwrap(),
            Path::new("/pkg/SYSTEM/etc/recovery.img")
        );
        assert!(package_path(root, "/vendor/etc/x").is_err());
    }

    #[test]
    fn package_paths_cannot_escape_system() {
        let root = Path::new("/pkg");
        for hostile in ["/system/../IMAGES/boot.img", "/system/etc/../../x", "/system/etc//recovery.img", "/system/", "/system/./x"] {
            assert!(
                matches!(package_path(root, hostile), Err(PackError::InvalidScript(_))),
                "{hostile} should be rejected"
            );
        }
    }
}
