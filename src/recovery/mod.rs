//! # Recovery-from-boot patch generation
//!
//! Given the boot image (source, already on the device) and the recovery
//! image (target), decides whether to ship recovery in full or as a delta
//! against boot, writes that artifact through an [`OutputSink`] and writes an
//! `install-recovery.sh` that installs it on first boot.

pub mod script;
pub mod sink;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::common::{sha1_hex, ImageIdentity, PartitionImage};
use crate::delta;
use crate::error::{PackError, Result};
use crate::fstab::Fstab;

pub use script::{InstallScript, PartitionRef, Strategy};
pub use sink::{DirSink, MemorySink, OutputSink};

/// Sink prefix for files that end up on the system partition.
pub const SYSTEM_PREFIX: &str = "SYSTEM";
/// Where the system partition is mounted on the device.
pub const SYSTEM_MOUNT: &str = "/system";

pub const FULL_IMAGE_PATH: &str = "etc/recovery.img";
pub const PATCH_PATH: &str = "recovery-from-boot.p";
pub const BONUS_PATH: &str = "etc/recovery-resource.dat";
pub const SCRIPT_PATH: &str = "bin/install-recovery.sh";

/// Device path of a blob placed in the system sink.
pub fn device_path(logical_path: &str) -> String {
    format!("{SYSTEM_MOUNT}/{logical_path}")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryOptions {
    /// Always ship the recovery image verbatim.
    pub force_full_image: bool,
}

/// Progress of one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Init,
    ImagesLoaded,
    StrategyChosen,
    ArtifactWritten,
    ScriptWritten,
    Done,
}

/// What a generation produced.
#[derive(Serialize, Debug, Clone)]
pub struct RecoveryPatch {
    pub strategy: Strategy,
    pub source: ImageIdentity,
    pub target: ImageIdentity,
    pub artifact_path: String,
    pub artifact_size: u64,
    pub artifact_sha1: String,
    pub script_path: String,
    #[serde(skip)]
    pub script: String,
}

pub struct RecoveryPatchGenerator<'a> {
    fstab: &'a Fstab,
    options: RecoveryOptions,
    stage: Stage,
}

impl<'a> RecoveryPatchGenerator<'a> {
    pub fn new(fstab: &'a Fstab, options: RecoveryOptions) -> Self {
        Self { fstab, options, stage: Stage::Init }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn advance(&mut self, next: Stage) {
        debug!(from = ?self.stage, to = ?next, "recovery patch stage");
        self.stage = next;
    }

    /// Runs one generation end to end.
    ///
    /// Nothing reaches the sink unless both images are present; the artifact
    /// and the script are either both committed or both absent afterwards.
    pub fn generate<S: OutputSink + ?Sized>(
        &mut self,
        sink: &mut S,
        source: Option<&PartitionImage>,
        target: Option<&PartitionImage>,
    ) -> Result<RecoveryPatch> {
        self.stage = Stage::Init;
        let source = source.filter(|img| !img.is_empty()).ok_or(PackError::MissingImage("boot"))?;
        let target = target.filter(|img| !img.is_empty()).ok_or(PackError::MissingImage("recovery"))?;
        self.advance(Stage::ImagesLoaded);

        let (source_type, source_device) = self.fstab.type_and_device("/boot")?;
        let (target_type, target_device) = self.fstab.type_and_device("/recovery")?;

        let strategy = self.choose_strategy(sink, target)?;
        let (artifact_path, artifact, bonus) = match strategy {
            Strategy::Full => (FULL_IMAGE_PATH, target.data().to_vec(), None),
            Strategy::Delta => {
                let bonus = sink.get(BONUS_PATH)?;
                let patch = delta::diff(source.data(), bonus.as_deref(), target.data())?;
                debug!(patch_len = patch.len(), target_len = target.size(), "computed recovery delta");
                (PATCH_PATH, patch, bonus.map(|_| device_path(BONUS_PATH)))
            }
        };

        let script = InstallScript {
            strategy,
            source: PartitionRef {
                partition_type: source_type.to_string(),
                device: source_device.to_string(),
                size: source.size(),
                sha1: source.sha1().to_string(),
            },
            target: PartitionRef {
                partition_type: target_type.to_string(),
                device: target_device.to_string(),
                size: target.size(),
                sha1: target.sha1().to_string(),
            },
            artifact: device_path(artifact_path),
            bonus,
        }
        .render();
        self.advance(Stage::StrategyChosen);

        let previous = sink.get(artifact_path)?;
        sink.put(artifact_path, &artifact)?;
        self.advance(Stage::ArtifactWritten);

        if let Err(e) = sink.put(SCRIPT_PATH, script.as_bytes()) {
            let restored = match &previous {
                Some(data) => sink.put(artifact_path, data),
                None => sink.remove(artifact_path),
            };
            if let Err(cleanup) = restored {
                warn!(error = %cleanup, path = artifact_path, "could not roll back recovery artifact");
            }
            return Err(e);
        }
        self.advance(Stage::ScriptWritten);

        info!(strategy = %strategy, artifact = artifact_path, size = artifact.len(), "recovery patch written");
        let patch = RecoveryPatch {
            strategy,
            source: source.identity(),
            target: target.identity(),
            artifact_path: artifact_path.to_string(),
            artifact_size: artifact.len() as u64,
            artifact_sha1: match strategy {
                Strategy::Full => target.sha1().to_string(),
                Strategy::Delta => sha1_hex(&artifact),
            },
            script_path: SCRIPT_PATH.to_string(),
            script,
        };
        self.advance(Stage::Done);
        Ok(patch)
    }

    fn choose_strategy<S: OutputSink + ?Sized>(&self, sink: &S, target: &PartitionImage) -> Result<Strategy> {
        if self.options.force_full_image {
            info!("full recovery image forced by build option");
            return Ok(Strategy::Full);
        }
        if let Some(staged) = sink.get(FULL_IMAGE_PATH)? {
            if sha1_hex(&staged) == target.sha1() {
                info!(path = FULL_IMAGE_PATH, "recovery image already staged, shipping it in full");
                return Ok(Strategy::Full);
            }
        }
        Ok(Strategy::Delta)
    }
}

/// Convenience wrapper around [`RecoveryPatchGenerator::generate`].
pub fn make_recovery_patch<S: OutputSink + ?Sized>(
    sink: &mut S,
    recovery: &PartitionImage,
    boot: &PartitionImage,
    fstab: &Fstab,
    options: RecoveryOptions,
) -> Result<RecoveryPatch> {
    RecoveryPatchGenerator::new(fstab, options).generate(sink, Some(boot), Some(recovery))
}
