//! Runs a parsed command line. Kept out of `main.rs` so integration tests and
//! other front ends can drive the same code.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::archive::{DeterministicZip, EntryOptions};
use crate::cli::{self, Args, Commands};
use crate::common::PartitionImage;
use crate::config::BuildInfo;
use crate::delta;
use crate::error::{PackError, Result};
use crate::fstab::Fstab;
use crate::recovery::{DirSink, RecoveryOptions, RecoveryPatchGenerator, SYSTEM_PREFIX};
use crate::validate;

/// Public entry: parse arguments, set up logging, run the command.
pub fn run_cli_app() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = cli::run()?;
    init_logging(args.verbose);
    run_command(&args)?;
    Ok(())
}

fn init_logging(verbose: u8) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    // Logs go to stderr so `--json` output on stdout stays clean.
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("recovery_pack={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}

pub fn run_command(args: &Args) -> Result<()> {
    match &args.command {
        Commands::Pack { inputs, output, compress, perms, strip_prefix } => {
            pack(inputs, output, (*compress).into(), *perms, strip_prefix.as_deref())
        }
        Commands::RecoveryPatch { boot, recovery, fstab, output, misc_info, full, json } => {
            let fstab = Fstab::load(&read_text(fstab)?)?;
            let build_info = match misc_info {
                Some(path) => BuildInfo::load(path)?,
                None => BuildInfo::default(),
            };
            let options = RecoveryOptions { force_full_image: *full || build_info.full_recovery_image() };

            let boot = PartitionImage::from_path(boot)?;
            let recovery = PartitionImage::from_path(recovery)?;
            let mut sink = DirSink::new(output, SYSTEM_PREFIX);
            let patch = RecoveryPatchGenerator::new(&fstab, options).generate(&mut sink, Some(&boot), Some(&recovery))?;

            if *json {
                println!("{}", serde_json::to_string_pretty(&patch)?);
            } else {
                println!("{} {}/{}", patch.strategy, SYSTEM_PREFIX, patch.artifact_path);
            }
            Ok(())
        }
        Commands::Validate { input, fstab } => {
            let fstab = Fstab::load(&read_text(fstab)?)?;
            let script = validate::validate_install_recovery_script(input, &fstab)?;
            println!("OK {} {}", script.strategy, script.artifact);
            Ok(())
        }
        Commands::ApplyPatch { source, patch, bonus, output } => {
            let source_data = fs::read(source).map_err(PackError::io_at(source))?;
            let patch_data = fs::read(patch).map_err(PackError::io_at(patch))?;
            let bonus_data = match bonus {
                Some(path) => Some(fs::read(path).map_err(PackError::io_at(path))?),
                None => None,
            };
            let rebuilt = delta::apply(&source_data, bonus_data.as_deref(), &patch_data)?;
            fs::write(output, &rebuilt).map_err(PackError::io_at(output))?;
            info!(output = %output.display(), len = rebuilt.len(), "patch applied");
            Ok(())
        }
    }
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(PackError::io_at(path))
}

fn pack(
    inputs: &[PathBuf],
    output: &Path,
    compression: crate::archive::Compression,
    perms: Option<u32>,
    strip_prefix: Option<&Path>,
) -> Result<()> {
    let mut zip = DeterministicZip::create(output)?;
    for input in inputs {
        let mut options = EntryOptions::default().compression(compression);
        options.permissions = perms;
        if let Some(prefix) = strip_prefix {
            let rel = input.strip_prefix(prefix).unwrap_or(input);
            options.arcname = Some(archive_name(rel));
        }
        zip.write_file(input, &options)?;
    }
    zip.close()?;
    info!(output = %output.display(), entries = inputs.len(), "archive written");
    Ok(())
}

/// Archive names always use `/`, whatever the host separator.
fn archive_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
