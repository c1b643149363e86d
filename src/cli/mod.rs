use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::archive::Compression;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Write files into a reproducible zip archive.
    #[command(alias = "p")]
    Pack {
        /// Input files, written in the order given.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// The path for the output archive (e.g., target_files.zip).
        #[arg(short, long)]
        output: PathBuf,

        /// Compression method for every entry.
        #[arg(long, value_enum, default_value_t = CompressArg::Stored)]
        compress: CompressArg,

        /// Octal permission bits for every entry (e.g. 755). Defaults to 644.
        #[arg(long, value_parser = parse_mode)]
        perms: Option<u32>,

        /// Strip this directory prefix from input paths to form archive names.
        #[arg(long)]
        strip_prefix: Option<PathBuf>,
    },

    /// Generate the recovery artifact and install-recovery.sh from boot and recovery images.
    #[command(alias = "r")]
    RecoveryPatch {
        /// Boot image (the patch source).
        #[arg(long)]
        boot: PathBuf,

        /// Recovery image (the patch target).
        #[arg(long)]
        recovery: PathBuf,

        /// recovery.fstab describing /boot and /recovery.
        #[arg(long)]
        fstab: PathBuf,

        /// Package root; artifacts land under <output>/SYSTEM.
        #[arg(short, long)]
        output: PathBuf,

        /// Build info file (misc_info.txt).
        #[arg(long)]
        misc_info: Option<PathBuf>,

        /// Ship the recovery image in full instead of as a patch.
        #[arg(long)]
        full: bool,

        /// Print a JSON summary to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Check <input>/SYSTEM/bin/install-recovery.sh against the package contents.
    #[command(alias = "v")]
    Validate {
        /// Package root containing SYSTEM/ and IMAGES/.
        #[arg(short, long)]
        input: PathBuf,

        /// recovery.fstab describing /boot and /recovery.
        #[arg(long)]
        fstab: PathBuf,
    },

    /// Apply a recovery-from-boot patch to a boot image.
    ApplyPatch {
        #[arg(long)]
        source: PathBuf,

        #[arg(long)]
        patch: PathBuf,

        /// Bonus resource the patch was generated with.
        #[arg(long)]
        bonus: Option<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Compression method selectable from the command line.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompressArg {
    /// No compression.
    Stored,
    /// Deflate.
    Deflated,
}

impl From<CompressArg> for Compression {
    fn from(arg: CompressArg) -> Self {
        match arg {
            CompressArg::Stored => Compression::Stored,
            CompressArg::Deflated => Compression::Deflated,
        }
    }
}

fn parse_mode(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0o");
    let mode = u32::from_str_radix(digits, 8).map_err(|e| format!("invalid octal mode '{s}': {e}"))?;
    if mode > 0o777 {
        return Err(format!("mode '{s}' has bits outside 0777"));
    }
    Ok(mode)
}

/// Parses command-line arguments using `clap`.
pub fn run() -> Result<Args, Box<dyn std::error::Error>> {
    Ok(Args::try_parse()?)
}
