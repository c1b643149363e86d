//! # recovery-pack Core Library
//!
//! This crate provides the core functionality for the `recovery-pack` build tool.
//!
//! It is designed to be used by the `recovery-pack` command-line application, but its public API
//! can also be used to programmatically write reproducible zip packages and recovery patches.
//!
//! ## Key Modules
//!
//! - [`archive`]: Deterministic zip writer (fixed timestamps, explicit permissions and compression).
//! - [`fstab`]: Parses `recovery.fstab` into mount-point lookups.
//! - [`delta`]: Binary delta codec used for recovery-from-boot patches.
//! - [`recovery`]: Chooses full vs delta, writes the artifact and `install-recovery.sh`.
//! - [`validate`]: Independently re-parses and checks `install-recovery.sh`.
//! - [`config`]: Build info (`misc_info.txt`) settings.
//!
//! ## Examples
//!
//! ```no_run
//! use recovery_pack::archive::{DeterministicZip, EntryOptions};
//!
//! let mut zip = DeterministicZip::create("package.zip".as_ref())?;
//! zip.write_bytes("META/misc_info.txt", b"fstab_version=2\n", &EntryOptions::default())?;
//! zip.close()?;
//! # Ok::<(), recovery_pack::PackError>(())
//! ```

pub mod archive;
pub mod cli;
pub mod cli_runner;
pub mod common;
pub mod config;
pub mod delta;
pub mod error;
pub mod fstab;
pub mod recovery;
pub mod validate;

pub use error::PackError;
