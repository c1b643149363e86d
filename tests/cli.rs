use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

const FSTAB: &str = "\
# recovery partitions
/dev/soc.0/by-name/boot /boot emmc defaults defaults
/dev/soc.0/by-name/recovery /recovery emmc defaults defaults
";

fn boot_image() -> Vec<u8> {
    (0..8192u32).map(|i| (i * 31 % 253) as u8).collect()
}

fn recovery_image() -> Vec<u8> {
    let mut data = boot_image();
    data[100..116].copy_from_slice(b"recovery ramdisk");
    data.extend_from_slice(b"extra recovery resources");
    data
}

/// Lays out boot.img, recovery.img and recovery.fstab in `dir`.
fn write_inputs(dir: &Path) {
    fs::write(dir.join("boot.img"), boot_image()).unwrap();
    fs::write(dir.join("recovery.img"), recovery_image()).unwrap();
    fs::write(dir.join("recovery.fstab"), FSTAB).unwrap();
}

#[test]
fn test_cli_pack_is_reproducible() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Setup: a small tree of input files
    let source_dir = tempdir()?;
    let nested_dir = source_dir.path().join("META");
    fs::create_dir(&nested_dir)?;
    let file1_path = source_dir.path().join("file1.txt");
    let nested_file_path = nested_dir.join("misc_info.txt");
    fs::write(&file1_path, "Hello, this is the first file.\n")?;
    fs::write(&nested_file_path, "fstab_version=2\n")?;

    let out_dir = tempdir()?;
    let first = out_dir.path().join("first.zip");
    let second = out_dir.path().join("second.zip");

    // 2. Pack the same inputs twice
    for archive in [&first, &second] {
        let mut cmd = Command::cargo_bin("recovery-pack")?;
        cmd.arg("pack")
            .arg("--output")
            .arg(archive)
            .arg("--compress")
            .arg("deflated")
            .arg("--perms")
            .arg("600")
            .arg("--strip-prefix")
            .arg(source_dir.path())
            .arg(&file1_path)
            .arg(&nested_file_path);
        cmd.assert().success();
    }

    // 3. Same bytes, expected names and metadata
    assert_eq!(fs::read(&first)?, fs::read(&second)?);

    let mut archive = zip::ZipArchive::new(fs::File::open(&first)?)?;
    assert_eq!(archive.len(), 2);
    let mut entry = archive.by_name("META/misc_info.txt")?;
    assert_eq!(entry.unix_mode().map(|m| m & 0o777), Some(0o600));
    assert_eq!(entry.compression(), zip::CompressionMethod::Deflated);
    let mut contents = String::new();
    entry.read_to_string(&mut contents)?;
    assert_eq!(contents, "fstab_version=2\n");
    drop(entry);
    assert!(archive.by_name("file1.txt").is_ok());

    Ok(())
}

#[test]
fn test_cli_recovery_patch_validate_apply_cycle() -> Result<(), Box<dyn std::error::Error>> {
    let inputs = tempdir()?;
    write_inputs(inputs.path());
    let package = tempdir()?;

    // 1. Generate the delta and the install script
    let mut cmd = Command::cargo_bin("recovery-pack")?;
    cmd.arg("recovery-patch")
        .arg("--boot")
        .arg(inputs.path().join("boot.img"))
        .arg("--recovery")
        .arg(inputs.path().join("recovery.img"))
        .arg("--fstab")
        .arg(inputs.path().join("recovery.fstab"))
        .arg("-o")
        .arg(package.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("patch SYSTEM/recovery-from-boot.p"));

    let patch_path = package.path().join("SYSTEM/recovery-from-boot.p");
    assert!(patch_path.exists());
    let script = fs::read_to_string(package.path().join("SYSTEM/bin/install-recovery.sh"))?;
    assert!(script.contains("RECOVERY_STRATEGY=patch"));

    // 2. Validate it against staged images
    let images = package.path().join("IMAGES");
    fs::create_dir_all(&images)?;
    fs::copy(inputs.path().join("boot.img"), images.join("boot.img"))?;
    fs::copy(inputs.path().join("recovery.img"), images.join("recovery.img"))?;

    let mut cmd = Command::cargo_bin("recovery-pack")?;
    cmd.arg("validate")
        .arg("--input")
        .arg(package.path())
        .arg("--fstab")
        .arg(inputs.path().join("recovery.fstab"));
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("OK patch /system/recovery-from-boot.p"));

    // 3. Rebuild recovery from boot with the shipped patch
    let rebuilt = inputs.path().join("rebuilt.img");
    let mut cmd = Command::cargo_bin("recovery-pack")?;
    cmd.arg("apply-patch")
        .arg("--source")
        .arg(inputs.path().join("boot.img"))
        .arg("--patch")
        .arg(&patch_path)
        .arg("-o")
        .arg(&rebuilt);
    cmd.assert().success();
    assert_eq!(fs::read(&rebuilt)?, recovery_image());

    Ok(())
}

#[test]
fn test_cli_full_recovery_from_misc_info() -> Result<(), Box<dyn std::error::Error>> {
    let inputs = tempdir()?;
    write_inputs(inputs.path());
    let misc_info = inputs.path().join("misc_info.txt");
    fs::write(&misc_info, "fstab_version=2\nfull_recovery_image=true\n")?;
    let package = tempdir()?;

    let mut cmd = Command::cargo_bin("recovery-pack")?;
    cmd.arg("recovery-patch")
        .arg("--boot")
        .arg(inputs.path().join("boot.img"))
        .arg("--recovery")
        .arg(inputs.path().join("recovery.img"))
        .arg("--fstab")
        .arg(inputs.path().join("recovery.fstab"))
        .arg("--misc-info")
        .arg(&misc_info)
        .arg("--json")
        .arg("-o")
        .arg(package.path());
    let output = cmd.output()?;
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(summary["strategy"], "full");
    assert_eq!(summary["artifact_path"], "etc/recovery.img");
    assert_eq!(fs::read(package.path().join("SYSTEM/etc/recovery.img"))?, recovery_image());

    Ok(())
}

#[test]
fn test_cli_empty_recovery_image_fails() -> Result<(), Box<dyn std::error::Error>> {
    let inputs = tempdir()?;
    write_inputs(inputs.path());
    fs::write(inputs.path().join("recovery.img"), b"")?;
    let package = tempdir()?;

    let mut cmd = Command::cargo_bin("recovery-pack")?;
    cmd.arg("recovery-patch")
        .arg("--boot")
        .arg(inputs.path().join("boot.img"))
        .arg("--recovery")
        .arg(inputs.path().join("recovery.img"))
        .arg("--fstab")
        .arg(inputs.path().join("recovery.fstab"))
        .arg("-o")
        .arg(package.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("missing recovery image"));

    // Nothing was staged.
    assert!(!package.path().join("SYSTEM").exists());
    Ok(())
}

#[test]
fn test_cli_rejects_bad_mode() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let mut cmd = Command::cargo_bin("recovery-pack")?;
    cmd.arg("pack")
        .arg("-o")
        .arg(dir.path().join("out.zip"))
        .arg("--perms")
        .arg("9999")
        .arg("whatever.txt");
    cmd.assert().failure().stderr(predicate::str::contains("invalid octal mode"));
    Ok(())
}
