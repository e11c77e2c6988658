use std::fs::{create_dir_all, remove_file};
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::{env, io};

fn main() {
    check_command_exists("xorriso");
    check_command_exists("limine");
    // This is the folder where a build script (this file) should place its output
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    // This is the `runner` folder
    let runner_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    // This folder contains Limine files such as `BOOTX64.EFI`
    let limine_dir = match env::var("LIMINE_PATH") {
        Ok(path) => PathBuf::from(path),
        Err(_) => panic!(
            "LIMINE_PATH environment variable not set. Please set it to the Limine directory."
        ),
    };

    // Assemble the ISO tree from symlinks to avoid copying large binaries
    let iso_dir = out_dir.join("iso_root");
    create_dir_all(&iso_dir).unwrap();

    let limine_conf = iso_dir.join("limine.conf");
    ensure_symlink(runner_dir.join("limine.conf"), limine_conf).unwrap();

    let boot_dir = iso_dir.join("boot");
    create_dir_all(&boot_dir).unwrap();

    // The `kernel_test` feature swaps the kernel image for the test image
    let kernel_executable_file = if env::var("CARGO_FEATURE_KERNEL_TEST").is_ok() {
        env::var("CARGO_BIN_FILE_TESTS").expect("tests bin not built")
    } else {
        env::var("CARGO_BIN_FILE_KERNEL").expect("kernel bin not built")
    };
    ensure_symlink(&kernel_executable_file, iso_dir.join("kernel")).unwrap();

    // AWM rides along as a boot module the kernel spawns as a task
    let awm_executable_file = env::var("CARGO_BIN_FILE_AWM").expect("awm bin not built");
    ensure_symlink(awm_executable_file, iso_dir.join("awm")).unwrap();

    // Copy files from the Limine package into `boot/limine`
    let out_limine_dir = boot_dir.join("limine");
    create_dir_all(&out_limine_dir).unwrap();
    for path in ["limine-bios.sys", "limine-bios-cd.bin", "limine-uefi-cd.bin"] {
        ensure_symlink(limine_dir.join(path), out_limine_dir.join(path)).unwrap();
    }

    // EFI/BOOT/BOOTX64.EFI is the executable loaded by UEFI firmware.
    // BOOTIA32.EFI comes along because xorriso complains if it's missing.
    let efi_boot_dir = iso_dir.join("EFI/BOOT");
    create_dir_all(&efi_boot_dir).unwrap();
    for efi_file in ["BOOTX64.EFI", "BOOTIA32.EFI"] {
        ensure_symlink(limine_dir.join(efi_file), efi_boot_dir.join(efi_file)).unwrap();
    }

    let output_iso = out_dir.join("os.iso");
    // Create the ISO; symlink contents are followed into the image
    let status = std::process::Command::new("xorriso")
        .arg("-as")
        .arg("mkisofs")
        .arg("--follow-links")
        .arg("-b")
        .arg(
            out_limine_dir
                .join("limine-bios-cd.bin")
                .strip_prefix(&iso_dir)
                .unwrap(),
        )
        .arg("-no-emul-boot")
        .arg("-boot-load-size")
        .arg("4")
        .arg("-boot-info-table")
        .arg("--efi-boot")
        .arg(
            out_limine_dir
                .join("limine-uefi-cd.bin")
                .strip_prefix(&iso_dir)
                .unwrap(),
        )
        .arg("-efi-boot-part")
        .arg("--efi-boot-image")
        .arg("--protective-msdos-label")
        .arg(iso_dir)
        .arg("-o")
        .arg(&output_iso)
        .stderr(Stdio::inherit())
        .stdout(Stdio::inherit())
        .status()
        .unwrap();
    assert!(status.success());

    // Required for a hybrid ISO that boots on both BIOS and UEFI
    let status = std::process::Command::new("limine")
        .arg("bios-install")
        .arg(&output_iso)
        .stderr(Stdio::inherit())
        .stdout(Stdio::inherit())
        .status()
        .unwrap();
    assert!(status.success());

    let output_iso = output_iso.display();
    println!("cargo:rustc-env=ISO={output_iso}");
}

pub fn ensure_symlink<P: AsRef<Path>, Q: AsRef<Path>>(original: P, link: Q) -> io::Result<()> {
    match remove_file(&link) {
        Ok(()) => Ok(()),
        Err(error) => match error.kind() {
            ErrorKind::NotFound => Ok(()),
            _ => Err(error),
        },
    }?;
    symlink(original, link)?;
    Ok(())
}

fn check_command_exists(cmd: &str) {
    if std::process::Command::new(cmd)
        .arg("--version")
        .output()
        .is_err()
    {
        panic!("Command '{}' not found. Please install it.", cmd);
    }
}
