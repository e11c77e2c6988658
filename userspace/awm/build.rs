use std::path::PathBuf;

fn main() {
    // Only the ELF shipped to the kernel needs the fixed-base layout; host
    // builds (unit tests) link normally.
    let target = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target == "none" {
        let dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
        let linker_file = PathBuf::from(dir).join("linker.ld");
        let linker_file = linker_file.to_str().unwrap();
        println!("cargo:rustc-link-arg=-T{linker_file}");
        println!("cargo:rerun-if-changed={linker_file}");
    }
}
