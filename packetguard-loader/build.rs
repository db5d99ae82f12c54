use std::path::PathBuf;
use std::process::Command;

/// Compile the BPF kernel program (`packetguard-xdp`) using `cargo +nightly
/// build` for the `bpfel-unknown-none` target.
///
/// The resulting ELF is embedded into this crate via
/// `aya::include_bytes_aligned!` in `src/attach.rs`.
///
/// Requirements: a nightly toolchain with the `rust-src` component. The
/// `rust-toolchain.toml` in `packetguard-xdp/` pins the channel.
///
/// Shelling out to a child `cargo build` for the kernel-side crate has one
/// correct shape regardless of project: resolve the sibling crate dir,
/// strip the toolchain env vars a build script inherits, build, then copy
/// the ELF into `OUT_DIR` under the env var the loader expects. The only
/// things that differ here from crate to crate are the package/dir/env
/// names, which is why this script only renames those rather than
/// restructuring the steps around them.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let manifest_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR")?);
    let xdp_dir = manifest_dir.parent().ok_or("could not find workspace root")?.join("packetguard-xdp");

    println!("cargo:rerun-if-changed={}", xdp_dir.join("src/main.rs").display());
    println!("cargo:rerun-if-changed={}", xdp_dir.join("Cargo.toml").display());

    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);
    let bpf_target_dir = out_dir.join("bpf-programs-target");

    // A build script inherits RUSTC/RUSTDOC/RUSTUP_TOOLCHAIN pointing at the
    // current (stable) toolchain; those would override the nightly selection
    // we need, so strip them before invoking the child cargo.
    let status = Command::new("cargo")
        .args(["build", "--release", "--package", "packetguard-xdp"])
        .env("CARGO_TARGET_DIR", &bpf_target_dir)
        .env_remove("RUSTC")
        .env_remove("RUSTDOC")
        .env_remove("RUSTUP_TOOLCHAIN")
        .env_remove("RUSTC_WORKSPACE_WRAPPER")
        .env_remove("RUSTC_WRAPPER")
        .current_dir(&xdp_dir)
        .status();

    match status {
        Ok(s) if s.success() => {}
        Ok(s) => {
            return Err(format!(
                "cargo build of packetguard-xdp failed (exit {:?}).\n\
                Ensure the nightly toolchain and rust-src are installed:\n\
                  rustup toolchain install nightly\n\
                  rustup component add rust-src --toolchain nightly",
                s.code()
            )
            .into());
        }
        Err(e) => return Err(format!("failed to run cargo: {e}").into()),
    }

    let bpf_bin = bpf_target_dir.join("bpfel-unknown-none/release/packetguard-xdp");
    if !bpf_bin.exists() {
        return Err(format!("BPF binary not found at {}", bpf_bin.display()).into());
    }

    let out_file = out_dir.join("packetguard.bpf.o");
    std::fs::copy(&bpf_bin, &out_file)?;
    println!("cargo:rustc-env=PACKETGUARD_BPF_OBJ={}", out_file.display());
    Ok(())
}
