//! Loads the compiled `packetguard-xdp` program and attaches it to a
//! network interface.

use std::path::Path;

use aya::programs::{Xdp, XdpFlags};
use aya::Ebpf;
use tracing::info;

use crate::error::LoaderError;
use crate::pin;

/// Raw bytes of the compiled XDP BPF object, embedded at compile time.
/// `include_bytes_aligned!` ensures the 8-byte alignment aya's ELF parser
/// requires.
static XDP_BPF_BYTES: &[u8] = aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/packetguard.bpf.o"));

/// Owns the loaded BPF object for as long as the program should stay
/// attached; dropping it detaches the program and tears down its maps.
pub struct Attachment {
    ebpf: Ebpf,
    interface: String,
}

impl Attachment {
    pub fn load_and_attach(interface: &str) -> Result<Self, LoaderError> {
        // Lift the locked-memory limit so BPF maps can be created without
        // depending on `ulimits: memlock: -1` in the deployment environment.
        #[cfg(target_os = "linux")]
        unsafe {
            let rlim = libc::rlimit { rlim_cur: libc::RLIM_INFINITY, rlim_max: libc::RLIM_INFINITY };
            let _ = libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim);
        }

        let mut ebpf = Ebpf::load(XDP_BPF_BYTES)?;

        let program: &mut Xdp =
            ebpf.program_mut("packetguard").ok_or(LoaderError::ProgramNotFound)?.try_into().map_err(LoaderError::ProgramType)?;

        program.load().map_err(LoaderError::ProgramLoad)?;
        program.attach(interface, XdpFlags::default()).map_err(LoaderError::Attach)?;

        info!(interface, "packetguard XDP program attached");
        Ok(Self { ebpf, interface: interface.to_string() })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn ebpf(&self) -> &Ebpf {
        &self.ebpf
    }

    pub fn ebpf_mut(&mut self) -> &mut Ebpf {
        &mut self.ebpf
    }

    /// Pin every control-plane map under `dir` so `packetguard-cli`'s
    /// one-shot subcommands can reach them after this process's `Ebpf`
    /// handle goes away.
    pub fn pin_maps(&mut self, dir: &Path) -> Result<(), LoaderError> {
        pin::pin_all(&mut self.ebpf, dir)
    }
}
