//! Pinning the control-plane maps to bpffs so a short-lived CLI process can
//! mutate a running daemon's tables without holding the `Ebpf` object that
//! loaded the program. The daemon (`packetguard-cli run`) pins every map
//! right after attach; every other subcommand reopens them by path.

use std::path::{Path, PathBuf};

use aya::maps::{Array, HashMap, MapData};
use aya::Ebpf;

use packetguard_common::{Config, IcmpKey, PathStatsIndex, WhitelistKey};

use crate::error::LoaderError;

/// Every map `packetguard-xdp` declares with `#[map]`, in the order the
/// daemon should pin them.
pub const MAP_NAMES: &[&str] = &[
    "whitelist",
    "panic_flag",
    "acl_ports",
    "icmp_allow",
    "ipv4_drop",
    "ipv6_drop",
    "global_bypass",
    "cfg",
    "bypass_v4",
    "bypass_v6",
    "tcp_flow",
    "udp_flow",
    "tcp6_flow",
    "udp6_flow",
    "tcp_rate",
    "udp_rl",
    "path_stats",
    "wl_miss",
];

/// Pin every control-plane map under `dir`. Idempotent: re-running a
/// `packetguard-cli run` against the same directory re-pins over the
/// previous generation's paths.
pub fn pin_all(ebpf: &mut Ebpf, dir: &Path) -> Result<(), LoaderError> {
    std::fs::create_dir_all(dir).map_err(LoaderError::PinDir)?;
    for name in MAP_NAMES {
        let map = ebpf.map_mut(name).ok_or(LoaderError::MapNotFound(name))?;
        let data: &mut MapData = map.try_into().map_err(|_| LoaderError::MapNotFound(name))?;
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        data.pin(&path).map_err(|e| LoaderError::MapOperation(name, e))?;
    }
    Ok(())
}

/// Handle to a single pinned map, reopened by path for the lifetime of one
/// CLI invocation.
pub struct PinnedTables {
    dir: PathBuf,
}

impl PinnedTables {
    pub fn open(dir: &Path) -> Self {
        Self { dir: dir.to_path_buf() }
    }

    fn open_map(&self, name: &'static str) -> Result<MapData, LoaderError> {
        MapData::from_pin(self.dir.join(name)).map_err(|e| LoaderError::MapOpen(name, e))
    }

    pub fn whitelist_insert(&self, key: WhitelistKey) -> Result<(), LoaderError> {
        let mut map = HashMap::<_, WhitelistKey, u8>::try_from(self.open_map("whitelist")?)
            .map_err(|e| LoaderError::MapOpen("whitelist", e))?;
        map.insert(key, 1u8, 0).map_err(|e| LoaderError::MapOperation("whitelist", e))
    }

    pub fn whitelist_remove(&self, key: WhitelistKey) -> Result<(), LoaderError> {
        let mut map = HashMap::<_, WhitelistKey, u8>::try_from(self.open_map("whitelist")?)
            .map_err(|e| LoaderError::MapOpen("whitelist", e))?;
        map.remove(&key).map_err(|e| LoaderError::MapOperation("whitelist", e))
    }

    pub fn blacklist_v4_insert(&self, addr: u32) -> Result<(), LoaderError> {
        let mut map = HashMap::<_, u32, u8>::try_from(self.open_map("ipv4_drop")?)
            .map_err(|e| LoaderError::MapOpen("ipv4_drop", e))?;
        map.insert(addr, 1u8, 0).map_err(|e| LoaderError::MapOperation("ipv4_drop", e))
    }

    pub fn blacklist_v4_remove(&self, addr: u32) -> Result<(), LoaderError> {
        let mut map = HashMap::<_, u32, u8>::try_from(self.open_map("ipv4_drop")?)
            .map_err(|e| LoaderError::MapOpen("ipv4_drop", e))?;
        map.remove(&addr).map_err(|e| LoaderError::MapOperation("ipv4_drop", e))
    }

    pub fn blacklist_v6_insert(&self, addr: [u8; 16]) -> Result<(), LoaderError> {
        let mut map = HashMap::<_, [u8; 16], u8>::try_from(self.open_map("ipv6_drop")?)
            .map_err(|e| LoaderError::MapOpen("ipv6_drop", e))?;
        map.insert(addr, 1u8, 0).map_err(|e| LoaderError::MapOperation("ipv6_drop", e))
    }

    pub fn blacklist_v6_remove(&self, addr: [u8; 16]) -> Result<(), LoaderError> {
        let mut map = HashMap::<_, [u8; 16], u8>::try_from(self.open_map("ipv6_drop")?)
            .map_err(|e| LoaderError::MapOpen("ipv6_drop", e))?;
        map.remove(&addr).map_err(|e| LoaderError::MapOperation("ipv6_drop", e))
    }

    pub fn icmp_allow_insert(&self, key: IcmpKey) -> Result<(), LoaderError> {
        let mut map = HashMap::<_, IcmpKey, u8>::try_from(self.open_map("icmp_allow")?)
            .map_err(|e| LoaderError::MapOpen("icmp_allow", e))?;
        map.insert(key, 1u8, 0).map_err(|e| LoaderError::MapOperation("icmp_allow", e))
    }

    fn acl_bitmap(&self) -> Result<u64, LoaderError> {
        let map = Array::<_, u64>::try_from(self.open_map("acl_ports")?)
            .map_err(|e| LoaderError::MapOpen("acl_ports", e))?;
        map.get(&0, 0).map_err(|e| LoaderError::MapOperation("acl_ports", e))
    }

    fn set_acl_bitmap(&self, bitmap: u64) -> Result<(), LoaderError> {
        let mut map = Array::<_, u64>::try_from(self.open_map("acl_ports")?)
            .map_err(|e| LoaderError::MapOpen("acl_ports", e))?;
        map.set(0, bitmap, 0).map_err(|e| LoaderError::MapOperation("acl_ports", e))
    }

    pub fn acl_allow_port(&self, port: u16) -> Result<(), LoaderError> {
        if port >= 64 {
            return Err(LoaderError::PortOutOfRange(port));
        }
        let bitmap = self.acl_bitmap()?;
        self.set_acl_bitmap(bitmap | (1u64 << port))
    }

    pub fn acl_deny_port(&self, port: u16) -> Result<(), LoaderError> {
        if port >= 64 {
            return Err(LoaderError::PortOutOfRange(port));
        }
        let bitmap = self.acl_bitmap()?;
        self.set_acl_bitmap(bitmap & !(1u64 << port))
    }

    pub fn set_panic(&self, enabled: bool) -> Result<(), LoaderError> {
        let mut map = Array::<_, u8>::try_from(self.open_map("panic_flag")?)
            .map_err(|e| LoaderError::MapOpen("panic_flag", e))?;
        map.set(0, enabled as u8, 0).map_err(|e| LoaderError::MapOperation("panic_flag", e))
    }

    pub fn set_global_bypass(&self, enabled: bool) -> Result<(), LoaderError> {
        let mut map = Array::<_, u8>::try_from(self.open_map("global_bypass")?)
            .map_err(|e| LoaderError::MapOpen("global_bypass", e))?;
        map.set(0, enabled as u8, 0).map_err(|e| LoaderError::MapOperation("global_bypass", e))
    }

    pub fn set_config(&self, cfg: Config) -> Result<(), LoaderError> {
        let mut map = Array::<_, Config>::try_from(self.open_map("cfg")?)
            .map_err(|e| LoaderError::MapOpen("cfg", e))?;
        map.set(0, cfg, 0).map_err(|e| LoaderError::MapOperation("cfg", e))
    }

    /// Sums one `path_stats` slot across every CPU shard.
    pub fn path_stat_total(&self, idx: PathStatsIndex) -> Result<u64, LoaderError> {
        let map = aya::maps::PerCpuArray::<_, u64>::try_from(self.open_map("path_stats")?)
            .map_err(|e| LoaderError::MapOpen("path_stats", e))?;
        let values = map.get(&(idx as u32), 0).map_err(|e| LoaderError::MapOperation("path_stats", e))?;
        Ok(values.iter().sum())
    }

    pub fn whitelist_miss_total(&self) -> Result<u64, LoaderError> {
        let map = aya::maps::PerCpuArray::<_, u64>::try_from(self.open_map("wl_miss")?)
            .map_err(|e| LoaderError::MapOpen("wl_miss", e))?;
        let values = map.get(&0, 0).map_err(|e| LoaderError::MapOperation("wl_miss", e))?;
        Ok(values.iter().sum())
    }
}
