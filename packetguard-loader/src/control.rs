//! [`Tables`] backed by the real BPF maps the attached XDP program reads
//! and writes. This is what the CLI uses to add whitelist/blacklist
//! entries, flip the panic switch, and read counters; it also lets
//! `packetguard_core::classify` run against live maps for parity checks,
//! even though production traffic is classified by the kernel program
//! itself.
//!
//! Every method logs and falls back to a safe default on a map error
//! instead of propagating one — [`Tables`] has no `Result` in its
//! signature, the same tradeoff the simulation makes by construction.

use aya::maps::{Array, HashMap, LruHashMap, Map, PerCpuArray};
use aya::Ebpf;
use tracing::warn;

use packetguard_common::{
    BypassRecordV4, BypassRecordV6, Config, FiveTupleV4, FiveTupleV6, IcmpKey, PathStatsIndex, RateKey,
    TcpRateState, UdpRateState, WhitelistKey,
};
use packetguard_core::Tables;

pub struct Control<'a> {
    ebpf: &'a mut Ebpf,
}

impl<'a> Control<'a> {
    pub fn new(ebpf: &'a mut Ebpf) -> Self {
        Self { ebpf }
    }

    fn map_data(&self, name: &'static str) -> Option<&Map> {
        let m = self.ebpf.map(name);
        if m.is_none() {
            warn!(map = name, "map not found");
        }
        m
    }

    fn map_data_mut(&mut self, name: &'static str) -> Option<&mut Map> {
        let m = self.ebpf.map_mut(name);
        if m.is_none() {
            warn!(map = name, "map not found");
        }
        m
    }

    pub fn whitelist_insert(&mut self, key: WhitelistKey) {
        if let Some(data) = self.map_data_mut("whitelist") {
            if let Ok(mut map) = HashMap::<_, WhitelistKey, u8>::try_from(data) {
                if let Err(e) = map.insert(key, 1u8, 0) {
                    warn!(error = %e, "whitelist insert failed");
                }
            }
        }
    }

    pub fn whitelist_remove(&mut self, key: WhitelistKey) {
        if let Some(data) = self.map_data_mut("whitelist") {
            if let Ok(mut map) = HashMap::<_, WhitelistKey, u8>::try_from(data) {
                let _ = map.remove(&key);
            }
        }
    }

    pub fn blacklist_v4_insert(&mut self, addr: u32) {
        if let Some(data) = self.map_data_mut("ipv4_drop") {
            if let Ok(mut map) = HashMap::<_, u32, u8>::try_from(data) {
                let _ = map.insert(addr, 1u8, 0);
            }
        }
    }

    pub fn blacklist_v4_remove(&mut self, addr: u32) {
        if let Some(data) = self.map_data_mut("ipv4_drop") {
            if let Ok(mut map) = HashMap::<_, u32, u8>::try_from(data) {
                let _ = map.remove(&addr);
            }
        }
    }

    pub fn blacklist_v6_insert(&mut self, addr: [u8; 16]) {
        if let Some(data) = self.map_data_mut("ipv6_drop") {
            if let Ok(mut map) = HashMap::<_, [u8; 16], u8>::try_from(data) {
                let _ = map.insert(addr, 1u8, 0);
            }
        }
    }

    pub fn blacklist_v6_remove(&mut self, addr: [u8; 16]) {
        if let Some(data) = self.map_data_mut("ipv6_drop") {
            if let Ok(mut map) = HashMap::<_, [u8; 16], u8>::try_from(data) {
                let _ = map.remove(&addr);
            }
        }
    }

    pub fn acl_allow_port(&mut self, port: u16) {
        if port >= 64 {
            warn!(port, "ACL port bitmap only covers ports 0..64");
            return;
        }
        let current = self.acl_port_bitmap();
        self.set_acl_port_bitmap(current | (1u64 << port));
    }

    pub fn acl_deny_port(&mut self, port: u16) {
        if port >= 64 {
            return;
        }
        let current = self.acl_port_bitmap();
        self.set_acl_port_bitmap(current & !(1u64 << port));
    }

    fn set_acl_port_bitmap(&mut self, bitmap: u64) {
        if let Some(data) = self.map_data_mut("acl_ports") {
            if let Ok(mut map) = Array::<_, u64>::try_from(data) {
                let _ = map.set(0, bitmap, 0);
            }
        }
    }

    pub fn icmp_allow_insert(&mut self, key: IcmpKey) {
        if let Some(data) = self.map_data_mut("icmp_allow") {
            if let Ok(mut map) = HashMap::<_, IcmpKey, u8>::try_from(data) {
                let _ = map.insert(key, 1u8, 0);
            }
        }
    }

    pub fn set_panic(&mut self, enabled: bool) {
        if let Some(data) = self.map_data_mut("panic_flag") {
            if let Ok(mut map) = Array::<_, u8>::try_from(data) {
                let _ = map.set(0, enabled as u8, 0);
            }
        }
    }

    pub fn set_global_bypass(&mut self, enabled: bool) {
        if let Some(data) = self.map_data_mut("global_bypass") {
            if let Ok(mut map) = Array::<_, u8>::try_from(data) {
                let _ = map.set(0, enabled as u8, 0);
            }
        }
    }

    pub fn set_config(&mut self, cfg: Config) {
        if let Some(data) = self.map_data_mut("cfg") {
            if let Ok(mut map) = Array::<_, Config>::try_from(data) {
                let _ = map.set(0, cfg, 0);
            }
        }
    }

    /// Sums `path_stats[idx]` across every CPU shard.
    pub fn path_stat_total(&self, idx: PathStatsIndex) -> u64 {
        let Some(data) = self.map_data("path_stats") else { return 0 };
        let Ok(map) = PerCpuArray::<_, u64>::try_from(data) else { return 0 };
        match map.get(&(idx as u32), 0) {
            Ok(values) => values.iter().sum(),
            Err(e) => {
                warn!(error = %e, "path_stats read failed");
                0
            }
        }
    }

    pub fn whitelist_miss_total(&self) -> u64 {
        let Some(data) = self.map_data("wl_miss") else { return 0 };
        let Ok(map) = PerCpuArray::<_, u64>::try_from(data) else { return 0 };
        match map.get(&0, 0) {
            Ok(values) => values.iter().sum(),
            Err(e) => {
                warn!(error = %e, "wl_miss read failed");
                0
            }
        }
    }
}

impl<'a> Tables for Control<'a> {
    fn whitelist_contains(&self, key: WhitelistKey) -> bool {
        let Some(data) = self.map_data("whitelist") else { return false };
        let Ok(map) = HashMap::<_, WhitelistKey, u8>::try_from(data) else { return false };
        map.get(&key, 0).is_ok()
    }

    fn panic_enabled(&self) -> bool {
        let Some(data) = self.map_data("panic_flag") else { return false };
        let Ok(map) = Array::<_, u8>::try_from(data) else { return false };
        map.get(&0, 0).unwrap_or(0) != 0
    }

    fn acl_port_bitmap(&self) -> u64 {
        let Some(data) = self.map_data("acl_ports") else { return 0 };
        let Ok(map) = Array::<_, u64>::try_from(data) else { return 0 };
        map.get(&0, 0).unwrap_or(0)
    }

    fn icmp_allowed(&self, key: IcmpKey) -> bool {
        let Some(data) = self.map_data("icmp_allow") else { return false };
        let Ok(map) = HashMap::<_, IcmpKey, u8>::try_from(data) else { return false };
        map.get(&key, 0).is_ok()
    }

    fn ipv4_blacklisted(&self, addr: u32) -> bool {
        let Some(data) = self.map_data("ipv4_drop") else { return false };
        let Ok(map) = HashMap::<_, u32, u8>::try_from(data) else { return false };
        map.get(&addr, 0).is_ok()
    }

    fn ipv6_blacklisted(&self, addr: [u8; 16]) -> bool {
        let Some(data) = self.map_data("ipv6_drop") else { return false };
        let Ok(map) = HashMap::<_, [u8; 16], u8>::try_from(data) else { return false };
        map.get(&addr, 0).is_ok()
    }

    fn global_bypass_enabled(&self) -> bool {
        let Some(data) = self.map_data("global_bypass") else { return false };
        let Ok(map) = Array::<_, u8>::try_from(data) else { return false };
        map.get(&0, 0).unwrap_or(0) != 0
    }

    fn config(&self) -> Option<Config> {
        let data = self.map_data("cfg")?;
        let map = Array::<_, Config>::try_from(data).ok()?;
        map.get(&0, 0).ok()
    }

    fn bypass_v4_at(&self, idx: u32) -> Option<BypassRecordV4> {
        let data = self.map_data("bypass_v4")?;
        let map = Array::<_, BypassRecordV4>::try_from(data).ok()?;
        map.get(&idx, 0).ok()
    }

    fn bypass_v4_clear(&mut self, idx: u32) {
        if let Some(data) = self.map_data_mut("bypass_v4") {
            if let Ok(mut map) = Array::<_, BypassRecordV4>::try_from(data) {
                let _ = map.set(idx, BypassRecordV4::default(), 0);
            }
        }
    }

    fn bypass_v6_at(&self, idx: u32) -> Option<BypassRecordV6> {
        let data = self.map_data("bypass_v6")?;
        let map = Array::<_, BypassRecordV6>::try_from(data).ok()?;
        map.get(&idx, 0).ok()
    }

    fn bypass_v6_clear(&mut self, idx: u32) {
        if let Some(data) = self.map_data_mut("bypass_v6") {
            if let Ok(mut map) = Array::<_, BypassRecordV6>::try_from(data) {
                let _ = map.set(idx, BypassRecordV6::default(), 0);
            }
        }
    }

    fn tcp_flow_get(&mut self, key: &FiveTupleV4) -> Option<u64> {
        let data = self.map_data("tcp_flow")?;
        let map = LruHashMap::<_, FiveTupleV4, u64>::try_from(data).ok()?;
        map.get(key, 0).ok()
    }

    fn tcp_flow_insert(&mut self, key: FiveTupleV4, ts: u64) {
        if let Some(data) = self.map_data_mut("tcp_flow") {
            if let Ok(mut map) = LruHashMap::<_, FiveTupleV4, u64>::try_from(data) {
                let _ = map.insert(key, ts, 0);
            }
        }
    }

    fn tcp_flow_delete(&mut self, key: &FiveTupleV4) {
        if let Some(data) = self.map_data_mut("tcp_flow") {
            if let Ok(mut map) = LruHashMap::<_, FiveTupleV4, u64>::try_from(data) {
                let _ = map.remove(key);
            }
        }
    }

    fn udp_flow_get(&mut self, key: &FiveTupleV4) -> Option<u64> {
        let data = self.map_data("udp_flow")?;
        let map = LruHashMap::<_, FiveTupleV4, u64>::try_from(data).ok()?;
        map.get(key, 0).ok()
    }

    fn udp_flow_insert(&mut self, key: FiveTupleV4, ts: u64) {
        if let Some(data) = self.map_data_mut("udp_flow") {
            if let Ok(mut map) = LruHashMap::<_, FiveTupleV4, u64>::try_from(data) {
                let _ = map.insert(key, ts, 0);
            }
        }
    }

    fn tcp6_flow_get(&mut self, key: &FiveTupleV6) -> Option<u64> {
        let data = self.map_data("tcp6_flow")?;
        let map = LruHashMap::<_, FiveTupleV6, u64>::try_from(data).ok()?;
        map.get(key, 0).ok()
    }

    fn tcp6_flow_insert(&mut self, key: FiveTupleV6, ts: u64) {
        if let Some(data) = self.map_data_mut("tcp6_flow") {
            if let Ok(mut map) = LruHashMap::<_, FiveTupleV6, u64>::try_from(data) {
                let _ = map.insert(key, ts, 0);
            }
        }
    }

    fn tcp6_flow_delete(&mut self, key: &FiveTupleV6) {
        if let Some(data) = self.map_data_mut("tcp6_flow") {
            if let Ok(mut map) = LruHashMap::<_, FiveTupleV6, u64>::try_from(data) {
                let _ = map.remove(key);
            }
        }
    }

    fn udp6_flow_get(&mut self, key: &FiveTupleV6) -> Option<u64> {
        let data = self.map_data("udp6_flow")?;
        let map = LruHashMap::<_, FiveTupleV6, u64>::try_from(data).ok()?;
        map.get(key, 0).ok()
    }

    fn udp6_flow_insert(&mut self, key: FiveTupleV6, ts: u64) {
        if let Some(data) = self.map_data_mut("udp6_flow") {
            if let Ok(mut map) = LruHashMap::<_, FiveTupleV6, u64>::try_from(data) {
                let _ = map.insert(key, ts, 0);
            }
        }
    }

    fn tcp_rate_get(&mut self, key: &RateKey) -> Option<TcpRateState> {
        let data = self.map_data("tcp_rate")?;
        let map = LruHashMap::<_, RateKey, TcpRateState>::try_from(data).ok()?;
        map.get(key, 0).ok()
    }

    fn tcp_rate_put(&mut self, key: RateKey, state: TcpRateState) {
        if let Some(data) = self.map_data_mut("tcp_rate") {
            if let Ok(mut map) = LruHashMap::<_, RateKey, TcpRateState>::try_from(data) {
                let _ = map.insert(key, state, 0);
            }
        }
    }

    fn udp_rl_get(&mut self, key: &RateKey) -> Option<UdpRateState> {
        let data = self.map_data("udp_rl")?;
        let map = LruHashMap::<_, RateKey, UdpRateState>::try_from(data).ok()?;
        map.get(key, 0).ok()
    }

    fn udp_rl_put(&mut self, key: RateKey, state: UdpRateState) {
        if let Some(data) = self.map_data_mut("udp_rl") {
            if let Ok(mut map) = LruHashMap::<_, RateKey, UdpRateState>::try_from(data) {
                let _ = map.insert(key, state, 0);
            }
        }
    }

    fn incr_fast_path(&mut self) {
        // Written by the kernel program; the loader never needs to bump it.
    }

    fn incr_slow_path(&mut self) {
        // Written by the kernel program; the loader never needs to bump it.
    }

    fn incr_whitelist_miss(&mut self) {
        // Written by the kernel program; the loader never needs to bump it.
    }
}
