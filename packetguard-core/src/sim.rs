//! In-memory [`Tables`] implementation. Used by the test suite in this
//! crate and, via `packetguard-loader`, as the backend for a software-only
//! run mode on platforms without XDP.

use std::collections::HashSet;
use std::num::NonZeroUsize;

use lru::LruCache;
use packetguard_common::constants::{FLOW_TAB_SZ, TCP_FLOW_CAP, TCP_RATE_CAP, TCP6_FLOW_CAP, UDP_FLOW_CAP, UDP_RL_CAP, UDP6_FLOW_CAP};
use packetguard_common::{
    BypassRecordV4, BypassRecordV6, Config, FiveTupleV4, FiveTupleV6, IcmpKey, RateKey,
    TcpRateState, UdpRateState, WhitelistKey,
};

use crate::tables::Tables;

fn cache<K: std::hash::Hash + Eq, V>(cap: u32) -> LruCache<K, V> {
    LruCache::new(NonZeroUsize::new(cap as usize).expect("capacity is a nonzero constant"))
}

pub struct SimTables {
    whitelist: HashSet<WhitelistKey>,
    panic: bool,
    acl_ports: u64,
    icmp_allow: HashSet<IcmpKey>,
    ipv4_drop: HashSet<u32>,
    ipv6_drop: HashSet<[u8; 16]>,
    global_bypass: bool,
    cfg: Option<Config>,

    bypass_v4: Box<[Option<BypassRecordV4>]>,
    bypass_v6: Box<[Option<BypassRecordV6>]>,

    tcp_flow: LruCache<FiveTupleV4, u64>,
    udp_flow: LruCache<FiveTupleV4, u64>,
    tcp6_flow: LruCache<FiveTupleV6, u64>,
    udp6_flow: LruCache<FiveTupleV6, u64>,

    tcp_rate: LruCache<RateKey, TcpRateState>,
    udp_rl: LruCache<RateKey, UdpRateState>,

    fast_path: u64,
    slow_path: u64,
    whitelist_miss: u64,
}

impl Default for SimTables {
    fn default() -> Self {
        Self {
            whitelist: HashSet::new(),
            panic: false,
            acl_ports: 0,
            icmp_allow: HashSet::new(),
            ipv4_drop: HashSet::new(),
            ipv6_drop: HashSet::new(),
            global_bypass: false,
            cfg: None,
            bypass_v4: vec![None; FLOW_TAB_SZ as usize].into_boxed_slice(),
            bypass_v6: vec![None; FLOW_TAB_SZ as usize].into_boxed_slice(),
            tcp_flow: cache(TCP_FLOW_CAP),
            udp_flow: cache(UDP_FLOW_CAP),
            tcp6_flow: cache(TCP6_FLOW_CAP),
            udp6_flow: cache(UDP6_FLOW_CAP),
            tcp_rate: cache(TCP_RATE_CAP),
            udp_rl: cache(UDP_RL_CAP),
            fast_path: 0,
            slow_path: 0,
            whitelist_miss: 0,
        }
    }
}

impl SimTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn whitelist_add(&mut self, key: WhitelistKey) {
        self.whitelist.insert(key);
    }

    pub fn whitelist_remove(&mut self, key: &WhitelistKey) {
        self.whitelist.remove(key);
    }

    pub fn set_panic(&mut self, enabled: bool) {
        self.panic = enabled;
    }

    pub fn set_acl_port_bitmap(&mut self, bitmap: u64) {
        self.acl_ports = bitmap;
    }

    pub fn icmp_allow_add(&mut self, key: IcmpKey) {
        self.icmp_allow.insert(key);
    }

    pub fn blacklist_v4_add(&mut self, addr: u32) {
        self.ipv4_drop.insert(addr);
    }

    pub fn blacklist_v6_add(&mut self, addr: [u8; 16]) {
        self.ipv6_drop.insert(addr);
    }

    pub fn set_global_bypass(&mut self, enabled: bool) {
        self.global_bypass = enabled;
    }

    pub fn set_config(&mut self, cfg: Config) {
        self.cfg = Some(cfg);
    }

    pub fn install_bypass_v4(&mut self, idx: u32, record: BypassRecordV4) {
        self.bypass_v4[idx as usize] = Some(record);
    }

    pub fn install_bypass_v6(&mut self, idx: u32, record: BypassRecordV6) {
        self.bypass_v6[idx as usize] = Some(record);
    }

    pub fn fast_path_count(&self) -> u64 {
        self.fast_path
    }

    pub fn slow_path_count(&self) -> u64 {
        self.slow_path
    }

    pub fn whitelist_miss_count(&self) -> u64 {
        self.whitelist_miss
    }
}

impl Tables for SimTables {
    fn whitelist_contains(&self, key: WhitelistKey) -> bool {
        self.whitelist.contains(&key)
    }

    fn panic_enabled(&self) -> bool {
        self.panic
    }

    fn acl_port_bitmap(&self) -> u64 {
        self.acl_ports
    }

    fn icmp_allowed(&self, key: IcmpKey) -> bool {
        self.icmp_allow.contains(&key)
    }

    fn ipv4_blacklisted(&self, addr: u32) -> bool {
        self.ipv4_drop.contains(&addr)
    }

    fn ipv6_blacklisted(&self, addr: [u8; 16]) -> bool {
        self.ipv6_drop.contains(&addr)
    }

    fn global_bypass_enabled(&self) -> bool {
        self.global_bypass
    }

    fn config(&self) -> Option<Config> {
        self.cfg
    }

    fn bypass_v4_at(&self, idx: u32) -> Option<BypassRecordV4> {
        self.bypass_v4[idx as usize]
    }

    fn bypass_v4_clear(&mut self, idx: u32) {
        self.bypass_v4[idx as usize] = None;
    }

    fn bypass_v6_at(&self, idx: u32) -> Option<BypassRecordV6> {
        self.bypass_v6[idx as usize]
    }

    fn bypass_v6_clear(&mut self, idx: u32) {
        self.bypass_v6[idx as usize] = None;
    }

    fn tcp_flow_get(&mut self, key: &FiveTupleV4) -> Option<u64> {
        self.tcp_flow.get(key).copied()
    }

    fn tcp_flow_insert(&mut self, key: FiveTupleV4, ts: u64) {
        self.tcp_flow.put(key, ts);
    }

    fn tcp_flow_delete(&mut self, key: &FiveTupleV4) {
        self.tcp_flow.pop(key);
    }

    fn udp_flow_get(&mut self, key: &FiveTupleV4) -> Option<u64> {
        self.udp_flow.get(key).copied()
    }

    fn udp_flow_insert(&mut self, key: FiveTupleV4, ts: u64) {
        self.udp_flow.put(key, ts);
    }

    fn tcp6_flow_get(&mut self, key: &FiveTupleV6) -> Option<u64> {
        self.tcp6_flow.get(key).copied()
    }

    fn tcp6_flow_insert(&mut self, key: FiveTupleV6, ts: u64) {
        self.tcp6_flow.put(key, ts);
    }

    fn tcp6_flow_delete(&mut self, key: &FiveTupleV6) {
        self.tcp6_flow.pop(key);
    }

    fn udp6_flow_get(&mut self, key: &FiveTupleV6) -> Option<u64> {
        self.udp6_flow.get(key).copied()
    }

    fn udp6_flow_insert(&mut self, key: FiveTupleV6, ts: u64) {
        self.udp6_flow.put(key, ts);
    }

    fn tcp_rate_get(&mut self, key: &RateKey) -> Option<TcpRateState> {
        self.tcp_rate.get(key).copied()
    }

    fn tcp_rate_put(&mut self, key: RateKey, state: TcpRateState) {
        self.tcp_rate.put(key, state);
    }

    fn udp_rl_get(&mut self, key: &RateKey) -> Option<UdpRateState> {
        self.udp_rl.get(key).copied()
    }

    fn udp_rl_put(&mut self, key: RateKey, state: UdpRateState) {
        self.udp_rl.put(key, state);
    }

    fn incr_fast_path(&mut self) {
        self.fast_path += 1;
    }

    fn incr_slow_path(&mut self) {
        self.slow_path += 1;
    }

    fn incr_whitelist_miss(&mut self) {
        self.whitelist_miss += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tables_have_empty_bypass_cache() {
        let t = SimTables::new();
        assert!(t.bypass_v4_at(0).is_none());
        assert!(t.bypass_v6_at(0).is_none());
    }

    #[test]
    fn whitelist_add_then_contains() {
        let mut t = SimTables::new();
        let key = WhitelistKey::v4([10, 0, 0, 1]);
        assert!(!t.whitelist_contains(key));
        t.whitelist_add(key);
        assert!(t.whitelist_contains(key));
    }
}
