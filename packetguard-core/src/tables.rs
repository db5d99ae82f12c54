//! The storage interface the classification pipeline runs against. One
//! implementation (`sim`) lives here for tests and software-only operation;
//! `packetguard-loader` has the real one, backed by `aya::maps`.
//!
//! Keeping this as a trait rather than a concrete struct is what lets the
//! gate logic in [`crate::pipeline`] run, and be asserted against, entirely
//! on the host.

use packetguard_common::{
    BypassRecordV4, BypassRecordV6, Config, FiveTupleV4, FiveTupleV6, IcmpKey, RateKey,
    TcpRateState, UdpRateState, WhitelistKey,
};

pub trait Tables {
    // Control-plane tables: written by the CLI/loader, only ever read here.
    fn whitelist_contains(&self, key: WhitelistKey) -> bool;
    fn panic_enabled(&self) -> bool;
    fn acl_port_bitmap(&self) -> u64;
    fn icmp_allowed(&self, key: IcmpKey) -> bool;
    fn ipv4_blacklisted(&self, addr: u32) -> bool;
    fn ipv6_blacklisted(&self, addr: [u8; 16]) -> bool;
    fn global_bypass_enabled(&self) -> bool;
    fn config(&self) -> Option<Config>;

    // Direct-mapped bypass cache: written by the inspector, read (and
    // selectively invalidated) by the data plane.
    fn bypass_v4_at(&self, idx: u32) -> Option<BypassRecordV4>;
    fn bypass_v4_clear(&mut self, idx: u32);
    fn bypass_v6_at(&self, idx: u32) -> Option<BypassRecordV6>;
    fn bypass_v6_clear(&mut self, idx: u32);

    // LRU flow caches (fast-path hit test + slow-path publish).
    fn tcp_flow_get(&mut self, key: &FiveTupleV4) -> Option<u64>;
    fn tcp_flow_insert(&mut self, key: FiveTupleV4, ts: u64);
    fn tcp_flow_delete(&mut self, key: &FiveTupleV4);
    fn udp_flow_get(&mut self, key: &FiveTupleV4) -> Option<u64>;
    fn udp_flow_insert(&mut self, key: FiveTupleV4, ts: u64);
    fn tcp6_flow_get(&mut self, key: &FiveTupleV6) -> Option<u64>;
    fn tcp6_flow_insert(&mut self, key: FiveTupleV6, ts: u64);
    fn tcp6_flow_delete(&mut self, key: &FiveTupleV6);
    fn udp6_flow_get(&mut self, key: &FiveTupleV6) -> Option<u64>;
    fn udp6_flow_insert(&mut self, key: FiveTupleV6, ts: u64);

    // Stateful stage.
    fn tcp_rate_get(&mut self, key: &RateKey) -> Option<TcpRateState>;
    fn tcp_rate_put(&mut self, key: RateKey, state: TcpRateState);
    fn udp_rl_get(&mut self, key: &RateKey) -> Option<UdpRateState>;
    fn udp_rl_put(&mut self, key: RateKey, state: UdpRateState);

    // Counters.
    fn incr_fast_path(&mut self);
    fn incr_slow_path(&mut self);
    fn incr_whitelist_miss(&mut self);
}
