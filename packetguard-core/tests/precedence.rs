mod common;

use packetguard_common::constants::IPPROTO_TCP;
use packetguard_common::{FiveTupleV4, WhitelistKey};
use packetguard_core::sim::SimTables;
use packetguard_core::{classify, Tables, Verdict};

const SRC: [u8; 4] = [203, 0, 113, 9];
const DST: [u8; 4] = [198, 51, 100, 1];

#[test]
fn whitelist_overrides_panic() {
    let mut t = SimTables::new();
    t.set_panic(true);
    t.whitelist_add(WhitelistKey::v4(SRC));
    let pkt = common::tcp_v4(SRC, DST, 1234, 80, 0b0001_0000);
    assert_eq!(classify(&pkt, 0, &mut t), Verdict::Pass);
}

#[test]
fn panic_drops_non_whitelisted_traffic_even_if_acl_allows() {
    let mut t = SimTables::new();
    t.set_panic(true);
    t.set_acl_port_bitmap(1 << 22); // the port would be allowed if not for panic
    let pkt = common::tcp_v4(SRC, DST, 1234, 22, 0b0001_0000);
    assert_eq!(classify(&pkt, 0, &mut t), Verdict::Drop);
}

#[test]
fn acl_drop_happens_before_blacklist_is_consulted() {
    let mut t = SimTables::new();
    t.set_acl_port_bitmap(0); // no port allowed
    t.blacklist_v4_add(u32::from_be_bytes([9, 9, 9, 9])); // unrelated source, never consulted
    let pkt = common::tcp_v4(SRC, DST, 1234, 22, 0b0001_0000);
    assert_eq!(classify(&pkt, 0, &mut t), Verdict::Drop);
}

#[test]
fn blacklist_drops_even_when_acl_allows_the_port() {
    let mut t = SimTables::new();
    t.set_acl_port_bitmap(1 << 22);
    t.blacklist_v4_add(u32::from_be_bytes(SRC));
    let pkt = common::tcp_v4(SRC, DST, 1234, 22, 0b0001_0000);
    assert_eq!(classify(&pkt, 0, &mut t), Verdict::Drop);
}

#[test]
fn fast_path_is_used_once_a_flow_is_established() {
    let mut t = SimTables::new();
    t.set_acl_port_bitmap(1 << 22);
    // Initial SYN goes through the slow path and publishes the flow.
    let syn = common::tcp_v4(SRC, DST, 1234, 22, 0b0000_0010);
    assert_eq!(classify(&syn, 0, &mut t), Verdict::Pass);
    assert_eq!(t.slow_path_count(), 1);
    assert_eq!(t.fast_path_count(), 0);

    // A later packet on the same 5-tuple, still within the idle window,
    // hits the fast path instead.
    let data = common::tcp_v4(SRC, DST, 1234, 22, 0b0001_0000);
    assert_eq!(classify(&data, 1_000, &mut t), Verdict::Pass);
    assert_eq!(t.fast_path_count(), 1);
}

#[test]
fn fast_path_entry_expires_after_the_idle_window() {
    use packetguard_common::constants::TCP_IDLE_NS;
    let mut t = SimTables::new();
    t.set_acl_port_bitmap(1 << 22);
    let syn = common::tcp_v4(SRC, DST, 1234, 22, 0b0000_0010);
    assert_eq!(classify(&syn, 0, &mut t), Verdict::Pass);

    let stale = common::tcp_v4(SRC, DST, 1234, 22, 0b0001_0000);
    assert_eq!(classify(&stale, TCP_IDLE_NS + 1, &mut t), Verdict::Pass);
    // the stale hit fell through to the slow path, not the fast one
    assert_eq!(t.fast_path_count(), 0);
    assert_eq!(t.slow_path_count(), 2);
}

#[test]
fn fin_evicts_the_flow_cache_entry() {
    let mut t = SimTables::new();
    t.set_acl_port_bitmap(1 << 22);
    let syn = common::tcp_v4(SRC, DST, 1234, 22, 0b0000_0010);
    classify(&syn, 0, &mut t);
    let fin = common::tcp_v4(SRC, DST, 1234, 22, 0b0000_0001);
    classify(&fin, 1_000, &mut t);

    let tuple = FiveTupleV4 { saddr: u32::from_be_bytes(SRC), daddr: u32::from_be_bytes(DST), sport: 1234, dport: 22, proto: IPPROTO_TCP, pad: [0; 3] };
    assert!(t.tcp_flow_get(&tuple).is_none());
}
