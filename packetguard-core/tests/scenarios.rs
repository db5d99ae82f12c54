mod common;

use packetguard_common::constants::*;
use packetguard_common::{Config, IcmpKey, WhitelistKey};
use packetguard_core::sim::SimTables;
use packetguard_core::{classify, Verdict};

const SRC: [u8; 4] = [203, 0, 113, 9];
const DST: [u8; 4] = [198, 51, 100, 1];

#[test]
fn unsolicited_icmp_echo_from_an_unknown_source_is_dropped() {
    let mut t = SimTables::new();
    let request = common::icmp_v4(SRC, DST, ICMPV4_ECHO_REQUEST);
    assert_eq!(classify(&request, 0, &mut t), Verdict::Drop);
    assert_eq!(t.whitelist_miss_count(), 1);
}

#[test]
fn icmp_echo_from_a_whitelisted_source_passes() {
    let mut t = SimTables::new();
    t.whitelist_add(WhitelistKey::v4(SRC));
    let request = common::icmp_v4(SRC, DST, ICMPV4_ECHO_REQUEST);
    assert_eq!(classify(&request, 0, &mut t), Verdict::Pass);
}

#[test]
fn icmp_echo_allowed_by_acl_passes_the_acl_gate_then_the_flow_path() {
    let mut t = SimTables::new();
    t.icmp_allow_add(IcmpKey { family: packetguard_common::family::INET, icmp_type: ICMPV4_ECHO_REQUEST, code: 0 });
    let request = common::icmp_v4(SRC, DST, ICMPV4_ECHO_REQUEST);
    // Miss at the whitelist gate would normally drop an echo outright, so
    // route a non-echo ICMP type through the ACL instead to isolate it.
    let other = common::icmp_v4(SRC, DST, 3); // destination unreachable
    t.set_acl_port_bitmap(0);
    assert_eq!(classify(&other, 0, &mut t), Verdict::Drop);

    t.icmp_allow_add(IcmpKey { family: packetguard_common::family::INET, icmp_type: 3, code: 0 });
    assert_eq!(classify(&other, 0, &mut t), Verdict::Pass);
}

#[test]
fn sustained_syn_flood_eventually_gets_dropped() {
    let mut t = SimTables::new();
    t.set_acl_port_bitmap(1 << 22);
    let mut last = Verdict::Pass;
    for i in 0..150u64 {
        let syn = common::tcp_v4(SRC, DST, 2000 + (i as u16 % 50), 22, 0b0000_0010);
        last = classify(&syn, i, &mut t); // all within one RATE_WINDOW_NS
    }
    assert_eq!(last, Verdict::Drop);
}

#[test]
fn moderate_syn_rate_is_never_dropped() {
    let mut t = SimTables::new();
    t.set_acl_port_bitmap(1 << 22);
    for i in 0..50u64 {
        let now = i * (RATE_WINDOW_NS / 10); // well under the per-window limit
        let syn = common::tcp_v4(SRC, DST, 2000 + i as u16, 22, 0b0000_0010);
        assert_eq!(classify(&syn, now, &mut t), Verdict::Pass);
    }
}

#[test]
fn udp_token_bucket_drains_then_refills_after_ttl() {
    let mut t = SimTables::new();
    t.set_acl_port_bitmap(1 << 53);
    t.set_config(Config { ns: DEFAULT_NS, burst: 4, _pad: 0 });
    for _ in 0..4 {
        let pkt = common::udp_v4(SRC, DST, 9000, 53);
        assert_eq!(classify(&pkt, 0, &mut t), Verdict::Pass);
    }
    let exhausted = common::udp_v4(SRC, DST, 9000, 53);
    assert_eq!(classify(&exhausted, 0, &mut t), Verdict::Drop);

    let after_ttl = common::udp_v4(SRC, DST, 9000, 53);
    assert_eq!(classify(&after_ttl, TTL_NS + 1, &mut t), Verdict::Pass);
}

#[test]
fn udp_source_sending_well_below_the_refill_rate_never_drops() {
    let mut t = SimTables::new();
    t.set_acl_port_bitmap(1 << 53);
    t.set_config(Config { ns: DEFAULT_NS, burst: 10, _pad: 0 });
    for i in 0..30u64 {
        let now = i * DEFAULT_NS * 2; // one packet per two refill intervals
        let pkt = common::udp_v4(SRC, DST, 9000, 53);
        assert_eq!(classify(&pkt, now, &mut t), Verdict::Pass);
    }
}

#[test]
fn rfc1918_source_is_blocked_even_without_an_explicit_blacklist_entry() {
    let mut t = SimTables::new();
    t.set_acl_port_bitmap(1 << 22);
    let pkt = common::tcp_v4([10, 1, 2, 3], DST, 1234, 22, 0b0001_0000);
    assert_eq!(classify(&pkt, 0, &mut t), Verdict::Drop);
}

#[test]
fn link_local_v6_source_is_blocked() {
    let mut t = SimTables::new();
    t.set_acl_port_bitmap(1 << 22);
    let mut saddr = [0u8; 16];
    saddr[0] = 0xFE;
    saddr[1] = 0x80;
    let pkt = common::tcp_v6(saddr, [0x20; 16], 1234, 22, 0b0001_0000);
    assert_eq!(classify(&pkt, 0, &mut t), Verdict::Drop);
}

#[test]
fn inspector_bypass_record_skips_stateful_rate_limiting() {
    use packetguard_common::BypassRecordV4;
    use packetguard_core::keys::hash_index_v4;

    let mut t = SimTables::new();
    t.set_acl_port_bitmap(1 << 22);
    let tuple = packetguard_common::FiveTupleV4 {
        saddr: u32::from_be_bytes(SRC),
        daddr: u32::from_be_bytes(DST),
        sport: 1234,
        dport: 22,
        proto: IPPROTO_TCP,
        pad: [0; 3],
    };
    let idx = hash_index_v4(&tuple);
    t.install_bypass_v4(idx, BypassRecordV4 { saddr: tuple.saddr, daddr: tuple.daddr, sport: tuple.sport, dport: tuple.dport, proto: tuple.proto, dir: 0 });

    // A bypass record already in the cache waves the flow straight through,
    // even though this is an initial SYN and would otherwise hit the SYN
    // rate limiter.
    let pkt = common::tcp_v4(SRC, DST, 1234, 22, 0b0000_0010);
    assert_eq!(classify(&pkt, 0, &mut t), Verdict::Pass);
}

#[test]
fn global_bypass_passes_traffic_without_touching_the_cache() {
    let mut t = SimTables::new();
    t.set_acl_port_bitmap(1 << 22);
    t.set_global_bypass(true);
    let pkt = common::tcp_v4(SRC, DST, 1234, 22, 0b0000_0010);
    assert_eq!(classify(&pkt, 0, &mut t), Verdict::Pass);
}
