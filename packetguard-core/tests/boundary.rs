mod common;

use packetguard_common::constants::*;
use packetguard_common::Config;
use packetguard_core::sim::SimTables;
use packetguard_core::{classify, Verdict};

const SRC: [u8; 4] = [203, 0, 113, 9];
const DST: [u8; 4] = [198, 51, 100, 1];

#[test]
fn bare_ethernet_frame_passes_by_default() {
    let mut t = SimTables::new();
    let mut frame = vec![0u8; 12];
    frame.extend_from_slice(&ETH_P_IP.to_be_bytes());
    assert_eq!(frame.len(), ETH_HLEN);
    assert_eq!(classify(&frame, 0, &mut t), Verdict::Pass);
    assert_eq!(t.whitelist_miss_count(), 0);
    assert_eq!(t.slow_path_count(), 0);
}

#[test]
fn truncated_tcp_header_falls_through_to_default_pass() {
    let mut t = SimTables::new();
    t.set_acl_port_bitmap(0); // would DROP a fully-parsed TCP packet
    let mut frame = common::eth_v4();
    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[9] = IPPROTO_TCP;
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&[0u8; 4]); // not enough for a TCP header
    assert_eq!(classify(&frame, 0, &mut t), Verdict::Pass);
}

#[test]
fn unallowed_l4_protocol_under_a_valid_ip_header_is_dropped() {
    let mut t = SimTables::new();
    let mut frame = common::eth_v4();
    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[9] = 47; // GRE, not TCP/UDP/ICMP
    frame.extend_from_slice(&ip);
    assert_eq!(classify(&frame, 0, &mut t), Verdict::Drop);
}

#[test]
fn dport_at_the_top_of_the_bitmap_range_is_checked() {
    let mut t = SimTables::new();
    t.set_acl_port_bitmap(1u64 << 63);
    let allowed = common::tcp_v4(SRC, DST, 1234, 63, 0b0001_0000);
    assert_eq!(classify(&allowed, 0, &mut t), Verdict::Pass);
    let just_outside = common::tcp_v4(SRC, DST, 1234, 64, 0b0001_0000);
    assert_eq!(classify(&just_outside, 0, &mut t), Verdict::Drop);
}

#[test]
fn udp_bucket_with_exactly_one_token_passes_then_the_next_drops() {
    let mut t = SimTables::new();
    t.set_acl_port_bitmap(1 << 53);
    t.set_config(Config { ns: DEFAULT_NS, burst: 1, _pad: 0 });
    let first = common::udp_v4(SRC, DST, 9000, 53);
    assert_eq!(classify(&first, 0, &mut t), Verdict::Pass);
    let second = common::udp_v4(SRC, DST, 9000, 53);
    assert_eq!(classify(&second, 0, &mut t), Verdict::Drop);
}

#[test]
fn syn_count_exactly_at_the_limit_passes_then_the_next_drops() {
    let mut t = SimTables::new();
    t.set_acl_port_bitmap(1 << 22);
    let mut last = Verdict::Drop;
    for i in 0..SYN_RATE_LIMIT as u64 {
        let syn = common::tcp_v4(SRC, DST, 2000 + (i as u16 % 50), 22, 0b0000_0010);
        last = classify(&syn, 0, &mut t);
    }
    assert_eq!(last, Verdict::Pass); // the 20th SYN in the window still passes
    let one_more = common::tcp_v4(SRC, DST, 2099, 22, 0b0000_0010);
    assert_eq!(classify(&one_more, 0, &mut t), Verdict::Drop); // the 21st drops
}

#[test]
fn non_initial_syn_is_never_rate_limited() {
    let mut t = SimTables::new();
    t.set_acl_port_bitmap(1 << 22);
    for i in 0..(SYN_RATE_LIMIT as u64 * 3) {
        // SYN+ACK: not an initial SYN, must never be dropped by the limiter.
        let pkt = common::tcp_v4(SRC, DST, 2000 + (i as u16 % 50), 22, TCP_FLAG_SYN | TCP_FLAG_ACK);
        assert_eq!(classify(&pkt, 0, &mut t), Verdict::Pass);
    }
}
