//! XDP packet classifier.
//!
//! Implements the same seven-gate pipeline as `packetguard-core`, but
//! against real `aya_ebpf` maps instead of the host-side simulation —
//! the two are independent implementations of the same ordering, the way
//! `huginn-proxy-ebpf-xdp` never shares code with its userspace loader.
#![no_std]
#![no_main]

use aya_ebpf::{
    macros::{map, xdp},
    maps::{Array, HashMap, LruHashMap, PerCpuArray},
    programs::XdpContext,
};

use core::mem;

use packetguard_common::constants::*;
use packetguard_common::{
    family, BypassRecordV4, BypassRecordV6, Config, FiveTupleV4, FiveTupleV6, IcmpKey, PathStatsIndex,
    RateKey, TcpRateState, UdpRateState, WhitelistKey,
};

// ── Network header definitions ──────────────────────────────────────────────
//
// aya-ebpf-bindings doesn't carry ethernet/IP/TCP headers (those are UAPI
// network headers, not BPF-specific), so we define the minimal shapes we
// read fields out of.

#[repr(C)]
struct EthHdr {
    h_dest: [u8; 6],
    h_source: [u8; 6],
    h_proto: u16, // network byte order
}

#[repr(C)]
struct Ipv4Hdr {
    version_ihl: u8,
    tos: u8,
    tot_len: u16,
    id: u16,
    frag_off: u16,
    ttl: u8,
    protocol: u8,
    check: u16,
    saddr: u32, // network byte order
    daddr: u32,
}

impl Ipv4Hdr {
    #[inline(always)]
    fn ihl_bytes(&self) -> usize {
        ((self.version_ihl & 0x0F) as usize) * 4
    }
}

#[repr(C)]
struct Ipv6Hdr {
    vtc_flow: u32,
    payload_len: u16,
    next_header: u8,
    hop_limit: u8,
    saddr: [u8; 16],
    daddr: [u8; 16],
}

#[repr(C)]
struct TcpHdr {
    source: u16,
    dest: u16,
    seq: u32,
    ack_seq: u32,
    doff_reserved: u8,
    flags: u8,
    window: u16,
    check: u16,
    urg_ptr: u16,
}

#[repr(C)]
struct UdpHdr {
    source: u16,
    dest: u16,
    len: u16,
    check: u16,
}

#[repr(C)]
struct IcmpHdr {
    icmp_type: u8,
    code: u8,
    checksum: u16,
}

// ── BPF maps ─────────────────────────────────────────────────────────────────

#[map]
static whitelist: HashMap<WhitelistKey, u8> = HashMap::with_max_entries(WHITELIST_CAP, 0);
#[map]
static panic_flag: Array<u8> = Array::with_max_entries(1, 0);
#[map]
static acl_ports: Array<u64> = Array::with_max_entries(1, 0);
#[map]
static icmp_allow: HashMap<IcmpKey, u8> = HashMap::with_max_entries(ICMP_ALLOW_CAP, 0);
#[map]
static ipv4_drop: HashMap<u32, u8> = HashMap::with_max_entries(IPV4_DROP_CAP, 0);
#[map]
static ipv6_drop: HashMap<[u8; 16], u8> = HashMap::with_max_entries(IPV6_DROP_CAP, 0);
#[map]
static global_bypass: Array<u8> = Array::with_max_entries(1, 0);
#[map]
static cfg: Array<Config> = Array::with_max_entries(1, 0);

#[map]
static bypass_v4: Array<BypassRecordV4> = Array::with_max_entries(FLOW_TAB_SZ, 0);
#[map]
static bypass_v6: Array<BypassRecordV6> = Array::with_max_entries(FLOW_TAB_SZ, 0);

#[map]
static tcp_flow: LruHashMap<FiveTupleV4, u64> = LruHashMap::with_max_entries(TCP_FLOW_CAP, 0);
#[map]
static udp_flow: LruHashMap<FiveTupleV4, u64> = LruHashMap::with_max_entries(UDP_FLOW_CAP, 0);
#[map]
static tcp6_flow: LruHashMap<FiveTupleV6, u64> = LruHashMap::with_max_entries(TCP6_FLOW_CAP, 0);
#[map]
static udp6_flow: LruHashMap<FiveTupleV6, u64> = LruHashMap::with_max_entries(UDP6_FLOW_CAP, 0);

#[map]
static tcp_rate: LruHashMap<RateKey, TcpRateState> = LruHashMap::with_max_entries(TCP_RATE_CAP, 0);
#[map]
static udp_rl: LruHashMap<RateKey, UdpRateState> = LruHashMap::with_max_entries(UDP_RL_CAP, 0);

#[map]
static path_stats: PerCpuArray<u64> = PerCpuArray::with_max_entries(2, 0);
#[map]
static wl_miss: PerCpuArray<u64> = PerCpuArray::with_max_entries(1, 0);

// ── Packet access helper ─────────────────────────────────────────────────────

#[inline(always)]
unsafe fn ptr_at<T>(ctx: &XdpContext, offset: usize) -> Option<*const T> {
    let start = ctx.data();
    let end = ctx.data_end();
    let access_end = start.checked_add(offset)?.checked_add(mem::size_of::<T>())?;
    if access_end > end {
        return None;
    }
    Some(start.checked_add(offset)? as *const T)
}

// ── Parsed packet shape ──────────────────────────────────────────────────────

enum L4 {
    Tcp { sport: u16, dport: u16, flags: u8 },
    Udp { sport: u16, dport: u16 },
    Icmp { icmp_type: u8, code: u8 },
    Other,
    Truncated,
}

enum L3 {
    NotIp,
    V4 { saddr: u32, daddr: u32, proto: u8, l4: L4 },
    V6 { saddr: [u8; 16], daddr: [u8; 16], proto: u8, l4: L4 },
}

unsafe fn parse(ctx: &XdpContext) -> L3 {
    let Some(eth) = ptr_at::<EthHdr>(ctx, 0) else { return L3::NotIp };
    let ethertype = u16::from_be((*eth).h_proto);
    let l3_off = mem::size_of::<EthHdr>();
    match ethertype {
        ETH_P_IP => parse_v4(ctx, l3_off),
        ETH_P_IPV6 => parse_v6(ctx, l3_off),
        _ => L3::NotIp,
    }
}

unsafe fn parse_v4(ctx: &XdpContext, off: usize) -> L3 {
    let Some(ip) = ptr_at::<Ipv4Hdr>(ctx, off) else { return L3::NotIp };
    let ihl = (*ip).ihl_bytes();
    if ihl < mem::size_of::<Ipv4Hdr>() {
        return L3::NotIp;
    }
    let proto = (*ip).protocol;
    let saddr = u32::from_be((*ip).saddr);
    let daddr = u32::from_be((*ip).daddr);
    let l4 = parse_l4(ctx, off + ihl, proto);
    L3::V4 { saddr, daddr, proto, l4 }
}

unsafe fn parse_v6(ctx: &XdpContext, off: usize) -> L3 {
    let Some(ip6) = ptr_at::<Ipv6Hdr>(ctx, off) else { return L3::NotIp };
    let proto = (*ip6).next_header;
    let saddr = (*ip6).saddr;
    let daddr = (*ip6).daddr;
    let l4 = parse_l4(ctx, off + mem::size_of::<Ipv6Hdr>(), proto);
    L3::V6 { saddr, daddr, proto, l4 }
}

unsafe fn parse_l4(ctx: &XdpContext, off: usize, proto: u8) -> L4 {
    match proto {
        IPPROTO_TCP => match ptr_at::<TcpHdr>(ctx, off) {
            Some(tcp) => L4::Tcp { sport: u16::from_be((*tcp).source), dport: u16::from_be((*tcp).dest), flags: (*tcp).flags },
            None => L4::Truncated,
        },
        IPPROTO_UDP => match ptr_at::<UdpHdr>(ctx, off) {
            Some(udp) => L4::Udp { sport: u16::from_be((*udp).source), dport: u16::from_be((*udp).dest) },
            None => L4::Truncated,
        },
        IPPROTO_ICMP | IPPROTO_ICMPV6 => match ptr_at::<IcmpHdr>(ctx, off) {
            Some(icmp) => L4::Icmp { icmp_type: (*icmp).icmp_type, code: (*icmp).code },
            None => L4::Truncated,
        },
        _ => L4::Other,
    }
}

// ── Hashing (must match packetguard-core::keys bit for bit) ────────────────

#[inline(always)]
fn hash_index_v4(t: &FiveTupleV4) -> u32 {
    let mut h = t.saddr ^ t.daddr;
    h ^= ((t.sport as u32) << 16) | t.dport as u32;
    h ^= t.proto as u32;
    h & (FLOW_TAB_SZ - 1)
}

#[inline(always)]
fn hash_index_v6(t: &FiveTupleV6) -> u32 {
    let s0 = u64::from_ne_bytes(unsafe { *(t.saddr.as_ptr() as *const [u8; 8]) });
    let s1 = u64::from_ne_bytes(unsafe { *(t.saddr.as_ptr().add(8) as *const [u8; 8]) });
    let d0 = u64::from_ne_bytes(unsafe { *(t.daddr.as_ptr() as *const [u8; 8]) });
    let d1 = u64::from_ne_bytes(unsafe { *(t.daddr.as_ptr().add(8) as *const [u8; 8]) });
    let folded = s0 ^ s1 ^ d0 ^ d1;
    let mut h = folded as u32;
    h ^= ((t.sport as u32) << 16) | t.dport as u32;
    h ^= t.proto as u32;
    h & (FLOW_TAB_SZ - 1)
}

fn is_private_v4(addr: u32) -> bool {
    let a = addr.to_be_bytes();
    a[0] == 10 || (a[0] == 172 && (a[1] & 0xF0) == 16) || (a[0] == 192 && a[1] == 168) || (a[0] == 169 && a[1] == 254)
}

fn is_ula_v6(addr: &[u8; 16]) -> bool {
    (addr[0] & 0xFE) == 0xFC
}

fn is_link_local_v6(addr: &[u8; 16]) -> bool {
    addr[0] == 0xFE && (addr[1] & 0xC0) == 0x80
}

fn port_allowed(bitmap: u64, dport: u16) -> bool {
    dport < 64 && (bitmap & (1u64 << dport)) != 0
}

// ── Entry point ──────────────────────────────────────────────────────────────

#[xdp]
pub fn packetguard(ctx: XdpContext) -> u32 {
    match unsafe { classify(&ctx) } {
        true => aya_ebpf::bindings::xdp_action::XDP_PASS,
        false => aya_ebpf::bindings::xdp_action::XDP_DROP,
    }
}

/// Returns `true` for PASS, `false` for DROP. Stage order mirrors
/// `packetguard_core::pipeline::classify` exactly.
unsafe fn classify(ctx: &XdpContext) -> bool {
    let l3 = parse(ctx);
    let now = aya_ebpf::helpers::bpf_ktime_get_ns();

    if let Some(v) = whitelist_gate(&l3) {
        return v;
    }
    if panic_flag.get(0).copied().unwrap_or(0) != 0 {
        return false;
    }
    if let Some(v) = acl_gate(&l3) {
        return v;
    }
    if let Some(v) = blacklist_gate(&l3) {
        return v;
    }
    if let Some(v) = flow_fast_path(&l3, now) {
        return v;
    }
    slow_path(&l3, now)
}

fn whitelist_gate(l3: &L3) -> Option<bool> {
    let (key, l4, is_v6) = match l3 {
        L3::NotIp => return None,
        L3::V4 { saddr, l4, .. } => (WhitelistKey::v4(saddr.to_be_bytes()), l4, false),
        L3::V6 { saddr, l4, .. } => (WhitelistKey::v6(*saddr), l4, true),
    };
    if unsafe { whitelist.get(&key) }.is_some() {
        return Some(true);
    }
    if let Some(counter) = wl_miss.get_ptr_mut(0) {
        unsafe { *counter = (*counter).wrapping_add(1) };
    }
    if let L4::Icmp { icmp_type, .. } = l4 {
        let is_echo = if is_v6 {
            *icmp_type == ICMPV6_ECHO_REQUEST || *icmp_type == ICMPV6_ECHO_REPLY
        } else {
            *icmp_type == ICMPV4_ECHO_REQUEST || *icmp_type == ICMPV4_ECHO_REPLY
        };
        if is_echo {
            return Some(false);
        }
    }
    None
}

fn acl_gate(l3: &L3) -> Option<bool> {
    let (l4, is_v6) = match l3 {
        L3::NotIp => return None,
        L3::V4 { l4, .. } => (l4, false),
        L3::V6 { l4, .. } => (l4, true),
    };
    match l4 {
        L4::Tcp { dport, .. } | L4::Udp { dport, .. } => {
            let bitmap = acl_ports.get(0).copied().unwrap_or(0);
            if port_allowed(bitmap, *dport) {
                None
            } else {
                Some(false)
            }
        }
        L4::Icmp { icmp_type, code } => {
            let fam = if is_v6 { family::INET6 } else { family::INET };
            if unsafe { icmp_allow.get(&IcmpKey { family: fam, icmp_type: *icmp_type, code: *code }) }.is_some() {
                None
            } else {
                Some(false)
            }
        }
        L4::Other => Some(false),
        L4::Truncated => None,
    }
}

fn blacklist_gate(l3: &L3) -> Option<bool> {
    match l3 {
        L3::NotIp => None,
        L3::V4 { saddr, daddr, proto, l4 } => {
            let blocked = unsafe { ipv4_drop.get(saddr) }.is_some() || is_private_v4(*saddr);
            if !blocked {
                return None;
            }
            if let Some((sport, dport)) = l4_ports(l4) {
                let tuple = FiveTupleV4 { saddr: *saddr, daddr: *daddr, sport, dport, proto: *proto, pad: [0; 3] };
                let idx = hash_index_v4(&tuple);
                if bypass_v4.get(idx).is_some_and(|rec| rec.matches(&tuple)) {
                    if let Some(slot) = bypass_v4.get_ptr_mut(idx) {
                        unsafe { *slot = BypassRecordV4::default() };
                    }
                }
            }
            Some(false)
        }
        L3::V6 { saddr, daddr, proto, l4 } => {
            let blocked = unsafe { ipv6_drop.get(saddr) }.is_some() || is_ula_v6(saddr) || is_link_local_v6(saddr);
            if !blocked {
                return None;
            }
            if let Some((sport, dport)) = l4_ports(l4) {
                let tuple = FiveTupleV6 { saddr: *saddr, daddr: *daddr, sport, dport, proto: *proto, pad: [0; 3] };
                let idx = hash_index_v6(&tuple);
                if bypass_v6.get(idx).is_some_and(|rec| rec.matches(&tuple)) {
                    if let Some(slot) = bypass_v6.get_ptr_mut(idx) {
                        unsafe { *slot = BypassRecordV6::default() };
                    }
                }
            }
            Some(false)
        }
    }
}

fn l4_ports(l4: &L4) -> Option<(u16, u16)> {
    match l4 {
        L4::Tcp { sport, dport, .. } | L4::Udp { sport, dport } => Some((*sport, *dport)),
        _ => None,
    }
}

fn flow_fast_path(l3: &L3, now: u64) -> Option<bool> {
    match l3 {
        L3::NotIp => None,
        L3::V4 { saddr, daddr, l4, .. } => match l4 {
            L4::Icmp { .. } => Some(true),
            L4::Tcp { sport, dport, flags } => {
                let tuple = FiveTupleV4 { saddr: *saddr, daddr: *daddr, sport: *sport, dport: *dport, proto: IPPROTO_TCP, pad: [0; 3] };
                let fresh = unsafe { tcp_flow.get(&tuple) }.is_some_and(|ts| now.saturating_sub(*ts) <= TCP_IDLE_NS);
                if flags & (TCP_FLAG_FIN | TCP_FLAG_RST) != 0 {
                    let _ = tcp_flow.remove(&tuple);
                }
                if fresh {
                    incr_path_stat(PathStatsIndex::Fast);
                    Some(stateful_tcp(&RateKey::v4(*saddr), *flags, now))
                } else {
                    None
                }
            }
            L4::Udp { sport, dport } => {
                let tuple = FiveTupleV4 { saddr: *saddr, daddr: *daddr, sport: *sport, dport: *dport, proto: IPPROTO_UDP, pad: [0; 3] };
                let fresh = unsafe { udp_flow.get(&tuple) }.is_some_and(|ts| now.saturating_sub(*ts) <= UDP_IDLE_NS);
                if fresh {
                    incr_path_stat(PathStatsIndex::Fast);
                    Some(stateful_udp(&RateKey::v4(*saddr), now))
                } else {
                    None
                }
            }
            L4::Other | L4::Truncated => None,
        },
        L3::V6 { saddr, daddr, l4, .. } => match l4 {
            L4::Icmp { .. } => Some(true),
            L4::Tcp { sport, dport, flags } => {
                let tuple = FiveTupleV6 { saddr: *saddr, daddr: *daddr, sport: *sport, dport: *dport, proto: IPPROTO_TCP, pad: [0; 3] };
                let fresh = unsafe { tcp6_flow.get(&tuple) }.is_some_and(|ts| now.saturating_sub(*ts) <= TCP_IDLE_NS);
                if flags & (TCP_FLAG_FIN | TCP_FLAG_RST) != 0 {
                    let _ = tcp6_flow.remove(&tuple);
                }
                if fresh {
                    incr_path_stat(PathStatsIndex::Fast);
                    Some(stateful_tcp(&RateKey::v6(*saddr), *flags, now))
                } else {
                    None
                }
            }
            L4::Udp { sport, dport } => {
                let tuple = FiveTupleV6 { saddr: *saddr, daddr: *daddr, sport: *sport, dport: *dport, proto: IPPROTO_UDP, pad: [0; 3] };
                let fresh = unsafe { udp6_flow.get(&tuple) }.is_some_and(|ts| now.saturating_sub(*ts) <= UDP_IDLE_NS);
                if fresh {
                    incr_path_stat(PathStatsIndex::Fast);
                    Some(stateful_udp(&RateKey::v6(*saddr), now))
                } else {
                    None
                }
            }
            L4::Other | L4::Truncated => None,
        },
    }
}

fn slow_path(l3: &L3, now: u64) -> bool {
    match l3 {
        L3::NotIp => true,
        L3::V4 { saddr, daddr, l4, .. } => match l4 {
            L4::Tcp { sport, dport, flags } => {
                publish_v4(*saddr, *daddr, *sport, *dport, IPPROTO_TCP, now);
                incr_path_stat(PathStatsIndex::Slow);
                if global_bypass.get(0).copied().unwrap_or(0) != 0 {
                    return true;
                }
                let tuple = FiveTupleV4 { saddr: *saddr, daddr: *daddr, sport: *sport, dport: *dport, proto: IPPROTO_TCP, pad: [0; 3] };
                if bypass_hit_v4(&tuple) {
                    return true;
                }
                stateful_tcp(&RateKey::v4(*saddr), *flags, now)
            }
            L4::Udp { sport, dport } => {
                publish_v4(*saddr, *daddr, *sport, *dport, IPPROTO_UDP, now);
                incr_path_stat(PathStatsIndex::Slow);
                if global_bypass.get(0).copied().unwrap_or(0) != 0 {
                    return true;
                }
                let tuple = FiveTupleV4 { saddr: *saddr, daddr: *daddr, sport: *sport, dport: *dport, proto: IPPROTO_UDP, pad: [0; 3] };
                if bypass_hit_v4(&tuple) {
                    return true;
                }
                stateful_udp(&RateKey::v4(*saddr), now)
            }
            L4::Icmp { .. } | L4::Other | L4::Truncated => true,
        },
        L3::V6 { saddr, daddr, l4, .. } => match l4 {
            L4::Tcp { sport, dport, flags } => {
                publish_v6(*saddr, *daddr, *sport, *dport, IPPROTO_TCP, now);
                incr_path_stat(PathStatsIndex::Slow);
                if global_bypass.get(0).copied().unwrap_or(0) != 0 {
                    return true;
                }
                let tuple = FiveTupleV6 { saddr: *saddr, daddr: *daddr, sport: *sport, dport: *dport, proto: IPPROTO_TCP, pad: [0; 3] };
                if bypass_hit_v6(&tuple) {
                    return true;
                }
                stateful_tcp(&RateKey::v6(*saddr), *flags, now)
            }
            L4::Udp { sport, dport } => {
                publish_v6(*saddr, *daddr, *sport, *dport, IPPROTO_UDP, now);
                incr_path_stat(PathStatsIndex::Slow);
                if global_bypass.get(0).copied().unwrap_or(0) != 0 {
                    return true;
                }
                let tuple = FiveTupleV6 { saddr: *saddr, daddr: *daddr, sport: *sport, dport: *dport, proto: IPPROTO_UDP, pad: [0; 3] };
                if bypass_hit_v6(&tuple) {
                    return true;
                }
                stateful_udp(&RateKey::v6(*saddr), now)
            }
            L4::Icmp { .. } | L4::Other | L4::Truncated => true,
        },
    }
}

fn bypass_hit_v4(tuple: &FiveTupleV4) -> bool {
    bypass_v4.get(hash_index_v4(tuple)).is_some_and(|r| r.matches(tuple))
}

fn bypass_hit_v6(tuple: &FiveTupleV6) -> bool {
    bypass_v6.get(hash_index_v6(tuple)).is_some_and(|r| r.matches(tuple))
}

fn publish_v4(saddr: u32, daddr: u32, sport: u16, dport: u16, proto: u8, now: u64) {
    let tcp_proto = if proto == IPPROTO_TCP { IPPROTO_TCP } else { INVALID_PROTO };
    let udp_proto = if proto == IPPROTO_UDP { IPPROTO_UDP } else { INVALID_PROTO };
    let _ = tcp_flow.insert(&FiveTupleV4 { saddr, daddr, sport, dport, proto: tcp_proto, pad: [0; 3] }, &now, 0);
    let _ = udp_flow.insert(&FiveTupleV4 { saddr, daddr, sport, dport, proto: udp_proto, pad: [0; 3] }, &now, 0);
}

fn publish_v6(saddr: [u8; 16], daddr: [u8; 16], sport: u16, dport: u16, proto: u8, now: u64) {
    let tcp_proto = if proto == IPPROTO_TCP { IPPROTO_TCP } else { INVALID_PROTO };
    let udp_proto = if proto == IPPROTO_UDP { IPPROTO_UDP } else { INVALID_PROTO };
    let _ = tcp6_flow.insert(&FiveTupleV6 { saddr, daddr, sport, dport, proto: tcp_proto, pad: [0; 3] }, &now, 0);
    let _ = udp6_flow.insert(&FiveTupleV6 { saddr, daddr, sport, dport, proto: udp_proto, pad: [0; 3] }, &now, 0);
}

fn stateful_tcp(key: &RateKey, flags: u8, now: u64) -> bool {
    let is_initial_syn = flags & TCP_FLAG_SYN != 0 && flags & TCP_FLAG_ACK == 0;
    if !is_initial_syn {
        return true;
    }
    let mut state = unsafe { tcp_rate.get(key) }.copied().unwrap_or(TcpRateState { window_start: now, syn_count: 0, _pad: 0 });
    if now.saturating_sub(state.window_start) >= RATE_WINDOW_NS {
        state.window_start = now;
        state.syn_count = 0;
    }
    state.syn_count += 1;
    // Either threshold being exceeded drops the packet, and SYN_RATE_LIMIT
    // is the lower of the two, so it alone decides the outcome.
    let pass = state.syn_count <= SYN_RATE_LIMIT;
    let _ = tcp_rate.insert(key, &state, 0);
    pass
}

fn stateful_udp(key: &RateKey, now: u64) -> bool {
    let raw_cfg = cfg.get(0).copied();
    let resolved = Config::or_default(raw_cfg);
    let existing = unsafe { udp_rl.get(key) }.copied().unwrap_or(UdpRateState { last_seen: now, tokens: resolved.burst, _pad: 0 });
    let idle = now.saturating_sub(existing.last_seen);
    let mut state = if idle >= TTL_NS {
        UdpRateState { last_seen: existing.last_seen, tokens: resolved.burst, _pad: 0 }
    } else if resolved.ns == 0 {
        existing
    } else {
        let refilled = existing.tokens as u64 + idle / resolved.ns;
        UdpRateState { last_seen: existing.last_seen, tokens: refilled.min(resolved.burst as u64) as u32, _pad: 0 }
    };
    let pass = if state.tokens == 0 {
        false
    } else {
        state.tokens -= 1;
        true
    };
    state.last_seen = now;
    let _ = udp_rl.insert(key, &state, 0);
    pass
}

fn incr_path_stat(idx: PathStatsIndex) {
    if let Some(counter) = path_stats.get_ptr_mut(idx as u32) {
        unsafe { *counter = (*counter).wrapping_add(1) };
    }
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
