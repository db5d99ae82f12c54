//! The classification pipeline: seven gates evaluated in a fixed order,
//! each one either returning a verdict or deferring to the next. See the
//! module-level docs in `lib.rs` for the stage order; this file is the
//! order itself, one function per gate.

use packetguard_common::constants::*;
use packetguard_common::{
    BypassRecordV4, BypassRecordV6, Config, FiveTupleV4, FiveTupleV6, IcmpKey, RateKey,
    TcpRateState, UdpRateState, WhitelistKey,
};

use tracing::debug;

use crate::keys::{hash_index_v4, hash_index_v6};
use crate::parse::{self, L3, L4};
use crate::tables::Tables;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Drop,
}

/// Run one packet through the pipeline. `now_ns` is supplied by the caller
/// rather than read from a clock here, so every timing-sensitive path can be
/// driven deterministically in tests.
pub fn classify<T: Tables>(data: &[u8], now_ns: u64, tables: &mut T) -> Verdict {
    let l3 = parse::parse(data);

    if let Some(v) = whitelist_gate(&l3, tables) {
        return v;
    }
    if tables.panic_enabled() {
        debug!("classify: panic flag set, dropping non-whitelisted packet");
        return Verdict::Drop;
    }
    if let Some(v) = acl_gate(&l3, tables) {
        return v;
    }
    if let Some(v) = blacklist_gate(&l3, tables) {
        return v;
    }
    if let Some(v) = flow_fast_path(&l3, now_ns, tables) {
        return v;
    }
    slow_path(&l3, now_ns, tables)
}

/// Stage 1 (spec §4.2). `None` means "not whitelisted, keep evaluating";
/// any verdict here short-circuits the rest of the pipeline.
fn whitelist_gate<T: Tables>(l3: &L3, tables: &mut T) -> Option<Verdict> {
    let (key, l4) = match l3 {
        L3::NotIp => return None,
        L3::V4 { saddr, l4, .. } => (WhitelistKey::v4(saddr.to_be_bytes()), l4),
        L3::V6 { saddr, l4, .. } => (WhitelistKey::v6(*saddr), l4),
    };
    if tables.whitelist_contains(key) {
        return Some(Verdict::Pass);
    }
    tables.incr_whitelist_miss();
    if let L4::Icmp { icmp_type, .. } = l4 {
        let is_v6 = matches!(l3, L3::V6 { .. });
        let is_echo = if is_v6 {
            *icmp_type == ICMPV6_ECHO_REQUEST || *icmp_type == ICMPV6_ECHO_REPLY
        } else {
            *icmp_type == ICMPV4_ECHO_REQUEST || *icmp_type == ICMPV4_ECHO_REPLY
        };
        if is_echo {
            debug!("whitelist_gate: unsolicited ICMP echo from a non-whitelisted source, dropping");
            return Some(Verdict::Drop);
        }
    }
    None
}

/// Stage 3 (spec §4.3). Applies only once we know the packet is IP and know
/// its L4 protocol; an unparseable or non-IP packet defers instead of
/// matching "not TCP/UDP/ICMP".
fn acl_gate<T: Tables>(l3: &L3, tables: &mut T) -> Option<Verdict> {
    let l4 = match l3 {
        L3::NotIp => return None,
        L3::V4 { l4, .. } => l4,
        L3::V6 { l4, .. } => l4,
    };
    let is_v6 = matches!(l3, L3::V6 { .. });
    match l4 {
        L4::Tcp { dport, .. } | L4::Udp { dport, .. } => {
            if port_allowed(tables.acl_port_bitmap(), *dport) {
                None
            } else {
                debug!(dport, "acl_gate: destination port not in allow-list, dropping");
                Some(Verdict::Drop)
            }
        }
        L4::Icmp { icmp_type, code } => {
            let family = if is_v6 { packetguard_common::family::INET6 } else { packetguard_common::family::INET };
            if tables.icmp_allowed(IcmpKey { family, icmp_type: *icmp_type, code: *code }) {
                None
            } else {
                debug!(icmp_type, code, "acl_gate: ICMP type/code not in allow-list, dropping");
                Some(Verdict::Drop)
            }
        }
        L4::Other => {
            debug!("acl_gate: L4 protocol is neither TCP, UDP, nor ICMP, dropping");
            Some(Verdict::Drop)
        }
        L4::Truncated => None,
    }
}

fn port_allowed(bitmap: u64, dport: u16) -> bool {
    dport < 64 && (bitmap & (1u64 << dport)) != 0
}

/// Stage 4 (spec §4.4, §4.5). A blacklist hit also evicts any bypass record
/// cached for the exact flow, so the inspector's earlier pass decision can't
/// outlive the block.
fn blacklist_gate<T: Tables>(l3: &L3, tables: &mut T) -> Option<Verdict> {
    match l3 {
        L3::NotIp => None,
        L3::V4 { saddr, daddr, proto, l4 } => {
            let blocked = tables.ipv4_blacklisted(*saddr) || is_private_v4(*saddr);
            if !blocked {
                return None;
            }
            if let Some((sport, dport)) = l4_ports(l4) {
                let tuple = FiveTupleV4 { saddr: *saddr, daddr: *daddr, sport, dport, proto: *proto, pad: [0; 3] };
                let idx = hash_index_v4(&tuple);
                if tables.bypass_v4_at(idx).is_some_and(|r| r.matches(&tuple)) {
                    tables.bypass_v4_clear(idx);
                }
            }
            debug!(saddr, "blacklist_gate: source blocked, dropping");
            Some(Verdict::Drop)
        }
        L3::V6 { saddr, daddr, proto, l4 } => {
            let blocked = tables.ipv6_blacklisted(*saddr) || is_ula_v6(saddr) || is_link_local_v6(saddr);
            if !blocked {
                return None;
            }
            if let Some((sport, dport)) = l4_ports(l4) {
                let tuple = FiveTupleV6 { saddr: *saddr, daddr: *daddr, sport, dport, proto: *proto, pad: [0; 3] };
                let idx = hash_index_v6(&tuple);
                if tables.bypass_v6_at(idx).is_some_and(|r| r.matches(&tuple)) {
                    tables.bypass_v6_clear(idx);
                }
            }
            debug!("blacklist_gate: v6 source blocked, dropping");
            Some(Verdict::Drop)
        }
    }
}

fn l4_ports(l4: &L4) -> Option<(u16, u16)> {
    match l4 {
        L4::Tcp { sport, dport, .. } | L4::Udp { sport, dport } => Some((*sport, *dport)),
        _ => None,
    }
}

fn is_private_v4(addr: u32) -> bool {
    let a = addr.to_be_bytes();
    a[0] == 10
        || (a[0] == 172 && (a[1] & 0xF0) == 16)
        || (a[0] == 192 && a[1] == 168)
        || (a[0] == 169 && a[1] == 254)
}

fn is_ula_v6(addr: &[u8; 16]) -> bool {
    (addr[0] & 0xFE) == 0xFC
}

fn is_link_local_v6(addr: &[u8; 16]) -> bool {
    addr[0] == 0xFE && (addr[1] & 0xC0) == 0x80
}

/// Stage 5 (spec §4.6): a fresh cache hit dispatches straight to the
/// stateful stage; anything else defers to the slow path.
fn flow_fast_path<T: Tables>(l3: &L3, now: u64, tables: &mut T) -> Option<Verdict> {
    match l3 {
        L3::NotIp => None,
        L3::V4 { saddr, daddr, l4, .. } => match l4 {
            L4::Icmp { .. } => Some(Verdict::Pass),
            L4::Tcp { sport, dport, flags } => {
                let tuple = FiveTupleV4 { saddr: *saddr, daddr: *daddr, sport: *sport, dport: *dport, proto: IPPROTO_TCP, pad: [0; 3] };
                let fresh = tables.tcp_flow_get(&tuple).is_some_and(|ts| now.saturating_sub(ts) <= TCP_IDLE_NS);
                if flags & (TCP_FLAG_FIN | TCP_FLAG_RST) != 0 {
                    tables.tcp_flow_delete(&tuple);
                }
                if fresh {
                    tables.incr_fast_path();
                    Some(stateful_tcp(&RateKey::v4(*saddr), *flags, now, tables))
                } else {
                    None
                }
            }
            L4::Udp { sport, dport } => {
                let tuple = FiveTupleV4 { saddr: *saddr, daddr: *daddr, sport: *sport, dport: *dport, proto: IPPROTO_UDP, pad: [0; 3] };
                let fresh = tables.udp_flow_get(&tuple).is_some_and(|ts| now.saturating_sub(ts) <= UDP_IDLE_NS);
                if fresh {
                    tables.incr_fast_path();
                    Some(stateful_udp(&RateKey::v4(*saddr), now, tables))
                } else {
                    None
                }
            }
            L4::Other | L4::Truncated => None,
        },
        L3::V6 { saddr, daddr, l4, .. } => match l4 {
            L4::Icmp { .. } => Some(Verdict::Pass),
            L4::Tcp { sport, dport, flags } => {
                let tuple = FiveTupleV6 { saddr: *saddr, daddr: *daddr, sport: *sport, dport: *dport, proto: IPPROTO_TCP, pad: [0; 3] };
                let fresh = tables.tcp6_flow_get(&tuple).is_some_and(|ts| now.saturating_sub(ts) <= TCP_IDLE_NS);
                if flags & (TCP_FLAG_FIN | TCP_FLAG_RST) != 0 {
                    tables.tcp6_flow_delete(&tuple);
                }
                if fresh {
                    tables.incr_fast_path();
                    Some(stateful_tcp(&RateKey::v6(*saddr), *flags, now, tables))
                } else {
                    None
                }
            }
            L4::Udp { sport, dport } => {
                let tuple = FiveTupleV6 { saddr: *saddr, daddr: *daddr, sport: *sport, dport: *dport, proto: IPPROTO_UDP, pad: [0; 3] };
                let fresh = tables.udp6_flow_get(&tuple).is_some_and(|ts| now.saturating_sub(ts) <= UDP_IDLE_NS);
                if fresh {
                    tables.incr_fast_path();
                    Some(stateful_udp(&RateKey::v6(*saddr), now, tables))
                } else {
                    None
                }
            }
            L4::Other | L4::Truncated => None,
        },
    }
}

/// Stages 6-7 (spec §4.7): publish flow presence for both protocols, then
/// either fast-track the packet (global bypass, or a per-flow bypass record
/// the inspector left in the direct-mapped cache) or fall through to the
/// stateful stage. The bypass cache records flows the inspector has already
/// vetted; a hit means "skip stateful inspection", not "drop".
fn slow_path<T: Tables>(l3: &L3, now: u64, tables: &mut T) -> Verdict {
    match l3 {
        L3::NotIp => Verdict::Pass,
        L3::V4 { saddr, daddr, l4, .. } => match l4 {
            L4::Tcp { sport, dport, flags } => {
                publish_v4(tables, *saddr, *daddr, *sport, *dport, IPPROTO_TCP, now);
                tables.incr_slow_path();
                if tables.global_bypass_enabled() {
                    return Verdict::Pass;
                }
                let tuple = FiveTupleV4 { saddr: *saddr, daddr: *daddr, sport: *sport, dport: *dport, proto: IPPROTO_TCP, pad: [0; 3] };
                if bypass_hit_v4(&tuple, tables) {
                    return Verdict::Pass;
                }
                stateful_tcp(&RateKey::v4(*saddr), *flags, now, tables)
            }
            L4::Udp { sport, dport } => {
                publish_v4(tables, *saddr, *daddr, *sport, *dport, IPPROTO_UDP, now);
                tables.incr_slow_path();
                if tables.global_bypass_enabled() {
                    return Verdict::Pass;
                }
                let tuple = FiveTupleV4 { saddr: *saddr, daddr: *daddr, sport: *sport, dport: *dport, proto: IPPROTO_UDP, pad: [0; 3] };
                if bypass_hit_v4(&tuple, tables) {
                    return Verdict::Pass;
                }
                stateful_udp(&RateKey::v4(*saddr), now, tables)
            }
            L4::Icmp { .. } | L4::Other | L4::Truncated => Verdict::Pass,
        },
        L3::V6 { saddr, daddr, l4, .. } => match l4 {
            L4::Tcp { sport, dport, flags } => {
                publish_v6(tables, *saddr, *daddr, *sport, *dport, IPPROTO_TCP, now);
                tables.incr_slow_path();
                if tables.global_bypass_enabled() {
                    return Verdict::Pass;
                }
                let tuple = FiveTupleV6 { saddr: *saddr, daddr: *daddr, sport: *sport, dport: *dport, proto: IPPROTO_TCP, pad: [0; 3] };
                if bypass_hit_v6(&tuple, tables) {
                    return Verdict::Pass;
                }
                stateful_tcp(&RateKey::v6(*saddr), *flags, now, tables)
            }
            L4::Udp { sport, dport } => {
                publish_v6(tables, *saddr, *daddr, *sport, *dport, IPPROTO_UDP, now);
                tables.incr_slow_path();
                if tables.global_bypass_enabled() {
                    return Verdict::Pass;
                }
                let tuple = FiveTupleV6 { saddr: *saddr, daddr: *daddr, sport: *sport, dport: *dport, proto: IPPROTO_UDP, pad: [0; 3] };
                if bypass_hit_v6(&tuple, tables) {
                    return Verdict::Pass;
                }
                stateful_udp(&RateKey::v6(*saddr), now, tables)
            }
            L4::Icmp { .. } | L4::Other | L4::Truncated => Verdict::Pass,
        },
    }
}

fn bypass_hit_v4<T: Tables>(tuple: &FiveTupleV4, tables: &T) -> bool {
    tables.bypass_v4_at(hash_index_v4(tuple)).is_some_and(|r: BypassRecordV4| r.matches(tuple))
}

fn bypass_hit_v6<T: Tables>(tuple: &FiveTupleV6, tables: &T) -> bool {
    tables.bypass_v6_at(hash_index_v6(tuple)).is_some_and(|r: BypassRecordV6| r.matches(tuple))
}

/// Writes an entry into both the TCP and UDP flow caches for this 5-tuple,
/// poisoning the protocol that didn't actually see traffic with
/// [`INVALID_PROTO`] so a lookup from the other protocol's fast path can
/// never match it (spec §4.7).
fn publish_v4<T: Tables>(tables: &mut T, saddr: u32, daddr: u32, sport: u16, dport: u16, proto: u8, now: u64) {
    let tcp_proto = if proto == IPPROTO_TCP { IPPROTO_TCP } else { INVALID_PROTO };
    let udp_proto = if proto == IPPROTO_UDP { IPPROTO_UDP } else { INVALID_PROTO };
    tables.tcp_flow_insert(FiveTupleV4 { saddr, daddr, sport, dport, proto: tcp_proto, pad: [0; 3] }, now);
    tables.udp_flow_insert(FiveTupleV4 { saddr, daddr, sport, dport, proto: udp_proto, pad: [0; 3] }, now);
}

fn publish_v6<T: Tables>(tables: &mut T, saddr: [u8; 16], daddr: [u8; 16], sport: u16, dport: u16, proto: u8, now: u64) {
    let tcp_proto = if proto == IPPROTO_TCP { IPPROTO_TCP } else { INVALID_PROTO };
    let udp_proto = if proto == IPPROTO_UDP { IPPROTO_UDP } else { INVALID_PROTO };
    tables.tcp6_flow_insert(FiveTupleV6 { saddr, daddr, sport, dport, proto: tcp_proto, pad: [0; 3] }, now);
    tables.udp6_flow_insert(FiveTupleV6 { saddr, daddr, sport, dport, proto: udp_proto, pad: [0; 3] }, now);
}

/// Stage 8, TCP half (spec §4.8). Only an initial SYN (SYN set, ACK clear)
/// is rate-limited; everything else passes through untouched.
fn stateful_tcp<T: Tables>(key: &RateKey, flags: u8, now: u64, tables: &mut T) -> Verdict {
    let is_initial_syn = flags & TCP_FLAG_SYN != 0 && flags & TCP_FLAG_ACK == 0;
    if !is_initial_syn {
        return Verdict::Pass;
    }
    let mut state = tables.tcp_rate_get(key).unwrap_or(TcpRateState { window_start: now, syn_count: 0, _pad: 0 });
    if now.saturating_sub(state.window_start) >= RATE_WINDOW_NS {
        state.window_start = now;
        state.syn_count = 0;
    }
    state.syn_count += 1;
    // Either threshold being exceeded drops the packet, and SYN_RATE_LIMIT
    // is the lower of the two, so it alone decides the outcome.
    let verdict = if state.syn_count > SYN_RATE_LIMIT { Verdict::Drop } else { Verdict::Pass };
    if verdict == Verdict::Drop {
        debug!(syn_count = state.syn_count, "stateful_tcp: SYN rate limit exceeded, dropping");
    }
    tables.tcp_rate_put(*key, state);
    verdict
}

/// Applies the idle-reset step of the token bucket in isolation so the
/// reset formula can be asserted without the decrement that immediately
/// follows it in [`stateful_udp`].
fn refill_udp_bucket(state: UdpRateState, cfg: Config, now: u64) -> UdpRateState {
    let idle = now.saturating_sub(state.last_seen);
    if idle >= TTL_NS {
        UdpRateState { last_seen: state.last_seen, tokens: cfg.burst, _pad: 0 }
    } else if cfg.ns == 0 {
        state
    } else {
        let refilled = state.tokens as u64 + idle / cfg.ns;
        UdpRateState { last_seen: state.last_seen, tokens: refilled.min(cfg.burst as u64) as u32, _pad: 0 }
    }
}

/// Stage 8, UDP half (spec §4.8): token-bucket rate limiting keyed on
/// source address alone.
fn stateful_udp<T: Tables>(key: &RateKey, now: u64, tables: &mut T) -> Verdict {
    let cfg = Config::or_default(tables.config());
    let existing = tables.udp_rl_get(key).unwrap_or(UdpRateState { last_seen: now, tokens: cfg.burst, _pad: 0 });
    let mut state = refill_udp_bucket(existing, cfg, now);
    let verdict = if state.tokens == 0 {
        debug!("stateful_udp: token bucket empty, dropping");
        Verdict::Drop
    } else {
        state.tokens -= 1;
        Verdict::Pass
    };
    state.last_seen = now;
    tables.udp_rl_put(*key, state);
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_bucket_refills_to_burst_after_ttl() {
        let cfg = Config { ns: DEFAULT_NS, burst: 10, _pad: 0 };
        let stale = UdpRateState { last_seen: 0, tokens: 0, _pad: 0 };
        let refilled = refill_udp_bucket(stale, cfg, TTL_NS + 1);
        assert_eq!(refilled.tokens, 10);
    }

    #[test]
    fn udp_bucket_partial_refill_caps_at_burst() {
        let cfg = Config { ns: 100, burst: 5, _pad: 0 };
        let state = UdpRateState { last_seen: 0, tokens: 2, _pad: 0 };
        let refilled = refill_udp_bucket(state, cfg, 10_000); // 100 intervals of ns=100
        assert_eq!(refilled.tokens, 5);
    }

    #[test]
    fn port_allowed_rejects_high_ports() {
        assert!(!port_allowed(u64::MAX, 64));
        assert!(port_allowed(1, 0));
        assert!(!port_allowed(1, 1));
    }

    #[test]
    fn private_v4_ranges_match_rfc1918() {
        assert!(is_private_v4(u32::from_be_bytes([10, 1, 2, 3])));
        assert!(is_private_v4(u32::from_be_bytes([172, 16, 0, 1])));
        assert!(!is_private_v4(u32::from_be_bytes([172, 32, 0, 1])));
        assert!(is_private_v4(u32::from_be_bytes([192, 168, 1, 1])));
        assert!(!is_private_v4(u32::from_be_bytes([8, 8, 8, 8])));
    }

    #[test]
    fn ula_and_link_local_v6_are_recognized() {
        let mut ula = [0u8; 16];
        ula[0] = 0xFD;
        assert!(is_ula_v6(&ula));
        let mut ll = [0u8; 16];
        ll[0] = 0xFE;
        ll[1] = 0x80;
        assert!(is_link_local_v6(&ll));
        let global = [0x20u8; 16];
        assert!(!is_ula_v6(&global) && !is_link_local_v6(&global));
    }
}
