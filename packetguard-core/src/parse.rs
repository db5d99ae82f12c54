//! Bounds-checked header extraction. Every slice index here is preceded by a
//! length check, mirroring the `ptr_at`/`data_end` discipline the kernel side
//! has to follow for the verifier — on the host it buys us the same property
//! for a different reason: a short or garbled capture can never panic.

use packetguard_common::constants::*;

/// Parsed L4 header fields, or a reason we couldn't get them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L4 {
    Tcp { sport: u16, dport: u16, flags: u8 },
    Udp { sport: u16, dport: u16 },
    Icmp { icmp_type: u8, code: u8 },
    /// L3 header parsed fine but `proto` names something we don't classify.
    Other,
    /// `proto` was readable but the L4 header itself was short.
    Truncated,
}

/// Parsed packet, or [`L3::NotIp`] when there isn't enough of an Ethernet +
/// IP header to say anything at all. A gate sees `NotIp` as "doesn't apply",
/// never as a verdict of its own — see `pipeline::classify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L3 {
    NotIp,
    V4 { saddr: u32, daddr: u32, proto: u8, l4: L4 },
    V6 { saddr: [u8; 16], daddr: [u8; 16], proto: u8, l4: L4 },
}

pub fn parse(data: &[u8]) -> L3 {
    if data.len() < ETH_HLEN {
        return L3::NotIp;
    }
    let ethertype = u16::from_be_bytes([data[12], data[13]]);
    let payload = &data[ETH_HLEN..];
    match ethertype {
        ETH_P_IP => parse_v4(payload),
        ETH_P_IPV6 => parse_v6(payload),
        _ => L3::NotIp,
    }
}

fn parse_v4(ip: &[u8]) -> L3 {
    if ip.len() < 20 {
        return L3::NotIp;
    }
    let ihl = (ip[0] & 0x0F) as usize * 4;
    if ihl < 20 || ip.len() < ihl {
        return L3::NotIp;
    }
    let proto = ip[9];
    let saddr = u32::from_be_bytes([ip[12], ip[13], ip[14], ip[15]]);
    let daddr = u32::from_be_bytes([ip[16], ip[17], ip[18], ip[19]]);
    let l4 = parse_l4(proto, &ip[ihl..]);
    L3::V4 { saddr, daddr, proto, l4 }
}

fn parse_v6(ip: &[u8]) -> L3 {
    if ip.len() < 40 {
        return L3::NotIp;
    }
    let proto = ip[6];
    let mut saddr = [0u8; 16];
    let mut daddr = [0u8; 16];
    saddr.copy_from_slice(&ip[8..24]);
    daddr.copy_from_slice(&ip[24..40]);
    let l4 = parse_l4(proto, &ip[40..]);
    L3::V6 { saddr, daddr, proto, l4 }
}

fn parse_l4(proto: u8, rest: &[u8]) -> L4 {
    match proto {
        IPPROTO_TCP => {
            if rest.len() < 14 {
                L4::Truncated
            } else {
                L4::Tcp {
                    sport: u16::from_be_bytes([rest[0], rest[1]]),
                    dport: u16::from_be_bytes([rest[2], rest[3]]),
                    flags: rest[13],
                }
            }
        }
        IPPROTO_UDP => {
            if rest.len() < 4 {
                L4::Truncated
            } else {
                L4::Udp {
                    sport: u16::from_be_bytes([rest[0], rest[1]]),
                    dport: u16::from_be_bytes([rest[2], rest[3]]),
                }
            }
        }
        IPPROTO_ICMP | IPPROTO_ICMPV6 => {
            if rest.len() < 2 {
                L4::Truncated
            } else {
                L4::Icmp { icmp_type: rest[0], code: rest[1] }
            }
        }
        _ => L4::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth(ethertype: u16) -> Vec<u8> {
        let mut v = vec![0u8; 12];
        v.extend_from_slice(&ethertype.to_be_bytes());
        v
    }

    #[test]
    fn short_frame_is_not_ip() {
        assert_eq!(parse(&[0u8; 13]), L3::NotIp);
    }

    #[test]
    fn bare_ethernet_frame_is_not_ip() {
        let frame = eth(ETH_P_IP);
        assert_eq!(frame.len(), ETH_HLEN);
        assert_eq!(parse(&frame), L3::NotIp);
    }

    #[test]
    fn v4_tcp_packet_parses_fields() {
        let mut frame = eth(ETH_P_IP);
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[9] = IPPROTO_TCP;
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 2]);
        let mut tcp = vec![0u8; 14];
        tcp[0..2].copy_from_slice(&1234u16.to_be_bytes());
        tcp[2..4].copy_from_slice(&80u16.to_be_bytes());
        tcp[13] = TCP_FLAG_SYN;
        frame.extend_from_slice(&ip);
        frame.extend_from_slice(&tcp);
        let parsed = parse(&frame);
        match parsed {
            L3::V4 { saddr, daddr, proto, l4: L4::Tcp { sport, dport, flags } } => {
                assert_eq!(saddr, u32::from_be_bytes([10, 0, 0, 1]));
                assert_eq!(daddr, u32::from_be_bytes([10, 0, 0, 2]));
                assert_eq!(proto, IPPROTO_TCP);
                assert_eq!(sport, 1234);
                assert_eq!(dport, 80);
                assert_eq!(flags, TCP_FLAG_SYN);
            }
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn v4_tcp_header_truncated_mid_header() {
        let mut frame = eth(ETH_P_IP);
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[9] = IPPROTO_TCP;
        frame.extend_from_slice(&ip);
        frame.extend_from_slice(&[0u8; 4]); // only 4 of 14 TCP bytes present
        assert!(matches!(parse(&frame), L3::V4 { l4: L4::Truncated, .. }));
    }

    #[test]
    fn v4_unknown_proto_is_other() {
        let mut frame = eth(ETH_P_IP);
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[9] = 47; // GRE
        frame.extend_from_slice(&ip);
        assert!(matches!(parse(&frame), L3::V4 { l4: L4::Other, .. }));
    }

    #[test]
    fn v6_udp_packet_parses_fields() {
        let mut frame = eth(ETH_P_IPV6);
        let mut ip6 = vec![0u8; 40];
        ip6[6] = IPPROTO_UDP;
        ip6[8] = 0xFE;
        ip6[9] = 0x80;
        let mut udp = vec![0u8; 4];
        udp[0..2].copy_from_slice(&53u16.to_be_bytes());
        udp[2..4].copy_from_slice(&5353u16.to_be_bytes());
        frame.extend_from_slice(&ip6);
        frame.extend_from_slice(&udp);
        match parse(&frame) {
            L3::V6 { saddr, l4: L4::Udp { sport, dport }, .. } => {
                assert_eq!(saddr[0], 0xFE);
                assert_eq!(sport, 53);
                assert_eq!(dport, 5353);
            }
            other => panic!("unexpected parse result: {other:?}"),
        }
    }
}
