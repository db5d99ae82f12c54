//! Wire and policy constants. Names follow the original C program's macros
//! where one exists, so the two stay easy to cross-reference.

pub const ETH_HLEN: usize = 14;
pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_IPV6: u16 = 0x86DD;
pub const ETH_P_8021Q: u16 = 0x8100;
pub const ETH_P_8021AD: u16 = 0x88A8;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ICMPV6: u8 = 58;

/// Sentinel protocol byte used to construct a key that is guaranteed to miss
/// on lookup (spec §4.1, §4.7).
pub const INVALID_PROTO: u8 = 255;

/// TCP flag bit positions within the flags byte.
pub const TCP_FLAG_FIN: u8 = 0b0000_0001;
pub const TCP_FLAG_SYN: u8 = 0b0000_0010;
pub const TCP_FLAG_RST: u8 = 0b0000_0100;
pub const TCP_FLAG_ACK: u8 = 0b0001_0000;

/// ICMP echo request/reply types, used by the whitelist gate's unsolicited
/// echo rule (spec §4.2).
pub const ICMPV4_ECHO_REPLY: u8 = 0;
pub const ICMPV4_ECHO_REQUEST: u8 = 8;
pub const ICMPV6_ECHO_REQUEST: u8 = 128;
pub const ICMPV6_ECHO_REPLY: u8 = 129;

/// Direct-mapped bypass cache size (spec §3, §4.7).
pub const FLOW_TAB_SZ: u32 = 65536;

/// Table capacities (spec §3).
pub const WHITELIST_CAP: u32 = 64;
pub const ICMP_ALLOW_CAP: u32 = 32;
pub const IPV4_DROP_CAP: u32 = 4096;
pub const IPV6_DROP_CAP: u32 = 4096;
pub const TCP_FLOW_CAP: u32 = 32768;
pub const UDP_FLOW_CAP: u32 = 32768;
pub const TCP6_FLOW_CAP: u32 = 32768;
pub const UDP6_FLOW_CAP: u32 = 32768;
pub const TCP_RATE_CAP: u32 = 128;
pub const UDP_RL_CAP: u32 = 128;

/// Idle thresholds after which a flow-cache hit is treated as a miss
/// (spec §3 invariants, §4.6).
pub const TCP_IDLE_NS: u64 = 15 * 1_000_000_000;
pub const UDP_IDLE_NS: u64 = 5 * 1_000_000_000;

/// TCP SYN rate limiter constants (spec §4.8).
pub const RATE_WINDOW_NS: u64 = 1_000_000_000;
pub const SYN_RATE_LIMIT: u32 = 20;
pub const SYN_BURST_LIMIT: u32 = 100;

/// UDP token bucket constants (spec §4.8).
pub const TTL_NS: u64 = 5 * 1_000_000_000;
pub const DEFAULT_NS: u64 = 1_000_000;
pub const DEFAULT_BURST: u32 = 100;
