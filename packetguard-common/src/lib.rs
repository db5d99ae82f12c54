//! Types and constants shared between the XDP kernel program and every
//! userspace consumer of the packet classification pipeline.
//!
//! This crate is `no_std` so it compiles for both targets:
//! - `bpfel-unknown-none` (the kernel-side XDP program)
//! - the host target (the pipeline core, the loader, tests)
//!
//! Enable the `aya-pod` feature in userspace crates to get `aya::Pod`
//! impls for reading these structs out of BPF maps.
#![no_std]

pub mod constants;

/// `AF_INET` / `AF_INET6` values, used as the family tag in whitelist and
/// ICMP allow-set keys. Matches the original C program's constants exactly
/// so a whitelist entry written by one side is read correctly by the other.
pub mod family {
    pub const INET: u8 = 2;
    pub const INET6: u8 = 10;
}

/// Whitelist table key: `{family:u8, pad[3], addr:16B}`.
///
/// IPv4 addresses occupy the first 4 bytes of `addr`; the remaining 12 are
/// zeroed. This exact 20-byte layout is part of the external contract
/// described in spec §6 — the whitelist CLI and the data plane must agree on
/// it bit-for-bit.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WhitelistKey {
    pub family: u8,
    pub pad: [u8; 3],
    pub addr: [u8; 16],
}

impl WhitelistKey {
    pub fn v4(addr: [u8; 4]) -> Self {
        let mut full = [0u8; 16];
        full[..4].copy_from_slice(&addr);
        Self { family: family::INET, pad: [0; 3], addr: full }
    }

    pub fn v6(addr: [u8; 16]) -> Self {
        Self { family: family::INET6, pad: [0; 3], addr }
    }
}

/// ICMP allow-set key: `{family, type, code}`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IcmpKey {
    pub family: u8,
    pub icmp_type: u8,
    pub code: u8,
}

/// IPv4 5-tuple, network byte order throughout, with explicit zeroed padding
/// so the struct has no bytes of undefined content. `proto` is set to the
/// real L4 protocol on a genuine match, or to [`constants::INVALID_PROTO`]
/// when a key is deliberately constructed to miss (spec §4.1, §4.7).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct FiveTupleV4 {
    pub saddr: u32,
    pub daddr: u32,
    pub sport: u16,
    pub dport: u16,
    pub proto: u8,
    pub pad: [u8; 3],
}

/// IPv6 5-tuple, addresses carried verbatim as 16-byte arrays.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct FiveTupleV6 {
    pub saddr: [u8; 16],
    pub daddr: [u8; 16],
    pub sport: u16,
    pub dport: u16,
    pub proto: u8,
    pub pad: [u8; 3],
}

/// Value stored in `flow_table_v4`: the inspector's bypass decision for a
/// hash slot, carrying the full 5-tuple so the reader can reject a
/// collision instead of trusting a stale or mismatched slot (spec §4.7).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BypassRecordV4 {
    pub saddr: u32,
    pub daddr: u32,
    pub sport: u16,
    pub dport: u16,
    pub proto: u8,
    pub dir: u8,
}

impl BypassRecordV4 {
    pub fn matches(&self, tuple: &FiveTupleV4) -> bool {
        self.saddr == tuple.saddr
            && self.daddr == tuple.daddr
            && self.sport == tuple.sport
            && self.dport == tuple.dport
            && self.proto == tuple.proto
    }
}

/// IPv6 counterpart of [`BypassRecordV4`].
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BypassRecordV6 {
    pub saddr: [u8; 16],
    pub daddr: [u8; 16],
    pub sport: u16,
    pub dport: u16,
    pub proto: u8,
    pub dir: u8,
}

impl Default for BypassRecordV6 {
    fn default() -> Self {
        Self { saddr: [0; 16], daddr: [0; 16], sport: 0, dport: 0, proto: 0, dir: 0 }
    }
}

impl BypassRecordV6 {
    pub fn matches(&self, tuple: &FiveTupleV6) -> bool {
        self.saddr == tuple.saddr
            && self.daddr == tuple.daddr
            && self.sport == tuple.sport
            && self.dport == tuple.dport
            && self.proto == tuple.proto
    }
}

/// Key shared by `tcp_rate` and `udp_rl`: `{is_v6, pad[3], addr:16B}`. A v4
/// source address is left-justified into the low 4 bytes with the rest of
/// `addr` zeroed, exactly as the original `make_key`/`udp_key` construction
/// packs it, so a v4 and v6 source can never alias the same slot.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct RateKey {
    pub is_v6: u8,
    pub pad: [u8; 3],
    pub addr: [u8; 16],
}

impl RateKey {
    pub fn v4(addr: u32) -> Self {
        let mut full = [0u8; 16];
        full[..4].copy_from_slice(&addr.to_be_bytes());
        Self { is_v6: 0, pad: [0; 3], addr: full }
    }

    pub fn v6(addr: [u8; 16]) -> Self {
        Self { is_v6: 1, pad: [0; 3], addr }
    }
}

/// Value in `tcp_rate`: the per-source SYN rate-limit window.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TcpRateState {
    pub window_start: u64,
    pub syn_count: u32,
    pub _pad: u32,
}

/// Value in `udp_rl`: the per-source UDP token bucket.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct UdpRateState {
    pub last_seen: u64,
    pub tokens: u32,
    pub _pad: u32,
}

/// Value in `cfg`: the token-bucket refill interval and burst size. A value
/// of zero in either field means "unset" and is replaced by the defaults in
/// [`constants`].
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Config {
    pub ns: u64,
    pub burst: u32,
    pub _pad: u32,
}

impl Config {
    /// Apply the spec §7 substitution: missing config uses the defaults
    /// outright; present-but-zero fields are replaced field-by-field.
    pub fn or_default(read: Option<Config>) -> Config {
        let c = read.unwrap_or(Config {
            ns: constants::DEFAULT_NS,
            burst: constants::DEFAULT_BURST,
            _pad: 0,
        });
        Config {
            ns: if c.ns == 0 { constants::DEFAULT_NS } else { c.ns },
            burst: if c.burst == 0 { constants::DEFAULT_BURST } else { c.burst },
            _pad: 0,
        }
    }
}

/// Index into the two-slot `path_stats` per-CPU counter table.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathStatsIndex {
    Fast = 0,
    Slow = 1,
}

#[cfg(feature = "aya-pod")]
mod pod_impls {
    use super::*;

    /// SAFETY: every struct below is `#[repr(C)]`, `Copy`, and every byte is
    /// either a concrete field or an explicit zeroed padding field — there is
    /// no byte of undefined content for `aya` to read out of a BPF map.
    #[allow(unsafe_code)]
    mod unsafe_pod {
        use super::*;
        unsafe impl aya::Pod for WhitelistKey {}
        unsafe impl aya::Pod for IcmpKey {}
        unsafe impl aya::Pod for FiveTupleV4 {}
        unsafe impl aya::Pod for FiveTupleV6 {}
        unsafe impl aya::Pod for BypassRecordV4 {}
        unsafe impl aya::Pod for BypassRecordV6 {}
        unsafe impl aya::Pod for RateKey {}
        unsafe impl aya::Pod for TcpRateState {}
        unsafe impl aya::Pod for UdpRateState {}
        unsafe impl aya::Pod for Config {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_key_layout_is_20_bytes() {
        assert_eq!(core::mem::size_of::<WhitelistKey>(), 20);
    }

    #[test]
    fn five_tuple_v4_layout_is_16_bytes() {
        assert_eq!(core::mem::size_of::<FiveTupleV4>(), 16);
    }

    #[test]
    fn rate_key_v4_leaves_upper_bytes_zeroed() {
        let k = RateKey::v4(0xC0A8_0001);
        assert_eq!(k.is_v6, 0);
        assert_eq!(&k.addr[4..], &[0u8; 12]);
    }

    #[test]
    fn config_or_default_substitutes_missing_and_zero() {
        let missing = Config::or_default(None);
        assert_eq!(missing.ns, constants::DEFAULT_NS);
        assert_eq!(missing.burst, constants::DEFAULT_BURST);

        let zeroed = Config::or_default(Some(Config { ns: 0, burst: 0, _pad: 0 }));
        assert_eq!(zeroed.ns, constants::DEFAULT_NS);
        assert_eq!(zeroed.burst, constants::DEFAULT_BURST);

        let partial = Config::or_default(Some(Config { ns: 500, burst: 0, _pad: 0 }));
        assert_eq!(partial.ns, 500);
        assert_eq!(partial.burst, constants::DEFAULT_BURST);
    }

    #[test]
    fn bypass_record_v4_matches_tuple() {
        let tuple = FiveTupleV4 { saddr: 1, daddr: 2, sport: 3, dport: 4, proto: 6, pad: [0; 3] };
        let record = BypassRecordV4 { saddr: 1, daddr: 2, sport: 3, dport: 4, proto: 6, dir: 0 };
        assert!(record.matches(&tuple));
        let mismatched = FiveTupleV4 { sport: 5, ..tuple };
        assert!(!record.matches(&mismatched));
    }
}
