//! Flow key construction and the hash function behind the direct-mapped
//! bypass cache. The hash itself is carried over bit-for-bit from the
//! original `idx_v4`/`idx_v6` so a bypass record the inspector computed
//! against that formula lands in the slot the data plane will actually
//! probe.

use packetguard_common::constants::FLOW_TAB_SZ;
use packetguard_common::{FiveTupleV4, FiveTupleV6};

pub fn hash_index_v4(t: &FiveTupleV4) -> u32 {
    let mut h = t.saddr ^ t.daddr;
    h ^= ((t.sport as u32) << 16) | t.dport as u32;
    h ^= t.proto as u32;
    h & (FLOW_TAB_SZ - 1)
}

pub fn hash_index_v6(t: &FiveTupleV6) -> u32 {
    let s0 = u64::from_ne_bytes(t.saddr[0..8].try_into().unwrap());
    let s1 = u64::from_ne_bytes(t.saddr[8..16].try_into().unwrap());
    let d0 = u64::from_ne_bytes(t.daddr[0..8].try_into().unwrap());
    let d1 = u64::from_ne_bytes(t.daddr[8..16].try_into().unwrap());
    let folded = s0 ^ s1 ^ d0 ^ d1;
    let mut h = folded as u32;
    h ^= ((t.sport as u32) << 16) | t.dport as u32;
    h ^= t.proto as u32;
    h & (FLOW_TAB_SZ - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_index_v4_is_in_range() {
        let t = FiveTupleV4 { saddr: 0xC0A8_0001, daddr: 0x08080808, sport: 5555, dport: 443, proto: 6, pad: [0; 3] };
        assert!(hash_index_v4(&t) < FLOW_TAB_SZ);
    }

    #[test]
    fn hash_index_v4_distinguishes_ports() {
        let base = FiveTupleV4 { saddr: 1, daddr: 2, sport: 1000, dport: 80, proto: 6, pad: [0; 3] };
        let other = FiveTupleV4 { dport: 81, ..base };
        assert_ne!(hash_index_v4(&base), hash_index_v4(&other));
    }

    #[test]
    fn hash_index_v6_is_in_range() {
        let t = FiveTupleV6 { saddr: [0xFE; 16], daddr: [0x20; 16], sport: 443, dport: 51234, proto: 6, pad: [0; 3] };
        assert!(hash_index_v6(&t) < FLOW_TAB_SZ);
    }
}
