//! The packet classification pipeline.
//!
//! A packet is run through seven gates in a fixed order; the first one to
//! produce a verdict wins:
//!
//! 1. whitelist (source address allow-list, plus an unsolicited-ICMP-echo
//!    drop on miss)
//! 2. panic (global kill switch)
//! 3. ACL (destination port / ICMP type allow-list)
//! 4. blacklist (source address deny-list, including RFC1918/ULA/link-local)
//! 5. flow fast path (direct hit on a live per-protocol flow cache)
//! 6. slow path (publishes flow presence, applies the inspector's bypass
//!    cache)
//! 7. stateful (TCP SYN rate limiting, UDP token-bucket rate limiting)
//!
//! [`tables::Tables`] is the storage seam: [`sim::SimTables`] backs the unit
//! tests in this crate and a software-only run mode; `packetguard-loader`
//! supplies the real implementation over `aya::maps`.

pub mod keys;
pub mod parse;
pub mod pipeline;
pub mod sim;
pub mod tables;

pub use pipeline::{classify, Verdict};
pub use tables::Tables;
