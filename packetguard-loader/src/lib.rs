//! Userspace half of packetguard: compiles and embeds the XDP program
//! (see `build.rs`), attaches it to an interface, loads startup
//! configuration, and exposes [`Control`] for runtime changes to the
//! whitelist, blacklist, ACL bitmap, and rate-limit parameters.

pub mod attach;
pub mod config;
pub mod control;
pub mod error;
pub mod pin;

pub use attach::Attachment;
pub use config::RuntimeConfig;
pub use control::Control;
pub use error::{ConfigError, LoaderError};
pub use pin::PinnedTables;

use std::net::IpAddr;

use packetguard_common::WhitelistKey;

/// Parse a whitelist address string from [`RuntimeConfig`] into the key
/// the control-plane map expects.
pub fn whitelist_key_for(addr: &str) -> Result<WhitelistKey, std::net::AddrParseError> {
    match addr.parse::<IpAddr>()? {
        IpAddr::V4(v4) => Ok(WhitelistKey::v4(v4.octets())),
        IpAddr::V6(v6) => Ok(WhitelistKey::v6(v6.octets())),
    }
}

/// Apply a freshly loaded [`RuntimeConfig`] to the control-plane tables of
/// a just-attached program: seed the whitelist, the ACL allow-list, and
/// the UDP rate-limit parameters.
pub fn apply_runtime_config(control: &mut Control<'_>, cfg: &RuntimeConfig) {
    for addr in &cfg.whitelist {
        match whitelist_key_for(addr) {
            Ok(key) => control.whitelist_insert(key),
            Err(_) => tracing::warn!(addr, "skipping unparseable whitelist address"),
        }
    }
    for &port in &cfg.acl_allow_ports {
        control.acl_allow_port(port);
    }
    if cfg.udp_rate.refill_ns.is_some() || cfg.udp_rate.burst.is_some() {
        control.set_config(packetguard_common::Config {
            ns: cfg.udp_rate.refill_ns.unwrap_or(0),
            burst: cfg.udp_rate.burst.unwrap_or(0),
            _pad: 0,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_key_for_parses_v4_and_v6() {
        let v4 = whitelist_key_for("10.0.0.1").unwrap();
        assert_eq!(v4.family, packetguard_common::family::INET);
        let v6 = whitelist_key_for("2001:db8::1").unwrap();
        assert_eq!(v6.family, packetguard_common::family::INET6);
    }

    #[test]
    fn whitelist_key_for_rejects_garbage() {
        assert!(whitelist_key_for("not-an-address").is_err());
    }
}
