//! TOML-backed startup configuration: the interface to attach to and the
//! initial contents of the control-plane tables. Everything here is a
//! one-time load at process start; runtime changes go through
//! [`crate::control::Control`] instead.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Network interface to attach the XDP program to.
    pub interface: String,
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub acl_allow_ports: Vec<u16>,
    #[serde(default)]
    pub udp_rate: UdpRateConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct UdpRateConfig {
    pub refill_ns: Option<u64>,
    pub burst: Option<u32>,
}

impl RuntimeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.display().to_string(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let cfg: RuntimeConfig = toml::from_str("interface = \"eth0\"\n").unwrap();
        assert_eq!(cfg.interface, "eth0");
        assert!(cfg.whitelist.is_empty());
        assert!(cfg.udp_rate.refill_ns.is_none());
    }

    #[test]
    fn parses_full_config() {
        let text = r#"
            interface = "eth0"
            whitelist = ["10.0.0.1", "2001:db8::1"]
            acl_allow_ports = [22, 443]

            [udp_rate]
            refill_ns = 2000000
            burst = 200
        "#;
        let cfg: RuntimeConfig = toml::from_str(text).unwrap();
        assert_eq!(cfg.whitelist.len(), 2);
        assert_eq!(cfg.acl_allow_ports, vec![22, 443]);
        assert_eq!(cfg.udp_rate.burst, Some(200));
    }

    #[test]
    fn missing_file_reports_read_error() {
        let err = RuntimeConfig::load(Path::new("/nonexistent/packetguard.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
