#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("failed to load BPF object: {0}")]
    Load(#[from] aya::EbpfError),

    #[error("XDP program 'packetguard' not found in BPF object")]
    ProgramNotFound,

    #[error("BPF program is not an XDP program: {0}")]
    ProgramType(#[source] aya::programs::ProgramError),

    #[error("failed to load XDP program into kernel: {0}")]
    ProgramLoad(#[source] aya::programs::ProgramError),

    #[error("failed to attach XDP program to interface: {0}")]
    Attach(#[source] aya::programs::ProgramError),

    #[error("BPF map '{0}' not found")]
    MapNotFound(&'static str),

    #[error("failed to open BPF map '{0}': {1}")]
    MapOpen(&'static str, #[source] aya::maps::MapError),

    #[error("BPF map operation on '{0}' failed: {1}")]
    MapOperation(&'static str, #[source] aya::maps::MapError),

    #[error("failed to create pin directory: {0}")]
    PinDir(#[source] std::io::Error),

    #[error("ACL port bitmap only covers ports 0-63, got {0}")]
    PortOutOfRange(u16),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },

    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, #[source] source: toml::de::Error },
}
