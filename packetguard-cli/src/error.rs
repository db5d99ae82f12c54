#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    InvalidAddress(std::net::AddrParseError),

    #[error(transparent)]
    Loader(#[from] packetguard_loader::LoaderError),

    #[error(transparent)]
    Config(#[from] packetguard_loader::ConfigError),

    #[error("failed to attach XDP program: {0}")]
    Attach(#[source] packetguard_loader::LoaderError),
}
