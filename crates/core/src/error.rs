use corral_protocol::DescriptorError;

/// Reasons a builder refuses to produce a domain specification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("no boot source configured")]
    MissingBootSource,

    #[error("unsupported boot source: {0}")]
    UnsupportedBootSource(String),

    #[error("invalid mount: {0}")]
    InvalidMount(String),

    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),
}

/// Errors that can occur when using corral.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("build failed: {0}")]
    Build(#[from] BuildError),

    #[error("console attach failed: {0}")]
    Attach(String),

    #[error("console transport failed: {0}")]
    Transport(String),

    #[error("no builder available for backend '{0}'")]
    NoBuilder(String),

    #[error("hypervisor error: {0}")]
    Hypervisor(String),

    #[error("failed to parse config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DescriptorError> for Error {
    fn from(err: DescriptorError) -> Self {
        Error::InvalidConfig(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
