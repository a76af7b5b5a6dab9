use crate::capabilities::HypervisorCapabilities;
use crate::domain::DomainSpec;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

pub type ConsoleStream = Box<dyn ConsoleIo + Send>;

pub trait ConsoleIo: AsyncRead + AsyncWrite + Unpin {}
impl<T: AsyncRead + AsyncWrite + Unpin> ConsoleIo for T {}

/// Opaque reference to a domain known to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainHandle {
    name: String,
}

impl DomainHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for DomainHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Narrow view of a hypervisor connection.
///
/// Builders only call [`capabilities`](Self::capabilities). The console
/// transport only calls [`open_console_stream`](Self::open_console_stream).
/// Domain lifecycle is left to the caller.
#[async_trait]
pub trait HypervisorConnection: Send + Sync {
    fn uri(&self) -> &str;
    fn capabilities(&self) -> &HypervisorCapabilities;
    async fn open_console_stream(
        &self,
        domain: &DomainHandle,
        device: &str,
    ) -> Result<ConsoleStream>;
    async fn define_domain(&self, spec: &DomainSpec) -> Result<DomainHandle>;
    async fn start_domain(&self, domain: &DomainHandle) -> Result<()>;
    async fn destroy_domain(&self, domain: &DomainHandle) -> Result<()>;
}
