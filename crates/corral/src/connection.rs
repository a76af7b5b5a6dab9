use async_trait::async_trait;
use corral_core::{
    AsyncOwnedFd, ConsoleStream, DomainHandle, DomainSpec, Error, HypervisorCapabilities,
    HypervisorConnection, Result,
};
use nix::fcntl::OFlag;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use tracing::debug;

/// Connection that attaches to consoles by opening the pty paths the
/// hypervisor exposes for a running domain.
///
/// It knows nothing about domain lifecycle: defining, starting and
/// destroying are left to the hypervisor's own tooling.
#[derive(Debug, Clone)]
pub struct DirectConnection {
    uri: String,
    capabilities: HypervisorCapabilities,
    devices: HashMap<String, PathBuf>,
}

impl DirectConnection {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            capabilities: HypervisorCapabilities::default(),
            devices: HashMap::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: HypervisorCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Maps a console device name to the pty backing it.
    pub fn device(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.devices.insert(name.into(), path.into());
        self
    }

    fn unsupported(&self, what: &str) -> Error {
        Error::Hypervisor(format!("{} cannot {what} domains", self.uri))
    }
}

#[async_trait]
impl HypervisorConnection for DirectConnection {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn capabilities(&self) -> &HypervisorCapabilities {
        &self.capabilities
    }

    async fn open_console_stream(
        &self,
        domain: &DomainHandle,
        device: &str,
    ) -> Result<ConsoleStream> {
        let path = self
            .devices
            .get(device)
            .ok_or_else(|| Error::Attach(format!("domain {domain} has no console '{device}'")))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlag::O_NOCTTY.bits())
            .open(path)
            .map_err(|e| Error::Attach(format!("{}: {e}", path.display())))?;
        let fd = AsyncOwnedFd::new(OwnedFd::from(file))
            .map_err(|e| Error::Attach(format!("{}: {e}", path.display())))?;

        debug!(domain = %domain, device, path = %path.display(), "opened console pty");
        Ok(Box::new(fd))
    }

    async fn define_domain(&self, _spec: &DomainSpec) -> Result<DomainHandle> {
        Err(self.unsupported("define"))
    }

    async fn start_domain(&self, _domain: &DomainHandle) -> Result<()> {
        Err(self.unsupported("start"))
    }

    async fn destroy_domain(&self, _domain: &DomainHandle) -> Result<()> {
        Err(self.unsupported("destroy"))
    }
}
