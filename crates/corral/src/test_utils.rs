//! In-memory stand-ins for a hypervisor connection and a host terminal.

use crate::console::{HostReader, HostTerminal, HostWriter, TerminalId};
use async_trait::async_trait;
use corral_core::{
    ConsoleStream, DomainHandle, DomainSpec, Error, HypervisorCapabilities, HypervisorConnection,
    Result,
};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};

const PIPE_CAPACITY: usize = 64 * 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Connection backed by in-memory console streams.
///
/// Each registered console can be opened once. Defined domains are recorded
/// so tests can check that builders never define anything.
pub struct MockConnection {
    uri: String,
    capabilities: HypervisorCapabilities,
    consoles: Mutex<HashMap<String, ConsoleStream>>,
    defined: Mutex<Vec<DomainSpec>>,
}

impl MockConnection {
    pub fn new(uri: impl Into<String>, capabilities: HypervisorCapabilities) -> Self {
        Self {
            uri: uri.into(),
            capabilities,
            consoles: Mutex::new(HashMap::new()),
            defined: Mutex::new(Vec::new()),
        }
    }

    pub fn qemu() -> Self {
        Self::new("qemu:///system", HypervisorCapabilities::qemu())
    }

    pub fn lxc() -> Self {
        Self::new("lxc:///", HypervisorCapabilities::lxc())
    }

    pub fn with_capabilities(mut self, capabilities: HypervisorCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn capabilities_mut(&mut self) -> &mut HypervisorCapabilities {
        &mut self.capabilities
    }

    /// Registers a console device and returns the guest end of it.
    pub fn add_console(&self, device: impl Into<String>) -> DuplexStream {
        let (host, guest) = tokio::io::duplex(PIPE_CAPACITY);
        self.add_console_stream(device, Box::new(host));
        guest
    }

    /// Registers a console device backed by an arbitrary stream.
    pub fn add_console_stream(&self, device: impl Into<String>, stream: ConsoleStream) {
        lock(&self.consoles).insert(device.into(), stream);
    }

    pub fn defined_domains(&self) -> Vec<DomainSpec> {
        lock(&self.defined).clone()
    }
}

#[async_trait]
impl HypervisorConnection for MockConnection {
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
        lock(&self.consoles)
            .remove(device)
            .ok_or_else(|| Error::Attach(format!("domain {domain} has no console '{device}'")))
    }

    async fn define_domain(&self, spec: &DomainSpec) -> Result<DomainHandle> {
        lock(&self.defined).push(spec.clone());
        Ok(DomainHandle::new(spec.name.clone()))
    }

    async fn start_domain(&self, _domain: &DomainHandle) -> Result<()> {
        Ok(())
    }

    async fn destroy_domain(&self, _domain: &DomainHandle) -> Result<()> {
        Ok(())
    }
}

/// Terminal settings as seen by [`MockTerminal`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockMode {
    pub raw: bool,
}

/// Test side of the host terminal: write to `input` to type, read from
/// `output` to see what was displayed.
pub struct HostEnd {
    pub input: DuplexStream,
    pub output: DuplexStream,
}

struct TerminalState {
    id: Option<TerminalId>,
    mode: Mutex<MockMode>,
    mode_writes: AtomicUsize,
    host: Mutex<Option<HostEnd>>,
    next_input: Mutex<Option<HostReader>>,
    next_output: Mutex<Option<HostWriter>>,
}

/// Host terminal with observable mode. Clones refer to the same terminal.
#[derive(Clone)]
pub struct MockTerminal {
    state: Arc<TerminalState>,
}

static NEXT_INODE: AtomicU64 = AtomicU64::new(1);

impl MockTerminal {
    pub fn new() -> Self {
        let ino = NEXT_INODE.fetch_add(1, Ordering::Relaxed);
        Self::with_id(Some(TerminalId {
            dev: u64::MAX - 1,
            ino,
        }))
    }

    /// Host side that is not a tty, like a pipe or a file.
    pub fn not_a_tty() -> Self {
        Self::with_id(None)
    }

    fn with_id(id: Option<TerminalId>) -> Self {
        Self {
            state: Arc::new(TerminalState {
                id,
                mode: Mutex::new(MockMode::default()),
                mode_writes: AtomicUsize::new(0),
                host: Mutex::new(None),
                next_input: Mutex::new(None),
                next_output: Mutex::new(None),
            }),
        }
    }

    pub fn mode(&self) -> MockMode {
        *lock(&self.state.mode)
    }

    /// Number of times the mode was set.
    pub fn mode_writes(&self) -> usize {
        self.state.mode_writes.load(Ordering::SeqCst)
    }

    /// Uses `reader` as host input for the next session instead of
    /// [`HostEnd::input`].
    pub fn next_input(&self, reader: impl AsyncRead + Send + Unpin + 'static) {
        *lock(&self.state.next_input) = Some(Box::new(reader));
    }

    /// Uses `writer` as host display for the next session instead of
    /// [`HostEnd::output`].
    pub fn next_output(&self, writer: impl AsyncWrite + Send + Unpin + 'static) {
        *lock(&self.state.next_output) = Some(Box::new(writer));
    }

    /// Takes the test side of the most recent session.
    pub fn take_host(&self) -> Option<HostEnd> {
        lock(&self.state.host).take()
    }
}

impl Default for MockTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl HostTerminal for MockTerminal {
    type Mode = MockMode;

    fn identity(&self) -> io::Result<Option<TerminalId>> {
        Ok(self.state.id)
    }

    fn get_mode(&self) -> io::Result<MockMode> {
        Ok(self.mode())
    }

    fn set_mode(&self, mode: &MockMode) -> io::Result<()> {
        *lock(&self.state.mode) = *mode;
        self.state.mode_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn raw_mode(&self, _saved: &MockMode) -> MockMode {
        MockMode { raw: true }
    }

    fn io(&self) -> io::Result<(HostReader, HostWriter)> {
        let (input, reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (writer, output) = tokio::io::duplex(PIPE_CAPACITY);
        *lock(&self.state.host) = Some(HostEnd { input, output });
        let reader = lock(&self.state.next_input)
            .take()
            .unwrap_or_else(|| Box::new(reader));
        let writer = lock(&self.state.next_output)
            .take()
            .unwrap_or_else(|| Box::new(writer));
        Ok((reader, writer))
    }
}
