//! Raw console transport.
//!
//! [`RawConsole`] attaches the host terminal to one console device of a
//! running domain. While open, host input goes to the guest verbatim and
//! guest output goes to the host display with bare `\n` turned into `\r\n`.
//!
//! ```text
//! Closed -> Opening -> Open -> Closing -> Closed
//! ```
//!
//! Every successful [`RawConsole::open`] hands back a [`ClosedListener`] that
//! fires exactly once, after the host terminal has been restored.

mod newline;
mod terminal;

pub use newline::NewlineTranslator;
pub use terminal::{HostReader, HostTerminal, HostWriter, StdioTerminal, TerminalId};

use corral_core::{ConsoleStream, DomainHandle, Error, HypervisorConnection, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use terminal::RawModeGuard;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Ctrl+], the conventional escape byte for interactive consoles.
pub const DEFAULT_ESCAPE: u8 = 0x1d;

const BUF_SIZE: usize = 4096;

/// How long guest output still pending at close may take to reach the host.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// How long `close` waits for the relay before aborting it.
const RELAY_STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// Why a console session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    GuestEof,
    GuestError(String),
    HostEof,
    HostError(String),
    /// The escape byte was typed on the host.
    Escape,
    /// SIGTERM or SIGHUP arrived while relaying.
    Signal,
    /// [`RawConsole::close`] was called or the console was dropped.
    Requested,
}

/// Delivered once per open cycle when the session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedEvent {
    pub error: bool,
    pub reason: CloseReason,
}

impl From<CloseReason> for ClosedEvent {
    fn from(reason: CloseReason) -> Self {
        let error = matches!(
            reason,
            CloseReason::GuestError(_) | CloseReason::HostError(_)
        );
        Self { error, reason }
    }
}

pub type ClosedListener = oneshot::Receiver<ClosedEvent>;

struct Session<T: HostTerminal> {
    state: ConsoleState,
    guard: Option<RawModeGuard<T>>,
    closed_tx: Option<oneshot::Sender<ClosedEvent>>,
}

type Shared<T> = Arc<Mutex<Session<T>>>;

fn lock<T: HostTerminal>(shared: &Shared<T>) -> MutexGuard<'_, Session<T>> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// Leaves the Open state: restores the terminal, then reports the event.
/// Later calls for the same cycle do nothing.
fn finish<T: HostTerminal>(shared: &Shared<T>, event: ClosedEvent) {
    let (guard, closed_tx) = {
        let mut session = lock(shared);
        if session.state == ConsoleState::Closed {
            return;
        }
        session.state = ConsoleState::Closing;
        (session.guard.take(), session.closed_tx.take())
    };

    drop(guard);
    lock(shared).state = ConsoleState::Closed;

    debug!(reason = ?event.reason, error = event.error, "console closed");
    if let Some(tx) = closed_tx {
        let _ = tx.send(event);
    }
}

/// Interactive console bound to one device of a domain.
pub struct RawConsole<T: HostTerminal = StdioTerminal> {
    device: String,
    terminal: Arc<T>,
    escape: Option<u8>,
    shared: Shared<T>,
    stop: Arc<Notify>,
    relay: Option<JoinHandle<()>>,
}

impl RawConsole<StdioTerminal> {
    /// Console relaying to this process's stdin/stdout.
    pub fn stdio(device: impl Into<String>) -> Self {
        Self::new(device, StdioTerminal)
    }
}

impl<T: HostTerminal> RawConsole<T> {
    pub fn new(device: impl Into<String>, terminal: T) -> Self {
        Self {
            device: device.into(),
            terminal: Arc::new(terminal),
            escape: None,
            shared: Arc::new(Mutex::new(Session {
                state: ConsoleState::Closed,
                guard: None,
                closed_tx: None,
            })),
            stop: Arc::new(Notify::new()),
            relay: None,
        }
    }

    /// Ends the session when `byte` is read from the host instead of
    /// forwarding it.
    pub fn with_escape(mut self, byte: u8) -> Self {
        self.escape = Some(byte);
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn state(&self) -> ConsoleState {
        lock(&self.shared).state
    }

    /// Attaches to the console device and starts relaying.
    ///
    /// On failure the console is back to Closed and the host terminal mode is
    /// unchanged.
    pub async fn open(
        &mut self,
        connection: &dyn HypervisorConnection,
        domain: &DomainHandle,
    ) -> Result<ClosedListener> {
        {
            let mut session = lock(&self.shared);
            if session.state != ConsoleState::Closed {
                return Err(Error::Attach(format!(
                    "console '{}' is not closed",
                    self.device
                )));
            }
            session.state = ConsoleState::Opening;
        }

        match self.attach(connection, domain).await {
            Ok(listener) => {
                info!(device = %self.device, domain = %domain, "console attached");
                Ok(listener)
            }
            Err(e) => {
                lock(&self.shared).state = ConsoleState::Closed;
                Err(e)
            }
        }
    }

    async fn attach(
        &mut self,
        connection: &dyn HypervisorConnection,
        domain: &DomainHandle,
    ) -> Result<ClosedListener> {
        let stream = connection
            .open_console_stream(domain, &self.device)
            .await
            .map_err(|e| match e {
                Error::Attach(_) => e,
                other => Error::Attach(format!("{}: {other}", self.device)),
            })?;

        let guard = RawModeGuard::acquire(self.terminal.clone())
            .map_err(|e| Error::Attach(format!("host terminal: {e}")))?
            .ok_or_else(|| {
                Error::Attach("host terminal is attached to another console".to_string())
            })?;

        // The guard restores the terminal if this fails.
        let (host_in, host_out) = self
            .terminal
            .io()
            .map_err(|e| Error::Attach(format!("host terminal: {e}")))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut session = lock(&self.shared);
            session.guard = Some(guard);
            session.closed_tx = Some(tx);
            session.state = ConsoleState::Open;
        }

        self.stop = Arc::new(Notify::new());
        let relay = Relay {
            guest: stream,
            host_in,
            host_out,
            escape: self.escape,
            stop: self.stop.clone(),
        };
        let shared = self.shared.clone();
        self.relay = Some(tokio::spawn(async move {
            let reason = relay.run().await;
            finish(&shared, reason.into());
        }));

        Ok(rx)
    }

    /// Stops relaying and restores the host terminal.
    ///
    /// Does nothing when already Closed or Closing. The terminal is restored
    /// even when the relay cannot be torn down cleanly.
    pub async fn close(&mut self) -> Result<()> {
        {
            let mut session = lock(&self.shared);
            match session.state {
                ConsoleState::Closed | ConsoleState::Closing => return Ok(()),
                ConsoleState::Opening | ConsoleState::Open => {
                    session.state = ConsoleState::Closing;
                }
            }
        }

        self.stop.notify_one();

        // Restore the host before waiting on a relay that may be stuck
        // behind a display that is not draining.
        let guard = lock(&self.shared).guard.take();
        drop(guard);

        let mut result = Ok(());
        if let Some(mut relay) = self.relay.take() {
            match timeout(RELAY_STOP_TIMEOUT, &mut relay).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    result = Err(Error::Transport(format!("console relay failed: {e}")));
                }
                Err(_) => {
                    warn!(device = %self.device, "console relay did not stop, aborting it");
                    relay.abort();
                }
            }
        }

        finish(&self.shared, CloseReason::Requested.into());
        result
    }
}

impl<T: HostTerminal> Drop for RawConsole<T> {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
        finish(&self.shared, CloseReason::Requested.into());
    }
}

struct Relay {
    guest: ConsoleStream,
    host_in: HostReader,
    host_out: HostWriter,
    escape: Option<u8>,
    stop: Arc<Notify>,
}

async fn recv_signal(signal: &mut Option<Signal>) {
    match signal {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}

fn register(kind: SignalKind, name: &str) -> Option<Signal> {
    match signal(kind) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(error = %e, signal = name, "cannot watch signal");
            None
        }
    }
}

impl Relay {
    /// Moves bytes in both directions until one side ends.
    ///
    /// At most one chunk is pending per direction, so a stalled writer only
    /// pauses the reader feeding it.
    async fn run(self) -> CloseReason {
        let Relay {
            guest,
            mut host_in,
            mut host_out,
            escape,
            stop,
        } = self;
        let (mut guest_rd, mut guest_wr) = tokio::io::split(guest);

        let mut sigterm = register(SignalKind::terminate(), "SIGTERM");
        let mut sighup = register(SignalKind::hangup(), "SIGHUP");

        let mut translator = NewlineTranslator::new();
        let mut host_buf = vec![0u8; BUF_SIZE];
        let mut guest_buf = vec![0u8; BUF_SIZE];
        let mut to_guest: Vec<u8> = Vec::new();
        let mut to_host: Vec<u8> = Vec::new();
        let mut detaching = false;

        let reason = loop {
            if detaching && to_guest.is_empty() {
                break CloseReason::Escape;
            }

            tokio::select! {
                _ = stop.notified() => break CloseReason::Requested,
                _ = recv_signal(&mut sigterm) => break CloseReason::Signal,
                _ = recv_signal(&mut sighup) => break CloseReason::Signal,

                r = host_in.read(&mut host_buf), if to_guest.is_empty() && !detaching => match r {
                    Ok(0) => break CloseReason::HostEof,
                    Ok(n) => {
                        let chunk = &host_buf[..n];
                        match escape.and_then(|esc| chunk.iter().position(|b| *b == esc)) {
                            Some(pos) => {
                                to_guest.extend_from_slice(&chunk[..pos]);
                                detaching = true;
                            }
                            None => to_guest.extend_from_slice(chunk),
                        }
                    }
                    Err(e) => break CloseReason::HostError(e.to_string()),
                },

                r = guest_rd.read(&mut guest_buf), if to_host.is_empty() => match r {
                    Ok(0) => break CloseReason::GuestEof,
                    Ok(n) => translator.translate(&guest_buf[..n], &mut to_host),
                    Err(e) => break CloseReason::GuestError(e.to_string()),
                },

                r = guest_wr.write(&to_guest), if !to_guest.is_empty() => match r {
                    Ok(0) => break CloseReason::GuestEof,
                    Ok(n) => {
                        to_guest.drain(..n);
                    }
                    Err(e) => break CloseReason::GuestError(e.to_string()),
                },

                r = host_out.write(&to_host), if !to_host.is_empty() => match r {
                    Ok(0) => break CloseReason::HostEof,
                    Ok(n) => {
                        to_host.drain(..n);
                        if to_host.is_empty() {
                            if let Err(e) = host_out.flush().await {
                                break CloseReason::HostError(e.to_string());
                            }
                        }
                    }
                    Err(e) => break CloseReason::HostError(e.to_string()),
                },
            }
        };

        // Whatever the guest already sent still belongs on the host display,
        // unless the display is what failed or it stopped draining.
        if !matches!(reason, CloseReason::HostError(_)) {
            let pending = to_host.len();
            let drain = async {
                host_out.write_all(&to_host).await?;
                host_out.flush().await?;
                Ok::<_, std::io::Error>(())
            };
            match timeout(DRAIN_TIMEOUT, drain).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "host display drain failed"),
                Err(_) => debug!(pending, "host display not draining, dropping output"),
            }
        }
        match timeout(DRAIN_TIMEOUT, guest_wr.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "guest stream shutdown failed"),
            Err(_) => debug!("guest stream shutdown timed out"),
        }

        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockConnection, MockTerminal};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;

    fn domain() -> DomainHandle {
        DomainHandle::new("box")
    }

    async fn recv(listener: ClosedListener) -> ClosedEvent {
        timeout(Duration::from_secs(5), listener)
            .await
            .expect("closed event timed out")
            .expect("closed sender dropped")
    }

    mod lifecycle {
        use super::*;

        #[tokio::test]
        async fn open_switches_to_raw_and_close_restores() {
            let conn = MockConnection::qemu();
            let _guest = conn.add_console("console0");
            let terminal = MockTerminal::new();
            let before = terminal.mode();

            let mut console = RawConsole::new("console0", terminal.clone());
            let listener = console.open(&conn, &domain()).await.unwrap();
            assert_eq!(console.state(), ConsoleState::Open);
            assert!(terminal.mode().raw);

            console.close().await.unwrap();
            assert_eq!(console.state(), ConsoleState::Closed);
            assert_eq!(terminal.mode(), before);

            let event = recv(listener).await;
            assert_eq!(event.reason, CloseReason::Requested);
            assert!(!event.error);
        }

        #[tokio::test]
        async fn close_twice_is_a_noop() {
            let conn = MockConnection::qemu();
            let _guest = conn.add_console("console0");
            let terminal = MockTerminal::new();
            let mut console = RawConsole::new("console0", terminal.clone());
            console.open(&conn, &domain()).await.unwrap();

            console.close().await.unwrap();
            let writes = terminal.mode_writes();
            console.close().await.unwrap();
            assert_eq!(terminal.mode_writes(), writes);
            assert_eq!(console.state(), ConsoleState::Closed);
        }

        #[tokio::test]
        async fn close_when_never_opened() {
            let terminal = MockTerminal::new();
            let mut console = RawConsole::new("console0", terminal.clone());
            console.close().await.unwrap();
            assert_eq!(terminal.mode_writes(), 0);
        }

        #[tokio::test]
        async fn open_while_open_fails() {
            let conn = MockConnection::qemu();
            let _guest = conn.add_console("console0");
            let mut console = RawConsole::new("console0", MockTerminal::new());
            console.open(&conn, &domain()).await.unwrap();

            let err = console.open(&conn, &domain()).await.unwrap_err();
            assert!(matches!(err, Error::Attach(_)));
            assert_eq!(console.state(), ConsoleState::Open);
        }

        #[tokio::test]
        async fn reopen_after_close() {
            let conn = MockConnection::qemu();
            let terminal = MockTerminal::new();
            let before = terminal.mode();
            let mut console = RawConsole::new("console0", terminal.clone());

            for _ in 0..3 {
                let _guest = conn.add_console("console0");
                let listener = console.open(&conn, &domain()).await.unwrap();
                console.close().await.unwrap();
                assert_eq!(recv(listener).await.reason, CloseReason::Requested);
                assert_eq!(terminal.mode(), before);
            }
        }

        #[tokio::test]
        async fn drop_restores_terminal() {
            let conn = MockConnection::qemu();
            let _guest = conn.add_console("console0");
            let terminal = MockTerminal::new();
            let before = terminal.mode();

            let mut console = RawConsole::new("console0", terminal.clone());
            let listener = console.open(&conn, &domain()).await.unwrap();
            drop(console);

            assert_eq!(terminal.mode(), before);
            assert_eq!(recv(listener).await.reason, CloseReason::Requested);
        }
    }

    mod attach_errors {
        use super::*;

        #[tokio::test]
        async fn missing_device() {
            let conn = MockConnection::qemu();
            let terminal = MockTerminal::new();
            let mut console = RawConsole::new("console9", terminal.clone());

            let err = console.open(&conn, &domain()).await.unwrap_err();
            assert!(matches!(err, Error::Attach(_)));
            assert_eq!(console.state(), ConsoleState::Closed);
            assert_eq!(terminal.mode_writes(), 0);
        }

        #[tokio::test]
        async fn terminal_already_claimed() {
            let conn = MockConnection::qemu();
            let _g0 = conn.add_console("console0");
            let _g1 = conn.add_console("console-logger");
            let terminal = MockTerminal::new();
            let before = terminal.mode();

            let mut first = RawConsole::new("console0", terminal.clone());
            first.open(&conn, &domain()).await.unwrap();
            let raw = terminal.mode();

            let mut second = RawConsole::new("console-logger", terminal.clone());
            let err = second.open(&conn, &domain()).await.unwrap_err();
            assert!(matches!(err, Error::Attach(ref m) if m.contains("another console")));
            assert_eq!(second.state(), ConsoleState::Closed);
            assert_eq!(terminal.mode(), raw);

            first.close().await.unwrap();
            assert_eq!(terminal.mode(), before);
        }

        #[tokio::test]
        async fn separate_terminals_do_not_conflict() {
            let conn = MockConnection::qemu();
            let _g0 = conn.add_console("console0");
            let _g1 = conn.add_console("console-logger");

            let mut a = RawConsole::new("console0", MockTerminal::new());
            let mut b = RawConsole::new("console-logger", MockTerminal::new());
            a.open(&conn, &domain()).await.unwrap();
            b.open(&conn, &domain()).await.unwrap();
            a.close().await.unwrap();
            b.close().await.unwrap();
        }

        #[tokio::test]
        async fn non_tty_is_not_touched() {
            let conn = MockConnection::qemu();
            let _guest = conn.add_console("console0");
            let terminal = MockTerminal::not_a_tty();
            let mut console = RawConsole::new("console0", terminal.clone());

            console.open(&conn, &domain()).await.unwrap();
            console.close().await.unwrap();
            assert_eq!(terminal.mode_writes(), 0);
        }
    }

    mod relay {
        use super::*;
        use tokio::io::AsyncWriteExt;

        #[tokio::test]
        async fn guest_output_is_normalized() {
            let conn = MockConnection::qemu();
            let mut guest = conn.add_console("console0");
            let terminal = MockTerminal::new();
            let mut console = RawConsole::new("console0", terminal.clone());
            console.open(&conn, &domain()).await.unwrap();
            let mut host = terminal.take_host().unwrap();

            guest.write_all(b"line1\nline2\r\n").await.unwrap();
            let mut buf = vec![0u8; 14];
            timeout(Duration::from_secs(5), host.output.read_exact(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(buf, b"line1\r\nline2\r\n");

            console.close().await.unwrap();
        }

        #[tokio::test]
        async fn host_input_is_verbatim() {
            let conn = MockConnection::qemu();
            let mut guest = conn.add_console("console0");
            let terminal = MockTerminal::new();
            let mut console = RawConsole::new("console0", terminal.clone());
            console.open(&conn, &domain()).await.unwrap();
            let mut host = terminal.take_host().unwrap();

            host.input.write_all(b"ls\r\x03\n").await.unwrap();
            let mut buf = vec![0u8; 5];
            timeout(Duration::from_secs(5), guest.read_exact(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(buf, b"ls\r\x03\n");

            console.close().await.unwrap();
        }

        #[tokio::test]
        async fn guest_eof_closes_once_without_error() {
            let conn = MockConnection::qemu();
            let guest = conn.add_console("console0");
            let terminal = MockTerminal::new();
            let before = terminal.mode();
            let mut console = RawConsole::new("console0", terminal.clone());
            let listener = console.open(&conn, &domain()).await.unwrap();

            drop(guest);
            let event = recv(listener).await;
            assert_eq!(event.reason, CloseReason::GuestEof);
            assert!(!event.error);
            assert_eq!(console.state(), ConsoleState::Closed);
            assert_eq!(terminal.mode(), before);

            console.close().await.unwrap();
            assert_eq!(console.state(), ConsoleState::Closed);
        }

        #[tokio::test]
        async fn host_eof_closes() {
            let conn = MockConnection::qemu();
            let _guest = conn.add_console("console0");
            let terminal = MockTerminal::new();
            let mut console = RawConsole::new("console0", terminal.clone());
            let listener = console.open(&conn, &domain()).await.unwrap();

            let host = terminal.take_host().unwrap();
            drop(host.input);
            assert_eq!(recv(listener).await.reason, CloseReason::HostEof);
        }

        #[tokio::test]
        async fn guest_read_error_is_an_error() {
            let conn = MockConnection::qemu();
            let guest = tokio_test::io::Builder::new()
                .read(b"boot\n")
                .read_error(std::io::Error::other("device gone"))
                .build();
            conn.add_console_stream("console0", Box::new(guest));
            let terminal = MockTerminal::new();
            let before = terminal.mode();
            let mut console = RawConsole::new("console0", terminal.clone());
            let listener = console.open(&conn, &domain()).await.unwrap();

            let event = recv(listener).await;
            assert!(event.error);
            assert!(matches!(
                event.reason,
                CloseReason::GuestError(ref m) if m.contains("device gone")
            ));
            assert_eq!(terminal.mode(), before);

            let mut host = terminal.take_host().unwrap();
            let mut shown = Vec::new();
            host.output.read_to_end(&mut shown).await.unwrap();
            assert_eq!(shown, b"boot\r\n");
        }

        #[tokio::test]
        async fn host_read_error_is_an_error() {
            let conn = MockConnection::qemu();
            let mut guest = conn.add_console("console0");
            let terminal = MockTerminal::new();
            terminal.next_input(
                tokio_test::io::Builder::new()
                    .read(b"q")
                    .read_error(std::io::Error::other("tty hung up"))
                    .build(),
            );
            let before = terminal.mode();
            let mut console = RawConsole::new("console0", terminal.clone());
            let listener = console.open(&conn, &domain()).await.unwrap();

            let event = recv(listener).await;
            assert!(event.error);
            assert!(matches!(
                event.reason,
                CloseReason::HostError(ref m) if m.contains("tty hung up")
            ));
            assert_eq!(console.state(), ConsoleState::Closed);
            assert_eq!(terminal.mode(), before);

            let mut forwarded = Vec::new();
            guest.read_to_end(&mut forwarded).await.unwrap();
            assert_eq!(forwarded, b"q");

            let writes = terminal.mode_writes();
            console.close().await.unwrap();
            assert_eq!(terminal.mode_writes(), writes);
        }

        #[tokio::test]
        async fn host_write_error_is_an_error() {
            let conn = MockConnection::qemu();
            let mut guest = conn.add_console("console0");
            let terminal = MockTerminal::new();
            terminal.next_output(
                tokio_test::io::Builder::new()
                    .write_error(std::io::Error::other("display gone"))
                    .build(),
            );
            let before = terminal.mode();
            let mut console = RawConsole::new("console0", terminal.clone());
            let listener = console.open(&conn, &domain()).await.unwrap();

            guest.write_all(b"hello\n").await.unwrap();
            let event = recv(listener).await;
            assert!(event.error);
            assert!(matches!(
                event.reason,
                CloseReason::HostError(ref m) if m.contains("display gone")
            ));
            assert_eq!(console.state(), ConsoleState::Closed);
            assert_eq!(terminal.mode(), before);
        }

        #[tokio::test]
        async fn close_with_stalled_display_restores_terminal() {
            let conn = MockConnection::qemu();
            let mut guest = conn.add_console("console0");
            let terminal = MockTerminal::new();
            let before = terminal.mode();
            let mut console = RawConsole::new("console0", terminal.clone());
            let listener = console.open(&conn, &domain()).await.unwrap();
            // Keep the display end alive but never read from it.
            let _host = terminal.take_host().unwrap();

            let flood = tokio::spawn(async move {
                let _ = guest.write_all(&vec![b'x'; 200 * 1024]).await;
                guest
            });
            tokio::time::sleep(Duration::from_millis(100)).await;

            timeout(Duration::from_secs(5), console.close())
                .await
                .expect("close hung on a stalled display")
                .unwrap();
            assert_eq!(console.state(), ConsoleState::Closed);
            assert_eq!(terminal.mode(), before);
            assert_eq!(recv(listener).await.reason, CloseReason::Requested);
            flood.abort();
        }

        #[tokio::test]
        async fn escape_byte_detaches() {
            let conn = MockConnection::qemu();
            let mut guest = conn.add_console("console0");
            let terminal = MockTerminal::new();
            let mut console =
                RawConsole::new("console0", terminal.clone()).with_escape(DEFAULT_ESCAPE);
            let listener = console.open(&conn, &domain()).await.unwrap();
            let mut host = terminal.take_host().unwrap();

            host.input.write_all(b"ab\x1dcd").await.unwrap();
            let event = recv(listener).await;
            assert_eq!(event.reason, CloseReason::Escape);
            assert!(!event.error);

            let mut forwarded = Vec::new();
            guest.read_to_end(&mut forwarded).await.unwrap();
            assert_eq!(forwarded, b"ab");
        }

        #[tokio::test]
        async fn escape_byte_is_forwarded_when_not_configured() {
            let conn = MockConnection::qemu();
            let mut guest = conn.add_console("console0");
            let terminal = MockTerminal::new();
            let mut console = RawConsole::new("console0", terminal.clone());
            console.open(&conn, &domain()).await.unwrap();
            let mut host = terminal.take_host().unwrap();

            host.input.write_all(b"\x1d").await.unwrap();
            let mut buf = [0u8; 1];
            timeout(Duration::from_secs(5), guest.read_exact(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(buf, [0x1d]);
            console.close().await.unwrap();
        }
    }

    #[test]
    fn error_flag_follows_reason() {
        assert!(!ClosedEvent::from(CloseReason::GuestEof).error);
        assert!(!ClosedEvent::from(CloseReason::Escape).error);
        assert!(ClosedEvent::from(CloseReason::HostError("x".into())).error);
        assert!(ClosedEvent::from(CloseReason::GuestError("x".into())).error);
    }
}
