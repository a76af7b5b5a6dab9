//! Host terminal access for the raw console.

use corral_core::AsyncOwnedFd;
use nix::sys::termios::{self, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg, Termios};
use std::collections::HashSet;
use std::io::{self, IsTerminal};
use std::os::fd::AsFd;
use std::os::unix::fs::MetadataExt;
use std::sync::{Arc, LazyLock, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

pub type HostReader = Box<dyn AsyncRead + Send + Unpin>;
pub type HostWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Identity of a terminal device, stable across duplicated descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TerminalId {
    pub dev: u64,
    pub ino: u64,
}

/// The host side of a console session.
pub trait HostTerminal: Send + Sync + 'static {
    /// Saved terminal settings.
    type Mode: Clone + Send + 'static;

    /// Device identity, or `None` when the host side is not a terminal. Mode
    /// is never touched for non-terminals.
    fn identity(&self) -> io::Result<Option<TerminalId>>;

    fn get_mode(&self) -> io::Result<Self::Mode>;

    fn set_mode(&self, mode: &Self::Mode) -> io::Result<()>;

    /// Raw variant of `saved`.
    fn raw_mode(&self, saved: &Self::Mode) -> Self::Mode;

    /// Fresh reader for host input and writer for host display.
    fn io(&self) -> io::Result<(HostReader, HostWriter)>;
}

static CLAIMED: LazyLock<Mutex<HashSet<TerminalId>>> = LazyLock::new(Default::default);

/// Exclusive hold on a terminal, released on drop.
#[derive(Debug)]
pub(crate) struct TerminalClaim {
    id: TerminalId,
}

impl TerminalClaim {
    pub(crate) fn acquire(id: TerminalId) -> Option<Self> {
        let mut claimed = CLAIMED.lock().unwrap_or_else(|e| e.into_inner());
        if claimed.insert(id) {
            Some(Self { id })
        } else {
            None
        }
    }
}

impl Drop for TerminalClaim {
    fn drop(&mut self) {
        CLAIMED
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

/// Holds a terminal in raw mode and puts the saved mode back on drop.
pub(crate) struct RawModeGuard<T: HostTerminal> {
    terminal: Arc<T>,
    saved: Option<T::Mode>,
    _claim: Option<TerminalClaim>,
}

impl<T: HostTerminal> RawModeGuard<T> {
    /// Claims the terminal and switches it to raw mode.
    ///
    /// Returns `Ok(None)` when another console already holds the terminal.
    pub(crate) fn acquire(terminal: Arc<T>) -> io::Result<Option<Self>> {
        let Some(id) = terminal.identity()? else {
            debug!("host side is not a terminal, leaving mode alone");
            return Ok(Some(Self {
                terminal,
                saved: None,
                _claim: None,
            }));
        };

        let Some(claim) = TerminalClaim::acquire(id) else {
            return Ok(None);
        };

        let saved = terminal.get_mode()?;
        let raw = terminal.raw_mode(&saved);
        terminal.set_mode(&raw)?;

        Ok(Some(Self {
            terminal,
            saved: Some(saved),
            _claim: Some(claim),
        }))
    }
}

impl<T: HostTerminal> Drop for RawModeGuard<T> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(e) = self.terminal.set_mode(&saved) {
                warn!(error = %e, "failed to restore host terminal mode");
            }
        }
    }
}

/// The process's stdin/stdout.
///
/// Mode changes go through stdin. Input and output use duplicated
/// descriptors registered with the reactor, falling back to tokio's blocking
/// stdio when the descriptors cannot be polled (regular files).
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioTerminal;

impl HostTerminal for StdioTerminal {
    type Mode = Termios;

    fn identity(&self) -> io::Result<Option<TerminalId>> {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return Ok(None);
        }
        let file = std::fs::File::from(stdin.as_fd().try_clone_to_owned()?);
        let meta = file.metadata()?;
        Ok(Some(TerminalId {
            dev: meta.dev(),
            ino: meta.ino(),
        }))
    }

    fn get_mode(&self) -> io::Result<Termios> {
        Ok(termios::tcgetattr(io::stdin().as_fd())?)
    }

    fn set_mode(&self, mode: &Termios) -> io::Result<()> {
        termios::tcsetattr(io::stdin().as_fd(), SetArg::TCSADRAIN, mode)?;
        Ok(())
    }

    fn raw_mode(&self, saved: &Termios) -> Termios {
        let mut raw = saved.clone();

        // Equivalent to cfmakeraw() - full raw mode
        raw.input_flags.remove(InputFlags::IGNBRK);
        raw.input_flags.remove(InputFlags::BRKINT);
        raw.input_flags.remove(InputFlags::PARMRK);
        raw.input_flags.remove(InputFlags::ISTRIP);
        raw.input_flags.remove(InputFlags::INLCR);
        raw.input_flags.remove(InputFlags::IGNCR);
        raw.input_flags.remove(InputFlags::ICRNL);
        raw.input_flags.remove(InputFlags::IXON);

        raw.output_flags.remove(OutputFlags::OPOST);

        raw.local_flags.remove(LocalFlags::ECHO);
        raw.local_flags.remove(LocalFlags::ECHONL);
        raw.local_flags.remove(LocalFlags::ICANON);
        raw.local_flags.remove(LocalFlags::ISIG);
        raw.local_flags.remove(LocalFlags::IEXTEN);

        raw.control_flags.remove(ControlFlags::CSIZE);
        raw.control_flags.remove(ControlFlags::PARENB);
        raw.control_flags.insert(ControlFlags::CS8);

        raw
    }

    fn io(&self) -> io::Result<(HostReader, HostWriter)> {
        let reader: HostReader = match AsyncOwnedFd::new(io::stdin().as_fd().try_clone_to_owned()?)
        {
            Ok(fd) => Box::new(fd),
            Err(e) => {
                debug!(error = %e, "stdin is not pollable, using blocking reads");
                Box::new(tokio::io::stdin())
            }
        };
        let writer: HostWriter =
            match AsyncOwnedFd::new(io::stdout().as_fd().try_clone_to_owned()?) {
                Ok(fd) => Box::new(fd),
                Err(e) => {
                    debug!(error = %e, "stdout is not pollable, using blocking writes");
                    Box::new(tokio::io::stdout())
                }
            };
        Ok((reader, writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive_until_dropped() {
        let id = TerminalId {
            dev: u64::MAX,
            ino: 4242,
        };
        let first = TerminalClaim::acquire(id).expect("first claim");
        assert!(TerminalClaim::acquire(id).is_none());
        drop(first);
        assert!(TerminalClaim::acquire(id).is_some());
    }

    #[test]
    fn refused_claim_keeps_the_holder() {
        let id = TerminalId {
            dev: u64::MAX,
            ino: 4343,
        };
        let first = TerminalClaim::acquire(id).expect("first claim");
        assert!(TerminalClaim::acquire(id).is_none());
        assert!(TerminalClaim::acquire(id).is_none());
        assert!(CLAIMED.lock().unwrap().contains(&id));
        drop(first);
        assert!(!CLAIMED.lock().unwrap().contains(&id));
    }

    #[test]
    fn claims_are_per_terminal() {
        let a = TerminalClaim::acquire(TerminalId {
            dev: u64::MAX,
            ino: 1,
        });
        let b = TerminalClaim::acquire(TerminalId {
            dev: u64::MAX,
            ino: 2,
        });
        assert!(a.is_some());
        assert!(b.is_some());
    }

    #[test]
    fn raw_mode_disables_canonical_input() {
        let pty = nix::pty::openpty(None, None).unwrap();
        let mode = termios::tcgetattr(&pty.slave).unwrap();
        let raw = StdioTerminal.raw_mode(&mode);
        assert!(!raw.local_flags.contains(LocalFlags::ICANON));
        assert!(!raw.local_flags.contains(LocalFlags::ECHO));
        assert!(!raw.output_flags.contains(OutputFlags::OPOST));
        assert!(raw.control_flags.contains(ControlFlags::CS8));
    }
}
