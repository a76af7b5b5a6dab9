use std::os::fd::{AsRawFd, OwnedFd};
use std::pin::Pin;
use std::task::{Context, Poll};

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

fn poll_read_fd(
    fd: &AsyncFd<OwnedFd>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
) -> Poll<std::io::Result<()>> {
    loop {
        let mut guard = match fd.poll_read_ready(cx) {
            Poll::Ready(Ok(guard)) => guard,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => return Poll::Pending,
        };

        let raw_fd = fd.get_ref().as_raw_fd();
        let unfilled = buf.initialize_unfilled();

        match nix::unistd::read(raw_fd, unfilled) {
            Ok(n) => {
                buf.advance(n);
                return Poll::Ready(Ok(()));
            }
            Err(nix::errno::Errno::EAGAIN) => {
                guard.clear_ready();
                continue;
            }
            // A pty whose other side went away reports EIO; treat it as EOF.
            Err(nix::errno::Errno::EIO) => return Poll::Ready(Ok(())),
            Err(e) => {
                return Poll::Ready(Err(std::io::Error::from(e)));
            }
        }
    }
}

fn poll_write_fd(
    fd: &AsyncFd<OwnedFd>,
    cx: &mut Context<'_>,
    buf: &[u8],
) -> Poll<std::io::Result<usize>> {
    loop {
        let mut guard = match fd.poll_write_ready(cx) {
            Poll::Ready(Ok(guard)) => guard,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => return Poll::Pending,
        };

        match nix::unistd::write(fd.get_ref(), buf) {
            Ok(n) => return Poll::Ready(Ok(n)),
            Err(nix::errno::Errno::EAGAIN) => {
                guard.clear_ready();
                continue;
            }
            Err(e) => {
                return Poll::Ready(Err(std::io::Error::from(e)));
            }
        }
    }
}

/// Owned file descriptor driven by the tokio reactor.
///
/// The descriptor is switched to non-blocking mode for the lifetime of the
/// wrapper and its original status flags are put back on drop. Flags live on
/// the open file description, so this matters for descriptors duplicated from
/// stdin/stdout that the rest of the process keeps using.
pub struct AsyncOwnedFd {
    inner: AsyncFd<OwnedFd>,
    saved_flags: Option<OFlag>,
}

impl AsyncOwnedFd {
    pub fn new(fd: OwnedFd) -> std::io::Result<Self> {
        let raw = fd.as_raw_fd();
        let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
        let saved_flags = if flags.contains(OFlag::O_NONBLOCK) {
            None
        } else {
            fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
            Some(flags)
        };

        match AsyncFd::new(fd) {
            Ok(inner) => Ok(Self { inner, saved_flags }),
            Err(e) => {
                if let Some(flags) = saved_flags {
                    let _ = fcntl(raw, FcntlArg::F_SETFL(flags));
                }
                Err(e)
            }
        }
    }
}

impl AsRawFd for AsyncOwnedFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.inner.get_ref().as_raw_fd()
    }
}

impl Drop for AsyncOwnedFd {
    fn drop(&mut self) {
        if let Some(flags) = self.saved_flags {
            let _ = fcntl(self.as_raw_fd(), FcntlArg::F_SETFL(flags));
        }
    }
}

impl AsyncRead for AsyncOwnedFd {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        poll_read_fd(&self.inner, cx, buf)
    }
}

impl AsyncWrite for AsyncOwnedFd {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        poll_write_fd(&self.inner, cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
