//! The `attach` command - connects the terminal to a running sandbox console.

use clap::Args;
use corral::{CloseReason, DEFAULT_ESCAPE, DirectConnection, DomainHandle, RawConsole};
use std::path::PathBuf;
use tracing::debug;

#[derive(Args)]
pub struct AttachArgs {
    /// Name of the running sandbox domain
    domain: String,

    /// Pty the hypervisor exposes for the console
    #[arg(long)]
    pty: PathBuf,

    /// Console device to attach to (console0 or console-<service>)
    #[arg(long, default_value = "console0")]
    device: String,

    /// Forward Ctrl+] to the guest instead of detaching on it
    #[arg(long)]
    no_escape: bool,
}

pub async fn run(args: AttachArgs) -> anyhow::Result<i32> {
    let connection = DirectConnection::new("direct:///").device(&args.device, &args.pty);
    let domain = DomainHandle::new(&args.domain);

    let mut console = RawConsole::stdio(&args.device);
    if !args.no_escape {
        console = console.with_escape(DEFAULT_ESCAPE);
        eprintln!("Connected to {} on {}. Press Ctrl+] to detach.\r", args.device, domain);
    } else {
        eprintln!("Connected to {} on {}.\r", args.device, domain);
    }

    let closed = console.open(&connection, &domain).await?;
    let event = match closed.await {
        Ok(event) => event,
        Err(_) => {
            console.close().await?;
            anyhow::bail!("console closed without reporting why");
        }
    };
    debug!(reason = ?event.reason, "console session ended");

    match &event.reason {
        CloseReason::GuestEof => eprintln!("\r\nConsole closed by guest.\r"),
        CloseReason::Escape => eprintln!("\r\nDetached.\r"),
        CloseReason::GuestError(e) | CloseReason::HostError(e) => {
            eprintln!("\r\nConsole failed: {e}\r")
        }
        CloseReason::HostEof | CloseReason::Signal | CloseReason::Requested => {}
    }

    Ok(if event.error { 1 } else { 0 })
}
