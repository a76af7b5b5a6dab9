//! Hypervisor-backed sandboxes.
//!
//! Corral turns a declarative [`SandboxConfig`] into a [`DomainSpec`] that an
//! external hypervisor can define and start, and attaches the host terminal
//! to the running guest's consoles.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use corral::{DomainHandle, HypervisorConnection, RawConsole, SandboxConfig, build_domain};
//!
//! # async fn example(conn: &dyn HypervisorConnection) -> corral::Result<()> {
//! let config = SandboxConfig::new("web", ["/usr/bin/httpd", "-f"])
//!     .kernel_boot("/boot/vmlinuz", "/boot/initrd.img")
//!     .memory_mb(1024);
//!
//! let spec = build_domain(&config, conn)?;
//! let domain = conn.define_domain(&spec).await?;
//! conn.start_domain(&domain).await?;
//!
//! let mut console = RawConsole::stdio("console0");
//! let closed = console.open(conn, &domain).await?;
//! let _event = closed.await;
//! # Ok(())
//! # }
//! ```
//!
//! The guest side is `corral-init`, which reads the service descriptor the
//! builder embeds and starts one process per console.

mod builder;
pub mod config;
mod connection;
mod console;
mod services;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// ============================================================================
// Building domains
// ============================================================================

pub use builder::{
    CONTAINER_INIT_PATH, ContainerBuilder, MachineBuilder, SandboxBuilder, backend_for_uri,
    build_domain, builder_for,
};
pub use services::build_descriptor;

pub use corral_core::{
    BackendKind, BootSource, CommandSpec, DiskImage, ImageFormat, MountMode, MountSpec,
    NetworkInterface, NetworkSource, NetworkSpec, ResourceConfig, SandboxConfig, SecurityContext,
    ServiceConfig,
};
pub use corral_core::{
    ConfigChannel, ConsoleDevice, DiskDevice, DomainBoot, DomainSpec, FilesystemDevice,
    FilesystemDriver, GuestMount, NetworkDevice, SecurityLabel,
};
pub use corral_protocol::{ServiceDescriptor, ServiceRecord};

// ============================================================================
// Consoles
// ============================================================================

pub use connection::DirectConnection;
pub use console::{
    CloseReason, ClosedEvent, ClosedListener, ConsoleState, DEFAULT_ESCAPE, HostReader,
    HostTerminal, HostWriter, NewlineTranslator, RawConsole, StdioTerminal, TerminalId,
};
pub use corral_core::{ConsoleStream, DomainHandle, HypervisorConnection};

// Errors
pub use corral_core::{BuildError, Error, Result};

/// Hypervisor capability flags consulted by the builders.
pub mod capabilities {
    pub use corral_core::{
        BootMethodSupport, HypervisorCapabilities, ImageFormatSupport, NetworkSourceSupport,
        ShareMechanismSupport,
    };
}
