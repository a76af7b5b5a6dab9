//! Shared types for corral sandboxes: configuration, domain specifications,
//! the hypervisor connection seam and the workspace error type.

pub mod async_fd;
pub mod capabilities;
pub mod cmdline;
pub mod domain;
pub mod error;
pub mod hypervisor;
pub mod types;

pub use async_fd::AsyncOwnedFd;
pub use capabilities::{
    BootMethodSupport, HypervisorCapabilities, ImageFormatSupport, NetworkSourceSupport,
    ShareMechanismSupport,
};
pub use cmdline::{CmdlineArg, KernelCmdline};
pub use domain::{
    ConfigChannel, ConsoleDevice, DiskDevice, DomainBoot, DomainSpec, FilesystemDevice,
    FilesystemDriver, GuestMount, NetworkDevice, SecurityLabel,
};
pub use error::{BuildError, Error, Result};
pub use hypervisor::{ConsoleIo, ConsoleStream, DomainHandle, HypervisorConnection};
pub use types::{
    BackendKind, BootSource, CommandSpec, DiskImage, ImageFormat, MountMode, MountSpec,
    NetworkInterface, NetworkSource, NetworkSpec, ResourceConfig, SandboxConfig, SecurityContext,
    ServiceConfig, validate_guest_path,
};
