mod config;
mod disk;
mod mount;
mod network;

pub use config::{
    BackendKind, BootSource, CommandSpec, DEFAULT_GROUP, DEFAULT_SECURITY_TYPE, DEFAULT_USER,
    DEFAULT_WORKDIR, SandboxConfig, SecurityContext, ServiceConfig,
};
pub use disk::{DiskImage, ImageFormat};
pub use mount::{MountMode, MountSpec, validate_guest_path};
pub use network::{NetworkInterface, NetworkSource, NetworkSpec};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub cpus: u32,
    pub memory_mb: u32,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            cpus: 1,
            memory_mb: 512,
        }
    }
}
