//! Domain specification produced by the sandbox builders.
//!
//! A [`DomainSpec`] is everything the hypervisor needs to define the guest.
//! Device names are derived deterministically from the sandbox
//! configuration, so building the same configuration twice yields equal
//! specifications.

use crate::types::{BackendKind, DiskImage, NetworkSource, ResourceConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How the domain starts executing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DomainBoot {
    /// Direct kernel boot with an explicit command line.
    Kernel {
        kernel: PathBuf,
        initrd: PathBuf,
        cmdline: String,
    },
    /// Firmware boot from the named disk device.
    ///
    /// The image's boot loader owns the kernel command line, so the
    /// `corral.*` arguments the guest init needs are carried here for it to
    /// append.
    Disk {
        device: String,
        guest_args: Vec<String>,
    },
    /// Container init process with its arguments.
    Init { path: String, args: Vec<String> },
}

/// Block device attached to the domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskDevice {
    /// Guest device name, `vda`, `vdb`, ...
    pub target: String,
    pub image: DiskImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilesystemDriver {
    VirtioFs,
    Virtio9p,
    /// Container bind of a host directory.
    Passthrough,
}

impl FilesystemDriver {
    /// Filesystem type the guest passes to mount(2).
    pub fn guest_fstype(&self) -> &'static str {
        match self {
            Self::VirtioFs => "virtiofs",
            Self::Virtio9p => "9p",
            Self::Passthrough => "bind",
        }
    }
}

/// Host directory exported to the guest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesystemDevice {
    pub driver: FilesystemDriver,
    pub source: PathBuf,
    /// Mount tag for machines, guest path for containers.
    pub target: String,
    pub read_only: bool,
}

/// Mount performed by the guest init after boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GuestMount {
    /// Filesystem exported under a tag.
    Share {
        tag: String,
        fstype: String,
        target: String,
        read_only: bool,
    },
    /// Block device attached by the host.
    Disk {
        device: String,
        target: String,
        read_only: bool,
    },
    Bind { source: String, target: String },
    Tmpfs { target: String, size_kib: u64 },
}

/// A console device, one per launched command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleDevice {
    /// Host-visible device name used to attach.
    pub name: String,
    /// Service record whose stdio is bound to this console.
    pub service: String,
    /// Device node inside the guest.
    pub guest_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDevice {
    pub name: String,
    pub source: NetworkSource,
    pub mac: Option<String>,
}

/// Channel carrying the serialized service descriptor into the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChannel {
    pub name: String,
    pub tag: String,
    /// File name of the descriptor inside the channel.
    pub file: String,
    /// Directory inside the guest where the channel must appear.
    pub guest_dir: String,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SecurityLabel {
    Static { label_type: String, level: String },
    Dynamic { label_type: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSpec {
    pub name: String,
    pub kind: BackendKind,
    pub boot: DomainBoot,
    pub resources: ResourceConfig,
    pub disks: Vec<DiskDevice>,
    pub filesystems: Vec<FilesystemDevice>,
    pub guest_mounts: Vec<GuestMount>,
    pub consoles: Vec<ConsoleDevice>,
    pub networks: Vec<NetworkDevice>,
    pub config_channel: ConfigChannel,
    pub security: SecurityLabel,
}

impl DomainSpec {
    pub fn console(&self, name: &str) -> Option<&ConsoleDevice> {
        self.consoles.iter().find(|c| c.name == name)
    }

    pub fn console_names(&self) -> Vec<&str> {
        self.consoles.iter().map(|c| c.name.as_str()).collect()
    }

    /// The console bound to the primary command. Builders always put it first.
    pub fn primary_console(&self) -> Option<&ConsoleDevice> {
        self.consoles.first()
    }
}
