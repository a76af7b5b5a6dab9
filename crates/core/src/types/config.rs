use crate::types::ResourceConfig;
use crate::types::disk::DiskImage;
use crate::types::mount::MountSpec;
use crate::types::network::{NetworkInterface, NetworkSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_WORKDIR: &str = "/";
pub const DEFAULT_USER: &str = "root";
pub const DEFAULT_GROUP: &str = "root";
pub const DEFAULT_SECURITY_TYPE: &str = "svirt_sandbox_t";

/// Which builder turns the configuration into a domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Full virtual machine booting a kernel or a disk image.
    #[default]
    Machine,
    /// Container sharing the host kernel, rooted at a host directory.
    Container,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Machine => "machine",
            Self::Container => "container",
        }
    }
}

/// What the guest boots from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BootSource {
    /// Direct kernel boot, optionally with a root disk attached as `vda`.
    Kernel {
        kernel: PathBuf,
        initrd: PathBuf,
        #[serde(default)]
        root_disk: Option<DiskImage>,
    },
    /// Bootable disk image.
    Disk { image: DiskImage },
    /// Host directory used as the guest root filesystem.
    Root { path: PathBuf },
}

impl BootSource {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Kernel { .. } => "kernel",
            Self::Disk { .. } => "disk",
            Self::Root { .. } => "root",
        }
    }
}

fn default_workdir() -> String {
    DEFAULT_WORKDIR.to_string()
}

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

/// A command executed inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_workdir")]
    pub workdir: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_group")]
    pub group: String,
}

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            workdir: default_workdir(),
            user: default_user(),
            group: default_group(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }
}

/// An auxiliary service started next to the primary command, with its own
/// console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(flatten)]
    pub command: CommandSpec,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, command: CommandSpec) -> Self {
        Self {
            name: name.into(),
            command,
        }
    }
}

/// SELinux-style label applied to the domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    #[serde(default = "default_security_type")]
    pub label_type: String,
    /// Fixed MCS level. When unset the hypervisor assigns one per domain.
    #[serde(default)]
    pub level: Option<String>,
}

fn default_security_type() -> String {
    DEFAULT_SECURITY_TYPE.to_string()
}

impl Default for SecurityContext {
    fn default() -> Self {
        Self {
            label_type: default_security_type(),
            level: None,
        }
    }
}

impl SecurityContext {
    pub fn static_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    pub fn is_dynamic(&self) -> bool {
        self.level.is_none()
    }
}

/// Declarative description of a sandbox.
///
/// Values are plain data; builders read them without mutation. Programmatic
/// callers use the fluent methods, files go through serde.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub name: String,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub boot: Option<BootSource>,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
    #[serde(default)]
    pub network: NetworkSpec,
    pub command: CommandSpec,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub security: SecurityContext,
}

impl SandboxConfig {
    pub fn new<I, S>(name: impl Into<String>, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            backend: BackendKind::default(),
            boot: None,
            resources: ResourceConfig::default(),
            mounts: Vec::new(),
            network: NetworkSpec::default(),
            command: CommandSpec::new(argv),
            services: Vec::new(),
            security: SecurityContext::default(),
        }
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn boot(mut self, boot: BootSource) -> Self {
        self.boot = Some(boot);
        self
    }

    pub fn kernel_boot(self, kernel: impl Into<PathBuf>, initrd: impl Into<PathBuf>) -> Self {
        self.boot(BootSource::Kernel {
            kernel: kernel.into(),
            initrd: initrd.into(),
            root_disk: None,
        })
    }

    pub fn disk_boot(self, image: impl Into<DiskImage>) -> Self {
        self.boot(BootSource::Disk {
            image: image.into(),
        })
    }

    pub fn root_boot(self, path: impl Into<PathBuf>) -> Self {
        self.boot(BootSource::Root { path: path.into() })
    }

    pub fn cpus(mut self, cpus: u32) -> Self {
        self.resources.cpus = cpus;
        self
    }

    pub fn memory_mb(mut self, mb: u32) -> Self {
        self.resources.memory_mb = mb;
        self
    }

    pub fn mount(mut self, mount: MountSpec) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn network(mut self, network: NetworkSpec) -> Self {
        self.network = network;
        self
    }

    pub fn interface(mut self, interface: NetworkInterface) -> Self {
        self.network.interfaces.push(interface);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.command.env.insert(key.into(), value.into());
        self
    }

    pub fn workdir(mut self, workdir: impl Into<String>) -> Self {
        self.command.workdir = workdir.into();
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.command.user = user.into();
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.command.group = group.into();
        self
    }

    pub fn service(mut self, service: ServiceConfig) -> Self {
        self.services.push(service);
        self
    }

    pub fn security(mut self, security: SecurityContext) -> Self {
        self.security = security;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MountMode;
    use crate::types::network::NetworkSource;

    mod builder {
        use super::*;

        #[test]
        fn new_applies_defaults() {
            let config = SandboxConfig::new("box", ["/bin/sh"]);
            assert_eq!(config.backend, BackendKind::Machine);
            assert!(config.boot.is_none());
            assert_eq!(config.command.argv, vec!["/bin/sh"]);
            assert_eq!(config.command.workdir, "/");
            assert_eq!(config.command.user, "root");
            assert_eq!(config.command.group, "root");
            assert!(config.services.is_empty());
            assert!(config.network.is_none());
            assert!(config.security.is_dynamic());
        }

        #[test]
        fn fluent_methods_accumulate() {
            let config = SandboxConfig::new("box", ["/bin/sh", "-l"])
                .kernel_boot("/boot/vmlinuz", "/boot/initrd")
                .cpus(2)
                .memory_mb(1024)
                .mount(MountSpec::host_bind("/srv", "/mnt", MountMode::ReadWrite))
                .interface(NetworkInterface::new(NetworkSource::Nat))
                .env("TERM", "xterm")
                .workdir("/tmp")
                .user("nobody")
                .service(ServiceConfig::new("logger", CommandSpec::new(["/bin/log"])));

            assert_eq!(config.resources.cpus, 2);
            assert_eq!(config.resources.memory_mb, 1024);
            assert_eq!(config.mounts.len(), 1);
            assert_eq!(config.network.interfaces.len(), 1);
            assert_eq!(config.command.env.get("TERM").map(String::as_str), Some("xterm"));
            assert_eq!(config.command.workdir, "/tmp");
            assert_eq!(config.command.user, "nobody");
            assert_eq!(config.services[0].name, "logger");
            assert!(matches!(config.boot, Some(BootSource::Kernel { .. })));
        }

        #[test]
        fn later_boot_replaces_earlier() {
            let config = SandboxConfig::new("box", ["/bin/sh"])
                .disk_boot("/images/root.qcow2")
                .root_boot("/srv/rootfs");
            assert_eq!(
                config.boot,
                Some(BootSource::Root {
                    path: PathBuf::from("/srv/rootfs")
                })
            );
        }
    }

    mod serialization {
        use super::*;

        #[test]
        fn minimal_json() {
            let json = r#"{"name":"box","command":{"argv":["/bin/true"]}}"#;
            let config: SandboxConfig = serde_json::from_str(json).unwrap();
            assert_eq!(config, SandboxConfig::new("box", ["/bin/true"]));
        }

        #[test]
        fn service_command_is_flattened() {
            let json = r#"{"name":"logger","argv":["/bin/log"],"user":"daemon"}"#;
            let service: ServiceConfig = serde_json::from_str(json).unwrap();
            assert_eq!(service.name, "logger");
            assert_eq!(service.command.argv, vec!["/bin/log"]);
            assert_eq!(service.command.user, "daemon");
            assert_eq!(service.command.group, "root");
        }

        #[test]
        fn boot_source_tagged() {
            let json = r#"{"type":"disk","image":{"path":"/images/root.qcow2"}}"#;
            let boot: BootSource = serde_json::from_str(json).unwrap();
            assert_eq!(boot.kind(), "disk");
        }

        #[test]
        fn backend_lowercase() {
            let json = serde_json::to_string(&BackendKind::Container).unwrap();
            assert_eq!(json, "\"container\"");
        }
    }

    mod security {
        use super::*;

        #[test]
        fn default_type() {
            assert_eq!(SecurityContext::default().label_type, "svirt_sandbox_t");
        }

        #[test]
        fn static_level_is_not_dynamic() {
            let ctx = SecurityContext::default().static_level("s0:c1,c2");
            assert!(!ctx.is_dynamic());
            assert_eq!(ctx.level.as_deref(), Some("s0:c1,c2"));
        }
    }
}
