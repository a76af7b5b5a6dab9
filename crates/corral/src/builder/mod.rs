//! Builders turning a [`SandboxConfig`] into a [`DomainSpec`].
//!
//! Builders are pure: they read the configuration and the connection's
//! capabilities and never define, start or otherwise touch a domain.

mod container;
mod machine;

pub use container::{CONTAINER_INIT_PATH, ContainerBuilder};
pub use machine::MachineBuilder;

use crate::services::build_descriptor;
use corral_core::{
    BackendKind, BuildError, ConfigChannel, ConsoleDevice, DomainSpec, Error, GuestMount,
    HypervisorConnection, KernelCmdline, MountSpec, NetworkDevice, Result, SandboxConfig,
    SecurityLabel, validate_guest_path,
};
use corral_protocol::{
    CMDLINE_BIND, CMDLINE_CONFIG, CMDLINE_DISK, CMDLINE_MOUNT, CMDLINE_TMPFS, CONFIG_CHANNEL_NAME,
    CONFIG_CHANNEL_TAG, ConsoleScheme, DESCRIPTOR_FILE, GUEST_CONFIG_DIR, PRIMARY_CONSOLE,
    PRIMARY_SERVICE_NAME, service_console_name,
};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

/// Turns a sandbox configuration into a domain specification for one kind
/// of hypervisor.
pub trait SandboxBuilder: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn build(
        &self,
        config: &SandboxConfig,
        connection: &dyn HypervisorConnection,
    ) -> Result<DomainSpec>;
}

/// Returns the builder for a backend kind.
pub fn builder_for(kind: BackendKind) -> Box<dyn SandboxBuilder> {
    match kind {
        BackendKind::Machine => Box::new(MachineBuilder),
        BackendKind::Container => Box::new(ContainerBuilder),
    }
}

/// Maps a connection URI to the backend kind it drives.
///
/// `qemu:///system`, `kvm://...` drive machines and `lxc:///` drives
/// containers. Anything else has no builder.
pub fn backend_for_uri(uri: &str) -> Result<BackendKind> {
    let scheme = uri.split(['+', ':']).next().unwrap_or_default();
    match scheme {
        "qemu" | "kvm" => Ok(BackendKind::Machine),
        "lxc" => Ok(BackendKind::Container),
        _ => Err(Error::NoBuilder(uri.to_string())),
    }
}

/// Builds a domain with the builder selected by `config.backend`.
pub fn build_domain(
    config: &SandboxConfig,
    connection: &dyn HypervisorConnection,
) -> Result<DomainSpec> {
    builder_for(config.backend).build(config, connection)
}

const CMDLINE_ENCODE_SET: &AsciiSet = &CONTROLS.add(b' ').add(b':').add(b'%').add(b'=');

/// Percent-encodes a path so it survives whitespace splitting and the `:`
/// field separator of the guest cmdline.
pub(crate) fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, CMDLINE_ENCODE_SET).to_string()
}

pub(crate) fn check_guest_path(mount: &MountSpec, path: &str) -> Result<()> {
    validate_guest_path(path)
        .map_err(|reason| BuildError::InvalidMount(format!("{} mount: {reason}", mount.kind())))?;
    Ok(())
}

/// Guest mounts both builders handle the same way: binds inside the guest and
/// memory-backed filesystems.
pub(crate) fn guest_side_mount(mount: &MountSpec) -> Result<Option<GuestMount>> {
    match mount {
        MountSpec::GuestBind { source, target } => {
            check_guest_path(mount, source)?;
            check_guest_path(mount, target)?;
            Ok(Some(GuestMount::Bind {
                source: source.clone(),
                target: target.clone(),
            }))
        }
        MountSpec::Ram { target, size_kib } => {
            check_guest_path(mount, target)?;
            if *size_kib == 0 {
                return Err(
                    BuildError::InvalidMount(format!("ram mount at {target} has zero size")).into(),
                );
            }
            Ok(Some(GuestMount::Tmpfs {
                target: target.clone(),
                size_kib: *size_kib,
            }))
        }
        MountSpec::HostBind { .. } | MountSpec::HostImage { .. } => Ok(None),
    }
}

/// `console0` for the primary command, then one console per service in
/// configuration order.
pub(crate) fn allocate_consoles(
    config: &SandboxConfig,
    scheme: ConsoleScheme,
) -> Vec<ConsoleDevice> {
    let primary = ConsoleDevice {
        name: PRIMARY_CONSOLE.to_string(),
        service: PRIMARY_SERVICE_NAME.to_string(),
        guest_path: scheme.path(0),
    };
    std::iter::once(primary)
        .chain(config.services.iter().enumerate().map(|(i, s)| ConsoleDevice {
            name: service_console_name(&s.name),
            service: s.name.clone(),
            guest_path: scheme.path(i + 1),
        }))
        .collect()
}

pub(crate) fn config_channel(config: &SandboxConfig) -> Result<ConfigChannel> {
    let descriptor = build_descriptor(config)?;
    Ok(ConfigChannel {
        name: CONFIG_CHANNEL_NAME.to_string(),
        tag: CONFIG_CHANNEL_TAG.to_string(),
        file: DESCRIPTOR_FILE.to_string(),
        guest_dir: GUEST_CONFIG_DIR.to_string(),
        contents: descriptor.to_text(),
    })
}

pub(crate) fn attach_networks(
    config: &SandboxConfig,
    connection: &dyn HypervisorConnection,
) -> Result<Vec<NetworkDevice>> {
    let caps = connection.capabilities();
    config
        .network
        .interfaces
        .iter()
        .enumerate()
        .map(|(i, iface)| {
            if !caps.supports_network_source(&iface.source) {
                return Err(BuildError::UnsupportedNetwork(format!(
                    "{} is not supported by {}",
                    iface.source,
                    connection.uri()
                ))
                .into());
            }
            Ok(NetworkDevice {
                name: format!("net{i}"),
                source: iface.source.clone(),
                mac: iface.mac.clone(),
            })
        })
        .collect()
}

pub(crate) fn security_label(config: &SandboxConfig) -> SecurityLabel {
    let label_type = config.security.label_type.clone();
    match &config.security.level {
        Some(level) => SecurityLabel::Static {
            label_type,
            level: level.clone(),
        },
        None => SecurityLabel::Dynamic { label_type },
    }
}

/// Appends the `corral.*` keys the guest init reads to find its config
/// channel and set up mounts.
pub(crate) fn push_guest_args(
    cmdline: &mut KernelCmdline,
    config_fstype: &str,
    mounts: &[GuestMount],
) {
    cmdline.arg(CMDLINE_CONFIG, format!("{CONFIG_CHANNEL_TAG}:{config_fstype}"));
    for mount in mounts {
        match mount {
            GuestMount::Share {
                tag,
                fstype,
                target,
                read_only,
            } => {
                let ro = if *read_only { ":ro" } else { "" };
                cmdline.push(
                    CMDLINE_MOUNT,
                    format!("{tag}:{fstype}:{}{ro}", encode_path(target)),
                );
            }
            GuestMount::Disk {
                device,
                target,
                read_only,
            } => {
                let ro = if *read_only { ":ro" } else { "" };
                cmdline.push(CMDLINE_DISK, format!("{device}:{}{ro}", encode_path(target)));
            }
            GuestMount::Bind { source, target } => {
                cmdline.push(
                    CMDLINE_BIND,
                    format!("{}:{}", encode_path(source), encode_path(target)),
                );
            }
            GuestMount::Tmpfs { target, size_kib } => {
                cmdline.push(CMDLINE_TMPFS, format!("{}:{size_kib}", encode_path(target)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::{CommandSpec, SecurityContext, ServiceConfig};

    mod selection {
        use super::*;

        #[test]
        fn builder_matches_kind() {
            assert_eq!(builder_for(BackendKind::Machine).kind(), BackendKind::Machine);
            assert_eq!(
                builder_for(BackendKind::Container).kind(),
                BackendKind::Container
            );
        }

        #[test]
        fn uri_schemes() {
            assert_eq!(backend_for_uri("qemu:///system").unwrap(), BackendKind::Machine);
            assert_eq!(
                backend_for_uri("qemu+ssh://host/system").unwrap(),
                BackendKind::Machine
            );
            assert_eq!(backend_for_uri("lxc:///").unwrap(), BackendKind::Container);
        }

        #[test]
        fn unknown_uri_has_no_builder() {
            let err = backend_for_uri("xen:///").unwrap_err();
            assert!(matches!(err, Error::NoBuilder(ref uri) if uri == "xen:///"));
        }
    }

    mod helpers {
        use super::*;

        #[test]
        fn encode_path_escapes_separators() {
            assert_eq!(encode_path("/mnt/data"), "/mnt/data");
            assert_eq!(encode_path("/mnt/my dir"), "/mnt/my%20dir");
            assert_eq!(encode_path("/a:b"), "/a%3Ab");
            assert_eq!(encode_path("/100%"), "/100%25");
        }

        #[test]
        fn consoles_follow_service_order() {
            let config = SandboxConfig::new("box", ["/bin/sh"])
                .service(ServiceConfig::new("web", CommandSpec::new(["/bin/web"])))
                .service(ServiceConfig::new("db", CommandSpec::new(["/bin/db"])));
            let consoles = allocate_consoles(&config, ConsoleScheme::Virtio);
            let names: Vec<_> = consoles.iter().map(|c| c.name.as_str()).collect();
            assert_eq!(names, vec!["console0", "console-web", "console-db"]);
            assert_eq!(consoles[2].guest_path, "/dev/hvc2");
            assert_eq!(consoles[0].service, "main");
        }

        #[test]
        fn console_paths_follow_scheme() {
            let config = SandboxConfig::new("box", ["/bin/sh"])
                .service(ServiceConfig::new("web", CommandSpec::new(["/bin/web"])));
            let paths: Vec<_> = allocate_consoles(&config, ConsoleScheme::Container)
                .into_iter()
                .map(|c| c.guest_path)
                .collect();
            assert_eq!(paths, vec!["/dev/console", "/dev/tty2"]);
        }

        #[test]
        fn static_security_label() {
            let config = SandboxConfig::new("box", ["/bin/sh"])
                .security(SecurityContext::default().static_level("s0:c1"));
            assert_eq!(
                security_label(&config),
                SecurityLabel::Static {
                    label_type: "svirt_sandbox_t".to_string(),
                    level: "s0:c1".to_string()
                }
            );
        }

        #[test]
        fn ram_mount_needs_size() {
            let err = guest_side_mount(&MountSpec::ram("/scratch", 0)).unwrap_err();
            assert!(matches!(err, Error::Build(BuildError::InvalidMount(_))));
        }

        #[test]
        fn guest_args_cover_every_mount_kind() {
            let mut cmdline = KernelCmdline::new();
            push_guest_args(
                &mut cmdline,
                "virtiofs",
                &[
                    GuestMount::Share {
                        tag: "mount0".to_string(),
                        fstype: "virtiofs".to_string(),
                        target: "/srv".to_string(),
                        read_only: true,
                    },
                    GuestMount::Disk {
                        device: "vdb".to_string(),
                        target: "/data".to_string(),
                        read_only: false,
                    },
                    GuestMount::Bind {
                        source: "/srv".to_string(),
                        target: "/var/www".to_string(),
                    },
                    GuestMount::Tmpfs {
                        target: "/tmp".to_string(),
                        size_kib: 65536,
                    },
                ],
            );
            assert_eq!(
                cmdline.to_args(),
                vec![
                    "corral.config=corral-config:virtiofs",
                    "corral.mount=mount0:virtiofs:/srv:ro",
                    "corral.disk=vdb:/data",
                    "corral.bind=/srv:/var/www",
                    "corral.tmpfs=/tmp:65536",
                ]
            );
        }
    }
}
