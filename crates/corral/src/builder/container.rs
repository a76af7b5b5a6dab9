use super::{
    SandboxBuilder, allocate_consoles, attach_networks, check_guest_path, config_channel,
    guest_side_mount, push_guest_args, security_label,
};
use corral_core::{
    BackendKind, BootSource, BuildError, DomainBoot, DomainSpec, FilesystemDevice,
    FilesystemDriver, HypervisorConnection, KernelCmdline, MountMode, MountSpec, Result,
    SandboxConfig,
};
use corral_protocol::ConsoleScheme;
use std::path::PathBuf;
use tracing::debug;

/// Init binary a container domain starts as its first process.
pub const CONTAINER_INIT_PATH: &str = "/corral-init";

/// Builds container domains rooted at a host directory.
///
/// The host kernel is shared, so there is no kernel command line: the same
/// `corral.*` keys are handed to the init process as arguments instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerBuilder;

impl SandboxBuilder for ContainerBuilder {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    fn build(
        &self,
        config: &SandboxConfig,
        connection: &dyn HypervisorConnection,
    ) -> Result<DomainSpec> {
        let config_channel = config_channel(config)?;

        let caps = connection.capabilities();
        let root = resolve_root(config, connection)?;

        let mut filesystems = vec![FilesystemDevice {
            driver: FilesystemDriver::Passthrough,
            source: root,
            target: "/".to_string(),
            read_only: false,
        }];
        let mut guest_mounts = Vec::new();
        for mount in &config.mounts {
            check_guest_path(mount, mount.target())?;
            match mount {
                MountSpec::HostBind {
                    source,
                    target,
                    mode,
                } => {
                    if !caps.share_mechanisms.passthrough {
                        return Err(BuildError::InvalidMount(format!(
                            "{} cannot bind host directories",
                            connection.uri()
                        ))
                        .into());
                    }
                    if !source.is_absolute() {
                        return Err(BuildError::InvalidMount(format!(
                            "host-bind source '{}' is not absolute",
                            source.display()
                        ))
                        .into());
                    }
                    filesystems.push(FilesystemDevice {
                        driver: FilesystemDriver::Passthrough,
                        source: source.clone(),
                        target: target.clone(),
                        read_only: *mode == MountMode::ReadOnly,
                    });
                }
                MountSpec::HostImage { target, .. } => {
                    return Err(BuildError::InvalidMount(format!(
                        "host-image mount at {target} needs a machine backend"
                    ))
                    .into());
                }
                MountSpec::GuestBind { .. } | MountSpec::Ram { .. } => {
                    if let Some(guest) = guest_side_mount(mount)? {
                        guest_mounts.push(guest);
                    }
                }
            }
        }

        let consoles = allocate_consoles(config, ConsoleScheme::Container);
        let networks = attach_networks(config, connection)?;

        let mut args = KernelCmdline::new();
        push_guest_args(
            &mut args,
            FilesystemDriver::Passthrough.guest_fstype(),
            &guest_mounts,
        );

        debug!(
            sandbox = %config.name,
            filesystems = filesystems.len(),
            consoles = consoles.len(),
            networks = networks.len(),
            "built container domain"
        );

        Ok(DomainSpec {
            name: config.name.clone(),
            kind: BackendKind::Container,
            boot: DomainBoot::Init {
                path: CONTAINER_INIT_PATH.to_string(),
                args: args.to_args(),
            },
            resources: config.resources.clone(),
            disks: Vec::new(),
            filesystems,
            guest_mounts,
            consoles,
            networks,
            config_channel,
            security: security_label(config),
        })
    }
}

fn resolve_root(
    config: &SandboxConfig,
    connection: &dyn HypervisorConnection,
) -> Result<PathBuf> {
    let boot = config.boot.as_ref().ok_or(BuildError::MissingBootSource)?;
    match boot {
        BootSource::Root { path } => {
            if !connection.capabilities().supports_boot(boot) {
                return Err(BuildError::UnsupportedBootSource(format!(
                    "{} cannot start containers",
                    connection.uri()
                ))
                .into());
            }
            if !path.is_absolute() {
                return Err(BuildError::UnsupportedBootSource(format!(
                    "container root '{}' is not absolute",
                    path.display()
                ))
                .into());
            }
            Ok(path.clone())
        }
        other => Err(BuildError::UnsupportedBootSource(format!(
            "a container needs a host root directory, not a {} boot",
            other.kind()
        ))
        .into()),
    }
}
