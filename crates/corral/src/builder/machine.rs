use super::{
    SandboxBuilder, allocate_consoles, attach_networks, check_guest_path, config_channel,
    guest_side_mount, push_guest_args, security_label,
};
use corral_core::{
    BackendKind, BootSource, BuildError, DiskDevice, DiskImage, DomainBoot, DomainSpec,
    FilesystemDevice, FilesystemDriver, GuestMount, HypervisorCapabilities, HypervisorConnection,
    KernelCmdline, MountMode, MountSpec, Result, SandboxConfig,
};
use corral_protocol::ConsoleScheme;
use std::path::PathBuf;
use tracing::debug;

/// Builds full virtual machine domains.
///
/// The guest boots a kernel (or a bootable disk), host directories are
/// exported as virtio-fs or 9p shares and `corral-init` reads its setup from
/// the kernel command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct MachineBuilder;

impl SandboxBuilder for MachineBuilder {
    fn kind(&self) -> BackendKind {
        BackendKind::Machine
    }

    fn build(
        &self,
        config: &SandboxConfig,
        connection: &dyn HypervisorConnection,
    ) -> Result<DomainSpec> {
        // Configuration errors come before anything the connection decides.
        let config_channel = config_channel(config)?;

        let caps = connection.capabilities();
        let mut disks = Vec::new();

        let boot = resolve_boot(config, connection, &mut disks)?;

        let share_driver = share_driver(caps);
        let mut filesystems = Vec::new();
        let mut guest_mounts = Vec::new();
        for mount in &config.mounts {
            check_guest_path(mount, mount.target())?;
            match mount {
                MountSpec::HostBind {
                    source,
                    target,
                    mode,
                } => {
                    let driver = share_driver.ok_or_else(|| {
                        BuildError::InvalidMount(format!(
                            "no directory sharing mechanism for host-bind mount at {target}"
                        ))
                    })?;
                    if !source.is_absolute() {
                        return Err(BuildError::InvalidMount(format!(
                            "host-bind source '{}' is not absolute",
                            source.display()
                        ))
                        .into());
                    }
                    let tag = format!("mount{}", filesystems.len());
                    let read_only = *mode == MountMode::ReadOnly;
                    filesystems.push(FilesystemDevice {
                        driver,
                        source: source.clone(),
                        target: tag.clone(),
                        read_only,
                    });
                    guest_mounts.push(GuestMount::Share {
                        tag,
                        fstype: driver.guest_fstype().to_string(),
                        target: target.clone(),
                        read_only,
                    });
                }
                MountSpec::HostImage { image, target } => {
                    let device = attach_disk(caps, &mut disks, image).map_err(|reason| {
                        BuildError::InvalidMount(format!("{reason} for mount at {target}"))
                    })?;
                    guest_mounts.push(GuestMount::Disk {
                        device,
                        target: target.clone(),
                        read_only: image.read_only,
                    });
                }
                MountSpec::GuestBind { .. } | MountSpec::Ram { .. } => {
                    if let Some(guest) = guest_side_mount(mount)? {
                        guest_mounts.push(guest);
                    }
                }
            }
        }

        let consoles = allocate_consoles(config, ConsoleScheme::Virtio);

        let config_driver = share_driver.ok_or_else(|| {
            BuildError::InvalidMount(
                "no directory sharing mechanism for the config channel".to_string(),
            )
        })?;

        let networks = attach_networks(config, connection)?;

        let mut cmdline = KernelCmdline::new();
        cmdline.console("hvc0");
        push_guest_args(&mut cmdline, config_driver.guest_fstype(), &guest_mounts);
        let boot = match boot {
            ResolvedBoot::Kernel { kernel, initrd } => DomainBoot::Kernel {
                kernel,
                initrd,
                cmdline: cmdline.build(),
            },
            ResolvedBoot::Disk { device } => DomainBoot::Disk {
                device,
                guest_args: cmdline.to_args(),
            },
        };

        debug!(
            sandbox = %config.name,
            disks = disks.len(),
            filesystems = filesystems.len(),
            consoles = consoles.len(),
            networks = networks.len(),
            "built machine domain"
        );

        Ok(DomainSpec {
            name: config.name.clone(),
            kind: BackendKind::Machine,
            boot,
            resources: config.resources.clone(),
            disks,
            filesystems,
            guest_mounts,
            consoles,
            networks,
            config_channel,
            security: security_label(config),
        })
    }
}

enum ResolvedBoot {
    Kernel { kernel: PathBuf, initrd: PathBuf },
    Disk { device: String },
}

fn resolve_boot(
    config: &SandboxConfig,
    connection: &dyn HypervisorConnection,
    disks: &mut Vec<DiskDevice>,
) -> Result<ResolvedBoot> {
    let caps = connection.capabilities();
    let boot = config.boot.as_ref().ok_or(BuildError::MissingBootSource)?;

    let is_host_dir = matches!(boot, BootSource::Root { .. });
    if !is_host_dir && !caps.supports_boot(boot) {
        return Err(BuildError::UnsupportedBootSource(format!(
            "{} boot is not supported by {}",
            boot.kind(),
            connection.uri()
        ))
        .into());
    }

    match boot {
        BootSource::Kernel {
            kernel,
            initrd,
            root_disk,
        } => {
            if let Some(image) = root_disk {
                attach_disk(caps, disks, image).map_err(BuildError::UnsupportedBootSource)?;
            }
            Ok(ResolvedBoot::Kernel {
                kernel: kernel.clone(),
                initrd: initrd.clone(),
            })
        }
        BootSource::Disk { image } => {
            let device =
                attach_disk(caps, disks, image).map_err(BuildError::UnsupportedBootSource)?;
            Ok(ResolvedBoot::Disk { device })
        }
        BootSource::Root { path } => Err(BuildError::UnsupportedBootSource(format!(
            "a machine cannot boot from host directory {}",
            path.display()
        ))
        .into()),
    }
}

fn share_driver(caps: &HypervisorCapabilities) -> Option<FilesystemDriver> {
    if caps.share_mechanisms.virtio_fs {
        Some(FilesystemDriver::VirtioFs)
    } else if caps.share_mechanisms.virtio_9p {
        Some(FilesystemDriver::Virtio9p)
    } else {
        None
    }
}

/// Attaches an image as the next `vdX` device and returns the device name.
fn attach_disk(
    caps: &HypervisorCapabilities,
    disks: &mut Vec<DiskDevice>,
    image: &DiskImage,
) -> std::result::Result<String, String> {
    let format = image.effective_format();
    if !caps.supports_image_format(format) {
        return Err(format!("{} images are not supported", format.as_str()));
    }
    let index = u8::try_from(disks.len())
        .ok()
        .filter(|i| *i < 26)
        .ok_or_else(|| "too many disks".to_string())?;
    let device = format!("vd{}", char::from(b'a' + index));
    disks.push(DiskDevice {
        target: device.clone(),
        image: image.clone(),
    });
    Ok(device)
}
