use crate::types::{BootSource, ImageFormat, NetworkSource};

#[derive(Debug, Clone, Default)]
pub struct BootMethodSupport {
    pub kernel: bool,
    pub disk: bool,
    pub root_dir: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ImageFormatSupport {
    pub raw: bool,
    pub qcow2: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NetworkSourceSupport {
    pub nat: bool,
    pub bridge: bool,
    pub network: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ShareMechanismSupport {
    pub virtio_fs: bool,
    pub virtio_9p: bool,
    pub passthrough: bool,
}

/// What a hypervisor connection can do. Builders consult this and nothing
/// else on the connection.
#[derive(Debug, Clone, Default)]
pub struct HypervisorCapabilities {
    pub boot_methods: BootMethodSupport,
    pub image_formats: ImageFormatSupport,
    pub network_sources: NetworkSourceSupport,
    pub share_mechanisms: ShareMechanismSupport,
}

impl HypervisorCapabilities {
    /// Typical full-virtualization hypervisor.
    pub fn qemu() -> Self {
        Self {
            boot_methods: BootMethodSupport {
                kernel: true,
                disk: true,
                root_dir: false,
            },
            image_formats: ImageFormatSupport {
                raw: true,
                qcow2: true,
            },
            network_sources: NetworkSourceSupport {
                nat: true,
                bridge: true,
                network: true,
            },
            share_mechanisms: ShareMechanismSupport {
                virtio_fs: true,
                virtio_9p: true,
                passthrough: false,
            },
        }
    }

    /// Typical container driver.
    pub fn lxc() -> Self {
        Self {
            boot_methods: BootMethodSupport {
                kernel: false,
                disk: false,
                root_dir: true,
            },
            image_formats: ImageFormatSupport::default(),
            network_sources: NetworkSourceSupport {
                nat: false,
                bridge: true,
                network: true,
            },
            share_mechanisms: ShareMechanismSupport {
                virtio_fs: false,
                virtio_9p: false,
                passthrough: true,
            },
        }
    }

    pub fn supports_boot(&self, boot: &BootSource) -> bool {
        match boot {
            BootSource::Kernel { .. } => self.boot_methods.kernel,
            BootSource::Disk { .. } => self.boot_methods.disk,
            BootSource::Root { .. } => self.boot_methods.root_dir,
        }
    }

    pub fn supports_image_format(&self, format: ImageFormat) -> bool {
        match format {
            ImageFormat::Raw => self.image_formats.raw,
            ImageFormat::Qcow2 => self.image_formats.qcow2,
        }
    }

    pub fn supports_network_source(&self, source: &NetworkSource) -> bool {
        match source {
            NetworkSource::Nat => self.network_sources.nat,
            NetworkSource::Bridge { .. } => self.network_sources.bridge,
            NetworkSource::Network { .. } => self.network_sources.network,
        }
    }
}
