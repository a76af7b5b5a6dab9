//! Shared types for the corral host and the guest init.
//!
//! The host serializes a [`ServiceDescriptor`] into the sandbox's config
//! channel and `corral-init` parses it back at boot to learn what to run.
//! Both sides also agree on console device names and kernel cmdline keys
//! defined here, so neither needs to ask the other at runtime.

mod descriptor;
mod naming;

pub use descriptor::{DescriptorError, PRIMARY_SERVICE_NAME, ServiceDescriptor, ServiceRecord};
pub use naming::{
    CMDLINE_BIND, CMDLINE_CONFIG, CMDLINE_DISK, CMDLINE_MOUNT, CMDLINE_TMPFS, CONFIG_CHANNEL_NAME,
    CONFIG_CHANNEL_TAG, DESCRIPTOR_FILE, GUEST_CONFIG_DIR, PRIMARY_CONSOLE, SERVICE_CONSOLE_PREFIX,
    ConsoleScheme, is_valid_service_name, service_console_name,
};
