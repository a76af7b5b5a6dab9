/// Console device carrying the primary session.
pub const PRIMARY_CONSOLE: &str = "console0";

/// Prefix of the console device allocated to each auxiliary service.
pub const SERVICE_CONSOLE_PREFIX: &str = "console-";

/// Device name of the config channel carrying the service descriptor.
pub const CONFIG_CHANNEL_NAME: &str = "sandbox-config";

/// Mount tag the guest uses to find the config channel.
pub const CONFIG_CHANNEL_TAG: &str = "corral-config";

/// File name of the serialized descriptor inside the config channel.
pub const DESCRIPTOR_FILE: &str = "services.cfg";

/// Where the guest init finds the service descriptor. Machines mount the
/// config channel here; container runtimes bind it here.
pub const GUEST_CONFIG_DIR: &str = "/run/corral";

/// `corral.config=<tag>:<fstype>`
pub const CMDLINE_CONFIG: &str = "corral.config";
/// `corral.mount=<tag>:<fstype>:<path>[:ro]`
pub const CMDLINE_MOUNT: &str = "corral.mount";
/// `corral.disk=<device>:<path>[:ro]`
pub const CMDLINE_DISK: &str = "corral.disk";
/// `corral.bind=<source>:<target>`
pub const CMDLINE_BIND: &str = "corral.bind";
/// `corral.tmpfs=<path>:<size-kib>`
pub const CMDLINE_TMPFS: &str = "corral.tmpfs";

/// Returns the console device name for an auxiliary service.
pub fn service_console_name(service: &str) -> String {
    format!("{SERVICE_CONSOLE_PREFIX}{service}")
}

/// How a guest names the console devices the host attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleScheme {
    /// Virtio consoles of a machine: `/dev/hvc0`, `/dev/hvc1`, ...
    Virtio,
    /// Container runtime ttys: `/dev/console` (which is `tty1`), then
    /// `/dev/tty2`, `/dev/tty3`, ...
    Container,
}

impl ConsoleScheme {
    /// Guest-side console device backing the descriptor record at `index`.
    ///
    /// Record 0 is the primary session; auxiliary services follow in
    /// descriptor order.
    pub fn path(self, index: usize) -> String {
        match self {
            Self::Virtio => format!("/dev/hvc{index}"),
            Self::Container if index == 0 => "/dev/console".to_string(),
            Self::Container => format!("/dev/tty{}", index + 1),
        }
    }
}

/// Service names end up in device names, so they are restricted to a
/// conservative character set.
pub fn is_valid_service_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_console_uses_prefix() {
        assert_eq!(service_console_name("logger"), "console-logger");
    }

    #[test]
    fn service_console_never_collides_with_primary() {
        assert_ne!(service_console_name("0"), PRIMARY_CONSOLE);
    }

    #[test]
    fn virtio_console_paths_follow_record_order() {
        assert_eq!(ConsoleScheme::Virtio.path(0), "/dev/hvc0");
        assert_eq!(ConsoleScheme::Virtio.path(3), "/dev/hvc3");
    }

    #[test]
    fn container_consoles_use_ttys() {
        assert_eq!(ConsoleScheme::Container.path(0), "/dev/console");
        assert_eq!(ConsoleScheme::Container.path(1), "/dev/tty2");
        assert_eq!(ConsoleScheme::Container.path(2), "/dev/tty3");
    }

    #[test]
    fn valid_service_names() {
        assert!(is_valid_service_name("logger"));
        assert!(is_valid_service_name("dbus-daemon"));
        assert!(is_valid_service_name("svc_1.2"));
    }

    #[test]
    fn invalid_service_names() {
        assert!(!is_valid_service_name(""));
        assert!(!is_valid_service_name("has space"));
        assert!(!is_valid_service_name("a/b"));
        assert!(!is_valid_service_name("x=y"));
    }
}
