use crate::types::disk::DiskImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Access mode for mounts exported from the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    /// Guest can read but not modify files.
    #[default]
    ReadOnly,
    /// Guest can read and write files.
    ReadWrite,
}

/// A filesystem to make available inside the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MountSpec {
    /// Host directory exposed at `target` in the guest.
    HostBind {
        source: PathBuf,
        target: String,
        #[serde(default)]
        mode: MountMode,
    },
    /// Host disk image attached as a block device and mounted at `target`.
    HostImage { image: DiskImage, target: String },
    /// Guest directory re-exposed at another guest path.
    GuestBind { source: String, target: String },
    /// Memory-backed filesystem.
    Ram { target: String, size_kib: u64 },
}

impl MountSpec {
    pub fn host_bind(
        source: impl Into<PathBuf>,
        target: impl Into<String>,
        mode: MountMode,
    ) -> Self {
        Self::HostBind {
            source: source.into(),
            target: target.into(),
            mode,
        }
    }

    pub fn host_image(image: impl Into<DiskImage>, target: impl Into<String>) -> Self {
        Self::HostImage {
            image: image.into(),
            target: target.into(),
        }
    }

    pub fn guest_bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::GuestBind {
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn ram(target: impl Into<String>, size_kib: u64) -> Self {
        Self::Ram {
            target: target.into(),
            size_kib,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Self::HostBind { target, .. }
            | Self::HostImage { target, .. }
            | Self::GuestBind { target, .. }
            | Self::Ram { target, .. } => target,
        }
    }

    /// Short name of the mount kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HostBind { .. } => "host-bind",
            Self::HostImage { .. } => "host-image",
            Self::GuestBind { .. } => "guest-bind",
            Self::Ram { .. } => "ram",
        }
    }
}

/// Checks that a guest path is absolute and free of traversal components.
pub fn validate_guest_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("empty guest path".to_string());
    }
    if !Path::new(path).is_absolute() {
        return Err(format!("'{path}' is not absolute"));
    }
    if path.split('/').any(|c| c == "..") {
        return Err(format!("'{path}' contains path traversal"));
    }
    if path.contains(char::is_whitespace) || path.contains(':') {
        return Err(format!("'{path}' contains whitespace or ':'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    mod guest_path {
        use super::*;

        #[test]
        fn accepts_absolute() {
            assert!(validate_guest_path("/mnt/data").is_ok());
        }

        #[test]
        fn rejects_relative() {
            assert!(validate_guest_path("mnt/data").is_err());
        }

        #[test]
        fn rejects_traversal() {
            assert!(validate_guest_path("/mnt/../etc").is_err());
        }

        #[test]
        fn rejects_empty() {
            assert!(validate_guest_path("").is_err());
        }

        #[test]
        fn rejects_separator_characters() {
            assert!(validate_guest_path("/mnt/my data").is_err());
            assert!(validate_guest_path("/mnt/a:b").is_err());
        }

        #[test]
        fn dots_inside_names_are_fine() {
            assert!(validate_guest_path("/srv/app..old").is_ok());
        }
    }

    mod mount_spec {
        use super::*;

        #[test]
        fn target_for_each_kind() {
            assert_eq!(MountSpec::host_bind("/h", "/a", MountMode::ReadOnly).target(), "/a");
            assert_eq!(MountSpec::host_image("/img.raw", "/b").target(), "/b");
            assert_eq!(MountSpec::guest_bind("/x", "/c").target(), "/c");
            assert_eq!(MountSpec::ram("/d", 1024).target(), "/d");
        }

        #[test]
        fn deserializes_tagged() {
            let json = r#"{"type":"host-bind","source":"/srv","target":"/mnt"}"#;
            let spec: MountSpec = serde_json::from_str(json).unwrap();
            assert_eq!(
                spec,
                MountSpec::host_bind("/srv", "/mnt", MountMode::ReadOnly)
            );
        }

        #[test]
        fn ram_serializes_with_kind_tag() {
            let json = serde_json::to_string(&MountSpec::ram("/tmp", 65536)).unwrap();
            assert!(json.contains("\"type\":\"ram\""));
            assert!(json.contains("\"size_kib\":65536"));
        }
    }
}
