//! Kernel command line parsing for corral sandboxes.
//!
//! Parses parameters:
//! - `corral.config=tag:fstype` - share carrying the service descriptor
//! - `corral.mount=tag:fstype:path[:ro]` - host directory share
//! - `corral.disk=device:path[:ro]` - block device to mount
//! - `corral.bind=source:target` - bind mount inside the guest
//! - `corral.tmpfs=path:size-kib` - memory-backed filesystem
//!
//! Paths are percent-encoded by the host so they survive whitespace
//! splitting and the `:` separator. Container sandboxes receive the same
//! parameters as init arguments instead of a kernel command line.

use corral_protocol::{CMDLINE_BIND, CMDLINE_CONFIG, CMDLINE_DISK, CMDLINE_MOUNT, CMDLINE_TMPFS};
use percent_encoding::percent_decode_str;
use std::fs;
use std::path::{Component, Path};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct InitConfig {
    pub config: Option<ConfigShare>,
    pub mounts: Vec<ShareMount>,
    pub disks: Vec<DiskMount>,
    pub binds: Vec<BindMount>,
    pub tmpfs: Vec<TmpfsMount>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ConfigShare {
    pub tag: String,
    pub fstype: String,
}

impl ConfigShare {
    /// Containers get the config directory bound in by the runtime, so there
    /// is nothing to mount.
    pub fn is_passthrough(&self) -> bool {
        self.fstype == "bind"
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ShareMount {
    pub tag: String,
    pub fstype: String,
    pub path: String,
    pub read_only: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub struct DiskMount {
    pub device: String,
    pub path: String,
    pub read_only: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub struct BindMount {
    pub source: String,
    pub target: String,
}

#[derive(Debug, PartialEq, Eq)]
pub struct TmpfsMount {
    pub path: String,
    pub size_kib: u64,
}

#[derive(Debug)]
pub enum ParseError {
    Io(std::io::Error),
    Malformed { key: &'static str, value: String },
    InvalidMountPath(String),
    InvalidEncoding(String),
    InvalidSize(String),
    EmptyMountTag,
    EmptyMountPath,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Io(e) => write!(f, "failed to read cmdline: {}", e),
            ParseError::Malformed { key, value } => write!(f, "malformed {}={}", key, value),
            ParseError::InvalidMountPath(p) => write!(f, "invalid mount path: {}", p),
            ParseError::InvalidEncoding(s) => write!(f, "invalid percent-encoding: {}", s),
            ParseError::InvalidSize(s) => write!(f, "invalid tmpfs size: {}", s),
            ParseError::EmptyMountTag => write!(f, "empty mount tag"),
            ParseError::EmptyMountPath => write!(f, "empty mount path"),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        ParseError::Io(e)
    }
}

fn validate_mount_path(path: &str) -> Result<(), ParseError> {
    if path.is_empty() {
        return Err(ParseError::EmptyMountPath);
    }

    let p = Path::new(path);

    if !p.is_absolute() {
        return Err(ParseError::InvalidMountPath(format!(
            "'{}' is not absolute",
            path
        )));
    }

    if p.components().any(|c| c == Component::ParentDir) {
        return Err(ParseError::InvalidMountPath(format!(
            "'{}' contains path traversal",
            path
        )));
    }

    Ok(())
}

fn decode_path(raw: &str) -> Result<String, ParseError> {
    let path = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| ParseError::InvalidEncoding(raw.to_string()))?
        .into_owned();
    validate_mount_path(&path)?;
    Ok(path)
}

fn non_empty_tag(tag: &str) -> Result<String, ParseError> {
    if tag.is_empty() {
        return Err(ParseError::EmptyMountTag);
    }
    Ok(tag.to_string())
}

/// Splits `value` into its fields plus a trailing `ro` flag.
fn split_fields<'a>(
    key: &'static str,
    value: &'a str,
    required: usize,
    allow_ro: bool,
) -> Result<(Vec<&'a str>, bool), ParseError> {
    let mut fields: Vec<&str> = value.split(':').collect();
    let read_only = allow_ro && fields.len() == required + 1 && fields.last() == Some(&"ro");
    if read_only {
        fields.pop();
    }
    if fields.len() != required {
        return Err(ParseError::Malformed {
            key,
            value: value.to_string(),
        });
    }
    Ok((fields, read_only))
}

pub fn parse_cmdline() -> Result<InitConfig, ParseError> {
    let cmdline = fs::read_to_string("/proc/cmdline")?;
    parse_words(cmdline.split_whitespace())
}

/// Parses `corral.*` parameters, ignoring everything else.
pub fn parse_words<'a>(
    words: impl IntoIterator<Item = &'a str>,
) -> Result<InitConfig, ParseError> {
    let mut config = InitConfig::default();

    for word in words {
        let Some((key, value)) = word.split_once('=') else {
            continue;
        };
        match key {
            CMDLINE_CONFIG => {
                let (f, _) = split_fields(CMDLINE_CONFIG, value, 2, false)?;
                config.config = Some(ConfigShare {
                    tag: non_empty_tag(f[0])?,
                    fstype: f[1].to_string(),
                });
            }
            CMDLINE_MOUNT => {
                let (f, read_only) = split_fields(CMDLINE_MOUNT, value, 3, true)?;
                config.mounts.push(ShareMount {
                    tag: non_empty_tag(f[0])?,
                    fstype: f[1].to_string(),
                    path: decode_path(f[2])?,
                    read_only,
                });
            }
            CMDLINE_DISK => {
                let (f, read_only) = split_fields(CMDLINE_DISK, value, 2, true)?;
                config.disks.push(DiskMount {
                    device: non_empty_tag(f[0])?,
                    path: decode_path(f[1])?,
                    read_only,
                });
            }
            CMDLINE_BIND => {
                let (f, _) = split_fields(CMDLINE_BIND, value, 2, false)?;
                config.binds.push(BindMount {
                    source: decode_path(f[0])?,
                    target: decode_path(f[1])?,
                });
            }
            CMDLINE_TMPFS => {
                let (f, _) = split_fields(CMDLINE_TMPFS, value, 2, false)?;
                let size_kib = f[1]
                    .parse::<u64>()
                    .ok()
                    .filter(|size| *size > 0)
                    .ok_or_else(|| ParseError::InvalidSize(f[1].to_string()))?;
                config.tmpfs.push(TmpfsMount {
                    path: decode_path(f[0])?,
                    size_kib,
                });
            }
            _ => {}
        }
    }

    Ok(config)
}
