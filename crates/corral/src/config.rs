//! Loading sandbox configurations from TOML.

use corral_core::{Error, Result, SandboxConfig};
use std::path::Path;
use tracing::debug;

/// Parses a sandbox configuration from TOML text.
pub fn from_toml_str(text: &str) -> Result<SandboxConfig> {
    toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
}

/// Reads and parses a sandbox configuration file.
pub fn load(path: &Path) -> Result<SandboxConfig> {
    let text = std::fs::read_to_string(path)?;
    let config: SandboxConfig =
        toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
    debug!(path = %path.display(), sandbox = %config.name, "loaded sandbox config");
    Ok(config)
}

/// Renders a configuration back to TOML.
pub fn to_toml_string(config: &SandboxConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| Error::Config(e.to_string()))
}
