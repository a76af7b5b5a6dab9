//! Builds the service descriptor the guest init runs at boot.

use corral_core::{CommandSpec, Error, Result, SandboxConfig};
use corral_protocol::{PRIMARY_SERVICE_NAME, ServiceDescriptor, ServiceRecord};
use std::collections::HashSet;
use tracing::debug;

/// Turns the command and services of a sandbox into a [`ServiceDescriptor`].
///
/// Record 0 is the primary command, named `main`; auxiliary services follow
/// in configuration order. Identical configurations produce identical
/// descriptors.
pub fn build_descriptor(config: &SandboxConfig) -> Result<ServiceDescriptor> {
    if config.command.argv.is_empty() {
        return Err(Error::InvalidConfig("primary command is empty".to_string()));
    }

    let mut seen = HashSet::new();
    for service in &config.services {
        if service.name == PRIMARY_SERVICE_NAME {
            return Err(Error::InvalidConfig(format!(
                "service name '{PRIMARY_SERVICE_NAME}' is reserved"
            )));
        }
        if !seen.insert(service.name.as_str()) {
            return Err(Error::InvalidConfig(format!(
                "duplicate service name '{}'",
                service.name
            )));
        }
        if service.command.argv.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "service '{}' has an empty command",
                service.name
            )));
        }
    }

    let records = std::iter::once(record(PRIMARY_SERVICE_NAME, &config.command))
        .chain(
            config
                .services
                .iter()
                .map(|s| record(&s.name, &s.command)),
        )
        .collect();

    let descriptor = ServiceDescriptor::new(records)?;
    debug!(
        sandbox = %config.name,
        records = descriptor.len(),
        "built service descriptor"
    );
    Ok(descriptor)
}

fn record(name: &str, command: &CommandSpec) -> ServiceRecord {
    ServiceRecord {
        name: name.to_string(),
        argv: command.argv.clone(),
        env: command.env.clone(),
        user: command.user.clone(),
        group: command.group.clone(),
        workdir: command.workdir.clone(),
    }
}
