//! The `build` command - turns a sandbox configuration into a domain spec.

use anyhow::{Context, bail};
use clap::Args;
use corral::capabilities::HypervisorCapabilities;
use corral::{
    BackendKind, CommandSpec, DirectConnection, MountMode, MountSpec, SandboxConfig,
    ServiceConfig, backend_for_uri, build_domain, config,
};
use std::path::PathBuf;
use tracing::info;

const MAX_CPUS: u32 = 256;
const MAX_MEMORY_MB: u32 = 1024 * 1024; // 1 TB

#[derive(Args)]
pub struct BuildArgs {
    #[command(flatten)]
    pub sandbox: SandboxArgs,

    /// Hypervisor URI the spec is built for (default: qemu:///system, or
    /// lxc:/// for containers)
    #[arg(long)]
    connect: Option<String>,

    /// Write the spec here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
}

/// Where a sandbox configuration comes from: a TOML file, command-line
/// flags, or a file with flags layered on top.
#[derive(Args)]
pub struct SandboxArgs {
    /// Path to a TOML sandbox configuration
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Sandbox name (default: generated)
    #[arg(long)]
    name: Option<String>,

    /// Kernel image for direct boot
    #[arg(long, value_parser = parse_existing_file, requires = "initrd")]
    kernel: Option<PathBuf>,

    /// Initrd image for direct boot
    #[arg(long, value_parser = parse_existing_file, requires = "kernel")]
    initrd: Option<PathBuf>,

    /// Bootable disk image
    #[arg(long, value_parser = parse_existing_file, conflicts_with_all = ["kernel", "root"])]
    disk: Option<PathBuf>,

    /// Host directory used as a container root
    #[arg(long, conflicts_with = "kernel")]
    root: Option<PathBuf>,

    /// Number of CPUs (1-256)
    #[arg(long, value_parser = parse_cpus)]
    cpus: Option<u32>,

    /// Memory in MB (1-1048576)
    #[arg(long, value_parser = parse_memory)]
    memory: Option<u32>,

    /// Shared directories (format: host:guest or host:guest:ro|rw)
    #[arg(long, short, value_parser = parse_share)]
    share: Vec<MountSpec>,

    /// Auxiliary service (format: name=command args...)
    #[arg(long, value_parser = parse_service)]
    service: Vec<ServiceConfig>,

    /// Primary command and its arguments
    #[arg(last = true)]
    command: Vec<String>,
}

impl SandboxArgs {
    pub fn to_config(&self) -> anyhow::Result<SandboxConfig> {
        let mut config = match &self.config {
            Some(path) => config::load(path)?,
            None => {
                if self.command.is_empty() {
                    bail!("either --config or a command after `--` is required");
                }
                SandboxConfig::new(default_name(), self.command.clone())
            }
        };

        if self.config.is_some() && !self.command.is_empty() {
            config.command.argv = self.command.clone();
        }
        if let Some(name) = &self.name {
            config.name = name.clone();
        }

        if let (Some(kernel), Some(initrd)) = (&self.kernel, &self.initrd) {
            config = config.kernel_boot(kernel, initrd);
        }
        if let Some(disk) = &self.disk {
            config = config.disk_boot(disk);
        }
        if let Some(root) = &self.root {
            config = config.backend(BackendKind::Container).root_boot(root);
        }
        if let Some(cpus) = self.cpus {
            config = config.cpus(cpus);
        }
        if let Some(memory) = self.memory {
            config = config.memory_mb(memory);
        }
        for share in &self.share {
            config = config.mount(share.clone());
        }
        for service in &self.service {
            config = config.service(service.clone());
        }

        Ok(config)
    }
}

fn default_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("corral-{}", &id[..8])
}

/// Connection carrying the capabilities of the hypervisor behind `uri`.
pub fn connection_for(
    config: &SandboxConfig,
    uri: Option<&str>,
) -> anyhow::Result<DirectConnection> {
    let uri = uri.unwrap_or(match config.backend {
        BackendKind::Machine => "qemu:///system",
        BackendKind::Container => "lxc:///",
    });
    let kind = backend_for_uri(uri)?;
    if kind != config.backend {
        return Err(corral::Error::InvalidConfig(format!(
            "{uri} drives {} sandboxes but '{}' is a {} sandbox",
            kind.as_str(),
            config.name,
            config.backend.as_str()
        ))
        .into());
    }
    let capabilities = match kind {
        BackendKind::Machine => HypervisorCapabilities::qemu(),
        BackendKind::Container => HypervisorCapabilities::lxc(),
    };
    Ok(DirectConnection::new(uri).with_capabilities(capabilities))
}

pub fn run(args: BuildArgs) -> anyhow::Result<()> {
    let config = args.sandbox.to_config()?;
    let connection = connection_for(&config, args.connect.as_deref())?;
    let spec = build_domain(&config, &connection)?;
    info!(
        sandbox = %spec.name,
        consoles = ?spec.console_names(),
        "built domain specification"
    );

    let json = serde_json::to_string_pretty(&spec)?;
    match args.output {
        Some(path) => std::fs::write(&path, json + "\n")
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn parse_cpus(s: &str) -> Result<u32, String> {
    let cpus: u32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if cpus == 0 {
        return Err("cpus must be at least 1".to_string());
    }
    if cpus > MAX_CPUS {
        return Err(format!("cpus cannot exceed {MAX_CPUS}"));
    }
    Ok(cpus)
}

fn parse_memory(s: &str) -> Result<u32, String> {
    let memory: u32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if memory == 0 {
        return Err("memory must be at least 1 MB".to_string());
    }
    if memory > MAX_MEMORY_MB {
        return Err(format!("memory cannot exceed {MAX_MEMORY_MB} MB"));
    }
    Ok(memory)
}

fn parse_existing_file(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if !path.exists() {
        return Err(format!("file not found: {s}"));
    }
    if !path.is_file() {
        return Err(format!("not a file: {s}"));
    }
    Ok(path)
}

fn parse_share(s: &str) -> Result<MountSpec, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 2 {
        return Err("share format must be 'host:guest' or 'host:guest:mode'".to_string());
    }
    if parts.len() > 3 {
        return Err("too many colons in share format".to_string());
    }

    let host = parts[0];
    let guest = parts[1];

    if host.is_empty() {
        return Err("host path cannot be empty".to_string());
    }
    if guest.is_empty() {
        return Err("guest path cannot be empty".to_string());
    }
    if !PathBuf::from(host).is_dir() {
        return Err(format!("share host directory not found: {host}"));
    }

    let mode = match parts.get(2) {
        None | Some(&"ro") => MountMode::ReadOnly,
        Some(&"rw") => MountMode::ReadWrite,
        Some(other) => {
            return Err(format!(
                "invalid mount mode '{other}', expected 'ro' or 'rw'"
            ));
        }
    };

    Ok(MountSpec::host_bind(host, guest, mode))
}

fn parse_service(s: &str) -> Result<ServiceConfig, String> {
    let (name, command) = s
        .split_once('=')
        .ok_or_else(|| "service format must be 'name=command args...'".to_string())?;
    if name.is_empty() {
        return Err("service name cannot be empty".to_string());
    }
    let argv: Vec<&str> = command.split_whitespace().collect();
    if argv.is_empty() {
        return Err(format!("service '{name}' has no command"));
    }
    Ok(ServiceConfig::new(name, CommandSpec::new(argv)))
}
