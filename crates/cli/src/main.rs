mod commands;
mod logging;

use clap::{Parser, Subcommand};
use commands::{AttachArgs, BuildArgs, ServicesArgs, VersionArgs};
use logging::LogConfig;

#[derive(Parser)]
#[command(name = "corral")]
#[command(about = "Build and attach to hypervisor-backed sandboxes")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a domain specification from a sandbox configuration
    Build(BuildArgs),

    /// Print the service descriptor the guest init will read
    Services(ServicesArgs),

    /// Attach the terminal to a running sandbox console
    Attach(AttachArgs),

    /// Show version information
    Version(VersionArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    LogConfig { debug: cli.debug }.init();

    match run(cli.command).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:?}");
            std::process::exit(1);
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<i32> {
    match command {
        Commands::Build(args) => commands::build::run(args)?,
        Commands::Services(args) => commands::services::run(args)?,
        Commands::Attach(args) => return commands::attach::run(args).await,
        Commands::Version(args) => commands::version::run(args),
    }
    Ok(0)
}
