//! The `services` command - shows what the guest init will launch.

use crate::commands::build::SandboxArgs;
use clap::Args;
use corral::build_descriptor;

#[derive(Args)]
pub struct ServicesArgs {
    #[command(flatten)]
    sandbox: SandboxArgs,

    /// Output in JSON format
    #[arg(long)]
    json: bool,
}

pub fn run(args: ServicesArgs) -> anyhow::Result<()> {
    let config = args.sandbox.to_config()?;
    let descriptor = build_descriptor(&config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(descriptor.records())?);
    } else {
        print!("{}", descriptor.to_text());
    }
    Ok(())
}
