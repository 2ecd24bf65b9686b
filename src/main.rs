mod cli;

use clap::{Parser, Subcommand};
use cli::{AmiArgs, DefaultSgArgs, InstanceArgs, SgArgs, SgRulesArgs};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the newest Ubuntu 22.04 AMI
    Ami(AmiArgs),
    /// Create or reuse the builder security group
    Sg(SgArgs),
    /// Look up a VPC's default security group
    DefaultSg(DefaultSgArgs),
    /// Open web ingress on an existing security group
    SgRules(SgRulesArgs),
    /// Launch a builder instance and wait for it to run
    Instance(InstanceArgs),
}

fn init_tracing() {
    // Diagnostics go to stderr; stdout is reserved for the resource ids and
    // JSON the orchestrator parses.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    use Commands::*;
    let result = match cli.command {
        Ami(args) => args.main().await,
        Sg(args) => args.main().await,
        DefaultSg(args) => args.main().await,
        SgRules(args) => args.main().await,
        Instance(args) => args.main().await,
    };

    if let Err(err) = result {
        eprintln!("ERROR: {err:#}");
        std::process::exit(1);
    }
}
