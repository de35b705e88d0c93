use crate::demo::{run_check_seed, run_demo, CheckSeedArgs, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use status_rules::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Status Rules Service",
    about = "Serve, validate and demonstrate jurisdiction health status rules",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Validate a catalog seed file without starting the service
    CheckSeed(CheckSeedArgs),
    /// Walk through rule resolution, symptom evaluation, access and ruleset distribution
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Catalog seed to load before serving (overrides CATALOG_SEED_PATH)
    #[arg(long)]
    pub(crate) seed: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::CheckSeed(args) => run_check_seed(args),
        Command::Demo(args) => run_demo(args),
    }
}
