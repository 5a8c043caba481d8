mod cli;
mod server;

use clap::Parser;
use cli::{Cli, Commands};
use runbox::config::Config;
use runbox::observability::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let config = Config::load()?;
    init_tracing(&config.telemetry.log_filter);

    match cli.command {
        Commands::Serve(args) => server::run(config, args.address).await?,
        Commands::Config => print!("{}", config.to_toml()?),
    }

    Ok(())
}
