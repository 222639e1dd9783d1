//! Viper CLI: inspect and manage the task result store.

use clap::Parser;
use std::path::PathBuf;
use viper::core::config::ViperConfig;

#[derive(Parser, Debug)]
#[command(
    name = "viper",
    version,
    about = "Infrastructure automation: run tasks on hosts, keep every result"
)]
struct Cli {
    /// Config file (default: ./viper.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: viper::cli::Commands,
}

fn main() {
    viper::logging::init();
    let cli = Cli::parse();
    let outcome = ViperConfig::load(cli.config.as_deref())
        .and_then(|config| viper::cli::dispatch(cli.command, &config));
    if let Err(e) = outcome {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
