use clap::Parser;
use file_events::Settings;
use file_events::cli::commands::{init, platform, watch};
use file_events::cli::{Cli, Commands};
use file_events::logging;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        Settings::default()
    });

    logging::init_with_config(&config.logging);

    match &cli.command {
        Commands::Watch {
            paths,
            timeout,
            json,
            recursive,
        } => watch::run_watch(&config, paths, *timeout, *json, *recursive),
        Commands::Platform => platform::run_platform(),
        Commands::Config => init::run_config(&config),
        Commands::Init { force } => {
            let cwd = std::env::current_dir()?;
            init::run_init(&cwd, *force).map(|_| ())
        }
    }
}
