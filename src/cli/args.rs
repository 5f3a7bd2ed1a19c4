//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// File-system change notifications
#[derive(Parser, Debug)]
#[command(
    name = "file-events",
    version = env!("CARGO_PKG_VERSION"),
    about = "Watch paths for file-system changes",
    long_about = "Report created, removed, modified and invalidated paths \
                  using the native watch engine.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print events for the given paths
    #[command(about = "Watch paths and print change events")]
    Watch {
        /// Paths to watch; relative paths resolve against the current directory
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,

        /// Stop after this many seconds
        #[arg(short, long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Print one JSON object per event
        #[arg(long)]
        json: bool,

        /// Watch whole hierarchies (overrides config)
        #[arg(short, long)]
        recursive: bool,
    },

    #[command(about = "Show the resolved platform and engine artifact")]
    Platform,

    #[command(about = "Display active settings")]
    Config,

    #[command(about = "Create .file-events/settings.toml with default settings")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_args() {
        let cli = Cli::try_parse_from([
            "file-events",
            "watch",
            "/a",
            "/b",
            "--timeout",
            "3",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Watch {
                paths,
                timeout,
                json,
                recursive,
            } => {
                assert_eq!(paths, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
                assert_eq!(timeout, Some(3));
                assert!(json);
                assert!(!recursive);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_watch_requires_a_path() {
        assert!(Cli::try_parse_from(["file-events", "watch"]).is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli =
            Cli::try_parse_from(["file-events", "platform", "--config", "/tmp/s.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/s.toml")));
    }
}
