use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "homestream")]
#[command(author, version, about = "Home media streaming server")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the streaming server
    Start {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Probe a media file and show how it would be delivered
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Kill transcoder processes left behind by a crashed server
    Reap,

    /// Delete cached thumbnails
    ClearThumbnails,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn start_overrides_are_optional() {
        let cli = Cli::try_parse_from(["homestream", "start"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Start {
                host: None,
                port: None
            }
        ));

        let cli = Cli::try_parse_from(["homestream", "-v", "start", "-p", "9000"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Start { port: Some(9000), .. }));
    }

    #[test]
    fn global_config_after_subcommand() {
        let cli =
            Cli::try_parse_from(["homestream", "probe", "/m/a.mkv", "--json", "--config", "x.toml"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(cli.command, Commands::Probe { json: true, .. }));
    }
}
