//! datastep CLI: inspect, convert and sort data sets from the terminal.

mod commands;

use clap::Parser;
use std::path::PathBuf;

/// datastep: streaming data-step tooling for canonical data sets
#[derive(Parser, Debug)]
#[command(name = "datastep", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (holds .datastep/config.toml)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Data library directory, overriding the configured root
    #[arg(short, long)]
    library: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// List the data sets in the library
    List,
    /// Print the variables of a data set with their metadata
    Schema {
        /// Data set name
        name: String,
    },
    /// Print the first rows of a data set as JSON lines
    Head {
        /// Data set name
        name: String,
        /// Number of rows to print
        #[arg(short = 'n', long, default_value_t = 10)]
        rows: usize,
    },
    /// Count the rows of a data set
    Count {
        /// Data set name
        name: String,
    },
    /// Import a delimited text file (header row required) as a data set
    Import {
        /// Source file
        file: PathBuf,
        /// Target data set name (defaults to the file stem)
        name: Option<String>,
        /// Field delimiter, overriding the configured one
        #[arg(short, long)]
        delimiter: Option<char>,
    },
    /// Export a data set to delimited text with a header row
    Export {
        /// Data set name
        name: String,
        /// Target file
        file: PathBuf,
        /// Field delimiter, overriding the configured one
        #[arg(short, long)]
        delimiter: Option<char>,
    },
    /// Sort a data set into another with bounded memory
    Sort {
        /// Input data set
        input: String,
        /// Output data set
        output: String,
        /// Keys, comma separated; prefix a key with '-' for descending
        #[arg(long, required = true, allow_hyphen_values = true)]
        by: String,
        /// Rows per in-memory chunk, overriding the configured size
        #[arg(long)]
        split_size: Option<usize>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create a default .datastep/config.toml in the workspace
    Init,
    /// Show the resolved configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut config = datastep_core::load_config(Some(&workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    config.logging.level =
        datastep_core::logging::filter_for_verbosity(cli.verbose, cli.quiet, &config.logging.level);
    datastep_core::logging::init_tracing(&config.logging);

    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    if let Some(library) = cli.library {
        config.library.root = library;
    }
    if config.library.root.is_relative() {
        config.library.root = workspace.join(&config.library.root);
    }

    commands::handle_command(cli.command, &workspace, &config)
}
