mod cli;
mod command;
mod config;
mod error;
mod expand;
mod functions;
mod list;
mod logging;
mod pool;
mod process;
mod progress;
mod results;
mod runner;
mod status;
mod unit;

use clap::{ArgAction, Parser};

use crate::status::EXIT_STATUS_ABORTED;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "batchrun",
    version,
    about = "Expand a model command into work units and run them on a bounded worker pool",
    disable_help_flag = true
)]
pub struct Cli {
    /// Path to the function configuration (defaults to batchrun.toml)
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Directory relative function working directories resolve against
    /// (defaults to the config's folder or current dir)
    #[arg(long)]
    root: Option<std::path::PathBuf>,

    /// No console logging
    #[arg(long)]
    quiet: bool,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Print help (`-h` belongs to the model command)
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// The model command, e.g. `-write -batch "in/*.csv" "out/#fnb#.x9" -threads:4`
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "MODEL"
    )]
    command: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let status = match cli::run(cli).await {
        Ok(status) => status,
        Err(err) => {
            eprintln!("error: {err:#}");
            EXIT_STATUS_ABORTED
        }
    };
    std::process::exit(status);
}
