//! JBSW fine-tuning CLI
//!
//! Provides the `jbsw` command: fine-tune the JBSW chatbot model with LoRA
//! from an instruction JSONL file, preview the rendered prompts, check the
//! machine, and list finished runs.

mod commands;
mod config;

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{doctor, list, preview, show_config, train};

/// JBSW fine-tuning driver
///
/// Loads instruction/response records, renders them with the Llama 3.1 chat
/// template, and runs a LoRA fine-tune through the configured SFT runner.
#[derive(Parser, Debug)]
#[command(
    name = "jbsw",
    author,
    version,
    about = "JBSW - LoRA fine-tuning for the JBSW chatbot",
    long_about = "jbsw prepares chat-formatted training data, drives a LoRA fine-tune on a 4-bit base model,\nand saves both the adapter and a merged model ready for export."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Configuration file (overrides JBSW_CONFIG and ./jbsw.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a fine-tuning job
    ///
    /// Checks for a CUDA GPU, loads and renders the training data, runs the
    /// SFT runner, and records the adapter and merged model.
    Train {
        /// Training data (JSONL)
        #[arg(long)]
        data: Option<PathBuf>,

        /// Directory for the LoRA adapter and checkpoints
        #[arg(long)]
        adapter_dir: Option<PathBuf>,

        /// Directory for the merged model
        #[arg(long)]
        merged_dir: Option<PathBuf>,

        /// Number of training epochs
        #[arg(long)]
        epochs: Option<u32>,

        /// Output the run manifest as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render training prompts without training
    Preview {
        /// Training data (JSONL)
        #[arg(long)]
        data: Option<PathBuf>,

        /// Number of prompts to show
        #[arg(long, default_value = "3")]
        limit: usize,

        /// Write the whole rendered dataset to this JSONL file
        #[arg(long)]
        write: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check GPU, data and runner availability
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List completed training runs
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    Config {
        /// Output as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // If no command provided, show help
    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    let loaded = config::load_config(args.config.as_deref())?;

    match command {
        Command::Train { data, adapter_dir, merged_dir, epochs, json } => {
            let overrides = train::TrainOverrides { data, adapter_dir, merged_dir, epochs };
            train::execute(loaded.config, overrides, json).await?;
        }
        Command::Preview { data, limit, write, json } => {
            preview::execute(&loaded.config, data, limit, write, json)?;
        }
        Command::Doctor { json } => {
            doctor::execute(&loaded, json).await?;
        }
        Command::List { json } => {
            list::execute(&loaded.config, json)?;
        }
        Command::Config { json } => {
            show_config::execute(&loaded, json)?;
        }
    }

    Ok(())
}
