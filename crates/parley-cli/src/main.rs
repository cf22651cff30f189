//! parley - voice chatbot and batch generation tools

mod chat;
mod config;
mod imagen;
mod process;
mod say;

use anyhow::Context;
use clap::{Parser, Subcommand};
use parley_ai::{ChatModel, providers::{GeminiImageClient, OpenAIProvider}};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::process::{FieldSpec, FileProcessor};

/// Default chat model for file processing
const PROCESS_MODEL: &str = "gpt-4o-mini";

/// parley - talk to a persona, generate images in bulk
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Voice chat with a persona; type lines to stand in for speech recognition
    Chat {
        /// Built-in persona (companion, duo) or a persona TOML file
        #[arg(short, long)]
        persona: Option<String>,

        /// Chat model (default: gpt-4o)
        #[arg(short, long)]
        model: Option<String>,

        /// Print replies without speaking them
        #[arg(long)]
        text_only: bool,
    },

    /// Speak each line read from stdin
    Say {
        /// Engine speaker id
        #[arg(short, long)]
        speaker: Option<u32>,
    },

    /// Generate images for every row of a CSV file
    Imagen {
        /// Path to the CSV file (UTF-8, with a header row)
        #[arg(long)]
        csv: PathBuf,

        /// Parse the CSV and write the log without calling the API
        #[arg(long)]
        dry_run: bool,

        /// Process only the first N rows
        #[arg(long)]
        limit: Option<usize>,

        /// Skip rows whose output file already exists
        #[arg(long)]
        skip_existing: bool,

        /// Image model (default: gemini-3-pro-image-preview)
        #[arg(long)]
        model: Option<String>,

        /// Directory holding the timestamped run directories
        #[arg(long)]
        output_root: Option<PathBuf>,
    },

    /// Process a text file, or every matching file in a directory
    Process {
        /// Instructions for the model
        #[arg(short, long)]
        instructions: String,

        /// Output field as key=description; repeat for several
        #[arg(short, long = "field")]
        fields: Vec<FieldSpec>,

        /// File extension to match in a directory
        #[arg(long, default_value = ".txt")]
        ext: String,

        /// Chat model (default: gpt-4o-mini)
        #[arg(short, long)]
        model: Option<String>,

        /// Text file or directory
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load .env before anything reads the environment
    dotenvy::dotenv().ok();

    // Setup tracing; stdout is reserved for the transcript
    let default_filter = if args.verbose {
        "parley=debug"
    } else {
        "parley=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let Some(command) = args.command else {
        eprintln!("No command given. Run `parley --help` for usage.");
        std::process::exit(1);
    };

    // Load config file
    let cfg = config::Config::load();

    match command {
        Command::Chat {
            persona,
            model,
            text_only,
        } => {
            chat::run(
                &cfg,
                chat::ChatOptions {
                    persona,
                    model,
                    text_only,
                },
            )
            .await
        }
        Command::Say { speaker } => say::run(&cfg, speaker).await,
        Command::Imagen {
            csv,
            dry_run,
            limit,
            skip_existing,
            model,
            output_root,
        } => {
            let options = imagen::BatchOptions {
                csv_path: csv,
                dry_run,
                limit,
                skip_existing,
                output_root,
            };
            let code = run_imagen(&cfg, &options, model.as_deref()).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Command::Process {
            instructions,
            fields,
            ext,
            model,
            path,
        } => {
            let model = model
                .or_else(|| cfg.model.clone())
                .unwrap_or_else(|| PROCESS_MODEL.to_string());
            run_process(&cfg, &instructions, fields, &ext, &model, &path).await
        }
    }
}

async fn run_imagen(
    cfg: &config::Config,
    options: &imagen::BatchOptions,
    model: Option<&str>,
) -> anyhow::Result<i32> {
    let model = model.or(cfg.image_model.as_deref());
    let client = if options.dry_run {
        None
    } else {
        Some(
            GeminiImageClient::from_key_or_env(cfg.api_key("google"), model)
                .context("No Google API key: set GOOGLE_API_KEY or GEMINI_API_KEY")?,
        )
    };
    if let Some(client) = &client {
        tracing::info!("Image model: {}", client.model());
    }

    let generator = client
        .as_ref()
        .map(|c| c as &dyn parley_ai::ImageGenerator);
    let summary = imagen::run_batch(options, generator).await?;
    println!(
        "Batch finished: ok={} ng={} output={} log={}",
        summary.ok,
        summary.failed,
        summary.run_dir.display(),
        summary.log_path.display()
    );
    Ok(summary.exit_code())
}

async fn run_process(
    cfg: &config::Config,
    instructions: &str,
    fields: Vec<FieldSpec>,
    extension: &str,
    model: &str,
    path: &std::path::Path,
) -> anyhow::Result<()> {
    let provider = OpenAIProvider::from_key_or_env(cfg.api_key("openai"))
        .context("No OpenAI API key: set OPENAI_API_KEY or add it to the config file")?;
    let processor = FileProcessor::new(&provider, ChatModel::new(model), instructions, fields);

    if path.is_dir() {
        let (output, failed) = processor.process_directory(path, extension).await?;
        println!("Wrote {}", output.display());
        if failed > 0 {
            eprintln!("{} file(s) failed", failed);
            std::process::exit(2);
        }
        return Ok(());
    }

    let output = processor.process_file(path).await?;
    println!("{}", output);
    Ok(())
}
