use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use api::config::AppConfig;
use api::server;
use api::services::Services;

#[derive(Parser)]
#[command(name = "graphrag", about = "Build and query document knowledge graphs")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the graph tables of one document
    Index {
        /// File path or raw document text
        input: String,
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
        /// Resolve pronouns before extraction
        #[arg(long)]
        replace_pronouns: bool,
    },
    /// Answer a question over built tables
    Query {
        question: String,
        #[arg(long, default_value = "output")]
        data_dir: PathBuf,
    },
    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "0.0.0.0:3000")]
        addr: String,
        #[arg(long, default_value = "output")]
        data_dir: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = AppConfig::load(cli.config.as_deref())?;
    let services = Services::from_config(&config);

    match cli.command {
        Command::Index {
            input,
            output,
            replace_pronouns,
        } => {
            let stats = services
                .graph_builder(&config)?
                .run(&input, &output, replace_pronouns)
                .await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Query { question, data_dir } => {
            let engine = services.query_engine(&config, &data_dir).await?;
            let result = engine.answer(&question).await?;
            println!("{}", result.answer);
        }
        Command::Serve { addr, data_dir } => {
            let state = server::AppState::new(config, services, data_dir);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .context(format!("Failed to bind {}", addr))?;
            tracing::info!("Server listening on http://{}", addr);
            axum::serve(listener, server::router(state))
                .await
                .context("Server error")?;
        }
    }

    Ok(())
}
