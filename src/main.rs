//! CLI entry point for the commute conditions scorer.
//!
//! Provides subcommands for running a single collection and for collecting
//! repeatedly at the configured interval.

use anyhow::Result;
use clap::{Parser, Subcommand};
use commute_score::config::Config;
use commute_score::pipeline::{self, Clients, Provenance};
use std::ffi::OsStr;
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "commute_score")]
#[command(about = "Scores commute conditions from transit, weather and air-quality feeds", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one collection and write the snapshot artifacts
    Run {
        /// Path to a JSON config file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// Directory to write artifacts to (overrides the config value)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Collect repeatedly at the configured interval
    Watch {
        /// Path to a JSON config file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// Number of collections to run (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 0)]
        samples: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/commute_score.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("commute_score.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, output } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(output) = output {
                config.output_dir = output;
            }

            let clients = build_clients()?;
            let provenance = Provenance::new("cli-run");
            pipeline::run(&config, &provenance, &clients).await?;
        }
        Commands::Watch { config, samples } => {
            let config = load_config(config.as_deref())?;
            let clients = build_clients()?;
            watch(&config, &clients, samples).await?;
        }
    }

    Ok(())
}

/// Loads the config file when a path is given, otherwise the documented
/// defaults. Validation failure is fatal before any fetch runs.
fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => {
            info!(path, "Loading config");
            Config::load(path)
        }
        None => {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Builds the per-source HTTP clients. When `TRANSIT_APP_KEY` is set it is
/// attached as an `app_key` URL query parameter on the transit client only;
/// weather and air requests go out through an undecorated client. The
/// credential lives inside the client; composed URLs and request traces
/// never see it.
fn build_clients() -> Result<Clients> {
    let key = std::env::var("TRANSIT_APP_KEY").ok().filter(|k| !k.is_empty());
    if key.is_some() {
        info!("Transit API key found, attaching as app_key on transit requests");
    }
    Clients::build(key)
}

/// Runs collections in a loop at the configured interval.
#[tracing::instrument(skip_all, fields(samples))]
async fn watch(config: &Config, clients: &Clients, samples: usize) -> Result<()> {
    let interval_secs = u64::from(config.history.interval_minutes) * 60;

    if samples == 0 {
        info!(interval_secs, "Collecting infinitely. Press Ctrl+C to stop.");
    } else {
        info!(samples, interval_secs, "Starting collection");
    }

    let mut sample_count = 0;

    loop {
        if samples > 0 && sample_count >= samples {
            break;
        }
        sample_count += 1;

        info!(
            sample = sample_count,
            total = if samples == 0 { None } else { Some(samples) },
            "Starting collection round"
        );

        let provenance = Provenance::new("cli-watch");
        if let Err(e) = pipeline::run(config, &provenance, clients).await {
            // Only invalid config reaches here; source failures are
            // absorbed into the snapshot as warnings.
            error!(error = %e, "Collection failed");
            return Err(e);
        }

        if samples == 0 || sample_count < samples {
            info!(interval_secs, "Waiting before next collection");
            tokio::time::sleep(tokio::time::Duration::from_secs(interval_secs)).await;
        }
    }

    info!("Finished collecting");
    Ok(())
}
