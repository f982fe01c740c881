//! # news_fetcher
//!
//! A news aggregation pipeline that collects articles for a category from
//! several Uzbek news sites, normalizes them through an LLM extraction step
//! and returns a date-filtered, capped list of structured articles.
//!
//! ## Usage
//!
//! ```sh
//! MISTRAL_API_KEY=... news_fetcher fetch sport -l 20 -j ./json
//! news_fetcher categories
//! ```
//!
//! ## Architecture
//!
//! 1. **Collecting**: every source mapped to the category is rendered,
//!    its listing paginated and its articles fetched (sources concurrently)
//! 2. **Normalizing**: raw articles go through the extraction model one at
//!    a time, with backoff on rate limits
//! 3. **Filtering**: date range, then the requested count
//! 4. **Output**: JSON to a dated directory, or to stdout

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod aggregate;
mod api;
mod cli;
mod config;
mod errors;
mod models;
mod outputs;
mod pipeline;
mod render;
mod scrapers;
mod utils;

use aggregate::Aggregator;
use api::{ChatClient, RetryModel};
use cli::{Cli, Command, FetchArgs};
use config::{Catalog, Settings};
use errors::NewsError;
use models::FetchRequest;
use outputs::json;
use render::build_renderer;
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("news_fetcher starting up");

    let args = Cli::parse();
    debug!(?args.config, "Parsed CLI arguments");

    let settings = Settings::load(args.config.as_deref()).inspect_err(|e| {
        error!(error = %e, "Failed to load settings");
    })?;
    let catalog = Catalog::from_settings(&settings).inspect_err(|e| {
        error!(error = %e, "Invalid source catalog");
    })?;

    match args.command {
        Command::Categories => {
            for (category, sources) in catalog.describe() {
                println!("{category}: {sources}");
            }
        }
        Command::Fetch(fetch) => run_fetch(settings, &catalog, fetch).await?,
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

async fn run_fetch(mut settings: Settings, catalog: &Catalog, args: FetchArgs) -> Result<(), Box<dyn Error>> {
    if let Some(engine) = args.renderer {
        settings.render.engine = engine;
    }
    if args.api_key.trim().is_empty() {
        error!("No API key for the extraction model (set MISTRAL_API_KEY or pass --api-key)");
        return Err(NewsError::Config("empty API key".to_string()).into());
    }

    // Early check: ensure JSON output dir is writable
    if let Some(dir) = &args.json_output_dir {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(
                path = %dir.display(),
                error = %e,
                "JSON output directory is not writable (fix perms or choose a different path)"
            );
            return Err(e.into());
        }
    }

    let renderer = build_renderer(&settings.render)?;
    info!(engine = renderer.name(), "Renderer ready");
    let client = ChatClient::new(&settings.model, args.api_key.trim())?;
    let model = RetryModel::from_config(client, &settings.model);
    debug!(?model, "Extraction model ready");

    let request = FetchRequest {
        category: args.category,
        limit: args.limit,
        date_from: args.date_from,
        date_to: args.date_to,
    };
    let response = Aggregator::new(&settings, catalog, renderer.as_ref(), &model)
        .fetch(request)
        .await
        .inspect_err(|e| error!(error = %e, "Fetch rejected"))?;
    info!(
        category = %response.category,
        total = response.total_fetched,
        "Fetched articles"
    );

    match &args.json_output_dir {
        Some(dir) => {
            let path = json::write_response(&response, dir).await.inspect_err(|e| {
                error!(error = %e, "Failed to write JSON");
            })?;
            info!(path = %path.display(), "Output written");
        }
        None => println!("{}", serde_json::to_string_pretty(&response)?),
    }
    Ok(())
}
