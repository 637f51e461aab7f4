//! rustlibkey - LibKey discovery add-on link resolution engine
//!
//! Resolves the LibKey buttons, link stacks and journal cover for a search
//! record using the Third Iron public API with an Unpaywall fallback.
//!
//! ## Usage
//!
//! ### CLI Mode
//! ```bash
//! rustlibkey resolve --record record.json --view-model view_model.json
//! rustlibkey config --settings settings.json
//! ```
//!
//! ### HTTP Server Mode
//! ```bash
//! rustlibkey serve --port 3000
//! ```

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use clap::{Parser, Subcommand};
use rustlibkey::{
    config::{default_settings_path, ConfigResolver, Settings},
    enhancer::{NoopHider, RecordEnhancer},
    libkey::ThirdIronClient,
    links::{LinkLabels, PrimoViewModel},
    search_entity::SearchEntity,
    session::{self, Resolution},
    translation::{StaticTranslations, TranslationService, Translator},
    unpaywall::UnpaywallHttpClient,
    waterfall::DisplayWaterfall,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// LibKey discovery add-on link resolution engine
#[derive(Parser)]
#[command(name = "rustlibkey")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Settings JSON file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Translation table JSON file (key -> text)
    #[arg(long, global = true)]
    translations: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve buttons, links and cover for one search record
    Resolve {
        /// Search record JSON file
        #[arg(short, long)]
        record: PathBuf,

        /// Host view model JSON file (online links and direct link)
        #[arg(long)]
        view_model: Option<PathBuf>,

        /// Seconds to wait for each pipeline
        #[arg(long, default_value = "10")]
        timeout: u64,
    },

    /// Show the resolved settings and feature flags
    Config,

    /// Run as HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Seconds to wait for each pipeline per request
        #[arg(long, default_value = "10")]
        timeout: u64,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    let translator = load_translations(cli.translations.as_deref())?;
    let config = Arc::new(load_config(cli.settings, translator.clone())?);

    match cli.command {
        Commands::Resolve {
            record,
            view_model,
            timeout,
        } => run_resolve(config, translator, &record, view_model.as_deref(), timeout).await,
        Commands::Config => show_config(&config),
        Commands::Serve {
            port,
            host,
            timeout,
        } => run_server(config, translator, host, port, timeout).await,
    }
}

// ============================================================================
// Setup
// ============================================================================

fn load_config(path: Option<PathBuf>, translator: Arc<dyn Translator>) -> Result<ConfigResolver> {
    let path = match path {
        Some(path) => path,
        None => default_settings_path()?,
    };

    let settings = if path.exists() {
        Settings::load(&path).with_context(|| format!("Failed to load settings from {:?}", path))?
    } else {
        warn!(path = ?path, "Settings file not found, every feature stays off");
        Settings::default()
    };

    Ok(ConfigResolver::new(settings, Some(translator)))
}

fn load_translations(path: Option<&Path>) -> Result<Arc<dyn Translator>> {
    let Some(path) = path else {
        return Ok(Arc::new(StaticTranslations::empty()));
    };

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read translations from {:?}", path))?;
    let table: HashMap<String, String> =
        serde_json::from_str(&content).context("Invalid translations JSON")?;
    info!(path = ?path, keys = table.len(), "Loaded translations");

    Ok(Arc::new(StaticTranslations::with_table(table)))
}

fn build_enhancer(config: Arc<ConfigResolver>, translator: Arc<dyn Translator>) -> Result<RecordEnhancer> {
    let api = Arc::new(ThirdIronClient::new(config.clone())?);
    let unpaywall = Arc::new(UnpaywallHttpClient::new(config.unpaywall_email())?);
    let waterfall = DisplayWaterfall::new(config, api, unpaywall);
    let labels = LinkLabels::resolve(&TranslationService::new(translator));

    Ok(RecordEnhancer::new(waterfall, labels, Arc::new(NoopHider)))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))
}

// ============================================================================
// Commands
// ============================================================================

async fn run_resolve(
    config: Arc<ConfigResolver>,
    translator: Arc<dyn Translator>,
    record_path: &Path,
    view_model_path: Option<&Path>,
    timeout: u64,
) -> Result<()> {
    let record: SearchEntity = read_json(record_path)?;
    let view_model: Option<PrimoViewModel> = view_model_path.map(read_json).transpose()?;

    let enhancer = build_enhancer(config, translator)?;
    let resolution =
        session::resolve_once(&enhancer, record, view_model, Duration::from_secs(timeout)).await?;

    println!("{}", serde_json::to_string_pretty(&resolution)?);
    Ok(())
}

fn show_config(config: &ConfigResolver) -> Result<()> {
    println!(
        "Mode: {}",
        if config.is_multicampus() { "multicampus" } else { "single-campus" }
    );
    if config.is_multicampus() {
        println!(
            "Institution: {}",
            config.institution_name().as_deref().unwrap_or("(unresolved)")
        );
    }
    println!(
        "API: {}",
        config.api_url().as_deref().unwrap_or("(libraryId not set)")
    );
    println!("API key: {}", if config.api_key().is_some() { "set" } else { "missing" });
    println!("View option: {:?}", config.view_option());
    println!();

    for (name, enabled) in config.flags() {
        println!("  {:<48} {}", name, if enabled { "on" } else { "off" });
    }
    Ok(())
}

// ============================================================================
// HTTP Server
// ============================================================================

async fn run_server(
    config: Arc<ConfigResolver>,
    translator: Arc<dyn Translator>,
    host: String,
    port: u16,
    timeout: u64,
) -> Result<()> {
    info!(host = %host, port = port, "Starting HTTP server");
    println!("Starting server at http://{}:{}", host, port);

    let app_state = Arc::new(AppState {
        enhancer: build_enhancer(config, translator)?,
        wait: Duration::from_secs(timeout),
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/resolve", post(resolve_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Invalid host:port")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}

struct AppState {
    enhancer: RecordEnhancer,
    wait: Duration,
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Resolve request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveRequest {
    record: SearchEntity,
    view_model: Option<PrimoViewModel>,
}

/// Resolve endpoint handler
async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResolveRequest>,
) -> std::result::Result<Json<Resolution>, (StatusCode, String)> {
    match session::resolve_once(&state.enhancer, req.record, req.view_model, state.wait).await {
        Ok(resolution) => Ok(Json(resolution)),
        Err(e) => {
            error!(error = %e, "Resolve failed");
            Err((StatusCode::BAD_REQUEST, e.to_string()))
        }
    }
}
