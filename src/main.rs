//! Railclaw Payment Service
//!
//! A policy-gated crypto payment orchestration service. Businesses declare
//! which chains, tokens, and amounts they accept; the service turns payment
//! commands into either direct EVM payment requests or Solana-to-EVM
//! bridged payments, then monitors the chain until funds settle and
//! reports the outcome.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use railclaw::api;
use railclaw::config::Config;
use railclaw::monitor::MonitorRegistry;
use railclaw::orchestrator::Orchestrator;
use railclaw::store::PaymentStore;

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

/// Main application entry point that initializes and runs the payment
/// service.
///
/// This function:
/// 1. Initializes logging and tracing
/// 2. Loads configuration from the TOML file
/// 3. Opens the record store and resumes interrupted monitors
/// 4. Starts the API server
/// 5. Runs the service until shutdown
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging for debugging and monitoring
    tracing_subscriber::fmt::init();

    info!("Starting Railclaw Payment Service");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("Railclaw Payment Service");
        println!();
        println!("Usage: railclaw [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --config <path>   Use custom config file path");
        println!("  --help, -h        Show this help message");
        println!();
        println!("Environment variables:");
        println!("  RAILCLAW_CONFIG_PATH    Path to config file (overrides --config)");
        return Ok(());
    }

    // Check for custom config path
    let mut config_path = None;
    for (i, arg) in args.iter().enumerate() {
        if arg == "--config" && i + 1 < args.len() {
            config_path = Some(args[i + 1].clone());
            break;
        }
    }
    if let Some(path) = config_path {
        std::env::set_var("RAILCLAW_CONFIG_PATH", &path);
        info!("Using custom config: {}", path);
    }

    // Load configuration from config file (or RAILCLAW_CONFIG_PATH env var)
    let config = Arc::new(Config::load()?);
    info!("Configuration loaded successfully");

    // Open the record store
    let store = PaymentStore::new(&config.data_dir)?;
    info!("Record store opened at {}", config.data_dir.display());

    // Resume monitors interrupted by the last shutdown
    let registry = MonitorRegistry::new();
    registry.resume_interrupted(config.clone(), store.clone());

    // Start the REST API server
    let orchestrator = Orchestrator::new(config.clone(), store.clone(), registry);
    let api_server = api::ApiServer::new(config, orchestrator, store);

    // Run the service (this blocks until shutdown)
    api_server.run().await?;

    Ok(())
}
