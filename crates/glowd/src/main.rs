use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use glowd::api;
use glowd::api::AppState;
use glowd::config::ConfigError;
use glowd::display::Display;
use glowd::weather::WeatherClient;
use glowd::Config;
use glowd::Engine;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(author, version, about = "Home lighting control service", long_about = None)]
struct Cli {
    /// Configuration file; may be given more than once
    #[arg(short, long = "config", default_value = "glowd.toml")]
    config: Vec<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, diagnostics) = match Config::from_files(&cli.config) {
        Ok(loaded) => loaded,
        Err(ConfigError::Invalid(diagnostics)) => {
            eprint!("{}", diagnostics);
            anyhow::bail!("configuration has {} problem(s)", diagnostics.len());
        }
        Err(e) => return Err(e.into()),
    };
    if !diagnostics.is_empty() {
        eprint!("{}", diagnostics);
    }
    if cli.check {
        println!(
            "Configuration OK: {} light(s), {} preset(s)",
            config.lights.len(),
            config.presets.len()
        );
        return Ok(());
    }

    let filter = Targets::new()
        .with_default(LevelFilter::from(config.logging.level))
        .with_targets(
            config
                .logging
                .overrides
                .iter()
                .map(|(target, level)| (target.clone(), LevelFilter::from(*level))),
        );
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    tracing::info!("glowd {} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Loaded config from: {}",
        cli.config
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let (engine, engine_task) = Engine::from_config(&config).spawn();
    let weather = WeatherClient::new(config.weather, config.location)
        .context("failed to build weather client")?;
    let display = Display::new(config.display.clone());
    let state = AppState::new(engine, weather, display);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received shutdown signal"),
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    api::serve(config.server.addr(), state, shutdown_rx)
        .await
        .context("HTTP server failed")?;

    // The router owned the last engine handle; the engine exits once it has
    // drained its queue
    engine_task.await.context("engine task panicked")?;
    tracing::info!("glowd shutdown complete");

    Ok(())
}
