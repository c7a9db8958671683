// =============================================================================
// Meridian Market Intelligence Engine — Main Entry Point
// =============================================================================
//
// Long-running service: REST API for on-demand analysis, config management,
// and historical replay, plus a background loop that resolves pending
// absorption events on the watched symbols.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod absorption;
mod api;
mod app_state;
mod config;
mod decision;
mod divergence;
mod errors;
mod features;
mod market_data;
mod pipeline;
mod regime;
mod replay;
mod settings;
mod signals;
mod state;
mod time_align;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::absorption::AbsorptionEngine;
use crate::app_state::AppState;
use crate::settings::EngineSettings;

const SETTINGS_PATH: &str = "meridian_settings.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & settings ────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Meridian Market Intelligence — Starting Up        ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut settings = EngineSettings::load(SETTINGS_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load settings, using defaults");
        EngineSettings::default()
    });
    settings.apply_env();

    info!(
        symbols = ?settings.symbols,
        bind_addr = %settings.bind_addr,
        force_demo = settings.force_demo,
        "Engine configured"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let config_store = Arc::new(
        config::ConfigStore::load_from_file(app_state::CONFIG_PATH).unwrap_or_else(|e| {
            warn!(error = %e, "No saved config — starting from defaults");
            config::ConfigStore::with_defaults()
        }),
    );
    let state = AppState::with_config_store(settings, config_store);

    // ── 3. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = state.settings.read().bind_addr.clone();
    tokio::spawn(async move {
        let app = api::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    // ── 4. Absorption resolution loop ────────────────────────────────────
    // Phase 2 must run every cycle even when nobody calls /analyze, so
    // pending events resolve (or expire) on time.
    let loop_state = state.clone();
    tokio::spawn(async move {
        let poll_secs = loop_state.settings.read().absorption_poll_secs.max(5);
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(poll_secs));
        loop {
            interval.tick().await;

            let (symbols, retail) = {
                let settings = loop_state.settings.read();
                (
                    settings.symbols.clone(),
                    loop_state
                        .config_store
                        .active()
                        .params
                        .divergence
                        .retail_exchange,
                )
            };
            let config = loop_state.config_store.active();
            let store = loop_state.pipeline.absorption_store();
            let now = chrono::Utc::now().timestamp_millis();

            for symbol in &symbols {
                match AbsorptionEngine::resolve_pending(
                    &store,
                    loop_state.provider.as_ref(),
                    retail,
                    symbol,
                    &config.params,
                    now,
                )
                .await
                {
                    Ok(resolved) if !resolved.is_empty() => {
                        info!(
                            symbol = %symbol,
                            count = resolved.len(),
                            "absorption events resolved by background loop"
                        );
                        loop_state.increment_version();
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(symbol = %symbol, error = %e, "absorption resolution loop error");
                        loop_state.push_error(e.to_string(), Some(e.kind().to_string()));
                    }
                }
            }
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    if let Err(e) = state.settings.read().save(SETTINGS_PATH) {
        error!(error = %e, "Failed to save settings on shutdown");
    }
    if let Err(e) = state.config_store.save_active(app_state::CONFIG_PATH) {
        error!(error = %e, "Failed to save active config on shutdown");
    }

    info!("Meridian shut down complete.");
    Ok(())
}
