// =============================================================================
// Engine Settings — process-level configuration with atomic save
// =============================================================================
//
// Operational settings of the service (bind address, symbols, cadences) —
// distinct from the versioned analytical Config, which lives in the
// ConfigStore. All fields carry serde defaults so older JSON files keep
// loading after new fields are added. Persistence uses the tmp + rename
// pattern to prevent corruption on crash.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Timeframe;

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_primary_timeframe() -> Timeframe {
    Timeframe::H1
}

fn default_cache_ttl_secs() -> u64 {
    30
}

fn default_absorption_poll_secs() -> u64 {
    60
}

fn default_requests_per_minute() -> usize {
    80
}

/// Process-level settings for the Meridian service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Symbols the absorption resolution loop watches.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Symbol used when /analyze is called without one.
    #[serde(default = "default_symbol")]
    pub default_symbol: String,

    #[serde(default = "default_primary_timeframe")]
    pub primary_timeframe: Timeframe,

    /// Serve synthetic data regardless of the ?demo flag (offline mode).
    #[serde(default)]
    pub force_demo: bool,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Cadence of the background absorption resolution loop.
    #[serde(default = "default_absorption_poll_secs")]
    pub absorption_poll_secs: u64,

    /// Upstream request budget for the rolling-window rate limiter.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            symbols: default_symbols(),
            default_symbol: default_symbol(),
            primary_timeframe: default_primary_timeframe(),
            force_demo: false,
            cache_ttl_secs: default_cache_ttl_secs(),
            absorption_poll_secs: default_absorption_poll_secs(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

impl EngineSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings from {}", path.display()))?;
        info!(path = %path.display(), symbols = ?settings.symbols, "settings loaded");
        Ok(settings)
    }

    /// Apply MERIDIAN_* environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("MERIDIAN_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Ok(syms) = std::env::var("MERIDIAN_SYMBOLS") {
            let parsed: Vec<String> = syms
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                self.symbols = parsed;
            }
        }
        if let Ok(sym) = std::env::var("MERIDIAN_DEFAULT_SYMBOL") {
            self.default_symbol = sym.to_uppercase();
        }
        if std::env::var("MERIDIAN_FORCE_DEMO").map_or(false, |v| v == "1" || v == "true") {
            self.force_demo = true;
        }
    }

    /// Atomic write: tmp sibling then rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).context("failed to serialise settings")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp settings to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp settings to {}", path.display()))?;
        info!(path = %path.display(), "settings saved (atomic)");
        Ok(())
    }
}
