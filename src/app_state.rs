// =============================================================================
// Central Application State — Meridian Intelligence Engine
// =============================================================================
//
// Ties the subsystems together for the API layer: the config store, the live
// and demo pipelines, the replay orchestrator, and the market-state cache.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for mutable shared collections.
//   - Arc wrappers for subsystems with their own interior mutability.
//   - No lock is ever held across an await.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::absorption::AbsorptionStore;
use crate::config::ConfigStore;
use crate::errors::EngineError;
use crate::market_data::demo::DemoProvider;
use crate::market_data::live::LiveProvider;
use crate::market_data::{DataProvider, RateLimiter, TtlCache};
use crate::pipeline::Pipeline;
use crate::replay::{ReplayOrchestrator, ReplayStore};
use crate::settings::EngineSettings;
use crate::state::MarketState;

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

/// On-disk location of the active analytical config.
pub const CONFIG_PATH: &str = "meridian_config.json";

/// A recorded error event for the diagnostics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub kind: Option<String>,
    pub at: String,
}

/// Central application state shared across all tasks via `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter, bumped on every meaningful
    /// mutation.
    pub state_version: AtomicU64,

    pub settings: RwLock<EngineSettings>,
    pub config_store: Arc<ConfigStore>,

    /// Live data path.
    pub provider: Arc<dyn DataProvider>,
    pub pipeline: Arc<Pipeline>,

    /// Synthetic data path for ?demo=true, with its own absorption store so
    /// demo cycles never pollute live events.
    pub demo_pipeline: Arc<Pipeline>,

    pub replay: Arc<ReplayOrchestrator>,

    /// Assembled market states keyed by (symbol, config version, demo flag).
    pub cache: Arc<TtlCache>,

    pub recent_errors: RwLock<Vec<ErrorRecord>>,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire up every subsystem from settings with a default config store.
    pub fn new(settings: EngineSettings) -> Arc<Self> {
        Self::with_config_store(settings, Arc::new(ConfigStore::with_defaults()))
    }

    /// Wire up every subsystem around an existing config store (main loads
    /// the persisted one from disk).
    pub fn with_config_store(settings: EngineSettings, config_store: Arc<ConfigStore>) -> Arc<Self> {
        let limiter = Arc::new(RateLimiter::new(settings.requests_per_minute, 100));
        let provider: Arc<dyn DataProvider> = if settings.force_demo {
            Arc::new(DemoProvider::new())
        } else {
            Arc::new(LiveProvider::new(limiter))
        };

        let pipeline = Arc::new(Pipeline::new(provider.clone(), Arc::new(AbsorptionStore::new())));
        let demo_provider: Arc<dyn DataProvider> = Arc::new(DemoProvider::new());
        let demo_pipeline = Arc::new(Pipeline::new(
            demo_provider,
            Arc::new(AbsorptionStore::new()),
        ));

        // Replay gets its own pipeline (and absorption store) so historical
        // runs never contaminate live absorption events.
        let replay_pipeline = Arc::new(Pipeline::new(
            provider.clone(),
            Arc::new(AbsorptionStore::new()),
        ));
        let replay = ReplayOrchestrator::new(
            replay_pipeline,
            config_store.clone(),
            Arc::new(ReplayStore::new()),
            provider.clone(),
        );

        let cache = Arc::new(TtlCache::new(Duration::from_secs(settings.cache_ttl_secs)));

        Arc::new(Self {
            state_version: AtomicU64::new(1),
            settings: RwLock::new(settings),
            config_store,
            provider,
            pipeline,
            demo_pipeline,
            replay,
            cache,
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        })
    }

    // ── Version management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error log ───────────────────────────────────────────────────────

    pub fn push_error(&self, message: String, kind: Option<String>) {
        let mut errors = self.recent_errors.write();
        errors.push(ErrorRecord {
            message,
            kind,
            at: Utc::now().to_rfc3339(),
        });
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        self.increment_version();
    }

    // ── Analysis entry point ────────────────────────────────────────────

    /// Produce (or serve from cache) the market state for `symbol` at "now".
    pub async fn analyze(
        &self,
        symbol: &str,
        demo: bool,
        refresh: bool,
    ) -> Result<MarketState, EngineError> {
        let config = self.config_store.active();
        let (primary_tf, force_demo) = {
            let settings = self.settings.read();
            (settings.primary_timeframe, settings.force_demo)
        };
        let use_demo = demo || force_demo;

        let cache_key = format!("{symbol}:{}:{}", config.version, use_demo);
        if !refresh {
            if let Some(cached) = self.cache.get(&cache_key) {
                if let Ok(state) = serde_json::from_value::<MarketState>(cached) {
                    debug!(symbol, "analysis served from cache");
                    return Ok(state);
                }
            }
        }

        let pipeline = if use_demo {
            &self.demo_pipeline
        } else {
            &self.pipeline
        };
        let as_of = Utc::now().timestamp_millis();
        let result = pipeline
            .run(config, symbol, primary_tf, as_of, false)
            .await;

        match &result {
            Ok(state) => {
                if let Ok(value) = serde_json::to_value(state) {
                    self.cache.put(cache_key, value);
                }
                self.increment_version();
            }
            Err(e) => {
                warn!(symbol, error = %e, "analysis failed");
                self.push_error(e.to_string(), Some(e.kind().to_string()));
            }
        }
        result
    }
}
