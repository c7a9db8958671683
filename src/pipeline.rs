// =============================================================================
// Analytical Pipeline — snapshot in, MarketState out
// =============================================================================
//
// One run is a pure function of (config, snapshot, as-of): fetches fan out
// per (exchange x timeframe), join before feature computation, then the run
// is serial through interpretation, bucket aggregation, the hierarchical
// decision, and assembly. Absorption Phase 2 resolves pending events before
// Phase 1 scans for new ones, so a fresh resolution pays into this cycle
// while a fresh detection only warns.
//
// Every fetch is clamped to `align_end_to_last_closed` and re-validated; a
// candle closing after the cutoff aborts the sample as a Lookahead bug.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::absorption::{AbsorptionEngine, AbsorptionStore, DetectionOutcome};
use crate::config::Config;
use crate::decision::{aggregate_bucket, decide, HierarchyContext};
use crate::divergence::{self, DivergenceAssessment};
use crate::errors::EngineError;
use crate::features::{self, FeatureSet};
use crate::market_data::{DataProvider, SeriesBundle};
use crate::regime::{self, FundingExtremity, RegimeAssessment, RegimeInputs, SlopeSign, StructureBreak, TrendDir};
use crate::signals::{interpret_timeframe, TimeframeVerdicts};
use crate::state::{assemble, AbsorptionSummary, AssemblyInput, MarketState};
use crate::time_align::{align_end_to_last_closed, validate_series};
use crate::types::{Bucket, Exchange, Timeframe};

/// The analytical pipeline with its injected collaborators. Stateless apart
/// from the absorption store, which deliberately persists across cycles.
pub struct Pipeline {
    provider: Arc<dyn DataProvider>,
    absorption: Arc<AbsorptionStore>,
}

impl Pipeline {
    pub fn new(provider: Arc<dyn DataProvider>, absorption: Arc<AbsorptionStore>) -> Self {
        Self {
            provider,
            absorption,
        }
    }

    pub fn absorption_store(&self) -> Arc<AbsorptionStore> {
        self.absorption.clone()
    }

    /// Run the full pipeline for `symbol` at `as_of_ms`.
    ///
    /// `strict` is the replay posture: a timeframe failing its data floor
    /// fails the sample instead of degrading. Lookahead always aborts.
    pub async fn run(
        &self,
        config: Arc<Config>,
        symbol: &str,
        primary_timeframe: Timeframe,
        as_of_ms: i64,
        strict: bool,
    ) -> Result<MarketState, EngineError> {
        let params = &config.params;
        let retail = params.divergence.retail_exchange;
        let whale = params.divergence.whale_exchange;

        // ── Fan-out: fetch every (exchange, timeframe) cell ──────────────
        let mut fetches = Vec::new();
        for exchange in [retail, whale] {
            for tf in Timeframe::ALL {
                fetches.push(self.fetch_bundle(exchange, symbol, tf, as_of_ms, config.clone()));
            }
        }
        let bundles = join_all(fetches).await;

        let mut extra_warnings: Vec<String> = Vec::new();
        let mut cells: BTreeMap<(Exchange, Timeframe), SeriesBundle> = BTreeMap::new();
        for result in bundles {
            match result {
                Ok(bundle) => {
                    cells.insert((bundle.exchange, bundle.timeframe), bundle);
                }
                Err(e @ EngineError::Lookahead(_)) => return Err(e),
                Err(e) if strict && !matches!(e, EngineError::Unreliable(_)) => return Err(e),
                Err(e) => {
                    warn!(symbol, error = %e, "cell fetch degraded");
                    extra_warnings.push(format!("data fetch degraded: {e}"));
                }
            }
        }

        // ── Features per cell ────────────────────────────────────────────
        let mut retail_features: BTreeMap<Timeframe, FeatureSet> = BTreeMap::new();
        let mut whale_features: BTreeMap<Timeframe, FeatureSet> = BTreeMap::new();
        for ((exchange, tf), bundle) in &cells {
            let thresholds = params.thresholds_for(*tf);
            match features::compute(
                bundle,
                &thresholds,
                params.gates.funding_z_extreme,
                params.data.min_candles,
            ) {
                Ok(fs) => {
                    if *exchange == retail {
                        retail_features.insert(*tf, fs);
                    } else {
                        whale_features.insert(*tf, fs);
                    }
                }
                Err(e) => {
                    if strict && *exchange == retail {
                        return Err(e);
                    }
                    warn!(symbol, exchange = %exchange, tf = %tf, error = %e, "feature computation degraded");
                    extra_warnings.push(format!("{exchange}/{tf}: {e}"));
                }
            }
        }

        if retail_features.is_empty() {
            if strict {
                return Err(EngineError::InsufficientData(format!(
                    "{symbol}: no timeframe produced features at {as_of_ms}"
                )));
            }
            extra_warnings
                .push("no market data available — state is WAIT by construction".to_string());
        }

        // ── Regime and divergence (computed once per run) ────────────────
        let regime_assessment = classify_regime(&retail_features, params);
        let divergence_assessment =
            analyze_divergence(&retail_features, &whale_features, primary_timeframe, params);

        // ── Absorption Phase 2 then Phase 1 ──────────────────────────────
        if let Err(e) = AbsorptionEngine::resolve_pending(
            &self.absorption,
            self.provider.as_ref(),
            retail,
            symbol,
            params,
            as_of_ms,
        )
        .await
        {
            if strict && !e.is_recoverable() {
                return Err(e);
            }
            warn!(symbol, error = %e, "absorption resolution pass degraded");
            extra_warnings.push(format!("absorption resolution degraded: {e}"));
        }

        for (tf, fs) in &retail_features {
            let thresholds = params.thresholds_for(*tf);
            if let Some(event) = AbsorptionEngine::detect(
                symbol,
                fs,
                &thresholds,
                &params.absorption,
                align_end_to_last_closed(*tf, as_of_ms),
            ) {
                match self.absorption.insert_detection(event) {
                    DetectionOutcome::Opened => {
                        extra_warnings.push(format!("absorption detection opened on {tf}"));
                    }
                    DetectionOutcome::InvalidatedPrior { prior_id } => {
                        extra_warnings.push(format!(
                            "absorption flipped direction on {tf} (invalidated {prior_id})"
                        ));
                    }
                    DetectionOutcome::DuplicateNoOp => {}
                }
            }
        }

        // ── Interpretation per timeframe ─────────────────────────────────
        let mut per_timeframe: BTreeMap<Timeframe, TimeframeVerdicts> = BTreeMap::new();
        let mut staleness_ms: BTreeMap<String, i64> = BTreeMap::new();
        for (tf, fs) in &retail_features {
            let tv = interpret_timeframe(
                fs,
                &regime_assessment,
                &divergence_assessment,
                params,
                as_of_ms,
            );
            staleness_ms.insert(
                tf.code().to_string(),
                (as_of_ms - (fs.last_data_ms + tf.interval_ms())).max(0),
            );
            per_timeframe.insert(*tf, tv);
        }

        // ── Buckets and hierarchy ────────────────────────────────────────
        let macro_bucket = aggregate_bucket(Bucket::Macro, &per_timeframe, params);
        let micro = aggregate_bucket(Bucket::Micro, &per_timeframe, params);
        let scalping = aggregate_bucket(Bucket::Scalping, &per_timeframe, params);

        let funding_extreme = retail_features.values().any(|fs| {
            fs.funding
                .as_ref()
                .map_or(false, |f| f.extremity != FundingExtremity::Neutral)
        });
        let gated_count: usize = per_timeframe.values().map(|tv| tv.gated_off).sum();
        let wait_share = {
            let mut directional = 0.0;
            let mut waiting = 0.0;
            for tv in per_timeframe.values() {
                directional += tv.long_score + tv.short_score;
                waiting += tv.wait_score;
            }
            let total = directional + waiting;
            if total > f64::EPSILON {
                waiting / total
            } else {
                1.0
            }
        };
        let ctx = HierarchyContext {
            funding_extreme,
            gated_count,
            wait_share,
        };

        let decision = decide(
            &macro_bucket,
            &micro,
            &scalping,
            &regime_assessment,
            &ctx,
            params,
        );

        // ── Absorption summary + assembly ────────────────────────────────
        let current_price = retail_features
            .get(&primary_timeframe)
            .or_else(|| retail_features.values().next())
            .map(|fs| fs.last_close)
            .unwrap_or(0.0);
        let absorption_summary = AbsorptionSummary::from_store(
            &self.absorption,
            symbol,
            current_price,
            &params.absorption,
            as_of_ms,
        );

        debug!(
            symbol,
            as_of_ms,
            bias = %decision.bias,
            regime = %regime_assessment.label,
            "pipeline run complete"
        );

        Ok(assemble(
            &config,
            AssemblyInput {
                symbol: symbol.to_string(),
                primary_timeframe,
                as_of_ms,
                last_price: current_price,
                decision,
                macro_bucket,
                micro,
                scalping,
                per_timeframe,
                regime: regime_assessment,
                divergence: divergence_assessment,
                absorption: absorption_summary,
                staleness_ms,
                extra_warnings,
            },
        ))
    }

    /// Fetch one (exchange, timeframe) cell, clamped to the last closed
    /// candle and validated against the cutoff.
    async fn fetch_bundle(
        &self,
        exchange: Exchange,
        symbol: &str,
        tf: Timeframe,
        as_of_ms: i64,
        config: Arc<Config>,
    ) -> Result<SeriesBundle, EngineError> {
        let end = align_end_to_last_closed(tf, as_of_ms);
        let limit = config.params.data.lookback_candles;

        let candles = self
            .provider
            .get_price_history(exchange, symbol, tf, limit, None, Some(end))
            .await?;
        let check = validate_series(&candles, tf, end)?;

        let oi = self
            .provider
            .get_oi_history(exchange, symbol, tf, limit, None, Some(end))
            .await
            .unwrap_or_default();
        let funding = self
            .provider
            .get_funding_history(exchange, symbol, tf, limit, None, Some(end))
            .await
            .unwrap_or_default();
        let taker = self
            .provider
            .get_taker_buy_sell_volume(exchange, symbol, tf, limit, None, Some(end))
            .await
            .unwrap_or_default();

        let last_data_ms = candles.last().map(|c| c.timestamp).unwrap_or(0);
        Ok(SeriesBundle {
            exchange,
            timeframe: tf,
            candles,
            oi,
            funding,
            taker,
            taker_resolution: tf.cvd_resolution().to_string(),
            partial: check.partial,
            last_data_ms,
        })
    }
}

/// Classify the regime from the highest-quality timeframe available
/// (H4 first, then D1, H1, M30).
fn classify_regime(
    retail_features: &BTreeMap<Timeframe, FeatureSet>,
    params: &crate::config::ConfigParams,
) -> RegimeAssessment {
    let preference = [Timeframe::H4, Timeframe::D1, Timeframe::H1, Timeframe::M30];
    let fs = match preference.iter().find_map(|tf| retail_features.get(tf)) {
        Some(fs) => fs,
        None => return RegimeAssessment::unclear(),
    };

    let inputs = RegimeInputs {
        price: fs
            .trend
            .as_ref()
            .map(|t| t.direction)
            .unwrap_or(TrendDir::Sideways),
        oi: fs
            .oi
            .as_ref()
            .map(|o| o.trend)
            .unwrap_or(regime::OiTrend::Flat),
        funding: fs
            .funding
            .as_ref()
            .map(|f| f.extremity)
            .unwrap_or(FundingExtremity::Neutral),
        cvd: fs
            .cvd
            .as_ref()
            .map(|c| c.direction)
            .unwrap_or(SlopeSign::Flat),
        structure: fs
            .structure
            .as_ref()
            .map(|s| s.bos)
            .unwrap_or(StructureBreak::None),
    };
    regime::classify(&params.regime_rules, &inputs)
}

/// Divergence on the primary timeframe, falling back to H4.
fn analyze_divergence(
    retail_features: &BTreeMap<Timeframe, FeatureSet>,
    whale_features: &BTreeMap<Timeframe, FeatureSet>,
    primary: Timeframe,
    params: &crate::config::ConfigParams,
) -> DivergenceAssessment {
    for tf in [primary, Timeframe::H4, Timeframe::H1] {
        if let (Some(r), Some(w)) = (retail_features.get(&tf), whale_features.get(&tf)) {
            return divergence::analyze(r, w, &params.divergence);
        }
    }
    DivergenceAssessment::unclear(0.0, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::market_data::demo::DemoProvider;
    use crate::types::Bias;

    fn pipeline() -> Pipeline {
        Pipeline::new(Arc::new(DemoProvider::new()), Arc::new(AbsorptionStore::new()))
    }

    const AS_OF: i64 = 1_765_810_020_000; // 2025-12-15T14:47:00Z

    #[tokio::test]
    async fn demo_run_produces_complete_state() {
        let store = ConfigStore::with_defaults();
        let state = pipeline()
            .run(store.active(), "BTCUSDT", Timeframe::H1, AS_OF, false)
            .await
            .unwrap();

        assert_eq!(state.symbol, "BTCUSDT");
        assert_eq!(state.config_version, "v1");
        assert_eq!(state.timestamp, AS_OF);
        assert_eq!(state.per_timeframe.len(), 4);
        // Effective weights sum to 1 on every timeframe.
        for tv in state.per_timeframe.values() {
            let sum: f64 = tv.effective_weights.values().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn replay_determinism_same_input_same_state() {
        let store = ConfigStore::with_defaults();
        let a = pipeline()
            .run(store.active(), "BTCUSDT", Timeframe::H1, AS_OF, true)
            .await
            .unwrap();
        let b = pipeline()
            .run(store.active(), "BTCUSDT", Timeframe::H1, AS_OF, true)
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[tokio::test]
    async fn no_candle_crosses_the_cutoff() {
        let store = ConfigStore::with_defaults();
        let state = pipeline()
            .run(store.active(), "BTCUSDT", Timeframe::H1, AS_OF, true)
            .await
            .unwrap();
        for (tf, _) in &state.per_timeframe {
            let end = align_end_to_last_closed(*tf, AS_OF);
            assert!(end <= AS_OF);
        }
    }

    #[tokio::test]
    async fn missing_data_yields_wait_not_a_fabricated_bias() {
        // An empty historical store: every fetch fails.
        let provider = Arc::new(crate::market_data::HistoricalStore::new());
        let p = Pipeline::new(provider, Arc::new(AbsorptionStore::new()));
        let store = ConfigStore::with_defaults();

        let state = p
            .run(store.active(), "BTCUSDT", Timeframe::H1, AS_OF, false)
            .await
            .unwrap();
        assert_eq!(state.final_block.bias, Bias::Wait);
        assert!(!state.final_block.warnings.is_empty());

        // Replay posture fails the sample instead.
        let err = p
            .run(store.active(), "BTCUSDT", Timeframe::H1, AS_OF, true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InsufficientData");
    }
}
