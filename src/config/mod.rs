// =============================================================================
// Config — the immutable, versioned parameter set driving the pipeline
// =============================================================================
//
// Every tunable the pipeline reads lives in `ConfigParams`; a `Config` is a
// params snapshot plus version metadata. Readers receive an `Arc<Config>` at
// pipeline entry and never observe mid-run mutation. All maps are BTreeMaps
// so the canonical JSON serialisation is deterministic.

pub mod store;

pub use store::ConfigStore;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::regime::{default_regime_rules, RegimeRule};
use crate::types::{Bucket, Exchange, Timeframe};

/// Tolerance for weight-sum comparisons. Weights are floats; never compare
/// for equality.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// The signal families every config must carry weights for.
pub const REQUIRED_SIGNALS: [&str; 7] = [
    "exchange_divergence",
    "market_regime",
    "structure",
    "technical",
    "cvd",
    "vwap",
    "funding",
];

/// Optional signal families a config may add.
pub const OPTIONAL_SIGNALS: [&str; 2] = ["volume_profile", "oi"];

// =============================================================================
// Parameter blocks
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    /// Per-signal weights; must sum to 1.0 within tolerance.
    pub signals: BTreeMap<String, f64>,
    /// Per-timeframe weights used by bucket aggregation, keyed by tf code.
    pub timeframes: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvdParams {
    pub window_candles: usize,
    pub min_reliable_pct: f64,
    pub slope_window: usize,
}

impl Default for CvdParams {
    fn default() -> Self {
        Self {
            window_candles: 50,
            min_reliable_pct: 0.8,
            slope_window: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfThresholds {
    /// Price change below this (percent) is noise / "flat".
    pub noise_pct: f64,
    /// Price change above this (percent) is a strong move.
    pub strong_pct: f64,
    /// OI change below this (percent) is quiet.
    pub oi_quiet_pct: f64,
    /// OI change above this (percent) is aggressive positioning.
    pub oi_aggressive_pct: f64,
    pub cvd: CvdParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gates {
    pub macro_permission: f64,
    pub macro_anchor: f64,
    pub setup_veto: f64,
    pub staleness_multiplier: f64,
    pub funding_z_extreme: f64,
}

impl Default for Gates {
    fn default() -> Self {
        Self {
            macro_permission: 6.0,
            macro_anchor: 6.0,
            setup_veto: 6.0,
            staleness_multiplier: 2.0,
            funding_z_extreme: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Penalties {
    pub conflict_ratio: f64,
    pub conflict_penalty_factor: f64,
    pub alignment_bonus: f64,
    pub staleness_penalty_factor: f64,
}

impl Default for Penalties {
    fn default() -> Self {
        Self {
            conflict_ratio: 0.7,
            conflict_penalty_factor: 0.5,
            alignment_bonus: 1.0,
            staleness_penalty_factor: 0.2,
        }
    }
}

/// Maximum relative movement a single config update may apply per section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxDelta {
    pub weights: f64,
    pub thresholds: f64,
    pub gates: f64,
    pub penalties: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub max_delta: MaxDelta,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            max_delta: MaxDelta {
                weights: 0.25,
                thresholds: 0.15,
                gates: 0.10,
                penalties: 0.15,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceParams {
    /// Directional scenarios require at least this |OI delta| in percent.
    pub min_delta_pct: f64,
    /// Below this |OI delta| the analyzer always reports `unclear`.
    pub unclear_below_pct: f64,
    /// Venue whose flow is treated as retail-leaning.
    pub retail_exchange: Exchange,
    /// Venue whose flow is treated as whale-leaning.
    pub whale_exchange: Exchange,
}

impl Default for DivergenceParams {
    fn default() -> Self {
        Self {
            min_delta_pct: 1.0,
            unclear_below_pct: 0.5,
            retail_exchange: Exchange::Binance,
            whale_exchange: Exchange::Bybit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsorptionParams {
    /// "Near" a support/resistance level, in percent of price.
    pub near_level_pct: f64,
    /// Candles to wait before resolution, keyed by tf code.
    pub resolution_candles: BTreeMap<String, usize>,
    /// Confidence bonus a fresh resolution grants.
    pub confidence_bonus: f64,
    /// Bonus drops to 1.0 once price has already moved this far (percent).
    pub reduced_bonus_move_pct: f64,
}

impl Default for AbsorptionParams {
    fn default() -> Self {
        let mut resolution_candles = BTreeMap::new();
        resolution_candles.insert("30m".to_string(), 6);
        resolution_candles.insert("1h".to_string(), 4);
        resolution_candles.insert("4h".to_string(), 3);
        resolution_candles.insert("1d".to_string(), 2);
        Self {
            near_level_pct: 0.3,
            resolution_candles,
            confidence_bonus: 2.0,
            reduced_bonus_move_pct: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonRange {
    pub min_ms: i64,
    pub max_ms: i64,
    pub default_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeParams {
    /// Move (percent) separating CONTINUATION / REVERSAL from NOISE.
    pub move_threshold_pct: f64,
    /// Labeling horizons per bucket, keyed by bucket name.
    pub horizons: BTreeMap<String, HorizonRange>,
}

impl Default for OutcomeParams {
    fn default() -> Self {
        let minute = 60_000i64;
        let hour = 60 * minute;
        let day = 24 * hour;
        let mut horizons = BTreeMap::new();
        horizons.insert(
            Bucket::Scalping.to_string(),
            HorizonRange {
                min_ms: 10 * minute,
                max_ms: 60 * minute,
                default_ms: 30 * minute,
            },
        );
        horizons.insert(
            Bucket::Micro.to_string(),
            HorizonRange {
                min_ms: 2 * hour,
                max_ms: 8 * hour,
                default_ms: 4 * hour,
            },
        );
        horizons.insert(
            Bucket::Macro.to_string(),
            HorizonRange {
                min_ms: day,
                max_ms: 5 * day,
                default_ms: 2 * day,
            },
        );
        Self {
            move_threshold_pct: 0.5,
            horizons,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataParams {
    /// Candles fetched per (exchange, timeframe) cell.
    pub lookback_candles: usize,
    /// Hard floor below which a timeframe is InsufficientData.
    pub min_candles: usize,
}

impl Default for DataParams {
    fn default() -> Self {
        Self {
            lookback_candles: 150,
            min_candles: 60,
        }
    }
}

// =============================================================================
// ConfigParams and Config
// =============================================================================

/// Every tunable the pipeline reads. Two configs with equal params produce
/// bit-identical pipeline output for the same snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigParams {
    pub weights: Weights,
    /// Per-timeframe thresholds, keyed by tf code; all four must be present.
    pub thresholds: BTreeMap<String, TfThresholds>,
    pub gates: Gates,
    pub penalties: Penalties,
    pub bounds: Bounds,
    pub divergence: DivergenceParams,
    pub absorption: AbsorptionParams,
    pub outcome: OutcomeParams,
    pub data: DataParams,
    pub regime_rules: Vec<RegimeRule>,
}

impl Default for ConfigParams {
    fn default() -> Self {
        let mut signals = BTreeMap::new();
        signals.insert("exchange_divergence".to_string(), 0.15);
        signals.insert("market_regime".to_string(), 0.15);
        signals.insert("structure".to_string(), 0.15);
        signals.insert("technical".to_string(), 0.20);
        signals.insert("cvd".to_string(), 0.15);
        signals.insert("vwap".to_string(), 0.10);
        signals.insert("funding".to_string(), 0.10);

        let mut timeframes = BTreeMap::new();
        timeframes.insert("30m".to_string(), 0.15);
        timeframes.insert("1h".to_string(), 0.25);
        timeframes.insert("4h".to_string(), 0.35);
        timeframes.insert("1d".to_string(), 0.25);

        let mut thresholds = BTreeMap::new();
        thresholds.insert(
            "30m".to_string(),
            TfThresholds {
                noise_pct: 0.15,
                strong_pct: 0.8,
                oi_quiet_pct: 0.5,
                oi_aggressive_pct: 2.0,
                cvd: CvdParams::default(),
            },
        );
        thresholds.insert(
            "1h".to_string(),
            TfThresholds {
                noise_pct: 0.25,
                strong_pct: 1.2,
                oi_quiet_pct: 0.8,
                oi_aggressive_pct: 3.0,
                cvd: CvdParams::default(),
            },
        );
        thresholds.insert(
            "4h".to_string(),
            TfThresholds {
                noise_pct: 0.5,
                strong_pct: 2.5,
                oi_quiet_pct: 1.5,
                oi_aggressive_pct: 5.0,
                cvd: CvdParams::default(),
            },
        );
        thresholds.insert(
            "1d".to_string(),
            TfThresholds {
                noise_pct: 1.0,
                strong_pct: 4.0,
                oi_quiet_pct: 2.5,
                oi_aggressive_pct: 8.0,
                cvd: CvdParams::default(),
            },
        );

        Self {
            weights: Weights {
                signals,
                timeframes,
            },
            thresholds,
            gates: Gates::default(),
            penalties: Penalties::default(),
            bounds: Bounds::default(),
            divergence: DivergenceParams::default(),
            absorption: AbsorptionParams::default(),
            outcome: OutcomeParams::default(),
            data: DataParams::default(),
            regime_rules: default_regime_rules(),
        }
    }
}

impl ConfigParams {
    /// Thresholds for `tf`. Validation guarantees all four timeframes are
    /// present; the fallback only exists so a hand-built test config cannot
    /// panic the pipeline.
    pub fn thresholds_for(&self, tf: Timeframe) -> TfThresholds {
        self.thresholds
            .get(tf.code())
            .cloned()
            .unwrap_or(TfThresholds {
                noise_pct: 0.25,
                strong_pct: 1.2,
                oi_quiet_pct: 0.8,
                oi_aggressive_pct: 3.0,
                cvd: CvdParams::default(),
            })
    }

    pub fn timeframe_weight(&self, tf: Timeframe) -> f64 {
        self.weights
            .timeframes
            .get(tf.code())
            .copied()
            .unwrap_or(0.25)
    }

    pub fn resolution_candles(&self, tf: Timeframe) -> usize {
        self.absorption
            .resolution_candles
            .get(tf.code())
            .copied()
            .unwrap_or(4)
    }

    pub fn horizon_for(&self, bucket: Bucket) -> HorizonRange {
        self.outcome
            .horizons
            .get(&bucket.to_string())
            .cloned()
            .unwrap_or(HorizonRange {
                min_ms: 2 * 3_600_000,
                max_ms: 8 * 3_600_000,
                default_ms: 4 * 3_600_000,
            })
    }

    // -------------------------------------------------------------------------
    // Structural validation
    // -------------------------------------------------------------------------

    /// Validate rules that hold for any config, independent of the currently
    /// active one.
    pub fn validate_structure(&self) -> Result<(), EngineError> {
        let sum: f64 = self.weights.signals.values().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(EngineError::ValidationFailure(format!(
                "signal weights sum to {sum:.8}, expected 1.0 ± {WEIGHT_SUM_TOLERANCE:e}"
            )));
        }
        for (name, w) in &self.weights.signals {
            if !(0.0..=1.0).contains(w) {
                return Err(EngineError::ValidationFailure(format!(
                    "signal weight {name}={w} outside [0, 1]"
                )));
            }
        }
        for required in REQUIRED_SIGNALS {
            if !self.weights.signals.contains_key(required) {
                return Err(EngineError::ValidationFailure(format!(
                    "missing required signal weight: {required}"
                )));
            }
        }
        for (name, _) in &self.weights.signals {
            let known = REQUIRED_SIGNALS.contains(&name.as_str())
                || OPTIONAL_SIGNALS.contains(&name.as_str());
            if !known {
                return Err(EngineError::ValidationFailure(format!(
                    "unknown signal in weights: {name}"
                )));
            }
        }

        for tf in Timeframe::ALL {
            let th = self.thresholds.get(tf.code()).ok_or_else(|| {
                EngineError::ValidationFailure(format!("missing thresholds for {tf}"))
            })?;
            if th.noise_pct <= 0.0 || th.strong_pct <= th.noise_pct {
                return Err(EngineError::ValidationFailure(format!(
                    "{tf}: require 0 < noise_pct < strong_pct"
                )));
            }
            if th.cvd.window_candles == 0 || th.cvd.slope_window == 0 {
                return Err(EngineError::ValidationFailure(format!(
                    "{tf}: cvd windows must be positive"
                )));
            }
            if !(0.0..=1.0).contains(&th.cvd.min_reliable_pct) || th.cvd.min_reliable_pct == 0.0 {
                return Err(EngineError::ValidationFailure(format!(
                    "{tf}: cvd.min_reliable_pct must be in (0, 1]"
                )));
            }
            if !self.weights.timeframes.contains_key(tf.code()) {
                return Err(EngineError::ValidationFailure(format!(
                    "missing timeframe weight for {tf}"
                )));
            }
        }

        if !(0.0..1.0).contains(&self.penalties.conflict_ratio) {
            return Err(EngineError::ValidationFailure(
                "penalties.conflict_ratio must be in [0, 1)".to_string(),
            ));
        }
        if self.gates.macro_permission < 0.0 || self.gates.macro_permission > 10.0 {
            return Err(EngineError::ValidationFailure(
                "gates.macro_permission must be in [0, 10]".to_string(),
            ));
        }
        if self.divergence.retail_exchange == self.divergence.whale_exchange {
            return Err(EngineError::ValidationFailure(
                "divergence: retail and whale exchanges must differ".to_string(),
            ));
        }
        if self.regime_rules.is_empty() {
            return Err(EngineError::ValidationFailure(
                "regime_rules must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Bounded-delta validation
    // -------------------------------------------------------------------------

    /// Validate that this proposal does not move any tunable further from
    /// `current` than the active bounds allow. Weight deltas are absolute
    /// (weights live in [0, 1]); thresholds, gates, and penalties are
    /// compared relatively.
    pub fn validate_delta(&self, current: &ConfigParams) -> Result<(), EngineError> {
        let limits = &current.bounds.max_delta;

        for (name, new_w) in &self.weights.signals {
            let old_w = current.weights.signals.get(name).copied().unwrap_or(0.0);
            if (new_w - old_w).abs() > limits.weights + WEIGHT_SUM_TOLERANCE {
                return Err(EngineError::ValidationFailure(format!(
                    "weights.signals.{name}: delta {:.4} exceeds max {:.4}",
                    (new_w - old_w).abs(),
                    limits.weights
                )));
            }
        }
        for (code, new_w) in &self.weights.timeframes {
            let old_w = current.weights.timeframes.get(code).copied().unwrap_or(0.0);
            if (new_w - old_w).abs() > limits.weights + WEIGHT_SUM_TOLERANCE {
                return Err(EngineError::ValidationFailure(format!(
                    "weights.timeframes.{code}: delta {:.4} exceeds max {:.4}",
                    (new_w - old_w).abs(),
                    limits.weights
                )));
            }
        }

        for tf in Timeframe::ALL {
            let (new_t, old_t) = match (
                self.thresholds.get(tf.code()),
                current.thresholds.get(tf.code()),
            ) {
                (Some(n), Some(o)) => (n, o),
                _ => continue,
            };
            let pairs = [
                ("noise_pct", new_t.noise_pct, old_t.noise_pct),
                ("strong_pct", new_t.strong_pct, old_t.strong_pct),
                ("oi_quiet_pct", new_t.oi_quiet_pct, old_t.oi_quiet_pct),
                (
                    "oi_aggressive_pct",
                    new_t.oi_aggressive_pct,
                    old_t.oi_aggressive_pct,
                ),
            ];
            for (field, new_v, old_v) in pairs {
                check_relative_delta(
                    &format!("thresholds.{}.{field}", tf.code()),
                    new_v,
                    old_v,
                    limits.thresholds,
                )?;
            }
        }

        let gate_pairs = [
            (
                "gates.macro_permission",
                self.gates.macro_permission,
                current.gates.macro_permission,
            ),
            (
                "gates.macro_anchor",
                self.gates.macro_anchor,
                current.gates.macro_anchor,
            ),
            (
                "gates.setup_veto",
                self.gates.setup_veto,
                current.gates.setup_veto,
            ),
            (
                "gates.staleness_multiplier",
                self.gates.staleness_multiplier,
                current.gates.staleness_multiplier,
            ),
            (
                "gates.funding_z_extreme",
                self.gates.funding_z_extreme,
                current.gates.funding_z_extreme,
            ),
        ];
        for (field, new_v, old_v) in gate_pairs {
            check_relative_delta(field, new_v, old_v, limits.gates)?;
        }

        let penalty_pairs = [
            (
                "penalties.conflict_ratio",
                self.penalties.conflict_ratio,
                current.penalties.conflict_ratio,
            ),
            (
                "penalties.conflict_penalty_factor",
                self.penalties.conflict_penalty_factor,
                current.penalties.conflict_penalty_factor,
            ),
            (
                "penalties.alignment_bonus",
                self.penalties.alignment_bonus,
                current.penalties.alignment_bonus,
            ),
            (
                "penalties.staleness_penalty_factor",
                self.penalties.staleness_penalty_factor,
                current.penalties.staleness_penalty_factor,
            ),
        ];
        for (field, new_v, old_v) in penalty_pairs {
            check_relative_delta(field, new_v, old_v, limits.penalties)?;
        }

        Ok(())
    }
}

fn check_relative_delta(field: &str, new_v: f64, old_v: f64, limit: f64) -> Result<(), EngineError> {
    let base = old_v.abs().max(1e-9);
    let rel = (new_v - old_v).abs() / base;
    if rel > limit + WEIGHT_SUM_TOLERANCE {
        return Err(EngineError::ValidationFailure(format!(
            "{field}: relative delta {rel:.4} exceeds max {limit:.4}"
        )));
    }
    Ok(())
}

/// A params snapshot plus version metadata. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub params: ConfigParams,
    pub created_at: i64,
    pub created_by: String,
    pub notes: String,
}

impl Config {
    /// Deterministic serialisation used for storage, export, and checksums.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("config serialisation cannot fail")
    }

    /// Content fingerprint of the params block only (metadata excluded).
    pub fn params_checksum(&self) -> String {
        use sha2::{Digest, Sha256};
        let json = serde_json::to_string(&self.params).expect("params serialisation cannot fail");
        let digest = Sha256::digest(json.as_bytes());
        hex::encode(&digest[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_structurally_valid() {
        let params = ConfigParams::default();
        params.validate_structure().unwrap();
        let sum: f64 = params.weights.signals.values().sum();
        assert!((sum - 1.0).abs() < WEIGHT_SUM_TOLERANCE);
    }

    #[test]
    fn weight_sum_violation_rejected() {
        let mut params = ConfigParams::default();
        params.weights.signals.insert("cvd".to_string(), 0.5);
        let err = params.validate_structure().unwrap_err();
        assert_eq!(err.kind(), "ValidationFailure");
    }

    #[test]
    fn missing_timeframe_thresholds_rejected() {
        let mut params = ConfigParams::default();
        params.thresholds.remove("4h");
        assert!(params.validate_structure().is_err());
    }

    #[test]
    fn unknown_signal_rejected() {
        let mut params = ConfigParams::default();
        // Shift weight so the sum still holds, then add an unknown name.
        params.weights.signals.insert("funding".to_string(), 0.05);
        params.weights.signals.insert("astrology".to_string(), 0.05);
        assert!(params.validate_structure().is_err());
    }

    #[test]
    fn bounded_delta_weights_absolute() {
        let current = ConfigParams::default();
        let mut proposed = current.clone();
        // 0.20 -> 0.40 is a 0.20 absolute move; allowed under 0.25.
        proposed.weights.signals.insert("technical".to_string(), 0.40);
        proposed.validate_delta(&current).unwrap();

        // 0.20 -> 0.50 exceeds the 0.25 absolute cap.
        proposed.weights.signals.insert("technical".to_string(), 0.50);
        assert!(proposed.validate_delta(&current).is_err());
    }

    #[test]
    fn bounded_delta_gates_relative() {
        let current = ConfigParams::default();
        let mut proposed = current.clone();
        // 6.0 -> 6.5 is ~8.3% relative; allowed under 10%.
        proposed.gates.macro_permission = 6.5;
        proposed.validate_delta(&current).unwrap();

        // 6.0 -> 7.0 is ~16.7%; rejected.
        proposed.gates.macro_permission = 7.0;
        assert!(proposed.validate_delta(&current).is_err());
    }

    #[test]
    fn checksum_tracks_params_not_metadata() {
        let a = Config {
            version: "v1".to_string(),
            params: ConfigParams::default(),
            created_at: 1,
            created_by: "a".to_string(),
            notes: String::new(),
        };
        let b = Config {
            version: "v2".to_string(),
            params: ConfigParams::default(),
            created_at: 2,
            created_by: "b".to_string(),
            notes: "different".to_string(),
        };
        assert_eq!(a.params_checksum(), b.params_checksum());
    }

    #[test]
    fn horizon_defaults_cover_all_buckets() {
        let params = ConfigParams::default();
        for bucket in Bucket::ALL {
            let h = params.horizon_for(bucket);
            assert!(h.min_ms < h.max_ms);
            assert!(h.default_ms >= h.min_ms && h.default_ms <= h.max_ms);
        }
    }
}
