// =============================================================================
// Absorption Engine — Phase-1 detection and Phase-2 resolution
// =============================================================================
//
// Phase 1 (every cycle): strong CVD + flat-or-opposite price response +
// location against strict S/R opens a DETECTING event. The cycle that opens
// an event only gets a warning; bias and confidence stay untouched.
//
// Phase 2 (every cycle, per unresolved event): after N[tf] candles the
// price/OI window since detection is scored against three TRAP criteria and
// three build (ACCUMULATION/DISTRIBUTION) criteria. Two of three resolve;
// TRAP wins ties; build resolutions additionally require the correct
// location. A gappy window earns one extension of ceil(N/2) candles, then
// expires. Unresolved events past twice the window expire.

use tracing::{debug, info};

use crate::absorption::{
    AbsorptionEvent, AbsorptionLocation, AbsorptionStore, CvdDirection, PriceResponse,
    Resolution, ResolutionCriteria,
};
use crate::config::{AbsorptionParams, ConfigParams, TfThresholds};
use crate::errors::EngineError;
use crate::features::FeatureSet;
use crate::market_data::{Candle, DataProvider, OiPoint};
use crate::time_align::align_end_to_last_closed;
use crate::types::Exchange;

/// Fraction of expected candles that may be missing before the gap handling
/// kicks in.
const MAX_GAP_FRACTION: f64 = 0.20;

/// Outcome of one Phase-2 evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionStep {
    /// Not enough candles since detection yet.
    NotYet,
    /// Data gap: consume the single extension and keep waiting.
    Extend,
    /// Terminal without a verdict.
    Expire(String),
    Resolve {
        resolution: Resolution,
        reason: String,
        criteria: ResolutionCriteria,
    },
}

/// Stateless engine; all persistence lives in [`AbsorptionStore`].
pub struct AbsorptionEngine;

impl AbsorptionEngine {
    // -------------------------------------------------------------------------
    // Phase 1 — detection
    // -------------------------------------------------------------------------

    /// Build a detection candidate from one timeframe's features, if all
    /// three conditions hold. The caller inserts it into the store (which
    /// enforces the unique-open constraint).
    pub fn detect(
        symbol: &str,
        features: &FeatureSet,
        thresholds: &TfThresholds,
        params: &AbsorptionParams,
        as_of_ms: i64,
    ) -> Option<AbsorptionEvent> {
        let cvd = features.cvd.as_ref()?;
        if !cvd.strong {
            return None;
        }
        let direction = if cvd.slope > 0.0 {
            CvdDirection::Buying
        } else {
            CvdDirection::Selling
        };

        // Price must be flat or pushing against the flow.
        let price_change = features.price_change_pct;
        let price_response = if price_change.abs() < thresholds.noise_pct {
            PriceResponse::Flat
        } else if price_change * cvd.slope < 0.0 {
            PriceResponse::Opposite
        } else {
            return None;
        };

        // Strict S/R: resistance = last swing high, support = last swing low.
        let structure = features.structure.as_ref()?;
        let price = features.last_close;
        let near = |level: f64| -> bool {
            level > 0.0 && ((price - level).abs() / level * 100.0) <= params.near_level_pct
        };
        let (location, sr_level_used) = match (structure.resistance, structure.support) {
            (Some(r), _) if near(r) => (AbsorptionLocation::NearResistance, Some(r)),
            (_, Some(s)) if near(s) => (AbsorptionLocation::NearSupport, Some(s)),
            _ => (AbsorptionLocation::MidRange, None),
        };
        let opposite_level = match direction {
            CvdDirection::Buying => structure.support,
            CvdDirection::Selling => structure.resistance,
        };

        let (oi_at_detection, oi_behavior) = match &features.oi {
            Some(oi) => (oi.last, format!("{:?} ({:+.2}%)", oi.trend, oi.change_pct)),
            None => (0.0, "unavailable".to_string()),
        };

        debug!(
            symbol,
            tf = %features.timeframe,
            direction = %direction,
            ?location,
            slope = format!("{:.4}", cvd.slope),
            floor = format!("{:.4}", cvd.noise_floor),
            "absorption detection conditions met"
        );

        Some(AbsorptionEvent {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            timeframe: features.timeframe,
            detected_at: as_of_ms,
            cvd_direction: direction,
            cvd_strength: cvd.slope.abs(),
            cvd_noise_floor: cvd.noise_floor,
            oi_at_detection,
            oi_behavior,
            price_response,
            price_at_detection: price,
            location,
            sr_level_used,
            opposite_level,
            resolved_at: None,
            resolution: None,
            resolution_reason: None,
            resolution_criteria: None,
            extensions_used: 0,
        })
    }

    // -------------------------------------------------------------------------
    // Phase 2 — resolution
    // -------------------------------------------------------------------------

    /// Score one unresolved event against the window since its detection.
    ///
    /// `candles` / `oi` cover `(detected_at, as_of]`, oldest first.
    pub fn evaluate(
        event: &AbsorptionEvent,
        candles: &[Candle],
        oi: &[OiPoint],
        thresholds: &TfThresholds,
        params: &AbsorptionParams,
        as_of_ms: i64,
    ) -> ResolutionStep {
        let tf = event.timeframe;
        let interval = tf.interval_ms();
        let n_required = params
            .resolution_candles
            .get(tf.code())
            .copied()
            .unwrap_or(4);
        let extension = n_required.div_ceil(2);

        let elapsed = ((as_of_ms - event.detected_at) / interval).max(0) as usize;
        let deadline = n_required + event.extensions_used as usize * extension;
        if elapsed < deadline {
            return ResolutionStep::NotYet;
        }

        // Data-gap handling: one extension, then expiry.
        let have = candles.len();
        if elapsed > 0 && (have as f64) < (1.0 - MAX_GAP_FRACTION) * elapsed as f64 {
            if event.extensions_used == 0 {
                return ResolutionStep::Extend;
            }
            return ResolutionStep::Expire(format!(
                "data gap persisted after extension ({have}/{elapsed} candles)"
            ));
        }
        if have < 2 {
            return ResolutionStep::Expire(format!("only {have} candles since detection"));
        }

        let last_close = candles.last().expect("have >= 2").close;
        let dir_sign = match event.cvd_direction {
            CvdDirection::Buying => 1.0,
            CvdDirection::Selling => -1.0,
        };
        let price_moved_against = (last_close - event.price_at_detection) * dir_sign < 0.0;
        let mut details: Vec<String> = Vec::new();

        // ── TRAP criteria ────────────────────────────────────────────────
        let mut trap_hits = 0u8;

        // t1: sweep-and-reject of the level that classified the location.
        if let Some(level) = event.sr_level_used {
            let swept = match event.cvd_direction {
                CvdDirection::Buying => candles.iter().any(|c| c.high > level && c.close < level),
                CvdDirection::Selling => candles.iter().any(|c| c.low < level && c.close > level),
            };
            if swept {
                trap_hits += 1;
                details.push(format!("sweep-and-reject of level {level:.2}"));
            }
        }

        // t2: close beyond the opposite swing extremum, against the flow.
        if let Some(opp) = event.opposite_level {
            let broke = match event.cvd_direction {
                CvdDirection::Buying => candles.iter().any(|c| c.close < opp),
                CvdDirection::Selling => candles.iter().any(|c| c.close > opp),
            };
            if broke {
                trap_hits += 1;
                details.push(format!("structure break through {opp:.2}"));
            }
        }

        // t3: OI spike then full flush with price reversal.
        if event.oi_at_detection > 0.0 && !oi.is_empty() {
            let max_oi = oi.iter().map(|p| p.value).fold(event.oi_at_detection, f64::max);
            let last_oi = oi.last().expect("non-empty").value;
            let spike = max_oi - event.oi_at_detection;
            let flush = max_oi - last_oi;
            if spike > 0.0 && flush >= spike && price_moved_against {
                trap_hits += 1;
                details.push(format!(
                    "OI flush {:.0}% of spike with price reversal",
                    flush / spike * 100.0
                ));
            }
        }

        // ── Build (ACCUMULATION / DISTRIBUTION) criteria ─────────────────
        let location_ok = matches!(
            (event.cvd_direction, event.location),
            (CvdDirection::Buying, AbsorptionLocation::NearSupport)
                | (CvdDirection::Selling, AbsorptionLocation::NearResistance)
        );
        let mut build_hits = 0u8;

        // a1: price holds — no close beyond the flat threshold against flow.
        let hold_floor = event.price_at_detection * (1.0 - dir_sign * thresholds.noise_pct / 100.0);
        let holds = match event.cvd_direction {
            CvdDirection::Buying => candles.iter().all(|c| c.close >= hold_floor),
            CvdDirection::Selling => candles.iter().all(|c| c.close <= hold_floor),
        };
        if holds {
            build_hits += 1;
            details.push("price held the absorption zone".to_string());
        }

        // a2: net OI build since detection.
        if event.oi_at_detection > 0.0 {
            if let Some(last_oi) = oi.last().map(|p| p.value) {
                let build_pct =
                    (last_oi - event.oi_at_detection) / event.oi_at_detection * 100.0;
                if build_pct >= thresholds.oi_quiet_pct {
                    build_hits += 1;
                    details.push(format!("OI built {build_pct:+.2}% since detection"));
                }
            }
        }

        // a3: price progressing with the absorbed flow.
        if (last_close - event.price_at_detection) * dir_sign > 0.0 {
            build_hits += 1;
            details.push("price progressing with the flow".to_string());
        }

        let criteria = ResolutionCriteria {
            trap_hits,
            build_hits,
            details,
        };

        // TRAP wins any tie with a build read.
        if trap_hits >= 2 {
            return ResolutionStep::Resolve {
                resolution: Resolution::Trap,
                reason: format!("{trap_hits}/3 trap criteria met"),
                criteria,
            };
        }
        if location_ok && build_hits >= 2 {
            let resolution = match event.cvd_direction {
                CvdDirection::Buying => Resolution::Accumulation,
                CvdDirection::Selling => Resolution::Distribution,
            };
            return ResolutionStep::Resolve {
                resolution,
                reason: format!("{build_hits}/3 build criteria met at correct location"),
                criteria,
            };
        }

        if elapsed > 2 * n_required + event.extensions_used as usize * extension {
            return ResolutionStep::Expire(format!(
                "no criteria met within {elapsed} candles (window {n_required})"
            ));
        }
        ResolutionStep::NotYet
    }

    /// Phase-2 pass over every unresolved event of `symbol`: fetch the window
    /// since detection and apply [`Self::evaluate`], updating the store.
    /// Returns the events resolved this cycle.
    pub async fn resolve_pending(
        store: &AbsorptionStore,
        provider: &dyn DataProvider,
        exchange: Exchange,
        symbol: &str,
        config: &ConfigParams,
        as_of_ms: i64,
    ) -> Result<Vec<AbsorptionEvent>, EngineError> {
        let mut resolved = Vec::new();

        for event in store.unresolved(Some(symbol)) {
            let tf = event.timeframe;
            let end = align_end_to_last_closed(tf, as_of_ms);
            let n_required = config.resolution_candles(tf);
            let limit = 4 * n_required + 10;

            let candles = provider
                .get_price_history(exchange, symbol, tf, limit, Some(event.detected_at), Some(end))
                .await?;
            let oi = provider
                .get_oi_history(exchange, symbol, tf, limit, Some(event.detected_at), Some(end))
                .await?;

            let thresholds = config.thresholds_for(tf);
            match Self::evaluate(&event, &candles, &oi, &thresholds, &config.absorption, end) {
                ResolutionStep::NotYet => {}
                ResolutionStep::Extend => {
                    info!(id = %event.id, "absorption window gappy — extension granted");
                    store.mark_extended(&event.id);
                }
                ResolutionStep::Expire(reason) => {
                    if let Some(e) =
                        store.resolve(&event.id, Resolution::Expired, reason, None, end)
                    {
                        resolved.push(e);
                    }
                }
                ResolutionStep::Resolve {
                    resolution,
                    reason,
                    criteria,
                } => {
                    if let Some(e) =
                        store.resolve(&event.id, resolution, reason, Some(criteria), end)
                    {
                        resolved.push(e);
                    }
                }
            }
        }

        Ok(resolved)
    }

    /// Confidence bonus a resolved event grants the next cycle: the full
    /// bonus, or the reduced one once price already travelled.
    pub fn resolution_bonus(
        event: &AbsorptionEvent,
        current_price: f64,
        params: &AbsorptionParams,
    ) -> f64 {
        if event.price_at_detection <= 0.0 {
            return params.confidence_bonus;
        }
        let moved_pct =
            ((current_price - event.price_at_detection) / event.price_at_detection * 100.0).abs();
        if moved_pct > params.reduced_bonus_move_pct {
            1.0
        } else {
            params.confidence_bonus
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timeframe;

    const H: i64 = 3_600_000;

    fn trap_event() -> AbsorptionEvent {
        AbsorptionEvent {
            id: "evt-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::H1,
            detected_at: 1_000 * H,
            cvd_direction: CvdDirection::Buying,
            cvd_strength: 0.06,
            cvd_noise_floor: 0.02,
            oi_at_detection: 7.9e9,
            oi_behavior: "Rising (+1.2%)".to_string(),
            price_response: PriceResponse::Flat,
            price_at_detection: 87_000.0,
            location: AbsorptionLocation::NearResistance,
            sr_level_used: Some(87_100.0),
            opposite_level: Some(86_200.0),
            resolved_at: None,
            resolution: None,
            resolution_reason: None,
            resolution_criteria: None,
            extensions_used: 0,
        }
    }

    fn candle(ts: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: ts,
            open,
            high,
            low,
            close,
            volume: 1_000.0,
        }
    }

    fn thresholds() -> TfThresholds {
        ConfigParams::default().thresholds_for(Timeframe::H1)
    }

    #[test]
    fn s4_buying_trap_at_resistance_resolves_trap() {
        let event = trap_event();
        let t0 = event.detected_at;
        // Wick through 87,100 then closes fading; final close breaks 86,200.
        let candles = vec![
            candle(t0, 87_000.0, 87_080.0, 86_900.0, 87_050.0),
            candle(t0 + H, 87_050.0, 87_150.0, 86_850.0, 86_900.0),
            candle(t0 + 2 * H, 86_900.0, 86_950.0, 86_350.0, 86_400.0),
            candle(t0 + 3 * H, 86_400.0, 86_450.0, 86_100.0, 86_150.0),
        ];
        // OI spikes 7.9 -> 8.1 then flushes to 7.84 (130% of the spike).
        let oi = vec![
            OiPoint { timestamp: t0, value: 8.0e9 },
            OiPoint { timestamp: t0 + H, value: 8.1e9 },
            OiPoint { timestamp: t0 + 2 * H, value: 7.95e9 },
            OiPoint { timestamp: t0 + 3 * H, value: 7.84e9 },
        ];

        let step = AbsorptionEngine::evaluate(
            &event,
            &candles,
            &oi,
            &thresholds(),
            &AbsorptionParams::default(),
            t0 + 4 * H,
        );
        match step {
            ResolutionStep::Resolve {
                resolution,
                criteria,
                ..
            } => {
                assert_eq!(resolution, Resolution::Trap);
                assert_eq!(criteria.trap_hits, 3);
            }
            other => panic!("expected TRAP resolution, got {other:?}"),
        }

        // Bias implication is the fade; price moved < 2% so the full bonus.
        assert_eq!(
            Resolution::Trap.bias_implication(CvdDirection::Buying),
            Some(crate::types::Bias::Short)
        );
        let bonus =
            AbsorptionEngine::resolution_bonus(&event, 86_150.0, &AbsorptionParams::default());
        assert!((bonus - 2.0).abs() < 1e-9);
    }

    #[test]
    fn too_early_is_not_yet() {
        let event = trap_event();
        let t0 = event.detected_at;
        let candles = vec![candle(t0, 87_000.0, 87_050.0, 86_950.0, 87_020.0)];
        let step = AbsorptionEngine::evaluate(
            &event,
            &candles,
            &[],
            &thresholds(),
            &AbsorptionParams::default(),
            t0 + H, // only 1 of 4 candles elapsed
        );
        assert_eq!(step, ResolutionStep::NotYet);
    }

    #[test]
    fn buying_at_support_that_holds_resolves_accumulation() {
        let mut event = trap_event();
        event.location = AbsorptionLocation::NearSupport;
        event.sr_level_used = Some(86_900.0);
        event.price_at_detection = 87_000.0;
        let t0 = event.detected_at;

        // Price holds and grinds up; OI builds steadily.
        let candles = vec![
            candle(t0, 87_000.0, 87_150.0, 86_950.0, 87_100.0),
            candle(t0 + H, 87_100.0, 87_250.0, 87_050.0, 87_200.0),
            candle(t0 + 2 * H, 87_200.0, 87_400.0, 87_150.0, 87_350.0),
            candle(t0 + 3 * H, 87_350.0, 87_500.0, 87_300.0, 87_450.0),
        ];
        let oi = vec![
            OiPoint { timestamp: t0, value: 7.95e9 },
            OiPoint { timestamp: t0 + H, value: 8.0e9 },
            OiPoint { timestamp: t0 + 2 * H, value: 8.05e9 },
            OiPoint { timestamp: t0 + 3 * H, value: 8.1e9 },
        ];

        let step = AbsorptionEngine::evaluate(
            &event,
            &candles,
            &oi,
            &thresholds(),
            &AbsorptionParams::default(),
            t0 + 4 * H,
        );
        match step {
            ResolutionStep::Resolve { resolution, .. } => {
                assert_eq!(resolution, Resolution::Accumulation);
            }
            other => panic!("expected ACCUMULATION, got {other:?}"),
        }
    }

    #[test]
    fn accumulation_pattern_at_wrong_location_does_not_resolve() {
        // Same build pattern but detected mid-range: location rule blocks it.
        let mut event = trap_event();
        event.location = AbsorptionLocation::MidRange;
        event.sr_level_used = None;
        event.opposite_level = None;
        let t0 = event.detected_at;

        let candles = vec![
            candle(t0, 87_000.0, 87_150.0, 86_950.0, 87_100.0),
            candle(t0 + H, 87_100.0, 87_250.0, 87_050.0, 87_200.0),
            candle(t0 + 2 * H, 87_200.0, 87_400.0, 87_150.0, 87_350.0),
            candle(t0 + 3 * H, 87_350.0, 87_500.0, 87_300.0, 87_450.0),
        ];
        let oi = vec![
            OiPoint { timestamp: t0 + 3 * H, value: 8.1e9 },
        ];

        let step = AbsorptionEngine::evaluate(
            &event,
            &candles,
            &oi,
            &thresholds(),
            &AbsorptionParams::default(),
            t0 + 4 * H,
        );
        assert_eq!(step, ResolutionStep::NotYet);
    }

    #[test]
    fn gappy_window_extends_once_then_expires() {
        let mut event = trap_event();
        let t0 = event.detected_at;
        // Only 2 candles where 4 are expected: > 20% gap.
        let candles = vec![
            candle(t0, 87_000.0, 87_050.0, 86_950.0, 87_020.0),
            candle(t0 + H, 87_020.0, 87_060.0, 86_960.0, 87_010.0),
        ];

        let step = AbsorptionEngine::evaluate(
            &event,
            &candles,
            &[],
            &thresholds(),
            &AbsorptionParams::default(),
            t0 + 4 * H,
        );
        assert_eq!(step, ResolutionStep::Extend);

        // After the extension is consumed the gap persists: expire.
        event.extensions_used = 1;
        let step = AbsorptionEngine::evaluate(
            &event,
            &candles,
            &[],
            &thresholds(),
            &AbsorptionParams::default(),
            t0 + 6 * H,
        );
        assert!(matches!(step, ResolutionStep::Expire(_)));
    }

    #[test]
    fn stale_event_expires_past_double_window() {
        let event = trap_event();
        let t0 = event.detected_at;
        // Full data, but nothing ever confirms: flat drift above detection.
        let candles: Vec<Candle> = (0..9)
            .map(|i| {
                let ts = t0 + i * H;
                candle(ts, 87_010.0, 87_060.0, 86_980.0, 87_030.0)
            })
            .collect();
        let step = AbsorptionEngine::evaluate(
            &event,
            &candles,
            &[],
            &thresholds(),
            &AbsorptionParams::default(),
            t0 + 9 * H, // > 2N = 8
        );
        assert!(matches!(step, ResolutionStep::Expire(_)));
    }

    #[test]
    fn reduced_bonus_after_large_move() {
        let event = trap_event();
        // 3% away from detection: bonus drops to 1.
        let bonus = AbsorptionEngine::resolution_bonus(
            &event,
            87_000.0 * 0.97,
            &AbsorptionParams::default(),
        );
        assert!((bonus - 1.0).abs() < 1e-9);
    }
}
