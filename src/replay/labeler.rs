// =============================================================================
// Outcome Labeler — did the state's narrative play out?
// =============================================================================
//
// Pure and deterministic: the same state and the same future candles always
// yield the same label. The decisive move is the end-of-horizon close versus
// the price at state time; MFE/MAE record the best and worst excursion
// relative to the state's direction along the way.
//
// For WAIT states the judgement inverts: a quiet horizon means WAIT was
// right (CONTINUATION of its correctness), a sustained move past the
// threshold means WAIT was wrong (REVERSAL).

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;
use crate::types::Bias;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeLabel {
    Continuation,
    Reversal,
    Noise,
    Pending,
}

impl std::fmt::Display for OutcomeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Continuation => "CONTINUATION",
            Self::Reversal => "REVERSAL",
            Self::Noise => "NOISE",
            Self::Pending => "PENDING",
        };
        write!(f, "{s}")
    }
}

/// Label plus the measurements that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub label: OutcomeLabel,
    pub horizon_ms: i64,
    /// End-of-horizon move, percent, signed in price terms.
    pub move_pct: f64,
    /// Maximum favorable excursion relative to the bias direction, percent.
    pub mfe: f64,
    /// Maximum adverse excursion relative to the bias direction, percent.
    pub mae: f64,
    pub labeled_at: i64,
}

impl Outcome {
    pub fn pending(horizon_ms: i64, labeled_at: i64) -> Self {
        Self {
            label: OutcomeLabel::Pending,
            horizon_ms,
            move_pct: 0.0,
            mfe: 0.0,
            mae: 0.0,
            labeled_at,
        }
    }
}

/// Assign the outcome of a state with `bias` struck at `price_at`/`as_of_ms`,
/// judged over `horizon_ms` using `future` candles of width `interval_ms`.
///
/// Returns PENDING when the future data does not yet cover the horizon.
pub fn label_outcome(
    bias: Bias,
    price_at: f64,
    as_of_ms: i64,
    horizon_ms: i64,
    future: &[Candle],
    interval_ms: i64,
    threshold_pct: f64,
    labeled_at: i64,
) -> Outcome {
    let horizon_end = as_of_ms + horizon_ms;

    // Candles fully inside (as_of, horizon_end].
    let window: Vec<&Candle> = future
        .iter()
        .filter(|c| c.timestamp >= as_of_ms && c.timestamp + interval_ms <= horizon_end)
        .collect();

    // Horizon must be fully covered: the last candle closes within one
    // interval of the horizon end.
    let covered = window
        .last()
        .map_or(false, |c| c.timestamp + 2 * interval_ms > horizon_end);
    if !covered || price_at <= 0.0 {
        return Outcome::pending(horizon_ms, labeled_at);
    }

    let final_close = window.last().expect("covered implies non-empty").close;
    let move_pct = (final_close - price_at) / price_at * 100.0;

    // Excursions relative to the bias direction; WAIT measures as if long so
    // mfe/mae still describe up/down extremes.
    let dir = if bias == Bias::Short { -1.0 } else { 1.0 };
    let mut mfe = 0.0f64;
    let mut mae = 0.0f64;
    for c in &window {
        let up = (c.high - price_at) / price_at * 100.0;
        let down = (c.low - price_at) / price_at * 100.0;
        let (favorable, adverse) = if dir > 0.0 { (up, down) } else { (-down, -up) };
        mfe = mfe.max(favorable);
        mae = mae.min(adverse.min(0.0));
    }

    let label = match bias {
        Bias::Long | Bias::Short => {
            let directional_move = move_pct * bias.sign();
            if directional_move >= threshold_pct {
                OutcomeLabel::Continuation
            } else if directional_move <= -threshold_pct {
                OutcomeLabel::Reversal
            } else {
                OutcomeLabel::Noise
            }
        }
        Bias::Wait => {
            if move_pct.abs() >= threshold_pct {
                OutcomeLabel::Reversal
            } else {
                OutcomeLabel::Continuation
            }
        }
    };

    Outcome {
        label,
        horizon_ms,
        move_pct,
        mfe,
        mae,
        labeled_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: i64 = 3_600_000;

    fn candle(ts: i64, low: f64, high: f64, close: f64) -> Candle {
        Candle {
            timestamp: ts,
            open: close,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    fn rally(start_price: f64, candles: usize) -> Vec<Candle> {
        (0..candles)
            .map(|i| {
                let p = start_price * (1.0 + 0.003 * (i + 1) as f64);
                candle(i as i64 * H, p * 0.999, p * 1.001, p)
            })
            .collect()
    }

    #[test]
    fn long_into_rally_is_continuation() {
        let future = rally(100.0, 8);
        let o = label_outcome(Bias::Long, 100.0, 0, 4 * H, &future, H, 0.5, 99);
        assert_eq!(o.label, OutcomeLabel::Continuation);
        assert!(o.move_pct >= 0.5);
        assert!(o.mfe > 0.0);
    }

    #[test]
    fn short_into_rally_is_reversal() {
        let future = rally(100.0, 8);
        let o = label_outcome(Bias::Short, 100.0, 0, 4 * H, &future, H, 0.5, 99);
        assert_eq!(o.label, OutcomeLabel::Reversal);
        assert!(o.mae < 0.0);
    }

    #[test]
    fn small_drift_is_noise_for_directional_bias() {
        let future: Vec<Candle> = (0..8)
            .map(|i| candle(i as i64 * H, 99.9, 100.1, 100.05))
            .collect();
        let o = label_outcome(Bias::Long, 100.0, 0, 4 * H, &future, H, 0.5, 99);
        assert_eq!(o.label, OutcomeLabel::Noise);
    }

    #[test]
    fn quiet_horizon_vindicates_wait() {
        let future: Vec<Candle> = (0..8)
            .map(|i| candle(i as i64 * H, 99.9, 100.1, 100.02))
            .collect();
        let o = label_outcome(Bias::Wait, 100.0, 0, 4 * H, &future, H, 0.5, 99);
        assert_eq!(o.label, OutcomeLabel::Continuation);
    }

    #[test]
    fn sustained_move_convicts_wait() {
        let future = rally(100.0, 8);
        let o = label_outcome(Bias::Wait, 100.0, 0, 4 * H, &future, H, 0.5, 99);
        assert_eq!(o.label, OutcomeLabel::Reversal);
    }

    #[test]
    fn uncovered_horizon_is_pending() {
        let future = rally(100.0, 2);
        let o = label_outcome(Bias::Long, 100.0, 0, 8 * H, &future, H, 0.5, 99);
        assert_eq!(o.label, OutcomeLabel::Pending);
    }

    #[test]
    fn labeling_is_idempotent() {
        let future = rally(100.0, 8);
        let a = label_outcome(Bias::Long, 100.0, 0, 4 * H, &future, H, 0.5, 99);
        let b = label_outcome(Bias::Long, 100.0, 0, 4 * H, &future, H, 0.5, 99);
        assert_eq!(a, b);
    }

    #[test]
    fn mfe_and_mae_track_direction() {
        // Dip to 98 then rally to 103.
        let future = vec![
            candle(0, 98.0, 100.5, 100.2),
            candle(H, 99.5, 101.5, 101.0),
            candle(2 * H, 100.5, 103.0, 102.8),
        ];
        let long = label_outcome(Bias::Long, 100.0, 0, 3 * H, &future, H, 0.5, 99);
        assert!((long.mfe - 3.0).abs() < 1e-9);
        assert!((long.mae + 2.0).abs() < 1e-9);

        let short = label_outcome(Bias::Short, 100.0, 0, 3 * H, &future, H, 0.5, 99);
        assert!((short.mfe - 2.0).abs() < 1e-9);
        assert!((short.mae + 3.0).abs() < 1e-9);
    }
}
