// =============================================================================
// Bucket Aggregator — Macro / Micro / Scalping verdicts
// =============================================================================
//
// Each bucket takes the weighted LONG vs SHORT vote of its constituent
// timeframes (per-timeframe weights from config). When both directional
// scores sit within the conflict ratio of each other the bucket is WAIT.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigParams;
use crate::signals::{resolve_direction, TimeframeVerdicts};
use crate::types::{Bias, Bucket, Timeframe};

/// Aggregated verdict of one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketVerdict {
    pub bucket: Bucket,
    pub bias: Bias,
    pub confidence: f64,
    pub long_score: f64,
    pub short_score: f64,
    pub contributing_timeframes: Vec<Timeframe>,
}

impl BucketVerdict {
    pub fn empty(bucket: Bucket) -> Self {
        Self {
            bucket,
            bias: Bias::Wait,
            confidence: 0.0,
            long_score: 0.0,
            short_score: 0.0,
            contributing_timeframes: Vec::new(),
        }
    }
}

/// Aggregate one bucket from the per-timeframe verdicts.
///
/// Timeframes missing from `per_tf` (hard-gated or failed) simply do not
/// contribute; an empty bucket is WAIT with zero confidence.
pub fn aggregate_bucket(
    bucket: Bucket,
    per_tf: &BTreeMap<Timeframe, TimeframeVerdicts>,
    config: &ConfigParams,
) -> BucketVerdict {
    let mut long_score = 0.0;
    let mut short_score = 0.0;
    let mut weight_sum = 0.0;
    let mut contributing = Vec::new();

    for &tf in bucket.members() {
        let tv = match per_tf.get(&tf) {
            Some(tv) => tv,
            None => continue,
        };
        let w = config.timeframe_weight(tf);
        long_score += w * tv.long_score;
        short_score += w * tv.short_score;
        weight_sum += w;
        contributing.push(tf);
    }

    if weight_sum < f64::EPSILON {
        return BucketVerdict::empty(bucket);
    }
    long_score /= weight_sum;
    short_score /= weight_sum;

    let (bias, confidence) =
        resolve_direction(long_score, short_score, config.penalties.conflict_ratio);

    debug!(
        bucket = %bucket,
        bias = %bias,
        confidence = format!("{confidence:.2}"),
        long = format!("{long_score:.2}"),
        short = format!("{short_score:.2}"),
        "bucket aggregated"
    );

    BucketVerdict {
        bucket,
        bias,
        confidence,
        long_score,
        short_score,
        contributing_timeframes: contributing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tf_verdict(tf: Timeframe, long: f64, short: f64) -> TimeframeVerdicts {
        let (bias, confidence) = resolve_direction(long, short, 0.7);
        TimeframeVerdicts {
            timeframe: tf,
            bias,
            confidence,
            long_score: long,
            short_score: short,
            wait_score: 0.0,
            verdicts: Vec::new(),
            effective_weights: BTreeMap::new(),
            gated_off: 0,
            stale: false,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn macro_bucket_weights_4h_over_1d() {
        let config = ConfigParams::default();
        let mut per_tf = BTreeMap::new();
        per_tf.insert(Timeframe::H4, tf_verdict(Timeframe::H4, 8.0, 0.0));
        per_tf.insert(Timeframe::D1, tf_verdict(Timeframe::D1, 4.0, 0.0));

        let v = aggregate_bucket(Bucket::Macro, &per_tf, &config);
        assert_eq!(v.bias, Bias::Long);
        // Weighted mean of 8.0 (w 0.35) and 4.0 (w 0.25).
        let expected = (0.35 * 8.0 + 0.25 * 4.0) / 0.60;
        assert!((v.long_score - expected).abs() < 1e-9);
        assert_eq!(v.contributing_timeframes, vec![Timeframe::H4, Timeframe::D1]);
    }

    #[test]
    fn near_tie_is_wait() {
        let config = ConfigParams::default();
        let mut per_tf = BTreeMap::new();
        per_tf.insert(Timeframe::H4, tf_verdict(Timeframe::H4, 5.0, 4.0));
        per_tf.insert(Timeframe::D1, tf_verdict(Timeframe::D1, 5.0, 4.0));

        let v = aggregate_bucket(Bucket::Macro, &per_tf, &config);
        // 4/5 = 0.8 > conflict ratio 0.7.
        assert_eq!(v.bias, Bias::Wait);
    }

    #[test]
    fn missing_timeframes_do_not_contribute() {
        let config = ConfigParams::default();
        let mut per_tf = BTreeMap::new();
        per_tf.insert(Timeframe::H4, tf_verdict(Timeframe::H4, 6.0, 1.0));

        let v = aggregate_bucket(Bucket::Macro, &per_tf, &config);
        assert_eq!(v.bias, Bias::Long);
        assert_eq!(v.contributing_timeframes, vec![Timeframe::H4]);
        assert!((v.long_score - 6.0).abs() < 1e-9);
    }

    #[test]
    fn empty_bucket_is_wait() {
        let config = ConfigParams::default();
        let per_tf = BTreeMap::new();
        let v = aggregate_bucket(Bucket::Scalping, &per_tf, &config);
        assert_eq!(v.bias, Bias::Wait);
        assert!(v.confidence.abs() < 1e-12);
    }
}
