// =============================================================================
// Exchange Divergence Analyzer — retail vs whale venue comparison
// =============================================================================
//
// One venue is configured retail-leaning, the other whale-leaning. The
// analyzer compares OI change, CVD slope, funding, and volume between them
// and names the flow scenario. Directional scenarios require an OI delta
// above the activation floor; tiny deltas always read as `unclear`.
//
// Priority order (first match wins): synchronized moves, whale-led flows,
// squeeze setups, retail-only noise.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DivergenceParams;
use crate::features::FeatureSet;
use crate::regime::{FundingExtremity, SlopeSign};
use crate::types::Bias;

/// The nine divergence scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceScenario {
    WhaleDistribution,
    WhaleAccumulation,
    RetailFomoRally,
    ShortSqueezeSetup,
    SynchronizedBullish,
    SynchronizedBearish,
    BinanceNoise,
    BybitLeading,
    Unclear,
}

impl std::fmt::Display for DivergenceScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::WhaleDistribution => "whale_distribution",
            Self::WhaleAccumulation => "whale_accumulation",
            Self::RetailFomoRally => "retail_fomo_rally",
            Self::ShortSqueezeSetup => "short_squeeze_setup",
            Self::SynchronizedBullish => "synchronized_bullish",
            Self::SynchronizedBearish => "synchronized_bearish",
            Self::BinanceNoise => "binance_noise",
            Self::BybitLeading => "bybit_leading",
            Self::Unclear => "unclear",
        };
        write!(f, "{s}")
    }
}

/// Analyzer output attached to the market state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceAssessment {
    pub scenario: DivergenceScenario,
    pub bias: Bias,
    pub confidence: f64,
    pub warnings: Vec<String>,
    /// OI change of the retail venue over the look-back, percent.
    pub retail_oi_delta_pct: f64,
    /// OI change of the whale venue over the look-back, percent.
    pub whale_oi_delta_pct: f64,
}

impl DivergenceAssessment {
    pub fn unclear(retail_oi_delta_pct: f64, whale_oi_delta_pct: f64) -> Self {
        Self {
            scenario: DivergenceScenario::Unclear,
            bias: Bias::Wait,
            confidence: 2.0,
            warnings: Vec::new(),
            retail_oi_delta_pct,
            whale_oi_delta_pct,
        }
    }
}

/// Compare the two venues on one timeframe.
///
/// `retail` and `whale` are the feature sets of the configured venues for the
/// same timeframe.
pub fn analyze(
    retail: &FeatureSet,
    whale: &FeatureSet,
    params: &DivergenceParams,
) -> DivergenceAssessment {
    let retail_oi = retail.oi.as_ref().map(|o| o.change_pct).unwrap_or(0.0);
    let whale_oi = whale.oi.as_ref().map(|o| o.change_pct).unwrap_or(0.0);
    let max_delta = retail_oi.abs().max(whale_oi.abs());

    // Activation floor: nothing directional below min_delta; nothing at all
    // below the unclear floor.
    if max_delta < params.unclear_below_pct {
        return DivergenceAssessment::unclear(retail_oi, whale_oi);
    }

    let retail_cvd = retail
        .cvd
        .as_ref()
        .map(|c| c.direction)
        .unwrap_or(SlopeSign::Flat);
    let whale_cvd = whale
        .cvd
        .as_ref()
        .map(|c| c.direction)
        .unwrap_or(SlopeSign::Flat);
    let retail_funding = retail
        .funding
        .as_ref()
        .map(|f| f.extremity)
        .unwrap_or(FundingExtremity::Neutral);

    let price_up = retail.price_change_pct > 0.0;
    let price_down = retail.price_change_pct < 0.0;

    if max_delta < params.min_delta_pct {
        // Active but below the directional floor: retail-only churn is noise.
        if retail_oi.abs() >= params.unclear_below_pct
            && whale_oi.abs() < params.unclear_below_pct
        {
            return DivergenceAssessment {
                scenario: DivergenceScenario::BinanceNoise,
                bias: Bias::Wait,
                confidence: 3.0,
                warnings: vec!["retail OI churn without whale participation".to_string()],
                retail_oi_delta_pct: retail_oi,
                whale_oi_delta_pct: whale_oi,
            };
        }
        return DivergenceAssessment::unclear(retail_oi, whale_oi);
    }

    let mut warnings = Vec::new();

    let (scenario, bias, confidence): (DivergenceScenario, Bias, f64) = if retail_oi > 0.0 && whale_oi > 0.0 && price_up {
        (DivergenceScenario::SynchronizedBullish, Bias::Long, 7.0)
    } else if retail_oi < 0.0 && whale_oi < 0.0 && price_down {
        (DivergenceScenario::SynchronizedBearish, Bias::Short, 7.0)
    } else if whale_oi < -params.min_delta_pct && retail_oi > 0.0 && price_up {
        warnings.push("whales exiting into a retail-funded rally".to_string());
        (DivergenceScenario::WhaleDistribution, Bias::Short, 7.5)
    } else if whale_oi > params.min_delta_pct && retail_oi <= 0.0 && !price_up {
        (DivergenceScenario::WhaleAccumulation, Bias::Long, 7.5)
    } else if retail_funding == FundingExtremity::NegativeExtreme && max_delta > params.min_delta_pct
    {
        (DivergenceScenario::ShortSqueezeSetup, Bias::Long, 6.5)
    } else if retail_oi > params.min_delta_pct
        && price_up
        && retail_funding == FundingExtremity::PositiveExtreme
    {
        warnings.push("crowded retail longs at extreme funding".to_string());
        (DivergenceScenario::RetailFomoRally, Bias::Short, 6.0)
    } else if whale_oi.abs() > params.min_delta_pct && retail_oi.abs() < params.unclear_below_pct {
        let bias = match whale_cvd {
            SlopeSign::Positive => Bias::Long,
            SlopeSign::Negative => Bias::Short,
            SlopeSign::Flat => Bias::Wait,
        };
        (DivergenceScenario::BybitLeading, bias, 5.5)
    } else if retail_oi.abs() > params.min_delta_pct && whale_oi.abs() < params.unclear_below_pct {
        warnings.push("retail OI churn without whale participation".to_string());
        (DivergenceScenario::BinanceNoise, Bias::Wait, 3.0)
    } else {
        (DivergenceScenario::Unclear, Bias::Wait, 2.0)
    };

    // CVD disagreement between venues weakens any directional read.
    let confidence = if bias.is_directional()
        && retail_cvd != SlopeSign::Flat
        && whale_cvd != SlopeSign::Flat
        && retail_cvd != whale_cvd
    {
        warnings.push("venue CVD disagreement".to_string());
        (confidence - 1.5).max(1.0)
    } else {
        confidence
    };

    debug!(
        scenario = %scenario,
        bias = %bias,
        retail_oi = format!("{retail_oi:.2}"),
        whale_oi = format!("{whale_oi:.2}"),
        "divergence analyzed"
    );

    DivergenceAssessment {
        scenario,
        bias,
        confidence,
        warnings,
        retail_oi_delta_pct: retail_oi,
        whale_oi_delta_pct: whale_oi,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{OiAlignment, OiFeature};
    use crate::regime::OiTrend;
    use crate::types::{Exchange, Timeframe};

    fn feature_set(
        exchange: Exchange,
        oi_change: f64,
        price_change: f64,
        cvd_dir: SlopeSign,
        funding: FundingExtremity,
    ) -> FeatureSet {
        FeatureSet {
            exchange,
            timeframe: Timeframe::H1,
            last_close: 100.0,
            last_data_ms: 0,
            price_change_pct: price_change,
            momentum_pct: Some(price_change),
            trend: None,
            volatility: None,
            cvd: Some(crate::features::CvdFeature {
                series: vec![0.0; 50],
                slope: match cvd_dir {
                    SlopeSign::Positive => 0.05,
                    SlopeSign::Negative => -0.05,
                    SlopeSign::Flat => 0.0,
                },
                noise_floor: 0.01,
                strong: cvd_dir != SlopeSign::Flat,
                direction: cvd_dir,
                actual_candles: 50,
                expected_candles: 50,
                max_zero_run: 0,
            }),
            oi: Some(OiFeature {
                last: 1_000_000.0,
                change_pct: oi_change,
                trend: if oi_change > 0.8 {
                    OiTrend::Rising
                } else if oi_change < -0.8 {
                    OiTrend::Falling
                } else {
                    OiTrend::Flat
                },
                alignment: OiAlignment::Aligned,
            }),
            funding: Some(crate::features::FundingFeature {
                current: 0.0001,
                z: 0.0,
                extremity: funding,
            }),
            structure: None,
            volume_profile: None,
            vwap: None,
            taker_resolution: "h1".to_string(),
            partial: false,
        }
    }

    #[test]
    fn tiny_deltas_are_unclear() {
        let retail = feature_set(Exchange::Binance, 0.2, 0.5, SlopeSign::Positive, FundingExtremity::Neutral);
        let whale = feature_set(Exchange::Bybit, 0.3, 0.5, SlopeSign::Positive, FundingExtremity::Neutral);
        let a = analyze(&retail, &whale, &DivergenceParams::default());
        assert_eq!(a.scenario, DivergenceScenario::Unclear);
        assert_eq!(a.bias, Bias::Wait);
    }

    #[test]
    fn whale_exit_into_rally_is_distribution() {
        let retail = feature_set(Exchange::Binance, 2.0, 1.0, SlopeSign::Positive, FundingExtremity::Neutral);
        let whale = feature_set(Exchange::Bybit, -2.5, 1.0, SlopeSign::Negative, FundingExtremity::Neutral);
        let a = analyze(&retail, &whale, &DivergenceParams::default());
        assert_eq!(a.scenario, DivergenceScenario::WhaleDistribution);
        assert_eq!(a.bias, Bias::Short);
        assert!(!a.warnings.is_empty());
    }

    #[test]
    fn both_building_in_rally_is_synchronized_bullish() {
        let retail = feature_set(Exchange::Binance, 2.0, 1.0, SlopeSign::Positive, FundingExtremity::Neutral);
        let whale = feature_set(Exchange::Bybit, 1.8, 1.0, SlopeSign::Positive, FundingExtremity::Neutral);
        let a = analyze(&retail, &whale, &DivergenceParams::default());
        assert_eq!(a.scenario, DivergenceScenario::SynchronizedBullish);
        assert_eq!(a.bias, Bias::Long);
    }

    #[test]
    fn whale_only_move_follows_whale_cvd() {
        let retail = feature_set(Exchange::Binance, 0.1, 0.0, SlopeSign::Flat, FundingExtremity::Neutral);
        let whale = feature_set(Exchange::Bybit, 2.0, 0.0, SlopeSign::Positive, FundingExtremity::Neutral);
        let a = analyze(&retail, &whale, &DivergenceParams::default());
        assert_eq!(a.scenario, DivergenceScenario::BybitLeading);
        assert_eq!(a.bias, Bias::Long);
    }

    #[test]
    fn retail_churn_without_whales_is_noise() {
        let retail = feature_set(Exchange::Binance, 0.8, 0.2, SlopeSign::Positive, FundingExtremity::Neutral);
        let whale = feature_set(Exchange::Bybit, 0.1, 0.2, SlopeSign::Flat, FundingExtremity::Neutral);
        let a = analyze(&retail, &whale, &DivergenceParams::default());
        assert_eq!(a.scenario, DivergenceScenario::BinanceNoise);
        assert_eq!(a.bias, Bias::Wait);
    }

    #[test]
    fn negative_extreme_funding_with_oi_is_squeeze_setup() {
        let retail = feature_set(Exchange::Binance, 1.5, -0.5, SlopeSign::Flat, FundingExtremity::NegativeExtreme);
        let whale = feature_set(Exchange::Bybit, 1.4, -0.5, SlopeSign::Flat, FundingExtremity::Neutral);
        let a = analyze(&retail, &whale, &DivergenceParams::default());
        assert_eq!(a.scenario, DivergenceScenario::ShortSqueezeSetup);
        assert_eq!(a.bias, Bias::Long);
    }
}
