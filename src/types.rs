// =============================================================================
// Shared types used across the Meridian intelligence engine
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Directional verdict emitted by signals, buckets, and the final decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bias {
    Long,
    Short,
    Wait,
}

impl Bias {
    /// +1.0 for LONG, -1.0 for SHORT, 0.0 for WAIT.
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
            Self::Wait => 0.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
            Self::Wait => Self::Wait,
        }
    }

    pub fn is_directional(self) -> bool {
        !matches!(self, Self::Wait)
    }
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
            Self::Wait => write!(f, "WAIT"),
        }
    }
}

/// Bias-to-behavior mapping shown to consumers of the market state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStance {
    LookForLongs,
    LookForShorts,
    AvoidTrading,
}

impl std::fmt::Display for TradeStance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LookForLongs => write!(f, "LOOK_FOR_LONGS"),
            Self::LookForShorts => write!(f, "LOOK_FOR_SHORTS"),
            Self::AvoidTrading => write!(f, "AVOID_TRADING"),
        }
    }
}

/// Risk posture attached to the final decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskMode {
    Normal,
    Defensive,
    Aggressive,
}

impl std::fmt::Display for RiskMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Defensive => write!(f, "DEFENSIVE"),
            Self::Aggressive => write!(f, "AGGRESSIVE"),
        }
    }
}

/// The two derivative venues the engine compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Binance,
    Bybit,
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binance => write!(f, "binance"),
            Self::Bybit => write!(f, "bybit"),
        }
    }
}

/// The closed set of timeframes the pipeline operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [Timeframe::M30, Timeframe::H1, Timeframe::H4, Timeframe::D1];

    /// Candle duration in milliseconds.
    pub fn interval_ms(self) -> i64 {
        match self {
            Self::M30 => 30 * 60 * 1000,
            Self::H1 => 60 * 60 * 1000,
            Self::H4 => 4 * 60 * 60 * 1000,
            Self::D1 => 24 * 60 * 60 * 1000,
        }
    }

    /// Wire code used in API paths and config keys ("30m", "1h", "4h", "1d").
    pub fn code(self) -> &'static str {
        match self {
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    /// Expected resolution tag of the taker-volume series for this timeframe.
    /// A CVD series delivered at any other resolution fails the CVD gate.
    pub fn cvd_resolution(self) -> &'static str {
        match self {
            Self::M30 => "m30",
            Self::H1 => "h1",
            Self::H4 => "h4",
            Self::D1 => "h24",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "30m" => Ok(Self::M30),
            "1h" => Ok(Self::H1),
            "4h" => Ok(Self::H4),
            "1d" => Ok(Self::D1),
            other => Err(EngineError::UnknownInterval(other.to_string())),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Hierarchical bucket a timeframe contributes to. 1h and 4h deliberately
/// appear in two buckets each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Macro,
    Micro,
    Scalping,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::Macro, Bucket::Micro, Bucket::Scalping];

    /// Constituent timeframes, lowest first.
    pub fn members(self) -> &'static [Timeframe] {
        match self {
            Self::Macro => &[Timeframe::H4, Timeframe::D1],
            Self::Micro => &[Timeframe::H1, Timeframe::H4],
            Self::Scalping => &[Timeframe::M30, Timeframe::H1],
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Macro => write!(f, "macro"),
            Self::Micro => write!(f, "micro"),
            Self::Scalping => write!(f, "scalping"),
        }
    }
}
