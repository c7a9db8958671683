// =============================================================================
// Market Data Module
// =============================================================================
//
// Everything the pipeline knows about the outside world comes through the
// [`DataProvider`] trait: OHLC candles, open interest, funding rates, and
// taker buy/sell volume per `(exchange, symbol, interval, [start, end])`.
//
// Implementations:
//   - `binance` / `bybit` — live perpetual-futures REST clients
//   - `history`           — in-memory historical store (replay + tests)
//   - `demo`              — deterministic synthetic generator (offline mode)
//
// Contract: series are ordered ascending; may be partial; when `end` is
// supplied every returned candle satisfies `timestamp + interval_ms <= end`.

pub mod binance;
pub mod bybit;
pub mod cache;
pub mod demo;
pub mod history;
pub mod live;
pub mod rate_limit;

pub use cache::TtlCache;
pub use history::HistoricalStore;
pub use rate_limit::RateLimiter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::types::{Exchange, Timeframe};

/// A single OHLC candle. `timestamp` is the candle **open** in ms UTC; the
/// candle covers `[timestamp, timestamp + interval_ms)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

/// Open-interest reading aligned to a candle open.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OiPoint {
    pub timestamp: i64,
    pub value: f64,
}

/// Funding-rate reading aligned to a candle open.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FundingPoint {
    pub timestamp: i64,
    pub rate: f64,
}

/// Per-candle taker buy/sell volume in quote units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TakerVolume {
    pub timestamp: i64,
    pub buy_usd: f64,
    pub sell_usd: f64,
}

/// Everything fetched for one `(exchange, timeframe)` cell of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesBundle {
    pub exchange: Exchange,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
    pub oi: Vec<OiPoint>,
    pub funding: Vec<FundingPoint>,
    pub taker: Vec<TakerVolume>,
    /// Resolution tag the taker series was delivered at (e.g. "h1").
    pub taker_resolution: String,
    /// True when any series had interior gaps.
    pub partial: bool,
    /// Timestamp of the last closed candle in the bundle, ms UTC.
    pub last_data_ms: i64,
}

/// Source of all external market data the pipeline consumes.
///
/// Every method returns an ascending series; when `end` is given, every
/// candle must be fully closed at `end` (the caller re-validates with
/// [`crate::time_align::validate_series`] — a violation is a Lookahead bug).
#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn get_price_history(
        &self,
        exchange: Exchange,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<Candle>, EngineError>;

    async fn get_oi_history(
        &self,
        exchange: Exchange,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<OiPoint>, EngineError>;

    async fn get_funding_history(
        &self,
        exchange: Exchange,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<FundingPoint>, EngineError>;

    async fn get_taker_buy_sell_volume(
        &self,
        exchange: Exchange,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<TakerVolume>, EngineError>;
}

/// Drop trailing entries of any timestamped series that are not fully closed
/// at `end_ms`. Providers apply this before returning; the pipeline validates
/// again so a misbehaving provider surfaces as a Lookahead error rather than
/// a silent bias.
pub fn clamp_to_cutoff<T>(items: Vec<T>, ts: impl Fn(&T) -> i64, step: i64, end_ms: i64) -> Vec<T> {
    items
        .into_iter()
        .filter(|item| ts(item) + step <= end_ms)
        .collect()
}
