// =============================================================================
// Demo Provider — deterministic synthetic market data for offline mode
// =============================================================================
//
// `GET /analyze?demo=true` and local development need the full pipeline to
// run without network access. The generator is a pure function of
// (exchange, symbol, timeframe, timestamp), so a demo replay is bit-for-bit
// reproducible.

use async_trait::async_trait;

use crate::errors::EngineError;
use crate::market_data::{Candle, DataProvider, FundingPoint, OiPoint, TakerVolume};
use crate::types::{Exchange, Timeframe};

/// Deterministic synthetic data provider.
pub struct DemoProvider;

impl DemoProvider {
    pub fn new() -> Self {
        Self
    }

    fn base_price(symbol: &str) -> f64 {
        // Stable per-symbol base derived from the symbol bytes.
        let h: u32 = symbol.bytes().fold(17u32, |acc, b| {
            acc.wrapping_mul(31).wrapping_add(b as u32)
        });
        1_000.0 + f64::from(h % 90_000)
    }

    fn candle_at(exchange: Exchange, symbol: &str, tf: Timeframe, ts: i64) -> Candle {
        let base = Self::base_price(symbol);
        let t = ts as f64 / 1_000.0;
        let venue_skew = match exchange {
            Exchange::Binance => 0.0,
            Exchange::Bybit => 0.37,
        };

        // Slow trend wave plus a faster oscillation; phases keyed by venue so
        // the two exchanges genuinely diverge.
        let slow = (t / 86_400.0 + venue_skew).sin() * 0.03;
        let fast = (t / 7_200.0 + venue_skew * 2.0).sin() * 0.008;
        let close = base * (1.0 + slow + fast);

        let prev_t = (ts - tf.interval_ms()) as f64 / 1_000.0;
        let prev_slow = (prev_t / 86_400.0 + venue_skew).sin() * 0.03;
        let prev_fast = (prev_t / 7_200.0 + venue_skew * 2.0).sin() * 0.008;
        let open = base * (1.0 + prev_slow + prev_fast);

        let wick = base * 0.002;
        let volume = 500.0 + 200.0 * ((t / 3_600.0).cos().abs());

        Candle {
            timestamp: ts,
            open,
            high: open.max(close) + wick,
            low: open.min(close) - wick,
            close,
            volume,
        }
    }

    fn series_window(tf: Timeframe, limit: usize, start: Option<i64>, end: Option<i64>) -> Vec<i64> {
        let step = tf.interval_ms();
        let end_ms = end.unwrap_or(0);
        // Last closed candle opens one full interval before the cutoff.
        let last_open = end_ms.div_euclid(step) * step - step;
        let first = match start {
            Some(s) => s.div_euclid(step) * step,
            None => last_open - (limit.saturating_sub(1) as i64) * step,
        };
        let mut out = Vec::new();
        let mut ts = first.max(last_open - (limit.saturating_sub(1) as i64) * step);
        while ts <= last_open {
            out.push(ts);
            ts += step;
        }
        out
    }
}

impl Default for DemoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataProvider for DemoProvider {
    async fn get_price_history(
        &self,
        exchange: Exchange,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<Candle>, EngineError> {
        Ok(Self::series_window(interval, limit, start, end)
            .into_iter()
            .map(|ts| Self::candle_at(exchange, symbol, interval, ts))
            .collect())
    }

    async fn get_oi_history(
        &self,
        exchange: Exchange,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<OiPoint>, EngineError> {
        let base = Self::base_price(symbol) * 1_000.0;
        Ok(Self::series_window(interval, limit, start, end)
            .into_iter()
            .map(|ts| {
                let t = ts as f64 / 1_000.0;
                let skew = if exchange == Exchange::Bybit { 0.9 } else { 0.0 };
                OiPoint {
                    timestamp: ts,
                    value: base * (1.0 + 0.05 * (t / 43_200.0 + skew).sin()),
                }
            })
            .collect())
    }

    async fn get_funding_history(
        &self,
        exchange: Exchange,
        _symbol: &str,
        interval: Timeframe,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<FundingPoint>, EngineError> {
        Ok(Self::series_window(interval, limit, start, end)
            .into_iter()
            .map(|ts| {
                let t = ts as f64 / 1_000.0;
                let skew = if exchange == Exchange::Bybit { 0.5 } else { 0.0 };
                FundingPoint {
                    timestamp: ts,
                    rate: 0.0001 * (t / 86_400.0 + skew).sin(),
                }
            })
            .collect())
    }

    async fn get_taker_buy_sell_volume(
        &self,
        exchange: Exchange,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<TakerVolume>, EngineError> {
        Ok(Self::series_window(interval, limit, start, end)
            .into_iter()
            .map(|ts| {
                let c = Self::candle_at(exchange, symbol, interval, ts);
                let quote = c.volume * c.close;
                // Buy share tracks candle direction.
                let buy_share = if c.close >= c.open { 0.58 } else { 0.42 };
                TakerVolume {
                    timestamp: ts,
                    buy_usd: quote * buy_share,
                    sell_usd: quote * (1.0 - buy_share),
                }
            })
            .collect())
    }
}
