// =============================================================================
// Bybit v5 REST client — public linear-perpetual market data
// =============================================================================
//
// Bybit wraps every payload in `{retCode, retMsg, result: {list: [...]}}` and
// returns lists newest-first; everything is re-sorted ascending here. Bybit
// publishes no historical taker buy/sell split, so the taker series is
// estimated from each candle's close position within its range.

use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::market_data::{clamp_to_cutoff, Candle, FundingPoint, OiPoint, TakerVolume};
use crate::types::Timeframe;

/// Public market-data client for Bybit linear perpetuals.
#[derive(Clone)]
pub struct BybitClient {
    client: reqwest::Client,
    base_url: String,
}

fn kline_interval(tf: Timeframe) -> &'static str {
    match tf {
        Timeframe::M30 => "30",
        Timeframe::H1 => "60",
        Timeframe::H4 => "240",
        Timeframe::D1 => "D",
    }
}

fn oi_interval(tf: Timeframe) -> &'static str {
    match tf {
        Timeframe::M30 => "30min",
        Timeframe::H1 => "1h",
        Timeframe::H4 => "4h",
        Timeframe::D1 => "1d",
    }
}

impl BybitClient {
    pub fn new() -> Self {
        Self::with_base_url("https://api.bybit.com")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client for BybitClient");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn get_list(&self, url: &str) -> Result<Vec<serde_json::Value>, EngineError> {
        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout(format!("GET {url}: {e}"))
            } else {
                EngineError::Unreliable(format!("GET {url}: {e}"))
            }
        })?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(EngineError::RateLimited(format!("GET {url} returned 429")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EngineError::Unreliable(format!("GET {url}: bad body: {e}")))?;

        if !status.is_success() {
            return Err(EngineError::Unreliable(format!(
                "GET {url} returned {status}: {body}"
            )));
        }

        let ret_code = body["retCode"].as_i64().unwrap_or(-1);
        if ret_code != 0 {
            return Err(EngineError::Unreliable(format!(
                "bybit retCode {ret_code}: {}",
                body["retMsg"].as_str().unwrap_or("")
            )));
        }

        Ok(body["result"]["list"].as_array().cloned().unwrap_or_default())
    }

    /// GET /v5/market/kline — OHLCV.
    pub async fn klines(
        &self,
        symbol: &str,
        tf: Timeframe,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<Candle>, EngineError> {
        let mut url = format!(
            "{}/v5/market/kline?category=linear&symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            kline_interval(tf),
            limit
        );
        if let Some(s) = start {
            url.push_str(&format!("&start={s}"));
        }
        if let Some(e) = end {
            url.push_str(&format!("&end={e}"));
        }

        let list = self.get_list(&url).await?;
        let mut candles = Vec::with_capacity(list.len());
        for entry in &list {
            let arr = match entry.as_array() {
                Some(a) if a.len() >= 6 => a,
                _ => {
                    warn!("skipping malformed bybit kline entry");
                    continue;
                }
            };
            candles.push(Candle {
                timestamp: parse_str_i64(&arr[0]),
                open: parse_str_f64(&arr[1]),
                high: parse_str_f64(&arr[2]),
                low: parse_str_f64(&arr[3]),
                close: parse_str_f64(&arr[4]),
                volume: parse_str_f64(&arr[5]),
            });
        }
        candles.sort_by_key(|c| c.timestamp);
        if let Some(e) = end {
            candles = clamp_to_cutoff(candles, |c| c.timestamp, tf.interval_ms(), e);
        }

        debug!(symbol, tf = %tf, count = candles.len(), "bybit klines fetched");
        Ok(candles)
    }

    /// GET /v5/market/open-interest — OI history.
    pub async fn open_interest_hist(
        &self,
        symbol: &str,
        tf: Timeframe,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<OiPoint>, EngineError> {
        let mut url = format!(
            "{}/v5/market/open-interest?category=linear&symbol={}&intervalTime={}&limit={}",
            self.base_url,
            symbol,
            oi_interval(tf),
            limit
        );
        if let Some(s) = start {
            url.push_str(&format!("&startTime={s}"));
        }
        if let Some(e) = end {
            url.push_str(&format!("&endTime={e}"));
        }

        let list = self.get_list(&url).await?;
        let mut points: Vec<OiPoint> = list
            .iter()
            .map(|entry| OiPoint {
                timestamp: parse_str_i64(&entry["timestamp"]),
                value: parse_str_f64(&entry["openInterest"]),
            })
            .collect();
        points.sort_by_key(|p| p.timestamp);
        if let Some(e) = end {
            points.retain(|p| p.timestamp <= e);
        }

        debug!(symbol, tf = %tf, count = points.len(), "bybit OI history fetched");
        Ok(points)
    }

    /// GET /v5/market/funding/history — raw 8-hourly funding events.
    pub async fn funding_history(
        &self,
        symbol: &str,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<FundingPoint>, EngineError> {
        let mut url = format!(
            "{}/v5/market/funding/history?category=linear&symbol={}&limit={}",
            self.base_url, symbol, limit
        );
        if let Some(s) = start {
            url.push_str(&format!("&startTime={s}"));
        }
        if let Some(e) = end {
            url.push_str(&format!("&endTime={e}"));
        }

        let list = self.get_list(&url).await?;
        let mut points: Vec<FundingPoint> = list
            .iter()
            .map(|entry| FundingPoint {
                timestamp: parse_str_i64(&entry["fundingRateTimestamp"]),
                rate: parse_str_f64(&entry["fundingRate"]),
            })
            .collect();
        points.sort_by_key(|p| p.timestamp);

        debug!(symbol, count = points.len(), "bybit funding history fetched");
        Ok(points)
    }

    /// Per-candle taker buy/sell estimate derived from klines.
    ///
    /// Estimator: buy share = (close - low) / (high - low), clamped to
    /// [0.05, 0.95]; applied to the candle's quote volume.
    pub async fn taker_buy_sell(
        &self,
        symbol: &str,
        tf: Timeframe,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<TakerVolume>, EngineError> {
        let candles = self.klines(symbol, tf, limit, start, end).await?;
        Ok(candles.iter().map(estimate_taker_split).collect())
    }
}

impl Default for BybitClient {
    fn default() -> Self {
        Self::new()
    }
}

fn estimate_taker_split(c: &Candle) -> TakerVolume {
    let range = c.high - c.low;
    let buy_share = if range > f64::EPSILON {
        ((c.close - c.low) / range).clamp(0.05, 0.95)
    } else {
        0.5
    };
    let quote = c.volume * c.close;
    TakerVolume {
        timestamp: c.timestamp,
        buy_usd: quote * buy_share,
        sell_usd: quote * (1.0 - buy_share),
    }
}

fn parse_str_f64(val: &serde_json::Value) -> f64 {
    if let Some(s) = val.as_str() {
        s.parse().unwrap_or(0.0)
    } else {
        val.as_f64().unwrap_or(0.0)
    }
}

fn parse_str_i64(val: &serde_json::Value) -> i64 {
    if let Some(s) = val.as_str() {
        s.parse().unwrap_or(0)
    } else {
        val.as_i64().unwrap_or(0)
    }
}
