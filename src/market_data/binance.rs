// =============================================================================
// Binance USD-M Futures REST client — public market-data endpoints
// =============================================================================
//
// The engine only consumes public derivative data (klines, open interest
// history, funding history, taker buy/sell volume); nothing here is signed.
// Responses use Binance's array-of-arrays / array-of-objects formats with
// numbers encoded as strings, parsed defensively.

use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::market_data::{clamp_to_cutoff, Candle, FundingPoint, OiPoint, TakerVolume};
use crate::types::Timeframe;

/// Public market-data client for Binance USD-M perpetual futures.
#[derive(Clone)]
pub struct BinanceFuturesClient {
    client: reqwest::Client,
    base_url: String,
}

impl BinanceFuturesClient {
    pub fn new() -> Self {
        Self::with_base_url("https://fapi.binance.com")
    }

    /// Point the client at a different host (tests, mirrors).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client for BinanceFuturesClient");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, EngineError> {
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
        Ok(body)
    }

    /// GET /fapi/v1/klines — OHLCV, ascending.
    ///
    /// Array indices: [0] openTime, [1] open, [2] high, [3] low, [4] close,
    /// [5] volume (the remaining fields are unused here).
    pub async fn klines(
        &self,
        symbol: &str,
        tf: Timeframe,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<Candle>, EngineError> {
        let mut url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            tf.code(),
            limit
        );
        if let Some(s) = start {
            url.push_str(&format!("&startTime={s}"));
        }
        if let Some(e) = end {
            url.push_str(&format!("&endTime={e}"));
        }

        let body = self.get_json(&url).await?;
        let raw = body
            .as_array()
            .ok_or_else(|| EngineError::Unreliable("klines response is not an array".into()))?;

        let mut candles = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = match entry.as_array() {
                Some(a) if a.len() >= 6 => a,
                _ => {
                    warn!("skipping malformed kline entry");
                    continue;
                }
            };
            candles.push(Candle {
                timestamp: arr[0].as_i64().unwrap_or(0),
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

        debug!(symbol, tf = %tf, count = candles.len(), "binance klines fetched");
        Ok(candles)
    }

    /// GET /futures/data/openInterestHist — OI history at the kline interval.
    pub async fn open_interest_hist(
        &self,
        symbol: &str,
        tf: Timeframe,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<OiPoint>, EngineError> {
        let mut url = format!(
            "{}/futures/data/openInterestHist?symbol={}&period={}&limit={}",
            self.base_url,
            symbol,
            tf.code(),
            limit
        );
        if let Some(s) = start {
            url.push_str(&format!("&startTime={s}"));
        }
        if let Some(e) = end {
            url.push_str(&format!("&endTime={e}"));
        }

        let body = self.get_json(&url).await?;
        let raw = body
            .as_array()
            .ok_or_else(|| EngineError::Unreliable("OI response is not an array".into()))?;

        let mut points: Vec<OiPoint> = raw
            .iter()
            .map(|entry| OiPoint {
                timestamp: entry["timestamp"].as_i64().unwrap_or(0),
                value: parse_str_f64(&entry["sumOpenInterest"]),
            })
            .collect();
        points.sort_by_key(|p| p.timestamp);
        if let Some(e) = end {
            points.retain(|p| p.timestamp <= e);
        }

        debug!(symbol, tf = %tf, count = points.len(), "binance OI history fetched");
        Ok(points)
    }

    /// GET /fapi/v1/fundingRate — raw 8-hourly funding events, ascending.
    /// The provider layer forward-fills these onto candle boundaries.
    pub async fn funding_history(
        &self,
        symbol: &str,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<FundingPoint>, EngineError> {
        let mut url = format!(
            "{}/fapi/v1/fundingRate?symbol={}&limit={}",
            self.base_url, symbol, limit
        );
        if let Some(s) = start {
            url.push_str(&format!("&startTime={s}"));
        }
        if let Some(e) = end {
            url.push_str(&format!("&endTime={e}"));
        }

        let body = self.get_json(&url).await?;
        let raw = body
            .as_array()
            .ok_or_else(|| EngineError::Unreliable("funding response is not an array".into()))?;

        let mut points: Vec<FundingPoint> = raw
            .iter()
            .map(|entry| FundingPoint {
                timestamp: entry["fundingTime"].as_i64().unwrap_or(0),
                rate: parse_str_f64(&entry["fundingRate"]),
            })
            .collect();
        points.sort_by_key(|p| p.timestamp);

        debug!(symbol, count = points.len(), "binance funding history fetched");
        Ok(points)
    }

    /// GET /futures/data/takerlongshortRatio — per-period taker buy/sell
    /// volume in quote units.
    pub async fn taker_buy_sell(
        &self,
        symbol: &str,
        tf: Timeframe,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<TakerVolume>, EngineError> {
        let mut url = format!(
            "{}/futures/data/takerlongshortRatio?symbol={}&period={}&limit={}",
            self.base_url,
            symbol,
            tf.code(),
            limit
        );
        if let Some(s) = start {
            url.push_str(&format!("&startTime={s}"));
        }
        if let Some(e) = end {
            url.push_str(&format!("&endTime={e}"));
        }

        let body = self.get_json(&url).await?;
        let raw = body
            .as_array()
            .ok_or_else(|| EngineError::Unreliable("taker response is not an array".into()))?;

        let mut points: Vec<TakerVolume> = raw
            .iter()
            .map(|entry| TakerVolume {
                timestamp: entry["timestamp"].as_i64().unwrap_or(0),
                buy_usd: parse_str_f64(&entry["buyVol"]),
                sell_usd: parse_str_f64(&entry["sellVol"]),
            })
            .collect();
        points.sort_by_key(|p| p.timestamp);
        if let Some(e) = end {
            points.retain(|p| p.timestamp <= e);
        }

        debug!(symbol, tf = %tf, count = points.len(), "binance taker volume fetched");
        Ok(points)
    }
}

impl Default for BinanceFuturesClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Binance encodes numeric values as JSON strings in most payloads.
fn parse_str_f64(val: &serde_json::Value) -> f64 {
    if let Some(s) = val.as_str() {
        s.parse().unwrap_or(0.0)
    } else {
        val.as_f64().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_str_f64_handles_both_encodings() {
        assert_eq!(parse_str_f64(&serde_json::json!("42.5")), 42.5);
        assert_eq!(parse_str_f64(&serde_json::json!(42.5)), 42.5);
        assert_eq!(parse_str_f64(&serde_json::json!(null)), 0.0);
    }
}
