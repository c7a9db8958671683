// =============================================================================
// Live Provider — venue dispatch, pacing, and funding resampling
// =============================================================================
//
// Single `DataProvider` over both live REST clients. Every outbound call
// passes through the rolling-window rate limiter; an upstream 429 triggers
// the limiter cooldown and one retry. Raw 8-hourly funding events are
// forward-filled onto candle boundaries so downstream consumers always see a
// series aligned with the price series.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::errors::EngineError;
use crate::market_data::binance::BinanceFuturesClient;
use crate::market_data::bybit::BybitClient;
use crate::market_data::{Candle, DataProvider, FundingPoint, OiPoint, RateLimiter, TakerVolume};
use crate::types::{Exchange, Timeframe};

/// Live market-data provider spanning both venues.
pub struct LiveProvider {
    binance: BinanceFuturesClient,
    bybit: BybitClient,
    limiter: Arc<RateLimiter>,
}

impl LiveProvider {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            binance: BinanceFuturesClient::new(),
            bybit: BybitClient::new(),
            limiter,
        }
    }

    pub fn with_clients(
        binance: BinanceFuturesClient,
        bybit: BybitClient,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            binance,
            bybit,
            limiter,
        }
    }

    /// Run `op` under the limiter; on 429 penalize, wait, retry once.
    async fn paced<T, F, Fut>(&self, op: F) -> Result<T, EngineError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, EngineError>>,
    {
        self.limiter.acquire().await;
        match op().await {
            Err(EngineError::RateLimited(msg)) => {
                warn!(%msg, "rate limited — cooling down and retrying once");
                self.limiter.penalize();
                self.limiter.acquire().await;
                op().await
            }
            other => other,
        }
    }
}

/// Forward-fill raw funding events onto interval boundaries ending at the
/// last closed boundary before `end`. Boundaries before the first event carry
/// the first known rate.
pub fn forward_fill_funding(
    events: &[FundingPoint],
    tf: Timeframe,
    limit: usize,
    end: i64,
) -> Vec<FundingPoint> {
    if events.is_empty() || limit == 0 {
        return Vec::new();
    }
    let step = tf.interval_ms();
    let last_open = end.div_euclid(step) * step - step;
    let first_open = last_open - (limit.saturating_sub(1) as i64) * step;

    let mut out = Vec::with_capacity(limit);
    let mut idx = 0usize;
    let mut current = events[0].rate;
    let mut ts = first_open;
    while ts <= last_open {
        while idx < events.len() && events[idx].timestamp <= ts {
            current = events[idx].rate;
            idx += 1;
        }
        out.push(FundingPoint {
            timestamp: ts,
            rate: current,
        });
        ts += step;
    }
    out
}

#[async_trait]
impl DataProvider for LiveProvider {
    async fn get_price_history(
        &self,
        exchange: Exchange,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<Candle>, EngineError> {
        match exchange {
            Exchange::Binance => {
                self.paced(|| self.binance.klines(symbol, interval, limit, start, end))
                    .await
            }
            Exchange::Bybit => {
                self.paced(|| self.bybit.klines(symbol, interval, limit, start, end))
                    .await
            }
        }
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
        match exchange {
            Exchange::Binance => {
                self.paced(|| self.binance.open_interest_hist(symbol, interval, limit, start, end))
                    .await
            }
            Exchange::Bybit => {
                self.paced(|| self.bybit.open_interest_hist(symbol, interval, limit, start, end))
                    .await
            }
        }
    }

    async fn get_funding_history(
        &self,
        exchange: Exchange,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<FundingPoint>, EngineError> {
        // Raw events arrive at the venue's 8 h cadence; fetch a window wide
        // enough to cover `limit` boundaries and forward-fill.
        let raw_limit = 1000;
        let events = match exchange {
            Exchange::Binance => {
                self.paced(|| self.binance.funding_history(symbol, raw_limit, start, end))
                    .await?
            }
            Exchange::Bybit => {
                self.paced(|| self.bybit.funding_history(symbol, raw_limit, start, end))
                    .await?
            }
        };
        let end_ms = end.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        Ok(forward_fill_funding(&events, interval, limit, end_ms))
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
        match exchange {
            Exchange::Binance => {
                self.paced(|| self.binance.taker_buy_sell(symbol, interval, limit, start, end))
                    .await
            }
            Exchange::Bybit => {
                self.paced(|| self.bybit.taker_buy_sell(symbol, interval, limit, start, end))
                    .await
            }
        }
    }
}
