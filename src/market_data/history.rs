// =============================================================================
// Historical Store — in-memory series store backing replay and tests
// =============================================================================
//
// Holds full candle/OI/funding/taker series per (exchange, symbol, timeframe)
// and serves them through the same `DataProvider` contract as the live
// clients, including the end-cutoff clamp. Series are kept sorted and
// de-duplicated on insert.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::errors::EngineError;
use crate::market_data::{
    clamp_to_cutoff, Candle, DataProvider, FundingPoint, OiPoint, TakerVolume,
};
use crate::types::{Exchange, Timeframe};

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct SeriesKey {
    exchange: Exchange,
    symbol: String,
    timeframe: Timeframe,
}

#[derive(Default)]
struct SeriesData {
    candles: Vec<Candle>,
    oi: Vec<OiPoint>,
    funding: Vec<FundingPoint>,
    taker: Vec<TakerVolume>,
}

/// Thread-safe in-memory historical data store.
#[derive(Default)]
pub struct HistoricalStore {
    inner: RwLock<HashMap<SeriesKey, SeriesData>>,
}

impl HistoricalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(exchange: Exchange, symbol: &str, tf: Timeframe) -> SeriesKey {
        SeriesKey {
            exchange,
            symbol: symbol.to_string(),
            timeframe: tf,
        }
    }

    pub fn insert_candles(
        &self,
        exchange: Exchange,
        symbol: &str,
        tf: Timeframe,
        mut candles: Vec<Candle>,
    ) {
        let mut map = self.inner.write();
        let data = map.entry(Self::key(exchange, symbol, tf)).or_default();
        data.candles.append(&mut candles);
        data.candles.sort_by_key(|c| c.timestamp);
        data.candles.dedup_by_key(|c| c.timestamp);
    }

    pub fn insert_oi(&self, exchange: Exchange, symbol: &str, tf: Timeframe, mut oi: Vec<OiPoint>) {
        let mut map = self.inner.write();
        let data = map.entry(Self::key(exchange, symbol, tf)).or_default();
        data.oi.append(&mut oi);
        data.oi.sort_by_key(|p| p.timestamp);
        data.oi.dedup_by_key(|p| p.timestamp);
    }

    pub fn insert_funding(
        &self,
        exchange: Exchange,
        symbol: &str,
        tf: Timeframe,
        mut funding: Vec<FundingPoint>,
    ) {
        let mut map = self.inner.write();
        let data = map.entry(Self::key(exchange, symbol, tf)).or_default();
        data.funding.append(&mut funding);
        data.funding.sort_by_key(|p| p.timestamp);
        data.funding.dedup_by_key(|p| p.timestamp);
    }

    pub fn insert_taker(
        &self,
        exchange: Exchange,
        symbol: &str,
        tf: Timeframe,
        mut taker: Vec<TakerVolume>,
    ) {
        let mut map = self.inner.write();
        let data = map.entry(Self::key(exchange, symbol, tf)).or_default();
        data.taker.append(&mut taker);
        data.taker.sort_by_key(|p| p.timestamp);
        data.taker.dedup_by_key(|p| p.timestamp);
    }

    pub fn candle_count(&self, exchange: Exchange, symbol: &str, tf: Timeframe) -> usize {
        self.inner
            .read()
            .get(&Self::key(exchange, symbol, tf))
            .map_or(0, |d| d.candles.len())
    }
}

fn window<T: Copy>(
    series: &[T],
    ts: impl Fn(&T) -> i64,
    step: i64,
    limit: usize,
    start: Option<i64>,
    end: Option<i64>,
) -> Vec<T> {
    let mut out: Vec<T> = series
        .iter()
        .filter(|item| start.map_or(true, |s| ts(item) >= s))
        .copied()
        .collect();
    if let Some(e) = end {
        out = clamp_to_cutoff(out, &ts, step, e);
    }
    if out.len() > limit {
        out.drain(..out.len() - limit);
    }
    out
}

#[async_trait]
impl DataProvider for HistoricalStore {
    async fn get_price_history(
        &self,
        exchange: Exchange,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<Candle>, EngineError> {
        let map = self.inner.read();
        let data = map
            .get(&Self::key(exchange, symbol, interval))
            .ok_or_else(|| {
                EngineError::InsufficientData(format!(
                    "no historical candles for {exchange}/{symbol}/{interval}"
                ))
            })?;
        Ok(window(
            &data.candles,
            |c| c.timestamp,
            interval.interval_ms(),
            limit,
            start,
            end,
        ))
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
        let map = self.inner.read();
        let data = map.get(&Self::key(exchange, symbol, interval));
        Ok(data.map_or_else(Vec::new, |d| {
            window(&d.oi, |p| p.timestamp, 0, limit, start, end)
        }))
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
        let map = self.inner.read();
        let data = map.get(&Self::key(exchange, symbol, interval));
        Ok(data.map_or_else(Vec::new, |d| {
            window(&d.funding, |p| p.timestamp, 0, limit, start, end)
        }))
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
        let map = self.inner.read();
        let data = map.get(&Self::key(exchange, symbol, interval));
        Ok(data.map_or_else(Vec::new, |d| {
            window(
                &d.taker,
                |p| p.timestamp,
                interval.interval_ms(),
                limit,
                start,
                end,
            )
        }))
    }
}
