/// market.rs — Market-data collaborator
///
/// The core consumes prices and candles through the `MarketData` trait;
/// `BinanceMarketData` is the production adapter over the spot REST API.
/// Every call carries the client-level 10 s timeout. Failures surface as
/// `MarketError` and cost the caller one cycle for that symbol, nothing
/// more — retry policy lives on this side of the boundary, not in the core.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::MarketError;
use crate::models::{Candle, Ticker};

#[async_trait]
pub trait MarketData: Send + Sync {
    async fn get_price(&self, symbol: &str) -> Result<Ticker, MarketError>;

    /// Candles ordered ascending by open time. May return fewer than
    /// `limit` when history is short.
    async fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, MarketError>;
}

// ── Binance spot REST adapter ─────────────────────────────────────────────

#[derive(Deserialize)]
struct Ticker24h {
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "priceChangePercent")]
    price_change_percent: String,
    #[serde(rename = "highPrice")]
    high_price: String,
    #[serde(rename = "lowPrice")]
    low_price: String,
    volume: String,
}

pub struct BinanceMarketData {
    client: Client,
    base_url: String,
}

impl BinanceMarketData {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("HTTP client build failed");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl MarketData for BinanceMarketData {
    async fn get_price(&self, symbol: &str) -> Result<Ticker, MarketError> {
        let url = format!("{}/api/v3/ticker/24hr?symbol={}", self.base_url, symbol);
        debug!(symbol, "fetching ticker");

        let resp = self.client.get(&url).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(MarketError::Unavailable {
                symbol: symbol.to_owned(),
                reason: format!("ticker HTTP {}", resp.status()),
            });
        }

        let ticker: Ticker24h = resp.json().await?;
        Ok(Ticker {
            price: parse_f64(&ticker.last_price, "lastPrice")?,
            change_24h: parse_f64(&ticker.price_change_percent, "priceChangePercent")?,
            high_24h: parse_f64(&ticker.high_price, "highPrice")?,
            low_24h: parse_f64(&ticker.low_price, "lowPrice")?,
            volume_24h: parse_f64(&ticker.volume, "volume")?,
        })
    }

    async fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, MarketError> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );
        debug!(symbol, interval, limit, "fetching klines");

        let resp = self.client.get(&url).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(MarketError::Unavailable {
                symbol: symbol.to_owned(),
                reason: format!("klines HTTP {}", resp.status()),
            });
        }

        // Binance returns an array of arrays:
        // [openTime, open, high, low, close, volume, ...]
        let rows: Vec<Vec<Value>> = resp.json().await?;
        rows.iter().map(|row| decode_kline(row)).collect()
    }
}

fn decode_kline(row: &[Value]) -> Result<Candle, MarketError> {
    if row.len() < 6 {
        return Err(MarketError::Malformed(format!(
            "kline row has {} fields, expected at least 6",
            row.len()
        )));
    }

    let open_ms = row[0]
        .as_i64()
        .ok_or_else(|| MarketError::Malformed("openTime is not an integer".into()))?;
    let open_time = Utc
        .timestamp_millis_opt(open_ms)
        .single()
        .ok_or_else(|| MarketError::Malformed(format!("openTime {open_ms} out of range")))?;

    Ok(Candle {
        open_time,
        open: value_f64(&row[1], "open")?,
        high: value_f64(&row[2], "high")?,
        low: value_f64(&row[3], "low")?,
        close: value_f64(&row[4], "close")?,
        volume: value_f64(&row[5], "volume")?,
    })
}

fn value_f64(v: &Value, field: &str) -> Result<f64, MarketError> {
    match v {
        Value::String(s) => parse_f64(s, field),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| MarketError::Malformed(format!("{field} is not a number"))),
        _ => Err(MarketError::Malformed(format!("{field} has wrong type"))),
    }
}

fn parse_f64(s: &str, field: &str) -> Result<f64, MarketError> {
    s.parse::<f64>()
        .map_err(|_| MarketError::Malformed(format!("{field}: cannot parse {s:?} as f64")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_a_kline_row() {
        let row = vec![
            json!(1_717_243_200_000i64),
            json!("68000.10"),
            json!("68500.00"),
            json!("67500.00"),
            json!("68250.55"),
            json!("1234.5"),
        ];
        let c = decode_kline(&row).unwrap();
        assert_eq!(c.close, 68250.55);
        assert_eq!(c.volume, 1234.5);
        assert_eq!(c.open_time.timestamp_millis(), 1_717_243_200_000);
    }

    #[test]
    fn short_row_is_malformed() {
        let row = vec![json!(0i64), json!("1")];
        assert!(matches!(
            decode_kline(&row),
            Err(MarketError::Malformed(_))
        ));
    }

    #[test]
    fn numeric_fields_are_accepted_too() {
        let row = vec![
            json!(0i64),
            json!(1.0),
            json!(2.0),
            json!(0.5),
            json!(1.5),
            json!(10.0),
        ];
        let c = decode_kline(&row).unwrap();
        assert_eq!(c.high, 2.0);
    }
}
