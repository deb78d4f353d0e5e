use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;

use super::FeedSource;
use crate::error::AppError;
use crate::model::Quote;

/// Deserialize Binance string-encoded numbers to f64.
pub fn string_to_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse::<f64>().map_err(serde::de::Error::custom)
}

/// GET /api/v3/ticker/bookTicker
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookTickerResponse {
    pub symbol: String,
    #[serde(deserialize_with = "string_to_f64")]
    pub bid_price: f64,
    #[serde(deserialize_with = "string_to_f64")]
    pub ask_price: f64,
}

/// GET /api/v3/exchangeInfo (only the fields needed for availability).
#[derive(Debug, Deserialize)]
pub struct ExchangeInfoResponse {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

/// Polls best bid/ask from the public Binance spot REST API.
pub struct BinanceBookTicker {
    http: reqwest::Client,
    base_url: String,
    availability_ttl: Duration,
    availability: Mutex<HashMap<String, (bool, Instant)>>,
    released: AtomicBool,
}

impl BinanceBookTicker {
    pub fn new(base_url: &str, availability_ttl: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            availability_ttl,
            availability: Mutex::new(HashMap::new()),
            released: AtomicBool::new(false),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, AppError> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(err) => AppError::Exchange {
                    status: status.as_u16(),
                    code: err.code,
                    msg: err.msg,
                },
                Err(_) => AppError::Exchange {
                    status: status.as_u16(),
                    code: i64::from(status.as_u16()),
                    msg: body,
                },
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn symbol_status(&self, symbol: &str) -> Result<Option<String>, AppError> {
        let url = format!("{}/api/v3/exchangeInfo?symbol={}", self.base_url, symbol);
        let info: ExchangeInfoResponse = self.get_json(&url).await?;
        Ok(info
            .symbols
            .into_iter()
            .find(|s| s.symbol.eq_ignore_ascii_case(symbol))
            .map(|s| s.status))
    }

    pub async fn book_ticker(&self, symbol: &str) -> Result<BookTickerResponse, AppError> {
        let url = format!("{}/api/v3/ticker/bookTicker?symbol={}", self.base_url, symbol);
        self.get_json(&url).await
    }

    fn cached_availability(&self, symbol: &str) -> Option<bool> {
        let guard = self.availability.lock().ok()?;
        let (available, checked_at) = guard.get(symbol)?;
        (checked_at.elapsed() < self.availability_ttl).then_some(*available)
    }

    fn store_availability(&self, symbol: &str, available: bool) {
        if let Ok(mut guard) = self.availability.lock() {
            guard.insert(symbol.to_string(), (available, Instant::now()));
        }
    }
}

/// Client errors other than throttling and timeouts mean the exchange
/// refused this symbol, which is worth caching.
fn rejects_symbol(status: u16) -> bool {
    (400..500).contains(&status) && !matches!(status, 408 | 418 | 429)
}

#[async_trait]
impl FeedSource for BinanceBookTicker {
    async fn is_available(&self, feed: &str) -> bool {
        if self.released.load(Ordering::Relaxed) {
            return false;
        }
        if let Some(available) = self.cached_availability(feed) {
            return available;
        }
        let available = match self.symbol_status(feed).await {
            Ok(Some(status)) => status == "TRADING",
            Ok(None) => false,
            Err(AppError::Exchange { status, code, msg }) if rejects_symbol(status) => {
                tracing::debug!(symbol = feed, status, code, msg = %msg, "Symbol lookup rejected");
                false
            }
            Err(e) => {
                // Outages, rate limits and transport failures say nothing
                // about the symbol; retry next cycle.
                tracing::warn!(symbol = feed, error = %e, "exchangeInfo request failed");
                return false;
            }
        };
        self.store_availability(feed, available);
        available
    }

    async fn latest_tick(&self, feed: &str) -> Option<Quote> {
        if self.released.load(Ordering::Relaxed) {
            return None;
        }
        match self.book_ticker(feed).await {
            Ok(ticker) => Some(Quote::new(ticker.ask_price, ticker.bid_price)),
            Err(e) => {
                tracing::debug!(symbol = feed, error = %e, "bookTicker request failed");
                None
            }
        }
    }

    async fn release(&self) {
        if !self.released.swap(true, Ordering::Relaxed) {
            if let Ok(mut guard) = self.availability.lock() {
                guard.clear();
            }
            tracing::info!(base_url = %self.base_url, "Released Binance feed source");
        }
    }
}
