pub mod binance;
pub mod replay;

use async_trait::async_trait;

use crate::model::Quote;

pub use binance::BinanceBookTicker;
pub use replay::ReplayFeed;

/// Polled market-data source. Failures surface as "unavailable" or "no
/// tick" so that one bad feed never stops the monitor.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn is_available(&self, feed: &str) -> bool;

    async fn latest_tick(&self, feed: &str) -> Option<Quote>;

    /// Release the underlying connection. Called once when monitoring stops.
    async fn release(&self);
}
