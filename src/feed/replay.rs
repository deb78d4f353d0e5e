use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::FeedSource;
use crate::model::Quote;

#[derive(Debug)]
struct Cursor {
    quotes: Vec<Quote>,
    next: usize,
}

/// Deterministic source that plays back a fixed quote sequence per feed.
///
/// Each `latest_tick` call advances one step; once a sequence is exhausted
/// its final quote is repeated, which the monitor sees as "no update".
/// Feeds without a sequence report as unavailable.
#[derive(Debug, Default)]
pub struct ReplayFeed {
    cursors: Mutex<HashMap<String, Cursor>>,
    released: AtomicBool,
}

impl ReplayFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(self, feed: &str, quotes: Vec<Quote>) -> Self {
        if let Ok(mut guard) = self.cursors.lock() {
            guard.insert(feed.to_string(), Cursor { quotes, next: 0 });
        }
        self
    }

    /// Convenience for sequences where only the ask matters.
    pub fn with_asks(self, feed: &str, asks: &[f64]) -> Self {
        let quotes = asks.iter().map(|&ask| Quote::new(ask, ask)).collect();
        self.with_feed(feed, quotes)
    }

    /// Load `{"FEED": [{"ask": .., "bid": ..}, ..], ..}`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let payload = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let feeds: HashMap<String, Vec<Quote>> =
            serde_json::from_str(&payload).context("failed to parse replay json")?;
        Ok(feeds
            .into_iter()
            .fold(Self::new(), |source, (feed, quotes)| source.with_feed(&feed, quotes)))
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Remaining un-played quotes for `feed`.
    pub fn remaining(&self, feed: &str) -> usize {
        self.cursors
            .lock()
            .ok()
            .and_then(|guard| {
                guard
                    .get(feed)
                    .map(|c| c.quotes.len().saturating_sub(c.next))
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl FeedSource for ReplayFeed {
    async fn is_available(&self, feed: &str) -> bool {
        if self.is_released() {
            return false;
        }
        self.cursors
            .lock()
            .map(|guard| guard.contains_key(feed))
            .unwrap_or(false)
    }

    async fn latest_tick(&self, feed: &str) -> Option<Quote> {
        if self.is_released() {
            return None;
        }
        let mut guard = self.cursors.lock().ok()?;
        let cursor = guard.get_mut(feed)?;
        let last = cursor.quotes.len().checked_sub(1)?;
        let quote = cursor.quotes[cursor.next.min(last)];
        if cursor.next < cursor.quotes.len() {
            cursor.next += 1;
        }
        Some(quote)
    }

    async fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}
