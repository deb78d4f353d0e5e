use std::collections::{HashMap, VecDeque};

use crate::model::Quote;

/// Bounded most-recent-N quotes per feed, used only to find the previous
/// observation when computing a delta.
#[derive(Debug, Clone)]
pub struct RecentTickWindow {
    capacity: usize,
    buffers: HashMap<String, VecDeque<Quote>>,
}

impl RecentTickWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "window capacity must be > 0");
        Self {
            capacity,
            buffers: HashMap::new(),
        }
    }

    /// Insert at the newest end, evicting the oldest quote when full.
    pub fn push(&mut self, feed: &str, quote: Quote) {
        let capacity = self.capacity;
        let buffer = self
            .buffers
            .entry(feed.to_string())
            .or_insert_with(|| VecDeque::with_capacity(capacity.min(64)));
        if buffer.len() >= capacity {
            buffer.pop_front();
        }
        buffer.push_back(quote);
    }

    /// Most recent quote, or `None` before the first observation of the run.
    pub fn last(&self, feed: &str) -> Option<Quote> {
        self.buffers.get(feed).and_then(|b| b.back().copied())
    }

    pub fn len(&self, feed: &str) -> usize {
        self.buffers.get(feed).map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self, feed: &str) -> bool {
        self.len(feed) == 0
    }

    /// Oldest first.
    pub fn entries(&self, feed: &str) -> Vec<Quote> {
        self.buffers
            .get(feed)
            .map(|b| b.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
