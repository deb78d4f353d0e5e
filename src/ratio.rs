use crate::config::FeedConfig;
use crate::history::{HistoryPersistence, TickHistoryStore};
use crate::model::{MovementCounts, Polarity};

#[derive(Debug, Clone, PartialEq)]
pub struct RatioResult {
    pub feed_name: String,
    pub polarity: Polarity,
    pub up_count: u64,
    pub down_count: u64,
    pub ratio: f64,
    pub rounded_ratio: u64,
    pub threshold: u64,
    pub threshold_exceeded: bool,
}

impl RatioResult {
    /// `1:<rounded>` as shown on the report.
    pub fn display_ratio(&self) -> String {
        format!("1:{}", self.rounded_ratio)
    }
}

/// Derive the polarity-aware ratio for one feed.
///
/// Ascending feeds divide up by down, descending feeds down by up. A zero
/// denominator is treated as 1 and a zero numerator forces the ratio to 0.
/// Rounding is half-to-even, so 2.5 shows as 2 and 3.5 as 4.
pub fn compute(
    feed_name: &str,
    counts: MovementCounts,
    polarity: Polarity,
    threshold: u64,
) -> RatioResult {
    let (numerator, denominator) = match polarity {
        Polarity::Ascending => (counts.up, counts.down),
        Polarity::Descending => (counts.down, counts.up),
    };
    let denominator = denominator.max(1);
    let ratio = if numerator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    };
    let rounded_ratio = ratio.round_ties_even() as u64;

    RatioResult {
        feed_name: feed_name.to_string(),
        polarity,
        up_count: counts.up,
        down_count: counts.down,
        ratio,
        rounded_ratio,
        threshold,
        threshold_exceeded: rounded_ratio >= threshold,
    }
}

/// Ratios for every configured feed: ascending feeds first, then
/// descending, each group in configuration order.
pub fn compute_all<P: HistoryPersistence>(
    feeds: &[FeedConfig],
    store: &TickHistoryStore<P>,
) -> Vec<RatioResult> {
    let mut out = Vec::with_capacity(feeds.len());
    for polarity in [Polarity::Ascending, Polarity::Descending] {
        for feed in feeds.iter().filter(|f| f.polarity == polarity) {
            out.push(compute(
                &feed.name,
                store.counts(&feed.name),
                feed.polarity,
                feed.threshold,
            ));
        }
    }
    out
}
