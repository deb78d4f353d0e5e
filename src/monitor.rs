//! The polling loop that ties feed source, classifier, history, window and
//! ratio engine together.
//!
//! One pass visits every configured feed in order. A feed's first
//! observation in a run only seeds the recent-tick window. Each later quote
//! that differs from the previous one is classified, appended to history,
//! and followed by a report covering every feed. Passes are separated by
//! the configured poll interval.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tokio::sync::watch;

use crate::classifier::classify;
use crate::config::{Config, FeedConfig};
use crate::feed::FeedSource;
use crate::history::{HistoryPersistence, TickHistoryStore};
use crate::model::TickRecord;
use crate::ratio::{compute_all, RatioResult};
use crate::report::{CycleReport, ReportSink};
use crate::window::RecentTickWindow;

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub feeds: Vec<FeedConfig>,
    pub poll_interval: Duration,
    pub window_capacity: usize,
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            feeds: config.feeds.clone(),
            poll_interval: config.monitor.poll_interval(),
            window_capacity: config.monitor.window_capacity,
        }
    }
}

/// What happened to one feed during one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedOutcome {
    Unavailable,
    NoData,
    /// First observation of the run; stored as the delta baseline only.
    Baseline,
    NoUpdate,
    Changed(TickRecord),
}

pub type Clock = fn() -> NaiveDateTime;

fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

pub struct FeedMonitor<S, P, R> {
    settings: MonitorSettings,
    source: S,
    store: TickHistoryStore<P>,
    window: RecentTickWindow,
    sink: R,
    clock: Clock,
}

impl<S, P, R> FeedMonitor<S, P, R>
where
    S: FeedSource,
    P: HistoryPersistence,
    R: ReportSink,
{
    /// Build the monitor and reload every feed's persisted history.
    pub fn new(settings: MonitorSettings, source: S, persistence: P, sink: R) -> Self {
        let mut store = TickHistoryStore::new(persistence);
        for feed in &settings.feeds {
            store.load(&feed.name, &feed.persistence_key);
            let counts = store.counts(&feed.name);
            tracing::info!(
                feed = %feed.name,
                key = %feed.persistence_key,
                records = counts.total(),
                up = counts.up,
                down = counts.down,
                "Loaded tick history"
            );
        }
        let window = RecentTickWindow::new(settings.window_capacity);
        Self {
            settings,
            source,
            store,
            window,
            sink,
            clock: local_now,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &TickHistoryStore<P> {
        &self.store
    }

    pub fn window(&self) -> &RecentTickWindow {
        &self.window
    }

    pub fn sink(&self) -> &R {
        &self.sink
    }

    pub fn ratios(&self) -> Vec<RatioResult> {
        compute_all(&self.settings.feeds, &self.store)
    }

    /// Poll the feed at `index` and act on its latest quote.
    ///
    /// Errors only when a new record cannot be persisted.
    async fn poll_feed(&mut self, index: usize) -> Result<FeedOutcome> {
        let feed = &self.settings.feeds[index];

        if !self.source.is_available(&feed.name).await {
            tracing::warn!(feed = %feed.name, "Symbol not found");
            return Ok(FeedOutcome::Unavailable);
        }
        let Some(quote) = self.source.latest_tick(&feed.name).await else {
            tracing::warn!(feed = %feed.name, "No ticks received");
            return Ok(FeedOutcome::NoData);
        };

        let Some(previous) = self.window.last(&feed.name) else {
            self.window.push(&feed.name, quote);
            tracing::debug!(feed = %feed.name, ask = quote.ask, bid = quote.bid, "Baseline quote");
            return Ok(FeedOutcome::Baseline);
        };
        if !quote.differs_from(&previous) {
            return Ok(FeedOutcome::NoUpdate);
        }

        let price_change = quote.ask - previous.ask;
        let movement = classify(price_change, feed.polarity);
        let record = TickRecord::new((self.clock)(), movement, quote, price_change);
        self.store
            .append(&feed.name, record.clone())
            .with_context(|| format!("failed to persist tick for {}", feed.name))?;
        tracing::debug!(
            feed = %feed.name,
            movement = %movement,
            ask = quote.ask,
            bid = quote.bid,
            price_change,
            "Recorded tick"
        );

        let report = CycleReport {
            trigger: feed.name.clone(),
            ratios: compute_all(&self.settings.feeds, &self.store),
        };
        for ratio in report.exceeded() {
            tracing::info!(
                feed = %ratio.feed_name,
                ratio = %ratio.display_ratio(),
                threshold = ratio.threshold,
                "Ratio threshold reached"
            );
        }
        if let Err(e) = self.sink.report(&report) {
            tracing::warn!(error = %e, "Failed to emit report");
        }

        self.window.push(&feed.name, quote);
        Ok(FeedOutcome::Changed(record))
    }

    /// One full pass over every feed, without the inter-pass delay.
    pub async fn run_cycle(&mut self) -> Result<Vec<FeedOutcome>> {
        let mut outcomes = Vec::with_capacity(self.settings.feeds.len());
        for index in 0..self.settings.feeds.len() {
            outcomes.push(self.poll_feed(index).await?);
        }
        Ok(outcomes)
    }

    /// Poll until `shutdown` flips to true (or its sender is dropped) or a
    /// tick fails to persist. The feed source is released on every exit.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            feeds = self.settings.feeds.len(),
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Monitoring started"
        );
        let result = self.poll_until_shutdown(&mut shutdown).await;
        self.source.release().await;
        match &result {
            Ok(()) => tracing::info!("Monitoring stopped"),
            Err(e) => tracing::error!(error = %format!("{:#}", e), "Monitoring aborted"),
        }
        result
    }

    async fn poll_until_shutdown(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let mut cycle: u64 = 0;
        loop {
            for index in 0..self.settings.feeds.len() {
                if *shutdown.borrow() {
                    return Ok(());
                }
                self.poll_feed(index).await?;
            }
            cycle += 1;
            tracing::trace!(cycle, "Pass complete");

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
