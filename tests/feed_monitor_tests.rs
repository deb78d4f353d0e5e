use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::watch;

use tick_ratio::config::{Config, FeedConfig};
use tick_ratio::error::AppError;
use tick_ratio::feed::{FeedSource, ReplayFeed};
use tick_ratio::history::{HistoryPersistence, JsonFileHistory, MemoryHistory};
use tick_ratio::model::{Movement, Polarity, Quote, TickRecord};
use tick_ratio::monitor::{FeedMonitor, FeedOutcome, MonitorSettings};
use tick_ratio::report::{CycleReport, ReportSink};

#[derive(Default)]
struct RecordingSink {
    reports: Vec<CycleReport>,
}

impl ReportSink for RecordingSink {
    fn report(&mut self, report: &CycleReport) -> Result<()> {
        self.reports.push(report.clone());
        Ok(())
    }
}

struct RejectingHistory;

impl HistoryPersistence for RejectingHistory {
    fn read(&self, key: &str) -> Result<Vec<TickRecord>, AppError> {
        Err(AppError::NotFound(key.to_string()))
    }

    fn write(&self, _key: &str, _records: &[TickRecord]) -> Result<(), AppError> {
        Err(AppError::Io(std::io::Error::other("disk full")))
    }
}

/// Source that raises the shutdown flag while serving `stop_on`'s tick and
/// remembers which feeds it was asked about.
struct InterruptingSource {
    shutdown: watch::Sender<bool>,
    stop_on: String,
    polled: Mutex<Vec<String>>,
    released: AtomicBool,
}

impl InterruptingSource {
    fn new(shutdown: watch::Sender<bool>, stop_on: &str) -> Self {
        Self {
            shutdown,
            stop_on: stop_on.to_string(),
            polled: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
        }
    }

    fn polled(&self) -> Vec<String> {
        self.polled.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedSource for InterruptingSource {
    async fn is_available(&self, feed: &str) -> bool {
        self.polled.lock().unwrap().push(feed.to_string());
        true
    }

    async fn latest_tick(&self, feed: &str) -> Option<Quote> {
        if feed == self.stop_on {
            let _ = self.shutdown.send(true);
        }
        Some(Quote::new(1.0, 1.0))
    }

    async fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

fn fixed_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(3, 4, 5)
        .unwrap()
}

fn feed(name: &str, key: &str, threshold: u64, polarity: Polarity) -> FeedConfig {
    FeedConfig {
        name: name.to_string(),
        persistence_key: key.to_string(),
        threshold,
        polarity,
    }
}

fn settings(feeds: Vec<FeedConfig>) -> MonitorSettings {
    MonitorSettings {
        feeds,
        poll_interval: Duration::from_millis(5),
        window_capacity: 1000,
    }
}

fn temp_history_dir(test_name: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be monotonic")
        .as_nanos();
    std::env::temp_dir().join(format!("tick-ratio-{}-{}", test_name, ts))
}

#[tokio::test]
/// Verifies the documented end-to-end scenario: asks 100.0 (baseline),
/// 100.5 (up), 100.4 (down), 100.9 (up) give up=2, down=1, ratio 1:2 and no
/// threshold flag at 300.
async fn ascending_feed_end_to_end() {
    let source = ReplayFeed::new().with_asks("X", &[100.0, 100.5, 100.4, 100.9]);
    let mut monitor = FeedMonitor::new(
        settings(vec![feed("X", "x.json", 300, Polarity::Ascending)]),
        source,
        MemoryHistory::new(),
        RecordingSink::default(),
    )
    .with_clock(fixed_time);

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        outcomes.extend(monitor.run_cycle().await.expect("cycle should succeed"));
    }

    assert_eq!(outcomes[0], FeedOutcome::Baseline);
    let movements: Vec<Movement> = outcomes[1..]
        .iter()
        .map(|o| match o {
            FeedOutcome::Changed(r) => r.movement,
            other => panic!("expected a recorded tick, got {other:?}"),
        })
        .collect();
    assert_eq!(movements, vec![Movement::Up, Movement::Down, Movement::Up]);

    let counts = monitor.store().counts("X");
    assert_eq!((counts.up, counts.down), (2, 1));

    let ratios = monitor.ratios();
    let ratio = &ratios[0];
    assert_eq!(ratio.ratio, 2.0);
    assert_eq!(ratio.rounded_ratio, 2);
    assert!(!ratio.threshold_exceeded);
    assert_eq!(ratio.display_ratio(), "1:2");

    let last = monitor.sink().reports.last().expect("report expected");
    assert_eq!(last.get("X"), Some(ratio));
    assert_eq!(monitor.sink().reports.len(), 3);
}

#[tokio::test]
/// Verifies the recorded price change is new ask minus previous ask and the
/// record carries the new quote.
async fn price_change_uses_ask_delta() {
    let source = ReplayFeed::new().with_feed(
        "X",
        vec![Quote::new(10.0, 9.0), Quote::new(10.25, 9.5)],
    );
    let mut monitor = FeedMonitor::new(
        settings(vec![feed("X", "x.json", 10, Polarity::Ascending)]),
        source,
        MemoryHistory::new(),
        RecordingSink::default(),
    )
    .with_clock(fixed_time);

    monitor.run_cycle().await.unwrap();
    monitor.run_cycle().await.unwrap();

    let records = monitor.store().records("X");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].price_change, 0.25);
    assert_eq!(records[0].quote(), Quote::new(10.25, 9.5));
    assert_eq!(records[0].time, fixed_time());
}

#[tokio::test]
/// Verifies bid-only moves are recorded: the ask delta is zero, so the
/// zero-change polarity rule decides the movement.
async fn bid_only_change_uses_zero_delta_rule() {
    let quotes = vec![Quote::new(50.0, 49.0), Quote::new(50.0, 49.5)];
    let source = ReplayFeed::new()
        .with_feed("C", quotes.clone())
        .with_feed("B", quotes);
    let mut monitor = FeedMonitor::new(
        settings(vec![
            feed("C", "c.json", 10, Polarity::Ascending),
            feed("B", "b.json", 10, Polarity::Descending),
        ]),
        source,
        MemoryHistory::new(),
        RecordingSink::default(),
    );

    monitor.run_cycle().await.unwrap();
    let outcomes = monitor.run_cycle().await.unwrap();

    match (&outcomes[0], &outcomes[1]) {
        (FeedOutcome::Changed(c), FeedOutcome::Changed(b)) => {
            assert_eq!(c.price_change, 0.0);
            assert_eq!(c.movement, Movement::Down);
            assert_eq!(b.movement, Movement::Up);
        }
        other => panic!("expected two recorded ticks, got {other:?}"),
    }
}

#[tokio::test]
/// Verifies the reporting contract: a tick on one feed reports every feed,
/// ascending group first, and unchanged quotes produce no report.
async fn one_tick_reports_all_feeds() {
    let source = ReplayFeed::new()
        .with_asks("Boom", &[20.0, 20.0, 20.0])
        .with_asks("Crash", &[10.0, 10.0, 10.5]);
    let mut monitor = FeedMonitor::new(
        settings(vec![
            feed("Boom", "b.json", 5, Polarity::Descending),
            feed("Crash", "c.json", 5, Polarity::Ascending),
        ]),
        source,
        MemoryHistory::new(),
        RecordingSink::default(),
    );

    assert_eq!(
        monitor.run_cycle().await.unwrap(),
        vec![FeedOutcome::Baseline, FeedOutcome::Baseline]
    );
    assert_eq!(
        monitor.run_cycle().await.unwrap(),
        vec![FeedOutcome::NoUpdate, FeedOutcome::NoUpdate]
    );
    assert!(monitor.sink().reports.is_empty());

    monitor.run_cycle().await.unwrap();
    let reports = &monitor.sink().reports;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].trigger, "Crash");
    let names: Vec<&str> = reports[0].ratios.iter().map(|r| r.feed_name.as_str()).collect();
    assert_eq!(names, vec!["Crash", "Boom"]);
}

#[tokio::test]
/// Verifies unavailable and silent feeds are skipped without stopping the
/// pass and without touching history or the window.
async fn unavailable_and_silent_feeds_are_skipped() {
    let source = ReplayFeed::new()
        .with_feed("Silent", Vec::new())
        .with_asks("Live", &[1.0, 2.0]);
    let mut monitor = FeedMonitor::new(
        settings(vec![
            feed("Missing", "m.json", 5, Polarity::Ascending),
            feed("Silent", "s.json", 5, Polarity::Ascending),
            feed("Live", "l.json", 5, Polarity::Ascending),
        ]),
        source,
        MemoryHistory::new(),
        RecordingSink::default(),
    );

    let first = monitor.run_cycle().await.unwrap();
    assert_eq!(
        first,
        vec![FeedOutcome::Unavailable, FeedOutcome::NoData, FeedOutcome::Baseline]
    );
    let second = monitor.run_cycle().await.unwrap();
    assert!(matches!(second[2], FeedOutcome::Changed(_)));
    assert!(monitor.window().is_empty("Missing"));
    assert!(monitor.window().is_empty("Silent"));
    assert!(monitor.store().is_empty("Missing"));
    assert_eq!(monitor.sink().reports[0].ratios.len(), 3);
}

#[tokio::test]
/// Verifies restart continuity through the monitor: persisted counts are
/// reloaded, the first quote after restart is only a baseline, and the next
/// up tick extends the stored history.
async fn restart_resumes_from_persisted_history() {
    let backend = MemoryHistory::new();
    let seed: Vec<TickRecord> = [Movement::Up, Movement::Up, Movement::Down, Movement::Up]
        .into_iter()
        .map(|m| TickRecord::new(fixed_time(), m, Quote::new(1.0, 1.0), 0.1))
        .collect();
    backend.write("c3.json", &seed).unwrap();

    let source = ReplayFeed::new().with_asks("Crash 300 Index", &[7.0, 7.5]);
    let mut monitor = FeedMonitor::new(
        settings(vec![feed("Crash 300 Index", "c3.json", 300, Polarity::Ascending)]),
        source,
        backend.clone(),
        RecordingSink::default(),
    );
    assert_eq!(monitor.store().len("Crash 300 Index"), 4);

    assert_eq!(monitor.run_cycle().await.unwrap(), vec![FeedOutcome::Baseline]);
    assert_eq!(monitor.store().len("Crash 300 Index"), 4);

    monitor.run_cycle().await.unwrap();
    let counts = monitor.store().counts("Crash 300 Index");
    assert_eq!((counts.up, counts.down), (4, 1));
    assert_eq!(backend.read("c3.json").unwrap().len(), 5);
}

#[tokio::test]
/// Verifies file-backed persistence stays in lock-step with memory while
/// the loop runs.
async fn file_backed_history_matches_memory() {
    let dir = temp_history_dir("monitor-file");
    let persistence = JsonFileHistory::open(&dir).expect("open dir");
    let source = ReplayFeed::new().with_asks("B", &[30.0, 29.5, 29.5, 29.75, 29.0]);
    let mut monitor = FeedMonitor::new(
        settings(vec![feed("B", "b5.json", 2, Polarity::Descending)]),
        source,
        persistence.clone(),
        RecordingSink::default(),
    )
    .with_clock(fixed_time);

    for _ in 0..5 {
        monitor.run_cycle().await.unwrap();
        assert_eq!(
            persistence.read("b5.json").map(|r| r.len()).unwrap_or(0),
            monitor.store().len("B")
        );
    }

    // down, up, down: ratio 2/1 on a descending feed reaches its threshold.
    let ratios = monitor.ratios();
    let ratio = &ratios[0];
    assert_eq!((ratio.up_count, ratio.down_count), (1, 2));
    assert!(ratio.threshold_exceeded);
    assert_eq!(persistence.read("b5.json").unwrap(), monitor.store().records("B"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
/// Verifies cooperative cancellation: the loop stops after a shutdown signal,
/// releases the feed source, and keeps what it already persisted.
async fn run_stops_on_shutdown_and_releases_source() {
    let backend = MemoryHistory::new();
    let source = ReplayFeed::new().with_asks("X", &[1.0, 1.5, 1.25, 2.0]);
    let mut monitor = FeedMonitor::new(
        settings(vec![feed("X", "x.json", 10, Polarity::Ascending)]),
        source,
        backend.clone(),
        RecordingSink::default(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stop = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(true).expect("monitor should be listening");
    };
    let (result, ()) = tokio::join!(monitor.run(shutdown_rx), stop);

    result.expect("run should stop cleanly");
    assert!(monitor.source().is_released());
    assert_eq!(monitor.store().len("X"), 3);
    assert_eq!(backend.read("x.json").unwrap().len(), 3);
}

#[tokio::test]
/// Verifies a shutdown raised before the loop starts prevents any polling.
async fn pre_signalled_shutdown_polls_nothing() {
    let source = ReplayFeed::new().with_asks("X", &[1.0, 2.0]);
    let mut monitor = FeedMonitor::new(
        settings(vec![feed("X", "x.json", 10, Polarity::Ascending)]),
        source,
        MemoryHistory::new(),
        RecordingSink::default(),
    );
    let (_shutdown_tx, shutdown_rx) = watch::channel(true);

    monitor.run(shutdown_rx).await.unwrap();
    assert!(monitor.source().is_released());
    assert_eq!(monitor.source().remaining("X"), 2);
}

#[tokio::test]
/// Verifies a persistence failure ends the loop with an error, releases the
/// source, and leaves neither history nor window advanced.
async fn persistence_failure_aborts_run() {
    let source = ReplayFeed::new().with_asks("X", &[1.0, 2.0, 3.0]);
    let mut monitor = FeedMonitor::new(
        settings(vec![feed("X", "x.json", 10, Polarity::Ascending)]),
        source,
        RejectingHistory,
        RecordingSink::default(),
    );
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let err = monitor
        .run(shutdown_rx)
        .await
        .expect_err("write failure must surface");
    assert!(format!("{:#}", err).contains("disk full"));
    assert!(monitor.source().is_released());
    assert_eq!(monitor.store().len("X"), 0);
    assert_eq!(monitor.window().last("X"), Some(Quote::new(1.0, 1.0)));
    assert!(monitor.sink().reports.is_empty());
}

#[tokio::test]
/// Verifies the shipped replay demo: the crash-style feed runs 5 up / 1 down
/// and trips its threshold, the boom-style feed (including a bid-only move
/// counted as up) stays below it.
async fn shipped_replay_demo_produces_expected_ratios() {
    let config = Config::from_path(Path::new("config/replay.toml")).unwrap();
    let replay_path = config.source.replay_path.clone().expect("replay path");
    let source = ReplayFeed::from_file(&replay_path).expect("demo replay should load");
    let mut monitor = FeedMonitor::new(
        MonitorSettings::from_config(&config),
        source,
        MemoryHistory::new(),
        RecordingSink::default(),
    )
    .with_clock(fixed_time);

    for _ in 0..8 {
        monitor.run_cycle().await.unwrap();
    }

    let ratios = monitor.ratios();
    let crash = &ratios[0];
    assert_eq!(crash.feed_name, "Crash 300 Index");
    assert_eq!((crash.up_count, crash.down_count), (5, 1));
    assert!(crash.threshold_exceeded);

    let boom = &ratios[1];
    assert_eq!(boom.feed_name, "Boom 300 Index");
    assert_eq!((boom.up_count, boom.down_count), (2, 4));
    assert_eq!(boom.display_ratio(), "1:2");
    assert!(!boom.threshold_exceeded);
}

#[tokio::test(start_paused = true)]
/// Verifies the poll interval separates full passes, not individual feeds:
/// with a 100 ms interval and a stop at 250 ms, passes run at 0, 100 and
/// 200 ms, so every feed has one baseline and exactly two recorded ticks.
async fn poll_interval_applies_once_per_pass() {
    let asks = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let source = ReplayFeed::new()
        .with_asks("A", &asks)
        .with_asks("B", &asks)
        .with_asks("C", &asks);
    let mut monitor = FeedMonitor::new(
        MonitorSettings {
            feeds: vec![
                feed("A", "a.json", 10, Polarity::Ascending),
                feed("B", "b.json", 10, Polarity::Ascending),
                feed("C", "c.json", 10, Polarity::Descending),
            ],
            poll_interval: Duration::from_millis(100),
            window_capacity: 1000,
        },
        source,
        MemoryHistory::new(),
        RecordingSink::default(),
    )
    .with_clock(fixed_time);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stop = async {
        tokio::time::sleep(Duration::from_millis(250)).await;
        shutdown_tx.send(true).expect("monitor should be listening");
    };
    let (result, ()) = tokio::join!(monitor.run(shutdown_rx), stop);

    result.expect("run should stop cleanly");
    for name in ["A", "B", "C"] {
        assert_eq!(monitor.store().len(name), 2, "feed {name}");
        assert_eq!(monitor.source().remaining(name), 3, "feed {name}");
    }
    assert_eq!(monitor.sink().reports.len(), 6);
}

#[tokio::test]
/// Verifies the per-feed safe point: a shutdown raised while the first feed
/// is being polled stops the pass before the second feed is touched, and
/// the source is still released.
async fn shutdown_mid_pass_skips_remaining_feeds() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let source = InterruptingSource::new(shutdown_tx, "First");
    let mut monitor = FeedMonitor::new(
        settings(vec![
            feed("First", "first.json", 10, Polarity::Ascending),
            feed("Second", "second.json", 10, Polarity::Descending),
        ]),
        source,
        MemoryHistory::new(),
        RecordingSink::default(),
    );

    monitor.run(shutdown_rx).await.expect("run should stop cleanly");
    assert_eq!(monitor.source().polled(), vec!["First".to_string()]);
    assert!(monitor.source().released.load(Ordering::SeqCst));
    assert_eq!(monitor.window().len("First"), 1);
    assert!(monitor.window().is_empty("Second"));
}
