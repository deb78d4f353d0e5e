use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Top-of-book observation for one feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub ask: f64,
    pub bid: f64,
}

impl Quote {
    pub fn new(ask: f64, bid: f64) -> Self {
        Self { ask, bid }
    }

    /// True when either side of the book moved.
    pub fn differs_from(&self, other: &Quote) -> bool {
        self.ask != other.ask || self.bid != other.bid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Movement {
    Up,
    Down,
}

impl Movement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl std::fmt::Display for Movement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which movement direction feeds the ratio numerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Ascending,
    Descending,
}

/// A classified tick as persisted in a feed's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    #[serde(with = "record_time")]
    pub time: NaiveDateTime,
    pub movement: Movement,
    pub ask: f64,
    pub bid: f64,
    pub price_change: f64,
}

impl TickRecord {
    /// Build a record stamped at `time`, truncated to whole seconds so the
    /// persisted form reads back identically.
    pub fn new(time: NaiveDateTime, movement: Movement, quote: Quote, price_change: f64) -> Self {
        let time = time.with_nanosecond(0).unwrap_or(time);
        Self {
            time,
            movement,
            ask: quote.ask,
            bid: quote.bid,
            price_change,
        }
    }

    pub fn quote(&self) -> Quote {
        Quote::new(self.ask, self.bid)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MovementCounts {
    pub up: u64,
    pub down: u64,
}

impl MovementCounts {
    pub fn total(&self) -> u64 {
        self.up + self.down
    }
}

mod record_time {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S>(time: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&time.format(FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom)
    }
}
