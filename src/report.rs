use std::io::Write;

use anyhow::Result;
use crossterm::style::{style, Color, Stylize};

use crate::model::Polarity;
use crate::ratio::RatioResult;

const HEADING: &str = "==== MONITORING ====";
const EXCEEDED_MARKER: &str = " *";

/// Ratios of every feed, emitted after one feed recorded a new tick.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub trigger: String,
    pub ratios: Vec<RatioResult>,
}

impl CycleReport {
    pub fn get(&self, feed_name: &str) -> Option<&RatioResult> {
        self.ratios.iter().find(|r| r.feed_name == feed_name)
    }

    pub fn exceeded(&self) -> impl Iterator<Item = &RatioResult> {
        self.ratios.iter().filter(|r| r.threshold_exceeded)
    }
}

pub trait ReportSink {
    fn report(&mut self, report: &CycleReport) -> Result<()>;
}

/// Prints each report as a heading followed by name / ratio line pairs.
pub struct ConsoleReporter<W: Write> {
    out: W,
    color: bool,
}

impl ConsoleReporter<std::io::Stdout> {
    pub fn stdout(color: bool) -> Self {
        Self::new(std::io::stdout(), color)
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.color {
            style(text).with(color).to_string()
        } else {
            text.to_string()
        }
    }

    fn ratio_line(&self, ratio: &RatioResult) -> String {
        // The "good" side of the ratio is green.
        let (one_color, value_color) = match ratio.polarity {
            Polarity::Ascending => (Color::Red, Color::Green),
            Polarity::Descending => (Color::Green, Color::Red),
        };
        let mut line = format!(
            "{}:{}",
            self.paint("1", one_color),
            self.paint(&ratio.rounded_ratio.to_string(), value_color)
        );
        if ratio.threshold_exceeded {
            line.push_str(&self.paint(EXCEEDED_MARKER, Color::Magenta));
        }
        line
    }
}

impl<W: Write> ReportSink for ConsoleReporter<W> {
    fn report(&mut self, report: &CycleReport) -> Result<()> {
        let mut text = String::new();
        text.push_str(&self.paint(HEADING, Color::Blue));
        text.push('\n');
        for ratio in &report.ratios {
            text.push_str(&self.paint(&ratio.feed_name, Color::Yellow));
            text.push('\n');
            text.push_str(&self.ratio_line(ratio));
            text.push('\n');
        }
        self.out.write_all(text.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }
}
