use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink, RefreshOutcome};
use crate::cache::CacheEntry;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableStatus {
    pub table: String,
    pub rows: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub feeds: Vec<CacheEntry>,
    pub tables: Vec<TableStatus>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_outcome(outcome: &RefreshOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    pub fn print_status(report: &StatusReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct HumanOutput;

impl HumanOutput {
    pub fn print_outcome(outcome: &RefreshOutcome) -> io::Result<()> {
        let last_update = outcome
            .last_update()
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        let mut stdout = io::stdout();
        writeln!(stdout, "{}: {}", outcome.status(), outcome.reason())?;
        writeln!(stdout, "last updated on {last_update}")?;
        Ok(())
    }

    pub fn print_status(report: &StatusReport) -> io::Result<()> {
        let mut stdout = io::stdout();
        for feed in &report.feeds {
            match feed.modified {
                Some(at) => writeln!(
                    stdout,
                    "{:<12} {} {}",
                    feed.source,
                    feed.path,
                    at.format("%Y-%m-%d %H:%M:%S")
                )?,
                None => writeln!(stdout, "{:<12} {} not downloaded", feed.source, feed.path)?,
            }
        }
        for table in &report.tables {
            match table.rows {
                Some(rows) => writeln!(stdout, "{:<12} {rows} rows", table.table)?,
                None => writeln!(stdout, "{:<12} not created", table.table)?,
            }
        }
        Ok(())
    }
}

/// Forwards progress events to the log.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(
                elapsed_ms = elapsed.as_millis() as u64,
                "{}",
                event.message
            ),
            None => tracing::info!("{}", event.message),
        }
    }
}
