//! pytest-benchmark report ingestion.
//!
//! Reads the JSON written by `pytest --benchmark-json=<file>` and turns each
//! benchmark into a [`Measurement`] using the same text conventions as the
//! published history: throughput in `iter/sec`, `stddev: <s>` as the range,
//! and a two-line `mean: <m> <unit>` / `rounds: <n>` annotation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::HistoryError;
use crate::schema::{Commit, Extra, Measurement, Run};

pub const TOOL: &str = "pytest";
pub const UNIT: &str = "iter/sec";

#[derive(Debug, Clone, Deserialize)]
pub struct PytestReport {
    pub benchmarks: Vec<PytestBenchmark>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PytestBenchmark {
    /// `<file>::<test>[params]`; the bare test name is not stored.
    pub fullname: String,
    pub stats: PytestStats,
}

/// The subset of pytest-benchmark's per-test statistics that ends up in a
/// measurement. Times are in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct PytestStats {
    pub mean: f64,
    pub stddev: f64,
    pub rounds: u64,
    pub ops: f64,
}

/// Scale a duration in seconds to the largest unit that keeps it at or above 1.
pub fn human_duration(seconds: f64) -> (f64, &'static str) {
    if seconds < 1e-6 {
        (seconds * 1e9, "nsec")
    } else if seconds < 1e-3 {
        (seconds * 1e6, "usec")
    } else if seconds < 1.0 {
        (seconds * 1e3, "msec")
    } else {
        (seconds, "sec")
    }
}

/// Render a number the way a JavaScript producer does: shortest round-trip
/// digits, exponent form below 1e-6 and from 1e21 up (`1e-7`, `1e+21`).
pub fn js_number(x: f64) -> String {
    let a = x.abs();
    if a != 0.0 && (a < 1e-6 || a >= 1e21) {
        let s = format!("{x:e}");
        match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => s,
        }
    } else {
        format!("{x}")
    }
}

pub fn describe_range(stddev: f64) -> String {
    format!("stddev: {}", js_number(stddev))
}

pub fn describe_extra(mean_seconds: f64, rounds: u64) -> String {
    let (mean, unit) = human_duration(mean_seconds);
    format!("mean: {} {unit}\nrounds: {rounds}", js_number(mean))
}

impl PytestBenchmark {
    pub fn to_measurement(&self) -> Measurement {
        Measurement::new(
            self.fullname.clone(),
            self.stats.ops,
            UNIT,
            describe_range(self.stats.stddev),
            describe_extra(self.stats.mean, self.stats.rounds),
        )
    }
}

/// Parse one report. A report without benchmarks is an error: it cannot
/// produce a valid run on its own.
pub fn parse_report(json: &str) -> Result<Vec<Measurement>, HistoryError> {
    let report: PytestReport =
        serde_json::from_str(json).map_err(|e| HistoryError::InvalidReport(e.to_string()))?;
    if report.benchmarks.is_empty() {
        return Err(HistoryError::InvalidReport("no benchmarks in report".into()));
    }
    Ok(report.benchmarks.iter().map(PytestBenchmark::to_measurement).collect())
}

/// `root` itself if it is a file, otherwise every `*.json` below it, sorted.
fn collect_reports(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if root.is_file() {
        out.push(root.to_path_buf());
        return Ok(out);
    }

    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let is_json = entry.path().extension().is_some_and(|ext| ext == "json");
        if entry.file_type().is_file() && is_json {
            out.push(entry.path().to_path_buf());
        }
    }
    out.sort();
    Ok(out)
}

/// Measurements from every report under `inputs`, in input order then path order.
pub fn read_reports(inputs: &[PathBuf]) -> Result<Vec<Measurement>, HistoryError> {
    let mut measurements = Vec::new();
    for input in inputs {
        for path in collect_reports(input)? {
            let contents = fs::read_to_string(&path)?;
            let found = parse_report(&contents).map_err(|e| match e {
                HistoryError::InvalidReport(msg) => {
                    HistoryError::InvalidReport(format!("{}: {msg}", path.display()))
                }
                other => other,
            })?;
            tracing::debug!(report = %path.display(), benches = found.len(), "read report");
            measurements.extend(found);
        }
    }
    if measurements.is_empty() {
        return Err(HistoryError::InvalidReport("no reports found".into()));
    }
    Ok(measurements)
}

/// A pytest run for `commit`, recorded at `date` (epoch ms).
pub fn pytest_run(commit: Commit, date: i64, measurements: Vec<Measurement>) -> Run {
    Run {
        commit,
        date,
        tool: TOOL.to_string(),
        measurements,
        other: Extra::new(),
    }
}
