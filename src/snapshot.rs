//! Snapshot document codec.
//!
//! The document is the `github-action-benchmark` data file:
//!
//! ```text
//! {
//!   "lastUpdate": <epoch ms>,
//!   "repoUrl": "<origin>",
//!   "entries": { "<suite>": [ <run>, ... ], ... }
//! }
//! ```
//!
//! Published copies are usually wrapped as `window.BENCHMARK_DATA = { ... }`
//! so the chart page can load them with a `<script>` tag; [`parse`] accepts
//! both forms and reports which one it saw.

use std::collections::HashSet;
use std::fmt;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::HistoryError;
use crate::schema::{Extra, Run};
use crate::store::{BenchmarkHistory, BenchmarkSuite};
use crate::SnapshotFormat;

/// Global the chart page reads the data from.
pub const SCRIPT_GLOBAL: &str = "window.BENCHMARK_DATA";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotDoc {
    last_update: i64,
    repo_url: String,
    entries: Entries,

    #[serde(flatten)]
    other: Extra,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRef<'a> {
    last_update: i64,
    repo_url: &'a str,
    entries: EntriesRef<'a>,

    #[serde(flatten)]
    other: &'a Extra,
}

/// `entries` in document order. Duplicate suite names are rejected.
struct Entries(Vec<BenchmarkSuite>);

struct EntriesRef<'a>(&'a [BenchmarkSuite]);

impl<'de> Deserialize<'de> for Entries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = Entries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of suite name to runs")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Entries, A::Error> {
                let mut seen = HashSet::new();
                let mut suites = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(name) = map.next_key::<String>()? {
                    let runs: Vec<Run> = map.next_value()?;
                    if !seen.insert(name.clone()) {
                        return Err(de::Error::custom(format!("duplicate suite `{name}`")));
                    }
                    suites.push(BenchmarkSuite::new(name, runs));
                }
                Ok(Entries(suites))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

impl Serialize for EntriesRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for suite in self.0 {
            map.serialize_entry(suite.name(), suite.runs())?;
        }
        map.end()
    }
}

/// Which form `input` is in, judged by its first token.
pub fn detect_format(input: &str) -> SnapshotFormat {
    if input.trim_start().starts_with(SCRIPT_GLOBAL) {
        SnapshotFormat::Script
    } else {
        SnapshotFormat::Json
    }
}

/// The JSON body of a script-wrapped snapshot.
fn unwrap_script(input: &str) -> Result<&str, HistoryError> {
    let rest = input
        .trim_start()
        .strip_prefix(SCRIPT_GLOBAL)
        .unwrap_or(input)
        .trim_start();
    let body = rest.strip_prefix('=').ok_or_else(|| {
        HistoryError::MalformedSnapshot(format!("expected `=` after {SCRIPT_GLOBAL}"))
    })?;
    let body = body.trim();
    Ok(body.strip_suffix(';').unwrap_or(body).trim_end())
}

/// Parse and validate a snapshot.
///
/// Every stored run is checked with the same rules as an append; a bad run
/// fails the whole load with its location in the message.
pub fn parse(input: &str) -> Result<(SnapshotFormat, BenchmarkHistory), HistoryError> {
    let format = detect_format(input);
    let body = match format {
        SnapshotFormat::Json => input,
        SnapshotFormat::Script => unwrap_script(input)?,
    };

    let doc: SnapshotDoc = serde_json::from_str(body)
        .map_err(|e| HistoryError::MalformedSnapshot(e.to_string()))?;

    for suite in &doc.entries.0 {
        for (i, run) in suite.runs().iter().enumerate() {
            run.validate()
                .map_err(|e| e.located(&format!("entries[{:?}][{i}]", suite.name())))?;
        }
    }

    let runs: usize = doc.entries.0.iter().map(|s| s.runs().len()).sum();
    tracing::debug!(
        ?format,
        suites = doc.entries.0.len(),
        runs,
        last_update = doc.last_update,
        "loaded snapshot"
    );

    Ok((
        format,
        BenchmarkHistory::from_parts(doc.repo_url, doc.last_update, doc.entries.0, doc.other),
    ))
}

/// Render `history` in `format`. Output is pretty-printed with two-space
/// indentation and no trailing newline.
pub fn render(history: &BenchmarkHistory, format: SnapshotFormat) -> Result<String, HistoryError> {
    let doc = SnapshotRef {
        last_update: history.last_update(),
        repo_url: history.repo_url(),
        entries: EntriesRef(history.suites()),
        other: history.other(),
    };
    let json = serde_json::to_string_pretty(&doc)?;

    Ok(match format {
        SnapshotFormat::Json => json,
        SnapshotFormat::Script => format!("{SCRIPT_GLOBAL} = {json}"),
    })
}
