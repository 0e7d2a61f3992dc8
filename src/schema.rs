use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HistoryError;

/// Fields a producer wrote that this crate does not model. Kept so a rewrite
/// does not drop them.
pub type Extra = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub username: String,

    #[serde(flatten)]
    pub other: Extra,
}

impl Person {
    pub fn new(name: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            username: username.into(),
            other: Extra::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub author: Person,
    pub committer: Person,
    pub id: String,
    pub message: String,
    /// ISO-8601 authoring time, e.g. `2022-01-16T02:29:50Z`.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(flatten)]
    pub other: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub name: String,
    pub value: f64,
    pub unit: String,
    /// Secondary statistic, e.g. `stddev: 0.038`. Not parsed.
    pub range: String,
    /// Free-form annotation, may span several lines. Not parsed.
    pub extra: String,

    #[serde(flatten)]
    pub other: Extra,
}

impl Measurement {
    pub fn new(
        name: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
        range: impl Into<String>,
        extra: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
            range: range.into(),
            extra: extra.into(),
            other: Extra::new(),
        }
    }
}

/// ISO-8601 date-time, with or without an offset and fractional seconds.
fn is_iso8601(s: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(s).is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
}

/// One recorded execution of a suite at a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub commit: Commit,
    /// Epoch milliseconds at which the run was recorded.
    pub date: i64,
    pub tool: String,
    #[serde(rename = "benches")]
    pub measurements: Vec<Measurement>,

    #[serde(flatten)]
    pub other: Extra,
}

impl Run {
    /// Check the constraints a run must meet before it enters a history.
    ///
    /// Field names in the error follow the snapshot document
    /// (`date`, `commit.timestamp`, `benches[i].value`).
    pub fn validate(&self) -> Result<(), HistoryError> {
        if self.date < 0 {
            return Err(HistoryError::validation("date", self.date));
        }

        if !is_iso8601(&self.commit.timestamp) {
            return Err(HistoryError::validation(
                "commit.timestamp",
                format!("{:?}", self.commit.timestamp),
            ));
        }

        if self.measurements.is_empty() {
            return Err(HistoryError::validation("benches", "[]"));
        }

        for (i, m) in self.measurements.iter().enumerate() {
            if !m.value.is_finite() || m.value.is_sign_negative() {
                return Err(HistoryError::validation(
                    format!("benches[{i}].value"),
                    m.value,
                ));
            }
        }

        Ok(())
    }
}
