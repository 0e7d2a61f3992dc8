//! In-memory benchmark history.
//!
//! A [`BenchmarkHistory`] maps suite names to an append-only log of [`Run`]s.
//! The only mutation is [`BenchmarkHistory::append_run`], which validates the
//! run first and then commits the suite update and the new `lastUpdate`
//! together, so a rejected run leaves the history untouched.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::HistoryError;
use crate::schema::{Extra, Run};
use crate::snapshot;
use crate::SnapshotFormat;

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A named, ordered log of runs.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkSuite {
    name: String,
    runs: Vec<Run>,
}

impl BenchmarkSuite {
    pub(crate) fn new(name: String, runs: Vec<Run>) -> Self {
        Self { name, runs }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs in append order.
    pub fn runs(&self) -> &[Run] {
        &self.runs
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkHistory {
    repo_url: String,
    last_update: i64,
    suites: Vec<BenchmarkSuite>,
    index: HashMap<String, usize>,
    other: Extra,
}

impl BenchmarkHistory {
    /// An empty history. `lastUpdate` starts at 0 until the first append.
    pub fn new(repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            last_update: 0,
            suites: Vec::new(),
            index: HashMap::new(),
            other: Extra::new(),
        }
    }

    /// Assemble a history from already-validated parts. Suite names must be unique.
    pub(crate) fn from_parts(
        repo_url: String,
        last_update: i64,
        suites: Vec<BenchmarkSuite>,
        other: Extra,
    ) -> Self {
        let index = suites
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        Self {
            repo_url,
            last_update,
            suites,
            index,
            other,
        }
    }

    /// Parse a snapshot in either format.
    pub fn load(serialized: &str) -> Result<Self, HistoryError> {
        snapshot::parse(serialized).map(|(_, history)| history)
    }

    pub fn serialize(&self, format: SnapshotFormat) -> Result<String, HistoryError> {
        snapshot::render(self, format)
    }

    pub fn repo_url(&self) -> &str {
        &self.repo_url
    }

    /// Epoch milliseconds of the most recent successful append.
    pub fn last_update(&self) -> i64 {
        self.last_update
    }

    /// Top-level fields not modelled by this crate.
    pub fn other(&self) -> &Extra {
        &self.other
    }

    /// Suites in insertion order.
    pub fn suites(&self) -> &[BenchmarkSuite] {
        &self.suites
    }

    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }

    /// Full run history of `name`, oldest first.
    pub fn suite(&self, name: &str) -> Result<&[Run], HistoryError> {
        self.index
            .get(name)
            .map(|&i| self.suites[i].runs())
            .ok_or_else(|| HistoryError::SuiteNotFound(name.to_string()))
    }

    /// Append `run` to `suite`, creating the suite on first use, and stamp
    /// `lastUpdate` with the system clock.
    pub fn append_run(&mut self, suite: &str, run: Run) -> Result<(), HistoryError> {
        self.append_run_at(suite, run, &SystemClock)
    }

    /// [`append_run`](Self::append_run) with an explicit clock.
    ///
    /// `lastUpdate` becomes the clock reading, but never moves backwards and
    /// never falls below the appended run's `date`.
    pub fn append_run_at(
        &mut self,
        suite: &str,
        run: Run,
        clock: &dyn Clock,
    ) -> Result<(), HistoryError> {
        run.validate()?;

        let last_update = clock.now_millis().max(self.last_update).max(run.date);
        let benches = run.measurements.len();

        match self.index.get(suite) {
            Some(&i) => self.suites[i].runs.push(run),
            None => {
                self.index.insert(suite.to_string(), self.suites.len());
                self.suites
                    .push(BenchmarkSuite::new(suite.to_string(), vec![run]));
            }
        }
        self.last_update = last_update;

        tracing::info!(suite, benches, last_update, "appended run");
        Ok(())
    }
}

/// A [`BenchmarkHistory`] shared between threads.
///
/// Appends serialize on a write lock and read the clock while holding it, so
/// the later of two concurrent appends also sets the final `lastUpdate`.
#[derive(Clone)]
pub struct SharedHistory {
    inner: Arc<RwLock<BenchmarkHistory>>,
    clock: Arc<dyn Clock>,
}

impl SharedHistory {
    pub fn new(history: BenchmarkHistory) -> Self {
        Self::with_clock(history, Arc::new(SystemClock))
    }

    pub fn with_clock(history: BenchmarkHistory, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(history)),
            clock,
        }
    }

    // A panicking writer cannot leave a half-applied append behind, so a
    // poisoned lock still guards a consistent history.
    pub fn append_run(&self, suite: &str, run: Run) -> Result<(), HistoryError> {
        let mut history = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        history.append_run_at(suite, run, self.clock.as_ref())
    }

    pub fn suite(&self, name: &str) -> Result<Vec<Run>, HistoryError> {
        let history = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        history.suite(name).map(<[Run]>::to_vec)
    }

    pub fn last_update(&self) -> i64 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_update()
    }

    /// A point-in-time copy of the whole history.
    pub fn snapshot(&self) -> BenchmarkHistory {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn serialize(&self, format: SnapshotFormat) -> Result<String, HistoryError> {
        let history = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        history.serialize(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Commit, Measurement, Person};
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::thread;

    struct FixedClock(i64);

    impl Clock for FixedClock {
        fn now_millis(&self) -> i64 {
            self.0
        }
    }

    /// Ticks one millisecond per reading.
    struct TickClock(AtomicI64);

    impl Clock for TickClock {
        fn now_millis(&self) -> i64 {
            self.0.fetch_add(1, Ordering::SeqCst)
        }
    }

    fn sample_run(date: i64, value: f64) -> Run {
        Run {
            commit: Commit {
                author: Person::new("RobertCraigie", "RobertCraigie"),
                committer: Person::new("RobertCraigie", "RobertCraigie"),
                id: format!("{date:x}"),
                message: "bench".into(),
                timestamp: "2022-01-16T02:29:50Z".into(),
                ..Default::default()
            },
            date,
            tool: "pytest".into(),
            measurements: vec![Measurement::new(
                "test_create_scalars",
                value,
                "iter/sec",
                "stddev: 0.038",
                "mean: 22.86 msec\nrounds: 1329",
            )],
            other: Extra::new(),
        }
    }

    #[test]
    fn test_new_suite_holds_exactly_the_appended_run() {
        let mut history = BenchmarkHistory::new("https://example.com/repo");
        let run = sample_run(1642355626454, 43.75);

        history
            .append_run_at("prisma benchmark", run.clone(), &FixedClock(1642355627232))
            .unwrap();

        assert_eq!(history.suite("prisma benchmark").unwrap(), &[run]);
        assert_eq!(history.last_update(), 1642355627232);
    }

    #[test]
    fn test_second_append_keeps_first_run_in_place() {
        let mut history = BenchmarkHistory::new("https://example.com/repo");
        let first = sample_run(1642355626454, 43.75);
        let second = sample_run(1642355700000, 44.10);

        history.append_run("prisma benchmark", first.clone()).unwrap();
        history.append_run("prisma benchmark", second.clone()).unwrap();

        let runs = history.suite("prisma benchmark").unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0], first);
        assert_eq!(runs[1], second);
    }

    #[test]
    fn test_suite_not_found() {
        let history = BenchmarkHistory::new("https://example.com/repo");
        match history.suite("missing") {
            Err(HistoryError::SuiteNotFound(name)) => assert_eq!(name, "missing"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_rejected_append_leaves_history_unchanged() {
        let mut history = BenchmarkHistory::new("https://example.com/repo");
        history
            .append_run_at("a", sample_run(10, 1.0), &FixedClock(100))
            .unwrap();
        let before = history.clone();

        let mut bad = sample_run(20, 2.0);
        bad.measurements.push(Measurement::new("neg", -3.0, "iter/sec", "", ""));

        let err = history
            .append_run_at("a", bad.clone(), &FixedClock(200))
            .unwrap_err();
        assert!(matches!(err, HistoryError::Validation { ref field, .. } if field == "benches[1].value"));

        history
            .append_run_at("b", bad, &FixedClock(200))
            .unwrap_err();
        assert_eq!(history, before);
        assert!(history.suite("b").is_err());
    }

    #[test]
    fn test_last_update_never_regresses() {
        let mut history = BenchmarkHistory::new("https://example.com/repo");

        history
            .append_run_at("s", sample_run(50, 1.0), &FixedClock(1_000))
            .unwrap();
        assert_eq!(history.last_update(), 1_000);

        // Clock behind the previous stamp.
        history
            .append_run_at("s", sample_run(60, 1.0), &FixedClock(500))
            .unwrap();
        assert_eq!(history.last_update(), 1_000);

        // Run dated after the clock reading.
        history
            .append_run_at("s", sample_run(5_000, 1.0), &FixedClock(2_000))
            .unwrap();
        assert_eq!(history.last_update(), 5_000);
    }

    #[test]
    fn test_suites_keep_insertion_order() {
        let mut history = BenchmarkHistory::new("https://example.com/repo");
        for name in ["zeta", "alpha", "mid", "alpha"] {
            history.append_run(name, sample_run(1, 1.0)).unwrap();
        }

        let names: Vec<&str> = history.suites().iter().map(|s| s.name()).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
        assert_eq!(history.suite("alpha").unwrap().len(), 2);
    }

    #[test]
    fn test_shared_history_concurrent_appends() {
        let shared = SharedHistory::with_clock(
            BenchmarkHistory::new("https://example.com/repo"),
            Arc::new(TickClock(AtomicI64::new(1))),
        );

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let shared = shared.clone();
                thread::spawn(move || {
                    let suite = if t % 2 == 0 { "even" } else { "odd" };
                    for i in 0..25 {
                        shared.append_run(suite, sample_run(i, t as f64)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(shared.suite("even").unwrap().len(), 100);
        assert_eq!(shared.suite("odd").unwrap().len(), 100);
        // One clock reading per append, taken under the write lock.
        assert_eq!(shared.last_update(), 200);
    }
}
