use clap::ValueEnum;

pub mod error;
pub mod harness;
pub mod ingest;
pub mod persist;
pub mod schema;
pub mod snapshot;
pub mod store;

pub use error::HistoryError;
pub use persist::SnapshotFile;
pub use schema::{Commit, Measurement, Person, Run};
pub use store::{BenchmarkHistory, BenchmarkSuite, Clock, SharedHistory, SystemClock};

/// On-disk representation of a history snapshot.
#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum SnapshotFormat {
    /// Bare JSON document.
    #[default]
    Json,
    /// JSON assigned to `window.BENCHMARK_DATA`, loadable as a `<script>` by the chart page.
    Script,
}
