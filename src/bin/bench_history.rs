use bench_history::ingest;
use bench_history::{Commit, HistoryError, Person, Run, SnapshotFile, SnapshotFormat};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty snapshot.
    Init {
        /// Repository the benchmarks belong to.
        #[arg(long, value_name = "URL")]
        repo_url: String,

        /// Plain JSON or the `window.BENCHMARK_DATA = ...` script form.
        #[arg(long, value_enum, default_value_t = SnapshotFormat::Json)]
        format: SnapshotFormat,
    },

    /// Append a run given as a JSON document (same shape as a stored run).
    Append {
        #[arg(long)]
        suite: String,

        #[arg(long, value_name = "FILE")]
        run: PathBuf,
    },

    /// Build a run from pytest-benchmark JSON reports and append it.
    Ingest {
        #[arg(long)]
        suite: String,

        /// Report file or directory of reports. Can be provided multiple times.
        #[arg(short, long, value_name = "PATH", num_args = 1.., action = clap::ArgAction::Append, required = true)]
        input: Vec<PathBuf>,

        #[arg(long)]
        commit_id: String,

        #[arg(long)]
        message: String,

        #[arg(long)]
        author: String,

        #[arg(long)]
        author_username: String,

        /// Defaults to the author.
        #[arg(long)]
        committer: Option<String>,

        /// Defaults to the author's username.
        #[arg(long)]
        committer_username: Option<String>,

        /// ISO-8601 commit time.
        #[arg(long)]
        timestamp: String,

        #[arg(long)]
        url: Option<String>,

        /// Run time in epoch milliseconds; defaults to now.
        #[arg(long)]
        date: Option<i64>,
    },

    /// Print a suite's runs as JSON.
    Show {
        #[arg(long)]
        suite: String,
    },

    /// List suites and their run counts.
    Suites,
}

#[derive(Parser, Debug)]
#[command(name = "bench-history")]
#[command(about = "Append-only benchmark history (github-action-benchmark data files)")]
struct Args {
    /// Snapshot file (`data.js` or `data.json`).
    #[arg(long, global = true, default_value = "dev/bench/data.js")]
    snapshot: PathBuf,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

fn run(args: Args) -> Result<(), HistoryError> {
    let file = SnapshotFile::new(&args.snapshot);

    match args.cmd {
        Command::Init { repo_url, format } => {
            file.create(&repo_url, format)?;
            eprintln!("Created {}", file.path().display());
        }
        Command::Append { suite, run } => {
            let run: Run = serde_json::from_str(&fs::read_to_string(&run)?)?;
            let history = file.append_run(&suite, run)?;
            eprintln!(
                "Appended run to {suite:?} ({} runs)",
                history.suite(&suite)?.len()
            );
        }
        Command::Ingest {
            suite,
            input,
            commit_id,
            message,
            author,
            author_username,
            committer,
            committer_username,
            timestamp,
            url,
            date,
        } => {
            let measurements = ingest::read_reports(&input)?;
            let committer = Person::new(
                committer.unwrap_or_else(|| author.clone()),
                committer_username.unwrap_or_else(|| author_username.clone()),
            );
            let commit = Commit {
                author: Person::new(author, author_username),
                committer,
                id: commit_id,
                message,
                timestamp,
                url,
                ..Default::default()
            };
            let date = date.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
            let benches = measurements.len();

            let history = file.append_run(&suite, ingest::pytest_run(commit, date, measurements))?;
            eprintln!(
                "Appended {benches} benches to {suite:?} ({} runs)",
                history.suite(&suite)?.len()
            );
        }
        Command::Show { suite } => {
            let (_, history) = file.read()?;
            let runs = history.suite(&suite)?;
            println!("{}", serde_json::to_string_pretty(runs)?);
        }
        Command::Suites => {
            let (_, history) = file.read()?;
            let suites: Vec<_> = history
                .suites()
                .iter()
                .map(|s| json!({"name": s.name(), "runs": s.runs().len()}))
                .collect();
            let out = json!({
                "repoUrl": history.repo_url(),
                "lastUpdate": history.last_update(),
                "suites": suites,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
