//! In-process timing for Rust closures, reported the way pytest-benchmark
//! results are stored so native and Python suites share one history.

use std::hint::black_box;
use std::time::Instant;

use crate::ingest::{describe_extra, describe_range, UNIT};
use crate::schema::Measurement;

#[derive(Clone, Debug)]
pub struct Measured {
    pub rounds: u64,
    pub warmup_rounds: u64,
    pub total_ns: u128,
    /// Mean seconds per round.
    pub mean: f64,
    /// Sample standard deviation of seconds per round.
    pub stddev: f64,
}

impl Measured {
    /// Rounds per second, 0 when the closure was too fast to time.
    pub fn ops(&self) -> f64 {
        if self.mean > 0.0 {
            1.0 / self.mean
        } else {
            0.0
        }
    }

    pub fn to_measurement(&self, name: impl Into<String>) -> Measurement {
        Measurement::new(
            name,
            self.ops(),
            UNIT,
            describe_range(self.stddev),
            describe_extra(self.mean, self.rounds),
        )
    }
}

fn mean_stddev(samples: &[f64]) -> (f64, f64) {
    let n = samples.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = samples.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (mean, 0.0);
    }
    let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    (mean, var.sqrt())
}

/// Run `f` `warmup_rounds` times untimed, then time each of `rounds` calls.
pub fn measure_fn<T>(rounds: u64, warmup_rounds: u64, mut f: impl FnMut() -> T) -> Measured {
    for _ in 0..warmup_rounds {
        black_box(f());
    }

    let rounds = rounds.max(1);
    let mut samples = Vec::with_capacity(rounds as usize);
    let mut total_ns = 0u128;
    for _ in 0..rounds {
        let start = Instant::now();
        black_box(f());
        let elapsed = start.elapsed();
        total_ns += elapsed.as_nanos();
        samples.push(elapsed.as_secs_f64());
    }

    let (mean, stddev) = mean_stddev(&samples);
    Measured {
        rounds,
        warmup_rounds,
        total_ns,
        mean,
        stddev,
    }
}
