//! # Wrapper Load Driver
//!
//! Purpose: Drive concurrent set/get pairs through `KvWrapper` against a live
//! server to observe throughput and confirm the pool never exceeds its bound.
//!
//! ## Design Principles
//! 1. **Isolated Keys**: Each worker writes its own key space, so every read
//!    can be checked against the value that worker wrote.
//! 2. **Bounded Pool**: Workers outnumber connections; the pool wait timeout
//!    absorbs the contention instead of failing fast.
//! 3. **Machine-Readable Output**: The report is printed as JSON.
//!
//! Usage: `kvwrap-bench [addr] [threads] [ops_per_thread] [max_active]`

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use kvwrap_client::{KvWrapper, WrapperConfig};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

const DEFAULT_THREADS: usize = 8;
const DEFAULT_OPS: usize = 10_000;
const DEFAULT_MAX_ACTIVE: usize = 4;

struct BenchConfig {
    addr: String,
    threads: usize,
    ops_per_thread: usize,
    max_active: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        let addr = args
            .next()
            .unwrap_or_else(|| WrapperConfig::from_env().addr);
        BenchConfig {
            addr,
            threads: parse_usize(args.next(), DEFAULT_THREADS).max(1),
            ops_per_thread: parse_usize(args.next(), DEFAULT_OPS),
            max_active: parse_usize(args.next(), DEFAULT_MAX_ACTIVE).max(1),
        }
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

#[derive(Debug, Serialize)]
struct Report {
    addr: String,
    threads: usize,
    max_active: usize,
    pairs: usize,
    mismatches: usize,
    elapsed_secs: f64,
    pairs_per_sec: f64,
    peak_active: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = BenchConfig::from_args();
    let wrapper = Arc::new(
        KvWrapper::connect(WrapperConfig {
            addr: config.addr.clone(),
            max_idle: config.max_active,
            max_active: config.max_active,
            wait_timeout: Some(Duration::from_secs(10)),
            ..WrapperConfig::from_env()
        })
        .context("building wrapper")?,
    );
    wrapper.ping().with_context(|| format!("pinging {}", config.addr))?;
    tracing::info!(
        addr = %config.addr,
        threads = config.threads,
        ops = config.ops_per_thread,
        "starting load"
    );

    let peak = Arc::new(AtomicUsize::new(0));
    let mismatches = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let workers: Vec<_> = (0..config.threads)
        .map(|worker| {
            let wrapper = wrapper.clone();
            let peak = peak.clone();
            let mismatches = mismatches.clone();
            let ops = config.ops_per_thread;
            thread::spawn(move || -> anyhow::Result<()> {
                for op in 0..ops {
                    let key = format!("kvwrap-bench:{worker}:{op}");
                    let value = format!("{worker}-{op}");
                    wrapper.set_value(&key, value.as_str(), None)?;
                    if wrapper.get_string_value(&key)? != value {
                        mismatches.fetch_add(1, Ordering::Relaxed);
                    }
                    wrapper.remove_value(&key)?;
                    peak.fetch_max(wrapper.stats().active, Ordering::Relaxed);
                }
                Ok(())
            })
        })
        .collect();

    for worker in workers {
        match worker.join() {
            Ok(result) => result.context("worker failed")?,
            Err(_) => bail!("worker panicked"),
        }
    }

    let elapsed = start.elapsed();
    let pairs = config.threads * config.ops_per_thread;
    let report = Report {
        addr: config.addr,
        threads: config.threads,
        max_active: config.max_active,
        pairs,
        mismatches: mismatches.load(Ordering::Relaxed),
        elapsed_secs: elapsed.as_secs_f64(),
        pairs_per_sec: pairs as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        peak_active: peak.load(Ordering::Relaxed),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.peak_active > report.max_active {
        bail!(
            "pool exceeded its bound: {} > {}",
            report.peak_active,
            report.max_active
        );
    }
    if report.mismatches > 0 {
        bail!("{} reads did not match their writes", report.mismatches);
    }

    match Arc::try_unwrap(wrapper) {
        Ok(wrapper) => wrapper.destroy()?,
        Err(_) => tracing::warn!("wrapper still shared; skipping destroy"),
    }
    Ok(())
}
