//! CLI for the tscache time-series sample cache.
//!
//! Replays recorded samples into an in-memory cache, then queries ranges,
//! reports per-series windows, or benchmarks the write path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use tscache::{CacheConfig, CacheError, ChunkSlots, NullSink, PushError, SeriesRegistry};

/// tscache: in-process time-series sample cache CLI.
#[derive(Parser)]
#[command(name = "tscache", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Replay a sample file and print the cached samples of a range.
    Replay {
        /// Sample file, one `series,timestamp,value` per line.
        input: PathBuf,

        /// Only print this series.
        #[arg(long)]
        series: Option<String>,

        /// Range start in seconds, inclusive.
        #[arg(long, default_value = "0")]
        from: u32,

        /// Range end in seconds, exclusive.
        #[arg(long, default_value_t = u32::MAX)]
        to: u32,

        #[command(flatten)]
        cache: CacheArgs,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Replay a sample file and print each series' retained window.
    Info {
        /// Sample file, one `series,timestamp,value` per line.
        input: PathBuf,

        #[command(flatten)]
        cache: CacheArgs,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Run a write-path microbenchmark.
    Bench {
        /// Number of samples to push.
        #[arg(long, default_value = "10000000")]
        points: u64,

        /// Number of series to spread them over.
        #[arg(long, default_value = "30")]
        series: u32,

        #[command(flatten)]
        cache: CacheArgs,
    },
}

/// Cache shape, from a JSON file and/or flags. Flags win.
#[derive(Args)]
struct CacheArgs {
    /// JSON config file (`{"span_seconds": .., "num_chunks": ..}`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bucket width in seconds.
    #[arg(long)]
    span: Option<u32>,

    /// Chunk slots per series.
    #[arg(long)]
    chunks: Option<usize>,
}

impl CacheArgs {
    fn resolve(&self) -> Result<CacheConfig, CacheError> {
        let base = match &self.config {
            Some(path) => CacheConfig::load(path)?,
            None => CacheConfig::default(),
        };
        base.with_overrides(self.span, self.chunks)
    }
}

/// Output format for command results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON document.
    Json,
}

/// One recorded observation.
#[derive(Debug, Clone, PartialEq)]
struct Sample {
    series: String,
    timestamp: u32,
    value: f64,
}

/// Result of feeding a sample file into a registry.
#[derive(Debug, Default, PartialEq, Eq)]
struct ReplaySummary {
    accepted: u64,
    stale: u64,
    rejected: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Replay {
            input,
            series,
            from,
            to,
            cache,
            format,
        } => cmd_replay(&input, series.as_deref(), from, to, &cache, &format),
        Commands::Info { input, cache, format } => cmd_info(&input, &cache, &format),
        Commands::Bench { points, series, cache } => cmd_bench(points, series, &cache),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `tscache replay <input>`.
fn cmd_replay(
    input: &Path,
    only: Option<&str>,
    from: u32,
    to: u32,
    cache: &CacheArgs,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = cache.resolve()?;
    let samples = load_samples(input)?;
    let registry = SeriesRegistry::new(config, Arc::new(NullSink));
    let summary = replay(&registry, &samples);

    let series_ids = match only {
        Some(id) if registry.ring(id).is_none() => return Err(format!("Series '{id}' not found").into()),
        Some(id) => vec![id.to_string()],
        None => registry.series_ids(),
    };

    match format {
        OutputFormat::Csv => {
            println!(
                "# accepted={}, stale={}, rejected={}",
                summary.accepted, summary.stale, summary.rejected
            );
            println!("series,timestamp,value");
            for id in &series_ids {
                for (ts, val) in registry.query(id, from, to) {
                    println!("{id},{ts},{val}");
                }
            }
        }
        OutputFormat::Json => {
            let series: Vec<serde_json::Value> = series_ids
                .iter()
                .map(|id| {
                    let data: Vec<serde_json::Value> = registry
                        .query(id, from, to)
                        .map(|(ts, val)| serde_json::json!({ "timestamp": ts, "value": val }))
                        .collect();
                    serde_json::json!({
                        "series": id,
                        "count": data.len(),
                        "data": data,
                    })
                })
                .collect();

            let output = serde_json::json!({
                "config": config,
                "from": from,
                "to": to,
                "stats": registry.stats(),
                "series": series,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `tscache info <input>`.
fn cmd_info(input: &Path, cache: &CacheArgs, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let config = cache.resolve()?;
    let samples = load_samples(input)?;
    let slots = Arc::new(ChunkSlots::new());
    let registry = SeriesRegistry::new(config, slots.clone());
    replay(&registry, &samples);

    let rows = series_windows(&registry, &slots);

    match format {
        OutputFormat::Csv => {
            println!(
                "# span={}s, chunks={}, series={}",
                config.span_seconds(),
                config.num_chunks(),
                rows.len()
            );
            println!("series,oldest,newest,chunks,closed,closed_bytes,flag");
            for row in &rows {
                println!(
                    "{},{},{},{},{},{},{}",
                    row.series, row.oldest, row.newest, row.chunks, row.closed, row.closed_bytes, row.flag
                );
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "config": config,
                "stats": registry.stats(),
                "series": rows,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// One row of `tscache info`.
#[derive(Debug, serde::Serialize)]
struct SeriesWindow {
    series: String,
    oldest: u32,
    newest: u32,
    chunks: usize,
    closed: usize,
    closed_bytes: usize,
    flag: u32,
}

/// Summarizes every series, draining its closed chunks from `slots`.
fn series_windows(registry: &SeriesRegistry, slots: &ChunkSlots) -> Vec<SeriesWindow> {
    registry
        .series_ids()
        .into_iter()
        .filter_map(|id| {
            let ring = registry.ring(&id)?;
            let (oldest, newest) = ring.get_info();
            let closed = slots.pop_all(&id);
            Some(SeriesWindow {
                chunks: ring.len(),
                closed: closed.len(),
                closed_bytes: closed.iter().map(|chunk| chunk.encoded_len()).sum(),
                flag: ring.flag(),
                oldest,
                newest,
                series: id,
            })
        })
        .collect()
}

/// Implements `tscache bench`.
#[allow(clippy::cast_precision_loss)] // Benchmark stats are fine with f64 precision
fn cmd_bench(points: u64, series_count: u32, cache: &CacheArgs) -> Result<(), Box<dyn std::error::Error>> {
    if series_count == 0 {
        return Err("--series must be at least 1".into());
    }
    let config = cache.resolve()?;

    println!("tscache write-path benchmark");
    println!("  Points: {points}");
    println!("  Series: {series_count}");
    println!("  Span: {}s, chunks: {}", config.span_seconds(), config.num_chunks());
    println!();

    let slots = Arc::new(ChunkSlots::new());
    let registry = SeriesRegistry::new(config, slots.clone());
    let names: Vec<String> = (0..series_count).map(|i| format!("metric_{i}")).collect();

    println!("Pushing {points} samples across {series_count} series...");

    let points_per_series = points / u64::from(series_count);
    let base_time = 1_700_000_000u32;

    let start = Instant::now();

    let mut ts = base_time;
    for _ in 0..points_per_series {
        ts = ts.saturating_add(1);
        for (i, name) in names.iter().enumerate() {
            registry.push(name, ts, i as f64)?;
        }
        // Keep closed chunks from piling up like a persistence worker would.
        if ts % config.span_seconds() == 0 {
            slots.drain();
        }
    }

    let elapsed = start.elapsed();
    let total_writes = points_per_series * u64::from(series_count);
    let ns_per_write = elapsed.as_nanos() as f64 / total_writes.max(1) as f64;
    let writes_per_sec = total_writes as f64 / elapsed.as_secs_f64();
    let stats = registry.stats();

    println!();
    println!("Results:");
    println!("  Total writes: {total_writes}");
    println!("  Rotations: {}", stats.rotations);
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {ns_per_write:.1} ns/write");
    println!("  Throughput: {writes_per_sec:.0} writes/sec");

    Ok(())
}

/// Reads a sample file. Blank lines and lines starting with `#` are skipped.
fn load_samples(path: &Path) -> Result<Vec<Sample>, Box<dyn std::error::Error>> {
    let data = std::fs::read_to_string(path).map_err(|e| format!("Cannot read '{}': {e}", path.display()))?;

    let mut samples = Vec::new();
    for (i, line) in data.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let sample = parse_sample(line).map_err(|e| format!("{}:{}: {e}", path.display(), i + 1))?;
        samples.push(sample);
    }
    Ok(samples)
}

/// Parses one `series,timestamp,value` line. The series may contain commas;
/// the last two fields are split off from the right.
fn parse_sample(line: &str) -> Result<Sample, String> {
    let mut fields = line.trim().rsplitn(3, ',');
    let (Some(value), Some(timestamp), Some(series)) = (fields.next(), fields.next(), fields.next()) else {
        return Err(format!("expected 'series,timestamp,value', got '{line}'"));
    };

    let series = series.trim();
    if series.is_empty() {
        return Err("empty series id".to_string());
    }
    let timestamp = timestamp
        .trim()
        .parse()
        .map_err(|e| format!("invalid timestamp '{}': {e}", timestamp.trim()))?;
    let value = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value '{}': {e}", value.trim()))?;

    Ok(Sample {
        series: series.to_string(),
        timestamp,
        value,
    })
}

/// Pushes samples in file order. Late samples are counted, not fatal.
fn replay(registry: &SeriesRegistry, samples: &[Sample]) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    for sample in samples {
        match registry.push(&sample.series, sample.timestamp, sample.value) {
            Ok(_) => summary.accepted += 1,
            Err(CacheError::Push(PushError::StaleSample { .. })) => summary.stale += 1,
            Err(e) => {
                tracing::warn!(series = %sample.series, timestamp = sample.timestamp, "sample rejected: {e}");
                summary.rejected += 1;
            }
        }
    }
    tracing::info!(
        accepted = summary.accepted,
        stale = summary.stale,
        rejected = summary.rejected,
        "replay finished"
    );
    summary
}
