use std::cell::RefCell;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use clap::Parser;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::json;
use shake_detector_rs::{AccelerationSample, ScriptedSource, Sensitivity, ShakeOptions, ShakeSession};

/// Replay recorded accelerometer logs through the shake detector
#[derive(Parser, Debug)]
struct Args {
    /// Path to a recorded *.json[.gz] log
    #[arg(long, conflicts_with = "log_dir")]
    log: Option<PathBuf>,

    /// Directory of logs to batch replay (processes *.json[.gz])
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Unit of the timestamps in the log (s or ms)
    #[arg(long, default_value = "s")]
    time_unit: String,

    /// Load options from a JSON file instead of the flags below
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sensitivity preset (low, medium, high)
    #[arg(long, default_value = "medium")]
    sensitivity: Sensitivity,

    /// Magnitude-delta threshold override (m/s²)
    #[arg(long)]
    threshold: Option<f64>,

    /// Debounce override (ms)
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Cooldown after a completed sustained shake (ms)
    #[arg(long, default_value = "3000")]
    cooldown_ms: u64,

    /// Continuous shaking required for completion (ms)
    #[arg(long, default_value = "3000")]
    sustained_ms: u64,

    /// Longest pause that still counts as continuous (ms)
    #[arg(long)]
    grace_ms: Option<u64>,

    /// Verbose per-event logging
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[derive(Deserialize)]
struct AccelData {
    timestamp: f64,
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Deserialize)]
struct Reading {
    timestamp: f64,
    accel: Option<AccelData>,
}

#[derive(Deserialize)]
struct LogFile {
    readings: Vec<Reading>,
}

fn load_log(path: &Path) -> anyhow::Result<LogFile> {
    let file = File::open(path)?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let gz = GzDecoder::new(file);
        let reader = BufReader::new(gz);
        Ok(serde_json::from_reader(reader)?)
    } else {
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn shake_options(args: &Args) -> anyhow::Result<ShakeOptions> {
    if let Some(path) = &args.config {
        let text = fs::read_to_string(path)?;
        return Ok(serde_json::from_str(&text)?);
    }
    Ok(ShakeOptions {
        sensitivity: args.sensitivity,
        threshold: args.threshold,
        debounce_ms: args.debounce_ms,
        cooldown_ms: args.cooldown_ms,
        sustained_shake_duration_ms: args.sustained_ms,
        interruption_grace_ms: args.grace_ms,
        shaking_hold_ms: None,
        enabled: true,
        debug: args.debug,
    })
}

fn run_once(path: &Path, options: &ShakeOptions, scale_to_ms: f64) -> anyhow::Result<serde_json::Value> {
    let log = load_log(path)?;

    let completions = Rc::new(RefCell::new(Vec::new()));
    let mut session = ShakeSession::new(ScriptedSource::new());
    let sink = completions.clone();
    session.set_on_sustained_complete(move |at| sink.borrow_mut().push(at));
    session.configure(options.clone())?;

    let mut peak_progress: f64 = 0.0;
    let mut accel_samples = 0usize;
    let mut last_t = 0.0;

    for reading in &log.readings {
        let Some(accel) = reading.accel.as_ref() else {
            continue;
        };
        let ts = if accel.timestamp > 0.0 { accel.timestamp } else { reading.timestamp };
        let t = ts * scale_to_ms;
        session
            .source_mut()
            .emit(AccelerationSample::new(accel.x, accel.y, accel.z, t));

        // Drain often enough that the bounded queue never overflows
        session.pump(t);
        peak_progress = peak_progress.max(session.snapshot().sustained_shake_progress);
        accel_samples += 1;
        last_t = t;
    }

    // Let trailing runs and hold windows expire
    let grace = session.resolved().map(|r| r.tracker.max_gap_ms).unwrap_or(0) as f64;
    session.tick(last_t + grace + 1.0);

    let snapshot = session.snapshot();
    let stats = session.stats();
    let completions = completions.borrow().clone();

    Ok(json!({
        "log": path.display().to_string(),
        "accel_samples": accel_samples,
        "samples_dropped": stats.samples_dropped,
        "shake_count": snapshot.shake_count,
        "completions": completions.len(),
        "completion_times_ms": completions,
        "peak_progress": peak_progress,
    }))
}

fn collect_logs(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut logs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.ends_with(".json") || name.ends_with(".json.gz") {
            logs.push(path);
        }
    }
    logs.sort();
    Ok(logs)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let scale_to_ms = match args.time_unit.as_str() {
        "s" => 1000.0,
        "ms" => 1.0,
        other => anyhow::bail!("unsupported time unit '{other}' (expected s or ms)"),
    };
    let options = shake_options(&args)?;

    let logs = match (&args.log, &args.log_dir) {
        (Some(log), _) => vec![log.clone()],
        (None, Some(dir)) => collect_logs(dir)?,
        (None, None) => anyhow::bail!("pass --log or --log-dir"),
    };

    let mut results = Vec::with_capacity(logs.len());
    for path in &logs {
        match run_once(path, &options, scale_to_ms) {
            Ok(result) => results.push(result),
            Err(e) => {
                log::warn!("skipping {}: {}", path.display(), e);
                results.push(json!({ "log": path.display().to_string(), "error": e.to_string() }));
            }
        }
    }

    let output = json!({
        "options": options,
        "results": results,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
