use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tokio::time::{interval, Duration};

use shake_detector_rs::feedback::{self, MascotMood};
use shake_detector_rs::live_status::LiveStatus;
use shake_detector_rs::{Sensitivity, ShakeOptions, ShakeSession, TermuxSource};

#[derive(Parser, Debug)]
#[command(name = "shake_monitor")]
#[command(about = "Live shake-to-eat detector on the device accelerometer", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

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

    /// Longest pause that still counts as continuous (ms, default 3x debounce)
    #[arg(long)]
    grace_ms: Option<u64>,

    /// How long "is shaking" lingers after the last motion (ms)
    #[arg(long)]
    hold_ms: Option<u64>,

    /// Load options from a JSON file instead of the flags above
    #[arg(long)]
    config: Option<PathBuf>,

    /// Accelerometer sampling period (ms)
    #[arg(long, default_value = "20")]
    sample_period_ms: u64,

    /// Output directory for live_status.json
    #[arg(long, default_value = "shake_sessions")]
    output_dir: String,

    /// Verbose per-event logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn shake_options(&self) -> Result<ShakeOptions> {
        if let Some(path) = &self.config {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let mut options: ShakeOptions = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            options.debug |= self.debug;
            return Ok(options);
        }

        Ok(ShakeOptions {
            sensitivity: self.sensitivity,
            threshold: self.threshold,
            debounce_ms: self.debounce_ms,
            cooldown_ms: self.cooldown_ms,
            sustained_shake_duration_ms: self.sustained_ms,
            interruption_grace_ms: self.grace_ms,
            shaking_hold_ms: self.hold_ms,
            enabled: true,
            debug: self.debug,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let options = args.shake_options()?;

    println!("[{}] Shake Monitor Starting", ts_now());
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  Sensitivity: {}", options.sensitivity);
    println!("  Sustained: {} ms, cooldown {} ms", options.sustained_shake_duration_ms, options.cooldown_ms);
    println!("  Output Dir: {}", args.output_dir);

    std::fs::create_dir_all(&args.output_dir)?;

    let origin = Instant::now();
    let source = TermuxSource::new(origin, args.sample_period_ms);
    let mut session = ShakeSession::new(source);

    session.set_on_shake(|event| {
        log::debug!("shake at {:.0}ms (|a|={:.2})", event.timestamp, event.magnitude);
    });
    session.set_on_progress_milestone(|quarter| {
        println!("[{}] {}% ...", ts_now(), quarter as u32 * 25);
    });
    session.set_on_sustained_complete(|at| {
        println!("[{}] Sustained shake completed at {:.0}ms, time to eat!", ts_now(), at);
    });
    session.configure(options)?;

    let mut ticker = interval(Duration::from_millis(100));
    let mut last_status_update = Instant::now();
    let mut last_mood = MascotMood::Default;
    let status_path = format!("{}/live_status.json", args.output_dir);

    println!("[{}] Listening for shakes (Ctrl-C to stop)...", ts_now());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut ctrl_c => {
                println!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
        }

        if args.duration > 0 && origin.elapsed().as_secs() >= args.duration {
            println!("[{}] Duration reached, stopping...", ts_now());
            break;
        }

        let now = session.source().now_ms();
        session.pump(now);

        let snapshot = session.snapshot();
        let mood = MascotMood::from_snapshot(&snapshot);
        if mood != last_mood {
            println!(
                "[{}] {} {}% (mood: {})",
                ts_now(),
                feedback::prompt(&snapshot),
                feedback::percent(&snapshot),
                mood.as_str()
            );
            last_mood = mood;
        }

        if last_status_update.elapsed() >= Duration::from_secs(2) {
            let status = LiveStatus::from_session(&session, origin.elapsed().as_secs());
            if let Err(e) = status.save(&status_path) {
                log::warn!("failed to write {}: {}", status_path, e);
            }
            last_status_update = Instant::now();
        }
    }

    let final_status = LiveStatus::from_session(&session, origin.elapsed().as_secs());
    let final_path = format!("{}/live_status_final.json", args.output_dir);
    final_status.save(&final_path)?;

    let stats = session.stats();
    let snapshot = session.snapshot();
    session.disable();

    println!("\n=== Final Stats ===");
    println!("Samples processed: {}", stats.samples_processed);
    println!("Samples dropped: {}", stats.samples_dropped);
    println!("Shake events: {}", snapshot.shake_count);
    println!("Sustained completions: {}", stats.completions);

    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
