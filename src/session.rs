use serde::{Deserialize, Serialize};

use crate::detector::{SampleOutcome, ShakeEvent, ShakeEventDetector, DEFAULT_SHAKING_HOLD_MS};
use crate::error::{ShakeError, ShakeResult};
use crate::restart_manager::SubscribeBackoff;
use crate::sensitivity::{self, Sensitivity, SensitivityOverrides, SensitivityProfile};
use crate::sensors::{AccelerationSample, SampleQueue, SampleSink, SensorSource, SubscriptionId};
use crate::tracker::{SustainedShakeTracker, TrackerConfig, TrackerPhase};

/// Caller-facing configuration of a shake session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShakeOptions {
    pub sensitivity: Sensitivity,
    /// Overrides the preset magnitude-delta threshold
    pub threshold: Option<f64>,
    /// Overrides the preset debounce interval
    pub debounce_ms: Option<u64>,
    pub cooldown_ms: u64,
    pub sustained_shake_duration_ms: u64,
    /// Continuity tolerance between events; defaults to 3x debounce
    pub interruption_grace_ms: Option<u64>,
    /// How long `is_shaking` outlives the last motion; defaults to 500 ms
    pub shaking_hold_ms: Option<u64>,
    pub enabled: bool,
    pub debug: bool,
}

impl Default for ShakeOptions {
    fn default() -> Self {
        Self {
            sensitivity: Sensitivity::Medium,
            threshold: None,
            debounce_ms: None,
            cooldown_ms: 3000,
            sustained_shake_duration_ms: 3000,
            interruption_grace_ms: None,
            shaking_hold_ms: None,
            enabled: true,
            debug: false,
        }
    }
}

/// Validated, fully resolved configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub profile: SensitivityProfile,
    pub tracker: TrackerConfig,
    pub shaking_hold_ms: u64,
    pub debug: bool,
}

impl ShakeOptions {
    /// Validate and resolve into concrete thresholds
    pub fn resolve(&self) -> ShakeResult<ResolvedConfig> {
        let profile = sensitivity::resolve(
            self.sensitivity,
            SensitivityOverrides {
                threshold: self.threshold,
                debounce_ms: self.debounce_ms,
            },
        )?;

        if self.cooldown_ms == 0 {
            return Err(ShakeError::config("cooldown_ms must be greater than zero"));
        }
        if self.sustained_shake_duration_ms == 0 {
            return Err(ShakeError::config(
                "sustained_shake_duration_ms must be greater than zero",
            ));
        }

        let max_gap_ms = match self.interruption_grace_ms {
            Some(0) => {
                return Err(ShakeError::config(
                    "interruption_grace_ms must be greater than zero",
                ))
            }
            Some(grace) => grace,
            None => profile.debounce_ms.saturating_mul(3),
        };
        if max_gap_ms < profile.debounce_ms {
            return Err(ShakeError::config(format!(
                "interruption grace ({max_gap_ms}ms) shorter than debounce ({}ms) can never sustain a run",
                profile.debounce_ms
            )));
        }

        let shaking_hold_ms = match self.shaking_hold_ms {
            Some(0) => return Err(ShakeError::config("shaking_hold_ms must be greater than zero")),
            Some(hold) => hold,
            None => DEFAULT_SHAKING_HOLD_MS,
        };

        Ok(ResolvedConfig {
            profile,
            tracker: TrackerConfig {
                sustained_duration_ms: self.sustained_shake_duration_ms,
                max_gap_ms,
                cooldown_ms: self.cooldown_ms,
            },
            shaking_hold_ms,
            debug: self.debug,
        })
    }
}

/// Consistent view of the session state
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ShakeSnapshot {
    pub is_shaking: bool,
    pub shake_count: u64,
    pub sustained_shake_progress: f64,
    pub is_sustained_shaking: bool,
    /// A run is in progress but the user paused within the grace period
    pub awaiting_resume: bool,
}

/// Per-enable counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub samples_processed: u64,
    pub samples_dropped: u64,
    pub completions: u64,
}

struct Pipeline {
    detector: ShakeEventDetector,
    tracker: SustainedShakeTracker,
    stats: SessionStats,
    /// Latest time seen, on the sample clock
    clock: Option<f64>,
    /// How far sample timestamps trail the host clock, measured at each drain.
    /// None until the first sample arrives.
    delivery_lag_ms: Option<f64>,
}

impl Pipeline {
    fn new(config: &ResolvedConfig) -> Self {
        Pipeline {
            detector: ShakeEventDetector::new(config.profile, config.shaking_hold_ms, config.debug),
            tracker: SustainedShakeTracker::new(config.tracker),
            stats: SessionStats::default(),
            clock: None,
            delivery_lag_ms: None,
        }
    }

    /// Move the sample clock forward (never back) and run time-driven checks
    fn advance(&mut self, now: f64) {
        let clock = match self.clock {
            Some(clock) if clock >= now => clock,
            _ => now,
        };
        self.clock = Some(clock);
        self.detector.age_out(clock);
        self.tracker.tick(clock);
    }

    fn note_delivery(&mut self, host_now: f64, newest_sample: f64) {
        self.delivery_lag_ms = Some((host_now - newest_sample).max(0.0));
    }
}

struct ActiveSubscription {
    id: SubscriptionId,
    queue: SampleQueue,
}

type ShakeCallback = Box<dyn FnMut(&ShakeEvent)>;
type CompletionCallback = Box<dyn FnMut(f64)>;
type MilestoneCallback = Box<dyn FnMut(u8)>;

/// Owns the sensor subscription and wires detector → tracker → callbacks
pub struct ShakeSession<S: SensorSource> {
    source: S,
    config: Option<(ShakeOptions, ResolvedConfig)>,
    pipeline: Option<Pipeline>,
    subscription: Option<ActiveSubscription>,
    backoff: SubscribeBackoff,
    /// Host time of the latest pump/tick, drives subscribe retries
    last_tick: f64,
    on_shake: Option<ShakeCallback>,
    on_sustained_complete: Option<CompletionCallback>,
    on_progress_milestone: Option<MilestoneCallback>,
}

impl<S: SensorSource> ShakeSession<S> {
    /// Unconfigured session; nothing is subscribed until `configure`
    pub fn new(source: S) -> Self {
        ShakeSession {
            source,
            config: None,
            pipeline: None,
            subscription: None,
            backoff: SubscribeBackoff::default(),
            last_tick: 0.0,
            on_shake: None,
            on_sustained_complete: None,
            on_progress_milestone: None,
        }
    }

    pub fn with_options(source: S, options: ShakeOptions) -> ShakeResult<Self> {
        let mut session = Self::new(source);
        session.configure(options)?;
        Ok(session)
    }

    /// Invoked once per debounced shake event
    pub fn set_on_shake(&mut self, callback: impl FnMut(&ShakeEvent) + 'static) {
        self.on_shake = Some(Box::new(callback));
    }

    /// Invoked once per completed sustained run with the completing timestamp
    pub fn set_on_sustained_complete(&mut self, callback: impl FnMut(f64) + 'static) {
        self.on_sustained_complete = Some(Box::new(callback));
    }

    /// Invoked when progress crosses a quarter boundary (1..=4)
    pub fn set_on_progress_milestone(&mut self, callback: impl FnMut(u8) + 'static) {
        self.on_progress_milestone = Some(Box::new(callback));
    }

    /// Apply new options. Invalid options leave the previous configuration in place.
    pub fn configure(&mut self, options: ShakeOptions) -> ShakeResult<()> {
        let resolved = options.resolve()?;
        let enabled = options.enabled;
        self.config = Some((options, resolved));

        if !enabled {
            self.disable();
            return Ok(());
        }

        match self.pipeline.as_mut() {
            Some(pipeline) => {
                pipeline
                    .detector
                    .set_profile(resolved.profile, resolved.shaking_hold_ms, resolved.debug);
                pipeline.tracker.set_config(resolved.tracker);
            }
            None => self.enable(&resolved),
        }
        Ok(())
    }

    fn enable(&mut self, config: &ResolvedConfig) {
        self.pipeline = Some(Pipeline::new(config));
        self.backoff.reset();
        log::info!(
            "[shake] enabled: threshold={:.2} debounce={}ms duration={}ms grace={}ms cooldown={}ms",
            config.profile.magnitude_delta_threshold,
            config.profile.debounce_ms,
            config.tracker.sustained_duration_ms,
            config.tracker.max_gap_ms,
            config.tracker.cooldown_ms
        );
        self.try_subscribe(self.last_tick);
    }

    fn try_subscribe(&mut self, now: f64) {
        let (sink, queue) = SampleSink::pair();
        match self.source.subscribe(sink) {
            Ok(id) => {
                self.subscription = Some(ActiveSubscription { id, queue });
                self.backoff.record_success();
            }
            Err(e) => {
                log::warn!("[shake] {}", e);
                self.backoff.record_failed_attempt(now);
            }
        }
    }

    /// Unsubscribe and discard all runtime state. Samples still queued are dropped.
    pub fn disable(&mut self) {
        if let Some(sub) = self.subscription.take() {
            self.source.unsubscribe(sub.id);
        }
        if self.pipeline.take().is_some() {
            log::info!("[shake] disabled");
        }
        self.backoff.reset();
        if let Some((options, _)) = self.config.as_mut() {
            options.enabled = false;
        }
    }

    /// Tear down and hand back the sensor source
    pub fn dispose(mut self) -> S {
        self.disable();
        self.source
    }

    /// Drain queued samples, then run time-driven checks at host time `now`.
    /// Returns how many samples were taken from the queue.
    ///
    /// `now` must be on the same clock the source stamps samples with.
    pub fn pump(&mut self, now: f64) -> usize {
        let (samples, overflowed) = match self.subscription.as_ref() {
            Some(sub) => (sub.queue.drain(), sub.queue.take_overflowed()),
            None => (Vec::new(), 0),
        };

        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.stats.samples_dropped += overflowed;
            let newest = samples
                .iter()
                .map(|s| s.timestamp)
                .filter(|t| t.is_finite())
                .fold(None, |acc: Option<f64>, t| Some(acc.map_or(t, |a| a.max(t))));
            if let Some(newest) = newest {
                pipeline.note_delivery(now, newest);
            }
        }

        for sample in &samples {
            self.ingest(sample);
        }
        self.tick(now);
        samples.len()
    }

    /// Time-driven transitions: `is_shaking` hold, run expiry, cooldown end,
    /// subscribe retries. Call periodically (about every 100 ms).
    ///
    /// Host time is shifted back by the observed delivery lag, so a run only
    /// expires once the sample clock itself has gone quiet for the grace period.
    /// Before the first sample arrives there is nothing to expire.
    pub fn tick(&mut self, now: f64) {
        if now > self.last_tick {
            self.last_tick = now;
        }
        if let Some(pipeline) = self.pipeline.as_mut() {
            if let Some(lag) = pipeline.delivery_lag_ms {
                pipeline.advance(now - lag);
            }
        }

        let enabled = self.pipeline.is_some();
        if enabled && self.subscription.is_none() && self.backoff.can_retry(now) {
            self.try_subscribe(now);
        }
    }

    fn ingest(&mut self, sample: &AccelerationSample) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };
        if sample.timestamp.is_finite() {
            pipeline.advance(sample.timestamp);
        }

        let (outcome, event) = pipeline.detector.classify(sample);
        match outcome {
            SampleOutcome::Malformed | SampleOutcome::OutOfOrder => {
                pipeline.stats.samples_dropped += 1;
                return;
            }
            _ => pipeline.stats.samples_processed += 1,
        }

        let Some(event) = event else {
            return;
        };

        let update = pipeline.tracker.on_event(&event);
        if update.completed_at.is_some() {
            pipeline.stats.completions += 1;
        }

        if let Some(callback) = self.on_shake.as_mut() {
            callback(&event);
        }
        if let (Some(quarter), Some(callback)) = (update.milestone, self.on_progress_milestone.as_mut()) {
            callback(quarter);
        }
        if let (Some(at), Some(callback)) = (update.completed_at, self.on_sustained_complete.as_mut()) {
            callback(at);
        }
    }

    /// State as of the latest observed time
    pub fn snapshot(&self) -> ShakeSnapshot {
        let Some(pipeline) = self.pipeline.as_ref() else {
            return ShakeSnapshot::default();
        };

        let is_shaking = pipeline
            .clock
            .map(|clock| pipeline.detector.is_shaking_at(clock))
            .unwrap_or(false);
        let is_sustained_shaking = pipeline.tracker.phase() == TrackerPhase::Accumulating;
        ShakeSnapshot {
            is_shaking,
            shake_count: pipeline.detector.shake_count(),
            sustained_shake_progress: pipeline.tracker.progress().clamp(0.0, 1.0),
            is_sustained_shaking,
            awaiting_resume: is_sustained_shaking && !is_shaking,
        }
    }

    /// Options requested by the caller (enabled or not)
    pub fn options(&self) -> Option<&ShakeOptions> {
        self.config.as_ref().map(|(options, _)| options)
    }

    pub fn resolved(&self) -> Option<&ResolvedConfig> {
        self.config.as_ref().map(|(_, resolved)| resolved)
    }

    /// Enabled by configuration (may still be waiting for the sensor)
    pub fn is_enabled(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Enabled and receiving samples
    pub fn is_active(&self) -> bool {
        self.pipeline.is_some() && self.subscription.is_some()
    }

    pub fn stats(&self) -> SessionStats {
        self.pipeline
            .as_ref()
            .map(|p| p.stats)
            .unwrap_or_default()
    }

    pub fn detector(&self) -> Option<&ShakeEventDetector> {
        self.pipeline.as_ref().map(|p| &p.detector)
    }

    pub fn tracker(&self) -> Option<&SustainedShakeTracker> {
        self.pipeline.as_ref().map(|p| &p.tracker)
    }

    pub fn backoff(&self) -> &SubscribeBackoff {
        &self.backoff
    }

    /// Latest time on the sample clock, or the last host tick before any sample
    pub fn now(&self) -> f64 {
        self.pipeline
            .as_ref()
            .and_then(|p| p.clock)
            .unwrap_or(self.last_tick)
    }

    /// Host time of the latest pump or tick
    pub fn last_tick(&self) -> f64 {
        self.last_tick
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}
