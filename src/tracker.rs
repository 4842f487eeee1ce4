use serde::{Deserialize, Serialize};

use crate::detector::ShakeEvent;

/// Sustained shake state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerPhase {
    /// No run in progress
    Idle,
    /// Continuous shaking is being accumulated
    Accumulating,
    /// Transient: completion is being reported (never observed between updates)
    Completed,
    /// Runs are blocked until the cooldown deadline passes
    Cooldown,
}

/// Timing parameters for the sustained tracker (all in ms)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub sustained_duration_ms: u64,
    /// Longest silence between events that still counts as continuous
    pub max_gap_ms: u64,
    pub cooldown_ms: u64,
}

/// Result of feeding one shake event to the tracker
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrackerUpdate {
    pub progress: f64,
    /// Highest quarter (1..=4) newly crossed by this update
    pub milestone: Option<u8>,
    /// Set when this event completed a run
    pub completed_at: Option<f64>,
    /// The event arrived after too long a gap and reset the run
    pub run_broken: bool,
    /// The event was ignored because of cooldown
    pub ignored: bool,
}

/// Accumulates continuous shaking into progress and reports one completion per run
#[derive(Debug, Clone, PartialEq)]
pub struct SustainedShakeTracker {
    config: TrackerConfig,
    phase: TrackerPhase,
    accumulation_start: Option<f64>,
    last_qualifying_event: Option<f64>,
    progress: f64,
    cooldown_until: Option<f64>,
    last_milestone: u8,
    completions: u64,
}

impl SustainedShakeTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            phase: TrackerPhase::Idle,
            accumulation_start: None,
            last_qualifying_event: None,
            progress: 0.0,
            cooldown_until: None,
            last_milestone: 0,
            completions: 0,
        }
    }

    /// Swap timing parameters; an in-flight run keeps its anchors
    pub fn set_config(&mut self, config: TrackerConfig) {
        self.config = config;
    }

    pub fn config(&self) -> TrackerConfig {
        self.config
    }

    /// Feed one debounced shake event
    pub fn on_event(&mut self, event: &ShakeEvent) -> TrackerUpdate {
        let t = event.timestamp;

        if self.phase == TrackerPhase::Cooldown {
            match self.cooldown_until {
                Some(until) if t < until => {
                    return TrackerUpdate {
                        progress: self.progress,
                        ignored: true,
                        ..TrackerUpdate::default()
                    };
                }
                _ => self.enter_idle(),
            }
        }

        match self.phase {
            TrackerPhase::Idle => {
                self.phase = TrackerPhase::Accumulating;
                self.accumulation_start = Some(t);
                self.last_qualifying_event = Some(t);
                self.progress = 0.0;
                self.last_milestone = 0;
                TrackerUpdate::default()
            }
            TrackerPhase::Accumulating => self.accumulate(t),
            TrackerPhase::Completed | TrackerPhase::Cooldown => TrackerUpdate {
                progress: self.progress,
                ignored: true,
                ..TrackerUpdate::default()
            },
        }
    }

    fn accumulate(&mut self, t: f64) -> TrackerUpdate {
        let (start, last) = match (self.accumulation_start, self.last_qualifying_event) {
            (Some(start), Some(last)) => (start, last),
            _ => {
                // Accumulating without anchors cannot happen; restart cleanly
                self.enter_idle();
                return TrackerUpdate::default();
            }
        };

        if t - last > self.config.max_gap_ms as f64 {
            log::debug!(
                "[sustained] run broken: gap {:.0}ms > {}ms",
                t - last,
                self.config.max_gap_ms
            );
            self.enter_idle();
            return TrackerUpdate {
                run_broken: true,
                ..TrackerUpdate::default()
            };
        }

        self.last_qualifying_event = Some(t.max(last));
        let raw = (t - start) / self.config.sustained_duration_ms as f64;
        self.progress = self.progress.max(raw.clamp(0.0, 1.0));

        let mut update = TrackerUpdate {
            progress: self.progress,
            ..TrackerUpdate::default()
        };

        let quarter = ((self.progress * 4.0).floor() as u8).min(4);
        if quarter > self.last_milestone {
            self.last_milestone = quarter;
            update.milestone = Some(quarter);
        }

        if self.progress >= 1.0 {
            self.phase = TrackerPhase::Completed;
            self.completions += 1;
            update.completed_at = Some(t);

            self.phase = TrackerPhase::Cooldown;
            self.cooldown_until = Some(t + self.config.cooldown_ms as f64);
            log::info!(
                "[sustained] completed at t={:.0}, cooling down for {}ms",
                t,
                self.config.cooldown_ms
            );
        }

        update
    }

    /// Time-driven transitions: gap expiry and cooldown end.
    /// Returns true when the phase changed.
    pub fn tick(&mut self, now: f64) -> bool {
        match self.phase {
            TrackerPhase::Accumulating => {
                let expired = self
                    .last_qualifying_event
                    .map(|last| now - last > self.config.max_gap_ms as f64)
                    .unwrap_or(true);
                if expired {
                    log::debug!("[sustained] run expired at t={:.0}", now);
                    self.enter_idle();
                }
                expired
            }
            TrackerPhase::Cooldown => {
                let done = self.cooldown_until.map(|until| now >= until).unwrap_or(true);
                if done {
                    self.enter_idle();
                }
                done
            }
            TrackerPhase::Idle | TrackerPhase::Completed => false,
        }
    }

    fn enter_idle(&mut self) {
        self.phase = TrackerPhase::Idle;
        self.accumulation_start = None;
        self.last_qualifying_event = None;
        self.progress = 0.0;
        self.cooldown_until = None;
        self.last_milestone = 0;
    }

    pub fn phase(&self) -> TrackerPhase {
        self.phase
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn is_accumulating(&self) -> bool {
        self.phase == TrackerPhase::Accumulating
    }

    pub fn accumulation_start(&self) -> Option<f64> {
        self.accumulation_start
    }

    pub fn last_qualifying_event(&self) -> Option<f64> {
        self.last_qualifying_event
    }

    pub fn cooldown_until(&self) -> Option<f64> {
        self.cooldown_until
    }

    pub fn completions(&self) -> u64 {
        self.completions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config() -> TrackerConfig {
        TrackerConfig {
            sustained_duration_ms: 3000,
            max_gap_ms: 600,
            cooldown_ms: 1000,
        }
    }

    fn event(t: f64) -> ShakeEvent {
        ShakeEvent {
            timestamp: t,
            magnitude: 15.0,
        }
    }

    #[test]
    fn test_first_event_starts_run() {
        let mut tracker = SustainedShakeTracker::new(config());
        assert_eq!(tracker.phase(), TrackerPhase::Idle);

        let update = tracker.on_event(&event(100.0));
        assert_eq!(tracker.phase(), TrackerPhase::Accumulating);
        assert_eq!(update.progress, 0.0);
        assert_eq!(tracker.accumulation_start(), Some(100.0));
    }

    #[test]
    fn test_progress_accumulates_and_completes_once() {
        let mut tracker = SustainedShakeTracker::new(config());
        let mut completions = Vec::new();
        let mut last_progress = 0.0;

        // Cooldown ends at 4150, so stop before a second run could start
        for i in 0..=19 {
            let t = i as f64 * 210.0;
            let update = tracker.on_event(&event(t));
            assert!((0.0..=1.0).contains(&update.progress));
            if let Some(at) = update.completed_at {
                completions.push(at);
            }
            if tracker.is_accumulating() {
                assert!(tracker.progress() >= last_progress);
                last_progress = tracker.progress();
            }
        }

        // 14 * 210 = 2940 < 3000, so the 16th event completes
        assert_eq!(completions, vec![3150.0]);
        assert_eq!(tracker.completions(), 1);
        assert_eq!(tracker.phase(), TrackerPhase::Cooldown);
        assert_eq!(tracker.progress(), 1.0);
    }

    #[test]
    fn test_gap_breaks_run_without_partial_credit() {
        let mut tracker = SustainedShakeTracker::new(config());
        tracker.on_event(&event(0.0));
        tracker.on_event(&event(210.0));
        assert_relative_eq!(tracker.progress(), 0.07);

        let update = tracker.on_event(&event(2000.0));
        assert!(update.run_broken);
        assert_eq!(tracker.phase(), TrackerPhase::Idle);
        assert_eq!(tracker.progress(), 0.0);

        let update = tracker.on_event(&event(2010.0));
        assert_eq!(update.progress, 0.0);
        assert_eq!(tracker.accumulation_start(), Some(2010.0));
    }

    #[test]
    fn test_tick_expires_silent_run() {
        let mut tracker = SustainedShakeTracker::new(config());
        tracker.on_event(&event(0.0));
        tracker.on_event(&event(210.0));

        assert!(!tracker.tick(810.0));
        assert!(tracker.is_accumulating());
        assert!(tracker.tick(811.0));
        assert_eq!(tracker.phase(), TrackerPhase::Idle);
        assert_eq!(tracker.progress(), 0.0);

        // Next event after expiry anchors a fresh run
        tracker.on_event(&event(2000.0));
        assert_eq!(tracker.accumulation_start(), Some(2000.0));
    }

    #[test]
    fn test_cooldown_blocks_new_runs() {
        let mut tracker = SustainedShakeTracker::new(config());
        let mut t = 0.0;
        while tracker.completions() == 0 {
            tracker.on_event(&event(t));
            t += 200.0;
        }
        let completed_at = t - 200.0;
        let until = tracker.cooldown_until().unwrap();
        assert_eq!(until, completed_at + 1000.0);

        // Vigorous shaking during cooldown changes nothing
        while t < until {
            let update = tracker.on_event(&event(t));
            assert!(update.ignored);
            assert_eq!(tracker.phase(), TrackerPhase::Cooldown);
            t += 50.0;
        }

        assert!(!tracker.tick(until - 1.0));
        assert!(tracker.tick(until));
        assert_eq!(tracker.phase(), TrackerPhase::Idle);
        assert_eq!(tracker.progress(), 0.0);
    }

    #[test]
    fn test_event_after_cooldown_starts_run() {
        let mut tracker = SustainedShakeTracker::new(TrackerConfig {
            sustained_duration_ms: 400,
            max_gap_ms: 600,
            cooldown_ms: 1000,
        });
        tracker.on_event(&event(0.0));
        tracker.on_event(&event(200.0));
        tracker.on_event(&event(400.0));
        assert_eq!(tracker.phase(), TrackerPhase::Cooldown);

        // No tick in between: the event itself ends the cooldown
        tracker.on_event(&event(1400.0));
        assert_eq!(tracker.phase(), TrackerPhase::Accumulating);
        assert_eq!(tracker.accumulation_start(), Some(1400.0));
    }

    #[test]
    fn test_quarter_milestones() {
        let mut tracker = SustainedShakeTracker::new(config());
        let mut milestones = Vec::new();
        for i in 0..=15 {
            let update = tracker.on_event(&event(i as f64 * 250.0));
            if let Some(quarter) = update.milestone {
                milestones.push(quarter);
            }
        }
        assert_eq!(milestones, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_progress_never_regresses_on_jitter() {
        let mut tracker = SustainedShakeTracker::new(config());
        tracker.on_event(&event(1000.0));
        tracker.on_event(&event(1500.0));
        let before = tracker.progress();

        // Slightly older timestamp (clock jitter) must not lower progress
        tracker.on_event(&event(1490.0));
        assert!(tracker.progress() >= before);
        assert_eq!(tracker.last_qualifying_event(), Some(1500.0));
    }
}
