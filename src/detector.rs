use serde::{Deserialize, Serialize};

use crate::sensitivity::SensitivityProfile;
use crate::sensors::AccelerationSample;

/// Default window after the last above-threshold motion during which
/// `is_shaking` stays true
pub const DEFAULT_SHAKING_HOLD_MS: u64 = 500;

/// One debounced detection of an abrupt change in acceleration magnitude
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShakeEvent {
    pub timestamp: f64,
    pub magnitude: f64,
}

/// Why a sample did not produce an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Qualifying delta outside the debounce window
    Event,
    /// First sample of the session; only seeds the baseline
    Baseline,
    /// Delta below threshold
    Quiet,
    /// Qualifying delta inside the debounce window
    Debounced,
    /// NaN or infinite axis
    Malformed,
    /// Timestamp older than the last processed sample
    OutOfOrder,
}

/// Threshold + debounce detector turning raw samples into shake events
#[derive(Debug, Clone, PartialEq)]
pub struct ShakeEventDetector {
    profile: SensitivityProfile,
    shaking_hold_ms: f64,
    debug: bool,

    previous_magnitude: Option<f64>,
    last_sample_timestamp: Option<f64>,
    last_event_timestamp: Option<f64>,
    last_motion_timestamp: Option<f64>,
    shake_count: u64,
    is_shaking_flag: bool,
}

impl ShakeEventDetector {
    pub fn new(profile: SensitivityProfile, shaking_hold_ms: u64, debug: bool) -> Self {
        Self {
            profile,
            shaking_hold_ms: shaking_hold_ms as f64,
            debug,
            previous_magnitude: None,
            last_sample_timestamp: None,
            last_event_timestamp: None,
            last_motion_timestamp: None,
            shake_count: 0,
            is_shaking_flag: false,
        }
    }

    /// Swap thresholds without touching runtime state
    pub fn set_profile(&mut self, profile: SensitivityProfile, shaking_hold_ms: u64, debug: bool) {
        self.profile = profile;
        self.shaking_hold_ms = shaking_hold_ms as f64;
        self.debug = debug;
    }

    pub fn profile(&self) -> SensitivityProfile {
        self.profile
    }

    /// Process one sample, returning the event it produced (if any)
    pub fn process(&mut self, sample: &AccelerationSample) -> Option<ShakeEvent> {
        self.classify(sample).1
    }

    /// Process one sample and report what happened to it
    pub fn classify(&mut self, sample: &AccelerationSample) -> (SampleOutcome, Option<ShakeEvent>) {
        if !sample.is_finite() {
            if self.debug {
                log::warn!(
                    "[shake] dropping malformed sample x={} y={} z={} t={}",
                    sample.x,
                    sample.y,
                    sample.z,
                    sample.timestamp
                );
            }
            return (SampleOutcome::Malformed, None);
        }

        if let Some(last) = self.last_sample_timestamp {
            if sample.timestamp < last {
                if self.debug {
                    log::warn!(
                        "[shake] dropping out-of-order sample t={:.1} (last {:.1})",
                        sample.timestamp,
                        last
                    );
                }
                return (SampleOutcome::OutOfOrder, None);
            }
        }
        self.last_sample_timestamp = Some(sample.timestamp);

        let magnitude = sample.magnitude();
        let previous = match self.previous_magnitude.replace(magnitude) {
            Some(previous) => previous,
            None => return (SampleOutcome::Baseline, None),
        };

        let delta = (magnitude - previous).abs();
        if delta < self.profile.magnitude_delta_threshold {
            self.age_out(sample.timestamp);
            return (SampleOutcome::Quiet, None);
        }

        self.is_shaking_flag = true;
        self.last_motion_timestamp = Some(sample.timestamp);

        let debounced = self
            .last_event_timestamp
            .map(|last| sample.timestamp - last < self.profile.debounce_ms as f64)
            .unwrap_or(false);
        if debounced {
            return (SampleOutcome::Debounced, None);
        }

        self.last_event_timestamp = Some(sample.timestamp);
        self.shake_count += 1;

        if self.debug {
            log::debug!(
                "[shake] event #{} at t={:.1} delta={:.2} magnitude={:.2}",
                self.shake_count,
                sample.timestamp,
                delta,
                magnitude
            );
        }

        (
            SampleOutcome::Event,
            Some(ShakeEvent {
                timestamp: sample.timestamp,
                magnitude,
            }),
        )
    }

    /// Clear the shaking flag once the hold window has passed without motion
    pub fn age_out(&mut self, now: f64) {
        if !self.is_shaking_flag {
            return;
        }
        if let Some(last) = self.last_motion_timestamp {
            if now - last > self.shaking_hold_ms {
                self.is_shaking_flag = false;
            }
        }
    }

    /// Whether the user is shaking as of `now`, without mutating state
    pub fn is_shaking_at(&self, now: f64) -> bool {
        self.is_shaking_flag
            && self
                .last_motion_timestamp
                .map(|last| now - last <= self.shaking_hold_ms)
                .unwrap_or(false)
    }

    pub fn shake_count(&self) -> u64 {
        self.shake_count
    }

    pub fn last_event_timestamp(&self) -> Option<f64> {
        self.last_event_timestamp
    }

    pub fn last_sample_timestamp(&self) -> Option<f64> {
        self.last_sample_timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(threshold: f64, debounce_ms: u64) -> SensitivityProfile {
        SensitivityProfile {
            magnitude_delta_threshold: threshold,
            debounce_ms,
        }
    }

    fn z(value: f64, t: f64) -> AccelerationSample {
        AccelerationSample::new(0.0, 0.0, value, t)
    }

    #[test]
    fn test_first_sample_seeds_baseline() {
        let mut detector = ShakeEventDetector::new(profile(5.0, 200), 500, false);
        assert_eq!(detector.classify(&z(20.0, 0.0)).0, SampleOutcome::Baseline);
        assert_eq!(detector.shake_count(), 0);
        assert!(!detector.is_shaking_at(0.0));
    }

    #[test]
    fn test_delta_threshold() {
        let mut detector = ShakeEventDetector::new(profile(5.0, 200), 500, false);
        detector.process(&z(9.81, 0.0));
        assert_eq!(detector.classify(&z(13.0, 10.0)).0, SampleOutcome::Quiet);

        let event = detector.process(&z(19.0, 20.0)).unwrap();
        assert_eq!(event.timestamp, 20.0);
        assert_eq!(event.magnitude, 19.0);
        assert_eq!(detector.shake_count(), 1);
        assert!(detector.is_shaking_at(20.0));
    }

    #[test]
    fn test_debounce_suppresses_events_but_renews_shaking() {
        let mut detector = ShakeEventDetector::new(profile(5.0, 200), 300, false);
        detector.process(&z(0.0, 0.0));
        assert!(detector.process(&z(10.0, 10.0)).is_some());

        assert_eq!(detector.classify(&z(0.0, 100.0)).0, SampleOutcome::Debounced);
        assert_eq!(detector.classify(&z(10.0, 200.0)).0, SampleOutcome::Debounced);
        assert_eq!(detector.shake_count(), 1);
        // Renewed at t=200, so still shaking 300 ms after the only event
        assert!(detector.is_shaking_at(400.0));

        let event = detector.process(&z(0.0, 210.0)).unwrap();
        assert_eq!(event.timestamp, 210.0);
        assert_eq!(detector.shake_count(), 2);
    }

    #[test]
    fn test_events_are_debounce_apart() {
        let mut detector = ShakeEventDetector::new(profile(5.0, 200), 500, false);
        let mut events = Vec::new();
        for i in 0..200 {
            let value = if i % 2 == 0 { 0.0 } else { 15.0 };
            if let Some(event) = detector.process(&z(value, i as f64 * 17.0)) {
                events.push(event);
            }
        }

        assert!(events.len() > 5);
        for pair in events.windows(2) {
            assert!(pair[1].timestamp - pair[0].timestamp >= 200.0);
        }
        assert_eq!(detector.shake_count(), events.len() as u64);
    }

    #[test]
    fn test_shaking_flag_ages_out() {
        let mut detector = ShakeEventDetector::new(profile(5.0, 200), 500, false);
        detector.process(&z(0.0, 0.0));
        detector.process(&z(10.0, 100.0));

        assert!(detector.is_shaking_at(600.0));
        assert!(!detector.is_shaking_at(601.0));

        detector.age_out(550.0);
        assert!(detector.is_shaking_at(550.0));
        detector.age_out(700.0);
        assert!(!detector.is_shaking_at(700.0));
    }

    #[test]
    fn test_malformed_samples_do_not_touch_baseline() {
        let mut detector = ShakeEventDetector::new(profile(5.0, 200), 500, true);
        detector.process(&z(0.0, 0.0));

        let nan = AccelerationSample::new(f64::NAN, 0.0, 100.0, 10.0);
        assert_eq!(detector.classify(&nan).0, SampleOutcome::Malformed);
        let inf = AccelerationSample::new(0.0, f64::NEG_INFINITY, 0.0, 20.0);
        assert_eq!(detector.classify(&inf).0, SampleOutcome::Malformed);

        // Baseline is still 0.0, so a small reading stays quiet
        assert_eq!(detector.classify(&z(1.0, 30.0)).0, SampleOutcome::Quiet);
        assert_eq!(detector.shake_count(), 0);
    }

    #[test]
    fn test_out_of_order_samples_dropped() {
        let mut detector = ShakeEventDetector::new(profile(5.0, 200), 500, false);
        detector.process(&z(0.0, 100.0));
        assert_eq!(detector.classify(&z(50.0, 50.0)).0, SampleOutcome::OutOfOrder);

        // Baseline unchanged by the stale sample
        assert_eq!(detector.classify(&z(1.0, 110.0)).0, SampleOutcome::Quiet);
        assert_eq!(detector.last_sample_timestamp(), Some(110.0));
    }

    #[test]
    fn test_set_profile_keeps_count() {
        let mut detector = ShakeEventDetector::new(profile(5.0, 200), 500, false);
        detector.process(&z(0.0, 0.0));
        detector.process(&z(10.0, 10.0));

        detector.set_profile(profile(20.0, 200), 500, false);
        assert_eq!(detector.shake_count(), 1);
        assert_eq!(detector.classify(&z(0.0, 500.0)).0, SampleOutcome::Quiet);
    }
}
