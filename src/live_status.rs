use serde::{Deserialize, Serialize};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::feedback::{self, MascotMood};
use crate::session::{SessionStats, ShakeSession, ShakeSnapshot};
use crate::sensors::SensorSource;
use crate::tracker::TrackerPhase;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    // Detector state
    pub snapshot: ShakeSnapshot,
    pub tracker_phase: Option<TrackerPhase>,
    pub mascot_mood: MascotMood,
    pub progress_percent: u8,
    pub resume_deadline_ms: Option<f64>,
    // Sensor health
    pub enabled: bool,
    pub sensor_active: bool,
    pub sensor_status: String,
    pub stats: SessionStats,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            uptime_seconds: 0,
            snapshot: ShakeSnapshot::default(),
            tracker_phase: None,
            mascot_mood: MascotMood::Default,
            progress_percent: 0,
            resume_deadline_ms: None,
            enabled: false,
            sensor_active: false,
            sensor_status: String::new(),
            stats: SessionStats::default(),
        }
    }

    /// Capture the current state of a session
    pub fn from_session<S: SensorSource>(session: &ShakeSession<S>, uptime_seconds: u64) -> Self {
        let snapshot = session.snapshot();
        let now = session.now();

        Self {
            timestamp: current_timestamp(),
            uptime_seconds,
            snapshot,
            tracker_phase: session.tracker().map(|t| t.phase()),
            mascot_mood: MascotMood::from_snapshot(&snapshot),
            progress_percent: feedback::percent(&snapshot),
            resume_deadline_ms: session
                .tracker()
                .and_then(|t| feedback::resume_deadline_ms(t, now)),
            enabled: session.is_enabled(),
            sensor_active: session.is_active(),
            sensor_status: session.backoff().status(session.last_tick()),
            stats: session.stats(),
        }
    }

    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ShakeOptions;
    use crate::sensors::ScriptedSource;

    #[test]
    fn test_status_from_session() {
        let session =
            ShakeSession::with_options(ScriptedSource::new(), ShakeOptions::default()).unwrap();
        let status = LiveStatus::from_session(&session, 12);

        assert!(status.enabled);
        assert!(status.sensor_active);
        assert_eq!(status.sensor_status, "sensor: OK");
        assert_eq!(status.tracker_phase, Some(TrackerPhase::Idle));
        assert_eq!(status.mascot_mood, MascotMood::Default);
        assert_eq!(status.uptime_seconds, 12);
    }

    #[test]
    fn test_status_serializes() {
        let json = serde_json::to_value(LiveStatus::new()).unwrap();
        assert_eq!(json["mascot_mood"], "default");
        assert_eq!(json["snapshot"]["shake_count"], 0);
        assert!(json["tracker_phase"].is_null());
    }
}
