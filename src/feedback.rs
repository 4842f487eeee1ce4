//! Presentation hints derived from a [`ShakeSnapshot`].
//!
//! Rendering lives with the host UI; these helpers only map detector state
//! onto the mascot and prompt states the shake-to-eat screen shows.

use serde::{Deserialize, Serialize};

use crate::session::ShakeSnapshot;
use crate::tracker::SustainedShakeTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MascotMood {
    Default,
    Hungry,
    Excited,
    Happy,
}

impl MascotMood {
    pub fn from_snapshot(snapshot: &ShakeSnapshot) -> Self {
        if !snapshot.is_sustained_shaking {
            return MascotMood::Default;
        }
        let progress = snapshot.sustained_shake_progress;
        if progress < 0.3 {
            MascotMood::Hungry
        } else if progress < 0.7 {
            MascotMood::Excited
        } else {
            MascotMood::Happy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MascotMood::Default => "default",
            MascotMood::Hungry => "hungry",
            MascotMood::Excited => "excited",
            MascotMood::Happy => "happy",
        }
    }
}

/// Prompt line for the progress overlay
pub fn prompt(snapshot: &ShakeSnapshot) -> &'static str {
    if snapshot.is_sustained_shaking {
        "Keep Shaking!"
    } else {
        "Start Shaking!"
    }
}

/// Whole-percent progress as shown next to the bar
pub fn percent(snapshot: &ShakeSnapshot) -> u8 {
    (snapshot.sustained_shake_progress.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Milliseconds left to resume shaking before the run is lost.
/// `None` when no run is in progress.
pub fn resume_deadline_ms(tracker: &SustainedShakeTracker, now: f64) -> Option<f64> {
    if !tracker.is_accumulating() {
        return None;
    }
    let last = tracker.last_qualifying_event()?;
    let deadline = last + tracker.config().max_gap_ms as f64;
    Some((deadline - now).max(0.0))
}
