use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ShakeError, ShakeResult};

/// Named sensitivity preset
///
/// Ordered by the shake intensity needed to register an event: `Low` accepts
/// gentle motion, `High` needs a vigorous shake and rejects more noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

impl Sensitivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sensitivity::Low => "low",
            Sensitivity::Medium => "medium",
            Sensitivity::High => "high",
        }
    }

    /// Preset thresholds, magnitude deltas in m/s²
    pub fn preset(&self) -> SensitivityProfile {
        match self {
            Sensitivity::Low => SensitivityProfile {
                magnitude_delta_threshold: 2.5,
                debounce_ms: 300,
            },
            Sensitivity::Medium => SensitivityProfile {
                magnitude_delta_threshold: 4.0,
                debounce_ms: 250,
            },
            Sensitivity::High => SensitivityProfile {
                magnitude_delta_threshold: 6.0,
                debounce_ms: 200,
            },
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sensitivity {
    type Err = ShakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Sensitivity::Low),
            "medium" => Ok(Sensitivity::Medium),
            "high" => Ok(Sensitivity::High),
            other => Err(ShakeError::config(format!(
                "unknown sensitivity '{other}' (expected low, medium or high)"
            ))),
        }
    }
}

/// Explicit values that replace preset fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensitivityOverrides {
    pub threshold: Option<f64>,
    pub debounce_ms: Option<u64>,
}

/// Concrete thresholds used by the shake event detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensitivityProfile {
    pub magnitude_delta_threshold: f64,
    pub debounce_ms: u64,
}

/// Resolve a preset plus overrides into a profile. Overrides always win.
pub fn resolve(
    named: Sensitivity,
    overrides: SensitivityOverrides,
) -> ShakeResult<SensitivityProfile> {
    let mut profile = named.preset();

    if let Some(threshold) = overrides.threshold {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(ShakeError::config(format!(
                "threshold must be a positive number, got {threshold}"
            )));
        }
        profile.magnitude_delta_threshold = threshold;
    }

    if let Some(debounce_ms) = overrides.debounce_ms {
        if debounce_ms == 0 {
            return Err(ShakeError::config("debounce_ms must be greater than zero"));
        }
        profile.debounce_ms = debounce_ms;
    }

    Ok(profile)
}
