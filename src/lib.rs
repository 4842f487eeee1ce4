// Shake-to-eat gesture engine
// Turns a raw accelerometer stream into debounced shake events and a
// sustained-shake progress signal with a single completion per run.

pub mod detector;
pub mod error;
pub mod feedback;
pub mod live_status;
pub mod restart_manager;
pub mod sensitivity;
pub mod sensors;
pub mod session;
pub mod tracker;

pub use detector::{ShakeEvent, ShakeEventDetector};
pub use error::{ShakeError, ShakeResult};
pub use sensitivity::{Sensitivity, SensitivityOverrides, SensitivityProfile};
pub use sensors::{AccelerationSample, ScriptedSource, SensorSource, TermuxSource};
pub use session::{ShakeOptions, ShakeSession, ShakeSnapshot};
pub use tracker::{SustainedShakeTracker, TrackerPhase};
