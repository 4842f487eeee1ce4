use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

use crate::error::{ShakeError, ShakeResult};

/// Capacity of the per-subscription sample queue
pub const SAMPLE_QUEUE_CAPACITY: usize = 500;

/// Timestamped 3-axis accelerometer sample (timestamp in monotonic ms)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelerationSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp: f64,
}

impl AccelerationSample {
    pub fn new(x: f64, y: f64, z: f64, timestamp: f64) -> Self {
        Self { x, y, z, timestamp }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// False when any axis or the timestamp is NaN or infinite
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.timestamp.is_finite()
    }
}

/// Handle identifying one subscription on a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// Sending half of a subscription; the session keeps the [`SampleQueue`].
#[derive(Debug, Clone)]
pub struct SampleSink {
    tx: Sender<AccelerationSample>,
    overflowed: Arc<AtomicU64>,
}

impl SampleSink {
    /// Create a bounded sink/queue pair
    pub fn pair() -> (SampleSink, SampleQueue) {
        let (tx, rx) = channel::bounded(SAMPLE_QUEUE_CAPACITY);
        let overflowed = Arc::new(AtomicU64::new(0));
        (
            SampleSink {
                tx,
                overflowed: overflowed.clone(),
            },
            SampleQueue { rx, overflowed },
        )
    }

    /// Deliver a sample. Returns false once the queue is gone.
    ///
    /// A full queue drops the sample rather than blocking the sensor.
    pub fn deliver(&self, sample: AccelerationSample) -> bool {
        match self.tx.try_send(sample) {
            Ok(_) => true,
            Err(TrySendError::Full(_)) => {
                self.overflowed.fetch_add(1, Ordering::Relaxed);
                log::debug!("[accel] queue full, dropped sample at {:.0}ms", sample.timestamp);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Receiving half of a subscription
#[derive(Debug)]
pub struct SampleQueue {
    rx: Receiver<AccelerationSample>,
    overflowed: Arc<AtomicU64>,
}

impl SampleQueue {
    /// Take everything queued so far without blocking
    pub fn drain(&self) -> Vec<AccelerationSample> {
        self.rx.try_iter().collect()
    }

    /// Samples lost to a full queue since the last call
    pub fn take_overflowed(&self) -> u64 {
        self.overflowed.swap(0, Ordering::Relaxed)
    }
}

/// Platform accelerometer feed consumed by the shake session
pub trait SensorSource {
    /// Start pushing samples into `sink`.
    ///
    /// Fails with [`ShakeError::SensorUnavailable`] when permission is denied
    /// or the hardware is absent.
    fn subscribe(&mut self, sink: SampleSink) -> ShakeResult<SubscriptionId>;

    /// Stop delivering to the given subscription. Unknown ids are ignored.
    fn unsubscribe(&mut self, id: SubscriptionId);
}

/// In-memory source driven by the caller, used by replay and tests
#[derive(Debug, Default)]
pub struct ScriptedSource {
    sinks: Vec<(SubscriptionId, SampleSink)>,
    next_id: u64,
    failures_remaining: u32,
    total_subscribes: u32,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source whose next `failures` subscribe calls report the sensor unavailable
    pub fn failing(failures: u32) -> Self {
        Self {
            failures_remaining: failures,
            ..Self::default()
        }
    }

    /// Push one sample to every live subscriber, returning how many accepted it
    pub fn emit(&mut self, sample: AccelerationSample) -> usize {
        self.sinks.retain(|(_, sink)| sink.deliver(sample));
        self.sinks.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn total_subscribes(&self) -> u32 {
        self.total_subscribes
    }
}

impl SensorSource for ScriptedSource {
    fn subscribe(&mut self, sink: SampleSink) -> ShakeResult<SubscriptionId> {
        self.total_subscribes += 1;
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(ShakeError::SensorUnavailable(
                "scripted sensor refused subscription".to_string(),
            ));
        }

        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.sinks.push((id, sink));
        Ok(id)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.sinks.retain(|(sub, _)| *sub != id);
    }
}

/// Live accelerometer source polling `termux-sensor` from a tokio task,
/// falling back to a synthetic shake pattern when the tool is missing.
pub struct TermuxSource {
    origin: Instant,
    period: Duration,
    tasks: HashMap<SubscriptionId, JoinHandle<()>>,
    next_id: u64,
}

impl TermuxSource {
    /// `period_ms` is the sampling period (20 ms ≈ 50 Hz)
    pub fn new(origin: Instant, period_ms: u64) -> Self {
        Self {
            origin,
            period: Duration::from_millis(period_ms.max(1)),
            tasks: HashMap::new(),
            next_id: 0,
        }
    }

    /// Milliseconds since the source origin, the clock samples are stamped with
    pub fn now_ms(&self) -> f64 {
        elapsed_ms(self.origin)
    }
}

fn elapsed_ms(origin: Instant) -> f64 {
    origin.elapsed().as_secs_f64() * 1000.0
}

impl SensorSource for TermuxSource {
    fn subscribe(&mut self, sink: SampleSink) -> ShakeResult<SubscriptionId> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            ShakeError::SensorUnavailable(format!("no async runtime for sampling task: {e}"))
        })?;

        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        let task = handle.spawn(accel_loop(sink, self.origin, self.period));
        self.tasks.insert(id, task);
        Ok(id)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        if let Some(task) = self.tasks.remove(&id) {
            task.abort();
        }
    }
}

impl Drop for TermuxSource {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

async fn accel_loop(sink: SampleSink, origin: Instant, period: Duration) {
    let mut interval = interval(period);
    let mut mock = MockShaker::default();
    let mut sample_count = 0u64;
    let mut use_termux = true;

    loop {
        interval.tick().await;

        let reading = if use_termux {
            read_accelerometer(origin).await
        } else {
            None
        };
        let sample = match reading {
            Some(sample) => sample,
            None => {
                if use_termux {
                    log::info!("[accel] termux-sensor unavailable, using synthetic shake pattern");
                    use_termux = false;
                }
                mock.next_sample(elapsed_ms(origin))
            }
        };

        if !sink.deliver(sample) {
            log::info!("[accel] Channel closed after {} samples", sample_count);
            break;
        }

        sample_count += 1;
        if sample_count % 500 == 0 {
            log::debug!("[accel] {} samples", sample_count);
        }
    }
}

/// Spawning termux-sensor takes a while, so the sample is stamped once the read returns
async fn read_accelerometer(origin: Instant) -> Option<AccelerationSample> {
    // Format: Accelerometer event: x=X, y=Y, z=Z, accuracy=0, timestamp=TS
    let output = tokio::process::Command::new("termux-sensor")
        .arg("-n")
        .arg("1")
        .arg("-s")
        .arg("accelerometer")
        .output()
        .await
        .ok()?;

    let timestamp = elapsed_ms(origin);
    let text = String::from_utf8_lossy(&output.stdout);
    parse_accel_output(&text, timestamp)
}

/// Parse one `x=.., y=.., z=..` line as printed by termux-sensor
pub fn parse_accel_output(output: &str, timestamp: f64) -> Option<AccelerationSample> {
    let mut x = None;
    let mut y = None;
    let mut z = None;

    for part in output.split(',') {
        let part = part.trim();
        let part = part.rsplit(' ').next().unwrap_or(part);
        if let Some(val_str) = part.strip_prefix("x=") {
            x = Some(val_str.trim().parse().ok()?);
        } else if let Some(val_str) = part.strip_prefix("y=") {
            y = Some(val_str.trim().parse().ok()?);
        } else if let Some(val_str) = part.strip_prefix("z=") {
            z = Some(val_str.trim().parse().ok()?);
        }
    }

    Some(AccelerationSample::new(x?, y?, z?, timestamp))
}

/// Alternates 4 s of vigorous shaking with 4 s of rest
#[derive(Debug, Default)]
struct MockShaker {
    tick: u64,
}

impl MockShaker {
    fn next_sample(&mut self, timestamp: f64) -> AccelerationSample {
        use std::f64::consts::PI;
        self.tick += 1;

        let shaking = (timestamp / 4000.0) as u64 % 2 == 0;
        let t = self.tick as f64 * 0.02;
        if shaking {
            let swing = if self.tick % 4 < 2 { 12.0 } else { -12.0 };
            AccelerationSample::new(swing, (t * 2.0 * PI).cos() * 2.0, 9.81, timestamp)
        } else {
            AccelerationSample::new(
                (t * 2.0 * PI).sin() * 0.05,
                (t * 2.0 * PI).cos() * 0.03,
                9.81,
                timestamp,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accel_magnitude() {
        let sample = AccelerationSample::new(3.0, 4.0, 0.0, 0.0);
        assert_eq!(sample.magnitude(), 5.0);
    }

    #[test]
    fn test_non_finite_sample() {
        assert!(AccelerationSample::new(0.0, 0.0, 9.81, 1.0).is_finite());
        assert!(!AccelerationSample::new(f64::NAN, 0.0, 9.81, 1.0).is_finite());
        assert!(!AccelerationSample::new(0.0, f64::INFINITY, 9.81, 1.0).is_finite());
    }

    #[test]
    fn test_scripted_subscribe_and_emit() {
        let mut source = ScriptedSource::new();
        let (sink, queue) = SampleSink::pair();
        let id = source.subscribe(sink).unwrap();

        assert_eq!(source.emit(AccelerationSample::new(0.0, 0.0, 1.0, 0.0)), 1);
        assert_eq!(queue.drain()[0].z, 1.0);

        source.unsubscribe(id);
        assert_eq!(source.subscriber_count(), 0);
        assert_eq!(source.emit(AccelerationSample::new(0.0, 0.0, 1.0, 1.0)), 0);
    }

    #[test]
    fn test_scripted_drops_closed_sinks() {
        let mut source = ScriptedSource::new();
        let (sink, queue) = SampleSink::pair();
        source.subscribe(sink).unwrap();
        drop(queue);

        assert_eq!(source.emit(AccelerationSample::new(0.0, 0.0, 1.0, 0.0)), 0);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn test_full_queue_counts_overflow() {
        let (sink, queue) = SampleSink::pair();
        for i in 0..SAMPLE_QUEUE_CAPACITY + 3 {
            assert!(sink.deliver(AccelerationSample::new(0.0, 0.0, 9.81, i as f64)));
        }

        assert_eq!(queue.take_overflowed(), 3);
        assert_eq!(queue.take_overflowed(), 0);
        let drained = queue.drain();
        assert_eq!(drained.len(), SAMPLE_QUEUE_CAPACITY);
        assert_eq!(drained.last().map(|s| s.timestamp), Some((SAMPLE_QUEUE_CAPACITY - 1) as f64));
    }

    #[test]
    fn test_scripted_failures() {
        let mut source = ScriptedSource::failing(1);
        let (sink, _rx) = SampleSink::pair();
        assert!(matches!(
            source.subscribe(sink.clone()),
            Err(ShakeError::SensorUnavailable(_))
        ));
        assert!(source.subscribe(sink).is_ok());
        assert_eq!(source.total_subscribes(), 2);
    }

    #[test]
    fn test_parse_accel_output() {
        let line = "Accelerometer event: x=0.5, y=0.3, z=9.8, accuracy=0, timestamp=1234567890";
        let sample = parse_accel_output(line, 42.0).unwrap();
        assert_eq!(sample.x, 0.5);
        assert_eq!(sample.y, 0.3);
        assert_eq!(sample.z, 9.8);
        assert_eq!(sample.timestamp, 42.0);

        assert!(parse_accel_output("no sensor data", 0.0).is_none());
        assert!(parse_accel_output("x=abc, y=0, z=0", 0.0).is_none());
    }

    #[test]
    fn test_termux_source_requires_runtime() {
        let mut source = TermuxSource::new(Instant::now(), 20);
        let (sink, _rx) = SampleSink::pair();
        assert!(matches!(
            source.subscribe(sink),
            Err(ShakeError::SensorUnavailable(_))
        ));
    }

    #[test]
    fn test_mock_shaker_alternates() {
        let mut mock = MockShaker::default();
        let shaking: Vec<f64> = (0..4).map(|i| mock.next_sample(i as f64 * 20.0).x).collect();
        assert!(shaking.iter().any(|x| x.abs() > 10.0));

        let resting = mock.next_sample(5000.0);
        assert!(resting.x.abs() < 1.0);
    }
}
