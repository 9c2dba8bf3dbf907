use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use aer_protocol::{EventBatch, Frame, FrameShape, Imu6Event, PolarityEvent, SpecialEvent};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

/// Special event kind emitted once when a stream starts.
pub const TIMESTAMP_RESET: u8 = 1;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("unsupported device {name:?} (available: {available})")]
    Unsupported { name: String, available: String },
    #[error("failed to apply bias file {path}: {reason}")]
    Bias { path: String, reason: String },
    #[error("device is not streaming")]
    NotStreaming,
    #[error("device stream failed: {0}")]
    Stream(String),
}

/// Device selection handed to a device factory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceSpec {
    pub name: String,
    pub noise_filter: bool,
    pub bias_file: Option<PathBuf>,
}

/// Sensor hardware as seen by a publisher.
pub trait EventDevice: Send {
    fn name(&self) -> &str;

    fn start_data_stream(&mut self) -> Result<(), DeviceError>;

    /// Returns every batch available since the previous call without blocking.
    fn poll_batches(&mut self) -> Result<Vec<EventBatch>, DeviceError>;

    fn set_bias_from_json(&mut self, path: &Path) -> Result<(), DeviceError>;

    fn enable_noise_filter(&mut self, _enabled: bool) {}

    fn shutdown(&mut self);
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub width: u16,
    pub height: u16,
    /// Polarity events per second.
    pub event_rate: u32,
    pub imu_rate: u32,
    /// Frames per second, 0 disables frames.
    pub frame_rate: u32,
    pub max_events_per_poll: usize,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 346,
            height: 260,
            event_rate: 100_000,
            imu_rate: 1_000,
            frame_rate: 0,
            max_events_per_poll: 20_000,
            seed: 0x5eed_cafe,
        }
    }
}

/// Seeded generator standing in for a camera.
#[derive(Debug)]
pub struct SyntheticDevice {
    config: SyntheticConfig,
    rng: u64,
    streaming: bool,
    noise_filter: bool,
    bias: Option<Value>,
    last_poll: Option<Instant>,
    clock_us: i64,
    reset_sent: bool,
    event_carry: f64,
    imu_carry: f64,
    frame_carry: f64,
}

impl SyntheticDevice {
    pub fn new(config: SyntheticConfig) -> Self {
        // xorshift state must be non-zero
        let rng = config.seed.max(1);
        Self {
            config,
            rng,
            streaming: false,
            noise_filter: false,
            bias: None,
            last_poll: None,
            clock_us: 0,
            reset_sent: false,
            event_carry: 0.0,
            imu_carry: 0.0,
            frame_carry: 0.0,
        }
    }

    pub fn bias(&self) -> Option<&Value> {
        self.bias.as_ref()
    }

    pub fn noise_filter_enabled(&self) -> bool {
        self.noise_filter
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Produces the batches covering `elapsed` of device time.
    pub fn generate(&mut self, elapsed: Duration) -> Vec<EventBatch> {
        let span_us = i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX / 2);
        let start = self.clock_us;
        self.clock_us = self.clock_us.saturating_add(span_us);
        let secs = elapsed.as_secs_f64();

        let mut batches = Vec::new();
        if !self.reset_sent {
            self.reset_sent = true;
            batches.push(EventBatch::Special(vec![SpecialEvent {
                timestamp: start,
                kind: TIMESTAMP_RESET,
                data: 0,
            }]));
        }

        let events = due(&mut self.event_carry, self.config.event_rate, secs)
            .min(self.config.max_events_per_poll);
        if events > 0 {
            let mut records = Vec::with_capacity(events);
            for index in 0..events {
                let x = (self.next() % u64::from(self.config.width.max(1))) as i16;
                let y = (self.next() % u64::from(self.config.height.max(1))) as i16;
                records.push(PolarityEvent {
                    timestamp: spread(start, span_us, index, events),
                    x,
                    y,
                    polarity: self.next() & 1 == 1,
                });
            }
            batches.push(EventBatch::Polarity(records));
        }

        let samples = due(&mut self.imu_carry, self.config.imu_rate, secs);
        if samples > 0 {
            let mut records = Vec::with_capacity(samples);
            for index in 0..samples {
                let timestamp = spread(start, span_us, index, samples);
                let wobble = (timestamp as f64 / 1_000_000.0).sin() as f32;
                records.push(Imu6Event {
                    timestamp,
                    accel: [0.01 * wobble, -1.0, 0.02 * wobble],
                    gyro: [wobble, 0.5 * wobble, -wobble],
                    temperature: 30.0 + self.unit() * 0.1,
                });
            }
            batches.push(EventBatch::Imu6(records));
        }

        let frames = due(&mut self.frame_carry, self.config.frame_rate, secs);
        if frames > 0 {
            let shape = FrameShape {
                width: u32::from(self.config.width),
                height: u32::from(self.config.height),
                channels: 1,
            };
            let mut records = Vec::with_capacity(frames);
            for index in 0..frames {
                let offset = self.next();
                let pixels = (0..shape.pixel_count().unwrap_or(0))
                    .map(|pixel| ((pixel as u64).wrapping_add(offset) & 0xffff) as u16)
                    .collect();
                records.push(Frame {
                    timestamp: spread(start, span_us, index, frames),
                    pixels,
                });
            }
            batches.push(EventBatch::Frame {
                shape,
                frames: records,
            });
        }

        batches
    }

    fn next(&mut self) -> u64 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        x
    }

    fn unit(&mut self) -> f32 {
        (self.next() >> 40) as f32 / (1u64 << 24) as f32
    }
}

impl EventDevice for SyntheticDevice {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn start_data_stream(&mut self) -> Result<(), DeviceError> {
        self.streaming = true;
        self.last_poll = Some(Instant::now());
        info!(
            width = self.config.width,
            height = self.config.height,
            event_rate = self.config.event_rate,
            "synthetic device streaming"
        );
        Ok(())
    }

    fn poll_batches(&mut self) -> Result<Vec<EventBatch>, DeviceError> {
        if !self.streaming {
            return Err(DeviceError::NotStreaming);
        }
        let now = Instant::now();
        let elapsed = self
            .last_poll
            .map(|last| now.duration_since(last))
            .unwrap_or_default();
        self.last_poll = Some(now);
        Ok(self.generate(elapsed))
    }

    fn set_bias_from_json(&mut self, path: &Path) -> Result<(), DeviceError> {
        let bias_error = |reason: String| DeviceError::Bias {
            path: path.display().to_string(),
            reason,
        };
        let raw = fs::read_to_string(path).map_err(|err| bias_error(err.to_string()))?;
        let value: Value = serde_json::from_str(&raw).map_err(|err| bias_error(err.to_string()))?;
        if !value.is_object() {
            return Err(bias_error("expected a JSON object".to_string()));
        }
        debug!(path = %path.display(), "bias applied");
        self.bias = Some(value);
        Ok(())
    }

    fn enable_noise_filter(&mut self, enabled: bool) {
        self.noise_filter = enabled;
    }

    fn shutdown(&mut self) {
        if self.streaming {
            self.streaming = false;
            debug!("synthetic device stopped");
        }
    }
}

fn due(carry: &mut f64, rate: u32, secs: f64) -> usize {
    *carry += f64::from(rate) * secs;
    let whole = carry.floor();
    *carry -= whole;
    whole as usize
}

fn spread(start: i64, span_us: i64, index: usize, total: usize) -> i64 {
    start + span_us.saturating_mul(index as i64) / total.max(1) as i64
}
