use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("wire message must have 3 parts, got {0}")]
    PartCount(usize),
    #[error("topic is not valid utf-8")]
    TopicEncoding,
    #[error("invalid topic {0:?}")]
    InvalidTopic(String),
    #[error("invalid envelope metadata: {0}")]
    Metadata(String),
    #[error("unknown event kind: {0}")]
    UnknownKind(String),
    #[error("topic kind {topic} does not match metadata kind {metadata}")]
    KindMismatch {
        topic: EventKind,
        metadata: EventKind,
    },
    #[error("record layout mismatch for {0}")]
    LayoutMismatch(EventKind),
    #[error("payload size mismatch for {kind}: got {got}, expected {expected}")]
    PayloadSizeMismatch {
        kind: EventKind,
        got: usize,
        expected: usize,
    },
    #[error("frame has {got} pixels, shape requires {expected}")]
    FrameShapeMismatch { got: usize, expected: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Polarity,
    Special,
    Frame,
    Imu6,
    Imu9,
    Spike,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        Self::Polarity,
        Self::Special,
        Self::Frame,
        Self::Imu6,
        Self::Imu9,
        Self::Spike,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "polarity" => Some(Self::Polarity),
            "special" => Some(Self::Special),
            "frame" => Some(Self::Frame),
            "imu6" => Some(Self::Imu6),
            "imu9" => Some(Self::Imu9),
            "spike" => Some(Self::Spike),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Polarity => "polarity",
            Self::Special => "special",
            Self::Frame => "frame",
            Self::Imu6 => "imu6",
            Self::Imu9 => "imu9",
            Self::Spike => "spike",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolarityEvent {
    pub timestamp: i64,
    pub x: i16,
    pub y: i16,
    pub polarity: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialEvent {
    pub timestamp: i64,
    pub kind: u8,
    pub data: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Imu6Event {
    pub timestamp: i64,
    pub accel: [f32; 3],
    pub gyro: [f32; 3],
    pub temperature: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Imu9Event {
    pub timestamp: i64,
    pub accel: [f32; 3],
    pub gyro: [f32; 3],
    pub temperature: f32,
    pub compass: [f32; 3],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpikeEvent {
    pub timestamp: i64,
    pub neuron_id: u32,
    pub core_id: u8,
    pub chip_id: u8,
}

/// Dimensions shared by every frame of a frame batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameShape {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl FrameShape {
    /// Pixels per frame, `None` when the dimensions overflow.
    pub fn pixel_count(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.channels as usize)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub timestamp: i64,
    pub pixels: Vec<u16>,
}

/// Records of a single kind captured in one poll cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "records", rename_all = "lowercase")]
pub enum EventBatch {
    Polarity(Vec<PolarityEvent>),
    Special(Vec<SpecialEvent>),
    Frame {
        shape: FrameShape,
        frames: Vec<Frame>,
    },
    Imu6(Vec<Imu6Event>),
    Imu9(Vec<Imu9Event>),
    Spike(Vec<SpikeEvent>),
}

impl EventBatch {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Polarity(_) => EventKind::Polarity,
            Self::Special(_) => EventKind::Special,
            Self::Frame { .. } => EventKind::Frame,
            Self::Imu6(_) => EventKind::Imu6,
            Self::Imu9(_) => EventKind::Imu9,
            Self::Spike(_) => EventKind::Spike,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Polarity(records) => records.len(),
            Self::Special(records) => records.len(),
            Self::Frame { frames, .. } => frames.len(),
            Self::Imu6(records) => records.len(),
            Self::Imu9(records) => records.len(),
            Self::Spike(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        match self {
            Self::Polarity(records) => records.first().map(|r| r.timestamp),
            Self::Special(records) => records.first().map(|r| r.timestamp),
            Self::Frame { frames, .. } => frames.first().map(|f| f.timestamp),
            Self::Imu6(records) => records.first().map(|r| r.timestamp),
            Self::Imu9(records) => records.first().map(|r| r.timestamp),
            Self::Spike(records) => records.first().map(|r| r.timestamp),
        }
    }
}
