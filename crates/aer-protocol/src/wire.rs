use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{
    EventBatch, EventKind, Frame, FrameShape, Imu6Event, Imu9Event, PolarityEvent, ProtocolError,
    SpecialEvent, SpikeEvent, Topic,
};

/// Ordered binary parts: `[topic, metadata, payload]`.
pub type WireMessage = Vec<Bytes>;

pub const WIRE_PARTS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub dtype: String,
    #[serde(default = "default_field_count")]
    pub count: u32,
}

fn default_field_count() -> u32 {
    1
}

impl FieldSpec {
    fn new(name: &str, dtype: &str, count: u32) -> Self {
        Self {
            name: name.to_string(),
            dtype: dtype.to_string(),
            count,
        }
    }

    fn byte_width(&self) -> Option<usize> {
        let scalar = dtype_size(&self.dtype)?;
        scalar.checked_mul(self.count as usize)
    }
}

fn dtype_size(dtype: &str) -> Option<usize> {
    match dtype {
        "b1" | "u1" | "i1" => Some(1),
        "i2" | "u2" => Some(2),
        "i4" | "u4" | "f4" => Some(4),
        "i8" | "u8" | "f8" => Some(8),
        _ => None,
    }
}

/// Metadata part of the envelope. Sufficient to rebuild the payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    pub kind: EventKind,
    pub count: u64,
    pub byte_order: ByteOrder,
    pub fields: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<FrameShape>,
}

pub fn record_layout(kind: EventKind, frame: Option<&FrameShape>) -> Vec<FieldSpec> {
    let timestamp = FieldSpec::new("timestamp", "i8", 1);
    match kind {
        EventKind::Polarity => vec![
            timestamp,
            FieldSpec::new("x", "i2", 1),
            FieldSpec::new("y", "i2", 1),
            FieldSpec::new("polarity", "b1", 1),
        ],
        EventKind::Special => vec![
            timestamp,
            FieldSpec::new("kind", "u1", 1),
            FieldSpec::new("data", "u4", 1),
        ],
        EventKind::Frame => {
            let pixels = match frame {
                None => 0,
                Some(shape) => shape_pixels(shape).unwrap_or(u32::MAX),
            };
            vec![timestamp, FieldSpec::new("pixels", "u2", pixels)]
        }
        EventKind::Imu6 => vec![
            timestamp,
            FieldSpec::new("accel", "f4", 3),
            FieldSpec::new("gyro", "f4", 3),
            FieldSpec::new("temperature", "f4", 1),
        ],
        EventKind::Imu9 => vec![
            timestamp,
            FieldSpec::new("accel", "f4", 3),
            FieldSpec::new("gyro", "f4", 3),
            FieldSpec::new("temperature", "f4", 1),
            FieldSpec::new("compass", "f4", 3),
        ],
        EventKind::Spike => vec![
            timestamp,
            FieldSpec::new("neuron_id", "u4", 1),
            FieldSpec::new("core_id", "u1", 1),
            FieldSpec::new("chip_id", "u1", 1),
        ],
    }
}

/// Pixel count that fits a field count, `None` for oversized shapes.
fn shape_pixels(shape: &FrameShape) -> Option<u32> {
    shape
        .pixel_count()
        .and_then(|pixels| u32::try_from(pixels).ok())
}

/// Bytes per record for `kind`, `None` when the layout cannot be sized.
pub fn record_width(kind: EventKind, frame: Option<&FrameShape>) -> Option<usize> {
    record_layout(kind, frame)
        .iter()
        .try_fold(0_usize, |acc, field| acc.checked_add(field.byte_width()?))
}

pub fn encode(topic: &Topic, batch: &EventBatch) -> Result<WireMessage, ProtocolError> {
    let kind = batch.kind();
    if topic.kind() != kind {
        return Err(ProtocolError::KindMismatch {
            topic: topic.kind(),
            metadata: kind,
        });
    }

    let order = ByteOrder::native();
    let frame = match batch {
        EventBatch::Frame { shape, frames } => {
            let expected =
                shape_pixels(shape).ok_or(ProtocolError::LayoutMismatch(kind))? as usize;
            if let Some(bad) = frames.iter().find(|f| f.pixels.len() != expected) {
                return Err(ProtocolError::FrameShapeMismatch {
                    got: bad.pixels.len(),
                    expected,
                });
            }
            Some(*shape)
        }
        _ => None,
    };

    let meta = EnvelopeMeta {
        kind,
        count: batch.len() as u64,
        byte_order: order,
        fields: record_layout(kind, frame.as_ref()),
        frame,
    };
    let meta_bytes =
        serde_json::to_vec(&meta).map_err(|err| ProtocolError::Metadata(err.to_string()))?;

    let width = record_width(kind, frame.as_ref()).ok_or(ProtocolError::LayoutMismatch(kind))?;
    let mut packer = Packer::with_capacity(order, width.saturating_mul(batch.len()));
    match batch {
        EventBatch::Polarity(records) => {
            for r in records {
                packer.i64(r.timestamp);
                packer.i16(r.x);
                packer.i16(r.y);
                packer.bool(r.polarity);
            }
        }
        EventBatch::Special(records) => {
            for r in records {
                packer.i64(r.timestamp);
                packer.u8(r.kind);
                packer.u32(r.data);
            }
        }
        EventBatch::Frame { frames, .. } => {
            for f in frames {
                packer.i64(f.timestamp);
                for pixel in &f.pixels {
                    packer.u16(*pixel);
                }
            }
        }
        EventBatch::Imu6(records) => {
            for r in records {
                packer.i64(r.timestamp);
                packer.f32s(&r.accel);
                packer.f32s(&r.gyro);
                packer.f32(r.temperature);
            }
        }
        EventBatch::Imu9(records) => {
            for r in records {
                packer.i64(r.timestamp);
                packer.f32s(&r.accel);
                packer.f32s(&r.gyro);
                packer.f32(r.temperature);
                packer.f32s(&r.compass);
            }
        }
        EventBatch::Spike(records) => {
            for r in records {
                packer.i64(r.timestamp);
                packer.u32(r.neuron_id);
                packer.u8(r.core_id);
                packer.u8(r.chip_id);
            }
        }
    }

    Ok(vec![
        Bytes::from(topic.to_string()),
        Bytes::from(meta_bytes),
        packer.finish(),
    ])
}

/// Topic of a wire message without decoding the rest.
pub fn peek_topic(parts: &[Bytes]) -> Option<&str> {
    parts
        .first()
        .and_then(|topic| std::str::from_utf8(topic).ok())
}

pub fn decode(parts: &[Bytes]) -> Result<(Topic, EventBatch), ProtocolError> {
    let [topic, meta, payload] = parts else {
        return Err(ProtocolError::PartCount(parts.len()));
    };

    let topic = std::str::from_utf8(topic).map_err(|_| ProtocolError::TopicEncoding)?;
    let topic = Topic::parse(topic)?;

    let meta = decode_meta(meta)?;
    if meta.kind != topic.kind() {
        return Err(ProtocolError::KindMismatch {
            topic: topic.kind(),
            metadata: meta.kind,
        });
    }
    if meta.kind == EventKind::Frame && meta.frame.as_ref().and_then(shape_pixels).is_none() {
        return Err(ProtocolError::LayoutMismatch(meta.kind));
    }
    if meta.fields != record_layout(meta.kind, meta.frame.as_ref()) {
        return Err(ProtocolError::LayoutMismatch(meta.kind));
    }

    let width = record_width(meta.kind, meta.frame.as_ref())
        .ok_or(ProtocolError::LayoutMismatch(meta.kind))?;
    let count = usize::try_from(meta.count).map_err(|_| ProtocolError::PayloadSizeMismatch {
        kind: meta.kind,
        got: payload.len(),
        expected: usize::MAX,
    })?;
    let expected = count
        .checked_mul(width)
        .ok_or(ProtocolError::PayloadSizeMismatch {
            kind: meta.kind,
            got: payload.len(),
            expected: usize::MAX,
        })?;
    if payload.len() != expected {
        return Err(ProtocolError::PayloadSizeMismatch {
            kind: meta.kind,
            got: payload.len(),
            expected,
        });
    }

    let mut reader = Unpacker::new(payload, meta.byte_order);
    let batch = match meta.kind {
        EventKind::Polarity => EventBatch::Polarity(
            (0..count)
                .map(|_| PolarityEvent {
                    timestamp: reader.i64(),
                    x: reader.i16(),
                    y: reader.i16(),
                    polarity: reader.bool(),
                })
                .collect(),
        ),
        EventKind::Special => EventBatch::Special(
            (0..count)
                .map(|_| SpecialEvent {
                    timestamp: reader.i64(),
                    kind: reader.u8(),
                    data: reader.u32(),
                })
                .collect(),
        ),
        EventKind::Frame => {
            let shape = meta.frame.ok_or(ProtocolError::LayoutMismatch(meta.kind))?;
            let pixels =
                shape_pixels(&shape).ok_or(ProtocolError::LayoutMismatch(meta.kind))? as usize;
            EventBatch::Frame {
                shape,
                frames: (0..count)
                    .map(|_| Frame {
                        timestamp: reader.i64(),
                        pixels: (0..pixels).map(|_| reader.u16()).collect(),
                    })
                    .collect(),
            }
        }
        EventKind::Imu6 => EventBatch::Imu6(
            (0..count)
                .map(|_| Imu6Event {
                    timestamp: reader.i64(),
                    accel: reader.f32x3(),
                    gyro: reader.f32x3(),
                    temperature: reader.f32(),
                })
                .collect(),
        ),
        EventKind::Imu9 => EventBatch::Imu9(
            (0..count)
                .map(|_| Imu9Event {
                    timestamp: reader.i64(),
                    accel: reader.f32x3(),
                    gyro: reader.f32x3(),
                    temperature: reader.f32(),
                    compass: reader.f32x3(),
                })
                .collect(),
        ),
        EventKind::Spike => EventBatch::Spike(
            (0..count)
                .map(|_| SpikeEvent {
                    timestamp: reader.i64(),
                    neuron_id: reader.u32(),
                    core_id: reader.u8(),
                    chip_id: reader.u8(),
                })
                .collect(),
        ),
    };

    Ok((topic, batch))
}

fn decode_meta(raw: &[u8]) -> Result<EnvelopeMeta, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_slice(raw).map_err(|err| ProtocolError::Metadata(err.to_string()))?;
    if let Some(kind) = value.get("kind").and_then(serde_json::Value::as_str) {
        if EventKind::parse(kind).is_none() {
            return Err(ProtocolError::UnknownKind(kind.to_string()));
        }
    }
    serde_json::from_value(value).map_err(|err| ProtocolError::Metadata(err.to_string()))
}

struct Packer {
    buf: BytesMut,
    order: ByteOrder,
}

impl Packer {
    fn with_capacity(order: ByteOrder, capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            order,
        }
    }

    fn i64(&mut self, value: i64) {
        match self.order {
            ByteOrder::Little => self.buf.put_i64_le(value),
            ByteOrder::Big => self.buf.put_i64(value),
        }
    }

    fn i16(&mut self, value: i16) {
        match self.order {
            ByteOrder::Little => self.buf.put_i16_le(value),
            ByteOrder::Big => self.buf.put_i16(value),
        }
    }

    fn u16(&mut self, value: u16) {
        match self.order {
            ByteOrder::Little => self.buf.put_u16_le(value),
            ByteOrder::Big => self.buf.put_u16(value),
        }
    }

    fn u32(&mut self, value: u32) {
        match self.order {
            ByteOrder::Little => self.buf.put_u32_le(value),
            ByteOrder::Big => self.buf.put_u32(value),
        }
    }

    fn f32(&mut self, value: f32) {
        match self.order {
            ByteOrder::Little => self.buf.put_f32_le(value),
            ByteOrder::Big => self.buf.put_f32(value),
        }
    }

    fn f32s(&mut self, values: &[f32]) {
        for value in values {
            self.f32(*value);
        }
    }

    fn u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    fn bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

// Callers check the payload length against the layout before reading.
struct Unpacker<'a> {
    buf: &'a [u8],
    order: ByteOrder,
}

impl<'a> Unpacker<'a> {
    fn new(buf: &'a [u8], order: ByteOrder) -> Self {
        Self { buf, order }
    }

    fn i64(&mut self) -> i64 {
        match self.order {
            ByteOrder::Little => self.buf.get_i64_le(),
            ByteOrder::Big => self.buf.get_i64(),
        }
    }

    fn i16(&mut self) -> i16 {
        match self.order {
            ByteOrder::Little => self.buf.get_i16_le(),
            ByteOrder::Big => self.buf.get_i16(),
        }
    }

    fn u16(&mut self) -> u16 {
        match self.order {
            ByteOrder::Little => self.buf.get_u16_le(),
            ByteOrder::Big => self.buf.get_u16(),
        }
    }

    fn u32(&mut self) -> u32 {
        match self.order {
            ByteOrder::Little => self.buf.get_u32_le(),
            ByteOrder::Big => self.buf.get_u32(),
        }
    }

    fn f32(&mut self) -> f32 {
        match self.order {
            ByteOrder::Little => self.buf.get_f32_le(),
            ByteOrder::Big => self.buf.get_f32(),
        }
    }

    fn f32x3(&mut self) -> [f32; 3] {
        [self.f32(), self.f32(), self.f32()]
    }

    fn u8(&mut self) -> u8 {
        self.buf.get_u8()
    }

    fn bool(&mut self) -> bool {
        self.buf.get_u8() != 0
    }
}
