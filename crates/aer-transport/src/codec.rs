use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub type Multipart = Vec<Bytes>;

const HEADER_BYTES: usize = 4;
pub const MAX_PARTS: usize = 16;

/// Length-prefixed multipart frames: `u32 parts` then `u32 len` + bytes per part.
#[derive(Clone, Debug)]
pub struct MultipartCodec {
    max_message_bytes: usize,
}

impl MultipartCodec {
    pub fn new(max_message_bytes: usize) -> Self {
        Self {
            max_message_bytes: max_message_bytes.max(HEADER_BYTES),
        }
    }

    fn frame_len(&self, src: &[u8]) -> Result<Option<usize>, io::Error> {
        if src.len() < HEADER_BYTES {
            return Ok(None);
        }

        let parts = read_u32(src, 0) as usize;
        if parts == 0 || parts > MAX_PARTS {
            return Err(invalid(format!("invalid multipart part count {parts}")));
        }

        let mut offset = HEADER_BYTES;
        for _ in 0..parts {
            if src.len() < offset + HEADER_BYTES {
                return Ok(None);
            }
            let len = read_u32(src, offset) as usize;
            offset = offset
                .checked_add(HEADER_BYTES + len)
                .ok_or_else(|| invalid("multipart length overflow".to_string()))?;
            if offset > self.max_message_bytes {
                return Err(invalid(format!(
                    "multipart message exceeds {} bytes",
                    self.max_message_bytes
                )));
            }
            if src.len() < offset {
                return Ok(None);
            }
        }

        Ok(Some(offset))
    }
}

impl Default for MultipartCodec {
    fn default() -> Self {
        Self::new(64 * 1024 * 1024)
    }
}

impl Decoder for MultipartCodec {
    type Item = Multipart;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame_len) = self.frame_len(src)? else {
            return Ok(None);
        };

        let mut frame = src.split_to(frame_len).freeze();
        let parts = frame.get_u32() as usize;
        let mut out = Vec::with_capacity(parts);
        for _ in 0..parts {
            let len = frame.get_u32() as usize;
            out.push(frame.split_to(len));
        }
        Ok(Some(out))
    }
}

impl Encoder<Multipart> for MultipartCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Multipart, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_multipart(&item, dst, self.max_message_bytes)
    }
}

pub fn encode_multipart(
    parts: &[Bytes],
    dst: &mut BytesMut,
    max_message_bytes: usize,
) -> Result<(), io::Error> {
    if parts.is_empty() || parts.len() > MAX_PARTS {
        return Err(invalid(format!(
            "invalid multipart part count {}",
            parts.len()
        )));
    }

    let total = parts
        .iter()
        .fold(HEADER_BYTES, |acc, part| acc + HEADER_BYTES + part.len());
    if total > max_message_bytes {
        return Err(invalid(format!(
            "multipart message exceeds {max_message_bytes} bytes"
        )));
    }

    dst.reserve(total);
    dst.put_u32(parts.len() as u32);
    for part in parts {
        dst.put_u32(part.len() as u32);
        dst.put_slice(part);
    }
    Ok(())
}

fn read_u32(src: &[u8], offset: usize) -> u32 {
    let mut raw = [0_u8; HEADER_BYTES];
    raw.copy_from_slice(&src[offset..offset + HEADER_BYTES]);
    u32::from_be_bytes(raw)
}

fn invalid(reason: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Multipart {
        vec![
            Bytes::from_static(b"cam1/polarity"),
            Bytes::from_static(b"{}"),
            Bytes::new(),
        ]
    }

    #[test]
    fn decode_waits_for_complete_frame() {
        let mut codec = MultipartCodec::default();
        let mut full = BytesMut::new();
        codec.encode(message(), &mut full).expect("encode");

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).expect("decode").is_none());

        partial.extend_from_slice(&full[full.len() - 1..]);
        let decoded = codec.decode(&mut partial).expect("decode").expect("frame");
        assert_eq!(decoded, message());
        assert!(partial.is_empty());
    }

    #[test]
    fn decode_splits_back_to_back_frames() {
        let mut codec = MultipartCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(message(), &mut buf).expect("encode first");
        codec
            .encode(vec![Bytes::from_static(b"x")], &mut buf)
            .expect("encode second");

        assert_eq!(codec.decode(&mut buf).expect("first"), Some(message()));
        assert_eq!(
            codec.decode(&mut buf).expect("second"),
            Some(vec![Bytes::from_static(b"x")])
        );
        assert_eq!(codec.decode(&mut buf).expect("drained"), None);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut codec = MultipartCodec::new(32);
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u32(1024);
        let err = codec.decode(&mut buf).expect_err("must reject");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut out = BytesMut::new();
        let err = codec
            .encode(vec![Bytes::from(vec![0_u8; 64])], &mut out)
            .expect_err("must reject");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn zero_parts_is_rejected() {
        let mut codec = MultipartCodec::default();
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        assert!(codec.decode(&mut buf).is_err());
    }
}
