mod topic;
mod types;
mod wire;

pub use topic::Topic;
pub use types::{
    EventBatch, EventKind, Frame, FrameShape, Imu6Event, Imu9Event, PolarityEvent, ProtocolError,
    SpecialEvent, SpikeEvent,
};
pub use wire::{
    decode, encode, peek_topic, record_layout, record_width, ByteOrder, EnvelopeMeta, FieldSpec,
    WireMessage, WIRE_PARTS,
};

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn polarity_batch() -> EventBatch {
        EventBatch::Polarity(vec![
            PolarityEvent {
                timestamp: 10,
                x: 1,
                y: 2,
                polarity: true,
            },
            PolarityEvent {
                timestamp: 11,
                x: 127,
                y: 95,
                polarity: false,
            },
            PolarityEvent {
                timestamp: 12,
                x: -1,
                y: 0,
                polarity: true,
            },
            PolarityEvent {
                timestamp: i64::MAX,
                x: i16::MAX,
                y: i16::MIN,
                polarity: false,
            },
        ])
    }

    #[test]
    fn polarity_round_trip() {
        let topic = Topic::new("cam1", EventKind::Polarity);
        let batch = polarity_batch();

        let wire = encode(&topic, &batch).expect("encode");
        assert_eq!(wire.len(), WIRE_PARTS);
        assert_eq!(&wire[0][..], b"cam1/polarity");
        assert_eq!(wire[2].len(), 4 * 13);

        let (decoded_topic, decoded) = decode(&wire).expect("decode");
        assert_eq!(decoded_topic, topic);
        assert_eq!(decoded, batch);
    }

    #[test]
    fn frame_round_trip_keeps_shape() {
        let shape = FrameShape {
            width: 3,
            height: 2,
            channels: 1,
        };
        let topic = Topic::new("cam1", EventKind::Frame).with_sub_id("00000123");
        let batch = EventBatch::Frame {
            shape,
            frames: vec![
                Frame {
                    timestamp: 5,
                    pixels: vec![0, 1, 2, 3, 4, 65535],
                },
                Frame {
                    timestamp: 6,
                    pixels: vec![9; 6],
                },
            ],
        };

        let wire = encode(&topic, &batch).expect("encode");
        let (decoded_topic, decoded) = decode(&wire).expect("decode");
        assert_eq!(decoded_topic.sub_id(), Some("00000123"));
        assert_eq!(decoded, batch);
    }

    #[test]
    fn imu9_and_spike_round_trip() {
        let imu = EventBatch::Imu9(vec![Imu9Event {
            timestamp: 100,
            accel: [0.5, -9.81, 0.0],
            gyro: [1.0, 2.0, 3.0],
            temperature: 36.6,
            compass: [0.1, 0.2, 0.3],
        }]);
        let wire = encode(&Topic::new("lab/cam", EventKind::Imu9), &imu).expect("encode imu");
        let (topic, decoded) = decode(&wire).expect("decode imu");
        assert_eq!(topic.root(), "lab/cam");
        assert_eq!(decoded, imu);

        let spikes = EventBatch::Spike(vec![SpikeEvent {
            timestamp: 7,
            neuron_id: 255,
            core_id: 3,
            chip_id: 1,
        }]);
        let wire = encode(&Topic::new("dynapse", EventKind::Spike), &spikes).expect("encode");
        assert_eq!(wire[2].len(), 14);
        assert_eq!(decode(&wire).expect("decode spike").1, spikes);
    }

    #[test]
    fn empty_batch_round_trips() {
        let topic = Topic::new("cam1", EventKind::Special);
        let wire = encode(&topic, &EventBatch::Special(Vec::new())).expect("encode");
        assert!(wire[2].is_empty());

        let (_, decoded) = decode(&wire).expect("decode");
        assert!(decoded.is_empty());
        assert_eq!(decoded.kind(), EventKind::Special);
    }

    #[test]
    fn payload_not_multiple_of_width_is_rejected() {
        let topic = Topic::new("cam1", EventKind::Polarity);
        let mut wire = encode(&topic, &polarity_batch()).expect("encode");
        let truncated = wire[2].slice(..wire[2].len() - 3);
        wire[2] = truncated;

        let err = decode(&wire).expect_err("must reject");
        assert!(matches!(
            err,
            ProtocolError::PayloadSizeMismatch {
                kind: EventKind::Polarity,
                got: 49,
                expected: 52,
            }
        ));
    }

    #[test]
    fn declared_count_must_match_payload() {
        let topic = Topic::new("cam1", EventKind::Polarity);
        let wire = encode(&topic, &polarity_batch()).expect("encode");
        let mut meta: EnvelopeMeta = serde_json::from_slice(&wire[1]).expect("meta");
        meta.count = 3;
        let tampered = vec![
            wire[0].clone(),
            Bytes::from(serde_json::to_vec(&meta).expect("meta json")),
            wire[2].clone(),
        ];

        assert!(matches!(
            decode(&tampered),
            Err(ProtocolError::PayloadSizeMismatch { .. })
        ));
    }

    #[test]
    fn foreign_byte_order_is_honoured() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&42_i64.to_be_bytes());
        payload.push(2);
        payload.extend_from_slice(&0xDEAD_BEEF_u32.to_be_bytes());

        let meta = EnvelopeMeta {
            kind: EventKind::Special,
            count: 1,
            byte_order: ByteOrder::Big,
            fields: record_layout(EventKind::Special, None),
            frame: None,
        };
        let wire = vec![
            Bytes::from_static(b"cam1/special"),
            Bytes::from(serde_json::to_vec(&meta).expect("meta json")),
            Bytes::from(payload),
        ];

        let (_, batch) = decode(&wire).expect("decode");
        assert_eq!(
            batch,
            EventBatch::Special(vec![SpecialEvent {
                timestamp: 42,
                kind: 2,
                data: 0xDEAD_BEEF,
            }])
        );
    }

    #[test]
    fn malformed_envelopes_are_errors() {
        assert!(matches!(
            decode(&[Bytes::from_static(b"cam1/polarity")]),
            Err(ProtocolError::PartCount(1))
        ));

        let bad_json = vec![
            Bytes::from_static(b"cam1/polarity"),
            Bytes::from_static(b"{not json"),
            Bytes::new(),
        ];
        assert!(matches!(decode(&bad_json), Err(ProtocolError::Metadata(_))));

        let unknown_kind = vec![
            Bytes::from_static(b"cam1/polarity"),
            Bytes::from_static(br#"{"kind":"audio","count":0,"byte_order":"little","fields":[]}"#),
            Bytes::new(),
        ];
        assert!(matches!(
            decode(&unknown_kind),
            Err(ProtocolError::UnknownKind(kind)) if kind == "audio"
        ));

        let special = encode(
            &Topic::new("cam1", EventKind::Special),
            &EventBatch::Special(Vec::new()),
        )
        .expect("encode");
        let mismatched = vec![
            Bytes::from_static(b"cam1/polarity"),
            special[1].clone(),
            special[2].clone(),
        ];
        assert!(matches!(
            decode(&mismatched),
            Err(ProtocolError::KindMismatch { .. })
        ));
    }

    #[test]
    fn oversized_frame_shape_is_a_layout_error() {
        let huge = vec![
            Bytes::from_static(b"cam1/frame"),
            Bytes::from_static(
                br#"{"kind":"frame","count":0,"byte_order":"little","fields":[],"frame":{"width":4294967295,"height":4294967295,"channels":4294967295}}"#,
            ),
            Bytes::new(),
        ];
        assert!(matches!(
            decode(&huge),
            Err(ProtocolError::LayoutMismatch(EventKind::Frame))
        ));

        let shape = FrameShape {
            width: u32::MAX,
            height: u32::MAX,
            channels: u32::MAX,
        };
        assert_eq!(shape.pixel_count(), None);
        let batch = EventBatch::Frame {
            shape,
            frames: Vec::new(),
        };
        assert!(matches!(
            encode(&Topic::new("cam1", EventKind::Frame), &batch),
            Err(ProtocolError::LayoutMismatch(EventKind::Frame))
        ));
    }

    #[test]
    fn encode_rejects_inconsistent_inputs() {
        let err = encode(&Topic::new("cam1", EventKind::Frame), &polarity_batch())
            .expect_err("kind mismatch");
        assert!(matches!(err, ProtocolError::KindMismatch { .. }));

        let batch = EventBatch::Frame {
            shape: FrameShape {
                width: 2,
                height: 2,
                channels: 1,
            },
            frames: vec![Frame {
                timestamp: 0,
                pixels: vec![1, 2, 3],
            }],
        };
        let err = encode(&Topic::new("cam1", EventKind::Frame), &batch).expect_err("bad frame");
        assert_eq!(
            err,
            ProtocolError::FrameShapeMismatch {
                got: 3,
                expected: 4
            }
        );
    }

    #[test]
    fn topic_parse_and_display() {
        let topic = Topic::parse("cam1/polarity").expect("parse");
        assert_eq!(topic.root(), "cam1");
        assert_eq!(topic.kind(), EventKind::Polarity);
        assert_eq!(topic.sub_id(), None);
        assert_eq!(topic.identifier(), "cam1");

        let topic = Topic::parse("rig/left/imu6/SN42").expect("parse with sub id");
        assert_eq!(topic.root(), "rig/left");
        assert_eq!(topic.kind(), EventKind::Imu6);
        assert_eq!(topic.sub_id(), Some("SN42"));
        assert_eq!(topic.to_string(), "rig/left/imu6/SN42");
        assert_eq!(topic.identifier(), "rig/left/SN42");

        assert!(Topic::parse("polarity").is_err());
        assert!(Topic::parse("cam1//polarity").is_err());
        assert!(Topic::parse("cam1/unknown").is_err());
        assert!(Topic::parse("cam1/Polarity").is_err());
    }

    #[test]
    fn record_widths_match_layouts() {
        assert_eq!(record_width(EventKind::Polarity, None), Some(13));
        assert_eq!(record_width(EventKind::Special, None), Some(13));
        assert_eq!(record_width(EventKind::Imu6, None), Some(36));
        assert_eq!(record_width(EventKind::Imu9, None), Some(48));
        assert_eq!(record_width(EventKind::Spike, None), Some(14));
        let shape = FrameShape {
            width: 346,
            height: 260,
            channels: 1,
        };
        assert_eq!(
            record_width(EventKind::Frame, Some(&shape)),
            Some(8 + 346 * 260 * 2)
        );
    }
}
