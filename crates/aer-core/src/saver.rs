use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use aer_config::{OpenMode, SaverBackend, SaverOptions};
use aer_protocol::{decode, encode, EventBatch, ProtocolError, Topic};
use aer_transport::{encode_multipart, MultipartCodec};
use bytes::BytesMut;
use serde::Serialize;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio_util::codec::Decoder;
use tracing::{info, warn};

use crate::{HandlerError, Subscribable};

#[derive(Debug, Error)]
pub enum SaverError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{path} already exists")]
    Exists { path: String },
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
    #[error("saver backend {0} is not available in this build")]
    BackendUnavailable(SaverBackend),
    #[error("failed to encode batch: {0}")]
    Encode(#[from] ProtocolError),
    #[error("failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("corrupt raw log: {0}")]
    Corrupt(String),
    #[error("saver already closed")]
    Closed,
}

/// Persistence backend fed by a saver subscriber.
pub trait Saver: Send {
    /// `identifier` groups batches of one source: the topic root plus an optional sub id.
    fn save(&mut self, identifier: &str, batch: &EventBatch) -> Result<(), SaverError>;

    fn close(&mut self) -> Result<(), SaverError>;
}

/// Closes the wrapped saver exactly once, on `close` or on drop.
pub struct ManagedSaver {
    inner: Box<dyn Saver>,
    closed: bool,
    saved: u64,
}

impl ManagedSaver {
    pub fn new(inner: Box<dyn Saver>) -> Self {
        Self {
            inner,
            closed: false,
            saved: 0,
        }
    }

    pub fn saved(&self) -> u64 {
        self.saved
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Saver for ManagedSaver {
    fn save(&mut self, identifier: &str, batch: &EventBatch) -> Result<(), SaverError> {
        if self.closed {
            return Err(SaverError::Closed);
        }
        self.inner.save(identifier, batch)?;
        self.saved += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SaverError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close()
    }
}

impl Drop for ManagedSaver {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "saver close on drop failed");
        }
    }
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    ts: String,
    id: &'a str,
    count: usize,
    #[serde(flatten)]
    batch: &'a EventBatch,
}

/// One JSON object per batch and line.
pub struct JsonlSaver {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlSaver {
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self, SaverError> {
        let path = path.as_ref().to_path_buf();
        let writer = BufWriter::new(open_file(&path, mode)?);
        Ok(Self { path, writer })
    }
}

impl Saver for JsonlSaver {
    fn save(&mut self, identifier: &str, batch: &EventBatch) -> Result<(), SaverError> {
        let record = JsonRecord {
            ts: format_timestamp(SystemTime::now()),
            id: identifier,
            count: batch.len(),
            batch,
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SaverError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        info!(path = %self.path.display(), "jsonl saver closed");
        Ok(())
    }
}

/// Appends framed envelopes that `read_raw_log` can replay.
pub struct RawSaver {
    path: PathBuf,
    writer: BufWriter<File>,
    scratch: BytesMut,
    max_message_bytes: usize,
}

impl RawSaver {
    pub fn open(
        path: impl AsRef<Path>,
        mode: OpenMode,
        max_message_bytes: usize,
    ) -> Result<Self, SaverError> {
        let path = path.as_ref().to_path_buf();
        let writer = BufWriter::new(open_file(&path, mode)?);
        Ok(Self {
            path,
            writer,
            scratch: BytesMut::new(),
            max_message_bytes,
        })
    }
}

impl Saver for RawSaver {
    fn save(&mut self, identifier: &str, batch: &EventBatch) -> Result<(), SaverError> {
        let message = encode(&Topic::new(identifier, batch.kind()), batch)?;
        self.scratch.clear();
        encode_multipart(&message, &mut self.scratch, self.max_message_bytes)?;
        self.writer.write_all(&self.scratch)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SaverError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        info!(path = %self.path.display(), "raw saver closed");
        Ok(())
    }
}

/// Reads back every envelope written by a raw saver.
pub fn read_raw_log(path: impl AsRef<Path>) -> Result<Vec<(Topic, EventBatch)>, SaverError> {
    let path = path.as_ref();
    let raw = fs::read(path).map_err(|source| SaverError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let mut buffer = BytesMut::from(raw.as_slice());
    let mut codec = MultipartCodec::default();
    let mut batches = Vec::new();
    while let Some(message) = codec.decode(&mut buffer)? {
        batches.push(decode(&message)?);
    }
    if !buffer.is_empty() {
        return Err(SaverError::Corrupt(format!(
            "{} trailing bytes in {}",
            buffer.len(),
            path.display()
        )));
    }
    Ok(batches)
}

pub fn open_saver(options: &SaverOptions) -> Result<ManagedSaver, SaverError> {
    let path = Path::new(options.filename.trim());
    let inner: Box<dyn Saver> = match options.backend {
        SaverBackend::Jsonl => Box::new(JsonlSaver::open(path, options.mode)?),
        SaverBackend::Raw => Box::new(RawSaver::open(
            path,
            options.mode,
            options.transport.max_message_bytes,
        )?),
        backend @ (SaverBackend::Hdf5 | SaverBackend::Zarr) => {
            return Err(SaverError::BackendUnavailable(backend));
        }
    };
    info!(
        path = %path.display(),
        backend = %options.backend,
        mode = %options.mode,
        "saver opened"
    );
    Ok(ManagedSaver::new(inner))
}

fn open_file(path: &Path, mode: OpenMode) -> Result<File, SaverError> {
    let mut options = OpenOptions::new();
    match mode {
        OpenMode::Truncate => options.write(true).create(true).truncate(true),
        OpenMode::Append => options.append(true).create(true),
        OpenMode::CreateNew => options.write(true).create_new(true),
    };
    options.open(path).map_err(|source| {
        if source.kind() == io::ErrorKind::AlreadyExists {
            SaverError::Exists {
                path: path.display().to_string(),
            }
        } else {
            SaverError::Open {
                path: path.display().to_string(),
                source,
            }
        }
    })
}

fn format_timestamp(ts: SystemTime) -> String {
    let nanos = ts
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_nanos() as i128)
        .unwrap_or(0);
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|odt| odt.format(&Rfc3339).ok())
        .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string())
}

/// Subscriber that hands every batch to a saver.
pub struct SaverSubscriber {
    saver: ManagedSaver,
}

impl SaverSubscriber {
    pub fn new(saver: ManagedSaver) -> Self {
        Self { saver }
    }

    fn store(&mut self, topic: &Topic, batch: &EventBatch) -> Result<(), HandlerError> {
        self.saver.save(&topic.identifier(), batch)?;
        Ok(())
    }
}

impl Subscribable for SaverSubscriber {
    fn on_polarity(&mut self, topic: &Topic, batch: &EventBatch) -> Result<(), HandlerError> {
        self.store(topic, batch)
    }

    fn on_special(&mut self, topic: &Topic, batch: &EventBatch) -> Result<(), HandlerError> {
        self.store(topic, batch)
    }

    fn on_frame(&mut self, topic: &Topic, batch: &EventBatch) -> Result<(), HandlerError> {
        self.store(topic, batch)
    }

    fn on_imu(&mut self, topic: &Topic, batch: &EventBatch) -> Result<(), HandlerError> {
        self.store(topic, batch)
    }

    fn on_spike(&mut self, topic: &Topic, batch: &EventBatch) -> Result<(), HandlerError> {
        self.store(topic, batch)
    }

    fn close(&mut self) -> Result<(), HandlerError> {
        info!(saved = self.saver.saved(), "saver subscriber closing");
        self.saver.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use aer_protocol::{EventKind, Frame, FrameShape, PolarityEvent, SpecialEvent};
    use serde_json::Value;

    use super::*;

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", std::process::id()));
        fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    fn polarity(count: usize) -> EventBatch {
        EventBatch::Polarity(
            (0..count)
                .map(|i| PolarityEvent {
                    timestamp: 100 + i as i64,
                    x: i as i16,
                    y: 2,
                    polarity: i % 2 == 0,
                })
                .collect(),
        )
    }

    struct CountingSaver {
        closes: Arc<AtomicUsize>,
    }

    impl Saver for CountingSaver {
        fn save(&mut self, _identifier: &str, _batch: &EventBatch) -> Result<(), SaverError> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), SaverError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn managed_saver_closes_exactly_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut saver = ManagedSaver::new(Box::new(CountingSaver {
            closes: closes.clone(),
        }));
        saver.save("cam1", &polarity(1)).expect("save");
        saver.close().expect("close");
        saver.close().expect("second close is a no-op");
        assert!(matches!(
            saver.save("cam1", &polarity(1)),
            Err(SaverError::Closed)
        ));
        assert_eq!(saver.saved(), 1);
        drop(saver);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let dropped = ManagedSaver::new(Box::new(CountingSaver {
            closes: closes.clone(),
        }));
        drop(dropped);
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn jsonl_writes_one_line_per_batch() {
        let dir = unique_temp_dir("aer-core-jsonl");
        let path = dir.join("events.jsonl");
        let mut saver = JsonlSaver::open(&path, OpenMode::Truncate).expect("open");
        saver.save("cam1", &polarity(2)).expect("save");
        saver
            .save(
                "cam1/left",
                &EventBatch::Special(vec![SpecialEvent {
                    timestamp: 9,
                    kind: 1,
                    data: 0,
                }]),
            )
            .expect("save");
        saver.close().expect("close");

        let content = fs::read_to_string(&path).expect("read");
        let lines = content.lines().collect::<Vec<&str>>();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(first["id"], "cam1");
        assert_eq!(first["kind"], "polarity");
        assert_eq!(first["count"], 2);
        assert_eq!(first["records"][1]["x"], 1);
        let ts = first["ts"].as_str().expect("ts");
        assert!(OffsetDateTime::parse(ts, &Rfc3339).is_ok());

        let second: Value = serde_json::from_str(lines[1]).expect("json");
        assert_eq!(second["id"], "cam1/left");
        assert_eq!(second["kind"], "special");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn open_modes_follow_file_semantics() {
        let dir = unique_temp_dir("aer-core-modes");
        let path = dir.join("events.jsonl");

        for _ in 0..2 {
            let mut saver = JsonlSaver::open(&path, OpenMode::Append).expect("append");
            saver.save("cam1", &polarity(1)).expect("save");
            saver.close().expect("close");
        }
        assert_eq!(fs::read_to_string(&path).expect("read").lines().count(), 2);

        let err = JsonlSaver::open(&path, OpenMode::CreateNew)
            .err()
            .expect("existing file rejected");
        assert!(matches!(err, SaverError::Exists { .. }));

        let mut saver = JsonlSaver::open(&path, OpenMode::Truncate).expect("truncate");
        saver.save("cam1", &polarity(1)).expect("save");
        saver.close().expect("close");
        assert_eq!(fs::read_to_string(&path).expect("read").lines().count(), 1);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn raw_log_replays_what_was_saved() {
        let dir = unique_temp_dir("aer-core-raw");
        let path = dir.join("events.aer");
        let frame = EventBatch::Frame {
            shape: FrameShape {
                width: 2,
                height: 2,
                channels: 1,
            },
            frames: vec![Frame {
                timestamp: 7,
                pixels: vec![1, 2, 3, 4],
            }],
        };

        let mut saver = RawSaver::open(&path, OpenMode::CreateNew, 1 << 20).expect("open");
        saver.save("cam1", &polarity(3)).expect("save");
        saver.save("rig/cam2", &frame).expect("save");
        saver.close().expect("close");

        let replay = read_raw_log(&path).expect("replay");
        assert_eq!(replay.len(), 2);
        assert_eq!(replay[0].0, Topic::new("cam1", EventKind::Polarity));
        assert_eq!(replay[0].1, polarity(3));
        assert_eq!(replay[1].0.identifier(), "rig/cam2");
        assert_eq!(replay[1].1, frame);

        let mut bytes = fs::read(&path).expect("read");
        bytes.truncate(bytes.len() - 3);
        fs::write(&path, bytes).expect("write");
        assert!(matches!(
            read_raw_log(&path),
            Err(SaverError::Corrupt(_))
        ));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn unavailable_backends_fail_fast() {
        let dir = unique_temp_dir("aer-core-backend");
        for backend in [SaverBackend::Hdf5, SaverBackend::Zarr] {
            let options = SaverOptions {
                filename: dir.join("events.h5").display().to_string(),
                backend,
                ..SaverOptions::default()
            };
            let err = open_saver(&options).err().expect("backend unavailable");
            assert!(matches!(err, SaverError::BackendUnavailable(b) if b == backend));
        }
        assert!(!dir.join("events.h5").exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn saver_subscriber_uses_topic_identifier() {
        let dir = unique_temp_dir("aer-core-saver-sub");
        let options = SaverOptions {
            filename: dir.join("out.jsonl").display().to_string(),
            ..SaverOptions::default()
        };
        let mut subscriber = SaverSubscriber::new(open_saver(&options).expect("open"));
        let topic = Topic::new("cam1", EventKind::Polarity).with_sub_id("left");
        subscriber.on_polarity(&topic, &polarity(1)).expect("store");
        subscriber.close().expect("close");
        assert!(matches!(
            subscriber.on_polarity(&topic, &polarity(1)),
            Err(HandlerError::Saver(SaverError::Closed))
        ));

        let content = fs::read_to_string(dir.join("out.jsonl")).expect("read");
        let line: Value = serde_json::from_str(content.trim()).expect("json");
        assert_eq!(line["id"], "cam1/left");

        let _ = fs::remove_dir_all(dir);
    }
}
