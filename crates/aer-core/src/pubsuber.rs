use aer_protocol::{decode, encode, EventBatch, Topic};
use aer_transport::{PushSocket, SubSocket};
use tracing::{info, warn};

use crate::{HandlerError, RoleContext, RoleError};

/// Transforms consumed batches into batches to republish.
pub trait Processor: Send {
    fn process(
        &mut self,
        topic: &Topic,
        batch: EventBatch,
    ) -> Result<Vec<(Topic, EventBatch)>, HandlerError>;

    fn close(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Republishes every batch unchanged under another topic root.
pub struct RetagProcessor {
    master_topic: String,
}

impl RetagProcessor {
    pub fn new(master_topic: impl Into<String>) -> Self {
        Self {
            master_topic: master_topic.into(),
        }
    }
}

impl Processor for RetagProcessor {
    fn process(
        &mut self,
        topic: &Topic,
        batch: EventBatch,
    ) -> Result<Vec<(Topic, EventBatch)>, HandlerError> {
        Ok(vec![(topic.with_root(self.master_topic.as_str()), batch)])
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PubSuberReport {
    pub received: u64,
    pub corrupt: u64,
    pub processor_errors: u64,
    pub published: u64,
    pub dropped: u64,
}

pub struct PubSuber {
    input: SubSocket,
    output: PushSocket,
    processor: Box<dyn Processor>,
}

impl PubSuber {
    pub fn new(input: SubSocket, output: PushSocket, processor: Box<dyn Processor>) -> Self {
        Self {
            input,
            output,
            processor,
        }
    }

    pub async fn run(self, ctx: RoleContext) -> Result<PubSuberReport, RoleError> {
        let Self {
            mut input,
            output,
            mut processor,
        } = self;
        let mut report = PubSuberReport::default();

        loop {
            let message = tokio::select! {
                _ = ctx.cancelled() => break,
                message = input.recv() => message,
            };
            let Some(message) = message else {
                warn!("subscription closed by transport");
                break;
            };
            report.received += 1;

            let (topic, batch) = match decode(&message) {
                Ok(decoded) => decoded,
                Err(err) => {
                    report.corrupt += 1;
                    warn!(error = %err, "dropping corrupt envelope");
                    continue;
                }
            };
            let outputs = match processor.process(&topic, batch) {
                Ok(outputs) => outputs,
                Err(err) => {
                    report.processor_errors += 1;
                    warn!(%topic, error = %err, "processor failed");
                    continue;
                }
            };
            for (topic, batch) in outputs {
                if batch.is_empty() {
                    continue;
                }
                match encode(&topic, &batch) {
                    Ok(message) => {
                        if output.send(message) {
                            report.published += 1;
                        } else {
                            report.dropped += 1;
                        }
                    }
                    Err(err) => {
                        report.processor_errors += 1;
                        warn!(%topic, error = %err, "processor produced an invalid batch");
                    }
                }
            }
        }

        input.close().await;
        output.close().await;
        let closed = processor.close();
        info!(
            received = report.received,
            published = report.published,
            dropped = report.dropped,
            "pubsuber stopped"
        );
        closed?;
        Ok(report)
    }
}
