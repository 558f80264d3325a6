//! The task that owns one partition's buffer.

use std::sync::Arc;

use tokio::sync::{
    broadcast,
    mpsc::{self, error::TryRecvError},
};
use tracing::{debug, warn};

use crate::compression::CompressionCodec;
use crate::config::ProducerConfig;
use crate::constants::MESSAGE_MAGIC_V1;
use crate::error::{Error, Result};
use crate::message::{Message, MessageSet};
use crate::metrics::MetricsSink;
use crate::produce::ProduceRequest;
use crate::producer::{BatchOutcome, BrokerConnection, PartitionBuffer, ProducerMessage};

pub(crate) struct PartitionWorker {
    buffer: PartitionBuffer,
    input: mpsc::Receiver<ProducerMessage>,
    input_open: bool,
    shutdown: broadcast::Receiver<()>,
    /// Cleared once every abort sender is gone.
    listening: bool,
    connection: Arc<dyn BrokerConnection>,
    metrics: Arc<dyn MetricsSink>,
    config: Arc<ProducerConfig>,
}

impl PartitionWorker {
    pub(crate) fn new(
        buffer: PartitionBuffer,
        input: mpsc::Receiver<ProducerMessage>,
        shutdown: broadcast::Receiver<()>,
        connection: Arc<dyn BrokerConnection>,
        metrics: Arc<dyn MetricsSink>,
        config: Arc<ProducerConfig>,
    ) -> Self {
        Self {
            buffer,
            input,
            input_open: true,
            shutdown,
            listening: true,
            connection,
            metrics,
            config,
        }
    }

    /// Accept, send and resolve messages until the input closes and the
    /// buffer drains, or until the producer aborts.
    pub(crate) async fn run(mut self) {
        debug!(
            topic = %self.buffer.topic(),
            partition = self.buffer.partition(),
            "Partition worker started"
        );

        loop {
            if self.buffer.is_empty() {
                if !self.input_open {
                    break;
                }
                // idle: wait for the next message or the abort signal
                tokio::select! {
                    biased;
                    signal = self.shutdown.recv(), if self.listening => {
                        if is_abort(&signal) {
                            self.abort().await;
                            return;
                        }
                        self.listening = false;
                    }
                    msg = self.input.recv() => match msg {
                        Some(msg) => self.buffer.add(msg).await,
                        None => self.input_open = false,
                    },
                }
            }

            self.pull_ready().await;

            if self.aborted() {
                self.abort().await;
                return;
            }

            if self.buffer.has_next() {
                self.flush().await;
            }
        }

        debug!(
            topic = %self.buffer.topic(),
            partition = self.buffer.partition(),
            "Partition worker finished"
        );
    }

    /// Take whatever input is already queued, up to the backpressure ceiling.
    async fn pull_ready(&mut self) {
        while self.input_open && !self.buffer.full() {
            match self.input.try_recv() {
                Ok(msg) => self.buffer.add(msg).await,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.input_open = false,
            }
        }
    }

    fn aborted(&mut self) -> bool {
        self.listening
            && matches!(
                self.shutdown.try_recv(),
                Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_))
            )
    }

    /// Draft the pending entries into one request and apply the outcome.
    async fn flush(&mut self) {
        let topic = self.buffer.topic().to_string();
        let partition = self.buffer.partition();

        let max = self.config.max_batch_messages;
        let mut set = MessageSet::new();
        while max == 0 || set.len() < max {
            let Some(entry) = self.buffer.next() else {
                break;
            };
            set.add_message(entry.message().clone());
        }
        let drafted = set.len();

        let request = match self.build_request(&topic, partition, set) {
            Ok(request) => request,
            Err(err) => {
                warn!(topic = %topic, partition, error = %err, "Failed to build produce request");
                self.buffer.mark_immediate_failure(drafted, err).await;
                return;
            }
        };
        let body = match request.to_bytes(self.metrics.as_ref()) {
            Ok(body) => body,
            Err(err) => {
                warn!(topic = %topic, partition, error = %err, "Failed to encode produce request");
                self.buffer.mark_immediate_failure(drafted, err).await;
                return;
            }
        };

        debug!(
            topic = %topic,
            partition,
            messages = drafted,
            bytes = body.len(),
            "Sending produce request"
        );
        let result = self.connection.send(&request, body).await;

        match BatchOutcome::classify(result, &topic, partition, self.config.required_acks) {
            BatchOutcome::Success {
                base_offset: Some(offset),
            } => self.buffer.mark_success_with_offset(drafted, offset).await,
            BatchOutcome::Success { base_offset: None } => self.buffer.mark_success(drafted).await,
            BatchOutcome::Retriable(err) => {
                warn!(topic = %topic, partition, error = %err, "Produce request failed, retrying");
                self.buffer.mark_failure(drafted, err).await;
                self.buffer.rewind();
                if !self.buffer.is_empty() {
                    self.backoff().await;
                }
            }
            BatchOutcome::Fatal(err) => {
                warn!(topic = %topic, partition, error = %err, "Produce request rejected");
                self.buffer.mark_immediate_failure(drafted, err).await;
            }
        }
    }

    fn build_request(
        &self,
        topic: &str,
        partition: i32,
        mut set: MessageSet,
    ) -> Result<ProduceRequest> {
        let mut request = ProduceRequest::new(
            self.config.required_acks,
            self.config.timeout_ms(),
            self.config.request_version(),
        )?;

        if self.config.compression == CompressionCodec::None {
            request.add_set(topic, partition, set);
            return Ok(request);
        }

        let version = self.config.message_version();
        let timestamp = if version >= MESSAGE_MAGIC_V1 {
            set.messages.last().and_then(|b| b.msg.timestamp)
        } else {
            None
        };
        if version >= MESSAGE_MAGIC_V1 {
            set.assign_relative_offsets();
        }
        let wrapper = Message::compressed(self.config.compression, version, timestamp, set)?;
        request.add_message(topic, partition, wrapper);
        Ok(request)
    }

    /// Sleep before redrafting; an abort cuts the wait short.
    async fn backoff(&mut self) {
        let sleep = tokio::time::sleep(self.config.retry_backoff);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                signal = self.shutdown.recv(), if self.listening => {
                    if is_abort(&signal) {
                        self.abort().await;
                        return;
                    }
                    self.listening = false;
                }
                _ = &mut sleep => return,
            }
        }
    }

    /// Resolve everything buffered or still queued with [`Error::ShuttingDown`].
    async fn abort(&mut self) {
        let pending = self.buffer.len();
        warn!(
            topic = %self.buffer.topic(),
            partition = self.buffer.partition(),
            pending,
            "Producer aborted, abandoning pending messages"
        );
        self.buffer
            .mark_immediate_failure(pending, Error::ShuttingDown)
            .await;

        self.input.close();
        while let Some(msg) = self.input.recv().await {
            self.buffer.reject(msg, Error::ShuttingDown).await;
        }
        self.input_open = false;
    }
}

fn is_abort(signal: &std::result::Result<(), broadcast::error::RecvError>) -> bool {
    matches!(signal, Ok(()) | Err(broadcast::error::RecvError::Lagged(_)))
}
