//! Asynchronous producer core.
//!
//! Messages sent to an [`AsyncProducer`] are routed to one task per
//! (topic, partition). Each task owns a [`PartitionBuffer`], drafts its
//! pending messages into [`ProduceRequest`](crate::produce::ProduceRequest)s,
//! hands them to a [`BrokerConnection`] and applies the outcome back onto the
//! buffer. Every message ends on exactly one of the success or error channels.

mod async_producer;
mod buffer;
mod encoder;
mod partition;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, KafkaCode, Result};
use crate::produce::{ProduceRequest, ProduceResponse};
use crate::types::RequiredAcks;

pub use async_producer::AsyncProducer;
pub use buffer::{PartitionBuffer, PendingEntry};
pub use encoder::{ByteEncoder, Encoder, JsonEncoder, StringEncoder};

/// A message submitted by the application.
#[derive(Debug)]
pub struct ProducerMessage {
    pub topic: String,
    /// Chosen by the caller; the producer never picks partitions.
    pub partition: i32,
    pub key: Option<Box<dyn Encoder>>,
    pub value: Option<Box<dyn Encoder>>,
    /// Carried for the caller; the legacy message format has no headers.
    pub headers: Vec<(String, Bytes)>,
    /// Milliseconds since the epoch; defaults to send time for magic 1 messages.
    pub timestamp: Option<i64>,
    /// Offset assigned by the broker, -1 until known.
    pub offset: i64,
    /// Failed attempts before the message resolved.
    pub retries: u32,
}

impl ProducerMessage {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
            key: None,
            value: None,
            headers: Vec::new(),
            timestamp: None,
            offset: -1,
            retries: 0,
        }
    }

    pub fn with_key(mut self, key: impl Encoder + 'static) -> Self {
        self.key = Some(Box::new(key));
        self
    }

    pub fn with_value(mut self, value: impl Encoder + 'static) -> Self {
        self.value = Some(Box::new(value));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: Bytes) -> Self {
        self.headers.push((name.into(), value));
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Key plus value length as reported by their encoders.
    pub fn byte_size(&self) -> usize {
        self.key.as_ref().map_or(0, |k| k.length()) + self.value.as_ref().map_or(0, |v| v.length())
    }

    /// Drop the payloads once the broker holds them.
    pub fn clear(&mut self) {
        self.key = None;
        self.value = None;
    }
}

/// A message that could not be delivered, and why.
#[derive(Debug)]
pub struct ProducerError {
    pub msg: ProducerMessage,
    pub err: Error,
}

impl fmt::Display for ProducerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to produce message to {}/{}: {}",
            self.msg.topic, self.msg.partition, self.err
        )
    }
}

impl std::error::Error for ProducerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.err)
    }
}

/// Transport to the partition leader.
///
/// Implementations own sockets, framing headers and leader discovery. They
/// receive the request together with its encoded body and return the decoded
/// response, or `None` when `required_acks` is [`RequiredAcks::NoResponse`].
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn send(&self, request: &ProduceRequest, body: Bytes)
    -> Result<Option<ProduceResponse>>;
}

/// What a round-trip means for the batch that was drafted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Acknowledged; carries the base offset when the broker reported one.
    Success { base_offset: Option<i64> },
    /// Worth sending again, subject to the retry budget.
    Retriable(Error),
    /// Abandon the whole batch.
    Fatal(Error),
}

impl BatchOutcome {
    /// Interpret a connection result for the (topic, partition) batch.
    pub fn classify(
        result: Result<Option<ProduceResponse>>,
        topic: &str,
        partition: i32,
        acks: RequiredAcks,
    ) -> Self {
        let response = match result {
            Ok(response) => response,
            Err(err) => return Self::from_error(err),
        };

        let Some(response) = response else {
            return if acks == RequiredAcks::NoResponse {
                BatchOutcome::Success { base_offset: None }
            } else {
                BatchOutcome::Retriable(Error::IncompleteResponse)
            };
        };

        match response.block(topic, partition) {
            None => BatchOutcome::Retriable(Error::IncompleteResponse),
            Some(block) if block.err == KafkaCode::None => BatchOutcome::Success {
                base_offset: (block.offset >= 0).then_some(block.offset),
            },
            Some(block) => Self::from_error(Error::Broker(block.err)),
        }
    }

    fn from_error(err: Error) -> Self {
        if err.is_retriable() {
            BatchOutcome::Retriable(err)
        } else {
            BatchOutcome::Fatal(err)
        }
    }
}
