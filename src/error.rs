//! Crate & protocol level errors.
//!
//! # Error Taxonomy
//!
//! - [`Error::Encode`]: a payload [`Encoder`](crate::producer::Encoder), a
//!   compressor or the packet framing failed. The message never enters a
//!   partition buffer.
//! - [`Error::Decode`]: malformed or truncated wire bytes. The whole
//!   request/response is unusable and is never retried at this layer.
//! - [`Error::Broker`]: a partition-level error reported by the broker. Whether
//!   the batch is retried depends on [`KafkaCode::is_retriable`].
//! - [`Error::IncompleteResponse`], [`Error::Connection`], [`Error::IoError`]:
//!   the round-trip itself failed; the batch is retried.
//! - [`Error::Config`]: invalid producer configuration.
//! - [`Error::ShuttingDown`]: the producer was aborted before the message
//!   resolved.
//!
//! Per-message failures are never returned from the partition buffer; they
//! are delivered on the error channel paired with the message. Only envelope
//! level encode/decode surfaces through [`Result`].

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::{io, result};
use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, Error>;

/// Producer and protocol level errors.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum Error {
    /// A payload or frame could not be encoded.
    #[error("Encoding error: {0}")]
    Encode(String),

    /// Could not parse the data.
    #[error("Protocol decode error: {0}")]
    Decode(String),

    /// The broker rejected the partition's batch.
    #[error("Broker error: {0:?}")]
    Broker(KafkaCode),

    /// The response did not contain a block for the partition.
    #[error("Response did not contain all the expected topic/partition blocks")]
    IncompleteResponse,

    /// The connection collaborator failed to complete the round-trip.
    #[error("Connection error: {0}")]
    Connection(String),

    /// An error in the network.
    #[error("IO error: {0:?}")]
    IoError(io::ErrorKind),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The producer shut down before the message could be resolved.
    #[error("Producer is shutting down")]
    ShuttingDown,
}

impl Error {
    /// Whether a batch that failed with this error may be drafted again.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Broker(code) => code.is_retriable(),
            Error::IncompleteResponse | Error::Connection(_) | Error::IoError(_) => true,
            Error::Encode(_) | Error::Decode(_) | Error::Config(_) | Error::ShuttingDown => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IoError(e.kind())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Encode(e.to_string())
    }
}

/// Various errors reported by a remote Kafka server.
/// See also [Kafka Errors](http://kafka.apache.org/protocol.html)
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, Default)]
pub enum KafkaCode {
    /// An unexpected server error
    Unknown = -1,
    #[default]
    None = 0,
    /// The requested offset is outside the range of offsets
    /// maintained by the server for the given topic/partition
    OffsetOutOfRange = 1,
    /// This indicates that a message contents does not match its CRC
    CorruptMessage = 2,
    /// This request is for a topic or partition that does not exist
    /// on this broker.
    UnknownTopicOrPartition = 3,
    /// The message has a negative size
    InvalidMessageSize = 4,
    /// There is currently no leader for this partition and hence it is
    /// unavailable for writes.
    LeaderNotAvailable = 5,
    /// The client sent messages to a replica that is not the leader for
    /// the partition. Its metadata is out of date.
    NotLeaderForPartition = 6,
    /// The request exceeded the user-specified time limit.
    RequestTimedOut = 7,
    /// The broker is not alive.
    BrokerNotAvailable = 8,
    /// A replica is expected on a broker, but is not.
    ReplicaNotAvailable = 9,
    /// The client attempted to produce a message larger than the
    /// configured maximum.
    MessageSizeTooLarge = 10,
    /// The server disconnected before a response was received.
    NetworkException = 13,
    /// The request addressed an invalid topic (illegal name or an internal
    /// topic).
    InvalidTopic = 17,
    /// A message batch exceeds the maximum configured segment size.
    RecordListTooLarge = 18,
    /// The number of in-sync replicas is lower than the configured minimum
    /// and requiredAcks is -1.
    NotEnoughReplicas = 19,
    /// The message was written to the log, but with fewer in-sync replicas
    /// than required.
    NotEnoughReplicasAfterAppend = 20,
    /// requiredAcks is anything other than -1, 1, or 0.
    InvalidRequiredAcks = 21,
    /// The client is not authorized to access the requested topic.
    TopicAuthorizationFailed = 29,
    /// The client is not authorized to use an inter-broker or
    /// administrative API.
    ClusterAuthorizationFailed = 31,
    /// The timestamp of the message is out of acceptable range.
    InvalidTimestamp = 32,
    /// The version of API is not supported.
    UnsupportedVersion = 35,
    /// The message format version on the broker does not support the request.
    UnsupportedForMessageFormat = 43,
}

impl KafkaCode {
    /// Decode a wire error code; codes this crate does not know map to
    /// [`KafkaCode::Unknown`].
    pub fn from_wire(code: i16) -> Self {
        KafkaCode::from_i16(code).unwrap_or(KafkaCode::Unknown)
    }

    /// Whether a produce batch rejected with this code may succeed if sent
    /// again unchanged.
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            KafkaCode::CorruptMessage
                | KafkaCode::LeaderNotAvailable
                | KafkaCode::NotLeaderForPartition
                | KafkaCode::RequestTimedOut
                | KafkaCode::BrokerNotAvailable
                | KafkaCode::ReplicaNotAvailable
                | KafkaCode::NetworkException
                | KafkaCode::NotEnoughReplicas
                | KafkaCode::NotEnoughReplicasAfterAppend
        )
    }
}
