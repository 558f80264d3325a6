//! Centralized protocol and producer constants.
//!
//! Every magic number used by the wire codec and the partition buffers lives
//! here so that the protocol constraints are visible in one place.
//!
//! # Categories
//!
//! - **Protocol Constants**: Kafka wire protocol sizes and limits
//! - **Message Constants**: legacy message (magic 0/1) layout
//! - **Producer Constants**: buffer sizing, retries and channel defaults

// =============================================================================
// Protocol Constants (Kafka Wire Protocol)
// =============================================================================

/// API key of the Produce request.
pub const PRODUCE_API_KEY: i16 = 0;

/// Highest Produce request version this crate encodes.
///
/// - v0: baseline
/// - v1: adds throttle time to the response (Kafka 0.9)
/// - v2: adds message timestamps, magic 1 (Kafka 0.10)
pub const MAX_PRODUCE_VERSION: i16 = 2;

/// Maximum allowed array size in Kafka protocol parsing.
///
/// This prevents memory exhaustion from malformed messages that claim
/// to have billions of elements. 100,000 is generous but bounded.
pub const MAX_PROTOCOL_ARRAY_SIZE: i32 = 100_000;

/// Width of a placeholder field reserved by the packet encoder (length or CRC).
pub const PLACEHOLDER_FIELD_SIZE: usize = 4;

// =============================================================================
// Message Constants (legacy MessageSet format)
// =============================================================================

/// Size of the per-block header inside a MessageSet: offset (8) + size (4).
pub const MESSAGE_BLOCK_HEADER_SIZE: usize = 12;

/// Mask applied to the attributes byte to extract the compression codec.
pub const COMPRESSION_CODEC_MASK: i8 = 0x07;

/// Magic byte of messages without timestamps.
pub const MESSAGE_MAGIC_V0: i8 = 0;

/// Magic byte of messages carrying a timestamp (Kafka 0.10+).
pub const MESSAGE_MAGIC_V1: i8 = 1;

// =============================================================================
// Producer Constants
// =============================================================================

/// Starting (and minimum) capacity of a partition buffer's backing array.
pub const DEFAULT_MIN_QUEUE_LEN: usize = 16;

/// Default backpressure ceiling: un-acknowledged messages per partition.
pub const DEFAULT_MAX_BUFFERED: usize = 1024;

/// Default number of attempts before a message is abandoned.
pub const DEFAULT_RETRY_MAX: u32 = 3;

/// Default delay before a failed batch is redrafted.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;

/// Default broker-side timeout for a produce request.
pub const DEFAULT_PRODUCE_TIMEOUT_MS: u64 = 10_000;

/// Default capacity of the input, per-partition and result channels.
pub const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 256;

/// Default largest encoded key + value accepted for a single message.
///
/// Matches the broker default `message.max.bytes`.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1_000_000;

/// Default client identifier advertised to brokers.
pub const DEFAULT_CLIENT_ID: &str = "kafkaesque-producer";
