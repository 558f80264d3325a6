//! Producer configuration.
//!
//! ```rust
//! use kafkaesque_producer::config::ProducerConfig;
//! use kafkaesque_producer::types::RequiredAcks;
//!
//! let config = ProducerConfig {
//!     return_successes: true,
//!     required_acks: RequiredAcks::WaitForAll,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::compression::CompressionCodec;
use crate::constants::{
    DEFAULT_CHANNEL_BUFFER_SIZE, DEFAULT_CLIENT_ID, DEFAULT_MAX_BUFFERED,
    DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_MIN_QUEUE_LEN, DEFAULT_PRODUCE_TIMEOUT_MS,
    DEFAULT_RETRY_BACKOFF_MS, DEFAULT_RETRY_MAX,
};
use crate::error::{Error, Result};
use crate::types::{KafkaVersion, RequiredAcks};

#[derive(Debug, Clone, PartialEq)]
pub struct ProducerConfig {
    /// Deliver acknowledged messages on the success channel.
    pub return_successes: bool,
    /// Failed attempts after which a message is abandoned.
    pub retry_max: u32,
    /// Pause before a failed batch is redrafted.
    pub retry_backoff: Duration,
    /// Un-acknowledged messages a partition holds before it stops accepting input.
    pub max_buffered: usize,
    /// Starting and minimum capacity of a partition buffer.
    pub min_queue_len: usize,
    pub required_acks: RequiredAcks,
    /// How long the broker may wait for `required_acks`.
    pub timeout: Duration,
    /// Oldest broker release to talk to; selects request and message versions.
    pub version: KafkaVersion,
    pub compression: CompressionCodec,
    /// Upper bound on messages drafted into one request, 0 for no bound.
    pub max_batch_messages: usize,
    pub channel_buffer_size: usize,
    /// Largest encoded key + value accepted for one message.
    pub max_message_bytes: usize,
    pub client_id: String,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            return_successes: false,
            retry_max: DEFAULT_RETRY_MAX,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            max_buffered: DEFAULT_MAX_BUFFERED,
            min_queue_len: DEFAULT_MIN_QUEUE_LEN,
            required_acks: RequiredAcks::WaitForLocal,
            timeout: Duration::from_millis(DEFAULT_PRODUCE_TIMEOUT_MS),
            version: KafkaVersion::default(),
            compression: CompressionCodec::None,
            max_batch_messages: 0,
            channel_buffer_size: DEFAULT_CHANNEL_BUFFER_SIZE,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            client_id: DEFAULT_CLIENT_ID.to_string(),
        }
    }
}

impl ProducerConfig {
    /// Produce request version sent to brokers.
    pub fn request_version(&self) -> i16 {
        self.version.produce_version()
    }

    /// Magic byte of the messages built for requests.
    pub fn message_version(&self) -> i8 {
        self.version.message_version()
    }

    /// Broker-side timeout in wire form.
    pub fn timeout_ms(&self) -> i32 {
        i32::try_from(self.timeout.as_millis()).unwrap_or(i32::MAX)
    }

    /// Validate the configuration and return any errors found.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !is_valid_client_id(&self.client_id) {
            errors.push("client_id is invalid".to_string());
        }

        if self.max_buffered == 0 {
            errors.push("max_buffered must be greater than 0".to_string());
        }

        if self.min_queue_len == 0 {
            errors.push("min_queue_len must be greater than 0".to_string());
        }

        if self.channel_buffer_size == 0 {
            errors.push("channel_buffer_size must be greater than 0".to_string());
        }

        if self.max_message_bytes == 0 {
            errors.push("max_message_bytes must be greater than 0".to_string());
        }

        if self.compression == CompressionCodec::Lz4 && self.version < KafkaVersion::V0_10_0_0 {
            errors.push("lz4 compression requires version >= 0.10.0.0".to_string());
        }

        if self.timeout.as_millis() > i32::MAX as u128 {
            errors.push(format!(
                "timeout ({:?}) does not fit the i32 millisecond wire field",
                self.timeout
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate configuration and panic with detailed error if invalid.
    pub fn validate_or_panic(&self) {
        if let Err(errors) = self.validate() {
            eprintln!("=== Configuration Validation Failed ===");
            for (i, error) in errors.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, error);
            }
            eprintln!("========================================");
            panic!("Invalid configuration - {} error(s) found", errors.len());
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Environment variables (unset ones keep their default):
    /// - `PRODUCER_RETURN_SUCCESSES`: "true" or "false"
    /// - `PRODUCER_RETRY_MAX`
    /// - `PRODUCER_RETRY_BACKOFF_MS`
    /// - `PRODUCER_MAX_BUFFERED`
    /// - `PRODUCER_MIN_QUEUE_LEN`
    /// - `PRODUCER_REQUIRED_ACKS`: "0", "1", "-1", "none", "local" or "all"
    /// - `PRODUCER_TIMEOUT_MS`
    /// - `PRODUCER_KAFKA_VERSION`: e.g. "0.10.0.0"
    /// - `PRODUCER_COMPRESSION`: "none", "gzip", "snappy" or "lz4"
    /// - `PRODUCER_MAX_BATCH_MESSAGES`
    /// - `PRODUCER_CHANNEL_BUFFER_SIZE`
    /// - `PRODUCER_MAX_MESSAGE_BYTES`
    /// - `PRODUCER_CLIENT_ID`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ProducerConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let return_successes = lookup("PRODUCER_RETURN_SUCCESSES")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(defaults.return_successes);

        let config = Self {
            return_successes,
            retry_max: parse_var(&lookup, "PRODUCER_RETRY_MAX", defaults.retry_max)?,
            retry_backoff: Duration::from_millis(parse_var(
                &lookup,
                "PRODUCER_RETRY_BACKOFF_MS",
                defaults.retry_backoff.as_millis() as u64,
            )?),
            max_buffered: parse_var(&lookup, "PRODUCER_MAX_BUFFERED", defaults.max_buffered)?,
            min_queue_len: parse_var(&lookup, "PRODUCER_MIN_QUEUE_LEN", defaults.min_queue_len)?,
            required_acks: parse_var(&lookup, "PRODUCER_REQUIRED_ACKS", defaults.required_acks)?,
            timeout: Duration::from_millis(parse_var(
                &lookup,
                "PRODUCER_TIMEOUT_MS",
                defaults.timeout.as_millis() as u64,
            )?),
            version: parse_var(&lookup, "PRODUCER_KAFKA_VERSION", defaults.version)?,
            compression: parse_var(&lookup, "PRODUCER_COMPRESSION", defaults.compression)?,
            max_batch_messages: parse_var(
                &lookup,
                "PRODUCER_MAX_BATCH_MESSAGES",
                defaults.max_batch_messages,
            )?,
            channel_buffer_size: parse_var(
                &lookup,
                "PRODUCER_CHANNEL_BUFFER_SIZE",
                defaults.channel_buffer_size,
            )?,
            max_message_bytes: parse_var(
                &lookup,
                "PRODUCER_MAX_MESSAGE_BYTES",
                defaults.max_message_bytes,
            )?,
            client_id: lookup("PRODUCER_CLIENT_ID").unwrap_or(defaults.client_id),
        };

        config.validate().map_err(|errors| Error::Config(errors.join("; ")))?;
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {}: {}", key, e))),
        None => Ok(default),
    }
}

/// Client ids are non-empty and limited to ASCII alphanumerics, '.', '_' and '-'.
fn is_valid_client_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
