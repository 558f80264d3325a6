//! Typed wrappers for produce protocol settings.
//!
//! These keep raw wire integers (acks as i16, request versions as i16) from
//! being mixed up with unrelated values of the same width.

use bytes::BufMut;
use std::fmt;
use std::str::FromStr;

use crate::encode::ToByte;
use crate::error::{Error, Result};

/// How many replica acknowledgements the broker collects before responding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RequiredAcks {
    /// The broker sends no response at all.
    NoResponse,
    /// Respond once the leader has written the batch to its local log.
    #[default]
    WaitForLocal,
    /// Respond once every in-sync replica has the batch.
    WaitForAll,
    /// Any other wire value, kept as sent. Brokers that predate 0.9 read
    /// values above 1 as a replica count.
    Other(i16),
}

impl RequiredAcks {
    /// Wire value.
    #[inline]
    pub const fn value(self) -> i16 {
        match self {
            RequiredAcks::NoResponse => 0,
            RequiredAcks::WaitForLocal => 1,
            RequiredAcks::WaitForAll => -1,
            RequiredAcks::Other(value) => value,
        }
    }

    pub const fn from_wire(value: i16) -> Self {
        match value {
            0 => RequiredAcks::NoResponse,
            1 => RequiredAcks::WaitForLocal,
            -1 => RequiredAcks::WaitForAll,
            other => RequiredAcks::Other(other),
        }
    }
}

impl From<RequiredAcks> for i16 {
    fn from(acks: RequiredAcks) -> Self {
        acks.value()
    }
}

impl fmt::Display for RequiredAcks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl FromStr for RequiredAcks {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "0" | "none" => Ok(RequiredAcks::NoResponse),
            "1" | "local" => Ok(RequiredAcks::WaitForLocal),
            "-1" | "all" => Ok(RequiredAcks::WaitForAll),
            other => Err(Error::Config(format!("invalid required acks: {}", other))),
        }
    }
}

impl ToByte for RequiredAcks {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        self.value().encode(buffer)
    }
}

/// Broker release a request needs at minimum.
///
/// Ordered, so `version >= KafkaVersion::V0_10_0_0` reads naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum KafkaVersion {
    #[default]
    V0_8_2_0,
    V0_9_0_0,
    V0_10_0_0,
}

impl KafkaVersion {
    /// Highest produce request version this release understands.
    pub const fn produce_version(self) -> i16 {
        match self {
            KafkaVersion::V0_8_2_0 => 0,
            KafkaVersion::V0_9_0_0 => 1,
            KafkaVersion::V0_10_0_0 => 2,
        }
    }

    /// Magic byte of the messages this release accepts.
    pub const fn message_version(self) -> i8 {
        match self {
            KafkaVersion::V0_10_0_0 => 1,
            _ => 0,
        }
    }

    /// Minimum release for a produce request version; unknown versions map to the baseline.
    pub const fn for_produce_version(version: i16) -> Self {
        match version {
            1 => KafkaVersion::V0_9_0_0,
            2 => KafkaVersion::V0_10_0_0,
            _ => KafkaVersion::V0_8_2_0,
        }
    }
}

impl fmt::Display for KafkaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KafkaVersion::V0_8_2_0 => write!(f, "0.8.2.0"),
            KafkaVersion::V0_9_0_0 => write!(f, "0.9.0.0"),
            KafkaVersion::V0_10_0_0 => write!(f, "0.10.0.0"),
        }
    }
}

impl FromStr for KafkaVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "0.8.2" | "0.8.2.0" => Ok(KafkaVersion::V0_8_2_0),
            "0.9" | "0.9.0" | "0.9.0.0" => Ok(KafkaVersion::V0_9_0_0),
            "0.10" | "0.10.0" | "0.10.0.0" => Ok(KafkaVersion::V0_10_0_0),
            other => Err(Error::Config(format!("unsupported kafka version: {}", other))),
        }
    }
}
