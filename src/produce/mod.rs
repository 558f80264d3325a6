//! Produce API (key 0) request and response, versions 0 to 2.
//!
//! ```text
//! ProduceRequest => RequiredAcks Timeout [TopicName [Partition MessageSetSize MessageSet]]
//! ProduceResponse => [TopicName [Partition ErrorCode Offset Timestamp(v2)]] ThrottleTime(v1+)
//! ```

mod request;
mod response;

pub use request::*;
pub use response::*;
