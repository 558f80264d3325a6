//! # Kafkaesque Producer
//! The reliability core of an asynchronous Kafka producer.
//!
//! Messages are buffered per (topic, partition), drafted into Produce
//! requests, retried on transient failures and resolved in submission order
//! onto a success or an error channel. Transport is pluggable: implement
//! [`BrokerConnection`](producer::BrokerConnection) over whatever socket layer
//! you already have.
//!
//! # Goals
//! - Easy to understand code
//! - Leverage best in class libraries such as [Tokio](https://tokio.rs/), [Nom](https://docs.rs/nom/latest/nom/)
//! - Never lose or duplicate a message inside the producer
//!
//! ## Getting started
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use kafkaesque_producer::prelude::*;
//!
//! struct Loopback;
//!
//! #[async_trait]
//! impl BrokerConnection for Loopback {
//!     async fn send(
//!         &self,
//!         request: &ProduceRequest,
//!         _body: bytes::Bytes,
//!     ) -> Result<Option<ProduceResponse>> {
//!         let mut response = ProduceResponse::new(request.version());
//!         for (topic, partitions) in request.sets() {
//!             for partition in partitions.keys() {
//!                 response.add_block(topic, *partition, ProduceResponseBlock::success(0));
//!             }
//!         }
//!         Ok(Some(response))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let config = ProducerConfig::from_env()?;
//!     let producer = AsyncProducer::new(config, Arc::new(Loopback), Arc::new(NoopMetrics))?;
//!
//!     producer
//!         .send(ProducerMessage::new("orders", 0).with_value(StringEncoder::from("hello")))
//!         .await?;
//!
//!     for failed in producer.close().await {
//!         eprintln!("{failed}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Resources
//! - [Kafka Protocol Spec](https://kafka.apache.org/protocol.html)
//! - [Message format](https://kafka.apache.org/documentation/#messageformat)

#![forbid(unsafe_code)]

pub mod compression;
pub mod config;
pub mod constants;
pub mod encode;
pub mod error;
pub mod message;
pub mod metrics;
mod parser;
pub mod produce;
pub mod producer;
pub mod telemetry;
pub mod types;

pub mod prelude {
    //! Main export of producer structures
    pub use crate::compression::CompressionCodec;
    pub use crate::config::ProducerConfig;
    pub use crate::error::{Error, KafkaCode, Result};
    pub use crate::message::{Message, MessageBlock, MessageSet};
    pub use crate::metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
    pub use crate::produce::{ProduceRequest, ProduceResponse, ProduceResponseBlock};
    pub use crate::producer::{
        AsyncProducer, BrokerConnection, ByteEncoder, Encoder, JsonEncoder, ProducerError,
        ProducerMessage, StringEncoder,
    };
    pub use crate::types::{KafkaVersion, RequiredAcks};

    pub use bytes;
}
