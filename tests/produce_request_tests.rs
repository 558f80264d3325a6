//! Wire tests for produce requests and the observations made while encoding.

use std::sync::Mutex;

use bytes::Bytes;
use kafkaesque_producer::compression::CompressionCodec;
use kafkaesque_producer::error::Error;
use kafkaesque_producer::message::{Message, MessageSet};
use kafkaesque_producer::metrics::{MetricsSink, NoopMetrics};
use kafkaesque_producer::produce::ProduceRequest;
use kafkaesque_producer::types::{KafkaVersion, RequiredAcks};
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq)]
enum Observation {
    BatchSize(String, usize),
    CompressionRatio(String, f64),
    RecordsSent(String, u64),
    RecordsPerRequest(String, u64),
}

#[derive(Default)]
struct RecordingMetrics {
    seen: Mutex<Vec<Observation>>,
}

impl RecordingMetrics {
    fn take(&self) -> Vec<Observation> {
        std::mem::take(&mut *self.seen.lock().unwrap())
    }

    fn push(&self, observation: Observation) {
        self.seen.lock().unwrap().push(observation);
    }
}

impl MetricsSink for RecordingMetrics {
    fn observe_batch_size(&self, topic: &str, bytes: usize) {
        self.push(Observation::BatchSize(topic.to_string(), bytes));
    }

    fn observe_compression_ratio(&self, topic: &str, ratio: f64) {
        self.push(Observation::CompressionRatio(topic.to_string(), ratio));
    }

    fn add_records_sent(&self, topic: &str, records: u64) {
        self.push(Observation::RecordsSent(topic.to_string(), records));
    }

    fn observe_records_per_request(&self, topic: &str, records: u64) {
        self.push(Observation::RecordsPerRequest(topic.to_string(), records));
    }
}

fn value(v: &'static [u8]) -> Message {
    Message::new(None, Some(Bytes::from_static(v)))
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_wait_for_all_single_message_round_trip() {
    let mut request = ProduceRequest::new(RequiredAcks::WaitForAll, 1_000, 0).unwrap();
    request.add_message("topic", 0, value(b"hello"));

    let bytes = request.to_bytes(&NoopMetrics).unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xFF]);

    let decoded = ProduceRequest::decode(bytes, 0).unwrap();
    assert_eq!(decoded.required_acks, RequiredAcks::WaitForAll);
    let set = decoded.set("topic", 0).unwrap();
    assert_eq!(set.len(), 1);
    assert_eq!(set.messages[0].msg.value, Some(Bytes::from_static(b"hello")));
    assert_eq!(decoded, request);
}

#[test]
fn test_zero_topics_decodes_to_empty_request() {
    let request = ProduceRequest::new(RequiredAcks::WaitForLocal, 250, 1).unwrap();
    let metrics = RecordingMetrics::default();
    let bytes = request.to_bytes(&metrics).unwrap();
    assert_eq!(bytes.as_ref(), &[0, 1, 0, 0, 0, 250, 0, 0, 0, 0]);
    assert!(metrics.take().is_empty());

    let decoded = ProduceRequest::decode(bytes, 1).unwrap();
    assert!(decoded.is_empty());
    assert_eq!(decoded.timeout, 250);
}

#[test]
fn test_partition_entry_layout() {
    let mut request = ProduceRequest::new(RequiredAcks::WaitForLocal, 0, 0).unwrap();
    request.add_message("t", 7, value(b"abc"));
    let bytes = request.to_bytes(&NoopMetrics).unwrap();

    // acks(2) timeout(4) topics(4) name(2+1) partitions(4)
    let entry = &bytes[17..];
    assert_eq!(&entry[..4], &7i32.to_be_bytes());
    let set_len = i32::from_be_bytes([entry[4], entry[5], entry[6], entry[7]]);
    assert_eq!(set_len as usize, entry.len() - 8);
    // offset(8) size(4) crc(4) magic(1) attributes(1) key(4) value(4+3)
    assert_eq!(set_len, 29);
}

// ============================================================================
// Instrumentation
// ============================================================================

#[test]
fn test_batch_sizes_and_record_counts_per_topic() {
    let mut request = ProduceRequest::new(RequiredAcks::WaitForLocal, 100, 0).unwrap();
    request.add_message("alpha", 0, value(b"abc"));
    request.add_message("alpha", 0, value(b"abc"));
    request.add_message("alpha", 1, value(b"abc"));
    request.add_message("beta", 0, value(b"abc"));

    let metrics = RecordingMetrics::default();
    request.to_bytes(&metrics).unwrap();

    // each entry: partition(4) + size(4) + n * (block header 12 + message 17)
    assert_eq!(
        metrics.take(),
        vec![
            Observation::BatchSize("alpha".into(), 66),
            Observation::BatchSize("alpha".into(), 37),
            Observation::RecordsSent("alpha".into(), 3),
            Observation::RecordsPerRequest("alpha".into(), 3),
            Observation::BatchSize("beta".into(), 37),
            Observation::RecordsSent("beta".into(), 1),
            Observation::RecordsPerRequest("beta".into(), 1),
        ]
    );
}

#[test]
fn test_compressed_wrapper_counts_inner_records() {
    let mut inner = MessageSet::new();
    for _ in 0..20 {
        inner.add_message(value(b"repetitive payload repetitive payload"));
    }
    let wrapper = Message::compressed(CompressionCodec::Gzip, 0, None, inner).unwrap();
    let uncompressed = wrapper.value.as_ref().unwrap().len();
    let compressed = wrapper.compressed_size();
    assert!(compressed > 0 && compressed < uncompressed);

    let mut request = ProduceRequest::new(RequiredAcks::WaitForLocal, 100, 0).unwrap();
    request.add_message("logs", 2, wrapper);

    let metrics = RecordingMetrics::default();
    let bytes = request.to_bytes(&metrics).unwrap();
    let seen = metrics.take();

    assert_eq!(
        seen[0],
        Observation::CompressionRatio("logs".into(), uncompressed as f64 / compressed as f64)
    );
    assert!(matches!(seen[1], Observation::BatchSize(ref t, _) if t == "logs"));
    assert_eq!(seen[2], Observation::RecordsSent("logs".into(), 20));
    assert_eq!(seen[3], Observation::RecordsPerRequest("logs".into(), 20));

    let decoded = ProduceRequest::decode(bytes, 0).unwrap();
    let msg = &decoded.set("logs", 2).unwrap().messages[0].msg;
    assert_eq!(msg.codec, CompressionCodec::Gzip);
    assert_eq!(msg.record_count(), 20);
    assert_eq!(decoded.record_count(), 20);
}

#[test]
fn test_snappy_wrapper_with_relative_offsets() {
    let mut inner = MessageSet::new();
    for ts in [10, 11, 12] {
        inner.add_message(Message::with_timestamp(None, Some(Bytes::from_static(b"x")), ts));
    }
    inner.assign_relative_offsets();
    let wrapper = Message::compressed(CompressionCodec::Snappy, 1, Some(12), inner).unwrap();

    let mut request = ProduceRequest::new(RequiredAcks::WaitForLocal, 100, 2).unwrap();
    request.add_message("t", 0, wrapper);
    let decoded = ProduceRequest::decode(request.to_bytes(&NoopMetrics).unwrap(), 2).unwrap();

    let msg = &decoded.set("t", 0).unwrap().messages[0].msg;
    assert_eq!(msg.timestamp, Some(12));
    let offsets: Vec<i64> = msg.set.as_ref().unwrap().messages.iter().map(|b| b.offset).collect();
    assert_eq!(offsets, vec![0, 1, 2]);
}

// ============================================================================
// Versions and malformed input
// ============================================================================

#[test]
fn test_version_maps_to_required_broker_release() {
    let expected = [
        (0, KafkaVersion::V0_8_2_0),
        (1, KafkaVersion::V0_9_0_0),
        (2, KafkaVersion::V0_10_0_0),
    ];
    for (version, release) in expected {
        let request = ProduceRequest::new(RequiredAcks::NoResponse, 0, version).unwrap();
        assert_eq!(request.required_version(), release);
        assert_eq!(request.api_key(), 0);
    }
    assert!(ProduceRequest::new(RequiredAcks::NoResponse, 0, 3).is_err());
}

#[test]
fn test_truncated_request_is_decode_error() {
    let mut request = ProduceRequest::new(RequiredAcks::WaitForLocal, 100, 0).unwrap();
    request.add_message("t", 0, value(b"abcdef"));
    let bytes = request.to_bytes(&NoopMetrics).unwrap();

    for cut in [1, 6, 12, 20] {
        let err = ProduceRequest::decode(bytes.slice(..cut), 0).unwrap_err();
        assert!(matches!(err, Error::Decode(_)), "cut at {}: {:?}", cut, err);
    }
}

#[test]
fn test_oversized_set_length_cannot_escape_its_entry() {
    let mut request = ProduceRequest::new(RequiredAcks::WaitForLocal, 100, 0).unwrap();
    request.add_message("t", 0, value(b"abc"));
    let mut bytes = request.to_bytes(&NoopMetrics).unwrap().to_vec();

    // the set length sits after the partition id
    bytes[21..25].copy_from_slice(&1_000i32.to_be_bytes());
    let err = ProduceRequest::decode(Bytes::from(bytes), 0).unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
}

#[test]
fn test_corrupted_crc_is_decode_error() {
    let mut request = ProduceRequest::new(RequiredAcks::WaitForLocal, 100, 0).unwrap();
    request.add_message("t", 0, value(b"abc"));
    let mut bytes = request.to_bytes(&NoopMetrics).unwrap().to_vec();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    let err = ProduceRequest::decode(Bytes::from(bytes), 0).unwrap_err();
    assert!(err.to_string().contains("checksum"));
}

// ============================================================================
// Round-trip property
// ============================================================================

fn payload() -> impl Strategy<Value = Option<Bytes>> {
    prop::option::of(prop::collection::vec(any::<u8>(), 0..64).prop_map(Bytes::from))
}

fn message(version: i16) -> impl Strategy<Value = Message> {
    (payload(), payload(), 0i64..i64::MAX).prop_map(move |(key, value, ts)| {
        if version >= 2 {
            Message::with_timestamp(key, value, ts)
        } else {
            Message::new(key, value)
        }
    })
}

fn arb_request() -> impl Strategy<Value = ProduceRequest> {
    (0i16..=2).prop_flat_map(|version| {
        let entry = ("[a-z][a-z0-9._-]{0,15}", 0i32..8, prop::collection::vec(message(version), 1..6));
        (
            prop_oneof![
                Just(RequiredAcks::NoResponse),
                Just(RequiredAcks::WaitForLocal),
                Just(RequiredAcks::WaitForAll)
            ],
            0i32..60_000,
            prop::collection::vec(entry, 0..6),
        )
            .prop_map(move |(acks, timeout, entries)| {
                let mut request = ProduceRequest::new(acks, timeout, version).unwrap();
                for (topic, partition, messages) in entries {
                    for msg in messages {
                        request.add_message(&topic, partition, msg);
                    }
                }
                request
            })
    })
}

proptest! {
    #[test]
    fn prop_request_round_trips_for_every_version(request in arb_request()) {
        let bytes = request.to_bytes(&NoopMetrics).unwrap();
        let decoded = ProduceRequest::decode(bytes, request.version()).unwrap();
        prop_assert_eq!(decoded, request);
    }
}
