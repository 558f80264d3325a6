//! Produce request encoding and parsing.

use std::collections::BTreeMap;

use bytes::Bytes;
use nom::{
    IResult,
    number::complete::{be_i16, be_i32},
};
use nombytes::NomBytes;

use crate::constants::{MAX_PRODUCE_VERSION, PRODUCE_API_KEY};
use crate::encode::{PacketEncoder, Placeholder};
use crate::error::{Error, Result};
use crate::message::{Message, MessageSet, parse_message_set};
use crate::metrics::MetricsSink;
use crate::parser::{bytes_to_string, parse_all, parse_array, parse_sized, parse_string};
use crate::types::{KafkaVersion, RequiredAcks};

/// Topic -> partition -> MessageSet, iterated in key order.
pub type MessageSets = BTreeMap<String, BTreeMap<i32, MessageSet>>;

/// Request asking a broker to append message sets to partition logs.
///
/// Versions 0 to 2 share the same request layout; the version only tells
/// the broker which response layout and message magic to expect.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProduceRequest {
    pub required_acks: RequiredAcks,
    /// Milliseconds the broker may wait for the required acks.
    pub timeout: i32,
    version: i16,
    sets: MessageSets,
}

impl ProduceRequest {
    pub fn new(required_acks: RequiredAcks, timeout: i32, version: i16) -> Result<Self> {
        check_version(version, Error::Encode)?;
        Ok(Self {
            required_acks,
            timeout,
            version,
            sets: BTreeMap::new(),
        })
    }

    pub fn api_key(&self) -> i16 {
        PRODUCE_API_KEY
    }

    pub fn version(&self) -> i16 {
        self.version
    }

    /// Oldest broker release able to serve this request.
    pub fn required_version(&self) -> KafkaVersion {
        KafkaVersion::for_produce_version(self.version)
    }

    /// Append `msg` to the set for (topic, partition), creating it on first use.
    pub fn add_message(&mut self, topic: &str, partition: i32, msg: Message) {
        self.sets
            .entry(topic.to_string())
            .or_default()
            .entry(partition)
            .or_default()
            .add_message(msg);
    }

    /// Replace the set for (topic, partition).
    pub fn add_set(&mut self, topic: &str, partition: i32, set: MessageSet) {
        self.sets
            .entry(topic.to_string())
            .or_default()
            .insert(partition, set);
    }

    pub fn sets(&self) -> &MessageSets {
        &self.sets
    }

    pub fn set(&self, topic: &str, partition: i32) -> Option<&MessageSet> {
        self.sets.get(topic)?.get(&partition)
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Logical records carried by every set, counting inside compressed wrappers.
    pub fn record_count(&self) -> usize {
        self.sets
            .values()
            .flat_map(|partitions| partitions.values())
            .map(MessageSet::record_count)
            .sum()
    }

    /// Encode the request body, reporting batch observations to `metrics`.
    pub fn encode(&self, encoder: &mut PacketEncoder, metrics: &dyn MetricsSink) -> Result<()> {
        encoder.put(&self.required_acks)?;
        encoder.put(&self.timeout)?;
        encoder.put_array_length(self.sets.len())?;

        for (topic, partitions) in &self.sets {
            encoder.put(topic)?;
            encoder.put_array_length(partitions.len())?;

            let mut topic_records: u64 = 0;
            for (partition, set) in partitions {
                let start = encoder.offset();
                encoder.put(partition)?;
                encoder.push(Placeholder::Length);
                set.encode(encoder)?;
                encoder.pop()?;

                for block in &set.messages {
                    topic_records += block.msg.record_count() as u64;
                    let compressed_size = block.msg.compressed_size();
                    if compressed_size != 0 {
                        let uncompressed = block.msg.value.as_ref().map_or(0, Bytes::len);
                        metrics.observe_compression_ratio(
                            topic,
                            uncompressed as f64 / compressed_size as f64,
                        );
                    }
                }
                metrics.observe_batch_size(topic, encoder.offset() - start);
            }

            if topic_records > 0 {
                metrics.add_records_sent(topic, topic_records);
                metrics.observe_records_per_request(topic, topic_records);
            }
        }

        Ok(())
    }

    pub fn to_bytes(&self, metrics: &dyn MetricsSink) -> Result<Bytes> {
        let mut encoder = PacketEncoder::new();
        self.encode(&mut encoder, metrics)?;
        encoder.finish()
    }

    /// Decode a request body of the given version.
    pub fn decode(bytes: Bytes, version: i16) -> Result<Self> {
        check_version(version, Error::Decode)?;
        parse_all(bytes, |s| parse_produce_request(s, version))
    }
}

/// `err` picks the variant, so encode and decode each report in their own terms.
fn check_version(version: i16, err: fn(String) -> Error) -> Result<()> {
    if !(0..=MAX_PRODUCE_VERSION).contains(&version) {
        return Err(err(format!(
            "unsupported produce request version {}",
            version
        )));
    }
    Ok(())
}

pub fn parse_produce_request(s: NomBytes, version: i16) -> IResult<NomBytes, ProduceRequest> {
    let (s, acks) = be_i16(s)?;
    let required_acks = RequiredAcks::from_wire(acks);
    let (s, timeout) = be_i32(s)?;
    let (s, topics) = parse_array(parse_produce_topic)(s)?;

    let mut sets = MessageSets::new();
    for (topic, partitions) in topics {
        sets.entry(topic).or_default().extend(partitions);
    }

    Ok((
        s,
        ProduceRequest {
            required_acks,
            timeout,
            version,
            sets,
        },
    ))
}

fn parse_produce_topic(s: NomBytes) -> IResult<NomBytes, (String, Vec<(i32, MessageSet)>)> {
    let (s, name) = parse_string(s)?;
    let (s, partitions) = parse_array(parse_produce_partition)(s)?;
    Ok((s, (bytes_to_string(&name)?, partitions)))
}

fn parse_produce_partition(s: NomBytes) -> IResult<NomBytes, (i32, MessageSet)> {
    let (s, partition) = be_i32(s)?;
    let (s, set) = parse_sized(parse_message_set)(s)?;
    Ok((s, (partition, set)))
}
