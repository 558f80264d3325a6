//! Produce response encoding and parsing.

use std::collections::BTreeMap;

use bytes::Bytes;
use nom::{
    IResult,
    number::complete::{be_i16, be_i32, be_i64},
};
use nombytes::NomBytes;

use crate::constants::MAX_PRODUCE_VERSION;
use crate::encode::PacketEncoder;
use crate::error::{Error, KafkaCode, Result};
use crate::parser::{bytes_to_string, parse_all, parse_array, parse_string};

/// Broker verdict for one partition's set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProduceResponseBlock {
    pub err: KafkaCode,
    /// Offset assigned to the first message of the set.
    pub offset: i64,
    /// Log append time in milliseconds (version 2 and later).
    pub timestamp: Option<i64>,
}

impl ProduceResponseBlock {
    pub fn success(offset: i64) -> Self {
        Self {
            err: KafkaCode::None,
            offset,
            timestamp: None,
        }
    }

    pub fn error(err: KafkaCode) -> Self {
        Self {
            err,
            offset: -1,
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProduceResponse {
    pub version: i16,
    /// Milliseconds the request was throttled for (version 1 and later).
    pub throttle_time_ms: i32,
    blocks: BTreeMap<String, BTreeMap<i32, ProduceResponseBlock>>,
}

impl ProduceResponse {
    pub fn new(version: i16) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn block(&self, topic: &str, partition: i32) -> Option<&ProduceResponseBlock> {
        self.blocks.get(topic)?.get(&partition)
    }

    pub fn add_block(&mut self, topic: &str, partition: i32, block: ProduceResponseBlock) {
        self.blocks
            .entry(topic.to_string())
            .or_default()
            .insert(partition, block);
    }

    pub fn blocks(&self) -> &BTreeMap<String, BTreeMap<i32, ProduceResponseBlock>> {
        &self.blocks
    }

    pub fn encode(&self, encoder: &mut PacketEncoder) -> Result<()> {
        encoder.put_array_length(self.blocks.len())?;
        for (topic, partitions) in &self.blocks {
            encoder.put(topic)?;
            encoder.put_array_length(partitions.len())?;
            for (partition, block) in partitions {
                encoder.put(partition)?;
                encoder.put(&(block.err as i16))?;
                encoder.put(&block.offset)?;
                if self.version >= 2 {
                    encoder.put(&block.timestamp.unwrap_or(-1))?;
                }
            }
        }
        if self.version >= 1 {
            encoder.put(&self.throttle_time_ms)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut encoder = PacketEncoder::new();
        self.encode(&mut encoder)?;
        encoder.finish()
    }

    pub fn decode(bytes: Bytes, version: i16) -> Result<Self> {
        if !(0..=MAX_PRODUCE_VERSION).contains(&version) {
            return Err(Error::Decode(format!(
                "unsupported produce response version {}",
                version
            )));
        }
        parse_all(bytes, |s| parse_produce_response(s, version))
    }
}

pub fn parse_produce_response(s: NomBytes, version: i16) -> IResult<NomBytes, ProduceResponse> {
    let (s, topics) = if version >= 2 {
        parse_array(parse_topic_v2)(s)?
    } else {
        parse_array(parse_topic_v0)(s)?
    };
    let (s, throttle_time_ms) = if version >= 1 { be_i32(s)? } else { (s, 0) };

    let mut response = ProduceResponse::new(version);
    response.throttle_time_ms = throttle_time_ms;
    for (topic, partitions) in topics {
        for (partition, block) in partitions {
            response.add_block(&topic, partition, block);
        }
    }
    Ok((s, response))
}

type TopicBlocks = (String, Vec<(i32, ProduceResponseBlock)>);

fn parse_topic_v0(s: NomBytes) -> IResult<NomBytes, TopicBlocks> {
    let (s, name) = parse_string(s)?;
    let (s, partitions) = parse_array(parse_block_v0)(s)?;
    Ok((s, (bytes_to_string(&name)?, partitions)))
}

fn parse_topic_v2(s: NomBytes) -> IResult<NomBytes, TopicBlocks> {
    let (s, name) = parse_string(s)?;
    let (s, partitions) = parse_array(parse_block_v2)(s)?;
    Ok((s, (bytes_to_string(&name)?, partitions)))
}

fn parse_block_v0(s: NomBytes) -> IResult<NomBytes, (i32, ProduceResponseBlock)> {
    let (s, partition) = be_i32(s)?;
    let (s, err) = be_i16(s)?;
    let (s, offset) = be_i64(s)?;
    Ok((
        s,
        (
            partition,
            ProduceResponseBlock {
                err: KafkaCode::from_wire(err),
                offset,
                timestamp: None,
            },
        ),
    ))
}

fn parse_block_v2(s: NomBytes) -> IResult<NomBytes, (i32, ProduceResponseBlock)> {
    let (s, (partition, mut block)) = parse_block_v0(s)?;
    let (s, timestamp) = be_i64(s)?;
    block.timestamp = (timestamp != -1).then_some(timestamp);
    Ok((s, (partition, block)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(version: i16) -> ProduceResponse {
        let mut response = ProduceResponse::new(version);
        response.add_block("orders", 0, ProduceResponseBlock::success(42));
        response.add_block("orders", 3, ProduceResponseBlock::error(KafkaCode::NotLeaderForPartition));
        if version >= 1 {
            response.throttle_time_ms = 100;
        }
        response
    }

    #[test]
    fn test_response_roundtrip_per_version() {
        for version in 0..=MAX_PRODUCE_VERSION {
            let response = sample(version);
            let decoded = ProduceResponse::decode(response.to_bytes().unwrap(), version).unwrap();
            assert_eq!(decoded, response, "version {}", version);
        }
    }

    #[test]
    fn test_v2_timestamp() {
        let mut response = ProduceResponse::new(2);
        response.add_block(
            "t",
            1,
            ProduceResponseBlock {
                err: KafkaCode::None,
                offset: 7,
                timestamp: Some(1_000),
            },
        );
        let decoded = ProduceResponse::decode(response.to_bytes().unwrap(), 2).unwrap();
        assert_eq!(decoded.block("t", 1).and_then(|b| b.timestamp), Some(1_000));
    }

    #[test]
    fn test_v0_has_no_throttle_time() {
        let bytes = sample(0).to_bytes().unwrap();
        let v1_bytes = sample(1).to_bytes().unwrap();
        assert_eq!(bytes.len() + 4, v1_bytes.len());
    }

    #[test]
    fn test_unknown_error_code_maps_to_unknown() {
        let mut data = Vec::new();
        data.extend_from_slice(&1i32.to_be_bytes());
        data.extend_from_slice(&1i16.to_be_bytes());
        data.push(b't');
        data.extend_from_slice(&1i32.to_be_bytes());
        data.extend_from_slice(&0i32.to_be_bytes());
        data.extend_from_slice(&999i16.to_be_bytes());
        data.extend_from_slice(&0i64.to_be_bytes());
        let decoded = ProduceResponse::decode(Bytes::from(data), 0).unwrap();
        assert_eq!(decoded.block("t", 0).map(|b| b.err), Some(KafkaCode::Unknown));
    }

    #[test]
    fn test_truncated_response_is_decode_error() {
        let bytes = sample(1).to_bytes().unwrap();
        let cut = bytes.slice(..bytes.len() - 6);
        assert!(matches!(ProduceResponse::decode(cut, 1), Err(Error::Decode(_))));
    }
}
