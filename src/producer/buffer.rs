//! Per-partition pending message queue.
//!
//! A circular array holds every message of one (topic, partition) from the
//! moment it is accepted until it resolves. The first `cursor` entries from
//! the head have been drafted into the in-flight request; the rest are
//! waiting. Entries only leave from the head, so resolution is always in
//! submission order.
//!
//! ```text
//!            head          head+cursor        tail
//!             v                 v               v
//! [ .. .. .. [drafted drafted][pending pending] .. .. ]
//! ```
//!
//! The backing array doubles when full and is compacted to half its size
//! once occupancy falls to a quarter, never below the configured minimum.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::ProducerConfig;
use crate::constants::MESSAGE_MAGIC_V1;
use crate::error::{Error, KafkaCode, Result};
use crate::message::Message;
use crate::producer::{ProducerError, ProducerMessage};

/// A buffered message, its wire form and its failed attempts so far.
#[derive(Debug)]
pub struct PendingEntry {
    msg: ProducerMessage,
    wire: Message,
    retries: u32,
}

impl PendingEntry {
    pub fn producer_message(&self) -> &ProducerMessage {
        &self.msg
    }

    pub fn message(&self) -> &Message {
        &self.wire
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    fn into_resolved(self) -> ProducerMessage {
        let mut msg = self.msg;
        msg.retries = self.retries;
        msg
    }
}

/// Single-owner queue for one partition. Not shared between tasks.
#[derive(Debug)]
pub struct PartitionBuffer {
    topic: String,
    partition: i32,
    entries: Vec<Option<PendingEntry>>,
    head: usize,
    tail: usize,
    count: usize,
    cursor: usize,

    max_buffered: usize,
    min_len: usize,
    retry_max: u32,
    return_successes: bool,
    max_message_bytes: usize,
    message_version: i8,

    successes: mpsc::Sender<ProducerMessage>,
    errors: mpsc::Sender<ProducerError>,
}

impl PartitionBuffer {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        config: &ProducerConfig,
        successes: mpsc::Sender<ProducerMessage>,
        errors: mpsc::Sender<ProducerError>,
    ) -> Self {
        let min_len = config.min_queue_len.max(1);
        Self {
            topic: topic.into(),
            partition,
            entries: empty_slots(min_len),
            head: 0,
            tail: 0,
            count: 0,
            cursor: 0,
            max_buffered: config.max_buffered,
            min_len,
            retry_max: config.retry_max,
            return_successes: config.return_successes,
            max_message_bytes: config.max_message_bytes,
            message_version: config.message_version(),
            successes,
            errors,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Live entries.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Size of the backing array.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Entries drafted into the in-flight request.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The partition must stop accepting input until an entry resolves.
    pub fn full(&self) -> bool {
        self.count >= self.max_buffered
    }

    /// Encode `msg` and append it at the tail.
    ///
    /// A message whose key or value cannot be encoded, or whose payload
    /// exceeds `max_message_bytes`, is resolved on the error channel instead.
    pub async fn add(&mut self, msg: ProducerMessage) {
        debug_assert!(!self.full(), "add called on a full partition buffer");

        let wire = match self.encode(&msg) {
            Ok(wire) => wire,
            Err(err) => {
                warn!(
                    topic = %self.topic,
                    partition = self.partition,
                    error = %err,
                    "Rejecting message before buffering"
                );
                self.reject(msg, err).await;
                return;
            }
        };

        if self.count == self.entries.len() {
            self.resize(self.count * 2);
        }

        self.entries[self.tail] = Some(PendingEntry {
            msg,
            wire,
            retries: 0,
        });
        self.tail = (self.tail + 1) % self.entries.len();
        self.count += 1;
    }

    /// Whether undrafted entries remain.
    pub fn has_next(&self) -> bool {
        self.cursor < self.count
    }

    /// Draft the next undrafted entry. The entry stays buffered.
    pub fn next(&mut self) -> Option<&PendingEntry> {
        if !self.has_next() {
            return None;
        }
        let slot = self.slot(self.cursor);
        self.cursor += 1;
        self.entries[slot].as_ref()
    }

    /// Treat every entry as undrafted again, so failed survivors are redrafted.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Resolve the oldest `n` entries as acknowledged.
    pub async fn mark_success(&mut self, n: usize) {
        self.succeed(n, None).await;
    }

    /// Like [`PartitionBuffer::mark_success`], numbering offsets from `base_offset`.
    pub async fn mark_success_with_offset(&mut self, n: usize, base_offset: i64) {
        self.succeed(n, Some(base_offset)).await;
    }

    /// Count a failed attempt against the oldest `n` entries.
    ///
    /// The leading run of entries that have exhausted `retry_max` attempts
    /// is resolved with `err`; the others stay at the head for redrafting.
    pub async fn mark_failure(&mut self, n: usize, err: Error) {
        let n = n.min(self.count);
        for i in 0..n {
            let slot = self.slot(i);
            if let Some(entry) = self.entries[slot].as_mut() {
                entry.retries += 1;
            }
        }

        let mut abandoned = 0;
        while abandoned < n && self.head_retries() >= Some(self.retry_max) {
            if let Some(entry) = self.pop_front() {
                warn!(
                    topic = %self.topic,
                    partition = self.partition,
                    retries = entry.retries,
                    error = %err,
                    "Abandoning message after exhausting retries"
                );
                self.deliver_error(entry.into_resolved(), err.clone()).await;
            }
            abandoned += 1;
        }

        self.cursor = self.cursor.saturating_sub(abandoned);
        self.maybe_shrink();
    }

    /// Resolve the oldest `n` entries with `err` regardless of their retries.
    pub async fn mark_immediate_failure(&mut self, n: usize, err: Error) {
        let n = n.min(self.count);
        for _ in 0..n {
            if let Some(entry) = self.pop_front() {
                self.deliver_error(entry.into_resolved(), err.clone()).await;
            }
        }
        self.cursor = self.cursor.saturating_sub(n);
        self.maybe_shrink();
    }

    /// Resolve a message that never entered the buffer.
    pub async fn reject(&self, msg: ProducerMessage, err: Error) {
        self.deliver_error(msg, err).await;
    }

    async fn succeed(&mut self, n: usize, base_offset: Option<i64>) {
        let n = n.min(self.count);
        for i in 0..n {
            let Some(entry) = self.pop_front() else {
                continue;
            };
            if !self.return_successes {
                continue;
            }
            let mut msg = entry.into_resolved();
            if let Some(base) = base_offset {
                msg.offset = base + i as i64;
            }
            msg.clear();
            if self.successes.send(msg).await.is_err() {
                debug!(topic = %self.topic, partition = self.partition, "Success receiver dropped");
            }
        }
        self.cursor = self.cursor.saturating_sub(n);
        self.maybe_shrink();
    }

    fn encode(&self, msg: &ProducerMessage) -> Result<Message> {
        if msg.byte_size() > self.max_message_bytes {
            return Err(Error::Broker(KafkaCode::MessageSizeTooLarge));
        }

        let key = msg.key.as_ref().map(|k| k.encode()).transpose()?;
        let value = msg.value.as_ref().map(|v| v.encode()).transpose()?;

        Ok(if self.message_version >= MESSAGE_MAGIC_V1 {
            Message::with_timestamp(key, value, msg.timestamp.unwrap_or_else(now_millis))
        } else {
            Message::new(key, value)
        })
    }

    async fn deliver_error(&self, msg: ProducerMessage, err: Error) {
        if self.errors.send(ProducerError { msg, err }).await.is_err() {
            debug!(topic = %self.topic, partition = self.partition, "Error receiver dropped");
        }
    }

    fn slot(&self, i: usize) -> usize {
        (self.head + i) % self.entries.len()
    }

    fn head_retries(&self) -> Option<u32> {
        if self.count == 0 {
            return None;
        }
        self.entries[self.head].as_ref().map(PendingEntry::retries)
    }

    fn pop_front(&mut self) -> Option<PendingEntry> {
        if self.count == 0 {
            return None;
        }
        let entry = self.entries[self.head].take();
        self.head = (self.head + 1) % self.entries.len();
        self.count -= 1;
        entry
    }

    fn maybe_shrink(&mut self) {
        if self.entries.len() > self.min_len && self.count * 4 <= self.entries.len() {
            self.resize(self.count * 2);
        }
    }

    /// Copy the live span into a fresh array of `target` slots (at least the
    /// minimum length), starting at index 0.
    fn resize(&mut self, target: usize) {
        let len = target.max(self.min_len);
        let old_len = self.entries.len();
        let mut fresh = empty_slots(len);

        if self.count > 0 {
            if self.head < self.tail {
                move_run(&mut self.entries[self.head..self.tail], &mut fresh[..self.count]);
            } else {
                let first = old_len - self.head;
                move_run(&mut self.entries[self.head..], &mut fresh[..first]);
                move_run(&mut self.entries[..self.tail], &mut fresh[first..self.count]);
            }
        }

        trace!(
            topic = %self.topic,
            partition = self.partition,
            from = old_len,
            to = len,
            count = self.count,
            "Resized partition buffer"
        );

        self.entries = fresh;
        self.head = 0;
        self.tail = self.count % len;
    }
}

fn empty_slots(len: usize) -> Vec<Option<PendingEntry>> {
    std::iter::repeat_with(|| None).take(len).collect()
}

fn move_run(from: &mut [Option<PendingEntry>], to: &mut [Option<PendingEntry>]) {
    for (src, dst) in from.iter_mut().zip(to.iter_mut()) {
        *dst = src.take();
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(-1, |d| d.as_millis() as i64)
}
