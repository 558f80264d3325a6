//! Public producer handle and the dispatcher task behind it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ProducerConfig;
use crate::error::{Error, Result};
use crate::metrics::MetricsSink;
use crate::producer::partition::PartitionWorker;
use crate::producer::{BrokerConnection, PartitionBuffer, ProducerError, ProducerMessage};

/// Handle to a running producer.
///
/// Must be created inside a Tokio runtime. Send messages with
/// [`AsyncProducer::send`] and read their resolution from
/// [`AsyncProducer::successes`] (when `return_successes` is set) and
/// [`AsyncProducer::errors`]. Both result channels are bounded: a consumer
/// that stops reading eventually stalls the partitions that deliver to it.
pub struct AsyncProducer {
    input: Option<mpsc::Sender<ProducerMessage>>,
    successes: mpsc::Receiver<ProducerMessage>,
    errors: mpsc::Receiver<ProducerError>,
    shutdown: broadcast::Sender<()>,
    aborted: Arc<AtomicBool>,
    dispatcher: Option<JoinHandle<()>>,
}

impl AsyncProducer {
    pub fn new(
        config: ProducerConfig,
        connection: Arc<dyn BrokerConnection>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| Error::Config(errors.join("; ")))?;

        let (input_tx, input_rx) = mpsc::channel(config.channel_buffer_size);
        let (success_tx, success_rx) = mpsc::channel(config.channel_buffer_size);
        let (error_tx, error_rx) = mpsc::channel(config.channel_buffer_size);
        let (shutdown_tx, _) = broadcast::channel(1);
        let aborted = Arc::new(AtomicBool::new(false));

        info!(
            client_id = %config.client_id,
            version = %config.version,
            acks = %config.required_acks,
            compression = %config.compression,
            "Starting producer"
        );

        let dispatcher = Dispatcher {
            input: input_rx,
            partitions: HashMap::new(),
            workers: Vec::new(),
            successes: success_tx,
            errors: error_tx,
            shutdown: shutdown_tx.clone(),
            aborted: aborted.clone(),
            connection,
            metrics,
            config: Arc::new(config),
        };

        Ok(Self {
            input: Some(input_tx),
            successes: success_rx,
            errors: error_rx,
            shutdown: shutdown_tx,
            aborted,
            dispatcher: Some(tokio::spawn(dispatcher.run())),
        })
    }

    /// Queue a message, waiting while the input channel is full.
    ///
    /// Fails with [`Error::ShuttingDown`] once the producer is closing.
    pub async fn send(&self, msg: ProducerMessage) -> std::result::Result<(), ProducerError> {
        let Some(input) = &self.input else {
            return Err(ProducerError {
                msg,
                err: Error::ShuttingDown,
            });
        };
        input.send(msg).await.map_err(|e| ProducerError {
            msg: e.0,
            err: Error::ShuttingDown,
        })
    }

    /// Acknowledged messages, with payloads cleared and offsets filled in.
    pub fn successes(&mut self) -> &mut mpsc::Receiver<ProducerMessage> {
        &mut self.successes
    }

    /// Messages that were abandoned, each paired with the error that ended it.
    pub fn errors(&mut self) -> &mut mpsc::Receiver<ProducerError> {
        &mut self.errors
    }

    /// Stop accepting messages. Buffered messages are still sent and retried;
    /// both result channels close once every partition has drained.
    pub fn async_close(&mut self) {
        if self.input.take().is_some() {
            info!("Closing producer");
        }
    }

    /// Close, drain both result channels and return the errors seen.
    pub async fn close(mut self) -> Vec<ProducerError> {
        self.async_close();

        let mut failed = Vec::new();
        let mut successes_open = true;
        let mut errors_open = true;
        while successes_open || errors_open {
            tokio::select! {
                msg = self.successes.recv(), if successes_open => {
                    successes_open = msg.is_some();
                }
                err = self.errors.recv(), if errors_open => match err {
                    Some(err) => failed.push(err),
                    None => errors_open = false,
                },
            }
        }

        if let Some(handle) = self.dispatcher.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Producer dispatcher task failed");
            }
        }
        failed
    }

    /// Stop without waiting for retries. In-flight requests complete; every
    /// message not yet resolved is failed with [`Error::ShuttingDown`].
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(());
        warn!("Producer abort requested");
    }
}

/// Routes input to one worker per (topic, partition), spawning them lazily.
struct Dispatcher {
    input: mpsc::Receiver<ProducerMessage>,
    partitions: HashMap<(String, i32), mpsc::Sender<ProducerMessage>>,
    workers: Vec<JoinHandle<()>>,
    successes: mpsc::Sender<ProducerMessage>,
    errors: mpsc::Sender<ProducerError>,
    shutdown: broadcast::Sender<()>,
    /// Set by [`AsyncProducer::abort`] before the shutdown broadcast.
    aborted: Arc<AtomicBool>,
    connection: Arc<dyn BrokerConnection>,
    metrics: Arc<dyn MetricsSink>,
    config: Arc<ProducerConfig>,
}

impl Dispatcher {
    async fn run(mut self) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                biased;
                signal = shutdown.recv() => {
                    if matches!(signal, Ok(()) | Err(broadcast::error::RecvError::Lagged(_))) {
                        self.reject_remaining().await;
                        break;
                    }
                }
                msg = self.input.recv() => match msg {
                    Some(msg) => self.route(msg).await,
                    None => break,
                },
            }
        }

        // closing the partition inputs lets each worker drain and exit
        self.partitions.clear();
        let workers = std::mem::take(&mut self.workers);
        drop(self);
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Partition worker task failed");
            }
        }
        debug!("Producer dispatcher finished");
    }

    async fn route(&mut self, msg: ProducerMessage) {
        let key = (msg.topic.clone(), msg.partition);
        let sender = match self.partitions.get(&key) {
            Some(sender) => sender.clone(),
            None => {
                // subscribe before reading the flag: an abort that lands
                // after the check is still delivered to the new worker
                let shutdown = self.shutdown.subscribe();
                if self.aborted.load(Ordering::SeqCst) {
                    self.fail(msg, Error::ShuttingDown).await;
                    return;
                }
                let sender = self.spawn_worker(&key.0, key.1, shutdown);
                self.partitions.insert(key, sender.clone());
                sender
            }
        };

        if let Err(e) = sender.send(msg).await {
            self.fail(e.0, Error::ShuttingDown).await;
        }
    }

    fn spawn_worker(
        &mut self,
        topic: &str,
        partition: i32,
        shutdown: broadcast::Receiver<()>,
    ) -> mpsc::Sender<ProducerMessage> {
        let (tx, rx) = mpsc::channel(self.config.channel_buffer_size);
        let buffer = PartitionBuffer::new(
            topic,
            partition,
            &self.config,
            self.successes.clone(),
            self.errors.clone(),
        );
        let worker = PartitionWorker::new(
            buffer,
            rx,
            shutdown,
            self.connection.clone(),
            self.metrics.clone(),
            self.config.clone(),
        );
        debug!(topic, partition, "Spawning partition worker");
        self.workers.push(tokio::spawn(worker.run()));
        tx
    }

    async fn reject_remaining(&mut self) {
        self.input.close();
        while let Some(msg) = self.input.recv().await {
            self.fail(msg, Error::ShuttingDown).await;
        }
    }

    async fn fail(&self, msg: ProducerMessage, err: Error) {
        if self.errors.send(ProducerError { msg, err }).await.is_err() {
            debug!("Error receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;
    use crate::produce::{ProduceRequest, ProduceResponse};
    use async_trait::async_trait;
    use bytes::Bytes;

    struct NoResponse;

    #[async_trait]
    impl BrokerConnection for NoResponse {
        async fn send(
            &self,
            _request: &ProduceRequest,
            _body: Bytes,
        ) -> Result<Option<ProduceResponse>> {
            Ok(None)
        }
    }

    fn dispatcher(aborted: bool) -> (Dispatcher, mpsc::Receiver<ProducerError>) {
        let (_input_tx, input_rx) = mpsc::channel(4);
        let (success_tx, _success_rx) = mpsc::channel(4);
        let (error_tx, error_rx) = mpsc::channel(4);
        let (shutdown_tx, _) = broadcast::channel(1);
        let dispatcher = Dispatcher {
            input: input_rx,
            partitions: HashMap::new(),
            workers: Vec::new(),
            successes: success_tx,
            errors: error_tx,
            shutdown: shutdown_tx,
            aborted: Arc::new(AtomicBool::new(aborted)),
            connection: Arc::new(NoResponse),
            metrics: Arc::new(NoopMetrics),
            config: Arc::new(ProducerConfig::default()),
        };
        (dispatcher, error_rx)
    }

    #[tokio::test]
    async fn test_no_worker_spawned_after_abort() {
        // the flag is set but the broadcast was sent before anyone subscribed
        let (mut dispatcher, mut errors) = dispatcher(true);

        dispatcher.route(ProducerMessage::new("late", 4)).await;

        assert!(dispatcher.workers.is_empty());
        assert!(dispatcher.partitions.is_empty());
        let failed = errors.recv().await.unwrap();
        assert_eq!(failed.err, Error::ShuttingDown);
        assert_eq!(failed.msg.topic, "late");
    }

    #[tokio::test]
    async fn test_worker_spawned_while_running() {
        let (mut dispatcher, mut errors) = dispatcher(false);

        dispatcher.route(ProducerMessage::new("live", 0)).await;

        assert_eq!(dispatcher.workers.len(), 1);
        assert!(dispatcher.partitions.contains_key(&("live".to_string(), 0)));
        assert!(errors.try_recv().is_err());
    }
}
