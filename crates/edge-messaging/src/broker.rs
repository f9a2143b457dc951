//! Kafka broker client: one producer for outbound publishes, one consumer
//! per subscribed topic for inbound reads.
//!
//! Connectivity is tracked reactively rather than through a separate probe:
//! a publish failure flips `connected` false, a publish success flips it
//! back true. The outbox drainer consults this flag before attempting a
//! drain tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::error::KafkaError;
use tokio::sync::watch;
use tracing::{debug, warn};

use edge_types::RetryBackoff;

const PRODUCE_TIMEOUT: Duration = Duration::from_secs(10);
const READER_BACKOFF_BASE: Duration = Duration::from_millis(500);
const READER_BACKOFF_CAP: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub brokers: String,
    pub group_id: String,
    pub station_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("producer config error: {0}")]
    Config(String),
}

pub struct BrokerClient {
    producer: FutureProducer,
    config: BrokerConfig,
    connected: AtomicBool,
}

impl BrokerClient {
    pub fn new(config: BrokerConfig) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "10000")
            .create()
            .map_err(|e| BrokerError::Config(e.to_string()))?;
        Ok(Self {
            producer,
            config,
            connected: AtomicBool::new(true),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Publish one message, keyed by the station id so per-station ordering
    /// is preserved by the partitioner.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let key = self.config.station_id.clone();
        let record = FutureRecord::to(topic).key(&key).payload(payload);
        match self.producer.send(record, PRODUCE_TIMEOUT).await {
            Ok(_) => {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err((err, _)) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(BrokerError::Kafka(err))
            }
        }
    }

    /// Subscribe to `topic`, calling `handler` with each message's payload
    /// bytes until `shutdown` fires. Reconnects the consumer on read error
    /// with capped-exponential backoff; the backoff sleep is interruptible.
    pub async fn run_reader<F>(&self, topic: &str, mut shutdown: watch::Receiver<bool>, mut handler: F)
    where
        F: FnMut(&[u8]),
    {
        let backoff = RetryBackoff::new(READER_BACKOFF_BASE, READER_BACKOFF_CAP);
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return;
            }
            let consumer: StreamConsumer = match ClientConfig::new()
                .set("bootstrap.servers", &self.config.brokers)
                .set("group.id", &self.config.group_id)
                .set("enable.auto.commit", "true")
                .set("auto.offset.reset", "latest")
                .create()
            {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, topic, "broker reader could not build consumer");
                    if self.sleep_or_shutdown(&backoff, &mut attempt, &mut shutdown).await {
                        return;
                    }
                    continue;
                }
            };
            if let Err(e) = consumer.subscribe(&[topic]) {
                warn!(error = %e, topic, "broker reader subscribe failed");
                if self.sleep_or_shutdown(&backoff, &mut attempt, &mut shutdown).await {
                    return;
                }
                continue;
            }

            attempt = 0;
            loop {
                tokio::select! {
                    msg = consumer.recv() => {
                        match msg {
                            Ok(borrowed) => {
                                if let Some(payload) = borrowed.payload() {
                                    handler(payload);
                                } else {
                                    debug!(topic, "broker message with empty payload, skipping");
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, topic, "broker read error, reconnecting");
                                break;
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }

            if self.sleep_or_shutdown(&backoff, &mut attempt, &mut shutdown).await {
                return;
            }
        }
    }

    /// Returns true if shutdown fired during the sleep.
    async fn sleep_or_shutdown(
        &self,
        backoff: &RetryBackoff,
        attempt: &mut u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let delay = backoff.delay(*attempt);
        *attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = shutdown.changed() => *shutdown.borrow(),
        }
    }
}
