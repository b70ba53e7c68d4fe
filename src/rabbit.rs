//! RabbitMQ implementation of the `Queue` trait.

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::queue::{AckHandle, Connector, Delivery, Message, Queue};
use crate::trail::{Trail, TRAIL_EXCHANGE};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
        ExchangeDeclareOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const TRAIL_ID_HEADER: &str = "x-trail-id";
const TRAIL_LIVE_HEADER: &str = "x-trail-live";
const REPLY_SUCCESS: u16 = 200;

/// Connects a `RabbitQueue` from the worker configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct RabbitConnector;

#[async_trait]
impl Connector for RabbitConnector {
    async fn connect(&self, config: &WorkerConfig) -> Result<Arc<dyn Queue>, WorkerError> {
        Ok(Arc::new(RabbitQueue::connect(config).await?))
    }
}

/// A queue consumed over one AMQP channel.
pub struct RabbitQueue {
    connection: Connection,
    channel: Channel,
    consumer: Mutex<Consumer>,
    get_timeout: Duration,
}

impl RabbitQueue {
    /// Connects to the broker, declares the source and garbage queues (and the
    /// trail exchange when tracing is on), and starts consuming.
    pub async fn connect(config: &WorkerConfig) -> Result<Self, WorkerError> {
        log::info!(
            "Connecting to RabbitMQ and setting up queue '{}'...",
            config.queue_name
        );

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        Self::setup_infrastructure(&channel, config).await?;

        channel.basic_qos(config.prefetch_count, BasicQosOptions::default()).await?;
        log::info!("QoS prefetch count set to {}", config.prefetch_count);

        let consumer = channel
            .basic_consume(
                &config.queue_name,
                &config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        log::info!(
            "Consumer started with tag '{}'. Waiting for messages...",
            consumer.tag().as_str()
        );

        Ok(Self {
            connection,
            channel,
            consumer: Mutex::new(consumer),
            get_timeout: config.get_timeout,
        })
    }

    /// Declares the source queue, its garbage queue and, if tracing is enabled,
    /// the trail exchange.
    async fn setup_infrastructure(channel: &Channel, config: &WorkerConfig) -> Result<(), WorkerError> {
        let garbage_queue = config.garbage_queue_name();
        for queue in [config.queue_name.as_str(), garbage_queue.as_str()] {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions { durable: true, ..Default::default() },
                    FieldTable::default(),
                )
                .await?;
        }

        if config.tracing_enabled {
            channel
                .exchange_declare(
                    TRAIL_EXCHANGE,
                    ExchangeKind::Topic,
                    ExchangeDeclareOptions { durable: true, ..Default::default() },
                    FieldTable::default(),
                )
                .await?;
        }

        log::info!(
            "Queues '{}' and '{}' are set up.",
            config.queue_name,
            garbage_queue
        );
        Ok(())
    }
}

#[async_trait]
impl Queue for RabbitQueue {
    async fn get(&self) -> Result<Option<Delivery>, WorkerError> {
        let mut consumer = self.consumer.lock().await;
        let delivery = match tokio::time::timeout(self.get_timeout, consumer.next()).await {
            Err(_elapsed) => return Ok(None),
            Ok(None) => return Err(WorkerError::from("consumer stream ended")),
            Ok(Some(delivery)) => delivery?,
        };

        let ack = AckHandle(delivery.delivery_tag);
        let mut received = Delivery::new(decode_body(&delivery.data), ack);
        received.trail = trail_from_properties(&delivery.properties);
        log::debug!("Received message. Tag: {}", delivery.delivery_tag);
        Ok(Some(received))
    }

    async fn put(
        &self,
        message: &Message,
        routing_key: &str,
        exchange: &str,
        trail: Option<&Trail>,
    ) -> Result<(), WorkerError> {
        let payload = serde_json::to_vec(message)?;
        let mut properties = BasicProperties::default().with_content_type("application/json".into());
        if let Some(trail) = trail {
            properties = properties.with_headers(trail_headers(trail));
        }

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?;

        Ok(())
    }

    async fn ack(&self, ack: AckHandle) -> Result<(), WorkerError> {
        self.channel.basic_ack(ack.0, BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn reject(&self, ack: AckHandle) -> Result<(), WorkerError> {
        self.channel
            .basic_nack(ack.0, BasicNackOptions { requeue: true, ..Default::default() })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), WorkerError> {
        if self.channel.status().connected() {
            self.channel.close(REPLY_SUCCESS, "worker restarting").await?;
        }
        if self.connection.status().connected() {
            self.connection.close(REPLY_SUCCESS, "worker restarting").await?;
        }
        Ok(())
    }
}

/// Decodes a JSON body. Undecodable bodies come back as a JSON string of
/// their (lossy) text, which default validation rejects.
fn decode_body(data: &[u8]) -> Message {
    match serde_json::from_slice(data) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("Message body is not valid JSON: {}", e);
            Message::String(String::from_utf8_lossy(data).into_owned())
        }
    }
}

/// Creates the AMQP headers carrying a trail.
fn trail_headers(trail: &Trail) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(TRAIL_ID_HEADER.into(), AMQPValue::LongString(trail.id.clone().into()));
    headers.insert(TRAIL_LIVE_HEADER.into(), AMQPValue::Boolean(trail.live));
    headers
}

/// Extracts the trail from message headers, if the publisher attached one.
fn trail_from_properties(properties: &BasicProperties) -> Option<Trail> {
    let headers = properties.headers().as_ref()?;

    let id = headers
        .inner()
        .get(TRAIL_ID_HEADER)
        .and_then(|v| v.as_long_string())
        .map(|s| s.to_string())
        .filter(|id| !id.is_empty())?;

    let live = matches!(headers.inner().get(TRAIL_LIVE_HEADER), Some(AMQPValue::Boolean(true)));

    Some(Trail { id, live })
}
