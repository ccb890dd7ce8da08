//! NATS JetStream event bus
//!
//! One stream carries every event; each message is published on a subject
//! derived from its ordering key, which gives per-key delivery order.
//! Consumer groups are durable pull consumers drained by a background task
//! per subscription.

use crate::{BusMessage, EventBus, EventBusError, EventBusResult};
use async_nats::jetstream::{self, consumer::pull, Context};
use async_nats::HeaderMap;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const ACK_TIMEOUT: Duration = Duration::from_secs(5);
const EVENT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Event bus backed by a NATS JetStream stream
pub struct NatsEventBus {
    jetstream: Context,
    stream_name: String,
    subject_prefix: String,
}

impl NatsEventBus {
    /// Connect and ensure the stream exists with the expected subject space.
    pub async fn connect(url: &str, stream_name: &str) -> EventBusResult<Self> {
        info!("🔄 Connecting to event bus at {}", url);
        let client = timeout(CONNECT_TIMEOUT, async_nats::connect(url))
            .await
            .map_err(|_| EventBusError::unavailable("nats connect timed out"))?
            .map_err(|e| EventBusError::unavailable(format!("nats connect failed: {e}")))?;
        let jetstream = jetstream::new(client);
        info!("✅ Connected to event bus");

        let subject_prefix = format!("{stream_name}.events");
        let stream_config = jetstream::stream::Config {
            name: stream_name.to_string(),
            subjects: vec![format!("{subject_prefix}.>")],
            max_age: EVENT_RETENTION,
            ..Default::default()
        };

        match jetstream.get_stream(stream_name).await {
            Ok(_) => {
                debug!("Event stream {} already exists", stream_name);
            }
            Err(_) => match jetstream.create_stream(stream_config).await {
                Ok(_) => info!("✅ Created event stream {}", stream_name),
                Err(e) => {
                    error!("❌ Failed to create event stream {}: {}", stream_name, e);
                    return Err(EventBusError::unavailable(format!(
                        "stream creation failed: {e}"
                    )));
                }
            },
        }

        Ok(Self {
            jetstream,
            stream_name: stream_name.to_string(),
            subject_prefix,
        })
    }

    fn subject_for(&self, key: &str) -> String {
        // Subject tokens must not contain separators or wildcards.
        let sanitized: String = key
            .chars()
            .map(|c| match c {
                '.' | '*' | '>' | ' ' => '_',
                other => other,
            })
            .collect();
        format!("{}.{}", self.subject_prefix, sanitized)
    }

}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish(
        &self,
        key: &str,
        headers: &[(&str, &str)],
        payload: &[u8],
    ) -> EventBusResult<()> {
        let subject = self.subject_for(key);
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            header_map.insert(*name, *value);
        }

        let ack = self
            .jetstream
            .publish_with_headers(subject.clone(), header_map, payload.to_vec().into())
            .await
            .map_err(|e| EventBusError::unavailable(format!("publish failed: {e}")))?;

        match timeout(ACK_TIMEOUT, ack).await {
            Ok(Ok(_)) => {
                debug!("📤 Published event on {}", subject);
                Ok(())
            }
            Ok(Err(e)) => Err(EventBusError::unavailable(format!("publish ack failed: {e}"))),
            Err(_) => Err(EventBusError::unavailable("timed out waiting for publish ack")),
        }
    }

    async fn subscribe(&self, group: &str) -> EventBusResult<mpsc::UnboundedReceiver<BusMessage>> {
        let stream = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| EventBusError::consumer(group, format!("stream lookup failed: {e}")))?;

        let consumer = stream
            .get_or_create_consumer(
                group,
                pull::Config {
                    durable_name: Some(group.to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| EventBusError::consumer(group, format!("consumer setup failed: {e}")))?;

        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| EventBusError::consumer(group, format!("message stream failed: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let group = group.to_string();
        let subject_prefix = self.subject_prefix.clone();
        tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Consumer group {} read failed: {}", group, e);
                        continue;
                    }
                };

                let mut headers = HashMap::new();
                if let Some(header_map) = &message.headers {
                    for (name, values) in header_map.iter() {
                        if let Some(value) = values.first() {
                            headers.insert(name.to_string(), value.as_str().to_string());
                        }
                    }
                }

                let subject = message.subject.as_str();
                let key = subject
                    .strip_prefix(subject_prefix.as_str())
                    .and_then(|rest| rest.strip_prefix('.'))
                    .unwrap_or(subject)
                    .to_string();

                let bus_message = BusMessage {
                    key,
                    headers,
                    payload: message.payload.to_vec(),
                };

                if tx.send(bus_message).is_err() {
                    debug!("Consumer group {} receiver dropped", group);
                    return;
                }
                if let Err(e) = message.ack().await {
                    warn!("Consumer group {} ack failed: {}", group, e);
                }
            }
            warn!("Consumer group {} stream ended", group);
        });

        Ok(rx)
    }
}
