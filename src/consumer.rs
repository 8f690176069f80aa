//! Durable consumption with explicit acknowledgment.
//!
//! Each subscription runs its own delivery task: waiting for the next
//! message or an acknowledgment round-trip suspends only that task, never
//! other subscriptions or publishes. Messages on one subject reach a
//! given durable in publish order because the task processes them
//! sequentially.

use crate::error::{ClientError, Result};
use crate::message::Delivery;
use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::{AckPolicy, Consumer, DeliverPolicy};
use async_nats::jetstream::{self, Context};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handler-reported processing failure. The message is left
/// unacknowledged and redelivered after the broker ack-wait.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// Per-message processing callback.
///
/// Success acknowledges the message; failure leaves it redeliverable.
/// Handlers must be idempotent with respect to redelivery: a message may
/// arrive again whenever an acknowledgment was lost.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: Delivery) -> std::result::Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, delivery: Delivery) -> std::result::Result<(), HandlerError> {
        (self)(delivery).await
    }
}

/// Acknowledgment mode of a durable subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Every message must be acknowledged explicitly.
    Explicit,
    /// Delivery alone consumes the message.
    None,
}

impl AckMode {
    fn to_policy(self) -> AckPolicy {
        match self {
            AckMode::Explicit => AckPolicy::Explicit,
            AckMode::None => AckPolicy::None,
        }
    }
}

/// Tuning knobs for durable consumers.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Acknowledgment mode.
    pub ack_mode: AckMode,

    /// How long the broker waits for an ack before redelivering.
    pub ack_wait: Duration,

    /// Delivery attempt cap per message; `-1` is unlimited.
    pub max_deliver: i64,

    /// Bound on unacknowledged in-flight messages (the prefetch window).
    pub max_ack_pending: i64,

    /// Ack confirmation attempts before surfacing a delivery fault.
    pub ack_retries: u32,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            ack_mode: AckMode::Explicit,
            ack_wait: Duration::from_secs(30),
            max_deliver: -1,
            max_ack_pending: 256,
            ack_retries: 3,
        }
    }
}

/// Binds durable subscriptions to one stream.
pub struct DurableConsumer {
    jetstream: Arc<Context>,
    stream_name: String,
    settings: ConsumerSettings,
}

impl DurableConsumer {
    pub fn new(jetstream: Arc<Context>, stream_name: impl Into<String>) -> Self {
        Self {
            jetstream,
            stream_name: stream_name.into(),
            settings: ConsumerSettings::default(),
        }
    }

    /// Override the default consumer settings.
    pub fn with_settings(mut self, settings: ConsumerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Stream this consumer binds to.
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Subscribe `handler` to `pattern` under `durable_name`.
    ///
    /// The durable name identifies consumption progress on the broker:
    /// reusing it resumes from the last acknowledged position instead of
    /// restarting. Delivery runs on its own task until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    pub async fn subscribe<H>(
        &self,
        pattern: &str,
        durable_name: &str,
        handler: H,
    ) -> Result<Subscription>
    where
        H: MessageHandler,
    {
        let consumer = self.ensure_consumer(pattern, durable_name).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (faults_tx, faults_rx) = watch::channel(None);

        let settings = self.settings.clone();
        let durable = durable_name.to_string();
        let task = tokio::spawn(deliver(
            consumer,
            handler,
            settings,
            durable,
            shutdown_rx,
            faults_tx,
        ));

        tracing::info!(
            stream = %self.stream_name,
            durable = %durable_name,
            pattern = %pattern,
            "durable subscription started"
        );

        Ok(Subscription {
            pattern: pattern.to_string(),
            durable_name: durable_name.to_string(),
            shutdown: shutdown_tx,
            faults: faults_rx,
            task,
        })
    }

    /// Get or create the durable consumer on the bound stream.
    async fn ensure_consumer(
        &self,
        pattern: &str,
        durable_name: &str,
    ) -> Result<Consumer<PullConfig>> {
        let stream = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .map_err(|error| {
                ClientError::Broker(format!(
                    "stream '{}' not found: {error}",
                    self.stream_name
                ))
            })?;

        match stream.get_consumer::<PullConfig>(durable_name).await {
            Ok(consumer) => {
                tracing::debug!(
                    durable = %durable_name,
                    "durable consumer already exists, resuming"
                );
                Ok(consumer)
            }
            Err(_) => {
                tracing::debug!(
                    stream = %self.stream_name,
                    durable = %durable_name,
                    pattern = %pattern,
                    "creating durable consumer"
                );

                stream
                    .create_consumer(PullConfig {
                        durable_name: Some(durable_name.to_string()),
                        name: Some(durable_name.to_string()),
                        filter_subject: pattern.to_string(),
                        ack_policy: self.settings.ack_mode.to_policy(),
                        ack_wait: self.settings.ack_wait,
                        max_deliver: self.settings.max_deliver,
                        max_ack_pending: self.settings.max_ack_pending,
                        deliver_policy: DeliverPolicy::All,
                        ..Default::default()
                    })
                    .await
                    .map_err(ClientError::broker)
            }
        }
    }
}

/// Handle to a running durable subscription.
///
/// Unsubscribing stops delivery but keeps the durable's server-side
/// progress; a later subscribe with the same durable name resumes from
/// the last acknowledged position.
pub struct Subscription {
    pattern: String,
    durable_name: String,
    shutdown: watch::Sender<bool>,
    faults: watch::Receiver<Option<ClientError>>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn durable_name(&self) -> &str {
        &self.durable_name
    }

    /// Observe delivery faults (ack confirmation exhausted, stream
    /// errors). Faults do not stop delivery.
    pub fn faults(&self) -> watch::Receiver<Option<ClientError>> {
        self.faults.clone()
    }

    /// Most recent delivery fault, if any.
    pub fn last_fault(&self) -> Option<ClientError> {
        self.faults.borrow().clone()
    }

    /// Stop delivery promptly. A handler invocation that already started
    /// runs to completion; nothing is acknowledged on its behalf.
    pub async fn unsubscribe(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|error| ClientError::Delivery(format!("delivery task failed: {error}")))
    }
}

async fn deliver<H>(
    consumer: Consumer<PullConfig>,
    handler: H,
    settings: ConsumerSettings,
    durable_name: String,
    mut shutdown: watch::Receiver<bool>,
    faults: watch::Sender<Option<ClientError>>,
) where
    H: MessageHandler,
{
    let mut messages = match consumer.messages().await {
        Ok(messages) => messages,
        Err(error) => {
            faults.send_replace(Some(ClientError::Broker(format!(
                "failed to open message stream: {error}"
            ))));
            return;
        }
    };

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            next = messages.next() => {
                match next {
                    Some(Ok(message)) => {
                        process(&message, &handler, &settings, &durable_name, &faults).await;
                    }
                    Some(Err(error)) => {
                        tracing::warn!(durable = %durable_name, %error, "error receiving message");
                    }
                    None => {
                        tracing::debug!(durable = %durable_name, "message stream ended");
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!(durable = %durable_name, "delivery stopped");
}

async fn process<H>(
    message: &jetstream::Message,
    handler: &H,
    settings: &ConsumerSettings,
    durable_name: &str,
    faults: &watch::Sender<Option<ClientError>>,
) where
    H: MessageHandler,
{
    let delivery = Delivery::from_jetstream(message);
    let sequence = delivery.stream_sequence;

    if delivery.is_redelivery() {
        tracing::debug!(
            durable = %durable_name,
            sequence,
            deliveries = delivery.deliveries,
            "processing redelivered message"
        );
    }

    match handler.handle(delivery).await {
        Ok(()) => {
            if settings.ack_mode == AckMode::Explicit {
                if let Err(error) = acknowledge(message, settings.ack_retries).await {
                    tracing::warn!(
                        durable = %durable_name,
                        sequence,
                        %error,
                        "acknowledgment not confirmed, message stays redeliverable"
                    );
                    faults.send_replace(Some(error));
                }
            }
        }
        Err(error) => {
            // Left unacknowledged: the broker redelivers after ack-wait
            // with an incremented delivery count.
            tracing::warn!(
                durable = %durable_name,
                sequence,
                %error,
                "handler failed, message will be redelivered"
            );
        }
    }
}

/// Acknowledge with broker confirmation, retrying a bounded number of
/// times before reporting a delivery fault.
async fn acknowledge(message: &jetstream::Message, retries: u32) -> Result<()> {
    let mut attempt = 0u32;
    loop {
        match message.double_ack().await {
            Ok(()) => return Ok(()),
            Err(error) if attempt < retries => {
                attempt += 1;
                let delay = Duration::from_millis(100u64 << attempt.min(6));
                tracing::debug!(%error, attempt, "ack not confirmed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                return Err(ClientError::Delivery(format!(
                    "acknowledgment failed after {} attempts: {error}",
                    attempt + 1
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn delivery(subject: &str) -> Delivery {
        Delivery {
            subject: subject.to_string(),
            payload: Bytes::from_static(b"{}"),
            headers: None,
            stream_sequence: 1,
            deliveries: 1,
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = ConsumerSettings::default();
        assert_eq!(settings.ack_mode, AckMode::Explicit);
        assert_eq!(settings.ack_wait, Duration::from_secs(30));
        assert_eq!(settings.max_deliver, -1);
        assert_eq!(settings.max_ack_pending, 256);
        assert_eq!(settings.ack_retries, 3);
    }

    #[test]
    fn test_ack_mode_mapping() {
        assert!(matches!(AckMode::Explicit.to_policy(), AckPolicy::Explicit));
        assert!(matches!(AckMode::None.to_policy(), AckPolicy::None));
    }

    #[test]
    fn test_handler_error_display() {
        let error = HandlerError::new("payload rejected");
        assert_eq!(error.to_string(), "payload rejected");
    }

    #[tokio::test]
    async fn test_closure_handler() {
        let handler = |delivery: Delivery| async move {
            if delivery.subject.starts_with("events.") {
                Ok(())
            } else {
                Err(HandlerError::new("unexpected subject"))
            }
        };

        assert!(handler.handle(delivery("events.user.login")).await.is_ok());
        assert!(handler.handle(delivery("other.subject")).await.is_err());
    }
}
