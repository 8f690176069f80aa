//! Client facade composing the connector, registrar, consumer and
//! publisher behind one object with an ordered lifecycle:
//! connect → ensure → subscribe ∥ publish → close.

use crate::config::ClientConfig;
use crate::connection::{ConnectionState, Connector};
use crate::consumer::{ConsumerSettings, DurableConsumer, MessageHandler, Subscription};
use crate::error::{ClientError, Result};
use crate::publisher::{PublishReceipt, Publisher};
use crate::registrar::{StreamDefinition, StreamRegistrar, StreamStats};
use async_nats::HeaderMap;
use async_nats::jetstream;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

/// Facade lifecycle status.
///
/// The first fatal error (auth, TLS, configuration, stream conflict) is
/// latched here; after that every operation is refused until the client
/// is rebuilt.
#[derive(Debug, Clone)]
pub enum ClientStatus {
    Running,
    Failed(ClientError),
    Closed,
}

/// Durable message-stream client.
///
/// One instance drives one broker connection. Subscriptions run on their
/// own tasks and stay registered with the facade so [`StreamClient::close`]
/// can stop them in order.
pub struct StreamClient {
    connector: Connector,
    jetstream: Arc<jetstream::Context>,
    registrar: StreamRegistrar,
    publisher: Publisher,
    subscriptions: Mutex<Vec<Subscription>>,
    status: watch::Sender<ClientStatus>,
}

impl StreamClient {
    /// Connect to the broker described by `config`.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let connector = Connector::connect(&config).await?;
        let jetstream = Arc::new(jetstream::new(connector.client()));

        let (status, _) = watch::channel(ClientStatus::Running);

        Ok(Self {
            registrar: StreamRegistrar::new(jetstream.clone()),
            publisher: Publisher::new(jetstream.clone()),
            connector,
            jetstream,
            subscriptions: Mutex::new(Vec::new()),
            status,
        })
    }

    /// Current connection state, owned by the transport connector.
    pub fn connection_state(&self) -> ConnectionState {
        self.connector.state()
    }

    /// Observe the facade status. Carries the first fatal error.
    pub fn status(&self) -> watch::Receiver<ClientStatus> {
        self.status.subscribe()
    }

    /// Ensure a stream exists (create-or-confirm).
    pub async fn ensure_stream(&self, definition: &StreamDefinition) -> Result<StreamStats> {
        self.guard()?;
        self.checked(self.registrar.ensure(definition).await)
    }

    /// Ensure a set of streams in declaration order.
    pub async fn ensure_streams(
        &self,
        definitions: &[StreamDefinition],
    ) -> Result<Vec<StreamStats>> {
        self.guard()?;
        self.checked(self.registrar.ensure_all(definitions).await)
    }

    /// Broker-reported state of a stream.
    pub async fn stream_stats(&self, name: &str) -> Result<StreamStats> {
        self.guard()?;
        self.checked(self.registrar.stats(name).await)
    }

    /// Subscribe `handler` to `pattern` on `stream` under `durable_name`,
    /// with default consumer settings.
    ///
    /// The subscription is owned by the facade; stop it with
    /// [`StreamClient::unsubscribe`] or [`StreamClient::close`].
    pub async fn subscribe<H>(
        &self,
        stream: &str,
        pattern: &str,
        durable_name: &str,
        handler: H,
    ) -> Result<()>
    where
        H: MessageHandler,
    {
        self.subscribe_with(stream, pattern, durable_name, handler, ConsumerSettings::default())
            .await
    }

    /// Subscribe with explicit consumer settings.
    pub async fn subscribe_with<H>(
        &self,
        stream: &str,
        pattern: &str,
        durable_name: &str,
        handler: H,
        settings: ConsumerSettings,
    ) -> Result<()>
    where
        H: MessageHandler,
    {
        self.guard()?;

        let consumer = DurableConsumer::new(self.jetstream.clone(), stream).with_settings(settings);
        let subscription = self.checked(consumer.subscribe(pattern, durable_name, handler).await)?;

        self.subscriptions.lock().await.push(subscription);
        Ok(())
    }

    /// Stop the subscription registered under `durable_name`.
    ///
    /// Server-side progress is kept; subscribing again with the same
    /// durable name resumes from the last acknowledged position.
    pub async fn unsubscribe(&self, durable_name: &str) -> Result<()> {
        let subscription = {
            let mut subscriptions = self.subscriptions.lock().await;
            let index = subscriptions
                .iter()
                .position(|s| s.durable_name() == durable_name);
            match index {
                Some(index) => subscriptions.swap_remove(index),
                None => {
                    return Err(ClientError::Broker(format!(
                        "no active subscription for durable '{durable_name}'"
                    )));
                }
            }
        };

        subscription.unsubscribe().await
    }

    /// Publish and await the broker's persistence confirmation.
    pub async fn publish(&self, subject: &str, payload: impl Into<Bytes>) -> Result<PublishReceipt> {
        self.guard()?;
        self.checked(self.publisher.publish(subject, payload).await)
    }

    /// Publish with headers.
    pub async fn publish_with_headers(
        &self,
        subject: &str,
        headers: HeaderMap,
        payload: impl Into<Bytes>,
    ) -> Result<PublishReceipt> {
        self.guard()?;
        self.checked(
            self.publisher
                .publish_with_headers(subject, headers, payload)
                .await,
        )
    }

    /// Publish with a caller-supplied deduplication key.
    pub async fn publish_with_dedup(
        &self,
        subject: &str,
        dedup_id: &str,
        payload: impl Into<Bytes>,
    ) -> Result<PublishReceipt> {
        self.guard()?;
        self.checked(
            self.publisher
                .publish_with_dedup(subject, dedup_id, payload)
                .await,
        )
    }

    /// Shut the client down: stop subscription delivery, flush
    /// outstanding frames, close the transport.
    ///
    /// Every step runs even if an earlier one fails; the first error is
    /// returned. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let mut first_error: Option<ClientError> = None;

        let subscriptions: Vec<Subscription> =
            self.subscriptions.lock().await.drain(..).collect();
        for subscription in subscriptions {
            let durable = subscription.durable_name().to_string();
            if let Err(error) = subscription.unsubscribe().await {
                tracing::warn!(durable = %durable, %error, "failed to stop subscription");
                first_error.get_or_insert(error);
            }
        }

        if let Err(error) = self.connector.flush().await {
            tracing::warn!(%error, "failed to flush outstanding frames");
            first_error.get_or_insert(error);
        }

        if let Err(error) = self.connector.close().await {
            first_error.get_or_insert(error);
        }

        self.status.send_replace(ClientStatus::Closed);
        tracing::info!("client closed");

        match first_error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    /// Refuse operations after a fatal error or close.
    fn guard(&self) -> Result<()> {
        match &*self.status.borrow() {
            ClientStatus::Running => Ok(()),
            ClientStatus::Failed(error) => Err(error.clone()),
            ClientStatus::Closed => Err(ClientError::Closed),
        }
    }

    /// Latch the first fatal error into the status channel.
    fn checked<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            if error.is_fatal() {
                self.status.send_if_modified(|status| {
                    if matches!(status, ClientStatus::Running) {
                        *status = ClientStatus::Failed(error.clone());
                        true
                    } else {
                        false
                    }
                });
                tracing::error!(%error, "fatal client error");
            }
        }
        result
    }
}
