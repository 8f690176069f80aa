//! Publishing with durable-persistence confirmation.

use crate::error::{ClientError, PublishFailure, Result};
use async_nats::HeaderMap;
use async_nats::jetstream::Context;
use async_nats::jetstream::context::{Publish, PublishError, PublishErrorKind};
use bytes::Bytes;
use std::sync::Arc;

/// Broker confirmation that a message is durably stored.
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    /// Stream that captured the message.
    pub stream: String,
    /// Sequence assigned to the message within the stream.
    pub sequence: u64,
    /// Whether the broker recognized the message as a duplicate of a
    /// previously published one (deduplication key matched).
    pub duplicate: bool,
}

/// Publishes messages and awaits the broker's persistence confirmation.
///
/// A returned receipt is the unit of "successfully published". Transient
/// failures are not retried here: retrying is the caller's decision, and
/// callers that need exactly-once publish supply a deduplication key via
/// [`Publisher::publish_with_dedup`].
pub struct Publisher {
    jetstream: Arc<Context>,
}

impl Publisher {
    pub fn new(jetstream: Arc<Context>) -> Self {
        Self { jetstream }
    }

    /// Publish `payload` to `subject` and await persistence confirmation.
    pub async fn publish(
        &self,
        subject: &str,
        payload: impl Into<Bytes>,
    ) -> Result<PublishReceipt> {
        let ack = self
            .jetstream
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(map_publish_error)?
            .await
            .map_err(map_publish_error)?;

        tracing::debug!(
            subject = %subject,
            stream = %ack.stream,
            sequence = ack.sequence,
            "message published and confirmed"
        );

        Ok(PublishReceipt {
            stream: ack.stream,
            sequence: ack.sequence,
            duplicate: ack.duplicate,
        })
    }

    /// Publish with headers; header keys are unique.
    pub async fn publish_with_headers(
        &self,
        subject: &str,
        headers: HeaderMap,
        payload: impl Into<Bytes>,
    ) -> Result<PublishReceipt> {
        let ack = self
            .jetstream
            .publish_with_headers(subject.to_string(), headers, payload.into())
            .await
            .map_err(map_publish_error)?
            .await
            .map_err(map_publish_error)?;

        Ok(PublishReceipt {
            stream: ack.stream,
            sequence: ack.sequence,
            duplicate: ack.duplicate,
        })
    }

    /// Publish with a caller-supplied deduplication key.
    ///
    /// Republishing the same key within the broker's deduplication window
    /// returns the original receipt with `duplicate` set instead of
    /// storing the message again.
    pub async fn publish_with_dedup(
        &self,
        subject: &str,
        dedup_id: &str,
        payload: impl Into<Bytes>,
    ) -> Result<PublishReceipt> {
        let publish = Publish::build()
            .payload(payload.into())
            .message_id(dedup_id);

        let ack = self
            .jetstream
            .send_publish(subject.to_string(), publish)
            .await
            .map_err(map_publish_error)?
            .await
            .map_err(map_publish_error)?;

        tracing::debug!(
            subject = %subject,
            dedup_id = %dedup_id,
            duplicate = ack.duplicate,
            "message published with deduplication key"
        );

        Ok(PublishReceipt {
            stream: ack.stream,
            sequence: ack.sequence,
            duplicate: ack.duplicate,
        })
    }
}

fn map_publish_error(error: PublishError) -> ClientError {
    let kind = match error.kind() {
        PublishErrorKind::TimedOut => PublishFailure::Timeout,
        PublishErrorKind::StreamNotFound => PublishFailure::NoStreamMatched,
        _ => PublishFailure::Rejected,
    };

    ClientError::Publish {
        kind,
        message: error.to_string(),
    }
}
