//! Message model seen by subscription handlers.

use async_nats::HeaderMap;
use async_nats::jetstream;
use bytes::Bytes;

/// A message delivered to a durable subscription.
///
/// Carries the payload plus the delivery metadata needed for
/// redelivery-aware handling. Acknowledgment is driven by the consumer
/// delivery loop, not by the handler.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Subject the message was published to.
    pub subject: String,

    /// Opaque message payload.
    pub payload: Bytes,

    /// Optional headers; keys are unique.
    pub headers: Option<HeaderMap>,

    /// Position of the message in its stream.
    pub stream_sequence: u64,

    /// How many times this message has been delivered, starting at 1.
    pub deliveries: u32,
}

impl Delivery {
    /// Snapshot a broker message into the handler-facing model.
    ///
    /// Delivery metadata lives in the acknowledgment reply subject; when
    /// it cannot be parsed the message is treated as a first delivery.
    pub(crate) fn from_jetstream(message: &jetstream::Message) -> Self {
        let (stream_sequence, deliveries) = match message.info() {
            Ok(info) => (info.stream_sequence, info.delivered.max(1) as u32),
            Err(error) => {
                tracing::warn!(%error, "failed to parse delivery metadata, assuming first delivery");
                (0, 1)
            }
        };

        Self {
            subject: message.subject.to_string(),
            payload: message.payload.clone(),
            headers: message.headers.clone(),
            stream_sequence,
            deliveries,
        }
    }

    /// Whether this message has been delivered before.
    pub fn is_redelivery(&self) -> bool {
        self.deliveries > 1
    }

    /// Look up a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|headers| headers.get(name))
            .map(|value| value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(deliveries: u32) -> Delivery {
        Delivery {
            subject: "events.user.login".to_string(),
            payload: Bytes::from_static(b"{}"),
            headers: None,
            stream_sequence: 7,
            deliveries,
        }
    }

    #[test]
    fn test_first_delivery_is_not_redelivery() {
        assert!(!delivery(1).is_redelivery());
        assert!(delivery(2).is_redelivery());
    }

    #[test]
    fn test_header_lookup() {
        let mut headers = HeaderMap::new();
        headers.insert("trace-id", "abc123");

        let mut delivery = delivery(1);
        assert_eq!(delivery.header("trace-id"), None);

        delivery.headers = Some(headers);
        assert_eq!(delivery.header("trace-id"), Some("abc123"));
        assert_eq!(delivery.header("missing"), None);
    }
}
