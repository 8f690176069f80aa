//! Durable message-stream client core for NATS JetStream.
//!
//! Manages the secure connection lifecycle, idempotent stream
//! declaration, durable consumption with at-least-once delivery, and
//! publish-confirmation handling behind one client facade.
//!
//! # Features
//!
//! - **Secure transport**: TLS with mutual authentication, user/password
//!   or token handshake, bounded-backoff reconnection over an endpoint
//!   list
//! - **Idempotent declaration**: create-or-confirm stream provisioning;
//!   conflicting re-declarations are surfaced, never retried
//! - **Durable consumption**: named durables resume from the last
//!   acknowledged position; unacknowledged messages are redelivered
//! - **Confirmed publishing**: a publish completes when the broker
//!   confirms durable persistence; deduplication keys for exactly-once
//!   publish
//!
//! # Example
//!
//! ```rust,ignore
//! use durastream::{ClientConfig, StreamClient, StreamDefinition, Retention};
//!
//! #[tokio::main]
//! async fn main() -> durastream::Result<()> {
//!     let client = StreamClient::connect(ClientConfig::new("nats://localhost:4222")).await?;
//!
//!     let events = StreamDefinition::new("EVENTS")
//!         .subject("events.>")
//!         .retention(Retention::WorkQueue);
//!     client.ensure_stream(&events).await?;
//!
//!     client
//!         .subscribe("EVENTS", "events.>", "events-consumer", |delivery| async move {
//!             println!("received on {}", delivery.subject);
//!             Ok(())
//!         })
//!         .await?;
//!
//!     client.publish("events.user.login", r#"{"event":"user.login"}"#).await?;
//!     client.close().await
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod message;
pub mod publisher;
pub mod registrar;

pub use client::{ClientStatus, StreamClient};
pub use config::{ClientConfig, Credentials, TlsConfig};
pub use connection::{ConnectionState, Connector};
pub use consumer::{
    AckMode, ConsumerSettings, DurableConsumer, HandlerError, MessageHandler, Subscription,
};
pub use error::{ClientError, PublishFailure, Result};
pub use message::Delivery;
pub use publisher::{PublishReceipt, Publisher};
pub use registrar::{Retention, Storage, StreamDefinition, StreamRegistrar, StreamStats};
