//! Transport connection lifecycle.
//!
//! Owns the single broker connection, its authentication/TLS setup and the
//! reconnection policy. Connection state is mutated here and nowhere else;
//! every other component observes it through a watch channel.

use crate::config::{ClientConfig, Credentials};
use crate::error::{ClientError, Result};
use async_nats::{Client, ConnectErrorKind, ConnectOptions, Event};
use std::time::Duration;
use tokio::sync::watch;

/// Observable connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Single authenticated, encrypted connection to the broker.
///
/// Reconnection round-robins over the configured endpoint list with
/// bounded exponential backoff. Publishes issued while reconnecting are
/// buffered by the transport; [`Connector::flush`] forces them out.
pub struct Connector {
    client: Client,
    state: watch::Sender<ConnectionState>,
}

impl Connector {
    /// Establish the connection described by `config`.
    ///
    /// Fails with [`ClientError::Auth`], [`ClientError::Tls`] or
    /// [`ClientError::Network`]; the initial connection is not retried.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let (state_tx, _) = watch::channel(ConnectionState::Connecting);

        let connection_name = config
            .connection_name
            .clone()
            .unwrap_or_else(|| format!("durastream-{}", uuid::Uuid::new_v4()));

        let mut options = ConnectOptions::new()
            .name(&connection_name)
            .connection_timeout(config.connection_timeout)
            .max_reconnects(config.max_reconnects)
            .reconnect_delay_callback(|attempts| reconnect_backoff(attempts))
            .event_callback({
                let state = state_tx.clone();
                move |event| {
                    let state = state.clone();
                    async move {
                        if *state.borrow() == ConnectionState::Closed {
                            return;
                        }
                        match event {
                            Event::Connected => {
                                tracing::info!("connection restored");
                                state.send_replace(ConnectionState::Connected);
                            }
                            Event::Disconnected => {
                                tracing::warn!("connection lost, reconnecting");
                                state.send_replace(ConnectionState::Reconnecting);
                            }
                            other => {
                                tracing::debug!(event = %other, "connection event");
                            }
                        }
                    }
                }
            });

        options = match &config.credentials {
            Credentials::None => options,
            Credentials::UserPassword { username, password } => {
                options.user_and_password(username.clone(), password.clone())
            }
            Credentials::Token { token } => options.token(token.clone()),
        };

        if let Some(tls) = &config.tls {
            options = options
                .require_tls(true)
                .add_root_certificates(tls.ca_cert.clone());
            if let (Some(cert), Some(key)) = (&tls.client_cert, &tls.client_key) {
                options = options.add_client_certificate(cert.clone(), key.clone());
            }
        }

        let client = options
            .connect(config.server_addrs())
            .await
            .map_err(|err| match err.kind() {
                ConnectErrorKind::Authentication => ClientError::Auth(err.to_string()),
                ConnectErrorKind::Tls => ClientError::Tls(err.to_string()),
                _ => ClientError::Network(err.to_string()),
            })?;

        state_tx.send_replace(ConnectionState::Connected);

        tracing::info!(
            endpoints = %config.server_addrs(),
            name = %connection_name,
            tls = config.tls.is_some(),
            "connected to broker"
        );

        Ok(Self {
            client,
            state: state_tx,
        })
    }

    /// Handle to the shared transport. Clones share one socket; all
    /// outbound frames are serialized through it.
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to connection state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Flush buffered outbound frames to the broker.
    pub async fn flush(&self) -> Result<()> {
        self.client.flush().await.map_err(ClientError::network)
    }

    /// Close the connection. Idempotent; safe to call while connected or
    /// reconnecting. Buffered frames are flushed on a best-effort basis
    /// and the socket is released once the last client handle drops.
    pub async fn close(&self) -> Result<()> {
        if *self.state.borrow() == ConnectionState::Closed {
            return Ok(());
        }

        let flushed = self.flush().await;
        self.state.send_replace(ConnectionState::Closed);
        tracing::info!("connection closed");
        flushed
    }
}

/// Delay before reconnect attempt `attempts`: exponential from 1s,
/// capped at 30s.
fn reconnect_backoff(attempts: usize) -> Duration {
    const BASE_MS: u64 = 1_000;
    const MAX_MS: u64 = 30_000;

    let exponent = attempts.saturating_sub(1).min(16) as u32;
    Duration::from_millis((BASE_MS << exponent).min(MAX_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_progression() {
        assert_eq!(reconnect_backoff(1), Duration::from_secs(1));
        assert_eq!(reconnect_backoff(2), Duration::from_secs(2));
        assert_eq!(reconnect_backoff(3), Duration::from_secs(4));
        assert_eq!(reconnect_backoff(5), Duration::from_secs(16));
    }

    #[test]
    fn test_backoff_is_bounded() {
        assert_eq!(reconnect_backoff(6), Duration::from_secs(30));
        assert_eq!(reconnect_backoff(60), Duration::from_secs(30));
        assert_eq!(reconnect_backoff(usize::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::Closed.to_string(), "closed");
    }
}
