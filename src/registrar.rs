//! Idempotent stream declaration.
//!
//! Declaring a stream that already exists with the same shape is a normal
//! success path; repeated client startups must not fail because a prior
//! run already provisioned the broker.

use crate::error::{ClientError, Result};
use async_nats::jetstream::Context;
use async_nats::jetstream::stream::{
    Config as StreamConfig, RetentionPolicy, StorageType, Stream,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// How long the broker keeps messages in a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Keep until capacity/age limits evict.
    #[default]
    Limits,
    /// Remove once acknowledged by a consumer.
    WorkQueue,
    /// Remove once every interested consumer acknowledged.
    Interest,
}

impl Retention {
    fn to_policy(self) -> RetentionPolicy {
        match self {
            Retention::Limits => RetentionPolicy::Limits,
            Retention::WorkQueue => RetentionPolicy::WorkQueue,
            Retention::Interest => RetentionPolicy::Interest,
        }
    }

    fn matches(self, policy: RetentionPolicy) -> bool {
        matches!(
            (self, policy),
            (Retention::Limits, RetentionPolicy::Limits)
                | (Retention::WorkQueue, RetentionPolicy::WorkQueue)
                | (Retention::Interest, RetentionPolicy::Interest)
        )
    }
}

/// Where stream messages are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Storage {
    #[default]
    File,
    Memory,
}

impl Storage {
    fn to_storage_type(self) -> StorageType {
        match self {
            Storage::File => StorageType::File,
            Storage::Memory => StorageType::Memory,
        }
    }

    fn matches(self, storage: StorageType) -> bool {
        matches!(
            (self, storage),
            (Storage::File, StorageType::File) | (Storage::Memory, StorageType::Memory)
        )
    }
}

/// Definition of a durable stream.
///
/// The name is the unique key on the broker. Subjects, retention and
/// storage are the logical shape: re-declaring with a different value for
/// any of them is a conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDefinition {
    pub name: String,
    pub subjects: Vec<String>,
    pub retention: Retention,
    pub storage: Storage,
    pub max_messages: i64,
    pub max_age: Duration,
}

impl StreamDefinition {
    /// Definition with teacher-grade defaults: limits retention, file
    /// storage, 100k messages, 7 days.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subjects: Vec::new(),
            retention: Retention::default(),
            storage: Storage::default(),
            max_messages: 100_000,
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    /// Add a subject pattern captured by the stream.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subjects.push(subject.into());
        self
    }

    /// Add multiple subject patterns.
    pub fn subjects(mut self, subjects: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.subjects.extend(subjects.into_iter().map(Into::into));
        self
    }

    /// Set the retention policy.
    pub fn retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    /// Set the storage class.
    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = storage;
        self
    }

    /// Set the maximum message count.
    pub fn max_messages(mut self, max: i64) -> Self {
        self.max_messages = max;
        self
    }

    /// Set the maximum message age.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    fn to_config(&self) -> StreamConfig {
        StreamConfig {
            name: self.name.clone(),
            subjects: self.subjects.clone(),
            retention: self.retention.to_policy(),
            storage: self.storage.to_storage_type(),
            max_messages: self.max_messages,
            max_age: self.max_age,
            ..Default::default()
        }
    }

    /// First logical field on which `existing` disagrees with this
    /// definition, if any. Subject sets compare order-insensitively;
    /// capacity limits are tunable and do not count as conflicts.
    fn conflicting_field(&self, existing: &StreamConfig) -> Option<&'static str> {
        let mut ours: Vec<&str> = self.subjects.iter().map(String::as_str).collect();
        let mut theirs: Vec<&str> = existing.subjects.iter().map(String::as_str).collect();
        ours.sort_unstable();
        theirs.sort_unstable();
        if ours != theirs {
            return Some("subjects");
        }
        if !self.retention.matches(existing.retention) {
            return Some("retention");
        }
        if !self.storage.matches(existing.storage) {
            return Some("storage");
        }
        None
    }
}

/// Broker-reported stream state.
#[derive(Debug, Clone)]
pub struct StreamStats {
    pub name: String,
    pub messages: u64,
    pub bytes: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub consumers: usize,
}

/// Declares streams with create-or-confirm semantics.
pub struct StreamRegistrar {
    jetstream: Arc<Context>,
}

impl StreamRegistrar {
    pub fn new(jetstream: Arc<Context>) -> Self {
        Self { jetstream }
    }

    /// Ensure `definition` exists on the broker.
    ///
    /// An existing stream with the same logical shape is idempotent
    /// success. An existing stream with a different shape fails with
    /// [`ClientError::Conflict`] naming the mismatched field.
    pub async fn ensure(&self, definition: &StreamDefinition) -> Result<StreamStats> {
        match self.jetstream.get_stream(&definition.name).await {
            Ok(mut stream) => {
                let info = stream.info().await.map_err(ClientError::broker)?;

                if let Some(field) = definition.conflicting_field(&info.config) {
                    return Err(ClientError::Conflict {
                        stream: definition.name.clone(),
                        field,
                    });
                }

                tracing::debug!(stream = %definition.name, "stream already exists");
                Ok(stats_of(&definition.name, &mut stream).await?)
            }
            Err(_) => {
                tracing::info!(
                    stream = %definition.name,
                    subjects = ?definition.subjects,
                    "creating stream"
                );

                let mut stream = self
                    .jetstream
                    .create_stream(definition.to_config())
                    .await
                    .map_err(ClientError::broker)?;

                tracing::info!(stream = %definition.name, "stream created");
                Ok(stats_of(&definition.name, &mut stream).await?)
            }
        }
    }

    /// Ensure a set of streams in declaration order, stopping at the
    /// first failure.
    pub async fn ensure_all(&self, definitions: &[StreamDefinition]) -> Result<Vec<StreamStats>> {
        let mut stats = Vec::with_capacity(definitions.len());
        for definition in definitions {
            stats.push(self.ensure(definition).await?);
        }
        Ok(stats)
    }

    /// Broker-reported state of a stream.
    pub async fn stats(&self, name: &str) -> Result<StreamStats> {
        let mut stream = self
            .jetstream
            .get_stream(name)
            .await
            .map_err(ClientError::broker)?;
        stats_of(name, &mut stream).await
    }
}

async fn stats_of(name: &str, stream: &mut Stream) -> Result<StreamStats> {
    let info = stream.info().await.map_err(ClientError::broker)?;

    Ok(StreamStats {
        name: name.to_string(),
        messages: info.state.messages,
        bytes: info.state.bytes,
        first_sequence: info.state.first_sequence,
        last_sequence: info.state.last_sequence,
        consumers: info.state.consumer_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events_definition() -> StreamDefinition {
        StreamDefinition::new("EVENTS")
            .subject("events.>")
            .retention(Retention::WorkQueue)
            .storage(Storage::File)
            .max_messages(10_000)
            .max_age(Duration::from_secs(24 * 60 * 60))
    }

    #[test]
    fn test_definition_builder() {
        let definition = events_definition();
        assert_eq!(definition.name, "EVENTS");
        assert_eq!(definition.subjects, vec!["events.>"]);
        assert_eq!(definition.retention, Retention::WorkQueue);
        assert_eq!(definition.max_messages, 10_000);
    }

    #[test]
    fn test_to_config_mapping() {
        let config = events_definition().to_config();
        assert_eq!(config.name, "EVENTS");
        assert_eq!(config.subjects, vec!["events.>".to_string()]);
        assert!(matches!(config.retention, RetentionPolicy::WorkQueue));
        assert!(matches!(config.storage, StorageType::File));
        assert_eq!(config.max_messages, 10_000);
        assert_eq!(config.max_age, Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn test_identical_definition_has_no_conflict() {
        let definition = events_definition();
        let existing = definition.to_config();
        assert_eq!(definition.conflicting_field(&existing), None);
    }

    #[test]
    fn test_subject_order_is_not_a_conflict() {
        let definition = StreamDefinition::new("S")
            .subject("a.>")
            .subject("b.>");
        let mut existing = definition.to_config();
        existing.subjects.reverse();
        assert_eq!(definition.conflicting_field(&existing), None);
    }

    #[test]
    fn test_conflicting_subjects() {
        let definition = events_definition();
        let mut existing = definition.to_config();
        existing.subjects = vec!["other.>".to_string()];
        assert_eq!(definition.conflicting_field(&existing), Some("subjects"));
    }

    #[test]
    fn test_conflicting_retention() {
        let definition = events_definition();
        let mut existing = definition.to_config();
        existing.retention = RetentionPolicy::Interest;
        assert_eq!(definition.conflicting_field(&existing), Some("retention"));
    }

    #[test]
    fn test_conflicting_storage() {
        let definition = events_definition();
        let mut existing = definition.to_config();
        existing.storage = StorageType::Memory;
        assert_eq!(definition.conflicting_field(&existing), Some("storage"));
    }

    #[test]
    fn test_limits_are_not_logical_conflicts() {
        let definition = events_definition();
        let mut existing = definition.to_config();
        existing.max_messages = 42;
        existing.max_age = Duration::from_secs(60);
        assert_eq!(definition.conflicting_field(&existing), None);
    }
}
