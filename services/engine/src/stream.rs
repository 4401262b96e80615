//! Durable stream transport boundary
//!
//! The wire transport is an ordered, durable stream with consumer-group
//! semantics, assumed as a given primitive. [`DurableStream`] is its
//! boundary: the engine is generic over it, and a production backend plugs
//! in behind the trait without touching the ingest loops.
//!
//! [`MemoryStream`] is the in-process implementation used by tests and
//! local runs. It preserves the semantics the loops rely on: per-group
//! cursors, blocking reads with a bounded wait, and acknowledgement
//! tracking.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

/// Transport-level stream errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("unknown consumer group {group} on stream {stream}")]
    UnknownGroup { stream: String, group: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// One entry read off a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub id: String,
    pub fields: BTreeMap<String, String>,
}

/// Ordered durable stream with consumer groups.
#[async_trait]
pub trait DurableStream: Send + Sync + 'static {
    /// Create a consumer group if it does not exist yet. Idempotent.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), StreamError>;

    /// Read up to `count` new messages for a group, blocking up to `block`
    /// if none are available. An empty result means the wait timed out.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, StreamError>;

    /// Acknowledge a processed message.
    async fn ack(&self, stream: &str, group: &str, message_id: &str) -> Result<(), StreamError>;

    /// Append an entry, returning its id.
    async fn publish(
        &self,
        stream: &str,
        fields: BTreeMap<String, String>,
    ) -> Result<String, StreamError>;
}

// ── In-memory implementation ────────────────────────────────────────

#[derive(Debug, Default)]
struct GroupState {
    /// Index of the next undelivered entry.
    cursor: usize,
    /// Delivered but not yet acknowledged message ids.
    pending: HashSet<String>,
}

#[derive(Debug, Default)]
struct StreamData {
    entries: Vec<StreamMessage>,
    groups: HashMap<String, GroupState>,
}

/// In-process stream backend.
///
/// Entries live for the process lifetime; redelivery of unacknowledged
/// messages after a consumer crash is the production transport's concern
/// and is not simulated here.
#[derive(Debug, Default)]
pub struct MemoryStream {
    streams: Mutex<HashMap<String, StreamData>>,
    notify: Notify,
    sequence: AtomicU64,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries ever published to a stream.
    pub async fn len(&self, stream: &str) -> usize {
        self.streams
            .lock()
            .await
            .get(stream)
            .map(|s| s.entries.len())
            .unwrap_or(0)
    }

    /// All entries of a stream (test helper).
    pub async fn entries(&self, stream: &str) -> Vec<StreamMessage> {
        self.streams
            .lock()
            .await
            .get(stream)
            .map(|s| s.entries.clone())
            .unwrap_or_default()
    }

    /// Unacknowledged message ids for a group (test helper).
    pub async fn pending(&self, stream: &str, group: &str) -> usize {
        self.streams
            .lock()
            .await
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl DurableStream for MemoryStream {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), StreamError> {
        let mut streams = self.streams.lock().await;
        let data = streams.entry(stream.to_string()).or_default();
        data.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, StreamError> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            // Register for wakeups before checking, so a publish between the
            // check and the wait is not missed.
            let notified = self.notify.notified();
            {
                let mut streams = self.streams.lock().await;
                let StreamData { entries, groups } = streams
                    .get_mut(stream)
                    .ok_or_else(|| StreamError::UnknownGroup {
                        stream: stream.to_string(),
                        group: group.to_string(),
                    })?;
                let group_state = groups
                    .get_mut(group)
                    .ok_or_else(|| StreamError::UnknownGroup {
                        stream: stream.to_string(),
                        group: group.to_string(),
                    })?;

                if group_state.cursor < entries.len() {
                    let end = (group_state.cursor + count).min(entries.len());
                    let batch: Vec<StreamMessage> = entries[group_state.cursor..end].to_vec();
                    group_state.cursor = end;
                    for message in &batch {
                        group_state.pending.insert(message.id.clone());
                    }
                    return Ok(batch);
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, message_id: &str) -> Result<(), StreamError> {
        let mut streams = self.streams.lock().await;
        let group_state = streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .ok_or_else(|| StreamError::UnknownGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })?;
        group_state.pending.remove(message_id);
        Ok(())
    }

    async fn publish(
        &self,
        stream: &str,
        fields: BTreeMap<String, String>,
    ) -> Result<String, StreamError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let id = format!("{}-{}", stream, sequence);
        {
            let mut streams = self.streams.lock().await;
            let data = streams.entry(stream.to_string()).or_default();
            data.entries.push(StreamMessage {
                id: id.clone(),
                fields,
            });
        }
        self.notify.notify_waiters();
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_publish_then_read() {
        let stream = MemoryStream::new();
        stream.ensure_group("s", "g").await.unwrap();
        stream.publish("s", fields(&[("k", "v")])).await.unwrap();

        let batch = stream
            .read_group("s", "g", "c", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].fields["k"], "v");
    }

    #[tokio::test]
    async fn test_read_timeout_returns_empty() {
        let stream = MemoryStream::new();
        stream.ensure_group("s", "g").await.unwrap();
        let batch = stream
            .read_group("s", "g", "c", 10, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_group_cursor_advances() {
        let stream = MemoryStream::new();
        stream.ensure_group("s", "g").await.unwrap();
        for i in 0..3 {
            stream
                .publish("s", fields(&[("i", &i.to_string())]))
                .await
                .unwrap();
        }

        let first = stream
            .read_group("s", "g", "c", 2, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        let second = stream
            .read_group("s", "g", "c", 2, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].fields["i"], "2");
    }

    #[tokio::test]
    async fn test_independent_groups() {
        let stream = MemoryStream::new();
        stream.ensure_group("s", "g1").await.unwrap();
        stream.ensure_group("s", "g2").await.unwrap();
        stream.publish("s", fields(&[("k", "v")])).await.unwrap();

        let b1 = stream
            .read_group("s", "g1", "c", 10, Duration::from_millis(10))
            .await
            .unwrap();
        let b2 = stream
            .read_group("s", "g2", "c", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(b1.len(), 1);
        assert_eq!(b2.len(), 1);
    }

    #[tokio::test]
    async fn test_ack_clears_pending() {
        let stream = MemoryStream::new();
        stream.ensure_group("s", "g").await.unwrap();
        stream.publish("s", fields(&[("k", "v")])).await.unwrap();

        let batch = stream
            .read_group("s", "g", "c", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(stream.pending("s", "g").await, 1);

        stream.ack("s", "g", &batch[0].id).await.unwrap();
        assert_eq!(stream.pending("s", "g").await, 0);
    }

    #[tokio::test]
    async fn test_blocked_read_wakes_on_publish() {
        let stream = std::sync::Arc::new(MemoryStream::new());
        stream.ensure_group("s", "g").await.unwrap();

        let reader = {
            let stream = stream.clone();
            tokio::spawn(async move {
                stream
                    .read_group("s", "g", "c", 10, Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        stream.publish("s", fields(&[("k", "v")])).await.unwrap();

        let batch = reader.await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_read_unknown_group_errors() {
        let stream = MemoryStream::new();
        let err = stream
            .read_group("s", "g", "c", 10, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::UnknownGroup { .. }));
    }
}
