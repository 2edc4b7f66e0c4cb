//! # In-Memory Messaging Service
//!
//! Thread-safe in-memory queues for tests and local runs.
//!
//! ## Features
//!
//! - **Visibility Timeout**: received messages stay hidden until acked, nacked or timed out
//! - **Dead Letters**: rejected messages are kept per queue for inspection
//! - **Introspection**: queue lengths and payloads without consuming messages

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::service::{MessagingService, QueueMessage};
use super::types::{MessageId, QueuedMessage, ReceiptHandle};
use super::MessagingError;

#[derive(Debug, Clone)]
struct InMemoryQueuedMessage {
    id: u64,
    payload: Vec<u8>,
    enqueued_at: DateTime<Utc>,
    visible_at: Option<DateTime<Utc>>,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct InMemoryQueue {
    messages: VecDeque<InMemoryQueuedMessage>,
    dead_letters: Vec<Vec<u8>>,
    next_id: u64,
    total_sent: u64,
    total_acked: u64,
    total_requeued: u64,
}

/// Per-queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InMemoryQueueCounters {
    pub sent: u64,
    pub acked: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryMessagingService {
    queues: RwLock<HashMap<String, InMemoryQueue>>,
}

impl InMemoryMessagingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queues(queue_names: &[&str]) -> Self {
        let queues = queue_names
            .iter()
            .map(|name| (name.to_string(), InMemoryQueue::default()))
            .collect();
        Self {
            queues: RwLock::new(queues),
        }
    }

    /// Messages still in the queue, visible or not
    pub async fn queue_length(&self, queue_name: &str) -> usize {
        let queues = self.queues.read().await;
        queues.get(queue_name).map(|q| q.messages.len()).unwrap_or(0)
    }

    /// Payloads currently in the queue, decoded as JSON, in send order
    pub async fn peek_messages(&self, queue_name: &str) -> Vec<serde_json::Value> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| {
                q.messages
                    .iter()
                    .filter_map(|m| serde_json::from_slice(&m.payload).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn dead_letters(&self, queue_name: &str) -> Vec<serde_json::Value> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| {
                q.dead_letters
                    .iter()
                    .filter_map(|payload| serde_json::from_slice(payload).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn counters(&self, queue_name: &str) -> InMemoryQueueCounters {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| InMemoryQueueCounters {
                sent: q.total_sent,
                acked: q.total_acked,
                requeued: q.total_requeued,
                dead_lettered: q.dead_letters.len() as u64,
            })
            .unwrap_or_default()
    }

    pub async fn clear_queue(&self, queue_name: &str) {
        let mut queues = self.queues.write().await;
        if let Some(queue) = queues.get_mut(queue_name) {
            queue.messages.clear();
            queue.dead_letters.clear();
        }
    }

    fn parse_handle(receipt_handle: &ReceiptHandle, queue_name: &str) -> Result<u64, MessagingError> {
        receipt_handle.as_u64().ok_or_else(|| {
            MessagingError::queue_operation(
                queue_name,
                "parse receipt handle",
                format!("invalid receipt handle {receipt_handle}"),
            )
        })
    }
}

#[async_trait]
impl MessagingService for InMemoryMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        let mut queues = self.queues.write().await;
        queues.entry(queue_name.to_string()).or_default();
        Ok(())
    }

    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        let payload = message.to_bytes()?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        queue.next_id += 1;
        queue.total_sent += 1;
        let id = queue.next_id;
        queue.messages.push_back(InMemoryQueuedMessage {
            id,
            payload,
            enqueued_at: Utc::now(),
            visible_at: None,
            receive_count: 0,
        });

        Ok(MessageId::from(id))
    }

    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Utc::now();
        let visible_until =
            now + chrono::Duration::from_std(visibility_timeout).unwrap_or_else(|_| chrono::Duration::seconds(30));
        let mut received = Vec::new();

        for msg in queue.messages.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if msg.visible_at.is_some_and(|vt| vt > now) {
                continue;
            }

            let deserialized = T::from_bytes(&msg.payload)?;
            msg.visible_at = Some(visible_until);
            msg.receive_count += 1;
            received.push(QueuedMessage::new(
                ReceiptHandle::from(msg.id),
                deserialized,
                msg.receive_count,
                msg.enqueued_at,
            ));
        }

        Ok(received)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let message_id = Self::parse_handle(receipt_handle, queue_name)?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let pos = queue
            .messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| MessagingError::message_not_found(queue_name, message_id as i64))?;
        queue.messages.remove(pos);
        queue.total_acked += 1;
        Ok(())
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let message_id = Self::parse_handle(receipt_handle, queue_name)?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let pos = queue
            .messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| MessagingError::message_not_found(queue_name, message_id as i64))?;

        if requeue {
            if let Some(msg) = queue.messages.get_mut(pos) {
                msg.visible_at = None;
            }
            queue.total_requeued += 1;
        } else if let Some(msg) = queue.messages.remove(pos) {
            queue.dead_letters.push(msg.payload);
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_receive_ack() {
        let service = InMemoryMessagingService::with_queues(&["raw"]);
        service.send_message("raw", &json!({"n": 1})).await.unwrap();
        service.send_message("raw", &json!({"n": 2})).await.unwrap();

        let received: Vec<QueuedMessage<serde_json::Value>> = service
            .receive_messages("raw", 10, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].message["n"], 1);
        assert_eq!(received[0].receive_count, 1);

        // Hidden while in flight
        let again: Vec<QueuedMessage<serde_json::Value>> = service
            .receive_messages("raw", 10, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(again.is_empty());

        service.ack_message("raw", &received[0].receipt_handle).await.unwrap();
        assert_eq!(service.queue_length("raw").await, 1);
        assert_eq!(service.counters("raw").await.acked, 1);
    }

    #[tokio::test]
    async fn test_requeue_makes_message_visible_again() {
        let service = InMemoryMessagingService::with_queues(&["raw"]);
        service.send_message("raw", &json!({"n": 1})).await.unwrap();

        let first: Vec<QueuedMessage<serde_json::Value>> = service
            .receive_messages("raw", 1, Duration::from_secs(30))
            .await
            .unwrap();
        service
            .nack_message("raw", &first[0].receipt_handle, true)
            .await
            .unwrap();

        let second: Vec<QueuedMessage<serde_json::Value>> = service
            .receive_messages("raw", 1, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].receive_count, 2);
        assert_eq!(second[0].message, json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_reject_dead_letters() {
        let service = InMemoryMessagingService::with_queues(&["raw"]);
        service.send_message("raw", &json!({"bad": true})).await.unwrap();

        let received: Vec<QueuedMessage<serde_json::Value>> = service
            .receive_messages("raw", 1, Duration::from_secs(30))
            .await
            .unwrap();
        service
            .nack_message("raw", &received[0].receipt_handle, false)
            .await
            .unwrap();

        assert_eq!(service.queue_length("raw").await, 0);
        assert_eq!(service.dead_letters("raw").await, vec![json!({"bad": true})]);
    }

    #[tokio::test]
    async fn test_unknown_queue() {
        let service = InMemoryMessagingService::new();
        let result = service.send_message("missing", &json!({})).await;
        assert!(matches!(result, Err(MessagingError::QueueNotFound { .. })));
    }
}
