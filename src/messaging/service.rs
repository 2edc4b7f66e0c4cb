//! # Messaging Service Traits
//!
//! Core trait definitions for provider-agnostic messaging.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::types::{MessageId, QueuedMessage, ReceiptHandle, RoutedMessage};
use super::MessagingError;

/// Provider-agnostic queue operations
///
/// Implementations provide the actual backend (pgmq, in-memory). Any queue
/// system with idempotent queue creation, visibility timeouts and ack/nack
/// can implement it.
#[async_trait]
pub trait MessagingService: Send + Sync + 'static {
    /// Create a queue if it doesn't exist (idempotent)
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError>;

    async fn ensure_queues(&self, queue_names: &[String]) -> Result<(), MessagingError> {
        for queue_name in queue_names {
            self.ensure_queue(queue_name).await?;
        }
        Ok(())
    }

    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError>;

    /// Receive up to `max_messages`, hidden from other consumers for
    /// `visibility_timeout` unless acked or nacked first
    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError>;

    /// Remove a processed message from the queue
    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError>;

    /// `requeue = true` makes the message visible again unmodified;
    /// `requeue = false` dead-letters it without redelivery
    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError>;

    async fn health_check(&self) -> Result<bool, MessagingError>;

    fn provider_name(&self) -> &'static str;
}

/// Message serialization contract
pub trait QueueMessage: Send + Sync + Clone + 'static {
    fn to_bytes(&self) -> Result<Vec<u8>, MessagingError>;

    fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError>
    where
        Self: Sized;
}

fn json_to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, MessagingError> {
    Ok(serde_json::to_vec(value)?)
}

fn json_from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MessagingError> {
    Ok(serde_json::from_slice(bytes)?)
}

impl QueueMessage for serde_json::Value {
    fn to_bytes(&self) -> Result<Vec<u8>, MessagingError> {
        json_to_bytes(self)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError> {
        json_from_bytes(bytes)
    }
}

impl QueueMessage for RoutedMessage {
    fn to_bytes(&self) -> Result<Vec<u8>, MessagingError> {
        json_to_bytes(self)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError> {
        json_from_bytes(bytes)
    }
}
