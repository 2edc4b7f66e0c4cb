//! # Messaging Provider Enum
//!
//! Enum dispatch over the messaging backends. `MessagingService` has generic
//! methods and is not object safe, so workers hold an `Arc<MessagingProvider>`
//! instead of a trait object.

use std::sync::Arc;
use std::time::Duration;

use super::in_memory::InMemoryMessagingService;
use super::pgmq::PgmqMessagingService;
use super::service::{MessagingService, QueueMessage};
use super::types::{MessageId, QueuedMessage, ReceiptHandle};
use super::MessagingError;

#[derive(Debug, Clone)]
pub enum MessagingProvider {
    Pgmq(PgmqMessagingService),
    /// Shared so tests can keep a handle for introspection
    InMemory(Arc<InMemoryMessagingService>),
}

impl MessagingProvider {
    pub fn in_memory() -> (Self, Arc<InMemoryMessagingService>) {
        let service = Arc::new(InMemoryMessagingService::new());
        (Self::InMemory(Arc::clone(&service)), service)
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Pgmq(s) => s.provider_name(),
            Self::InMemory(s) => s.provider_name(),
        }
    }

    pub async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(s) => s.ensure_queue(queue_name).await,
            Self::InMemory(s) => s.ensure_queue(queue_name).await,
        }
    }

    pub async fn ensure_queues(&self, queue_names: &[String]) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(s) => s.ensure_queues(queue_names).await,
            Self::InMemory(s) => s.ensure_queues(queue_names).await,
        }
    }

    pub async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        match self {
            Self::Pgmq(s) => s.send_message(queue_name, message).await,
            Self::InMemory(s) => s.send_message(queue_name, message).await,
        }
    }

    pub async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        match self {
            Self::Pgmq(s) => {
                s.receive_messages(queue_name, max_messages, visibility_timeout)
                    .await
            }
            Self::InMemory(s) => {
                s.receive_messages(queue_name, max_messages, visibility_timeout)
                    .await
            }
        }
    }

    pub async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(s) => s.ack_message(queue_name, receipt_handle).await,
            Self::InMemory(s) => s.ack_message(queue_name, receipt_handle).await,
        }
    }

    pub async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(s) => s.nack_message(queue_name, receipt_handle, requeue).await,
            Self::InMemory(s) => s.nack_message(queue_name, receipt_handle, requeue).await,
        }
    }

    pub async fn health_check(&self) -> Result<bool, MessagingError> {
        match self {
            Self::Pgmq(s) => s.health_check().await,
            Self::InMemory(s) => s.health_check().await,
        }
    }
}
