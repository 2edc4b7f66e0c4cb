//! # PGMQ Messaging Service
//!
//! PostgreSQL message queue provider talking to the `pgmq` extension through
//! sqlx.
//!
//! ## Features
//!
//! - **Visibility Timeout**: built-in pgmq visibility semantics
//! - **Archive on Ack**: processed messages are kept in `pgmq.a_{queue}`
//! - **Dead-Letter Queue**: rejected messages move to `{queue}_dlq`

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::service::{MessagingService, QueueMessage};
use super::types::{MessageId, QueuedMessage, ReceiptHandle};
use super::MessagingError;

#[derive(Debug, Clone)]
pub struct PgmqMessagingService {
    pool: PgPool,
}

impl PgmqMessagingService {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, MessagingError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| MessagingError::database_connection(e.to_string()))?;
        info!(max_connections, "Connected to pgmq");
        Ok(Self { pool })
    }

    /// Share an existing pool, e.g. the document store's
    pub fn new_with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn dead_letter_queue(queue_name: &str) -> String {
        format!("{queue_name}_dlq")
    }

    fn message_id(queue_name: &str, receipt_handle: &ReceiptHandle) -> Result<i64, MessagingError> {
        receipt_handle.as_i64().ok_or_else(|| {
            MessagingError::queue_operation(
                queue_name,
                "parse receipt handle",
                format!("invalid receipt handle {receipt_handle}"),
            )
        })
    }

    async fn send_json(&self, queue_name: &str, payload: serde_json::Value) -> Result<i64, MessagingError> {
        sqlx::query_scalar::<_, i64>("SELECT * FROM pgmq.send($1, $2)")
            .bind(queue_name)
            .bind(Json(payload))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "send", e.to_string()))
    }
}

#[async_trait]
impl MessagingService for PgmqMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        MessagingError::validate_queue_name(queue_name)?;
        for name in [queue_name.to_string(), Self::dead_letter_queue(queue_name)] {
            sqlx::query("SELECT pgmq.create($1)")
                .bind(&name)
                .execute(&self.pool)
                .await
                .map_err(|e| MessagingError::queue_operation(&name, "create", e.to_string()))?;
        }
        debug!(queue = %queue_name, "Queue ensured");
        Ok(())
    }

    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        let payload: serde_json::Value = serde_json::from_slice(&message.to_bytes()?)?;
        let msg_id = self.send_json(queue_name, payload).await?;
        Ok(MessageId::from(msg_id))
    }

    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        let vt_seconds = i32::try_from(visibility_timeout.as_secs()).unwrap_or(i32::MAX);
        let qty = i32::try_from(max_messages).unwrap_or(i32::MAX);

        let rows = sqlx::query("SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read($1, $2, $3)")
            .bind(queue_name)
            .bind(vt_seconds)
            .bind(qty)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "read", e.to_string()))?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let msg_id: i64 = row.try_get("msg_id")?;
            let read_ct: i32 = row.try_get("read_ct")?;
            let enqueued_at: DateTime<Utc> = row.try_get("enqueued_at")?;
            let Json(payload): Json<serde_json::Value> = row.try_get("message")?;

            let message = T::from_bytes(&serde_json::to_vec(&payload)?)?;
            result.push(QueuedMessage::new(
                ReceiptHandle::from(msg_id),
                message,
                u32::try_from(read_ct).unwrap_or(0),
                enqueued_at,
            ));
        }
        Ok(result)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let message_id = Self::message_id(queue_name, receipt_handle)?;
        let archived: bool = sqlx::query_scalar("SELECT pgmq.archive($1, $2::bigint)")
            .bind(queue_name)
            .bind(message_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "archive", e.to_string()))?;

        if archived {
            Ok(())
        } else {
            Err(MessagingError::message_not_found(queue_name, message_id))
        }
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let message_id = Self::message_id(queue_name, receipt_handle)?;

        if requeue {
            sqlx::query("SELECT msg_id FROM pgmq.set_vt($1, $2, 0)")
                .bind(queue_name)
                .bind(message_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| MessagingError::queue_operation(queue_name, "set_vt", e.to_string()))?;
            return Ok(());
        }

        MessagingError::validate_queue_name(queue_name)?;
        let sql = format!("SELECT message FROM pgmq.q_{queue_name} WHERE msg_id = $1");
        let payload: Option<Json<serde_json::Value>> = sqlx::query_scalar(&sql)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                MessagingError::queue_operation(queue_name, "fetch for dead-letter", e.to_string())
            })?;

        let Some(Json(payload)) = payload else {
            return Err(MessagingError::message_not_found(queue_name, message_id));
        };

        let dlq = Self::dead_letter_queue(queue_name);
        self.send_json(&dlq, payload).await?;
        sqlx::query_scalar::<_, bool>("SELECT pgmq.delete($1, $2::bigint)")
            .bind(queue_name)
            .bind(message_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "delete", e.to_string()))?;

        debug!(queue = %queue_name, message_id, dead_letter_queue = %dlq, "Message dead-lettered");
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }

    fn provider_name(&self) -> &'static str {
        "pgmq"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_queue_name() {
        assert_eq!(
            PgmqMessagingService::dead_letter_queue("raw_products"),
            "raw_products_dlq"
        );
    }

    #[test]
    fn test_receipt_handle_parsing() {
        assert_eq!(
            PgmqMessagingService::message_id("q", &ReceiptHandle::from(42_i64)).unwrap(),
            42
        );
        assert!(PgmqMessagingService::message_id("q", &ReceiptHandle("x".into())).is_err());
    }
}
