//! # Error Taxonomy
//!
//! Every failure that can reach the dispatcher is a [`ConsolidationError`].
//! [`ConsolidationError::category`] is the single classification point the
//! dispatcher consults to pick between ack, requeue and reject.

use crate::messaging::MessagingError;
use crate::store::{DocumentRef, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Retry classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Store timeout or connectivity problem, safe to requeue
    Transient,

    /// Optimistic-concurrency mismatch, resolves once the competing write lands
    Conflict,

    /// Never succeeds on retry, dead-lettered
    Permanent,

    /// Referenced input document absent at read time
    MissingInput,

    /// Not classified, rejected defensively
    Unclassified,
}

impl ErrorCategory {
    /// Whether the message should be returned to its queue unmodified
    pub fn is_requeue_safe(self) -> bool {
        matches!(
            self,
            ErrorCategory::Transient | ErrorCategory::Conflict | ErrorCategory::MissingInput
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Conflict => write!(f, "conflict"),
            ErrorCategory::Permanent => write!(f, "permanent"),
            ErrorCategory::MissingInput => write!(f, "missing_input"),
            ErrorCategory::Unclassified => write!(f, "unclassified"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConsolidationError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Store failure under the reject-on-store-error policy
    #[error("Store error (rejected by policy): {0}")]
    StoreRejected(StoreError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("No engine chain bound to routing key {routing_key}")]
    UnboundRoutingKey { routing_key: String },

    #[error("No handler registered for {tag} and no default handler")]
    HandlerNotFound { tag: String },

    #[error("Transform failed for {document_id}: {reason}")]
    Transform { document_id: String, reason: String },

    /// Only version mismatches in the batch
    #[error("Write conflict on {} document(s)", conflicts.len())]
    WriteConflict { conflicts: Vec<DocumentRef> },

    /// At least one hard error in the batch
    #[error("Bulk write failed for {} document(s) (retryable: {retryable})", errors.len())]
    WriteFailed {
        errors: Vec<(DocumentRef, String)>,
        retryable: bool,
    },

    #[error("Missing input documents of class {document_class}: {ids:?}")]
    MissingInput {
        document_class: String,
        ids: Vec<String>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConsolidationError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }

    pub fn transform(document_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transform {
            document_id: document_id.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Classify this error for the dispatcher's ack/requeue/reject decision
    pub fn category(&self) -> ErrorCategory {
        match self {
            ConsolidationError::Store(err) if err.is_transient() => ErrorCategory::Transient,
            ConsolidationError::Store(_) | ConsolidationError::StoreRejected(_) => {
                ErrorCategory::Permanent
            }
            ConsolidationError::Messaging(_) => ErrorCategory::Transient,
            ConsolidationError::Configuration(_)
            | ConsolidationError::InvalidPayload(_)
            | ConsolidationError::UnboundRoutingKey { .. }
            | ConsolidationError::HandlerNotFound { .. }
            | ConsolidationError::Transform { .. } => ErrorCategory::Permanent,
            ConsolidationError::WriteConflict { .. } => ErrorCategory::Conflict,
            ConsolidationError::WriteFailed { retryable, .. } => {
                if *retryable {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::Permanent
                }
            }
            ConsolidationError::MissingInput { .. } => ErrorCategory::MissingInput,
            ConsolidationError::Internal(_) => ErrorCategory::Unclassified,
        }
    }
}

impl From<serde_json::Error> for ConsolidationError {
    fn from(err: serde_json::Error) -> Self {
        ConsolidationError::InvalidPayload(format!("JSON error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, ConsolidationError>;
