//! # Messaging Module
//!
//! Queue-based transport between pipeline stages: the message body, the
//! provider-agnostic service trait with its pgmq and in-memory backends, and
//! routing-key to queue resolution.

mod errors;
pub mod in_memory;
mod message;
pub mod pgmq;
mod provider;
mod router;
mod service;
mod types;

pub use errors::MessagingError;
pub use in_memory::{InMemoryMessagingService, InMemoryQueueCounters};
pub use message::{ConsolidationMessage, DEFAULT_PRIORITY};
pub use pgmq::PgmqMessagingService;
pub use provider::MessagingProvider;
pub use router::{topic_matches, QueueRouter};
pub use service::{MessagingService, QueueMessage};
pub use types::{MessageId, QueuedMessage, ReceiptHandle, RoutedMessage};
