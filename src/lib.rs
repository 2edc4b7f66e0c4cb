#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Consolidation Core
//!
//! Message-triggered consolidation pipeline for satellite production reports.
//!
//! ## Overview
//!
//! Raw publication reports from distribution and archive services arrive as
//! queue messages naming document ids. Engines bound to the message's routing
//! key turn those raw documents into consolidated product documents, attach
//! them to datatakes, compute datatake completeness and record coverage gaps
//! as orbit placeholders. Every write is reported downstream as a new message,
//! so each stage triggers the next.
//!
//! ## Key Features
//!
//! - **Idempotent writes**: unchanged targets are never rewritten, and reports
//!   list only what was actually written
//! - **Optimistic concurrency**: every update carries the version it was read
//!   at; conflicts requeue the message instead of overwriting
//! - **Batched store access**: one bulk write and one multi-search per engine
//!   run, whatever the message size
//! - **Failure routing**: errors are classified once, then requeued or
//!   dead-lettered
//!
//! ## Module Organization
//!
//! - [`store`] - Document store abstraction with in-memory and PostgreSQL backends
//! - [`messaging`] - Queue transport, message body and routing
//! - [`engine`] - Engine trait, data-engine helpers and the registry
//! - [`consolidation`] - Product, datatake completeness and orbit placeholder engines
//! - [`completeness`] - Period algebra, expected values and status roll-up
//! - [`collaborators`] - Product name parsing and tile intersection
//! - [`dispatcher`] - Message handling and the worker loop
//! - [`config`] - Layered configuration
//! - [`error`] - Error taxonomy and retry classification
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use consolidation_core::config::{DispatcherConfig, EngineBinding};
//! use consolidation_core::consolidation::OrbitPlaceholderEngine;
//! use consolidation_core::completeness::ExpectedValueLookup;
//! use consolidation_core::dispatcher::MessageDispatcher;
//! use consolidation_core::engine::EngineRegistry;
//! use consolidation_core::messaging::MessagingProvider;
//! use consolidation_core::store::InMemoryDocumentStore;
//!
//! # async fn example() -> consolidation_core::Result<()> {
//! let mut registry = EngineRegistry::new();
//! registry.register(Arc::new(OrbitPlaceholderEngine::new(Arc::new(ExpectedValueLookup::default()))))?;
//! let chains = registry.build_chains(&[EngineBinding::new("*.datatake", "datatakes", &["orbit-placeholder"])])?;
//!
//! let (messaging, _service) = MessagingProvider::in_memory();
//! let dispatcher = MessageDispatcher::new(
//!     chains,
//!     Arc::new(messaging),
//!     Arc::new(InMemoryDocumentStore::new()),
//!     DispatcherConfig::default(),
//! );
//! let body = serde_json::json!({ "document_class": "datatake", "document_ids": ["S1A-066C4E"] });
//! let outcome = dispatcher.handle("datatakes", "new.datatake", body).await;
//! println!("{outcome}");
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod completeness;
pub mod config;
pub mod consolidation;
pub mod dispatcher;
pub mod document;
pub mod engine;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod report;
pub mod session;
pub mod store;

pub use config::{ConfigLoader, ConsolidatorConfig};
pub use dispatcher::{ConsolidationWorker, DispatchOutcome, MessageDispatcher};
pub use document::{Document, DocumentClass};
pub use engine::{Engine, EngineContext, EngineRegistry};
pub use error::{ConsolidationError, ErrorCategory, Result};
pub use messaging::{ConsolidationMessage, MessagingProvider};
pub use report::{Report, ReportKind};
pub use session::Session;
pub use store::{DocumentStore, InMemoryDocumentStore};
