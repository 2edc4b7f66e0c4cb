//! # Engines
//!
//! An [`Engine`] is one unit of business transform bound to a set of input
//! document classes. The dispatcher runs the engines bound to a routing key one
//! after the other over a shared [`Session`], collecting the [`Report`]s each
//! returns.
//!
//! ## Architecture
//!
//! ```text
//! Engine (trait, object safe)
//!   ├── DataEngine          <- load inputs, version-guarded bulk write, reports
//!   └── RawDataEngine<C>    <- 1:1 consolidation over a RawConsolidator
//! ```
//!
//! Concrete engines compose [`DataEngine`] for their write path and register
//! with an [`EngineRegistry`] under a unique name.

mod data_engine;
mod handlers;
mod raw_data_engine;
mod registry;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EngineBinding, MissingInputPolicy, StoreErrorPolicy};
use crate::error::Result;
use crate::messaging::ConsolidationMessage;
use crate::report::Report;
use crate::session::Session;
use crate::store::DocumentStore;

pub use data_engine::{BulkSummary, DataEngine, DocumentWrite};
pub use handlers::HandlerTable;
pub use raw_data_engine::{RawConsolidator, RawDataEngine};
pub use registry::{EngineChain, EngineRegistry};

/// Per-binding behavior switches handed to every engine run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub missing_input_policy: MissingInputPolicy,
    pub on_store_error: StoreErrorPolicy,
    /// Write targets even when the transform left them unchanged
    pub force: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            missing_input_policy: MissingInputPolicy::Requeue,
            on_store_error: StoreErrorPolicy::Retry,
            force: false,
        }
    }
}

impl EngineSettings {
    pub fn for_message(binding: &EngineBinding, message: &ConsolidationMessage) -> Self {
        Self {
            missing_input_policy: binding.missing_input_policy,
            on_store_error: binding.on_store_error,
            force: message.force,
        }
    }
}

/// Everything an engine sees while handling one message
pub struct EngineContext<'a> {
    pub routing_key: &'a str,
    pub message: &'a ConsolidationMessage,
    pub session: &'a mut Session,
    pub store: Arc<dyn DocumentStore>,
    pub settings: EngineSettings,
}

impl<'a> EngineContext<'a> {
    pub fn new(
        routing_key: &'a str,
        message: &'a ConsolidationMessage,
        session: &'a mut Session,
        store: Arc<dyn DocumentStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            routing_key,
            message,
            session,
            store,
            settings,
        }
    }
}

impl std::fmt::Debug for EngineContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("routing_key", &self.routing_key)
            .field("message_id", &self.message.message_id)
            .field("document_class", &self.message.document_class)
            .field("store", &self.store.backend_name())
            .field("settings", &self.settings)
            .finish()
    }
}

#[async_trait]
pub trait Engine: Send + Sync {
    /// Unique name, recorded in the outbound `pipeline` chain
    fn name(&self) -> &str;

    /// Document classes this engine consumes; empty accepts any class
    fn input_classes(&self) -> &[&'static str];

    fn accepts(&self, document_class: &str) -> bool {
        let classes = self.input_classes();
        classes.is_empty() || classes.contains(&document_class)
    }

    /// Transform the message's documents and write the results
    ///
    /// Returns one report per (class, action) written. Any error aborts the
    /// rest of the chain for this message.
    async fn run(&self, ctx: &mut EngineContext<'_>) -> Result<Vec<Report>>;
}

impl std::fmt::Debug for dyn Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name())
            .field("input_classes", &self.input_classes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Engine for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn input_classes(&self) -> &[&'static str] {
            &["product"]
        }

        async fn run(&self, _ctx: &mut EngineContext<'_>) -> Result<Vec<Report>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_accepts_declared_classes_only() {
        let engine = Noop;
        assert!(engine.accepts("product"));
        assert!(!engine.accepts("datatake"));
    }

    #[test]
    fn test_settings_follow_binding_and_message() {
        let mut binding = EngineBinding::new("new.raw-dd-product", "raw_products", &["product"]);
        binding.missing_input_policy = MissingInputPolicy::Drop;
        let message = ConsolidationMessage::new("raw-dd-product", vec!["a".into()]).with_force(true);

        let settings = EngineSettings::for_message(&binding, &message);
        assert_eq!(settings.missing_input_policy, MissingInputPolicy::Drop);
        assert_eq!(settings.on_store_error, StoreErrorPolicy::Retry);
        assert!(settings.force);
    }
}
