//! Explicit handler tables: document type tag → handler, with an optional
//! default used for tags nobody registered.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ConsolidationError, Result};

#[derive(Debug, Clone)]
pub struct HandlerTable<H> {
    handlers: HashMap<String, H>,
    default: Option<H>,
}

impl<H> Default for HandlerTable<H> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            default: None,
        }
    }
}

impl<H> HandlerTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `tag`, replacing any earlier registration
    pub fn register(mut self, tag: impl Into<String>, handler: H) -> Self {
        let tag = tag.into();
        if self.handlers.insert(tag.clone(), handler).is_some() {
            debug!(tag = %tag, "Replaced handler registration");
        }
        self
    }

    pub fn with_default(mut self, handler: H) -> Self {
        self.default = Some(handler);
        self
    }

    /// Handler for `tag`, else the default
    pub fn resolve(&self, tag: &str) -> Result<&H> {
        self.handlers
            .get(tag)
            .or(self.default.as_ref())
            .ok_or_else(|| ConsolidationError::HandlerNotFound {
                tag: tag.to_string(),
            })
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.handlers.contains_key(tag)
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Registered tags, sorted
    pub fn registered_tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}
