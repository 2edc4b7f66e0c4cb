//! # Consolidation Messages
//!
//! Body of every message travelling between pipeline stages, inbound and
//! outbound alike.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConsolidationError, Result};
use crate::report::Report;

/// Queue priority used when a message does not carry one
pub const DEFAULT_PRIORITY: u8 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationMessage {
    /// Derived from the body when the sender did not set one, so every
    /// delivery of the same body carries the same id
    #[serde(default = "Uuid::new_v4")]
    pub message_id: Uuid,
    pub document_class: String,
    #[serde(default)]
    pub document_ids: Vec<String>,
    /// Storage locations holding the ids; empty means "search every location of the class"
    #[serde(default)]
    pub document_indices: Vec<String>,
    /// Ids of every message upstream of this one, oldest first
    #[serde(default)]
    pub ancestor_ids: Vec<Uuid>,
    /// Engine names that produced this message, oldest first
    #[serde(default)]
    pub pipeline: Vec<String>,
    /// Write even when the transform produced no change
    #[serde(default)]
    pub force: bool,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Set when an operator re-emits an old message by hand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reemitted_at: Option<DateTime<Utc>>,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

impl ConsolidationMessage {
    pub fn new(document_class: impl Into<String>, document_ids: Vec<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            document_class: document_class.into(),
            document_ids,
            document_indices: Vec::new(),
            ancestor_ids: Vec::new(),
            pipeline: Vec::new(),
            force: false,
            priority: DEFAULT_PRIORITY,
            created_at: Utc::now(),
            reemitted_at: None,
        }
    }

    pub fn with_indices(mut self, indices: Vec<String>) -> Self {
        self.document_indices = indices;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Outbound message for a report, carrying the inbound message's lineage
    pub fn from_report(report: &Report, parent: &ConsolidationMessage, engines: &[String]) -> Self {
        let mut ancestor_ids = parent.ancestor_ids.clone();
        ancestor_ids.push(parent.message_id);
        let mut pipeline = parent.pipeline.clone();
        pipeline.extend(engines.iter().cloned());

        Self {
            message_id: Uuid::new_v4(),
            document_class: report.document_class.clone(),
            document_ids: report.ids.clone(),
            document_indices: report.locations.clone(),
            ancestor_ids,
            pipeline,
            force: parent.force,
            priority: parent.priority,
            created_at: Utc::now(),
            reemitted_at: None,
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        Self::from_json(serde_json::from_slice(body)?)
    }

    pub fn from_json(mut value: serde_json::Value) -> Result<Self> {
        if let serde_json::Value::Object(fields) = &mut value {
            if !fields.contains_key("message_id") {
                let canonical = serde_json::to_vec(&*fields)?;
                let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, &canonical);
                fields.insert("message_id".to_string(), serde_json::Value::String(id.to_string()));
            }
        }
        let message: Self = serde_json::from_value(value)?;
        message.validate()?;
        Ok(message)
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn validate(&self) -> Result<()> {
        if self.document_class.trim().is_empty() {
            return Err(ConsolidationError::invalid_payload("document_class is empty"));
        }
        if self.document_ids.iter().any(|id| id.is_empty()) {
            return Err(ConsolidationError::invalid_payload("document_ids contains an empty id"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ReportKind;

    #[test]
    fn test_decode_applies_defaults() {
        let body = br#"{"document_class":"raw-dd-product","document_ids":["a","b"]}"#;
        let message = ConsolidationMessage::decode(body).unwrap();
        assert_eq!(message.document_ids, vec!["a", "b"]);
        assert_eq!(message.priority, DEFAULT_PRIORITY);
        assert!(!message.force);
        assert!(message.ancestor_ids.is_empty());
    }

    #[test]
    fn test_message_id_is_stable_across_deliveries() {
        let body = br#"{"document_class":"raw-dd-product","document_ids":["a"]}"#;
        let first = ConsolidationMessage::decode(body).unwrap();
        let second = ConsolidationMessage::decode(body).unwrap();
        assert_eq!(first.message_id, second.message_id);

        let other = ConsolidationMessage::decode(br#"{"document_class":"raw-dd-product","document_ids":["b"]}"#).unwrap();
        assert_ne!(first.message_id, other.message_id);

        let explicit = ConsolidationMessage::new("product", vec!["p".into()]);
        let decoded = ConsolidationMessage::from_json(explicit.to_json().unwrap()).unwrap();
        assert_eq!(decoded.message_id, explicit.message_id);
    }

    #[test]
    fn test_decode_rejects_malformed_bodies() {
        assert!(ConsolidationMessage::decode(b"not json").is_err());
        assert!(ConsolidationMessage::decode(br#"{"document_ids":["a"]}"#).is_err());
        assert!(ConsolidationMessage::decode(br#"{"document_class":" ","document_ids":[]}"#).is_err());
        assert!(ConsolidationMessage::decode(br#"{"document_class":"x","document_ids":[""]}"#).is_err());
    }

    #[test]
    fn test_outbound_lineage() {
        let mut parent = ConsolidationMessage::new("raw-dd-product", vec!["a".into()]);
        parent.pipeline = vec!["ingest".into()];
        let mut report = Report::new(ReportKind::New, "product");
        report.push("p1", "product-2024-01");

        let outbound = ConsolidationMessage::from_report(&report, &parent, &["product".to_string()]);
        assert_eq!(outbound.ancestor_ids, vec![parent.message_id]);
        assert_eq!(outbound.pipeline, vec!["ingest", "product"]);
        assert_eq!(outbound.document_indices, vec!["product-2024-01"]);
        assert_ne!(outbound.message_id, parent.message_id);
    }
}
