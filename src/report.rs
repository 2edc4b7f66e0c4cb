//! # Reports
//!
//! A [`Report`] says "these ids of this class changed by this action". Engines
//! emit one per (class, action) after a successful write; the dispatcher merges
//! same-action reports and splits oversized ones before publishing.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConsolidationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    New,
    Update,
    Delete,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportKind::New => write!(f, "new"),
            ReportKind::Update => write!(f, "update"),
            ReportKind::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// `"{kind}.{document_class}"`, used as the outbound routing key
    pub action: String,
    pub document_class: String,
    /// Ordered, no duplicates
    pub ids: Vec<String>,
    /// Storage locations actually touched, no duplicates
    pub locations: Vec<String>,
}

impl Report {
    pub fn new(kind: ReportKind, document_class: impl Into<String>) -> Self {
        let document_class = document_class.into();
        Self {
            action: format!("{kind}.{document_class}"),
            document_class,
            ids: Vec::new(),
            locations: Vec::new(),
        }
    }

    pub fn with_action(action: impl Into<String>, document_class: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            document_class: document_class.into(),
            ids: Vec::new(),
            locations: Vec::new(),
        }
    }

    pub fn push(&mut self, id: impl Into<String>, location: impl Into<String>) {
        let id = id.into();
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
        let location = location.into();
        if !self.locations.contains(&location) {
            self.locations.push(location);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Order-preserving deduplicated union with another report of the same action
    pub fn merge(&mut self, other: Report) -> Result<()> {
        if other.action != self.action || other.document_class != self.document_class {
            return Err(ConsolidationError::internal(format!(
                "cannot merge report {} into {}",
                other.action, self.action
            )));
        }

        let mut seen: HashSet<String> = self.ids.iter().cloned().collect();
        for id in other.ids {
            if seen.insert(id.clone()) {
                self.ids.push(id);
            }
        }
        for location in other.locations {
            if !self.locations.contains(&location) {
                self.locations.push(location);
            }
        }
        Ok(())
    }

    /// Chunks of at most `chunk_size` ids whose concatenation is the original
    /// sequence. A zero chunk size disables splitting.
    pub fn split(self, chunk_size: usize) -> Vec<Report> {
        if chunk_size == 0 || self.ids.len() <= chunk_size {
            return if self.ids.is_empty() { Vec::new() } else { vec![self] };
        }

        self.ids
            .chunks(chunk_size)
            .map(|ids| Report {
                action: self.action.clone(),
                document_class: self.document_class.clone(),
                ids: ids.to_vec(),
                locations: self.locations.clone(),
            })
            .collect()
    }
}

/// Merge reports sharing an action, keeping first-seen order of actions
pub fn merge_reports(reports: Vec<Report>) -> Vec<Report> {
    let mut merged: Vec<Report> = Vec::new();
    for report in reports {
        match merged
            .iter_mut()
            .find(|existing| existing.action == report.action && existing.document_class == report.document_class)
        {
            Some(existing) => {
                // Same action and class, merge cannot fail
                let _ = existing.merge(report);
            }
            None => merged.push(report),
        }
    }
    merged
}
