//! # Session
//!
//! Per-message cache shared by every engine of a chain. Engines run strictly
//! one after the other on the same session, so a later engine sees whatever an
//! earlier one cached, including documents it just wrote.
//!
//! A session is owned by the worker handling the message and dropped with it.

use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use uuid::Uuid;

use crate::document::Document;
use crate::store::DocumentRef;

#[derive(Default)]
pub struct Session {
    message_id: Uuid,
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
    documents: HashMap<DocumentRef, Document>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("message_id", &self.message_id)
            .field("values", &self.values.keys().collect::<Vec<_>>())
            .field("documents", &self.documents.len())
            .finish()
    }
}

impl Session {
    pub fn new(message_id: Uuid) -> Self {
        Self {
            message_id,
            values: HashMap::new(),
            documents: HashMap::new(),
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Typed lookup; `None` when absent or stored under another type
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key).and_then(|value| value.downcast_mut::<T>())
    }

    pub fn get_or_insert_with<T, F>(&mut self, key: &str, init: F) -> &mut T
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let slot = match self.values.entry(key.to_string()) {
            Entry::Vacant(vacant) => vacant.insert(Box::new(init())),
            Entry::Occupied(occupied) => {
                let slot = occupied.into_mut();
                if !slot.is::<T>() {
                    *slot = Box::new(init());
                }
                slot
            }
        };
        slot.downcast_mut::<T>()
            .unwrap_or_else(|| unreachable!("slot holds T after reset"))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn cache_document(&mut self, document: Document) {
        self.documents.insert(document.document_ref(), document);
    }

    pub fn cached_document(&self, reference: &DocumentRef) -> Option<&Document> {
        self.documents.get(reference)
    }

    /// Cached document of `class` with this id, whatever its location
    pub fn cached_by_id(&self, class: &str, id: &str) -> Option<&Document> {
        self.documents
            .values()
            .find(|document| document.class == class && document.id == id)
    }

    pub fn forget_document(&mut self, reference: &DocumentRef) -> Option<Document> {
        self.documents.remove(reference)
    }

    pub fn cached_documents(&self) -> usize {
        self.documents.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_values() {
        let mut session = Session::new(Uuid::new_v4());
        session.insert("count", 3_usize);
        session.insert("name", "s1".to_string());

        assert_eq!(session.get::<usize>("count"), Some(&3));
        assert_eq!(session.get::<String>("name").map(String::as_str), Some("s1"));
        assert!(session.get::<u32>("count").is_none());
        assert!(session.get::<usize>("absent").is_none());

        *session.get_mut::<usize>("count").unwrap() += 1;
        assert_eq!(session.get::<usize>("count"), Some(&4));
    }

    #[test]
    fn test_get_or_insert_with_initializes_once() {
        let mut session = Session::new(Uuid::new_v4());
        session.get_or_insert_with("ids", Vec::<String>::new).push("a".into());
        session.get_or_insert_with("ids", Vec::<String>::new).push("b".into());
        assert_eq!(session.get::<Vec<String>>("ids").unwrap().len(), 2);
    }

    #[test]
    fn test_get_or_insert_with_replaces_other_type() {
        let mut session = Session::new(Uuid::new_v4());
        session.insert("ids", 7_u32);
        session.get_or_insert_with("ids", || vec!["a".to_string()]).push("b".into());
        assert_eq!(session.get::<Vec<String>>("ids").unwrap(), &vec!["a".to_string(), "b".to_string()]);
        assert!(session.get::<u32>("ids").is_none());
    }

    #[test]
    fn test_document_cache() {
        let mut session = Session::new(Uuid::new_v4());
        let doc = Document::new("product", "p1", "product-2024-01");
        let reference = doc.document_ref();
        session.cache_document(doc);

        assert!(session.cached_document(&reference).is_some());
        assert!(session.cached_by_id("product", "p1").is_some());
        assert!(session.cached_by_id("datatake", "p1").is_none());
        assert!(session.forget_document(&reference).is_some());
        assert_eq!(session.cached_documents(), 0);
    }
}
