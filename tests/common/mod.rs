//! Shared fixtures for the integration tests: an in-memory store and queue
//! pair wired to a dispatcher, plus document seeding helpers.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Map, Value};

use consolidation_core::collaborators::{CachedNameParser, NoTiles};
use consolidation_core::completeness::ExpectedValueLookup;
use consolidation_core::config::{CompletenessConfig, DispatcherConfig, EngineBinding, MessagingConfig};
use consolidation_core::consolidation::default_registry;
use consolidation_core::dispatcher::{ConsolidationWorker, MessageDispatcher};
use consolidation_core::messaging::{InMemoryMessagingService, MessagingProvider, RoutedMessage};
use consolidation_core::store::InMemoryDocumentStore;

pub const PRODUCT_NAME: &str =
    "S1A_IW_RAW__0SDV_20240501T101010_20240501T101040_053000_066C4E_ABCD.SAFE.zip";
pub const DATATAKE_KEY: &str = "S1A-066C4E";

pub struct Harness {
    pub store: Arc<InMemoryDocumentStore>,
    pub service: Arc<InMemoryMessagingService>,
    pub messaging: Arc<MessagingProvider>,
    pub dispatcher: Arc<MessageDispatcher>,
}

impl Harness {
    pub async fn new(bindings: Vec<EngineBinding>) -> Self {
        Self::with_config(bindings, DispatcherConfig::default()).await
    }

    pub async fn with_config(bindings: Vec<EngineBinding>, config: DispatcherConfig) -> Self {
        let store = Arc::new(InMemoryDocumentStore::new());
        let (provider, service) = MessagingProvider::in_memory();
        let messaging = Arc::new(provider);

        let registry = default_registry(
            Arc::new(ExpectedValueLookup::default()),
            CachedNameParser::default(),
            Arc::new(NoTiles),
            &CompletenessConfig::default(),
        )
        .expect("registry");
        let chains = registry.build_chains(&bindings).expect("chains");
        let dispatcher = Arc::new(MessageDispatcher::new(
            chains,
            Arc::clone(&messaging),
            store.clone(),
            config,
        ));
        messaging
            .ensure_queues(&dispatcher.queues())
            .await
            .expect("queues");

        Self {
            store,
            service,
            messaging,
            dispatcher,
        }
    }

    /// Default product pipeline bindings
    pub async fn pipeline() -> Self {
        Self::new(vec![
            EngineBinding::new("new.raw-dd-product", "raw", &["product"]),
            EngineBinding::new("*.product", "products", &["datatake-completeness"]),
            EngineBinding::new("*.datatake", "datatakes", &["orbit-placeholder"]),
        ])
        .await
    }

    pub async fn send(&self, queue: &str, routing_key: &str, body: Value) {
        self.messaging
            .send_message(queue, &RoutedMessage::new(routing_key, body))
            .await
            .expect("send");
    }

    pub fn worker(&self, queue: &str) -> ConsolidationWorker {
        ConsolidationWorker::new(
            0,
            queue,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.messaging),
            MessagingConfig::default(),
        )
    }

    /// Drain one batch from `queue`, returning the number of messages handled
    pub async fn drain(&self, queue: &str) -> usize {
        self.worker(queue).poll_once().await.expect("poll")
    }
}

pub fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("object")
}

pub fn seed_datatake(store: &InMemoryDocumentStore) {
    store.insert(
        "datatake-2024-05",
        DATATAKE_KEY,
        object(json!({
            "datatake_id": "421966",
            "satellite_unit": "S1A",
            "mission": "S1",
            "cycle_number": 10,
            "relative_orbit": 170,
            "observation_time_start": "2024-05-01T10:10:00Z",
            "observation_time_end": "2024-05-01T10:20:00Z",
        })),
    );
}

pub fn seed_raw(store: &InMemoryDocumentStore, id: &str, interface: &str, published: &str) {
    store.insert(
        "raw-dd-product-2024-05",
        id,
        object(json!({
            "product_name": PRODUCT_NAME,
            "interface_name": interface,
            "publication_date": published,
            "product_size": 1024,
        })),
    );
}

pub fn raw_message(ids: &[&str]) -> Value {
    json!({
        "document_class": "raw-dd-product",
        "document_ids": ids,
    })
}
