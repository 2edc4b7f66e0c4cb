//! # Message Dispatcher
//!
//! Turns one inbound queue message into engine runs and outbound report
//! messages, then settles the inbound message.
//!
//! ## Features
//!
//! - **Binding resolution**: the (input queue, routing key) pair selects one
//!   engine chain; engines that do not accept the message's class are skipped
//! - **Shared session**: every engine of a chain sees the same [`Session`], so
//!   documents read or written upstream are not fetched again
//! - **Report fan-out**: reports are merged, split into chunks and published to
//!   every queue bound to their action before the inbound message is acked
//! - **Failure routing**: [`ErrorCategory`] decides between requeue and
//!   dead-letter; nothing is ever acked on failure
//!
//! [`ConsolidationWorker`] is the polling loop around a dispatcher for one
//! input queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{DispatcherConfig, MessagingConfig};
use crate::engine::{EngineChain, EngineContext, EngineSettings};
use crate::error::{ConsolidationError, ErrorCategory, Result};
use crate::messaging::{ConsolidationMessage, MessagingProvider, QueueRouter, QueuedMessage, RoutedMessage};
use crate::report::{merge_reports, Report};
use crate::session::Session;
use crate::store::DocumentStore;

/// How an inbound message is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Processed and every report published
    Ack,
    /// Returned to its queue for another attempt
    Requeue,
    /// Dead-lettered
    Reject,
}

impl DispatchOutcome {
    pub fn for_error(err: &ConsolidationError) -> Self {
        if err.category().is_requeue_safe() {
            DispatchOutcome::Requeue
        } else {
            DispatchOutcome::Reject
        }
    }
}

impl std::fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchOutcome::Ack => write!(f, "ack"),
            DispatchOutcome::Requeue => write!(f, "requeue"),
            DispatchOutcome::Reject => write!(f, "reject"),
        }
    }
}

pub struct MessageDispatcher {
    chains: HashMap<String, EngineChain>,
    router: QueueRouter,
    messaging: Arc<MessagingProvider>,
    store: Arc<dyn DocumentStore>,
    config: DispatcherConfig,
}

impl std::fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDispatcher")
            .field("chains", &self.chains.len())
            .field("messaging", &self.messaging.provider_name())
            .field("store", &self.store.backend_name())
            .field("config", &self.config)
            .finish()
    }
}

impl MessageDispatcher {
    pub fn new(
        chains: Vec<EngineChain>,
        messaging: Arc<MessagingProvider>,
        store: Arc<dyn DocumentStore>,
        config: DispatcherConfig,
    ) -> Self {
        let bindings = chains.iter().map(|chain| chain.binding().clone()).collect();
        let router = QueueRouter::new(bindings, config.output_queue.clone());
        let chains = chains
            .into_iter()
            .map(|chain| (chain.binding().routing_key.clone(), chain))
            .collect();
        Self {
            chains,
            router,
            messaging,
            store,
            config,
        }
    }

    pub fn router(&self) -> &QueueRouter {
        &self.router
    }

    /// Every queue the dispatcher reads from or publishes to
    pub fn queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = Vec::new();
        for binding in self.router.bindings() {
            if !queues.contains(&binding.input_queue) {
                queues.push(binding.input_queue.clone());
            }
        }
        if let Some(output) = &self.config.output_queue {
            if !queues.contains(output) {
                queues.push(output.clone());
            }
        }
        queues
    }

    /// Process one message body and decide how to settle it
    pub async fn handle(&self, input_queue: &str, routing_key: &str, body: Value) -> DispatchOutcome {
        match self.process(input_queue, routing_key, body).await {
            Ok(published) => {
                debug!(queue = %input_queue, routing_key = %routing_key, published = published, "Message processed");
                DispatchOutcome::Ack
            }
            Err(err) => {
                let category = err.category();
                let outcome = DispatchOutcome::for_error(&err);
                match category {
                    _ if category.is_requeue_safe() => warn!(
                        queue = %input_queue,
                        routing_key = %routing_key,
                        category = %category,
                        error = %err,
                        "Message processing failed, requeueing"
                    ),
                    ErrorCategory::Unclassified => error!(
                        queue = %input_queue,
                        routing_key = %routing_key,
                        category = %category,
                        critical = true,
                        error = %err,
                        "Unclassified failure, rejecting message"
                    ),
                    _ => error!(
                        queue = %input_queue,
                        routing_key = %routing_key,
                        category = %category,
                        error = %err,
                        "Message processing failed, rejecting"
                    ),
                }
                outcome
            }
        }
    }

    /// Run the bound chain and publish its reports; returns messages published
    pub async fn process(&self, input_queue: &str, routing_key: &str, body: Value) -> Result<usize> {
        let message = ConsolidationMessage::from_json(body)?;
        let chain = self
            .router
            .binding_for(input_queue, routing_key)
            .and_then(|binding| self.chains.get(&binding.routing_key))
            .ok_or_else(|| ConsolidationError::UnboundRoutingKey {
                routing_key: routing_key.to_string(),
            })?;

        let reports = self.run_chain(chain, routing_key, &message).await?;
        if !chain.binding().send_reports {
            debug!(routing_key = %routing_key, reports = reports.len(), "Report publishing disabled for binding");
            return Ok(0);
        }
        self.publish(chain, &message, reports).await
    }

    async fn run_chain(
        &self,
        chain: &EngineChain,
        routing_key: &str,
        message: &ConsolidationMessage,
    ) -> Result<Vec<Report>> {
        let mut session = Session::new(message.message_id);
        let settings = EngineSettings::for_message(chain.binding(), message);
        let mut reports = Vec::new();

        for engine in chain.engines() {
            if !engine.accepts(&message.document_class) {
                debug!(
                    engine = %engine.name(),
                    document_class = %message.document_class,
                    "Engine does not accept class, skipping"
                );
                continue;
            }
            let mut ctx = EngineContext::new(
                routing_key,
                message,
                &mut session,
                Arc::clone(&self.store),
                settings,
            );
            let produced = engine.run(&mut ctx).await?;
            debug!(engine = %engine.name(), reports = produced.len(), "Engine finished");
            reports.extend(produced);
        }
        Ok(merge_reports(reports))
    }

    async fn publish(
        &self,
        chain: &EngineChain,
        parent: &ConsolidationMessage,
        reports: Vec<Report>,
    ) -> Result<usize> {
        let chunk_size = chain
            .binding()
            .chunk_size
            .unwrap_or(self.config.report_chunk_size);
        let engines = chain.names();
        let mut published = 0;

        for report in reports {
            for part in report.split(chunk_size) {
                let outbound = ConsolidationMessage::from_report(&part, parent, &engines);
                let routed = RoutedMessage::new(part.action.clone(), outbound.to_json()?);
                for queue in self.router.destinations(&part.action) {
                    self.messaging.send_message(&queue, &routed).await?;
                    published += 1;
                }
                info!(
                    action = %part.action,
                    ids = part.ids.len(),
                    message_id = %outbound.message_id,
                    "Report published"
                );
            }
        }
        Ok(published)
    }
}

/// Polling loop feeding one input queue into a [`MessageDispatcher`]
#[derive(Debug)]
pub struct ConsolidationWorker {
    worker_id: usize,
    queue: String,
    dispatcher: Arc<MessageDispatcher>,
    messaging: Arc<MessagingProvider>,
    config: MessagingConfig,
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl ConsolidationWorker {
    pub fn new(
        worker_id: usize,
        queue: impl Into<String>,
        dispatcher: Arc<MessageDispatcher>,
        messaging: Arc<MessagingProvider>,
        config: MessagingConfig,
    ) -> Self {
        Self {
            worker_id,
            queue: queue.into(),
            dispatcher,
            messaging,
            config,
            running: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start polling on a new task
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        self.stop_requested.store(false, Ordering::Release);
        self.running.store(true, Ordering::Release);
        tokio::spawn(async move { self.run().await })
    }

    /// Ask the loop to exit after the message in flight
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.running.store(false, Ordering::Release);
        self.shutdown_notify.notify_waiters();
    }

    /// Receive one batch and settle every message in it
    ///
    /// Once `stop` is called, messages of the batch not yet started are
    /// requeued instead of handled.
    pub async fn poll_once(&self) -> Result<usize> {
        let visibility = Duration::from_secs(u64::from(self.config.visibility_timeout_seconds));
        let batch = self
            .messaging
            .receive_messages::<Value>(&self.queue, self.config.batch_size, visibility)
            .await?;
        let received = batch.len();

        let mut released = 0usize;
        for queued in batch {
            if self.stop_requested.load(Ordering::Acquire) {
                self.messaging
                    .nack_message(&self.queue, &queued.receipt_handle, true)
                    .await?;
                released += 1;
                continue;
            }
            self.settle(queued).await?;
        }
        if released > 0 {
            info!(
                worker_id = self.worker_id,
                queue = %self.queue,
                released = released,
                "Stopping, requeued unstarted messages"
            );
        }
        Ok(received)
    }

    async fn settle(&self, queued: QueuedMessage<Value>) -> Result<()> {
        let receipt = queued.receipt_handle.clone();
        let outcome = match serde_json::from_value::<RoutedMessage>(queued.message) {
            Ok(routed) => {
                self.dispatcher
                    .handle(&self.queue, &routed.routing_key, routed.body)
                    .await
            }
            Err(err) => {
                error!(
                    worker_id = self.worker_id,
                    queue = %self.queue,
                    error = %err,
                    "Message envelope has no routing key, rejecting"
                );
                DispatchOutcome::Reject
            }
        };

        debug!(
            worker_id = self.worker_id,
            queue = %self.queue,
            receipt = %receipt.as_str(),
            receive_count = queued.receive_count,
            outcome = %outcome,
            "Settling message"
        );
        match outcome {
            DispatchOutcome::Ack => self.messaging.ack_message(&self.queue, &receipt).await?,
            DispatchOutcome::Requeue => self.messaging.nack_message(&self.queue, &receipt, true).await?,
            DispatchOutcome::Reject => self.messaging.nack_message(&self.queue, &receipt, false).await?,
        }
        Ok(())
    }

    async fn run(&self) {
        info!(worker_id = self.worker_id, queue = %self.queue, "Worker started");

        while self.is_running() {
            let wait = match self.poll_once().await {
                Ok(0) => self.config.poll_interval(),
                Ok(_) => continue,
                Err(err) => {
                    error!(worker_id = self.worker_id, queue = %self.queue, error = %err, "Poll failed");
                    self.config.poll_interval().max(Duration::from_secs(1))
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {},
                _ = self.shutdown_notify.notified() => {
                    debug!(worker_id = self.worker_id, "Shutdown notification received");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::Release);
        info!(worker_id = self.worker_id, queue = %self.queue, "Worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineBinding;
    use crate::engine::{Engine, EngineRegistry};
    use crate::messaging::InMemoryMessagingService;
    use crate::report::ReportKind;
    use crate::store::InMemoryDocumentStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct Stub {
        name: &'static str,
        classes: &'static [&'static str],
        outcome: fn() -> Result<Vec<Report>>,
    }

    #[async_trait]
    impl Engine for Stub {
        fn name(&self) -> &str {
            self.name
        }

        fn input_classes(&self) -> &[&'static str] {
            self.classes
        }

        async fn run(&self, ctx: &mut EngineContext<'_>) -> Result<Vec<Report>> {
            ctx.session.insert(self.name, true);
            (self.outcome)()
        }
    }

    fn one_product() -> Result<Vec<Report>> {
        let mut report = Report::new(ReportKind::New, "product");
        report.push("p-1", "product-2024-05");
        Ok(vec![report])
    }

    fn conflict() -> Result<Vec<Report>> {
        Err(ConsolidationError::WriteConflict { conflicts: Vec::new() })
    }

    fn dispatcher(
        engine: Stub,
        binding: EngineBinding,
    ) -> (MessageDispatcher, Arc<InMemoryMessagingService>) {
        let service = Arc::new(InMemoryMessagingService::with_queues(&["raw", "products"]));
        let messaging = Arc::new(MessagingProvider::InMemory(Arc::clone(&service)));
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(engine)).unwrap();
        let chains = registry
            .build_chains(&[binding, EngineBinding::new("*.product", "products", &["stub"])])
            .unwrap();
        let dispatcher = MessageDispatcher::new(
            chains,
            messaging,
            Arc::new(InMemoryDocumentStore::new()),
            DispatcherConfig::default(),
        );
        (dispatcher, service)
    }

    fn body() -> Value {
        json!({ "document_class": "raw-dd-product", "document_ids": ["a"] })
    }

    #[tokio::test]
    async fn test_reports_published_before_ack() {
        let stub = Stub { name: "stub", classes: &[], outcome: one_product };
        let (dispatcher, service) = dispatcher(stub, EngineBinding::new("new.raw-dd-product", "raw", &["stub"]));

        let outcome = dispatcher.handle("raw", "new.raw-dd-product", body()).await;
        assert_eq!(outcome, DispatchOutcome::Ack);

        let published = service.peek_messages("products").await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0]["routing_key"], json!("new.product"));
        assert_eq!(published[0]["body"]["document_ids"], json!(["p-1"]));
        assert_eq!(published[0]["body"]["pipeline"], json!(["stub"]));
    }

    #[tokio::test]
    async fn test_conflict_requeues_and_publishes_nothing() {
        let stub = Stub { name: "stub", classes: &[], outcome: conflict };
        let (dispatcher, service) = dispatcher(stub, EngineBinding::new("new.raw-dd-product", "raw", &["stub"]));

        let outcome = dispatcher.handle("raw", "new.raw-dd-product", body()).await;
        assert_eq!(outcome, DispatchOutcome::Requeue);
        assert_eq!(service.queue_length("products").await, 0);
    }

    #[tokio::test]
    async fn test_malformed_and_unbound_messages_are_rejected() {
        let stub = Stub { name: "stub", classes: &[], outcome: one_product };
        let (dispatcher, _) = dispatcher(stub, EngineBinding::new("new.raw-dd-product", "raw", &["stub"]));

        let malformed = dispatcher.handle("raw", "new.raw-dd-product", json!({ "ids": 3 })).await;
        assert_eq!(malformed, DispatchOutcome::Reject);

        let unbound = dispatcher.handle("raw", "delete.raw-dd-product", body()).await;
        assert_eq!(unbound, DispatchOutcome::Reject);
    }

    #[tokio::test]
    async fn test_engine_skipped_for_foreign_class() {
        let stub = Stub { name: "stub", classes: &["datatake"], outcome: one_product };
        let (dispatcher, service) = dispatcher(stub, EngineBinding::new("new.raw-dd-product", "raw", &["stub"]));

        let outcome = dispatcher.handle("raw", "new.raw-dd-product", body()).await;
        assert_eq!(outcome, DispatchOutcome::Ack);
        assert_eq!(service.queue_length("products").await, 0);
    }

    #[tokio::test]
    async fn test_worker_settles_batch() {
        let stub = Stub { name: "stub", classes: &[], outcome: one_product };
        let (dispatcher, service) = dispatcher(stub, EngineBinding::new("new.raw-dd-product", "raw", &["stub"]));
        let messaging = Arc::new(MessagingProvider::InMemory(Arc::clone(&service)));

        messaging
            .send_message("raw", &RoutedMessage::new("new.raw-dd-product", body()))
            .await
            .unwrap();
        messaging.send_message("raw", &json!({ "no": "envelope" })).await.unwrap();

        let worker = ConsolidationWorker::new(0, "raw", Arc::new(dispatcher), messaging, MessagingConfig::default());
        assert_eq!(worker.poll_once().await.unwrap(), 2);

        let counters = service.counters("raw").await;
        assert_eq!(counters.acked, 1);
        assert_eq!(counters.dead_lettered, 1);
        assert_eq!(service.queue_length("products").await, 1);
    }

    #[tokio::test]
    async fn test_stopped_worker_requeues_unstarted_messages() {
        let stub = Stub { name: "stub", classes: &[], outcome: one_product };
        let (dispatcher, service) = dispatcher(stub, EngineBinding::new("new.raw-dd-product", "raw", &["stub"]));
        let messaging = Arc::new(MessagingProvider::InMemory(Arc::clone(&service)));
        for _ in 0..3 {
            messaging
                .send_message("raw", &RoutedMessage::new("new.raw-dd-product", body()))
                .await
                .unwrap();
        }

        let worker = ConsolidationWorker::new(0, "raw", Arc::new(dispatcher), messaging, MessagingConfig::default());
        worker.stop();
        assert_eq!(worker.poll_once().await.unwrap(), 3);

        let counters = service.counters("raw").await;
        assert_eq!(counters.acked, 0);
        assert_eq!(counters.requeued, 3);
        assert_eq!(service.queue_length("raw").await, 3);
        assert_eq!(service.queue_length("products").await, 0);
    }

    #[tokio::test]
    async fn test_worker_stops_on_request() {
        let stub = Stub { name: "stub", classes: &[], outcome: one_product };
        let (dispatcher, service) = dispatcher(stub, EngineBinding::new("new.raw-dd-product", "raw", &["stub"]));
        let messaging = Arc::new(MessagingProvider::InMemory(service));
        let worker = Arc::new(ConsolidationWorker::new(
            0,
            "raw",
            Arc::new(dispatcher),
            messaging,
            MessagingConfig::default(),
        ));

        let handle = Arc::clone(&worker).spawn();
        assert!(worker.is_running());
        worker.stop();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert!(!worker.is_running());
    }
}
