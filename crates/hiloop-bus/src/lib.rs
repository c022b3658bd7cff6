//! Bounded in-process event bus (spec §4.6).
//!
//! Single producer API, single consumer task, concurrent fan-out to every
//! handler subscribed to an event type. Delivery is at-least-once within a
//! process and lossy on crash — the engine persists the state change the
//! event describes *before* publishing, so a lost event never loses state,
//! only a downstream side effect (a chat notification, a DLQ replay).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use hiloop_core::{EventType, HiloopError, JsonMap, Result};
use hiloop_db::DlqRepository;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// An event in flight on the bus. `id` stands in for the original
/// implementation's `id(payload)` object-identity trick — Rust payloads
/// don't have a stable address once moved onto the channel, so each
/// published event is assigned a fresh id at publish time instead.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub id: Uuid,
    pub event_type: EventType,
    pub payload: JsonMap,
    pub workflow_id: Option<Uuid>,
}

impl BusEvent {
    fn fingerprint(&self) -> String {
        format!("{}||{}", self.event_type, self.id)
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &BusEvent) -> Result<()>;

    /// Used only in logs and `get_stats()`'s handler count.
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy)]
pub struct EventBusConfig {
    pub max_queue_size: usize,
    pub max_retries: u32,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { max_queue_size: 1000, max_retries: 3 }
    }
}

#[derive(Debug, Clone)]
pub struct BusStats {
    pub running: bool,
    pub queue_size: usize,
    pub max_queue_size: usize,
    pub event_types: usize,
    pub total_handlers: usize,
}

type HandlerMap = Arc<DashMap<String, Vec<Arc<dyn EventHandler>>>>;

/// The producer half: publish and subscribe. Cheap to clone — shares its
/// state with every clone and with the [`EventBusProcessor`].
#[derive(Clone)]
pub struct EventBus {
    sender: mpsc::Sender<BusEvent>,
    handlers: HandlerMap,
    queue_size: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
    config: EventBusConfig,
}

impl EventBus {
    pub fn new(config: EventBusConfig, dlq: DlqRepository) -> (Self, EventBusProcessor) {
        let (sender, receiver) = mpsc::channel(config.max_queue_size);
        let handlers: HandlerMap = Arc::new(DashMap::new());
        let queue_size = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicBool::new(false));

        let bus = Self {
            sender,
            handlers: handlers.clone(),
            queue_size: queue_size.clone(),
            running: running.clone(),
            config,
        };
        let processor = EventBusProcessor {
            receiver,
            handlers,
            retry_counts: Arc::new(DashMap::new()),
            max_retries: config.max_retries,
            dlq,
            queue_size,
            running,
        };
        (bus, processor)
    }

    pub fn subscribe(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(event_type.into()).or_default().push(handler);
    }

    /// Enqueues `event_type`/`payload` for delivery. Fails with
    /// `UpstreamUnavailable` if the queue is at capacity — back-pressure to
    /// the caller rather than an unbounded buffer.
    pub async fn publish(
        &self,
        event_type: impl Into<EventType>,
        payload: JsonMap,
        workflow_id: Option<Uuid>,
    ) -> Result<()> {
        let event = BusEvent { id: Uuid::new_v4(), event_type: event_type.into(), payload, workflow_id };

        match self.sender.try_send(event) {
            Ok(()) => {
                self.queue_size.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("event bus queue full, rejecting publish");
                Err(HiloopError::UpstreamUnavailable { reason: "event bus queue full".to_string() })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(HiloopError::Internal("event bus consumer stopped".to_string()))
            }
        }
    }

    pub fn get_stats(&self) -> BusStats {
        let total_handlers = self.handlers.iter().map(|e| e.value().len()).sum();
        BusStats {
            running: self.running.load(Ordering::SeqCst),
            queue_size: self.queue_size.load(Ordering::SeqCst),
            max_queue_size: self.config.max_queue_size,
            event_types: self.handlers.len(),
            total_handlers,
        }
    }
}

/// The consumer half: owns the receiving end of the channel and drives the
/// dequeue-fan-out-retry loop. Spawned once as a background task.
pub struct EventBusProcessor {
    receiver: mpsc::Receiver<BusEvent>,
    handlers: HandlerMap,
    retry_counts: Arc<DashMap<String, u32>>,
    max_retries: u32,
    dlq: DlqRepository,
    queue_size: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
}

impl EventBusProcessor {
    /// Runs until the sender side is dropped or `shutdown` resolves,
    /// whichever comes first. Drains no further than the event currently
    /// in hand: in-flight handlers are allowed to finish, nothing new is
    /// dequeued once `shutdown` fires.
    pub async fn run(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        self.running.store(true, Ordering::SeqCst);
        info!("event bus processor starting");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                event = self.receiver.recv() => {
                    match event {
                        Some(event) => {
                            self.queue_size.fetch_sub(1, Ordering::SeqCst);
                            self.process_one(event).await;
                        }
                        None => break,
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("event bus processor stopped");
    }

    async fn process_one(&self, event: BusEvent) {
        let fingerprint = event.fingerprint();
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .get(event.event_type.as_str())
            .map(|h| h.value().clone())
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!(event_type = %event.event_type, "no subscribers for event type");
            return;
        }

        let results = futures::future::join_all(handlers.iter().map(|h| h.handle(&event))).await;
        let failures: Vec<_> = results.into_iter().zip(handlers.iter()).filter_map(|(r, h)| {
            r.err().map(|e| (h.name().to_string(), e))
        }).collect();

        if failures.is_empty() {
            self.retry_counts.remove(&fingerprint);
            return;
        }

        let retry_count = {
            let mut entry = self.retry_counts.entry(fingerprint.clone()).or_insert(0);
            *entry += failures.len() as u32;
            *entry
        };

        let (failed_handler, err) = &failures[0];
        error!(
            event_type = %event.event_type,
            handler = %failed_handler,
            error = %err,
            retry_count,
            "event handler failed"
        );

        if retry_count >= self.max_retries {
            warn!(event_type = %event.event_type, retry_count, "event exhausted retries, moving to dead letter queue");
            if let Err(e) = self
                .dlq
                .insert(
                    event.event_type.as_str(),
                    &event.payload,
                    &err.to_string(),
                    retry_count as i32,
                    event.workflow_id,
                )
                .await
            {
                error!(error = %e, "failed to write dead letter queue entry");
            }
            self.retry_counts.remove(&fingerprint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingHandler {
        calls: Arc<AtomicU32>,
        fail_first_n: u32,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &BusEvent) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                return Err(HiloopError::Internal("synthetic failure".to_string()));
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn publish_rejects_when_queue_full() {
        let config = EventBusConfig { max_queue_size: 1, max_retries: 3 };
        // A bus with no processor draining it will fill up after one publish.
        let (sender, _receiver) = mpsc::channel(config.max_queue_size);
        let handlers: HandlerMap = Arc::new(DashMap::new());
        let bus = EventBus {
            sender,
            handlers,
            queue_size: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            config,
        };

        bus.publish("workflow.started", JsonMap::new(), None).await.unwrap();
        let second = bus.publish("workflow.started", JsonMap::new(), None).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn stats_report_registered_handlers() {
        let config = EventBusConfig { max_queue_size: 10, max_retries: 3 };
        let (sender, _receiver) = mpsc::channel(config.max_queue_size);
        let handlers: HandlerMap = Arc::new(DashMap::new());
        let bus = EventBus {
            sender,
            handlers,
            queue_size: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            config,
        };

        bus.subscribe(
            "approval.received",
            Arc::new(CountingHandler { calls: Arc::new(AtomicU32::new(0)), fail_first_n: 0 }),
        );
        let stats = bus.get_stats();
        assert_eq!(stats.event_types, 1);
        assert_eq!(stats.total_handlers, 1);
        assert!(!stats.running);
    }
}
