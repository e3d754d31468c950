//! Owns the routing table, the set of live connections, and the metadata
//! registry. Accepts measurements from producers and forwards them to
//! routing unmodified; dispatches lifecycle callbacks in arrival order on
//! a dedicated thread so producer and I/O threads never block on user code.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

use sttp_types::{Measurement, MeasurementMetadata, SignalId};
use uuid::Uuid;

use crate::config::PublisherConfig;
use crate::operation_queue::OperationQueue;
use crate::routing_tables::{DestinationId, RoutingDestination, RoutingTables};
use crate::subscriber_connection::SubscriberConnection;

/// Events delivered to the registered callback, in the order they occurred.
pub enum PublisherEvent {
    ClientConnected(Arc<SubscriberConnection>),
    ClientDisconnected(Arc<SubscriberConnection>),
    StatusMessage(String),
    ErrorMessage(String),
    TemporalSubscriptionRequested(Arc<SubscriberConnection>),
    ProcessingIntervalChangeRequested(Arc<SubscriberConnection>),
}

pub struct DataPublisher {
    config: PublisherConfig,
    routing: RoutingTables,
    connections: RwLock<HashMap<DestinationId, Arc<SubscriberConnection>>>,
    metadata: RwLock<HashMap<SignalId, MeasurementMetadata>>,
    events: Arc<OperationQueue<PublisherEvent>>,
    dispatch_enabled: Arc<AtomicBool>,
    dispatch_thread: Option<JoinHandle<()>>,
}

impl DataPublisher {
    /// `on_event` runs on the dispatch thread, never on a producer thread.
    pub fn new<F>(config: PublisherConfig, on_event: F) -> Self
    where
        F: Fn(PublisherEvent) + Send + 'static,
    {
        let events: Arc<OperationQueue<PublisherEvent>> = Arc::new(OperationQueue::new());
        let dispatch_enabled = Arc::new(AtomicBool::new(true));

        let dispatch_thread = {
            let events = Arc::clone(&events);
            let dispatch_enabled = Arc::clone(&dispatch_enabled);
            std::thread::spawn(move || {
                while dispatch_enabled.load(Ordering::Acquire) {
                    events.wait_for_data();
                    if !dispatch_enabled.load(Ordering::Acquire) {
                        break;
                    }
                    while let Some(event) = events.try_dequeue() {
                        on_event(event);
                    }
                }
            })
        };

        DataPublisher {
            config,
            routing: RoutingTables::new(),
            connections: RwLock::new(HashMap::new()),
            metadata: RwLock::new(HashMap::new()),
            events,
            dispatch_enabled,
            dispatch_thread: Some(dispatch_thread),
        }
    }

    pub fn config(&self) -> PublisherConfig {
        self.config
    }

    /// Forwards `batch` to routing unmodified. Called directly by producer
    /// threads, never queued.
    pub fn publish_measurements(&self, batch: Vec<Measurement>) {
        self.routing.publish(batch);
    }

    pub fn define_metadata(&self, metadata: MeasurementMetadata) {
        self.metadata.write().expect("metadata lock poisoned").insert(metadata.signal_id, metadata);
    }

    pub fn lookup_metadata(&self, signal_id: SignalId) -> Option<MeasurementMetadata> {
        self.metadata.read().expect("metadata lock poisoned").get(&signal_id).cloned()
    }

    pub fn register_connection(&self, connection: Arc<SubscriberConnection>) {
        self.connections
            .write()
            .expect("connections lock poisoned")
            .insert(connection.instance_id, Arc::clone(&connection));
        self.events.enqueue(PublisherEvent::ClientConnected(connection));
    }

    pub fn remove_connection(&self, instance_id: DestinationId) {
        let removed = self.connections.write().expect("connections lock poisoned").remove(&instance_id);
        if let Some(connection) = removed {
            connection.mark_disconnected();
            self.routing.remove_routes(instance_id);
            self.events.enqueue(PublisherEvent::ClientDisconnected(connection));
        }
    }

    pub fn update_subscription(&self, connection: &Arc<SubscriberConnection>, routes: std::collections::HashSet<SignalId>) {
        connection.mark_subscribed();
        let destination: Arc<dyn RoutingDestination> = Arc::clone(connection);
        self.routing.update_routes(destination, routes);
    }

    /// Marks `connection` temporal and excludes it from real-time routing.
    /// The registered callback typically responds by constructing a
    /// `temporal_subscriber::TemporalSubscriber` for it.
    pub fn request_temporal_subscription(&self, connection: Arc<SubscriberConnection>) {
        if !self.config.supports_temporal_subscriptions {
            self.events.enqueue(PublisherEvent::ErrorMessage(format!(
                "temporal subscriptions are disabled; rejecting request from {}",
                connection.connection_id
            )));
            return;
        }
        connection.mark_temporal_active();
        self.routing.remove_routes(connection.instance_id);
        self.events
            .enqueue(PublisherEvent::TemporalSubscriptionRequested(connection));
    }

    pub fn request_processing_interval_change(&self, connection: Arc<SubscriberConnection>) {
        self.events
            .enqueue(PublisherEvent::ProcessingIntervalChangeRequested(connection));
    }

    pub fn emit_status(&self, message: impl Into<String>) {
        self.events.enqueue(PublisherEvent::StatusMessage(message.into()));
    }

    pub fn emit_error(&self, message: impl Into<String>) {
        self.events.enqueue(PublisherEvent::ErrorMessage(message.into()));
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().expect("connections lock poisoned").len()
    }

    pub fn shutdown(&mut self) {
        self.routing.shutdown();
        self.dispatch_enabled.store(false, Ordering::Release);
        self.events.release();
        if let Some(thread) = self.dispatch_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for DataPublisher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
