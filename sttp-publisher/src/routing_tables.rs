//! Copy-on-write `signal_id -> destinations` map. Mutations are serialized
//! through an [`OperationQueue`] consumed by one dedicated operation
//! thread; the publish path only ever takes a short shared lock to copy
//! the current snapshot reference and never blocks on an update.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

use sttp_types::{Measurement, SignalId};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::operation_queue::OperationQueue;

pub type DestinationId = Uuid;

/// The publish-path surface routing needs from a subscriber connection.
/// `sttp-publisher::subscriber_connection::SubscriberConnection` is the one
/// real implementation; tests substitute a recording stub.
pub trait RoutingDestination: Send + Sync {
    fn destination_id(&self) -> DestinationId;
    fn is_subscribed(&self) -> bool;
    fn is_temporal_subscription(&self) -> bool;
    fn publish_measurements(&self, measurements: Vec<Measurement>);
}

type DestinationSet = HashMap<DestinationId, Arc<dyn RoutingDestination>>;
type Snapshot = HashMap<SignalId, DestinationSet>;

enum Operation {
    Update {
        dest: Arc<dyn RoutingDestination>,
        routes: HashSet<SignalId>,
    },
    Remove {
        dest_id: DestinationId,
    },
}

fn apply(op: Operation, snapshot: &mut Snapshot) {
    match op {
        Operation::Update { dest, routes } => {
            let dest_id = dest.destination_id();
            for set in snapshot.values_mut() {
                set.remove(&dest_id);
            }
            for signal_id in routes {
                snapshot.entry(signal_id).or_default().insert(dest_id, Arc::clone(&dest));
            }
        }
        Operation::Remove { dest_id } => {
            for set in snapshot.values_mut() {
                set.remove(&dest_id);
            }
        }
    }
}

/// Owns the active routing snapshot and the background thread that mutates
/// it. Dropping a `RoutingTables` stops that thread.
///
/// The snapshot itself lives behind an `Arc`: the publish path takes the
/// reader lock only long enough to clone that `Arc` (a refcount bump, not
/// a map copy) and the operation thread builds the next `Snapshot` from
/// scratch before swapping the `Arc` in under the writer lock.
pub struct RoutingTables {
    active: Arc<RwLock<Arc<Snapshot>>>,
    queue: Arc<OperationQueue<Operation>>,
    enabled: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl RoutingTables {
    pub fn new() -> Self {
        let active = Arc::new(RwLock::new(Arc::new(Snapshot::new())));
        let queue: Arc<OperationQueue<Operation>> = Arc::new(OperationQueue::new());
        let enabled = Arc::new(AtomicBool::new(true));

        let worker = {
            let active = Arc::clone(&active);
            let queue = Arc::clone(&queue);
            let enabled = Arc::clone(&enabled);
            std::thread::spawn(move || {
                while enabled.load(Ordering::Acquire) {
                    queue.wait_for_data();
                    if !enabled.load(Ordering::Acquire) {
                        break;
                    }
                    while let Some(op) = queue.try_dequeue() {
                        let current = active.read().expect("routing snapshot lock poisoned").clone();
                        let mut next = (*current).clone();
                        apply(op, &mut next);
                        *active.write().expect("routing snapshot lock poisoned") = Arc::new(next);
                    }
                }
                debug!("routing operation thread exiting");
            })
        };

        RoutingTables {
            active,
            queue,
            enabled,
            worker: Some(worker),
        }
    }

    /// Enqueues a route replacement for `dest`: after this commits, `dest`
    /// is present under exactly the signal IDs in `routes`.
    pub fn update_routes(&self, dest: Arc<dyn RoutingDestination>, routes: HashSet<SignalId>) {
        self.queue.enqueue(Operation::Update { dest, routes });
    }

    /// Enqueues removal of `dest_id` from every entry.
    pub fn remove_routes(&self, dest_id: DestinationId) {
        self.queue.enqueue(Operation::Remove { dest_id });
    }

    /// Groups `batch` by destination using the current snapshot and
    /// delivers each group in arrival order. Destinations that are not
    /// subscribed, or are temporal, are filtered out — they are served
    /// by the temporal subscriber instead.
    pub fn publish(&self, batch: Vec<Measurement>) {
        let snapshot = self.active.read().expect("routing snapshot lock poisoned").clone();
        // `snapshot` is an `Arc<Snapshot>` clone (refcount bump only); the
        // reader lock is already released by the time the loop below runs.

        let mut grouped: HashMap<DestinationId, (Arc<dyn RoutingDestination>, Vec<Measurement>)> = HashMap::new();
        for measurement in batch {
            let Some(destinations) = snapshot.get(&measurement.signal_id) else {
                warn!(signal_id = %measurement.signal_id, "no route for signal, dropping measurement");
                continue;
            };
            for (id, dest) in destinations {
                if dest.is_subscribed() && !dest.is_temporal_subscription() {
                    grouped
                        .entry(*id)
                        .or_insert_with(|| (Arc::clone(dest), Vec::new()))
                        .1
                        .push(measurement.clone());
                }
            }
        }

        for (_, (dest, measurements)) in grouped {
            dest.publish_measurements(measurements);
        }
    }

    pub fn shutdown(&mut self) {
        self.enabled.store(false, Ordering::Release);
        self.queue.release();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Default for RoutingTables {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RoutingTables {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use sttp_types::Ticks;

    struct RecordingDestination {
        id: DestinationId,
        subscribed: AtomicBool,
        temporal: AtomicBool,
        received: StdMutex<Vec<Measurement>>,
    }

    impl RecordingDestination {
        fn new() -> Arc<Self> {
            Arc::new(RecordingDestination {
                id: Uuid::new_v4(),
                subscribed: AtomicBool::new(true),
                temporal: AtomicBool::new(false),
                received: StdMutex::new(Vec::new()),
            })
        }
    }

    impl RoutingDestination for RecordingDestination {
        fn destination_id(&self) -> DestinationId {
            self.id
        }
        fn is_subscribed(&self) -> bool {
            self.subscribed.load(Ordering::Relaxed)
        }
        fn is_temporal_subscription(&self) -> bool {
            self.temporal.load(Ordering::Relaxed)
        }
        fn publish_measurements(&self, measurements: Vec<Measurement>) {
            self.received.lock().unwrap().extend(measurements);
        }
    }

    fn settle() {
        std::thread::sleep(Duration::from_millis(50));
    }

    #[test]
    fn scenario_3_routing_update_race() {
        let routing = RoutingTables::new();
        let d1 = RecordingDestination::new();
        let d2 = RecordingDestination::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        routing.update_routes(d1.clone(), HashSet::from([a, b]));
        routing.update_routes(d2.clone(), HashSet::from([b, c]));
        settle();

        let batch = vec![
            Measurement::new(a, 1.0, Ticks::new(0)),
            Measurement::new(b, 2.0, Ticks::new(0)),
            Measurement::new(c, 3.0, Ticks::new(0)),
        ];
        routing.publish(batch);

        let d1_signals: HashSet<Uuid> = d1.received.lock().unwrap().iter().map(|m| m.signal_id).collect();
        let d2_signals: HashSet<Uuid> = d2.received.lock().unwrap().iter().map(|m| m.signal_id).collect();
        assert_eq!(d1_signals, HashSet::from([a, b]));
        assert_eq!(d2_signals, HashSet::from([b, c]));
    }

    #[test]
    fn scenario_6_remove_routes_purges() {
        let routing = RoutingTables::new();
        let d1 = RecordingDestination::new();
        let d2 = RecordingDestination::new();
        let k1 = Uuid::new_v4();
        let k2 = Uuid::new_v4();

        routing.update_routes(d1.clone(), HashSet::from([k1]));
        routing.update_routes(d2.clone(), HashSet::from([k1, k2]));
        settle();

        routing.remove_routes(d2.destination_id());
        settle();

        routing.publish(vec![
            Measurement::new(k1, 1.0, Ticks::new(0)),
            Measurement::new(k2, 1.0, Ticks::new(0)),
        ]);

        let d1_signals: HashSet<Uuid> = d1.received.lock().unwrap().iter().map(|m| m.signal_id).collect();
        assert_eq!(d1_signals, HashSet::from([k1]));
        assert!(d2.received.lock().unwrap().is_empty());
    }

    #[test]
    fn unsubscribed_and_temporal_destinations_are_filtered_from_real_time_publish() {
        let routing = RoutingTables::new();
        let dest = RecordingDestination::new();
        let signal = Uuid::new_v4();
        routing.update_routes(dest.clone(), HashSet::from([signal]));
        settle();

        dest.temporal.store(true, Ordering::Relaxed);
        routing.publish(vec![Measurement::new(signal, 1.0, Ticks::new(0))]);
        assert!(dest.received.lock().unwrap().is_empty());

        dest.temporal.store(false, Ordering::Relaxed);
        dest.subscribed.store(false, Ordering::Relaxed);
        routing.publish(vec![Measurement::new(signal, 1.0, Ticks::new(0))]);
        assert!(dest.received.lock().unwrap().is_empty());
    }

    #[test]
    fn update_routes_is_idempotent() {
        let routing = RoutingTables::new();
        let dest = RecordingDestination::new();
        let signal = Uuid::new_v4();

        routing.update_routes(dest.clone(), HashSet::from([signal]));
        routing.update_routes(dest.clone(), HashSet::from([signal]));
        settle();

        routing.publish(vec![Measurement::new(signal, 1.0, Ticks::new(0))]);
        assert_eq!(dest.received.lock().unwrap().len(), 1);
    }
}
