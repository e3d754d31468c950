//! Per-subscriber state and the publish-path entry point the routing table
//! and temporal subscriber both call into. Concurrent calls from the
//! routing publish thread and a temporal timer callback are serialized
//! internally by `write_lock`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use sttp_types::Measurement;
use tracing::warn;
use uuid::Uuid;

use crate::compact_measurement::{serialize_measurement, BaseTimeOffsets, CodecOptions};
use crate::routing_tables::{DestinationId, RoutingDestination};
use crate::signal_index_cache::{SignalIndexCache, UNMAPPED_INDEX};
use crate::temporal_subscriber::TemporalDestination;
use crate::transport::Transport;

/// Lifecycle state a connection walks through; command-channel parsing
/// that drives these transitions is out of scope here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Subscribed,
    TemporalActive,
    TemporalComplete,
    Disconnected,
}

#[derive(Debug, Clone, Default)]
pub struct CipherKeys {
    pub keys: [Option<Vec<u8>>; 2],
    pub ivs: [Option<Vec<u8>>; 2],
}

pub struct SubscriberConnection {
    pub subscriber_id: Uuid,
    pub connection_id: String,
    pub ip: String,
    pub host: String,
    pub operational_modes: u32,
    pub use_payload_compression: bool,
    pub instance_id: Uuid,

    connected: AtomicBool,
    subscribed: AtomicBool,
    temporal: AtomicBool,
    state: Mutex<ConnectionState>,

    cache: RwLock<Arc<SignalIndexCache>>,
    base_offsets: Mutex<BaseTimeOffsets>,
    codec_options: Mutex<CodecOptions>,
    cipher_keys: Mutex<CipherKeys>,

    pub start_time_constraint: Option<sttp_types::Ticks>,
    pub stop_time_constraint: Option<sttp_types::Ticks>,
    processing_interval: Mutex<i32>,

    transport: Arc<dyn Transport>,
    write_lock: Mutex<()>,
}

impl SubscriberConnection {
    pub fn new(subscriber_id: Uuid, connection_id: String, ip: String, host: String, transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(SubscriberConnection {
            subscriber_id,
            connection_id,
            ip,
            host,
            operational_modes: 0,
            use_payload_compression: false,
            instance_id: Uuid::new_v4(),
            connected: AtomicBool::new(true),
            subscribed: AtomicBool::new(false),
            temporal: AtomicBool::new(false),
            state: Mutex::new(ConnectionState::Connected),
            cache: RwLock::new(Arc::new(SignalIndexCache::new())),
            base_offsets: Mutex::new(BaseTimeOffsets::new()),
            codec_options: Mutex::new(CodecOptions::default()),
            cipher_keys: Mutex::new(CipherKeys::default()),
            start_time_constraint: None,
            stop_time_constraint: None,
            processing_interval: Mutex::new(-1),
            transport,
            write_lock: Mutex::new(()),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("connection state lock poisoned")
    }

    /// Replaces the signal-index cache wholesale. Never edited in place:
    /// an in-flight publish keeps using the snapshot it already captured.
    pub fn replace_cache(&self, cache: SignalIndexCache) {
        *self.cache.write().expect("connection cache lock poisoned") = Arc::new(cache);
    }

    pub fn set_codec_options(&self, options: CodecOptions) {
        *self.codec_options.lock().expect("connection codec options lock poisoned") = options;
    }

    pub fn set_cipher_keys(&self, keys: CipherKeys) {
        *self.cipher_keys.lock().expect("connection cipher keys lock poisoned") = keys;
    }

    pub fn processing_interval(&self) -> i32 {
        *self.processing_interval.lock().expect("connection processing interval lock poisoned")
    }

    pub fn set_processing_interval(&self, ms: i32) {
        *self.processing_interval.lock().expect("connection processing interval lock poisoned") = ms;
    }

    pub fn mark_subscribed(&self) {
        self.subscribed.store(true, Ordering::Release);
        self.temporal.store(false, Ordering::Release);
        *self.state.lock().expect("connection state lock poisoned") = ConnectionState::Subscribed;
    }

    pub fn mark_unsubscribed(&self) {
        self.subscribed.store(false, Ordering::Release);
        *self.state.lock().expect("connection state lock poisoned") = ConnectionState::Connected;
    }

    pub fn mark_temporal_active(&self) {
        self.temporal.store(true, Ordering::Release);
        self.subscribed.store(false, Ordering::Release);
        *self.state.lock().expect("connection state lock poisoned") = ConnectionState::TemporalActive;
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
        *self.state.lock().expect("connection state lock poisoned") = ConnectionState::Disconnected;
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl RoutingDestination for SubscriberConnection {
    fn destination_id(&self) -> DestinationId {
        self.instance_id
    }

    fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    fn is_temporal_subscription(&self) -> bool {
        self.temporal.load(Ordering::Acquire)
    }

    fn publish_measurements(&self, measurements: Vec<Measurement>) {
        let _guard = self.write_lock.lock().expect("connection write lock poisoned");
        if !self.is_connected() {
            return;
        }

        let cache = self.cache.read().expect("connection cache lock poisoned").clone();
        let mut offsets = self.base_offsets.lock().expect("connection base offsets lock poisoned");
        let options = *self.codec_options.lock().expect("connection codec options lock poisoned");

        let mut frame = Vec::new();
        for measurement in &measurements {
            let index = cache.get_signal_index(measurement.signal_id);
            if index == UNMAPPED_INDEX {
                warn!(signal_id = %measurement.signal_id, connection = %self.connection_id, "dropping measurement with no assigned runtime index");
                continue;
            }
            offsets.observe(measurement.timestamp, options.use_millisecond_resolution);
            serialize_measurement(measurement, index, &offsets, options, &mut frame);
        }
        drop(offsets);

        if frame.is_empty() {
            return;
        }

        if let Err(err) = self.transport.send(&frame) {
            warn!(connection = %self.connection_id, error = %err, "transport write failed, marking connection disconnected");
            self.connected.store(false, Ordering::Release);
        }
    }
}

impl TemporalDestination for SubscriberConnection {
    fn publish_measurements(&self, measurements: Vec<Measurement>) {
        RoutingDestination::publish_measurements(self, measurements)
    }

    fn complete_temporal_subscription(&self) {
        self.temporal.store(false, Ordering::Release);
        *self.state.lock().expect("connection state lock poisoned") = ConnectionState::TemporalComplete;

        let _guard = self.write_lock.lock().expect("connection write lock poisoned");
        if self.is_connected() {
            // Terminator frame: the reserved sentinel index with no payload.
            let terminator = UNMAPPED_INDEX.to_be_bytes();
            if let Err(err) = self.transport.send(&terminator) {
                warn!(connection = %self.connection_id, error = %err, "failed to send temporal terminator frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal_index_cache::SignalIndexCache;
    use sttp_types::Ticks;
    use std::sync::Mutex as StdMutex;

    struct RecordingTransport {
        frames: StdMutex<Vec<Vec<u8>>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(RecordingTransport { frames: StdMutex::new(Vec::new()) })
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, bytes: &[u8]) -> Result<(), crate::error::PublisherError> {
            self.frames.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    #[test]
    fn publish_drops_measurements_with_no_runtime_index() {
        let transport = RecordingTransport::new();
        let conn = SubscriberConnection::new(Uuid::new_v4(), "c1".into(), "127.0.0.1".into(), "localhost".into(), transport.clone());
        conn.mark_subscribed();

        let mut cache = SignalIndexCache::new();
        let known = Uuid::new_v4();
        cache.assign(0, known, None, None);
        conn.replace_cache(cache);

        let unknown = Uuid::new_v4();
        RoutingDestination::publish_measurements(
            conn.as_ref(),
            vec![
                Measurement::new(known, 1.0, Ticks::new(0)),
                Measurement::new(unknown, 2.0, Ticks::new(0)),
            ],
        );

        let frames = transport.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn publish_is_a_no_op_after_disconnect() {
        let transport = RecordingTransport::new();
        let conn = SubscriberConnection::new(Uuid::new_v4(), "c1".into(), "127.0.0.1".into(), "localhost".into(), transport.clone());
        conn.mark_subscribed();
        conn.mark_disconnected();

        let mut cache = SignalIndexCache::new();
        let signal = Uuid::new_v4();
        cache.assign(0, signal, None, None);
        conn.replace_cache(cache);

        RoutingDestination::publish_measurements(conn.as_ref(), vec![Measurement::new(signal, 1.0, Ticks::new(0))]);
        assert!(transport.frames.lock().unwrap().is_empty());
    }

    #[test]
    fn complete_temporal_subscription_sends_terminator_and_clears_flag() {
        let transport = RecordingTransport::new();
        let conn = SubscriberConnection::new(Uuid::new_v4(), "c1".into(), "127.0.0.1".into(), "localhost".into(), transport.clone());
        conn.mark_temporal_active();
        assert!(conn.is_temporal_subscription());

        TemporalDestination::complete_temporal_subscription(conn.as_ref());

        assert!(!conn.is_temporal_subscription());
        assert_eq!(conn.state(), ConnectionState::TemporalComplete);
        assert_eq!(transport.frames.lock().unwrap().len(), 1);
    }
}
