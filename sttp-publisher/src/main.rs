use std::collections::HashSet;
use std::io::Read;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use sttp_publisher::compact_measurement::CodecOptions;
use sttp_publisher::config::PublisherConfig;
use sttp_publisher::data_publisher::{DataPublisher, PublisherEvent};
use sttp_publisher::signal_index_cache::SignalIndexCache;
use sttp_publisher::subscriber_connection::SubscriberConnection;
use sttp_publisher::transport::TcpTransport;
use sttp_types::{Measurement, MeasurementMetadata, ReferenceKind, Ticks};
use tracing::{info, warn};
use uuid::Uuid;

fn now_as_ticks() -> Ticks {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch");
    Ticks::from_unix_seconds_millis(now.as_secs() as i64, now.subsec_millis())
}

/// Sample device metadata matching the "Test PMU" sample this core's
/// reference system ships, including the FREQ signal ID used throughout
/// the property tests in this workspace.
struct SampleDevice {
    freq: Uuid,
    dfdt: Uuid,
    vpha: Uuid,
    vphm: Uuid,
}

const SAMPLE_DEVICE: SampleDevice = SampleDevice {
    freq: Uuid::from_bytes([
        0x65, 0x86, 0xf2, 0x30, 0x8e, 0x7f, 0x4f, 0x0f, 0x9e, 0x18, 0x1e, 0xef, 0xee, 0x4b, 0x9e, 0xdd,
    ]),
    dfdt: Uuid::from_bytes([
        0x60, 0xc9, 0x75, 0x30, 0x2e, 0xd2, 0x4a, 0xbb, 0xa7, 0xa2, 0x99, 0xe2, 0x17, 0x04, 0x79, 0xa4,
    ]),
    vpha: Uuid::from_bytes([
        0xaa, 0x47, 0xa6, 0x1c, 0x85, 0x96, 0x46, 0xaf, 0x8c, 0x28, 0xf9, 0xee, 0x77, 0x4b, 0xcf, 0x26,
    ]),
    vphm: Uuid::from_bytes([
        0x4a, 0xb2, 0x47, 0x20, 0x37, 0x63, 0x40, 0x7c, 0xaf, 0xa0, 0x15, 0xf0, 0xd6, 0x9a, 0xc8, 0x97,
    ]),
};

fn sample_metadata() -> Vec<MeasurementMetadata> {
    vec![
        MeasurementMetadata {
            signal_id: SAMPLE_DEVICE.freq,
            point_tag: "TESTPMU-FREQ".into(),
            device_acronym: "TESTPMU".into(),
            reference_kind: ReferenceKind::Frequency,
            reference_index: 0,
            phasor_source_index: None,
            updated_on: now_as_ticks(),
        },
        MeasurementMetadata {
            signal_id: SAMPLE_DEVICE.dfdt,
            point_tag: "TESTPMU-DFDT".into(),
            device_acronym: "TESTPMU".into(),
            reference_kind: ReferenceKind::DfDt,
            reference_index: 0,
            phasor_source_index: None,
            updated_on: now_as_ticks(),
        },
        MeasurementMetadata {
            signal_id: SAMPLE_DEVICE.vpha,
            point_tag: "TESTPMU-VPHA".into(),
            device_acronym: "TESTPMU".into(),
            reference_kind: ReferenceKind::Angle,
            reference_index: 1,
            phasor_source_index: Some(1),
            updated_on: now_as_ticks(),
        },
        MeasurementMetadata {
            signal_id: SAMPLE_DEVICE.vphm,
            point_tag: "TESTPMU-VPHM".into(),
            device_acronym: "TESTPMU".into(),
            reference_kind: ReferenceKind::Magnitude,
            reference_index: 1,
            phasor_source_index: Some(1),
            updated_on: now_as_ticks(),
        },
    ]
}

/// Generates a slowly-drifting synthetic frequency/angle pair once a
/// second and publishes it directly, the way a producer thread would in
/// the real system — there is no subscription negotiation on this path.
fn spawn_producer(publisher: Arc<DataPublisher>) {
    std::thread::spawn(move || {
        let mut angle_deg: f64 = 0.0;
        let mut rng = rand::thread_rng();
        loop {
            std::thread::sleep(Duration::from_secs(1));

            let jitter: f64 = rng.gen_range(-0.01..0.01);
            let freq = 60.0 + jitter;
            let dfdt = jitter * 10.0;
            angle_deg = (angle_deg + 6.0) % 360.0;
            let magnitude = 120.0 + rng.gen_range(-0.2..0.2);

            let now = now_as_ticks();
            let batch = vec![
                Measurement::new(SAMPLE_DEVICE.freq, freq, now),
                Measurement::new(SAMPLE_DEVICE.dfdt, dfdt, now),
                Measurement::new(SAMPLE_DEVICE.vpha, angle_deg, now),
                Measurement::new(SAMPLE_DEVICE.vphm, magnitude, now),
            ];
            publisher.publish_measurements(batch);
        }
    });
}

fn handle_connection(stream: std::net::TcpStream, publisher: Arc<DataPublisher>, codec_options: CodecOptions) {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".into());
    let mut reader = stream.try_clone().expect("failed to clone stream for reader half");
    let transport = Arc::new(TcpTransport::new(stream));
    let connection = SubscriberConnection::new(Uuid::new_v4(), peer.clone(), peer.clone(), peer.clone(), transport);
    connection.set_codec_options(codec_options);

    let mut cache = SignalIndexCache::new();
    cache.assign(0, SAMPLE_DEVICE.freq, Some("TESTPMU".into()), None);
    cache.assign(1, SAMPLE_DEVICE.dfdt, Some("TESTPMU".into()), None);
    cache.assign(2, SAMPLE_DEVICE.vpha, Some("TESTPMU".into()), None);
    cache.assign(3, SAMPLE_DEVICE.vphm, Some("TESTPMU".into()), None);
    connection.replace_cache(cache);

    publisher.register_connection(Arc::clone(&connection));
    publisher.update_subscription(
        &connection,
        HashSet::from([SAMPLE_DEVICE.freq, SAMPLE_DEVICE.dfdt, SAMPLE_DEVICE.vpha, SAMPLE_DEVICE.vphm]),
    );

    // The command channel itself is out of scope; this loop only exists to
    // detect disconnects so the connection can be purged from routing.
    let mut buf = [0u8; 256];
    loop {
        match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => continue,
        }
    }
    publisher.remove_connection(connection.instance_id);
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sttp_publisher=info".into()),
        )
        .init();

    let config = PublisherConfig::default();
    let codec_options = config.codec_options();

    let publisher = Arc::new(DataPublisher::new(config, |event| match event {
        PublisherEvent::ClientConnected(conn) => info!(connection = %conn.connection_id, "client connected"),
        PublisherEvent::ClientDisconnected(conn) => info!(connection = %conn.connection_id, "client disconnected"),
        PublisherEvent::StatusMessage(msg) => info!(%msg, "publisher status"),
        PublisherEvent::ErrorMessage(msg) => warn!(%msg, "publisher error"),
        PublisherEvent::TemporalSubscriptionRequested(conn) => {
            info!(connection = %conn.connection_id, "temporal subscription requested (no historical table configured in this demo)")
        }
        PublisherEvent::ProcessingIntervalChangeRequested(conn) => {
            info!(connection = %conn.connection_id, "processing interval change requested")
        }
    }));

    for metadata in sample_metadata() {
        publisher.define_metadata(metadata);
    }

    spawn_producer(Arc::clone(&publisher));

    let listener = TcpListener::bind(("0.0.0.0", config.port))?;
    info!(port = config.port, "publisher listening");

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(err) => {
                warn!(%err, "failed to accept connection");
                continue;
            }
        };
        let publisher = Arc::clone(&publisher);
        std::thread::spawn(move || handle_connection(stream, publisher, codec_options));
    }

    Ok(())
}
