use thiserror::Error;

/// Outcome of attempting to parse one compact measurement out of a buffer.
/// `NeedMoreData` and `BadIndex` are expected, non-fatal outcomes — callers
/// branch on them directly rather than treating them as failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed {
        measurement: sttp_types::Measurement,
        consumed: usize,
    },
    NeedMoreData,
    BadIndex,
}

/// Library-level error surface. Transient, per-destination failures never
/// reach this type — they are logged and handled inline per spec §7; this
/// enum is reserved for conditions that abort a subsystem's initialization
/// or a caller's direct request.
#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("signal index {0:#06x} not present in signal index cache")]
    UnknownIndex(u16),

    #[error("no historical data available for temporal subscription")]
    NoHistoryAvailable,

    #[error("transport write failed: {0}")]
    TransportFailure(String),

    #[error("failed to bind publisher listener: {0}")]
    ListenFailure(#[from] std::io::Error),
}
