//! sttp-types — wire-adjacent data model shared across the publisher core.
//!
//! No networking, no threads: just the `Measurement` record, its 32-bit
//! state-flag bitfield, metadata, and the 100-nanosecond tick arithmetic
//! the rest of the workspace builds on.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 128-bit globally unique identifier for a measurement stream.
pub type SignalId = Uuid;

// ── Tick arithmetic ────────────────────────────────────────────────────────

/// Signed count of 100-nanosecond ticks since a fixed epoch (`0001-01-01`,
/// matching the .NET `DateTime` epoch existing peers use).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ticks(pub i64);

impl Ticks {
    pub const PER_MILLISECOND: i64 = 10_000;
    pub const PER_SECOND: i64 = 10_000_000;

    /// Offset between this epoch and the Unix epoch (`1970-01-01`),
    /// i.e. .NET's `DateTime(1970, 1, 1).Ticks` — the value existing
    /// peers use to bridge the two.
    pub const UNIX_EPOCH_OFFSET: i64 = 621_355_968_000_000_000;

    pub const fn new(raw: i64) -> Self {
        Ticks(raw)
    }

    pub fn from_millis_since_epoch(ms: i64) -> Self {
        Ticks(ms.saturating_mul(Self::PER_MILLISECOND))
    }

    pub fn as_millis(self) -> i64 {
        self.0 / Self::PER_MILLISECOND
    }

    pub fn checked_sub(self, other: Ticks) -> Option<i64> {
        self.0.checked_sub(other.0)
    }

    /// POSIX seconds since the Unix epoch plus the millisecond remainder.
    /// Exact integer arithmetic both ways; round-trips any value produced
    /// by `from_unix_seconds_millis` (a sub-millisecond remainder on an
    /// arbitrary `Ticks` value is truncated, as the POSIX+millis
    /// representation has no room to carry it).
    pub fn to_unix_seconds_millis(self) -> (i64, u32) {
        let unix_ticks = self.0 - Self::UNIX_EPOCH_OFFSET;
        let seconds = unix_ticks.div_euclid(Self::PER_SECOND);
        let remainder = unix_ticks.rem_euclid(Self::PER_SECOND);
        (seconds, (remainder / Self::PER_MILLISECOND) as u32)
    }

    pub fn from_unix_seconds_millis(seconds: i64, millis: u32) -> Self {
        Ticks(Self::UNIX_EPOCH_OFFSET + seconds * Self::PER_SECOND + millis as i64 * Self::PER_MILLISECOND)
    }

    /// Fractional milliseconds within the current second, zero-padded to
    /// three digits (the `%f` format token).
    pub fn format_fraction_millis(self) -> String {
        let within_second = self.0.rem_euclid(Self::PER_SECOND);
        format!("{:03}", within_second / Self::PER_MILLISECOND)
    }

    /// Fractional ticks within the current second, zero-padded to seven
    /// digits (the `%t` format token).
    pub fn format_fraction_ticks(self) -> String {
        let within_second = self.0.rem_euclid(Self::PER_SECOND);
        format!("{within_second:07}")
    }
}

impl std::ops::Add<i64> for Ticks {
    type Output = Ticks;
    fn add(self, rhs: i64) -> Ticks {
        Ticks(self.0 + rhs)
    }
}

impl std::ops::Sub for Ticks {
    type Output = i64;
    fn sub(self, rhs: Ticks) -> i64 {
        self.0 - rhs.0
    }
}

// ── State flags ────────────────────────────────────────────────────────────

bitflags! {
    /// Producer-facing 32-bit measurement state bitfield. Bit positions and
    /// masks are frozen to stay bit-compatible with existing peers; see the
    /// compact-flag mapping in `sttp-publisher::compact_measurement`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct StateFlags: u32 {
        const DATA_RANGE    = 0x000000FC;
        const DATA_QUALITY  = 0x0000EF03;
        const TIME_QUALITY  = 0x00BF0000;
        const CALCULATED    = 0x00001000;
        const DISCARDED     = 0x00400000;
        const SYSTEM_ISSUE  = 0xE0000000;
    }
}

impl Default for StateFlags {
    fn default() -> Self {
        StateFlags::empty()
    }
}

// ── Measurement ─────────────────────────────────────────────────────────────

/// One timestamped floating-point sample identified by a signal id.
///
/// Immutable after handoff to the publisher: callers that need to adjust a
/// measurement should construct a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub signal_id: SignalId,
    pub source: Option<String>,
    pub id: Option<u32>,
    pub value: f64,
    pub timestamp: Ticks,
    pub flags: StateFlags,
    pub adder: f64,
    pub multiplier: f64,
}

impl Measurement {
    pub fn new(signal_id: SignalId, value: f64, timestamp: Ticks) -> Self {
        Measurement {
            signal_id,
            source: None,
            id: None,
            value,
            timestamp,
            flags: StateFlags::empty(),
            adder: 0.0,
            multiplier: 1.0,
        }
    }

    /// The value that ships on the wire: `value * multiplier + adder`,
    /// narrowed to `f32` by the codec.
    pub fn adjusted_value(&self) -> f64 {
        self.value * self.multiplier + self.adder
    }
}

// ── Metadata ─────────────────────────────────────────────────────────────

/// Kind of phasor-adjacent reference a signal represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceKind {
    Frequency,
    DfDt,
    Magnitude,
    Angle,
    Other,
}

/// Read-only metadata the publisher owns for a defined signal. Populated by
/// `DefineMetadata`, which is out of scope here; this crate only carries the
/// shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementMetadata {
    pub signal_id: SignalId,
    pub point_tag: String,
    pub device_acronym: String,
    pub reference_kind: ReferenceKind,
    pub reference_index: u32,
    pub phasor_source_index: Option<u16>,
    pub updated_on: Ticks,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjusted_value_applies_adder_and_multiplier() {
        let mut m = Measurement::new(Uuid::nil(), 10.0, Ticks::new(0));
        m.adder = 1.0;
        m.multiplier = 2.0;
        assert_eq!(m.adjusted_value(), 21.0);
    }

    #[test]
    fn tick_fraction_formatting_is_zero_padded() {
        let t = Ticks::new(7 * Ticks::PER_SECOND + 5 * Ticks::PER_MILLISECOND);
        assert_eq!(t.format_fraction_millis(), "005");
        assert_eq!(t.format_fraction_ticks(), "0050000");
    }

    #[test]
    fn unix_seconds_millis_round_trips_through_ticks() {
        let t = Ticks::from_unix_seconds_millis(1_700_000_000, 123);
        assert_eq!(t.to_unix_seconds_millis(), (1_700_000_000, 123));
    }

    #[test]
    fn state_flag_masks_are_disjoint() {
        let all = [
            StateFlags::DATA_RANGE,
            StateFlags::DATA_QUALITY,
            StateFlags::TIME_QUALITY,
            StateFlags::CALCULATED,
            StateFlags::DISCARDED,
            StateFlags::SYSTEM_ISSUE,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_eq!(a.bits() & b.bits(), 0, "{a:?} overlaps {b:?}");
            }
        }
    }
}
