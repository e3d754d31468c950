//! Bit-exact binary framing of one measurement: an 8-bit compact flag byte,
//! a 16-bit runtime signal index, a 32-bit IEEE float value, and 0/2/4/8
//! time bytes depending on the base-time-offset compression in play.
//!
//! The wire format is frozen — it must stay bit-compatible with existing
//! peers, so every constant here is load-bearing, not a style choice.

use sttp_types::{Measurement, StateFlags, Ticks};

use crate::error::ParseOutcome;
use crate::signal_index_cache::SignalIndexCache;

const COMPACT_DATA_RANGE: u8 = 0x01;
const COMPACT_DATA_QUALITY: u8 = 0x02;
const COMPACT_TIME_QUALITY: u8 = 0x04;
const COMPACT_SYSTEM_ISSUE: u8 = 0x08;
const COMPACT_CALCULATED: u8 = 0x10;
const COMPACT_DISCARDED: u8 = 0x20;
const COMPACT_BASE_TIME_OFFSET: u8 = 0x40;
const COMPACT_TIME_INDEX: u8 = 0x80;

const TWO_BYTE_LIMIT: i64 = 1 << 16;

fn map_full_to_compact(flags: StateFlags) -> u8 {
    let mut bits = 0u8;
    if flags.intersects(StateFlags::DATA_RANGE) {
        bits |= COMPACT_DATA_RANGE;
    }
    if flags.intersects(StateFlags::DATA_QUALITY) {
        bits |= COMPACT_DATA_QUALITY;
    }
    if flags.intersects(StateFlags::TIME_QUALITY) {
        bits |= COMPACT_TIME_QUALITY;
    }
    if flags.intersects(StateFlags::SYSTEM_ISSUE) {
        bits |= COMPACT_SYSTEM_ISSUE;
    }
    if flags.intersects(StateFlags::CALCULATED) {
        bits |= COMPACT_CALCULATED;
    }
    if flags.intersects(StateFlags::DISCARDED) {
        bits |= COMPACT_DISCARDED;
    }
    bits
}

/// Widens a 6-bit compact flag byte back to the full 32-bit mapping. Lossy
/// and intentionally so: many full bits collapse onto one compact bit, and
/// decoding sets the whole mask rather than guessing which original bit fired.
fn map_compact_to_full(compact: u8) -> StateFlags {
    let mut flags = StateFlags::empty();
    if compact & COMPACT_DATA_RANGE != 0 {
        flags |= StateFlags::DATA_RANGE;
    }
    if compact & COMPACT_DATA_QUALITY != 0 {
        flags |= StateFlags::DATA_QUALITY;
    }
    if compact & COMPACT_TIME_QUALITY != 0 {
        flags |= StateFlags::TIME_QUALITY;
    }
    if compact & COMPACT_SYSTEM_ISSUE != 0 {
        flags |= StateFlags::SYSTEM_ISSUE;
    }
    if compact & COMPACT_CALCULATED != 0 {
        flags |= StateFlags::CALCULATED;
    }
    if compact & COMPACT_DISCARDED != 0 {
        flags |= StateFlags::DISCARDED;
    }
    flags
}

/// Two base-time-offset ticks per connection, one active (selected by a
/// 1-bit time index), one pending. Promoting the pending offset to active
/// is the rotation policy spec-note §9 leaves to implementers: rotate once
/// the active offset falls more than `2^16 - 1` ticks (or ms, under
/// millisecond resolution) behind the newest timestamp observed.
#[derive(Debug, Clone, Default)]
pub struct BaseTimeOffsets {
    offsets: [Option<Ticks>; 2],
    active: usize,
}

impl BaseTimeOffsets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn get(&self, index: usize) -> Option<Ticks> {
        self.offsets[index]
    }

    pub fn active(&self) -> Option<Ticks> {
        self.offsets[self.active]
    }

    /// Pre-announce the next offset into the non-active slot.
    pub fn set_pending(&mut self, ticks: Ticks) {
        self.offsets[1 - self.active] = Some(ticks);
    }

    /// Rotate to the pending offset if the active one has aged past the
    /// encoding's addressable window relative to `newest`.
    pub fn observe(&mut self, newest: Ticks, use_millisecond_resolution: bool) {
        let Some(active) = self.offsets[self.active] else {
            return;
        };
        let Some(delta) = newest.checked_sub(active) else {
            return;
        };
        let limit = if use_millisecond_resolution {
            (TWO_BYTE_LIMIT - 1) * Ticks::PER_MILLISECOND
        } else {
            TWO_BYTE_LIMIT - 1
        };
        if delta > limit && self.offsets[1 - self.active].is_some() {
            self.active = 1 - self.active;
        }
    }
}

/// Serializer configuration negotiated out of band (command channel, out of
/// scope here); carried verbatim from the connection's operational mode.
#[derive(Debug, Clone, Copy)]
pub struct CodecOptions {
    pub include_time: bool,
    pub use_millisecond_resolution: bool,
}

impl Default for CodecOptions {
    fn default() -> Self {
        CodecOptions {
            include_time: true,
            use_millisecond_resolution: false,
        }
    }
}

/// Serializes one measurement using the connection's cache and base-time
/// offsets, appending it to `out`. The runtime index comes from `cache`;
/// measurements for signals absent from the cache are skipped by the caller
/// before reaching here (the serializer assumes a known index).
pub fn serialize_measurement(
    measurement: &Measurement,
    runtime_index: u16,
    base_offsets: &BaseTimeOffsets,
    options: CodecOptions,
    out: &mut Vec<u8>,
) {
    let mut compact_flags = map_full_to_compact(measurement.flags);

    out.push(0); // placeholder, patched below
    let flags_pos = out.len() - 1;
    out.extend_from_slice(&runtime_index.to_be_bytes());
    out.extend_from_slice(&(measurement.adjusted_value() as f32).to_be_bytes());

    if options.include_time {
        let time_index = base_offsets.active_index();
        let active_offset = base_offsets.get(time_index);
        let delta = active_offset.and_then(|o| measurement.timestamp.checked_sub(o));

        match delta {
            Some(d) if d > 0 && options.use_millisecond_resolution && d / Ticks::PER_MILLISECOND < TWO_BYTE_LIMIT => {
                compact_flags |= COMPACT_BASE_TIME_OFFSET;
                if time_index == 1 {
                    compact_flags |= COMPACT_TIME_INDEX;
                }
                let ms = (d / Ticks::PER_MILLISECOND) as u16;
                out.extend_from_slice(&ms.to_be_bytes());
            }
            Some(d) if d > 0 && !options.use_millisecond_resolution && d < TWO_BYTE_LIMIT => {
                compact_flags |= COMPACT_BASE_TIME_OFFSET;
                if time_index == 1 {
                    compact_flags |= COMPACT_TIME_INDEX;
                }
                out.extend_from_slice(&(d as u32).to_be_bytes());
            }
            _ => {
                out.extend_from_slice(&measurement.timestamp.0.to_be_bytes());
            }
        }
    }

    out[flags_pos] = compact_flags;
}

/// Parses one measurement out of `buf`. `frame_timestamp` supplies the
/// timestamp when `options.include_time` is false (the per-measurement time
/// bytes are absent by design; the frame carrying this measurement supplies
/// a shared timestamp at a layer above this codec).
pub fn try_parse(
    buf: &[u8],
    cache: &SignalIndexCache,
    base_offsets: &BaseTimeOffsets,
    options: CodecOptions,
    frame_timestamp: Ticks,
) -> ParseOutcome {
    const HEADER_LEN: usize = 1 + 2 + 4;
    if buf.len() < HEADER_LEN {
        return ParseOutcome::NeedMoreData;
    }

    let compact_flags = buf[0];
    let runtime_index = u16::from_be_bytes([buf[1], buf[2]]);
    let raw_value = f32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]) as f64;

    let using_base_offset = compact_flags & COMPACT_BASE_TIME_OFFSET != 0;
    let time_index = if compact_flags & COMPACT_TIME_INDEX != 0 { 1 } else { 0 };

    let (time_len, timestamp) = if !options.include_time {
        (0usize, frame_timestamp)
    } else if using_base_offset {
        let len = if options.use_millisecond_resolution { 2 } else { 4 };
        if buf.len() < HEADER_LEN + len {
            return ParseOutcome::NeedMoreData;
        }
        let Some(offset) = base_offsets.get(time_index) else {
            return ParseOutcome::NeedMoreData;
        };
        let delta = if options.use_millisecond_resolution {
            let ms = u16::from_be_bytes([buf[HEADER_LEN], buf[HEADER_LEN + 1]]) as i64;
            ms * Ticks::PER_MILLISECOND
        } else {
            u32::from_be_bytes([
                buf[HEADER_LEN],
                buf[HEADER_LEN + 1],
                buf[HEADER_LEN + 2],
                buf[HEADER_LEN + 3],
            ]) as i64
        };
        (len, offset + delta)
    } else {
        if buf.len() < HEADER_LEN + 8 {
            return ParseOutcome::NeedMoreData;
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[HEADER_LEN..HEADER_LEN + 8]);
        (8, Ticks::new(i64::from_be_bytes(bytes)))
    };

    if !cache.contains(runtime_index) {
        return ParseOutcome::BadIndex;
    }

    let (signal_id, source, numeric_id) = cache
        .get_measurement_key(runtime_index)
        .expect("contains() just confirmed presence");

    let measurement = Measurement {
        signal_id,
        source,
        id: numeric_id,
        value: raw_value,
        timestamp,
        flags: map_compact_to_full(compact_flags & 0x3F),
        adder: 0.0,
        multiplier: 1.0,
    };

    ParseOutcome::Parsed {
        measurement,
        consumed: HEADER_LEN + time_len,
    }
}
