//! Bidirectional mapping between per-connection 16-bit runtime indices and
//! 128-bit signal IDs. One cache lives per subscriber connection and is
//! rebuilt wholesale (never mutated in place under concurrent read) whenever
//! the subscribed signal set changes.

use std::collections::HashMap;

use sttp_types::SignalId;

use crate::error::PublisherError;

/// Reserved sentinel meaning "no runtime index assigned to this signal".
pub const UNMAPPED_INDEX: u16 = 0xFFFF;

#[derive(Debug, Clone)]
struct Entry {
    signal_id: SignalId,
    source: Option<String>,
    numeric_id: Option<u32>,
}

/// Forward/reverse signal-index map for one connection.
///
/// Effectively immutable once built: a codec captures a reference at the
/// start of a publish and the cache is never edited underneath it. Changing
/// the subscribed set means building a new `SignalIndexCache` and swapping
/// the connection's reference, never mutating this one in place.
#[derive(Debug, Clone, Default)]
pub struct SignalIndexCache {
    forward: HashMap<u16, Entry>,
    reverse: HashMap<SignalId, u16>,
    /// Insertion order of indices, for deterministic iteration.
    order: Vec<u16>,
}

impl SignalIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the mapping for `index`. If `index` was already
    /// assigned to a different signal, that signal's reverse entry is
    /// removed first so the cache never holds a dangling reverse mapping.
    pub fn assign(
        &mut self,
        index: u16,
        signal_id: SignalId,
        source: Option<String>,
        numeric_id: Option<u32>,
    ) {
        if let Some(old) = self.forward.get(&index) {
            self.reverse.remove(&old.signal_id);
        } else {
            self.order.push(index);
        }
        self.reverse.insert(signal_id, index);
        self.forward.insert(
            index,
            Entry {
                signal_id,
                source,
                numeric_id,
            },
        );
    }

    pub fn contains(&self, index: u16) -> bool {
        self.forward.contains_key(&index)
    }

    /// Returns `(signal_id, source, numeric_id)` for a runtime index.
    pub fn get_measurement_key(
        &self,
        index: u16,
    ) -> Result<(SignalId, Option<String>, Option<u32>), PublisherError> {
        self.forward
            .get(&index)
            .map(|e| (e.signal_id, e.source.clone(), e.numeric_id))
            .ok_or(PublisherError::UnknownIndex(index))
    }

    /// Returns the runtime index for a signal, or the protocol sentinel
    /// [`UNMAPPED_INDEX`] when absent — this is not an error condition.
    pub fn get_signal_index(&self, signal_id: SignalId) -> u16 {
        self.reverse.get(&signal_id).copied().unwrap_or(UNMAPPED_INDEX)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
        self.order.clear();
    }

    /// Iterate `(index, signal_id)` pairs in assignment order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, SignalId)> + '_ {
        self.order
            .iter()
            .map(move |idx| (*idx, self.forward[idx].signal_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn contains_matches_get_measurement_key_success() {
        let mut cache = SignalIndexCache::new();
        let id = Uuid::new_v4();
        cache.assign(7, id, Some("PMU1".into()), Some(42));

        assert!(cache.contains(7));
        let (got_id, source, numeric_id) = cache.get_measurement_key(7).unwrap();
        assert_eq!(got_id, id);
        assert_eq!(source.as_deref(), Some("PMU1"));
        assert_eq!(numeric_id, Some(42));
        assert_eq!(cache.get_signal_index(id), 7);
    }

    #[test]
    fn unknown_index_is_unknown_index_error() {
        let cache = SignalIndexCache::new();
        assert!(!cache.contains(3));
        assert!(matches!(
            cache.get_measurement_key(3),
            Err(PublisherError::UnknownIndex(3))
        ));
    }

    #[test]
    fn absent_signal_returns_sentinel_not_error() {
        let cache = SignalIndexCache::new();
        assert_eq!(cache.get_signal_index(Uuid::new_v4()), UNMAPPED_INDEX);
    }

    #[test]
    fn reassigning_an_index_drops_the_old_reverse_entry() {
        let mut cache = SignalIndexCache::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        cache.assign(1, a, None, None);
        cache.assign(1, b, None, None);

        assert_eq!(cache.get_signal_index(a), UNMAPPED_INDEX);
        assert_eq!(cache.get_signal_index(b), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let mut cache = SignalIndexCache::new();
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            cache.assign(i as u16, *id, None, None);
        }
        let observed: Vec<u16> = cache.iter().map(|(idx, _)| idx).collect();
        assert_eq!(observed, vec![0, 1, 2, 3]);
    }
}
