use crate::models::SignalDetailRecord;
use chrono::NaiveDateTime;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Per-symbol keyed map shared by every worker of a run.
///
/// Each method completes under the owning shard's lock, so a read-modify-write
/// on one symbol is atomic while other symbols proceed on other shards. Values
/// are handed out by clone; no guard escapes a call.
#[derive(Debug, Clone)]
pub struct Registry<V> {
    map: Arc<DashMap<String, V>>,
}

impl<V> Default for Registry<V> {
    fn default() -> Self {
        Self {
            map: Arc::new(DashMap::new()),
        }
    }
}

impl<V: Clone> Registry<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<V> {
        self.map.get(symbol).map(|entry| entry.value().clone())
    }

    /// Last write wins.
    pub fn set(&self, symbol: &str, value: V) {
        self.map.insert(symbol.to_string(), value);
    }

    pub fn clear(&self, symbol: &str) -> Option<V> {
        self.map.remove(symbol).map(|(_, value)| value)
    }

    /// Check-before-set: stores `value` only when the symbol has no entry.
    pub fn set_if_absent(&self, symbol: &str, value: V) -> bool {
        match self.map.entry(symbol.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Removes the entry when `predicate` accepts the stored value.
    pub fn clear_if<F>(&self, symbol: &str, predicate: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        self.map
            .remove_if(symbol, |_, value| predicate(value))
            .map(|(_, value)| value)
    }

    /// Overwrites the entry when it exists and `predicate` accepts it.
    pub fn replace_if<F>(&self, symbol: &str, value: V, predicate: F) -> bool
    where
        F: FnOnce(&V) -> bool,
    {
        match self.map.entry(symbol.to_string()) {
            Entry::Occupied(mut existing) => {
                if !predicate(existing.get()) {
                    return false;
                }
                existing.insert(value);
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Diagnostic records keyed by `YYYYMMDD#symbol`; the first record for a key is kept.
#[derive(Debug, Clone, Default)]
pub struct DetailLog {
    records: Arc<DashMap<String, SignalDetailRecord>>,
}

impl DetailLog {
    pub fn record(&self, record: SignalDetailRecord) -> bool {
        match self.records.entry(record.key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<SignalDetailRecord> {
        self.records.get(key).map(|entry| entry.value().clone())
    }

    /// All records ordered by key.
    pub fn snapshot(&self) -> Vec<SignalDetailRecord> {
        let mut records: Vec<SignalDetailRecord> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Shared per-symbol detector state: open holdings, the most recent limit-up
/// day, and entry diagnostics. Cloning shares the underlying maps.
#[derive(Debug, Clone, Default)]
pub struct SymbolStateStore {
    pub holding: Registry<NaiveDateTime>,
    pub up_limit: Registry<NaiveDateTime>,
    pub details: DetailLog,
}

impl SymbolStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget a symbol's position and limit-up mark before its stream is replayed.
    pub fn reset_symbol(&self, symbol: &str) {
        self.holding.clear(symbol);
        self.up_limit.clear(symbol);
    }
}
