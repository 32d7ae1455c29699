use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::model::Record;

/// Field-level "richer wins" merge. Every impl is monotonic and idempotent:
/// strings never get shorter, numbers never get smaller, and absent values
/// are only ever filled in.
pub trait Merge {
    fn merge_from(&mut self, incoming: Self);
}

impl Merge for u64 {
    fn merge_from(&mut self, incoming: Self) {
        if incoming > *self {
            *self = incoming;
        }
    }
}

/// Length is counted in characters, so accented or emoji text is not
/// favored over the same amount of ASCII.
impl Merge for String {
    fn merge_from(&mut self, incoming: Self) {
        if incoming.chars().count() > self.chars().count() {
            *self = incoming;
        }
    }
}

impl<T: Merge> Merge for Option<T> {
    fn merge_from(&mut self, incoming: Self) {
        match (self.as_mut(), incoming) {
            (Some(old), Some(new)) => old.merge_from(new),
            (None, Some(new)) => *self = Some(new),
            (_, None) => {}
        }
    }
}

impl<V: Merge> Merge for BTreeMap<String, V> {
    fn merge_from(&mut self, incoming: Self) {
        for (key, value) in incoming {
            match self.get_mut(&key) {
                Some(old) => old.merge_from(value),
                None => {
                    self.insert(key, value);
                }
            }
        }
    }
}

impl Merge for Value {
    fn merge_from(&mut self, incoming: Self) {
        if self.is_null() {
            *self = incoming;
            return;
        }
        match (self, incoming) {
            (Value::String(old), Value::String(new)) => old.merge_from(new),
            (Value::Number(old), Value::Number(new)) => {
                let (a, b) = (old.as_f64().unwrap_or(0.0), new.as_f64().unwrap_or(0.0));
                if b > a {
                    *old = new;
                }
            }
            (Value::Object(old), Value::Object(new)) => {
                // Shallow: sub-values follow the same rule, one level deep.
                for (key, value) in new {
                    match old.get_mut(&key) {
                        Some(prev) if !prev.is_null() => shallow_merge(prev, value),
                        _ => {
                            old.insert(key, value);
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

fn shallow_merge(prev: &mut Value, value: Value) {
    match (&mut *prev, value) {
        (Value::String(old), Value::String(new)) => old.merge_from(new),
        (Value::Number(old), Value::Number(new)) => {
            if new.as_f64().unwrap_or(0.0) > old.as_f64().unwrap_or(0.0) {
                *old = new;
            }
        }
        _ => {}
    }
}

impl Merge for Record {
    fn merge_from(&mut self, incoming: Self) {
        self.link.merge_from(incoming.link);
        self.name.merge_from(incoming.name);
        self.handle.merge_from(incoming.handle);
        self.date.merge_from(incoming.date);
        self.message.merge_from(incoming.message);
        self.parent_link.merge_from(incoming.parent_link);
        self.reactions.merge_from(incoming.reactions);
        self.metrics.merge_from(incoming.metrics);
        self.extras.merge_from(incoming.extras);
    }
}

/// Canonical items keyed by identity, in first-sighting order.
#[derive(Debug, Default, Clone)]
pub struct CaptureStore {
    index: HashMap<String, usize>,
    items: Vec<Record>,
}

/// Outcome of one reconcile pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub merged: usize,
}

impl CaptureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, link: &str) -> Option<&Record> {
        self.index.get(link).map(|&i| &self.items[i])
    }

    pub fn items(&self) -> &[Record] {
        &self.items
    }

    /// Merge one record. Returns true if its key was not seen before.
    pub fn upsert(&mut self, record: Record) -> bool {
        if record.link.is_empty() {
            return false;
        }
        match self.index.get(&record.link) {
            Some(&i) => {
                self.items[i].merge_from(record);
                false
            }
            None => {
                self.index.insert(record.link.clone(), self.items.len());
                self.items.push(record);
                true
            }
        }
    }

    pub fn reconcile(&mut self, records: Vec<Record>) -> MergeStats {
        let mut stats = MergeStats::default();
        for record in records {
            if record.link.is_empty() {
                continue;
            }
            if self.upsert(record) {
                stats.inserted += 1;
            } else {
                stats.merged += 1;
            }
        }
        stats
    }

    pub fn snapshot(&self) -> Vec<Record> {
        self.items.clone()
    }
}
