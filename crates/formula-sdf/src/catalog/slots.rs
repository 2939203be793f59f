use std::sync::Arc;

use super::SdfInfo;
use crate::dispatch::Callable;

/// Dense index -> callable table with a parallel index -> record column.
///
/// Both columns always have the same power-of-two length. Deleted functions leave a
/// [`Callable::Deleted`] tombstone behind and their index is never handed out again.
pub(crate) struct SlotTable {
    callables: Vec<Callable>,
    records: Vec<Option<Arc<SdfInfo>>>,
}

impl SlotTable {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let len = capacity.max(1).next_power_of_two();
        Self {
            callables: vec![Callable::Vacant; len],
            records: vec![None; len],
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.callables.len()
    }

    /// Makes `index` addressable, doubling as often as needed.
    ///
    /// The grown table is built completely before it replaces `self`, and callers hold the
    /// table's write lock, so readers see either the old or the new table.
    pub(crate) fn ensure(&mut self, index: usize) {
        if index < self.len() {
            return;
        }
        let mut len = self.len();
        while index >= len {
            len *= 2;
        }
        let mut callables = Vec::with_capacity(len);
        callables.extend(self.callables.iter().cloned());
        callables.resize(len, Callable::Vacant);
        let mut records = Vec::with_capacity(len);
        records.extend(self.records.iter().cloned());
        records.resize(len, None);
        log::trace!("growing function slot table {} -> {len}", self.len());
        *self = Self { callables, records };
    }

    pub(crate) fn callable(&self, index: usize) -> Option<&Callable> {
        self.callables.get(index)
    }

    pub(crate) fn record(&self, index: usize) -> Option<&Arc<SdfInfo>> {
        self.records.get(index).and_then(Option::as_ref)
    }

    pub(crate) fn set_callable(&mut self, index: usize, callable: Callable) {
        self.ensure(index);
        self.callables[index] = callable;
    }

    pub(crate) fn set_record(&mut self, index: usize, record: Option<Arc<SdfInfo>>) {
        self.ensure(index);
        self.records[index] = record;
    }

    pub(crate) fn live_records(&self) -> impl Iterator<Item = &Arc<SdfInfo>> {
        self.records.iter().filter_map(Option::as_ref)
    }
}
