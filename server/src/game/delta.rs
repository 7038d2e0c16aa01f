//! Delta log: ring-buffered record of authoritative component changes
//!
//! Every attach/mutate/detach of an observable component and every entity
//! destruction appends one record. The buffer has a fixed capacity; slots
//! are preallocated and reused, so steady-state recording does not allocate
//! beyond the value copy itself. Records hold deep copies; the log never
//! aliases live component memory.
//!
//! Single-writer: only the tick task records. Readers (the sync engine)
//! replay within the same tick, so no locking is needed.

use log::error;

use super::store::{ComponentKind, ComponentValue, EntityId};

/// What changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Component attached or mutated; carries a copy of the new value.
    Set(ComponentValue),
    /// Component detached.
    Unset(ComponentKind),
    /// Entity despawned. Interpreted by the sync engine as disappearance
    /// for every client that knows the entity.
    Destroyed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeltaRecord {
    pub tick: u64,
    pub entity: EntityId,
    pub change: Change,
}

#[derive(Debug)]
pub struct DeltaLog {
    slots: Vec<Option<DeltaRecord>>,
    /// Next write position.
    head: usize,
    len: usize,
}

impl DeltaLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        DeltaLog {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a record. Ticks must be non-decreasing; a violation is
    /// logged and the record is dropped.
    pub fn record(&mut self, tick: u64, entity: EntityId, change: Change) {
        if tick < self.newest_tick() {
            error!(
                "invariant violation: delta record for entity {} at tick {} after tick {}",
                entity,
                tick,
                self.newest_tick()
            );
            return;
        }
        self.slots[self.head] = Some(DeltaRecord { tick, entity, change });
        self.head = (self.head + 1) % self.slots.len();
        self.len = (self.len + 1).min(self.slots.len());
    }

    /// Tick of the oldest live record, or 0 when empty.
    pub fn oldest_tick(&self) -> u64 {
        self.get_logical(0).map_or(0, |r| r.tick)
    }

    /// Tick of the newest live record, or 0 when empty.
    pub fn newest_tick(&self) -> u64 {
        if self.len == 0 {
            0
        } else {
            self.get_logical(self.len - 1).map_or(0, |r| r.tick)
        }
    }

    fn get_logical(&self, i: usize) -> Option<&DeltaRecord> {
        if i >= self.len {
            return None;
        }
        let cap = self.slots.len();
        let start = (self.head + cap - self.len) % cap;
        self.slots[(start + i) % cap].as_ref()
    }

    /// Records with `from_exclusive < tick <= to_inclusive` for which
    /// `predicate` holds, oldest first.
    pub fn replay<'a, P>(
        &'a self,
        from_exclusive: u64,
        to_inclusive: u64,
        predicate: P,
    ) -> impl Iterator<Item = &'a DeltaRecord>
    where
        P: Fn(&DeltaRecord) -> bool + 'a,
    {
        (0..self.len)
            .filter_map(move |i| self.get_logical(i))
            .filter(move |r| r.tick > from_exclusive && r.tick <= to_inclusive)
            .filter(move |r| predicate(r))
    }
}
