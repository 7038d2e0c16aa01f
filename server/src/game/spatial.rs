//! Spatial index over entity positions
//!
//! Bucketed mapping from world cell to the set of entities standing on it.
//! The index is derived state: it mirrors the Position components in the
//! entity store and is kept in lockstep by the world-level movement helpers.
//! Inconsistencies (double insert, removing an absent entry) are contained:
//! they are logged as invariant violations and the operation is skipped.

use std::collections::{HashMap, HashSet};

use log::error;
use shared::hex::{disk, Axial};

use super::store::EntityId;

#[derive(Debug, Default)]
pub struct SpatialIndex {
    cells: HashMap<Axial, HashSet<EntityId>>,
    len: usize,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` at `cell`. Returns false (and logs) when the id was
    /// already present there.
    pub fn insert(&mut self, id: EntityId, cell: Axial) -> bool {
        if self.cells.entry(cell).or_default().insert(id) {
            self.len += 1;
            true
        } else {
            error!("invariant violation: double insert of entity {} at {}", id, cell);
            false
        }
    }

    /// Removes `id` from `cell`. Returns false (and logs) when the id was
    /// not present there.
    pub fn remove(&mut self, id: EntityId, cell: Axial) -> bool {
        match self.cells.get_mut(&cell) {
            Some(set) => {
                if set.remove(&id) {
                    if set.is_empty() {
                        self.cells.remove(&cell);
                    }
                    self.len -= 1;
                    true
                } else {
                    error!("invariant violation: removing absent entity {} at {}", id, cell);
                    false
                }
            }
            None => {
                error!("invariant violation: removing absent entity {} at {}", id, cell);
                false
            }
        }
    }

    /// Atomically relocates `id` from `old` to `new`.
    pub fn relocate(&mut self, id: EntityId, old: Axial, new: Axial) -> bool {
        if old == new {
            return true;
        }
        self.remove(id, old) && self.insert(id, new)
    }

    /// Entities standing on `cell`.
    pub fn at(&self, cell: Axial) -> impl Iterator<Item = EntityId> + '_ {
        self.cells.get(&cell).into_iter().flatten().copied()
    }

    pub fn contains(&self, id: EntityId, cell: Axial) -> bool {
        self.cells.get(&cell).is_some_and(|set| set.contains(&id))
    }

    /// Entities within distance `radius` of `center`, by disk enumeration.
    pub fn within(&self, center: Axial, radius: i32) -> Vec<EntityId> {
        let mut ids = Vec::new();
        for cell in disk(center, radius) {
            ids.extend(self.at(cell));
        }
        ids
    }

    /// Total number of (cell, id) entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
