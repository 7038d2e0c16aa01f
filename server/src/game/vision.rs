//! Per-subject visibility
//!
//! Each subject owns a visibility map with three cell states: shroud (never
//! seen, stored implicitly), fog (seen before, not currently observed) and
//! visible. Visibility flows from observer entities (entities carrying
//! both an Owner and an enabled Vision component) and from shared-vision
//! peers via a directed "shares-vision-to" relation.
//!
//! Recomputation is two-phase. Cell coverage (the expensive disk
//! enumeration per observer) runs for subjects whose observer set changed
//! or on the configured interval; merging, fog demotion and the
//! visible-entity diff run every tick for every subject.

use std::collections::{HashMap, HashSet};

use shared::hex::{disk, Axial};

use super::spatial::SpatialIndex;
use super::store::{ComponentKind, EntityId, EntityStore, VisionKind, VisionSpec};
use crate::player::SubjectId;

/// Visibility state of one cell from one subject's perspective.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Shroud = 0,
    Fog = 1,
    Visible = 2,
}

impl Visibility {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Visibility::Fog,
            2 => Visibility::Visible,
            _ => Visibility::Shroud,
        }
    }
}

/// One observer entity contributing to a subject's vision.
#[derive(Debug, Clone)]
pub struct Observer {
    pub entity: EntityId,
    pub cell: Axial,
    pub spec: VisionSpec,
}

/// Decides whether a stealth entity at `cell` is revealed to a subject
/// whose (own and shared-in) observers are given.
pub trait StealthPolicy: Send + Sync {
    fn reveals(&self, cell: Axial, observers: &[Observer]) -> bool;
}

/// Default predicate: revealed when any stealth-sight observer holds the
/// cell within its own range.
pub struct DefaultStealthPolicy;

impl StealthPolicy for DefaultStealthPolicy {
    fn reveals(&self, cell: Axial, observers: &[Observer]) -> bool {
        observers.iter().any(|o| {
            o.spec.enabled
                && o.spec.kind == VisionKind::StealthSight
                && o.cell.distance(cell) <= o.spec.range
        })
    }
}

/// Vision state of one subject.
#[derive(Debug, Default)]
pub struct SubjectVision {
    /// Fog/visible cells; shroud cells are absent.
    map: HashMap<Axial, Visibility>,
    /// Cells covered by this subject's own observers.
    own_visible: HashSet<Axial>,
    /// Own cells merged with inbound shared vision.
    visible_cells: HashSet<Axial>,
    visible_entities: HashSet<EntityId>,
    entered: Vec<EntityId>,
    left: Vec<EntityId>,
    observers: Vec<Observer>,
    shares_to: HashSet<SubjectId>,
    shared_from: HashSet<SubjectId>,
}

impl SubjectVision {
    pub fn state(&self, cell: Axial) -> Visibility {
        self.map.get(&cell).copied().unwrap_or(Visibility::Shroud)
    }

    pub fn visible_cells(&self) -> &HashSet<Axial> {
        &self.visible_cells
    }

    pub fn visible_entities(&self) -> &HashSet<EntityId> {
        &self.visible_entities
    }

    /// Entities that entered vision on the last recompute.
    pub fn entered(&self) -> &[EntityId] {
        &self.entered
    }

    /// Entities that left vision on the last recompute.
    pub fn left(&self) -> &[EntityId] {
        &self.left
    }

    pub fn observers(&self) -> &[Observer] {
        &self.observers
    }

    pub fn inbound(&self) -> &HashSet<SubjectId> {
        &self.shared_from
    }

    pub fn outbound(&self) -> &HashSet<SubjectId> {
        &self.shares_to
    }
}

/// All subjects' vision state plus the shared-vision relation.
#[derive(Debug, Default)]
pub struct VisionEngine {
    subjects: HashMap<SubjectId, SubjectVision>,
    dirty: HashSet<SubjectId>,
}

impl VisionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_subject(&mut self, subject: SubjectId) {
        self.subjects.entry(subject).or_default();
        self.dirty.insert(subject);
    }

    /// Drops a subject and removes it from every peer's share sets.
    pub fn remove_subject(&mut self, subject: SubjectId) {
        self.subjects.remove(&subject);
        self.dirty.remove(&subject);
        for vision in self.subjects.values_mut() {
            vision.shares_to.remove(&subject);
            vision.shared_from.remove(&subject);
        }
    }

    pub fn subject(&self, subject: SubjectId) -> Option<&SubjectVision> {
        self.subjects.get(&subject)
    }

    pub fn subjects(&self) -> impl Iterator<Item = SubjectId> + '_ {
        self.subjects.keys().copied()
    }

    /// Flags a subject for cell recomputation on the next pass.
    pub fn mark_dirty(&mut self, subject: SubjectId) {
        if self.subjects.contains_key(&subject) {
            self.dirty.insert(subject);
        }
    }

    /// Grants `to` the vision of `from` (one-way).
    pub fn share(&mut self, from: SubjectId, to: SubjectId) {
        if from == to {
            return;
        }
        self.subjects.entry(from).or_default().shares_to.insert(to);
        self.subjects.entry(to).or_default().shared_from.insert(from);
    }

    pub fn unshare(&mut self, from: SubjectId, to: SubjectId) {
        if let Some(vision) = self.subjects.get_mut(&from) {
            vision.shares_to.remove(&to);
        }
        if let Some(vision) = self.subjects.get_mut(&to) {
            vision.shared_from.remove(&from);
        }
    }

    /// Recomputes visibility for all subjects.
    ///
    /// Cell coverage is refreshed for dirty subjects, or for everyone when
    /// `tick` is a multiple of `interval`. Merging, fog demotion and the
    /// entity diff always run.
    pub fn recompute(
        &mut self,
        store: &EntityStore,
        spatial: &SpatialIndex,
        stealth: &dyn StealthPolicy,
        tick: u64,
        interval: u64,
    ) {
        let all_due = interval <= 1 || tick % interval == 0;

        // Observer collection for every subject due a cell refresh.
        let mut observers_by_owner: HashMap<SubjectId, Vec<Observer>> = HashMap::new();
        for id in store.iter_with(&[ComponentKind::Owner, ComponentKind::Vision]) {
            let owner = match store.owner(id) {
                Some(owner) => owner,
                None => continue,
            };
            if !self.subjects.contains_key(&owner) {
                continue;
            }
            if !(all_due || self.dirty.contains(&owner)) {
                continue;
            }
            let spec = match store.vision(id) {
                Some(spec) => spec.clone(),
                None => continue,
            };
            let cell = match store.position(id) {
                Ok(cell) => cell,
                Err(_) => continue,
            };
            observers_by_owner.entry(owner).or_default().push(Observer {
                entity: id,
                cell,
                spec,
            });
        }

        for (&subject, vision) in self.subjects.iter_mut() {
            if !(all_due || self.dirty.contains(&subject)) {
                continue;
            }
            let observers = observers_by_owner.remove(&subject).unwrap_or_default();
            let mut own = HashSet::new();
            for observer in &observers {
                if observer.spec.enabled {
                    own.extend(disk(observer.cell, observer.spec.range.max(0)));
                }
            }
            vision.observers = observers;
            vision.own_visible = own;
        }
        self.dirty.clear();

        // Merge inbound shares. Peer sets are read from a snapshot of the
        // own-visible sets to sidestep aliasing while mutating.
        let own_sets: HashMap<SubjectId, HashSet<Axial>> = self
            .subjects
            .iter()
            .map(|(&s, v)| (s, v.own_visible.clone()))
            .collect();
        let inbound_observers: HashMap<SubjectId, Vec<Observer>> = self
            .subjects
            .iter()
            .map(|(&s, v)| {
                let mut observers = v.observers.clone();
                for peer in &v.shared_from {
                    if let Some(peer_vision) = self.subjects.get(peer) {
                        observers.extend(peer_vision.observers.iter().cloned());
                    }
                }
                (s, observers)
            })
            .collect();

        for (&subject, vision) in self.subjects.iter_mut() {
            let mut merged = vision.own_visible.clone();
            for peer in &vision.shared_from {
                if let Some(cells) = own_sets.get(peer) {
                    merged.extend(cells.iter().copied());
                }
            }

            // Demote cells that dropped out of view, reveal the rest.
            for (cell, state) in vision.map.iter_mut() {
                if *state == Visibility::Visible && !merged.contains(cell) {
                    *state = Visibility::Fog;
                }
            }
            for cell in &merged {
                vision.map.insert(*cell, Visibility::Visible);
            }

            // Gather entities standing on visible cells.
            let observers = &inbound_observers[&subject];
            let mut current: HashSet<EntityId> = HashSet::new();
            for cell in &merged {
                for id in spatial.at(*cell) {
                    if store.has_stealth(id) && !stealth.reveals(*cell, observers) {
                        continue;
                    }
                    current.insert(id);
                }
            }

            vision.entered = current.difference(&vision.visible_entities).copied().collect();
            vision.left = vision.visible_entities.difference(&current).copied().collect();
            vision.entered.sort_unstable();
            vision.left.sort_unstable();
            vision.visible_entities = current;
            vision.visible_cells = merged;
        }
    }
}
