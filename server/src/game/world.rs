//! World state composition
//!
//! Owns the map, the entity store, the spatial index, the delta log and the
//! vision engine, and provides the mutation helpers that keep them in
//! lockstep: a position change updates the spatial index, the component and
//! the delta log as one step, and observer changes flag the owner's vision
//! for recomputation.
//!
//! All mutation happens on the session's tick task; gameplay systems run as
//! hooks inside the tick and receive the world mutably.

use shared::hex::Axial;

use super::delta::{Change, DeltaLog};
use super::map::GameMap;
use super::spatial::SpatialIndex;
use super::store::{ComponentKind, ComponentValue, EntityId, EntityStore, StoreError};
use super::vision::VisionEngine;

/// A gameplay system invoked every tick. The production/inventory substrate
/// and movement/combat rules plug in through this hook.
pub trait GameSystem: Send {
    fn name(&self) -> &str;
    fn tick(&mut self, world: &mut World);
}

/// The authoritative world of one session.
pub struct World {
    pub map: GameMap,
    pub store: EntityStore,
    pub spatial: SpatialIndex,
    pub delta: DeltaLog,
    pub vision: VisionEngine,
    /// Completed tick count; bumped by the session at the end of each tick.
    pub tick: u64,
}

impl World {
    pub fn new(map: GameMap, delta_capacity: usize) -> Self {
        World {
            map,
            store: EntityStore::new(),
            spatial: SpatialIndex::new(),
            delta: DeltaLog::new(delta_capacity),
            vision: VisionEngine::new(),
            tick: 0,
        }
    }

    /// Spawns an entity with the given components, recording one delta per
    /// component and registering Position in the spatial index.
    pub fn spawn(&mut self, components: Vec<ComponentValue>) -> EntityId {
        let id = self.store.spawn();
        for value in components {
            // The entity was just created, so attach cannot fail.
            let _ = self.attach(id, value);
        }
        id
    }

    /// Despawns an entity: spatial index entry, components and a terminal
    /// destroyed record.
    pub fn despawn(&mut self, id: EntityId) -> Result<(), StoreError> {
        if let Ok(cell) = self.store.position(id) {
            self.spatial.remove(id, cell);
        }
        self.mark_observer_change(id);
        self.store.despawn(id)?;
        self.delta.record(self.tick, id, Change::Destroyed);
        Ok(())
    }

    /// Attaches or mutates a component, with the delta record and any
    /// derived-state updates.
    pub fn attach(&mut self, id: EntityId, value: ComponentValue) -> Result<(), StoreError> {
        if let ComponentValue::Position(new) = value {
            return self.move_entity(id, new);
        }
        let kind = value.kind();
        self.store.attach(id, value.clone())?;
        if matters_to_vision(kind) {
            self.mark_observer_change(id);
        }
        self.delta.record(self.tick, id, Change::Set(value));
        Ok(())
    }

    /// Alias for [`World::attach`]; components are replaced in place.
    pub fn mutate(&mut self, id: EntityId, value: ComponentValue) -> Result<(), StoreError> {
        self.attach(id, value)
    }

    /// Detaches a component, recording the removal.
    pub fn detach(&mut self, id: EntityId, kind: ComponentKind) -> Result<(), StoreError> {
        if kind == ComponentKind::Position {
            if let Ok(cell) = self.store.position(id) {
                self.spatial.remove(id, cell);
            }
        }
        self.store.detach(id, kind)?;
        if matters_to_vision(kind) {
            self.mark_observer_change(id);
        }
        self.delta.record(self.tick, id, Change::Unset(kind));
        Ok(())
    }

    /// Moves an entity: spatial index, Position component and delta record
    /// as one atomic step.
    pub fn move_entity(&mut self, id: EntityId, new: Axial) -> Result<(), StoreError> {
        match self.store.position(id) {
            Ok(old) => {
                self.spatial.relocate(id, old, new);
            }
            Err(StoreError::MissingComponent(..)) => {
                self.spatial.insert(id, new);
            }
            Err(e) => return Err(e),
        }
        self.store.attach(id, ComponentValue::Position(new))?;
        self.mark_observer_change(id);
        self.delta
            .record(self.tick, id, Change::Set(ComponentValue::Position(new)));
        Ok(())
    }

    /// Recomputes per-subject visibility against the current store and
    /// spatial index (tick step 3).
    pub fn recompute_vision(&mut self, stealth: &dyn super::vision::StealthPolicy, interval: u64) {
        let World {
            store,
            spatial,
            vision,
            tick,
            ..
        } = self;
        vision.recompute(store, spatial, stealth, *tick, interval);
    }

    /// Flags the owning subject's vision when `id` is (or was) an observer.
    fn mark_observer_change(&mut self, id: EntityId) {
        if let Some(owner) = self.store.owner(id) {
            if self.store.vision(id).is_some() {
                self.vision.mark_dirty(owner);
            }
        }
    }
}

fn matters_to_vision(kind: ComponentKind) -> bool {
    matches!(
        kind,
        ComponentKind::Owner | ComponentKind::Vision | ComponentKind::Position
    )
}
