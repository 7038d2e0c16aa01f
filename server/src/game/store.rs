//! Entity/component store
//!
//! Entities are opaque monotonic ids with typed components attached. The
//! store itself is pure bookkeeping: the delta log and the spatial index
//! are updated by the world-level helpers so a position change, its index
//! move and its delta record happen as one step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shared::hex::Axial;
use thiserror::Error;

use crate::player::SubjectId;

/// Stable entity identifier; never reused within a session.
pub type EntityId = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error("entity {0} has no {1:?} component")]
    MissingComponent(EntityId, ComponentKind),
}

/// Broad classification of an entity, used by sync priorities and the
/// vision-cache policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    Unit,
    Building,
    Settlement,
    Resource,
    Npc,
    Hero,
    EndgameUnit,
}

impl EntityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityClass::Unit => "unit",
            EntityClass::Building => "building",
            EntityClass::Settlement => "settlement",
            EntityClass::Resource => "resource",
            EntityClass::Npc => "npc",
            EntityClass::Hero => "hero",
            EntityClass::EndgameUnit => "endgame_unit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisionKind {
    Normal,
    SharedSource,
    StealthSight,
}

/// Vision contribution of an observer entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionSpec {
    pub range: i32,
    pub enabled: bool,
    pub kind: VisionKind,
}

/// Mutable numeric attributes. `attrs` uses a BTreeMap so serialized
/// snapshots are stable.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Stats {
    pub health: i32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, i64>,
}

/// The fixed set of base component kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Position,
    Owner,
    Vision,
    Stats,
    Class,
    Stealth,
}

pub const COMPONENT_KINDS: usize = 6;

impl ComponentKind {
    pub(crate) fn index(self) -> usize {
        match self {
            ComponentKind::Position => 0,
            ComponentKind::Owner => 1,
            ComponentKind::Vision => 2,
            ComponentKind::Stats => 3,
            ComponentKind::Class => 4,
            ComponentKind::Stealth => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Position => "position",
            ComponentKind::Owner => "owner",
            ComponentKind::Vision => "vision",
            ComponentKind::Stats => "stats",
            ComponentKind::Class => "class",
            ComponentKind::Stealth => "stealth",
        }
    }
}

/// A typed component value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentValue {
    Position(Axial),
    Owner(SubjectId),
    Vision(VisionSpec),
    Stats(Stats),
    Class(EntityClass),
    Stealth,
}

impl ComponentValue {
    pub fn kind(&self) -> ComponentKind {
        match self {
            ComponentValue::Position(_) => ComponentKind::Position,
            ComponentValue::Owner(_) => ComponentKind::Owner,
            ComponentValue::Vision(_) => ComponentKind::Vision,
            ComponentValue::Stats(_) => ComponentKind::Stats,
            ComponentValue::Class(_) => ComponentKind::Class,
            ComponentValue::Stealth => ComponentKind::Stealth,
        }
    }

    /// Wire form of the value, as carried in `entity_delta.value`.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            ComponentValue::Position(pos) => serde_json::to_value(pos).unwrap_or_default(),
            ComponentValue::Owner(owner) => serde_json::Value::String(owner.to_string()),
            ComponentValue::Vision(v) => serde_json::to_value(v).unwrap_or_default(),
            ComponentValue::Stats(s) => serde_json::to_value(s).unwrap_or_default(),
            ComponentValue::Class(c) => serde_json::Value::String(c.as_str().to_string()),
            ComponentValue::Stealth => serde_json::Value::Bool(true),
        }
    }
}

#[derive(Debug, Default)]
struct Components([Option<ComponentValue>; COMPONENT_KINDS]);

impl Components {
    fn get(&self, kind: ComponentKind) -> Option<&ComponentValue> {
        self.0[kind.index()].as_ref()
    }

    fn set(&mut self, value: ComponentValue) -> Option<ComponentValue> {
        self.0[value.kind().index()].replace(value)
    }

    fn take(&mut self, kind: ComponentKind) -> Option<ComponentValue> {
        self.0[kind.index()].take()
    }

    fn has_all(&self, kinds: &[ComponentKind]) -> bool {
        kinds.iter().all(|k| self.0[k.index()].is_some())
    }
}

/// All live entities of one session.
#[derive(Debug)]
pub struct EntityStore {
    entities: BTreeMap<EntityId, Components>,
    next_id: EntityId,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Creates a new empty entity and returns its id.
    pub fn spawn(&mut self) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        self.entities.insert(id, Components::default());
        id
    }

    /// Removes an entity and all its components.
    pub fn despawn(&mut self, id: EntityId) -> Result<(), StoreError> {
        self.entities
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::UnknownEntity(id))
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Attaches (or replaces) a component; returns the previous value.
    pub fn attach(
        &mut self,
        id: EntityId,
        value: ComponentValue,
    ) -> Result<Option<ComponentValue>, StoreError> {
        self.entities
            .get_mut(&id)
            .map(|c| c.set(value))
            .ok_or(StoreError::UnknownEntity(id))
    }

    /// Detaches a component; returns the removed value.
    pub fn detach(
        &mut self,
        id: EntityId,
        kind: ComponentKind,
    ) -> Result<ComponentValue, StoreError> {
        let components = self
            .entities
            .get_mut(&id)
            .ok_or(StoreError::UnknownEntity(id))?;
        components
            .take(kind)
            .ok_or(StoreError::MissingComponent(id, kind))
    }

    pub fn get(&self, id: EntityId, kind: ComponentKind) -> Result<&ComponentValue, StoreError> {
        let components = self.entities.get(&id).ok_or(StoreError::UnknownEntity(id))?;
        components
            .get(kind)
            .ok_or(StoreError::MissingComponent(id, kind))
    }

    pub fn try_get(&self, id: EntityId, kind: ComponentKind) -> Option<&ComponentValue> {
        self.entities.get(&id)?.get(kind)
    }

    pub fn position(&self, id: EntityId) -> Result<Axial, StoreError> {
        match self.get(id, ComponentKind::Position)? {
            ComponentValue::Position(pos) => Ok(*pos),
            _ => unreachable!("component slot holds its own kind"),
        }
    }

    pub fn owner(&self, id: EntityId) -> Option<SubjectId> {
        match self.try_get(id, ComponentKind::Owner)? {
            ComponentValue::Owner(owner) => Some(*owner),
            _ => None,
        }
    }

    pub fn vision(&self, id: EntityId) -> Option<&VisionSpec> {
        match self.try_get(id, ComponentKind::Vision)? {
            ComponentValue::Vision(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn class(&self, id: EntityId) -> Option<EntityClass> {
        match self.try_get(id, ComponentKind::Class)? {
            ComponentValue::Class(class) => Some(*class),
            _ => None,
        }
    }

    pub fn stats(&self, id: EntityId) -> Option<&Stats> {
        match self.try_get(id, ComponentKind::Stats)? {
            ComponentValue::Stats(stats) => Some(stats),
            _ => None,
        }
    }

    pub fn has_stealth(&self, id: EntityId) -> bool {
        self.try_get(id, ComponentKind::Stealth).is_some()
    }

    /// All live entity ids, in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys().copied()
    }

    /// Entities carrying every kind in `kinds`, in ascending id order.
    pub fn iter_with<'a>(
        &'a self,
        kinds: &'a [ComponentKind],
    ) -> impl Iterator<Item = EntityId> + 'a {
        self.entities
            .iter()
            .filter(move |(_, c)| c.has_all(kinds))
            .map(|(id, _)| *id)
    }
}
