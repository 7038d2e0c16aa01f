//! Vision cache: persistent memory of explored terrain and scouted entities
//!
//! Each subject accumulates explored cells (additive, with first/last seen
//! ticks) and a selective set of entity snapshots taken when an entity
//! leaves vision. Cached snapshots are replayed as stale `entity_snapshot`
//! messages when the subject reconnects.
//!
//! The working set lives in memory and is mutated only on the tick task;
//! dirty subjects are exported as [`VisionCacheRecord`]s and handed to the
//! background persistence task, which writes them through a [`CacheStore`].

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use shared::hex::Axial;
use thiserror::Error;

use crate::config::CacheConfig;
use crate::game::map::{GameMap, Terrain};
use crate::game::store::{ComponentKind, ComponentValue, EntityClass, EntityId, EntityStore};
use crate::player::SubjectId;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("persistence store unavailable: {0}")]
    Unavailable(String),
    #[error("persistence store timed out")]
    Timeout,
}

/// How long a cached snapshot survives out of vision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Kept until the entity re-enters vision or is destroyed.
    Permanent,
    /// Additionally expires at `expires_at`.
    Timed,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::Permanent => "permanent",
            CacheMode::Timed => "timed",
        }
    }
}

/// One explored cell in a subject's durable record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExploredCell {
    pub hex: Axial,
    pub first_seen: u64,
    pub last_seen: u64,
    pub terrain: Terrain,
}

/// A cached snapshot of an entity last seen at `position`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntity {
    pub id: EntityId,
    pub class: EntityClass,
    pub owner: Option<SubjectId>,
    pub position: Axial,
    /// Selected component subset captured at cache time.
    pub components: Vec<ComponentValue>,
    pub cache_mode: CacheMode,
    /// Expiry tick for timed entries; 0 for permanent ones.
    pub expires_at: u64,
    pub last_seen: u64,
    pub is_stale: bool,
}

/// Durable per-subject record as stored in the persistence store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VisionCacheRecord {
    pub explored: Vec<ExploredCell>,
    pub entities: Vec<CachedEntity>,
}

/// Record store for vision-cache persistence.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self, subject: SubjectId) -> Result<Option<VisionCacheRecord>, PersistenceError>;
    async fn save(&self, subject: SubjectId, record: &VisionCacheRecord)
        -> Result<(), PersistenceError>;
}

/// Process-local record store backing the binary and the tests.
#[derive(Default)]
pub struct InMemoryCacheStore {
    records: std::sync::Mutex<HashMap<SubjectId, VisionCacheRecord>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn load(&self, subject: SubjectId) -> Result<Option<VisionCacheRecord>, PersistenceError> {
        Ok(self.records.lock().unwrap().get(&subject).cloned())
    }

    async fn save(
        &self,
        subject: SubjectId,
        record: &VisionCacheRecord,
    ) -> Result<(), PersistenceError> {
        self.records.lock().unwrap().insert(subject, record.clone());
        Ok(())
    }
}

/// What to persist when an entity leaves a subject's vision.
#[derive(Debug, Clone)]
pub struct CacheDecision {
    pub mode: CacheMode,
    pub expires_at: u64,
    pub components: Vec<ComponentValue>,
}

/// Chooses which entities are worth remembering. The gameplay layer may
/// substitute its own policy.
pub trait CachePolicy: Send + Sync {
    fn on_leave_vision(
        &self,
        store: &EntityStore,
        id: EntityId,
        tick: u64,
    ) -> Option<CacheDecision>;
}

/// Default policy: settlements, NPCs and endgame units are remembered
/// permanently; other buildings and heroes for a configured number of
/// ticks; regular units and resources are not cached.
pub struct DefaultCachePolicy {
    building_duration: u64,
    hero_duration: u64,
}

impl DefaultCachePolicy {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            building_duration: config.building_duration_ticks,
            hero_duration: config.hero_duration_ticks,
        }
    }
}

impl CachePolicy for DefaultCachePolicy {
    fn on_leave_vision(
        &self,
        store: &EntityStore,
        id: EntityId,
        tick: u64,
    ) -> Option<CacheDecision> {
        let class = store.class(id)?;
        let (mode, expires_at) = match class {
            EntityClass::Settlement | EntityClass::Npc | EntityClass::EndgameUnit => {
                (CacheMode::Permanent, 0)
            }
            EntityClass::Building => (CacheMode::Timed, tick + self.building_duration),
            EntityClass::Hero => (CacheMode::Timed, tick + self.hero_duration),
            EntityClass::Unit | EntityClass::Resource => return None,
        };

        let mut components = Vec::new();
        for kind in [ComponentKind::Class, ComponentKind::Owner, ComponentKind::Stats] {
            if let Some(value) = store.try_get(id, kind) {
                components.push(value.clone());
            }
        }
        Some(CacheDecision {
            mode,
            expires_at,
            components,
        })
    }
}

#[derive(Debug, Default)]
struct SubjectCache {
    explored: HashMap<Axial, ExploredCell>,
    entities: HashMap<EntityId, CachedEntity>,
}

/// In-memory working set of every subject's vision cache.
pub struct VisionCache {
    subjects: HashMap<SubjectId, SubjectCache>,
    dirty: HashSet<SubjectId>,
    max_explored: usize,
    max_entities: usize,
}

impl VisionCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            subjects: HashMap::new(),
            dirty: HashSet::new(),
            max_explored: config.max_explored_cells.max(1),
            max_entities: config.max_cached_entities.max(1),
        }
    }

    /// Installs a loaded record for a subject unless newer in-memory state
    /// already exists (the subject reconnected within this process).
    pub fn install(&mut self, subject: SubjectId, record: VisionCacheRecord) {
        if self.subjects.contains_key(&subject) {
            return;
        }
        let cache = SubjectCache {
            explored: record.explored.into_iter().map(|c| (c.hex, c)).collect(),
            entities: record.entities.into_iter().map(|e| (e.id, e)).collect(),
        };
        info!(
            "Loaded vision cache for subject {}: {} cells, {} entities",
            subject,
            cache.explored.len(),
            cache.entities.len()
        );
        self.subjects.insert(subject, cache);
    }

    /// Upserts the explored-cell set with this tick's visible cells.
    pub fn note_visible(
        &mut self,
        subject: SubjectId,
        cells: &HashSet<Axial>,
        tick: u64,
        map: &GameMap,
    ) {
        if cells.is_empty() {
            return;
        }
        let cache = self.subjects.entry(subject).or_default();
        for &hex in cells {
            let terrain = match map.terrain_at(hex) {
                Some(terrain) => terrain,
                None => continue,
            };
            cache
                .explored
                .entry(hex)
                .and_modify(|c| {
                    c.last_seen = tick;
                    c.terrain = terrain;
                })
                .or_insert(ExploredCell {
                    hex,
                    first_seen: tick,
                    last_seen: tick,
                    terrain,
                });
        }
        if cache.explored.len() > self.max_explored {
            evict_oldest(&mut cache.explored, self.max_explored, |c| c.last_seen);
        }
        self.dirty.insert(subject);
    }

    /// Stores a snapshot of an entity that just left vision.
    pub fn cache_entity(&mut self, subject: SubjectId, entry: CachedEntity) {
        let cache = self.subjects.entry(subject).or_default();
        cache.entities.insert(entry.id, entry);
        if cache.entities.len() > self.max_entities {
            evict_oldest(&mut cache.entities, self.max_entities, |e| e.last_seen);
        }
        self.dirty.insert(subject);
    }

    /// Drops a cached entity (vision re-entry or explicit purge). Returns
    /// whether an entry existed.
    pub fn purge_entity(&mut self, subject: SubjectId, id: EntityId) -> bool {
        let removed = self
            .subjects
            .get_mut(&subject)
            .map(|c| c.entities.remove(&id).is_some())
            .unwrap_or(false);
        if removed {
            self.dirty.insert(subject);
        }
        removed
    }

    pub fn contains_entity(&self, subject: SubjectId, id: EntityId) -> bool {
        self.subjects
            .get(&subject)
            .is_some_and(|c| c.entities.contains_key(&id))
    }

    /// Stale snapshots for connect-time replay, ascending by entity id.
    pub fn stale_snapshots(&self, subject: SubjectId) -> Vec<CachedEntity> {
        let mut entries: Vec<CachedEntity> = self
            .subjects
            .get(&subject)
            .map(|c| c.entities.values().filter(|e| e.is_stale).cloned().collect())
            .unwrap_or_default();
        entries.sort_by_key(|e| e.id);
        entries
    }

    /// Explored cells for connect-time replay, in deterministic order.
    pub fn explored_cells(&self, subject: SubjectId) -> Vec<ExploredCell> {
        let mut cells: Vec<ExploredCell> = self
            .subjects
            .get(&subject)
            .map(|c| c.explored.values().cloned().collect())
            .unwrap_or_default();
        cells.sort_by_key(|c| (c.hex.q, c.hex.r));
        cells
    }

    /// Deletes expired timed entries and entries whose entity no longer
    /// exists.
    pub fn prune(&mut self, tick: u64, store: &EntityStore) {
        for (&subject, cache) in self.subjects.iter_mut() {
            let before = cache.entities.len();
            cache.entities.retain(|&id, entry| {
                if entry.cache_mode == CacheMode::Timed && tick >= entry.expires_at {
                    return false;
                }
                store.contains(id)
            });
            if cache.entities.len() != before {
                self.dirty.insert(subject);
            }
        }
    }

    pub fn export(&self, subject: SubjectId) -> Option<VisionCacheRecord> {
        let cache = self.subjects.get(&subject)?;
        let mut record = VisionCacheRecord {
            explored: cache.explored.values().cloned().collect(),
            entities: cache.entities.values().cloned().collect(),
        };
        record.explored.sort_by_key(|c| (c.hex.q, c.hex.r));
        record.entities.sort_by_key(|e| e.id);
        Some(record)
    }

    /// Exports and clears the dirty set for the persistence task.
    pub fn take_dirty(&mut self) -> Vec<(SubjectId, VisionCacheRecord)> {
        let subjects: Vec<SubjectId> = self.dirty.drain().collect();
        subjects
            .into_iter()
            .filter_map(|s| self.export(s).map(|r| (s, r)))
            .collect()
    }

    /// Flags one subject for persistence.
    pub fn mark_dirty(&mut self, subject: SubjectId) {
        if self.subjects.contains_key(&subject) {
            self.dirty.insert(subject);
        }
    }

    /// Flags every known subject for persistence (used at shutdown).
    pub fn mark_all_dirty(&mut self) {
        let all: Vec<SubjectId> = self.subjects.keys().copied().collect();
        self.dirty.extend(all);
    }
}

fn evict_oldest<K, V>(map: &mut HashMap<K, V>, cap: usize, last_seen: impl Fn(&V) -> u64)
where
    K: std::hash::Hash + Eq + Copy,
{
    let excess = map.len().saturating_sub(cap);
    if excess == 0 {
        return;
    }
    let mut by_age: Vec<(u64, K)> = map.iter().map(|(k, v)| (last_seen(v), *k)).collect();
    by_age.sort_unstable_by_key(|(age, _)| *age);
    for (_, key) in by_age.into_iter().take(excess) {
        map.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::store::Stats;

    fn config() -> CacheConfig {
        CacheConfig::default()
    }

    fn map() -> GameMap {
        GameMap::generate(0, 0)
    }

    fn cached(id: EntityId, mode: CacheMode, expires_at: u64, last_seen: u64) -> CachedEntity {
        CachedEntity {
            id,
            class: EntityClass::Building,
            owner: Some(2),
            position: Axial::new(1, 1),
            components: vec![],
            cache_mode: mode,
            expires_at,
            last_seen,
            is_stale: true,
        }
    }

    #[test]
    fn test_explored_cells_are_additive() {
        let mut cache = VisionCache::new(&config());
        let map = map();
        let cells: HashSet<Axial> = [Axial::new(0, 0), Axial::new(1, 0)].into_iter().collect();
        cache.note_visible(1, &cells, 10, &map);

        let only_first: HashSet<Axial> = [Axial::new(0, 0)].into_iter().collect();
        cache.note_visible(1, &only_first, 20, &map);

        let explored = cache.explored_cells(1);
        assert_eq!(explored.len(), 2);
        let origin = explored.iter().find(|c| c.hex == Axial::new(0, 0)).unwrap();
        assert_eq!(origin.first_seen, 10);
        assert_eq!(origin.last_seen, 20);
        let other = explored.iter().find(|c| c.hex == Axial::new(1, 0)).unwrap();
        assert_eq!(other.last_seen, 10);
        assert!(explored.iter().all(|c| c.last_seen >= c.first_seen));
    }

    #[test]
    fn test_cells_outside_the_map_are_skipped() {
        let mut cache = VisionCache::new(&config());
        let map = map();
        let far = GameMap::chunk_center(Axial::new(9, 9));
        let cells: HashSet<Axial> = [far].into_iter().collect();
        cache.note_visible(1, &cells, 1, &map);
        assert!(cache.explored_cells(1).is_empty());
    }

    #[test]
    fn test_default_policy_by_class() {
        let mut store = EntityStore::new();
        let policy = DefaultCachePolicy::new(&config());

        fn entity_of(store: &mut EntityStore, class: EntityClass) -> EntityId {
            let id = store.spawn();
            store.attach(id, ComponentValue::Class(class)).unwrap();
            store.attach(id, ComponentValue::Owner(5)).unwrap();
            store
                .attach(id, ComponentValue::Stats(Stats { health: 3, ..Stats::default() }))
                .unwrap();
            id
        }

        let settlement = entity_of(&mut store, EntityClass::Settlement);
        let decision = policy.on_leave_vision(&store, settlement, 100).unwrap();
        assert_eq!(decision.mode, CacheMode::Permanent);
        assert_eq!(decision.expires_at, 0);
        assert_eq!(decision.components.len(), 3);

        let building = entity_of(&mut store, EntityClass::Building);
        let decision = policy.on_leave_vision(&store, building, 100).unwrap();
        assert_eq!(decision.mode, CacheMode::Timed);
        assert_eq!(decision.expires_at, 100 + 12_000);

        let hero = entity_of(&mut store, EntityClass::Hero);
        let decision = policy.on_leave_vision(&store, hero, 100).unwrap();
        assert_eq!(decision.expires_at, 100 + 36_000);

        let npc = entity_of(&mut store, EntityClass::Npc);
        assert_eq!(
            policy.on_leave_vision(&store, npc, 100).unwrap().mode,
            CacheMode::Permanent
        );

        let endgame = entity_of(&mut store, EntityClass::EndgameUnit);
        assert_eq!(
            policy.on_leave_vision(&store, endgame, 100).unwrap().mode,
            CacheMode::Permanent
        );

        let unit = entity_of(&mut store, EntityClass::Unit);
        assert!(policy.on_leave_vision(&store, unit, 100).is_none());
        let resource = entity_of(&mut store, EntityClass::Resource);
        assert!(policy.on_leave_vision(&store, resource, 100).is_none());
    }

    #[test]
    fn test_prune_removes_expired_and_dangling() {
        let mut store = EntityStore::new();
        let live = store.spawn();

        let mut cache = VisionCache::new(&config());
        cache.cache_entity(1, cached(live, CacheMode::Timed, 200, 100));
        cache.cache_entity(1, cached(999, CacheMode::Permanent, 0, 100));
        cache.take_dirty();

        // Not yet expired; 999 dangles and goes away.
        cache.prune(150, &store);
        assert!(cache.contains_entity(1, live));
        assert!(!cache.contains_entity(1, 999));

        cache.prune(200, &store);
        assert!(!cache.contains_entity(1, live));
        assert_eq!(cache.take_dirty().len(), 1);
    }

    #[test]
    fn test_entity_cap_evicts_oldest() {
        let mut cache = VisionCache::new(&CacheConfig {
            max_cached_entities: 2,
            ..config()
        });
        cache.cache_entity(1, cached(1, CacheMode::Permanent, 0, 10));
        cache.cache_entity(1, cached(2, CacheMode::Permanent, 0, 30));
        cache.cache_entity(1, cached(3, CacheMode::Permanent, 0, 20));
        assert!(!cache.contains_entity(1, 1));
        assert!(cache.contains_entity(1, 2));
        assert!(cache.contains_entity(1, 3));
    }

    #[test]
    fn test_stale_snapshots_sorted_by_id() {
        let mut cache = VisionCache::new(&config());
        cache.cache_entity(1, cached(9, CacheMode::Permanent, 0, 5));
        cache.cache_entity(1, cached(3, CacheMode::Permanent, 0, 5));
        let ids: Vec<EntityId> = cache.stale_snapshots(1).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 9]);
        assert!(cache.stale_snapshots(2).is_empty());
    }

    #[test]
    fn test_record_round_trip_is_structurally_equal() {
        let mut cache = VisionCache::new(&config());
        let map = map();
        let cells: HashSet<Axial> = [Axial::new(0, 0), Axial::new(2, -1)].into_iter().collect();
        cache.note_visible(7, &cells, 42, &map);
        cache.cache_entity(7, cached(11, CacheMode::Timed, 500, 42));

        let record = cache.export(7).unwrap();
        let json = serde_json::to_string(&record).unwrap();
        let back: VisionCacheRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_install_does_not_clobber_live_state() {
        let mut cache = VisionCache::new(&config());
        cache.cache_entity(1, cached(5, CacheMode::Permanent, 0, 50));
        cache.install(
            1,
            VisionCacheRecord {
                explored: vec![],
                entities: vec![cached(6, CacheMode::Permanent, 0, 10)],
            },
        );
        assert!(cache.contains_entity(1, 5));
        assert!(!cache.contains_entity(1, 6));

        cache.install(
            2,
            VisionCacheRecord {
                explored: vec![],
                entities: vec![cached(6, CacheMode::Permanent, 0, 10)],
            },
        );
        assert!(cache.contains_entity(2, 6));
    }

    #[tokio::test]
    async fn test_in_memory_store_round_trip() {
        let store = InMemoryCacheStore::new();
        assert!(store.load(1).await.unwrap().is_none());
        let record = VisionCacheRecord {
            explored: vec![],
            entities: vec![cached(4, CacheMode::Permanent, 0, 1)],
        };
        store.save(1, &record).await.unwrap();
        assert_eq!(store.load(1).await.unwrap(), Some(record));
    }
}
