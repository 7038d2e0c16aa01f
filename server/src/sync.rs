//! Per-client entity synchronization
//!
//! Translates the vision engine's per-subject visible sets and the global
//! delta log into per-client message streams. Each client tracks the set of
//! entities it holds a snapshot of (the known set); entering entities get a
//! full snapshot of current values, leaving entities get a disappearance or
//! a cache notice, and everything else flows as vision-filtered deltas.
//!
//! Anti-leak rules: deltas are only replayed for entities in the live known
//! set, entities entering vision never receive pre-entry history, and
//! entities that left the set are filtered out of the replay. Stale
//! cache-replay entries count toward the client's known set but are inert
//! until the entity re-enters vision.
//!
//! Outbound frames are serialized at enqueue time and drained through a
//! priority queue under a per-tick byte budget; undelivered frames stay
//! queued.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use shared::hex::Axial;
use shared::protocol::ServerMessage;

use crate::cache::{CachePolicy, CachedEntity, VisionCache};
use crate::config::SyncConfig;
use crate::game::delta::Change;
use crate::game::store::{ComponentValue, EntityClass, EntityId};
use crate::game::vision::SubjectVision;
use crate::game::world::World;
use crate::player::SubjectId;

/// Emission tiers, highest last for derived ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

#[derive(Debug)]
struct PendingItem {
    priority: Priority,
    entity: EntityId,
    /// Tie-breaker preserving enqueue order within a tier.
    seq: u64,
    frame: String,
}

impl PartialEq for PendingItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PendingItem {}

impl Ord for PendingItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher tier first, then ascending entity id, then
        // enqueue order.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.entity.cmp(&self.entity))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PendingItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sync state of one connected client.
#[derive(Debug, Default)]
pub struct ClientSync {
    last_sync_tick: u64,
    /// Entities the client holds a live snapshot of.
    known: HashSet<EntityId>,
    /// Entities the client holds a stale cache-replay snapshot of.
    stale_known: HashSet<EntityId>,
    /// Position each known entity was last seen at.
    last_seen_pos: HashMap<EntityId, Axial>,
    pending: BinaryHeap<PendingItem>,
    next_seq: u64,
}

impl ClientSync {
    pub fn known(&self) -> &HashSet<EntityId> {
        &self.known
    }

    pub fn stale_known(&self) -> &HashSet<EntityId> {
        &self.stale_known
    }

    pub fn last_sync_tick(&self) -> u64 {
        self.last_sync_tick
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn enqueue(&mut self, priority: Priority, entity: EntityId, msg: &ServerMessage) {
        if let Ok(frame) = serde_json::to_string(msg) {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.pending.push(PendingItem {
                priority,
                entity,
                seq,
                frame,
            });
        }
    }
}

/// Sync state for every connected client of a session.
pub struct SyncEngine {
    clients: HashMap<SubjectId, ClientSync>,
    critical_radius: i32,
    mid_radius: i32,
    far_radius: i32,
    reconcile_interval: u64,
    tick_byte_budget: usize,
}

impl SyncEngine {
    pub fn new(config: &SyncConfig, tick_byte_budget: usize) -> Self {
        Self {
            clients: HashMap::new(),
            critical_radius: config.priority_critical_radius,
            mid_radius: config.priority_mid_radius,
            far_radius: config.priority_far_radius,
            reconcile_interval: config.reconcile_interval,
            tick_byte_budget,
        }
    }

    /// Registers a client at `current_tick`. `stale_ids` are the entities
    /// replayed from the vision cache at connect time.
    pub fn add_client(&mut self, subject: SubjectId, current_tick: u64, stale_ids: HashSet<EntityId>) {
        let client = ClientSync {
            last_sync_tick: current_tick,
            stale_known: stale_ids,
            ..ClientSync::default()
        };
        self.clients.insert(subject, client);
    }

    pub fn remove_client(&mut self, subject: SubjectId) {
        self.clients.remove(&subject);
    }

    pub fn client(&self, subject: SubjectId) -> Option<&ClientSync> {
        self.clients.get(&subject)
    }

    /// Runs sync steps 1–5 for every client against the post-simulation,
    /// post-vision world of this tick. Drained frames are handed to `emit`
    /// in priority order.
    pub fn run_tick(
        &mut self,
        world: &World,
        cache: &mut VisionCache,
        policy: &dyn CachePolicy,
        mut emit: impl FnMut(SubjectId, String),
    ) {
        let tick = world.tick;
        let radii = Radii {
            critical: self.critical_radius,
            mid: self.mid_radius,
            far: self.far_radius,
        };
        let budget = self.tick_byte_budget;
        let reconcile_interval = self.reconcile_interval;
        for (&subject, client) in self.clients.iter_mut() {
            let vision = match world.vision.subject(subject) {
                Some(vision) => vision,
                None => continue,
            };
            let visible = vision.visible_entities();

            // Entities entering vision: full snapshot of current values,
            // never history. A stale cache entry is superseded.
            let mut entering: Vec<EntityId> = visible.difference(&client.known).copied().collect();
            entering.sort_unstable();
            let newly_known: HashSet<EntityId> = entering.iter().copied().collect();
            for id in entering {
                client.stale_known.remove(&id);
                cache.purge_entity(subject, id);
                if let Some(msg) = live_snapshot(world, id) {
                    let priority = priority_for(world, subject, vision, radii, id);
                    client.enqueue(priority, id, &msg);
                }
                client.known.insert(id);
            }

            // Entities leaving vision: cache or disappear, then forget.
            let mut leaving: Vec<EntityId> = client.known.difference(visible).copied().collect();
            leaving.sort_unstable();
            for id in leaving {
                client.known.remove(&id);
                let last_seen_pos = client.last_seen_pos.remove(&id);
                let msg = match policy.on_leave_vision(&world.store, id, tick) {
                    Some(decision) => {
                        let entry = CachedEntity {
                            id,
                            class: world.store.class(id).unwrap_or(EntityClass::Unit),
                            owner: world.store.owner(id),
                            position: last_seen_pos
                                .or_else(|| world.store.position(id).ok())
                                .unwrap_or_default(),
                            components: decision.components,
                            cache_mode: decision.mode,
                            expires_at: decision.expires_at,
                            last_seen: tick,
                            is_stale: true,
                        };
                        let cache_mode = entry.cache_mode.as_str().to_string();
                        let expires_at = entry.expires_at;
                        cache.cache_entity(subject, entry);
                        ServerMessage::EntityCached {
                            id,
                            cache_mode,
                            expires_at,
                        }
                    }
                    None => ServerMessage::EntityDisappeared { id },
                };
                client.enqueue(Priority::High, id, &msg);
            }

            // Remember where each visible entity stands; this becomes
            // "position at last seen" if it leaves later.
            for &id in visible {
                if let Ok(pos) = world.store.position(id) {
                    client.last_seen_pos.insert(id, pos);
                }
            }

            // Catch-up: replay filtered deltas, or full resync when the log
            // wrapped past this client (or a reconciliation is due).
            let log_wrapped = world.delta.len() == world.delta.capacity()
                && client.last_sync_tick < world.delta.oldest_tick();
            let reconcile_due =
                reconcile_interval > 0 && tick > 0 && tick % reconcile_interval == 0;
            if log_wrapped || reconcile_due {
                let mut ids: Vec<EntityId> = client.known.iter().copied().collect();
                ids.sort_unstable();
                for id in ids {
                    if newly_known.contains(&id) {
                        continue; // just got a snapshot this tick
                    }
                    if let Some(msg) = live_snapshot(world, id) {
                        let priority = priority_for(world, subject, vision, radii, id);
                        client.enqueue(priority, id, &msg);
                    }
                }
            } else {
                let known = &client.known;
                let records = world.delta.replay(client.last_sync_tick, tick, |r| {
                    known.contains(&r.entity) && !newly_known.contains(&r.entity)
                });
                let mut out = Vec::new();
                for record in records {
                    let msg = match &record.change {
                        Change::Set(value) => ServerMessage::EntityDelta {
                            id: record.entity,
                            kind: value.kind().as_str().to_string(),
                            value: value.to_wire(),
                        },
                        Change::Unset(kind) => ServerMessage::EntityDelta {
                            id: record.entity,
                            kind: kind.as_str().to_string(),
                            value: serde_json::Value::Null,
                        },
                        // Destroyed entities drop out of vision in the same
                        // tick and are handled by the leave path above.
                        Change::Destroyed => ServerMessage::EntityDisappeared { id: record.entity },
                    };
                    out.push((record.entity, msg));
                }
                for (entity, msg) in out {
                    let priority = priority_for(world, subject, vision, radii, entity);
                    client.enqueue(priority, entity, &msg);
                }
            }
            client.last_sync_tick = tick;

            // Drain under the byte budget; leftovers wait for next tick.
            let mut spent = 0usize;
            while spent < budget {
                match client.pending.pop() {
                    Some(item) => {
                        spent += item.frame.len();
                        emit(subject, item.frame);
                    }
                    None => break,
                }
            }
        }
    }
}

/// Radii bundle passed into the priority function.
#[derive(Clone, Copy)]
struct Radii {
    critical: i32,
    mid: i32,
    far: i32,
}

fn is_combat_class(class: Option<EntityClass>) -> bool {
    matches!(
        class,
        Some(EntityClass::Unit) | Some(EntityClass::Hero) | Some(EntityClass::EndgameUnit)
    )
}

/// Computes the emission tier for one entity from one subject's viewpoint.
fn priority_for(
    world: &World,
    subject: SubjectId,
    vision: &SubjectVision,
    radii: Radii,
    id: EntityId,
) -> Priority {
    if world.store.owner(id) == Some(subject) {
        return Priority::Critical;
    }
    let position = match world.store.position(id) {
        Ok(position) => position,
        Err(_) => return Priority::High,
    };
    let distance = vision
        .observers()
        .iter()
        .map(|o| o.cell.distance(position))
        .min();
    let class = world.store.class(id);
    match distance {
        Some(d) if d <= radii.critical && is_combat_class(class) => Priority::Critical,
        Some(d) if d <= radii.mid => Priority::High,
        Some(d) if d <= radii.far && class != Some(EntityClass::Resource) => Priority::Normal,
        Some(_) => Priority::Low,
        None => Priority::Normal,
    }
}

/// Full snapshot of an entity's current component values.
pub fn live_snapshot(world: &World, id: EntityId) -> Option<ServerMessage> {
    let position = world.store.position(id).ok()?;
    Some(ServerMessage::EntitySnapshot {
        id,
        class: world
            .store
            .class(id)
            .map(|c| c.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        owner: world
            .store
            .owner(id)
            .map(|o| o.to_string())
            .unwrap_or_default(),
        pos: position,
        is_stale: false,
        cache_mode: None,
        last_seen: None,
        data: snapshot_data(world.store.stats(id).cloned()),
    })
}

/// Snapshot message for a cached entry, served at connect time.
pub fn stale_snapshot(entry: &CachedEntity) -> ServerMessage {
    let stats = entry.components.iter().find_map(|c| match c {
        ComponentValue::Stats(stats) => Some(stats.clone()),
        _ => None,
    });
    ServerMessage::EntitySnapshot {
        id: entry.id,
        class: entry.class.as_str().to_string(),
        owner: entry.owner.map(|o| o.to_string()).unwrap_or_default(),
        pos: entry.position,
        is_stale: true,
        cache_mode: Some(entry.cache_mode.as_str().to_string()),
        last_seen: Some(entry.last_seen),
        data: snapshot_data(stats),
    }
}

fn snapshot_data(stats: Option<crate::game::store::Stats>) -> serde_json::Value {
    match stats {
        Some(stats) => serde_json::to_value(&stats).unwrap_or_else(|_| serde_json::json!({})),
        None => serde_json::json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheMode, DefaultCachePolicy};
    use crate::config::{CacheConfig, SyncConfig};
    use crate::game::map::GameMap;
    use crate::game::store::{Stats, VisionKind, VisionSpec};
    use crate::game::vision::DefaultStealthPolicy;

    const P: SubjectId = 1;
    const ENEMY: SubjectId = 2;

    struct Fixture {
        world: World,
        sync: SyncEngine,
        cache: VisionCache,
        policy: DefaultCachePolicy,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_budget(usize::MAX)
        }

        fn with_budget(budget: usize) -> Self {
            let cache_config = CacheConfig::default();
            Fixture {
                world: World::new(GameMap::generate(2, 0), 64),
                sync: SyncEngine::new(&SyncConfig::default(), budget),
                cache: VisionCache::new(&cache_config),
                policy: DefaultCachePolicy::new(&cache_config),
            }
        }

        fn spawn_observer(&mut self, owner: SubjectId, cell: Axial, range: i32) -> EntityId {
            self.world.vision.ensure_subject(owner);
            self.world.spawn(vec![
                ComponentValue::Position(cell),
                ComponentValue::Owner(owner),
                ComponentValue::Class(EntityClass::Unit),
                ComponentValue::Vision(VisionSpec {
                    range,
                    enabled: true,
                    kind: VisionKind::Normal,
                }),
            ])
        }

        fn spawn_plain(&mut self, owner: SubjectId, cell: Axial, class: EntityClass) -> EntityId {
            self.world.spawn(vec![
                ComponentValue::Position(cell),
                ComponentValue::Owner(owner),
                ComponentValue::Class(class),
                ComponentValue::Stats(Stats {
                    health: 100,
                    ..Stats::default()
                }),
            ])
        }

        /// Runs vision + sync for the current tick and returns the frames
        /// emitted to each subject, parsed back into messages.
        fn run(&mut self) -> HashMap<SubjectId, Vec<ServerMessage>> {
            self.world.vision.recompute(
                &self.world.store,
                &self.world.spatial,
                &DefaultStealthPolicy,
                self.world.tick,
                1,
            );
            let mut frames: HashMap<SubjectId, Vec<ServerMessage>> = HashMap::new();
            self.sync
                .run_tick(&self.world, &mut self.cache, &self.policy, |subject, frame| {
                    frames
                        .entry(subject)
                        .or_default()
                        .push(serde_json::from_str(&frame).unwrap());
                });
            frames
        }

        fn next_tick(&mut self) {
            self.world.tick += 1;
        }
    }

    fn snapshots(messages: &[ServerMessage]) -> Vec<EntityId> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::EntitySnapshot { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    fn deltas(messages: &[ServerMessage]) -> Vec<EntityId> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::EntityDelta { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_vision_entry_emits_snapshot_without_history() {
        let mut f = Fixture::new();
        f.spawn_observer(P, Axial::new(0, 0), 5);
        f.sync.add_client(P, 0, HashSet::new());

        // Enemy scout spawns far away and wanders while unseen.
        let scout = f.spawn_plain(ENEMY, Axial::new(40, 40), EntityClass::Unit);
        let mut frames = f.run();
        let first = frames.remove(&P).unwrap_or_default();
        assert!(snapshots(&first).iter().all(|&id| id != scout));

        for step in 0..10 {
            f.next_tick();
            f.world
                .move_entity(scout, Axial::new(30 - step, 30 - step))
                .unwrap();
            frames = f.run();
            let messages = frames.remove(&P).unwrap_or_default();
            assert!(
                !snapshots(&messages).contains(&scout) && !deltas(&messages).contains(&scout),
                "leaked messages about unseen scout at step {}",
                step
            );
        }

        // The scout steps into vision: exactly one fresh snapshot, no
        // deltas carrying earlier positions.
        f.next_tick();
        f.world.move_entity(scout, Axial::new(4, 0)).unwrap();
        let frames = f.run();
        let messages = &frames[&P];
        let snaps: Vec<&ServerMessage> = messages
            .iter()
            .filter(|m| matches!(m, ServerMessage::EntitySnapshot { id, .. } if *id == scout))
            .collect();
        assert_eq!(snaps.len(), 1);
        match snaps[0] {
            ServerMessage::EntitySnapshot { pos, is_stale, .. } => {
                assert_eq!(*pos, Axial::new(4, 0));
                assert!(!is_stale);
            }
            _ => unreachable!(),
        }
        assert!(!deltas(messages).contains(&scout));
        assert!(f.sync.client(P).unwrap().known().contains(&scout));
    }

    #[test]
    fn test_deltas_flow_only_while_known() {
        let mut f = Fixture::new();
        f.spawn_observer(P, Axial::new(0, 0), 5);
        f.sync.add_client(P, 0, HashSet::new());
        let enemy = f.spawn_plain(ENEMY, Axial::new(2, 0), EntityClass::Unit);
        f.run();

        // A mutation while known becomes a delta.
        f.next_tick();
        f.world
            .mutate(
                enemy,
                ComponentValue::Stats(Stats {
                    health: 50,
                    ..Stats::default()
                }),
            )
            .unwrap();
        let frames = f.run();
        assert_eq!(deltas(&frames[&P]), vec![enemy]);

        // Walks out of vision: disappearance, then no further deltas.
        f.next_tick();
        f.world.move_entity(enemy, Axial::new(20, 20)).unwrap();
        let frames = f.run();
        let messages = &frames[&P];
        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMessage::EntityDisappeared { id } if *id == enemy)));

        f.next_tick();
        f.world
            .mutate(
                enemy,
                ComponentValue::Stats(Stats {
                    health: 10,
                    ..Stats::default()
                }),
            )
            .unwrap();
        let frames = f.run();
        assert!(frames.get(&P).map_or(true, |m| deltas(m).is_empty()));
        assert!(!f.sync.client(P).unwrap().known().contains(&enemy));
    }

    #[test]
    fn test_leaving_settlement_is_cached_permanently() {
        let mut f = Fixture::new();
        let observer = f.spawn_observer(P, Axial::new(20, 20), 3);
        f.sync.add_client(P, 0, HashSet::new());
        let settlement = f.spawn_plain(ENEMY, Axial::new(20, 20), EntityClass::Settlement);
        f.run();
        assert!(f.sync.client(P).unwrap().known().contains(&settlement));

        // Observer moves away; the settlement falls out of vision.
        f.next_tick();
        f.world.move_entity(observer, Axial::new(-20, 0)).unwrap();
        let frames = f.run();
        let cached = frames[&P]
            .iter()
            .find_map(|m| match m {
                ServerMessage::EntityCached {
                    id,
                    cache_mode,
                    expires_at,
                } if *id == settlement => Some((cache_mode.clone(), *expires_at)),
                _ => None,
            })
            .expect("settlement should be cached");
        assert_eq!(cached, ("permanent".to_string(), 0));
        assert!(f.cache.contains_entity(P, settlement));
        let entry = &f.cache.stale_snapshots(P)[0];
        assert!(entry.is_stale);
        assert_eq!(entry.position, Axial::new(20, 20));
    }

    #[test]
    fn test_stale_known_promotes_on_reentry() {
        let mut f = Fixture::new();
        let observer = f.spawn_observer(P, Axial::new(0, 0), 3);
        let settlement = f.spawn_plain(ENEMY, Axial::new(20, 20), EntityClass::Settlement);
        f.cache.cache_entity(
            P,
            CachedEntity {
                id: settlement,
                class: EntityClass::Settlement,
                owner: Some(ENEMY),
                position: Axial::new(20, 20),
                components: vec![],
                cache_mode: CacheMode::Permanent,
                expires_at: 0,
                last_seen: 5,
                is_stale: true,
            },
        );
        f.sync.add_client(P, 0, [settlement].into_iter().collect());

        // While stale-known and out of vision: no messages about the
        // settlement at all.
        let frames = f.run();
        let mentions_settlement = frames.get(&P).map_or(false, |messages| {
            messages.iter().any(|m| {
                snapshots(std::slice::from_ref(m)).contains(&settlement)
                    || deltas(std::slice::from_ref(m)).contains(&settlement)
                    || matches!(m, ServerMessage::EntityDisappeared { id } if *id == settlement)
            })
        });
        assert!(!mentions_settlement);
        assert!(f.sync.client(P).unwrap().stale_known().contains(&settlement));

        // Observer reaches the settlement: fresh snapshot, cache purged.
        f.next_tick();
        f.world.move_entity(observer, Axial::new(20, 18)).unwrap();
        let frames = f.run();
        let snaps = snapshots(&frames[&P]);
        assert!(snaps.contains(&settlement));
        assert!(!f.cache.contains_entity(P, settlement));
        let client = f.sync.client(P).unwrap();
        assert!(client.known().contains(&settlement));
        assert!(!client.stale_known().contains(&settlement));
    }

    #[test]
    fn test_resync_after_log_wrap() {
        let cache_config = CacheConfig::default();
        let mut f = Fixture {
            world: World::new(GameMap::generate(2, 0), 8),
            sync: SyncEngine::new(&SyncConfig::default(), usize::MAX),
            cache: VisionCache::new(&cache_config),
            policy: DefaultCachePolicy::new(&cache_config),
        };
        f.spawn_observer(P, Axial::new(0, 0), 5);
        f.sync.add_client(P, 0, HashSet::new());
        let enemy = f.spawn_plain(ENEMY, Axial::new(2, 0), EntityClass::Unit);
        f.run();
        assert_eq!(f.sync.client(P).unwrap().last_sync_tick(), 0);

        // Burn through the ring buffer without syncing this client.
        f.world.tick = 500;
        for i in 0..20 {
            f.world
                .mutate(
                    enemy,
                    ComponentValue::Stats(Stats {
                        health: 100 - i,
                        ..Stats::default()
                    }),
                )
                .unwrap();
        }
        assert!(f.world.delta.oldest_tick() > 0);

        let frames = f.run();
        let messages = &frames[&P];
        // Full snapshot for the still-known entity, no stale deltas.
        assert!(snapshots(messages).contains(&enemy));
        assert!(deltas(messages).is_empty());
        assert_eq!(f.sync.client(P).unwrap().last_sync_tick(), 500);
    }

    #[test]
    fn test_budget_carries_items_to_next_tick() {
        let mut f = Fixture::with_budget(220);
        f.spawn_observer(P, Axial::new(0, 0), 5);
        f.sync.add_client(P, 0, HashSet::new());
        for i in 0..6 {
            f.spawn_plain(ENEMY, Axial::new(i, 0), EntityClass::Unit);
        }

        let first = f.run().remove(&P).unwrap_or_default();
        assert!(first.len() < 6, "budget should defer some snapshots");
        assert!(f.sync.client(P).unwrap().pending_len() > 0);

        // Without new work the queue drains over subsequent ticks; the
        // observer itself is the seventh snapshot.
        let mut total = first.len();
        for _ in 0..6 {
            f.next_tick();
            total += f.run().remove(&P).map_or(0, |m| m.len());
        }
        assert_eq!(total, 7);
        assert_eq!(f.sync.client(P).unwrap().pending_len(), 0);
    }

    #[test]
    fn test_priority_orders_own_before_far() {
        let mut f = Fixture::with_budget(usize::MAX);
        f.spawn_observer(P, Axial::new(0, 0), 30);
        f.sync.add_client(P, 0, HashSet::new());
        let far_enemy = f.spawn_plain(ENEMY, Axial::new(25, 0), EntityClass::Unit);
        let own = f.spawn_plain(P, Axial::new(1, 0), EntityClass::Unit);
        let near_enemy = f.spawn_plain(ENEMY, Axial::new(2, 0), EntityClass::Unit);

        let frames = f.run();
        let order = snapshots(&frames[&P]);
        let pos_of = |id: EntityId| order.iter().position(|&x| x == id).unwrap();
        assert!(pos_of(own) < pos_of(far_enemy));
        assert!(pos_of(near_enemy) < pos_of(far_enemy));
    }

    #[test]
    fn test_destroyed_entity_disappears_for_knowers() {
        let mut f = Fixture::new();
        f.spawn_observer(P, Axial::new(0, 0), 5);
        f.sync.add_client(P, 0, HashSet::new());
        let enemy = f.spawn_plain(ENEMY, Axial::new(1, 0), EntityClass::Unit);
        f.run();

        f.next_tick();
        f.world.despawn(enemy).unwrap();
        let frames = f.run();
        assert!(frames[&P]
            .iter()
            .any(|m| matches!(m, ServerMessage::EntityDisappeared { id } if *id == enemy)));
        assert!(!f.sync.client(P).unwrap().known().contains(&enemy));
        // A destroyed entity is never cached.
        assert!(!f.cache.contains_entity(P, enemy));
    }
}
