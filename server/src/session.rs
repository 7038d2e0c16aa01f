//! Game session runtime
//!
//! A session owns the world, the sync engine, the vision cache and the
//! roster of connected players. All world mutation happens on the tick
//! task; connections talk to the session through a bounded command channel
//! drained at the start of every tick, and the roster/connection table is
//! the only state guarded by a lock (taken by admit/remove/broadcast and
//! by status reads).
//!
//! Tick order: drain commands, run gameplay systems, recompute vision,
//! run the sync engine, prune/persist the vision cache, bump the tick
//! counter. Steps in between see a consistent world snapshot because
//! nothing else may mutate it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{info, warn};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};

use shared::protocol::{error_codes, ExploredHex, ServerMessage, SessionStatus};

use crate::cache::{
    CachePolicy, CacheStore, DefaultCachePolicy, VisionCache, VisionCacheRecord,
};
use crate::config::Config;
use crate::connection::{unix_now, OutboundQueue};
use crate::game::map::GameMap;
use crate::game::vision::{DefaultStealthPolicy, StealthPolicy};
use crate::game::world::{GameSystem, World};
use crate::player::{Player, SubjectId};
use crate::sync::{stale_snapshot, SyncEngine};

/// How many explored cells ride in one `explored_hexes` frame.
const EXPLORED_BATCH: usize = 512;

/// Commands funneled from connections into the tick task.
pub enum SessionCommand {
    Join {
        player: Player,
        queue: OutboundQueue,
        cache_record: Option<VisionCacheRecord>,
    },
    Leave {
        subject: SubjectId,
    },
    Chat {
        subject: SubjectId,
        message: String,
    },
    /// Applied on group membership events by the social collaborator.
    ShareVision {
        from: SubjectId,
        to: SubjectId,
        enabled: bool,
    },
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Waiting,
    Running,
    Paused,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Waiting => "waiting",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
        }
    }
}

struct RosterEntry {
    player: Player,
    queue: OutboundQueue,
    chat_window_start: Instant,
    chat_count: u32,
}

#[derive(Default)]
struct Roster {
    entries: HashMap<SubjectId, RosterEntry>,
}

/// Shared session handle. Connections hold this to submit commands and
/// read status; the tick task owns the world exclusively.
pub struct Session {
    pub id: String,
    config: Arc<Config>,
    created_at: Instant,
    roster: Mutex<Roster>,
    state: Mutex<SessionState>,
    tick: AtomicU64,
    cmd_tx: mpsc::Sender<SessionCommand>,
    cache_store: Arc<dyn CacheStore>,
}

/// The tick task's exclusively-owned state.
struct GameState {
    world: World,
    sync: SyncEngine,
    cache: VisionCache,
    cache_policy: Box<dyn CachePolicy>,
    stealth_policy: Box<dyn StealthPolicy>,
    systems: Vec<Box<dyn GameSystem>>,
}

type PersistBatch = Vec<(SubjectId, VisionCacheRecord)>;

impl Session {
    /// Builds the session and spawns its tick and persistence tasks.
    pub fn start(
        config: Arc<Config>,
        cache_store: Arc<dyn CacheStore>,
        systems: Vec<Box<dyn GameSystem>>,
        shutdown: &broadcast::Sender<()>,
    ) -> (Arc<Session>, Vec<JoinHandle<()>>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(1024);
        let (persist_tx, persist_rx) = mpsc::channel::<PersistBatch>(16);

        let session = Arc::new(Session {
            id: config.session.session_id.clone(),
            created_at: Instant::now(),
            roster: Mutex::new(Roster::default()),
            state: Mutex::new(SessionState::Waiting),
            tick: AtomicU64::new(0),
            cmd_tx,
            cache_store: cache_store.clone(),
            config: config.clone(),
        });

        let map = GameMap::generate(config.session.initial_map_radius, config.session.map_seed);
        let game = GameState {
            world: World::new(map, config.sync.delta_log_capacity),
            sync: SyncEngine::new(&config.sync, config.tick_byte_budget()),
            cache: VisionCache::new(&config.cache),
            cache_policy: Box::new(DefaultCachePolicy::new(&config.cache)),
            stealth_policy: Box::new(DefaultStealthPolicy),
            systems,
        };

        info!("Session {} created ({} tick/s)", session.id, config.server.tick_rate);

        let tick_task = tokio::spawn(session.clone().run(
            game,
            cmd_rx,
            persist_tx,
            shutdown.subscribe(),
        ));
        let persist_task = tokio::spawn(run_persistence(cache_store, persist_rx));
        (session, vec![tick_task, persist_task])
    }

    /// Enqueues a command for the next tick. Returns false when the session
    /// has shut down.
    pub async fn submit(&self, command: SessionCommand) -> bool {
        self.cmd_tx.send(command).await.is_ok()
    }

    /// Grants `to` the vision of `from`. Called by the social collaborator
    /// on group membership events.
    pub async fn share_vision(&self, from: SubjectId, to: SubjectId) -> bool {
        self.submit(SessionCommand::ShareVision {
            from,
            to,
            enabled: true,
        })
        .await
    }

    pub async fn unshare_vision(&self, from: SubjectId, to: SubjectId) -> bool {
        self.submit(SessionCommand::ShareVision {
            from,
            to,
            enabled: false,
        })
        .await
    }

    /// Loads a subject's vision-cache record, degrading to an empty cache
    /// on persistence failures.
    pub async fn load_cache_record(&self, subject: SubjectId) -> Option<VisionCacheRecord> {
        match timeout(Duration::from_secs(2), self.cache_store.load(subject)).await {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => {
                warn!("Cache load failed for subject {}, starting empty: {}", subject, e);
                None
            }
            Err(_) => {
                warn!("Cache load timed out for subject {}, starting empty", subject);
                None
            }
        }
    }

    /// Current session status snapshot.
    pub fn status(&self) -> SessionStatus {
        let count = self.roster.lock().unwrap().entries.len();
        self.status_with_count(count)
    }

    fn status_with_count(&self, player_count: usize) -> SessionStatus {
        SessionStatus {
            state: self.state.lock().unwrap().as_str().to_string(),
            player_count: player_count as u32,
            max_players: self.config.session.max_players,
            server_tick: self.tick.load(Ordering::Relaxed),
            uptime: self.created_at.elapsed().as_secs() as i64,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Lifecycle control for the gameplay layer.
    pub fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn player_count(&self) -> usize {
        self.roster.lock().unwrap().entries.len()
    }

    /// Enqueues a message to every connection. Non-blocking; a full queue
    /// drops the frame.
    pub fn broadcast(&self, msg: &ServerMessage) {
        let frame = match serde_json::to_string(msg) {
            Ok(frame) => frame,
            Err(_) => return,
        };
        let roster = self.roster.lock().unwrap();
        for entry in roster.entries.values() {
            entry.queue.send_frame(frame.clone());
        }
    }

    /// Like [`Session::broadcast`] but skips one subject.
    pub fn broadcast_except(&self, except: SubjectId, msg: &ServerMessage) {
        let frame = match serde_json::to_string(msg) {
            Ok(frame) => frame,
            Err(_) => return,
        };
        let roster = self.roster.lock().unwrap();
        for (subject, entry) in roster.entries.iter() {
            if *subject != except {
                entry.queue.send_frame(frame.clone());
            }
        }
    }

    /// The fixed-rate tick loop. Completes the current tick on shutdown,
    /// then flushes the vision cache and closes every connection.
    async fn run(
        self: Arc<Self>,
        mut game: GameState,
        mut cmd_rx: mpsc::Receiver<SessionCommand>,
        persist_tx: mpsc::Sender<PersistBatch>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut interval = tokio::time::interval(self.config.tick_duration());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.step(&mut game, &mut cmd_rx, &persist_tx);
                }
                _ = shutdown.recv() => {
                    self.step(&mut game, &mut cmd_rx, &persist_tx);
                    game.cache.mark_all_dirty();
                    let batch = game.cache.take_dirty();
                    if !batch.is_empty() {
                        let _ = persist_tx.send(batch).await;
                    }
                    // Dropping the queues ends each connection's write task.
                    self.roster.lock().unwrap().entries.clear();
                    info!("Session {} stopped at tick {}", self.id, game.world.tick);
                    break;
                }
            }
        }
    }

    /// One simulation tick (steps 1–6 of the tick contract).
    fn step(
        &self,
        game: &mut GameState,
        cmd_rx: &mut mpsc::Receiver<SessionCommand>,
        persist_tx: &mpsc::Sender<PersistBatch>,
    ) {
        let tick = game.world.tick;

        // 1. Bounded command drain; excess stays for the next tick.
        let mut processed = 0;
        while processed < self.config.session.max_commands_per_tick {
            match cmd_rx.try_recv() {
                Ok(command) => {
                    self.apply_command(game, command);
                    processed += 1;
                }
                Err(_) => break,
            }
        }

        // 2. Gameplay systems (external hook).
        let mut systems = std::mem::take(&mut game.systems);
        for system in &mut systems {
            system.tick(&mut game.world);
        }
        game.systems = systems;

        // 3. Vision recompute, then fold visible cells into explored sets.
        game.world
            .recompute_vision(game.stealth_policy.as_ref(), self.config.vision.vision_interval);
        let subjects: Vec<SubjectId> = game.world.vision.subjects().collect();
        for subject in subjects {
            if let Some(vision) = game.world.vision.subject(subject) {
                game.cache
                    .note_visible(subject, vision.visible_cells(), tick, &game.world.map);
            }
        }

        // 4. Sync engine: per-client appear/disappear/delta emission.
        let queues: HashMap<SubjectId, OutboundQueue> = {
            let roster = self.roster.lock().unwrap();
            roster
                .entries
                .iter()
                .map(|(subject, entry)| (*subject, entry.queue.clone()))
                .collect()
        };
        game.sync.run_tick(
            &game.world,
            &mut game.cache,
            game.cache_policy.as_ref(),
            |subject, frame| {
                if let Some(queue) = queues.get(&subject) {
                    queue.send_frame(frame);
                }
            },
        );

        // 5. Cache prune and persistence flush.
        if tick > 0 && tick % self.config.cache.prune_interval == 0 {
            game.cache.prune(tick, &game.world.store);
        }
        let save_ticks =
            (self.config.cache.save_interval_secs * self.config.server.tick_rate as u64).max(1);
        if tick > 0 && tick % save_ticks == 0 {
            let batch = game.cache.take_dirty();
            if !batch.is_empty() {
                if let Err(e) = persist_tx.try_send(batch) {
                    warn!("Persistence queue full, deferring cache flush");
                    for (subject, _) in e.into_inner() {
                        game.cache.mark_dirty(subject);
                    }
                }
            }
        }

        if self.config.session.status_interval > 0
            && tick > 0
            && tick % self.config.session.status_interval == 0
        {
            self.broadcast(&ServerMessage::SessionStatus(self.status()));
        }

        // 6. Tick bump.
        game.world.tick = tick + 1;
        self.tick.store(tick + 1, Ordering::Relaxed);
    }

    fn apply_command(&self, game: &mut GameState, command: SessionCommand) {
        match command {
            SessionCommand::Join {
                player,
                queue,
                cache_record,
            } => self.admit(game, player, queue, cache_record),
            SessionCommand::Leave { subject } => self.remove(game, subject),
            SessionCommand::Chat { subject, message } => self.chat(subject, message),
            SessionCommand::ShareVision { from, to, enabled } => {
                if enabled {
                    game.world.vision.share(from, to);
                } else {
                    game.world.vision.unshare(from, to);
                }
                game.world.vision.mark_dirty(to);
            }
        }
    }

    /// Admits a player: roster entry, welcome, join broadcast, sync
    /// registration and cache replay (stale snapshots, then explored
    /// terrain).
    fn admit(
        &self,
        game: &mut GameState,
        player: Player,
        queue: OutboundQueue,
        cache_record: Option<VisionCacheRecord>,
    ) {
        let subject = player.id;
        let status = {
            let mut roster = self.roster.lock().unwrap();
            let replacing = roster.entries.contains_key(&subject);
            if !replacing
                && roster.entries.len() >= self.config.session.max_players as usize
            {
                queue.send(&ServerMessage::error(
                    error_codes::SESSION_FULL,
                    "Session is full",
                ));
                return;
            }
            if replacing {
                info!("Player {} rejoined, replacing previous connection", player.username);
            }
            let entry = RosterEntry {
                player: player.clone(),
                queue: queue.clone(),
                chat_window_start: Instant::now(),
                chat_count: 0,
            };
            roster.entries.insert(subject, entry);
            self.status_with_count(roster.entries.len())
        };

        queue.send(&ServerMessage::Welcome {
            player_id: player.wire_id(),
            username: player.username.clone(),
            session_id: self.id.clone(),
            session_status: status,
        });
        self.broadcast_except(
            subject,
            &ServerMessage::PlayerJoined {
                player_id: player.wire_id(),
                username: player.username.clone(),
                email: player.email.clone(),
            },
        );

        game.world.vision.ensure_subject(subject);
        if let Some(record) = cache_record {
            game.cache.install(subject, record);
        }

        let stale = game.cache.stale_snapshots(subject);
        let stale_ids = stale.iter().map(|entry| entry.id).collect();
        game.sync.add_client(subject, game.world.tick, stale_ids);
        for entry in &stale {
            queue.send(&stale_snapshot(entry));
        }
        let explored = game.cache.explored_cells(subject);
        for batch in explored.chunks(EXPLORED_BATCH) {
            queue.send(&ServerMessage::ExploredHexes {
                hexes: batch
                    .iter()
                    .map(|cell| ExploredHex {
                        hex: cell.hex,
                        terrain: cell.terrain.as_str().to_string(),
                    })
                    .collect(),
            });
        }

        info!("Player {} ({}) joined session {}", player.username, subject, self.id);
    }

    /// Removes a player from the roster and engines; their vision cache
    /// stays in memory for the next visit and is flagged for persistence.
    fn remove(&self, game: &mut GameState, subject: SubjectId) {
        let removed = {
            let mut roster = self.roster.lock().unwrap();
            roster.entries.remove(&subject)
        };
        let entry = match removed {
            Some(entry) => entry,
            None => return,
        };
        game.sync.remove_client(subject);
        game.world.vision.remove_subject(subject);
        game.cache.mark_dirty(subject);
        self.broadcast(&ServerMessage::PlayerLeft {
            player_id: entry.player.wire_id(),
            username: entry.player.username.clone(),
        });
        info!(
            "Player {} ({}) left session {}",
            entry.player.username, subject, self.id
        );
    }

    /// Validates and fans out a chat message. Rate limiting uses a fixed
    /// one-minute window per player.
    fn chat(&self, subject: SubjectId, message: String) {
        let (player_id, username) = {
            let mut roster = self.roster.lock().unwrap();
            let entry = match roster.entries.get_mut(&subject) {
                Some(entry) => entry,
                None => return,
            };

            if message.is_empty() || message.len() > self.config.chat.max_message_length {
                entry.queue.send(&ServerMessage::error(
                    error_codes::CHAT_TOO_LONG,
                    format!(
                        "Chat messages must be 1-{} bytes",
                        self.config.chat.max_message_length
                    ),
                ));
                return;
            }

            if entry.chat_window_start.elapsed() >= Duration::from_secs(60) {
                entry.chat_window_start = Instant::now();
                entry.chat_count = 0;
            }
            entry.chat_count += 1;
            if entry.chat_count > self.config.chat.rate_limit {
                entry.queue.send(&ServerMessage::error(
                    error_codes::RATE_LIMITED,
                    "Chat rate limit exceeded",
                ));
                return;
            }

            (entry.player.wire_id(), entry.player.username.clone())
        };

        self.broadcast(&ServerMessage::Chat {
            player_id,
            username,
            message,
            timestamp: unix_now(),
        });
    }
}

/// Background persistence loop: writes dirty vision-cache records through
/// the store, retrying failed subjects on the next batch.
async fn run_persistence(store: Arc<dyn CacheStore>, mut rx: mpsc::Receiver<PersistBatch>) {
    let mut retry: HashMap<SubjectId, VisionCacheRecord> = HashMap::new();
    while let Some(batch) = rx.recv().await {
        let mut work: HashMap<SubjectId, VisionCacheRecord> = std::mem::take(&mut retry);
        work.extend(batch);
        for (subject, record) in work {
            if let Err(e) = store.save(subject, &record).await {
                warn!(
                    "Vision cache save failed for subject {} (will retry): {}",
                    subject, e
                );
                retry.insert(subject, record);
            }
        }
    }
    // Final attempt for anything still pending at shutdown.
    for (subject, record) in retry {
        if let Err(e) = store.save(subject, &record).await {
            warn!("Vision cache save failed for subject {} at shutdown: {}", subject, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;
    use tokio::sync::mpsc::Receiver;

    fn test_config() -> Arc<Config> {
        let mut config = Config::default();
        config.server.tick_rate = 200;
        config.session.initial_map_radius = 0;
        config.session.status_interval = 0;
        config.chat.rate_limit = 3;
        Arc::new(config)
    }

    fn player(id: SubjectId, username: &str) -> Player {
        Player {
            id,
            username: username.to_string(),
            email: format!("{}@example.com", username),
            user_type: "player".to_string(),
            auth_method: "password".to_string(),
            permissions: 0,
            activated: 1,
            connected_at: None,
        }
    }

    async fn recv_msg(rx: &mut Receiver<String>) -> ServerMessage {
        let frame = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("queue closed");
        serde_json::from_str(&frame).unwrap()
    }

    async fn start_session() -> (Arc<Session>, broadcast::Sender<()>) {
        let (shutdown, _) = broadcast::channel(1);
        let (session, _tasks) = Session::start(
            test_config(),
            Arc::new(InMemoryCacheStore::new()),
            Vec::new(),
            &shutdown,
        );
        (session, shutdown)
    }

    async fn join(session: &Arc<Session>, p: Player) -> Receiver<String> {
        let (queue, rx) = OutboundQueue::new(p.username.clone());
        assert!(
            session
                .submit(SessionCommand::Join {
                    player: p,
                    queue,
                    cache_record: None,
                })
                .await
        );
        rx
    }

    #[tokio::test]
    async fn test_join_gets_welcome_with_status() {
        let (session, _shutdown) = start_session().await;
        let mut rx = join(&session, player(123, "alice")).await;

        match recv_msg(&mut rx).await {
            ServerMessage::Welcome {
                player_id,
                username,
                session_id,
                session_status,
            } => {
                assert_eq!(player_id, "123");
                assert_eq!(username, "alice");
                assert_eq!(session_id, "main");
                assert_eq!(session_status.state, "waiting");
                assert_eq!(session_status.player_count, 1);
                assert_eq!(session_status.max_players, 100);
                assert!(session_status.uptime >= 0);
            }
            other => panic!("expected welcome, got {:?}", other),
        }
        assert_eq!(session.player_count(), 1);
    }

    #[tokio::test]
    async fn test_join_broadcasts_to_others_only() {
        let (session, _shutdown) = start_session().await;
        let mut rx_a = join(&session, player(1, "alice")).await;
        let _ = recv_msg(&mut rx_a).await; // alice's welcome

        let mut rx_b = join(&session, player(2, "bob")).await;
        let _ = recv_msg(&mut rx_b).await; // bob's welcome

        match recv_msg(&mut rx_a).await {
            ServerMessage::PlayerJoined { player_id, username, .. } => {
                assert_eq!(player_id, "2");
                assert_eq!(username, "bob");
            }
            other => panic!("expected player_joined, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_full_rejects_join() {
        let (shutdown, _) = broadcast::channel(1);
        let mut config = Config::default();
        config.server.tick_rate = 200;
        config.session.initial_map_radius = 0;
        config.session.status_interval = 0;
        config.session.max_players = 1;
        let (session, _tasks) = Session::start(
            Arc::new(config),
            Arc::new(InMemoryCacheStore::new()),
            Vec::new(),
            &shutdown,
        );

        let mut rx_a = join(&session, player(1, "alice")).await;
        let _ = recv_msg(&mut rx_a).await;

        let mut rx_b = join(&session, player(2, "bob")).await;
        match recv_msg(&mut rx_b).await {
            ServerMessage::Error { code, .. } => assert_eq!(code, "session_full"),
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(session.player_count(), 1);
    }

    #[tokio::test]
    async fn test_chat_fan_out_reaches_everyone() {
        let (session, _shutdown) = start_session().await;
        let mut rx_a = join(&session, player(1, "alice")).await;
        let _ = recv_msg(&mut rx_a).await;
        let mut rx_b = join(&session, player(2, "bob")).await;
        let _ = recv_msg(&mut rx_b).await;
        let _ = recv_msg(&mut rx_a).await; // bob's join notice

        session
            .submit(SessionCommand::Chat {
                subject: 2,
                message: "hi".to_string(),
            })
            .await;

        for rx in [&mut rx_a, &mut rx_b] {
            match recv_msg(rx).await {
                ServerMessage::Chat {
                    player_id,
                    username,
                    message,
                    timestamp,
                } => {
                    assert_eq!(player_id, "2");
                    assert_eq!(username, "bob");
                    assert_eq!(message, "hi");
                    assert!(timestamp > 0);
                }
                other => panic!("expected chat, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_chat_rate_limit_fixed_window() {
        let (session, _shutdown) = start_session().await;
        let mut rx_a = join(&session, player(1, "alice")).await;
        let _ = recv_msg(&mut rx_a).await;
        let mut rx_b = join(&session, player(2, "bob")).await;
        let _ = recv_msg(&mut rx_b).await;
        let _ = recv_msg(&mut rx_a).await;

        // Limit is 3 in the test config; the 4th message is refused and
        // not fanned out.
        for i in 0..4 {
            session
                .submit(SessionCommand::Chat {
                    subject: 2,
                    message: format!("msg {}", i),
                })
                .await;
        }

        for _ in 0..3 {
            assert!(matches!(recv_msg(&mut rx_a).await, ServerMessage::Chat { .. }));
            assert!(matches!(recv_msg(&mut rx_b).await, ServerMessage::Chat { .. }));
        }
        match recv_msg(&mut rx_b).await {
            ServerMessage::Error { code, .. } => assert_eq!(code, "rate_limited"),
            other => panic!("expected rate_limited, got {:?}", other),
        }
        assert!(
            timeout(Duration::from_millis(100), rx_a.recv()).await.is_err(),
            "bystander must not see the refused message"
        );
    }

    #[tokio::test]
    async fn test_oversized_chat_is_refused() {
        let (session, _shutdown) = start_session().await;
        let mut rx = join(&session, player(1, "alice")).await;
        let _ = recv_msg(&mut rx).await;

        session
            .submit(SessionCommand::Chat {
                subject: 1,
                message: "x".repeat(501),
            })
            .await;
        match recv_msg(&mut rx).await {
            ServerMessage::Error { code, .. } => assert_eq!(code, "chat_too_long"),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leave_broadcasts_player_left() {
        let (session, _shutdown) = start_session().await;
        let mut rx_a = join(&session, player(1, "alice")).await;
        let _ = recv_msg(&mut rx_a).await;
        let mut rx_b = join(&session, player(2, "bob")).await;
        let _ = recv_msg(&mut rx_b).await;
        let _ = recv_msg(&mut rx_a).await;

        session.submit(SessionCommand::Leave { subject: 2 }).await;
        match recv_msg(&mut rx_a).await {
            ServerMessage::PlayerLeft { player_id, username } => {
                assert_eq!(player_id, "2");
                assert_eq!(username, "bob");
            }
            other => panic!("expected player_left, got {:?}", other),
        }
        assert_eq!(session.player_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_join_replaces_connection() {
        let (session, _shutdown) = start_session().await;
        let mut rx_old = join(&session, player(1, "alice")).await;
        let _ = recv_msg(&mut rx_old).await;

        let mut rx_new = join(&session, player(1, "alice")).await;
        match recv_msg(&mut rx_new).await {
            ServerMessage::Welcome { session_status, .. } => {
                assert_eq!(session_status.player_count, 1);
            }
            other => panic!("expected welcome, got {:?}", other),
        }
        assert_eq!(session.player_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_cache_and_closes_queues() {
        let store = Arc::new(InMemoryCacheStore::new());
        let (shutdown, _) = broadcast::channel(1);
        let (session, tasks) = Session::start(test_config(), store.clone(), Vec::new(), &shutdown);

        let mut rx = join(&session, player(9, "carol")).await;
        let _ = recv_msg(&mut rx).await;

        shutdown.send(()).unwrap();
        for task in tasks {
            let _ = timeout(Duration::from_secs(2), task).await;
        }
        assert_eq!(session.player_count(), 0);
    }
}
