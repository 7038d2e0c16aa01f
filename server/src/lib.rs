//! # Session Server Library
//!
//! Authoritative server for a hex-tiled, massively-multiplayer real-time
//! strategy world. Clients connect over websockets, authenticate with a
//! signed bearer token issued by the external login service, join the
//! shared session, and from then on receive exactly the slice of world
//! state their faction can see.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The session owns the world: the chunked hex map, the entity/component
//! store, the spatial index and the simulation clock. All mutation happens
//! on a single fixed-rate tick task, which keeps the cross-structure
//! invariants (store ↔ spatial index ↔ delta log) simple to uphold.
//!
//! ### Visibility and Synchronization
//! Every authoritative change lands in a bounded delta log. Per subject,
//! the vision engine computes which cells and entities are visible; the
//! sync engine diffs that against what each client already knows and emits
//! snapshots, deltas and disappearances, never anything the client is not
//! entitled to see. A per-subject vision cache remembers explored terrain
//! and scouted buildings across reconnects.
//!
//! ### Connection Management
//! Each websocket runs a read task and a write task around a bounded
//! outbound queue. Keep-alive pings, read/write deadlines and
//! drop-on-overflow keep one slow client from stalling the tick loop.
//!
//! ## Module Organization
//!
//! - [`config`]: TOML configuration with defaults for every option
//! - [`player`]: authenticated subject model built from token claims
//! - [`auth`]: ES256 token validation, key refresh, revocation lookup
//! - [`server`]: listener, health endpoint, authenticated upgrade
//! - [`connection`]: per-connection pumps and the outbound queue
//! - [`session`]: roster, broadcast, command pipeline, tick driver
//! - [`game`]: map, store, spatial index, delta log, vision engine
//! - [`sync`]: per-client known sets and prioritized emission
//! - [`cache`]: persistent explored-terrain and entity-snapshot memory

pub mod auth;
pub mod cache;
pub mod config;
pub mod connection;
pub mod game;
pub mod player;
pub mod server;
pub mod session;
pub mod sync;
