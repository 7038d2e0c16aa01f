//! # Shared Game Library
//!
//! Code common to the session server and any native client: the hex
//! coordinate kernel, shortest-path search over the hex grid, and the wire
//! protocol types.
//!
//! ## Core Components
//!
//! ### Hex Kernel (`hex`)
//! Axial/cube coordinates in a single global frame, the six fixed neighbor
//! directions, distance, and ring/disk/edge enumeration. Everything here is
//! a pure value operation shared verbatim by server simulation and client
//! rendering, so both sides agree on what "adjacent" means.
//!
//! ### Pathfinding (`path`)
//! A* over axial coordinates with pluggable heuristic, neighbor and cost
//! functions; gameplay layers decide traversability without the kernel
//! knowing about terrain or occupancy.
//!
//! ### Wire Protocol (`protocol`)
//! Every frame on the wire is a JSON object `{type, payload}`. The
//! `ClientMessage` and `ServerMessage` enums define the complete message
//! set, including the entity-synchronization messages produced by the
//! server's vision and sync engines.

pub mod hex;
pub mod path;
pub mod protocol;
