//! World model: chunked map, entity/component store, spatial index,
//! delta log and vision engine, composed by [`world::World`].

pub mod delta;
pub mod map;
pub mod spatial;
pub mod store;
pub mod vision;
pub mod world;

pub use delta::{Change, DeltaLog, DeltaRecord};
pub use map::{GameMap, HexChunk, Terrain, CHUNK_CELLS, CHUNK_RADIUS};
pub use spatial::SpatialIndex;
pub use store::{
    ComponentKind, ComponentValue, EntityClass, EntityId, EntityStore, Stats, StoreError,
    VisionKind, VisionSpec,
};
pub use vision::{DefaultStealthPolicy, Observer, StealthPolicy, Visibility, VisionEngine};
pub use world::{GameSystem, World};
