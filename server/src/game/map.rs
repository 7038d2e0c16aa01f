//! Chunked hex world map
//!
//! The map is stored as hex-shaped chunks of radius [`CHUNK_RADIUS`]
//! centered on a chunk-grid lattice. Chunk centers sit at
//! `i*(2R+1, -R) + j*(R, R+1)` in world axial space, which makes the
//! radius-R disks around them partition the plane exactly: every world hex
//! belongs to exactly one chunk and the containing chunk is derivable in
//! constant time.
//!
//! Terrain is generated deterministically: each chunk draws from an RNG
//! seeded by hashing the world seed with the chunk coordinate, so the
//! result does not depend on generation order.

use std::collections::HashMap;

use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use shared::hex::{disk, disk_len, Axial};

/// Hex radius of a chunk; a chunk holds `1 + 3R(R+1)` cells (271 for R=9).
pub const CHUNK_RADIUS: i32 = 9;

/// Number of cells in one generated chunk.
pub const CHUNK_CELLS: usize = disk_len(CHUNK_RADIUS);

/// Terrain of a single world cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terrain {
    Plains,
    Forest,
    Hills,
    Water,
}

impl Terrain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Terrain::Plains => "plains",
            Terrain::Forest => "forest",
            Terrain::Hills => "hills",
            Terrain::Water => "water",
        }
    }
}

/// A generated hex-shaped region of the world. Chunks are never partially
/// generated and never torn down mid-session.
#[derive(Debug)]
pub struct HexChunk {
    /// Chunk-grid coordinate.
    pub coord: Axial,
    /// World cell at the chunk's center.
    pub center: Axial,
    /// Terrain keyed by local axial offset from the center.
    cells: HashMap<Axial, Terrain>,
}

impl HexChunk {
    fn generate(coord: Axial, seed: u64) -> Self {
        let center = GameMap::chunk_center(coord);
        let mut rng = StdRng::seed_from_u64(chunk_seed(seed, coord));
        let mut cells = HashMap::with_capacity(CHUNK_CELLS);
        for local in disk(Axial::new(0, 0), CHUNK_RADIUS) {
            cells.insert(local, roll_terrain(&mut rng));
        }
        HexChunk { coord, center, cells }
    }

    /// Terrain at a local offset within this chunk.
    pub fn terrain(&self, local: Axial) -> Option<Terrain> {
        self.cells.get(&local).copied()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

fn roll_terrain(rng: &mut StdRng) -> Terrain {
    match rng.gen_range(0..100) {
        0..=59 => Terrain::Plains,
        60..=79 => Terrain::Forest,
        80..=94 => Terrain::Hills,
        _ => Terrain::Water,
    }
}

/// Mixes the world seed with a chunk coordinate (splitmix-style hash) so
/// every chunk has an independent, order-free RNG stream.
fn chunk_seed(seed: u64, coord: Axial) -> u64 {
    let mut x = seed;
    x ^= (coord.q as u32 as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x ^= (coord.r as u32 as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// The world map: chunk-grid coordinate → generated chunk.
#[derive(Debug)]
pub struct GameMap {
    chunks: HashMap<Axial, HexChunk>,
    chunk_grid_radius: i32,
    seed: u64,
}

impl GameMap {
    /// Generates all chunks in the chunk-grid disk of `chunk_grid_radius`
    /// around the origin.
    pub fn generate(chunk_grid_radius: i32, seed: u64) -> Self {
        let mut chunks = HashMap::with_capacity(disk_len(chunk_grid_radius));
        for coord in disk(Axial::new(0, 0), chunk_grid_radius) {
            chunks.insert(coord, HexChunk::generate(coord, seed));
        }
        info!(
            "Generated map: {} chunks of {} cells (chunk-grid radius {})",
            chunks.len(),
            CHUNK_CELLS,
            chunk_grid_radius
        );
        GameMap {
            chunks,
            chunk_grid_radius,
            seed,
        }
    }

    /// World cell at the center of chunk-grid coordinate `coord`.
    pub fn chunk_center(coord: Axial) -> Axial {
        let r = CHUNK_RADIUS;
        Axial::new(
            coord.q * (2 * r + 1) + coord.r * r,
            coord.q * -r + coord.r * (r + 1),
        )
    }

    /// Chunk-grid coordinate of the chunk containing `world`.
    ///
    /// Inverts the center lattice with real-valued division, then checks the
    /// 3x3 candidate neighborhood for the unique center within
    /// `CHUNK_RADIUS`.
    pub fn chunk_of(world: Axial) -> Axial {
        let r = CHUNK_RADIUS;
        let area = (3 * r * r + 3 * r + 1) as f64;
        let fi = ((r + 1) * world.q - r * world.r) as f64 / area;
        let fj = (r * world.q + (2 * r + 1) * world.r) as f64 / area;
        let bi = fi.round() as i32;
        let bj = fj.round() as i32;
        for di in -1..=1 {
            for dj in -1..=1 {
                let coord = Axial::new(bi + di, bj + dj);
                if Self::chunk_center(coord).distance(world) <= r {
                    return coord;
                }
            }
        }
        // The candidate scan always finds the containing chunk; the rounded
        // guess alone is off by at most one lattice step.
        unreachable!("world hex {} not covered by the chunk lattice", world)
    }

    /// Local offset of `world` within its containing chunk.
    pub fn local_of(world: Axial) -> Axial {
        let center = Self::chunk_center(Self::chunk_of(world));
        Axial::new(world.q - center.q, world.r - center.r)
    }

    /// The chunk at a chunk-grid coordinate, or `None` when not generated.
    pub fn chunk(&self, coord: Axial) -> Option<&HexChunk> {
        self.chunks.get(&coord)
    }

    /// Terrain at a world cell, or `None` when the containing chunk has not
    /// been generated.
    pub fn terrain_at(&self, world: Axial) -> Option<Terrain> {
        let chunk = self.chunks.get(&Self::chunk_of(world))?;
        chunk.terrain(Axial::new(world.q - chunk.center.q, world.r - chunk.center.r))
    }

    /// Whether a world cell lies within the generated area.
    pub fn contains(&self, world: Axial) -> bool {
        self.chunks.contains_key(&Self::chunk_of(world))
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk_grid_radius(&self) -> i32 {
        self.chunk_grid_radius
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}
