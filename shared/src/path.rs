//! Shortest-path search over the hex grid
//!
//! A* with a pluggable heuristic, neighbor function and edge-cost function,
//! so callers decide which cells are traversable (terrain, occupancy, chunk
//! bounds) without the kernel knowing about any of them.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::hex::{Axial, DIRECTIONS};

#[derive(Debug, Clone, Copy, PartialEq)]
struct OpenNode {
    cell: Axial,
    f: i64,
}

impl Eq for OpenNode {}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the lowest f-score pops first.
        other
            .f
            .cmp(&self.f)
            .then_with(|| (other.cell.q, other.cell.r).cmp(&(self.cell.q, self.cell.r)))
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Computes a shortest path from `start` to `goal` with A*.
///
/// * `heuristic` must be admissible (never overestimate the remaining cost).
/// * `neighbors` returns the cells adjacent to a cell that may be explored.
/// * `cost` is the edge cost between two adjacent cells; values `<= 0` are
///   treated as 1.
///
/// Returns the path including both endpoints, or `None` when the goal is
/// unreachable.
pub fn astar<H, N, C>(start: Axial, goal: Axial, heuristic: H, neighbors: N, cost: C) -> Option<Vec<Axial>>
where
    H: Fn(Axial) -> i32,
    N: Fn(Axial) -> Vec<Axial>,
    C: Fn(Axial, Axial) -> i32,
{
    if start == goal {
        return Some(vec![start]);
    }

    let mut open = BinaryHeap::new();
    let mut g_score: HashMap<Axial, i64> = HashMap::new();
    let mut came_from: HashMap<Axial, Axial> = HashMap::new();
    let mut closed: HashMap<Axial, bool> = HashMap::new();

    g_score.insert(start, 0);
    open.push(OpenNode {
        cell: start,
        f: heuristic(start) as i64,
    });

    while let Some(OpenNode { cell, .. }) = open.pop() {
        if closed.get(&cell).copied().unwrap_or(false) {
            continue;
        }
        closed.insert(cell, true);

        if cell == goal {
            let mut path = vec![goal];
            let mut cur = goal;
            while cur != start {
                cur = came_from[&cur];
                path.push(cur);
            }
            path.reverse();
            return Some(path);
        }

        let g_here = g_score[&cell];
        for next in neighbors(cell) {
            if closed.get(&next).copied().unwrap_or(false) {
                continue;
            }
            let step = cost(cell, next).max(1) as i64;
            let tentative = g_here + step;
            if g_score.get(&next).map_or(true, |&old| tentative < old) {
                g_score.insert(next, tentative);
                came_from.insert(next, cell);
                open.push(OpenNode {
                    cell: next,
                    f: tentative + heuristic(next) as i64,
                });
            }
        }
    }

    None
}

/// Hex-distance heuristic toward `goal`.
pub fn heuristic_to(goal: Axial) -> impl Fn(Axial) -> i32 {
    move |a| a.distance(goal)
}

/// Neighbor function limited to the disc of `radius` around `center`.
pub fn neighbors_within_disc(center: Axial, radius: i32) -> impl Fn(Axial) -> Vec<Axial> {
    move |a| {
        DIRECTIONS
            .iter()
            .map(|d| a.add(*d))
            .filter(|b| center.distance(*b) <= radius)
            .collect()
    }
}

/// Uniform edge cost.
pub fn unit_cost(_: Axial, _: Axial) -> i32 {
    1
}
