//! Grid pathfinding for players and mobs.
//!
//! A* over the [`PathingGrid`]: unit step cost, Manhattan or Chebyshev
//! heuristic depending on adjacency, and open-set ties broken by insertion
//! order so identical queries always return identical paths.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use log::trace;
use serde::Deserialize;

use crate::grid::PathingGrid;

/// Which neighbours a step may reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Adjacency {
    #[default]
    Four,
    Eight,
}

const ORTHOGONAL: [(i32, i32); 4] = [(0, -1), (1, 0), (0, 1), (-1, 0)];
const DIAGONAL: [(i32, i32); 4] = [(1, -1), (1, 1), (-1, 1), (-1, -1)];

/// A node in the A* search
#[derive(Clone, Copy)]
struct PathNode {
    x: i32,
    y: i32,
    g_cost: u32,
    parent: Option<usize>,
}

pub struct Pathfinder {
    adjacency: Adjacency,
    /// Cells treated as free for the duration of one `find` call
    ignore: HashSet<(u16, u16)>,
}

impl Pathfinder {
    pub fn new(adjacency: Adjacency) -> Self {
        Self {
            adjacency,
            ignore: HashSet::new(),
        }
    }

    pub fn adjacency(&self) -> Adjacency {
        self.adjacency
    }

    fn heuristic(&self, x: i32, y: i32, target: (i32, i32)) -> u32 {
        let dx = x.abs_diff(target.0);
        let dy = y.abs_diff(target.1);
        match self.adjacency {
            Adjacency::Four => dx + dy,
            Adjacency::Eight => dx.max(dy),
        }
    }

    fn passable(&self, grid: &PathingGrid, x: i32, y: i32) -> bool {
        if grid.is_collidable(x, y) {
            return false;
        }
        if !grid.is_blocked(x, y) {
            return true;
        }
        // Only occupancy is left; the ignore set lifts it
        self.ignore.contains(&(x as u16, y as u16))
    }

    /// Finds a path from `start` to `target`, both included.
    ///
    /// `ignore` lists cells whose occupancy is disregarded (the mover's own
    /// cell, the attack target's cell). Returns an empty path when the target
    /// is out of bounds, collidable or unreachable.
    pub fn find(
        &mut self,
        grid: &PathingGrid,
        start: (u16, u16),
        target: (u16, u16),
        ignore: &[(u16, u16)],
    ) -> Vec<(u16, u16)> {
        self.ignore.clear();
        self.ignore.extend(ignore.iter().copied());
        let path = self.search(grid, start, target);
        self.ignore.clear();
        path
    }

    fn search(&self, grid: &PathingGrid, start: (u16, u16), target: (u16, u16)) -> Vec<(u16, u16)> {
        let (sx, sy) = (i32::from(start.0), i32::from(start.1));
        let (tx, ty) = (i32::from(target.0), i32::from(target.1));

        if !grid.in_bounds(sx, sy) || !grid.in_bounds(tx, ty) || grid.is_collidable(tx, ty) {
            return Vec::new();
        }
        if start == target {
            return vec![start];
        }
        if !self.passable(grid, tx, ty) {
            return Vec::new();
        }

        let width = usize::from(grid.width());
        let cells = width * usize::from(grid.height());
        let cell_index = |x: i32, y: i32| y as usize * width + x as usize;

        let mut nodes: Vec<PathNode> = vec![PathNode { x: sx, y: sy, g_cost: 0, parent: None }];
        let mut best_g: Vec<u32> = vec![u32::MAX; cells];
        let mut closed: Vec<bool> = vec![false; cells];
        best_g[cell_index(sx, sy)] = 0;

        // (f cost, insertion sequence, node index)
        let mut open: BinaryHeap<Reverse<(u32, u64, usize)>> = BinaryHeap::new();
        let mut sequence: u64 = 0;
        open.push(Reverse((self.heuristic(sx, sy, (tx, ty)), sequence, 0)));

        let directions: Vec<(i32, i32)> = match self.adjacency {
            Adjacency::Four => ORTHOGONAL.to_vec(),
            Adjacency::Eight => ORTHOGONAL.iter().chain(DIAGONAL.iter()).copied().collect(),
        };

        while let Some(Reverse((_, _, node_index))) = open.pop() {
            let current = nodes[node_index];
            let current_cell = cell_index(current.x, current.y);
            if closed[current_cell] {
                continue;
            }
            closed[current_cell] = true;

            if (current.x, current.y) == (tx, ty) {
                let mut path = Vec::new();
                let mut trace_node = Some(node_index);
                while let Some(index) = trace_node {
                    let node = nodes[index];
                    path.push((node.x as u16, node.y as u16));
                    trace_node = node.parent;
                }
                path.reverse();
                trace!("Path {:?} -> {:?}: {} cells", start, target, path.len());
                return path;
            }

            for &(dx, dy) in &directions {
                let (nx, ny) = (current.x + dx, current.y + dy);
                if !grid.in_bounds(nx, ny) || closed[cell_index(nx, ny)] {
                    continue;
                }
                if !self.passable(grid, nx, ny) {
                    continue;
                }
                // No cutting corners past collidable tiles
                if dx != 0
                    && dy != 0
                    && (grid.is_collidable(current.x + dx, current.y) || grid.is_collidable(current.x, current.y + dy))
                {
                    continue;
                }

                let g_cost = current.g_cost + 1;
                let neighbour_cell = cell_index(nx, ny);
                if g_cost >= best_g[neighbour_cell] {
                    continue;
                }
                best_g[neighbour_cell] = g_cost;

                nodes.push(PathNode { x: nx, y: ny, g_cost, parent: Some(node_index) });
                sequence += 1;
                let f_cost = g_cost + self.heuristic(nx, ny, (tx, ty));
                open.push(Reverse((f_cost, sequence, nodes.len() - 1)));
            }
        }

        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::distance;

    fn grid_from(rows: &[&str]) -> PathingGrid {
        let height = rows.len() as u16;
        let width = rows[0].len() as u16;
        let collision = rows.iter().flat_map(|row| row.chars().map(|c| c == '#')).collect();
        PathingGrid::new(width, height, collision)
    }

    fn assert_sound(grid: &PathingGrid, path: &[(u16, u16)], adjacency: Adjacency) {
        for &(x, y) in path {
            assert!(!grid.is_collidable(i32::from(x), i32::from(y)), "path crosses a wall at {},{}", x, y);
        }
        for pair in path.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert_eq!(distance(a, b), 1, "{:?} and {:?} are not adjacent", a, b);
            if adjacency == Adjacency::Four {
                assert!(a.0 == b.0 || a.1 == b.1);
            }
        }
    }

    #[test]
    fn test_straight_line() {
        let grid = grid_from(&[".....", ".....", "....."]);
        let mut pathfinder = Pathfinder::new(Adjacency::Four);
        let path = pathfinder.find(&grid, (0, 1), (4, 1), &[]);
        assert_eq!(path, vec![(0, 1), (1, 1), (2, 1), (3, 1), (4, 1)]);
    }

    #[test]
    fn test_routes_around_wall() {
        let grid = grid_from(&[
            ".....",
            ".###.",
            ".#...",
            ".#.#.",
            ".....",
        ]);
        let mut pathfinder = Pathfinder::new(Adjacency::Four);
        let path = pathfinder.find(&grid, (0, 0), (2, 3), &[]);

        assert_eq!(path.first(), Some(&(0, 0)));
        assert_eq!(path.last(), Some(&(2, 3)));
        assert_sound(&grid, &path, Adjacency::Four);
    }

    #[test]
    fn test_unreachable_and_invalid_targets() {
        let grid = grid_from(&["..#..", "..#..", "..#.."]);
        let mut pathfinder = Pathfinder::new(Adjacency::Eight);

        assert!(pathfinder.find(&grid, (0, 0), (4, 0), &[]).is_empty());
        assert!(pathfinder.find(&grid, (0, 0), (2, 1), &[]).is_empty());
        assert!(pathfinder.find(&grid, (0, 0), (9, 9), &[]).is_empty());
    }

    #[test]
    fn test_no_corner_cutting() {
        let grid = grid_from(&[".#", ".."]);
        let mut pathfinder = Pathfinder::new(Adjacency::Eight);
        let path = pathfinder.find(&grid, (0, 0), (1, 1), &[]);
        assert_eq!(path, vec![(0, 0), (0, 1), (1, 1)]);
    }

    #[test]
    fn test_diagonal_path_is_shorter() {
        let grid = grid_from(&[".....", ".....", ".....", ".....", "....."]);
        let mut pathfinder = Pathfinder::new(Adjacency::Eight);
        let path = pathfinder.find(&grid, (0, 0), (4, 4), &[]);
        assert_eq!(path.len(), 5);
        assert_sound(&grid, &path, Adjacency::Eight);
    }

    #[test]
    fn test_occupied_cells_need_ignore() {
        let mut grid = grid_from(&["...", "...", "..."]);
        grid.occupy(2, 2).unwrap();
        let mut pathfinder = Pathfinder::new(Adjacency::Four);

        assert!(pathfinder.find(&grid, (0, 0), (2, 2), &[]).is_empty());

        let path = pathfinder.find(&grid, (0, 0), (2, 2), &[(2, 2)]);
        assert_eq!(path.last(), Some(&(2, 2)));

        // The ignore set does not outlive the call
        assert!(pathfinder.find(&grid, (0, 0), (2, 2), &[]).is_empty());
    }

    #[test]
    fn test_deterministic() {
        let grid = grid_from(&[
            "........",
            "..##....",
            "........",
            "....##..",
            "........",
        ]);
        let mut pathfinder = Pathfinder::new(Adjacency::Four);
        let first = pathfinder.find(&grid, (0, 0), (7, 4), &[]);
        for _ in 0..10 {
            assert_eq!(pathfinder.find(&grid, (0, 0), (7, 4), &[]), first);
        }
        assert_sound(&grid, &first, Adjacency::Four);
        assert_eq!(first.len(), 12);
    }

    #[test]
    fn test_start_equals_target() {
        let grid = grid_from(&["..", ".."]);
        let mut pathfinder = Pathfinder::new(Adjacency::Four);
        assert_eq!(pathfinder.find(&grid, (1, 1), (1, 1), &[]), vec![(1, 1)]);
    }
}
