//! Spatial indexing on the tile grid.
//!
//! [`SpatialGrid`] keeps per-cell occupant lists for proximity queries.
//! [`PathingGrid`] carries the static collision bitmap plus a dynamic
//! occupancy counter used by the pathfinder and move validation.

use std::collections::HashMap;
use std::fmt;

use realm_shared::InstanceId;

/// Grid errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    OutOfBounds { x: i32, y: i32 },
    AlreadyRegistered(InstanceId),
    NotRegistered(InstanceId),
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds { x, y } => write!(f, "Position {},{} is out of bounds", x, y),
            Self::AlreadyRegistered(id) => write!(f, "Entity {} is already on the grid", id),
            Self::NotRegistered(id) => write!(f, "Entity {} is not on the grid", id),
        }
    }
}

impl std::error::Error for GridError {}

/// Chebyshev distance between two cells
pub fn distance(a: (u16, u16), b: (u16, u16)) -> u16 {
    a.0.abs_diff(b.0).max(a.1.abs_diff(b.1))
}

#[derive(Debug, Clone, Copy)]
struct Placement {
    x: u16,
    y: u16,
    seq: u64,
}

/// Cell occupancy lists, each ordered by registration sequence
#[derive(Debug)]
pub struct SpatialGrid {
    width: u16,
    height: u16,
    cells: Vec<Vec<(u64, InstanceId)>>,
    placements: HashMap<InstanceId, Placement>,
    next_seq: u64,
}

impl SpatialGrid {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            cells: vec![Vec::new(); usize::from(width) * usize::from(height)],
            placements: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < i32::from(self.width) && y < i32::from(self.height)
    }

    fn index(&self, x: u16, y: u16) -> Result<usize, GridError> {
        if !self.in_bounds(i32::from(x), i32::from(y)) {
            return Err(GridError::OutOfBounds { x: i32::from(x), y: i32::from(y) });
        }
        Ok(usize::from(y) * usize::from(self.width) + usize::from(x))
    }

    fn insert_sorted(cell: &mut Vec<(u64, InstanceId)>, seq: u64, id: InstanceId) {
        let at = cell.partition_point(|(s, _)| *s < seq);
        cell.insert(at, (seq, id));
    }

    pub fn register(&mut self, id: InstanceId, x: u16, y: u16) -> Result<(), GridError> {
        if self.placements.contains_key(&id) {
            return Err(GridError::AlreadyRegistered(id));
        }
        let index = self.index(x, y)?;

        let seq = self.next_seq;
        self.next_seq += 1;
        Self::insert_sorted(&mut self.cells[index], seq, id);
        self.placements.insert(id, Placement { x, y, seq });
        Ok(())
    }

    /// Removes an entity, returning the cell it was in
    pub fn unregister(&mut self, id: InstanceId) -> Option<(u16, u16)> {
        let placement = self.placements.remove(&id)?;
        let index = usize::from(placement.y) * usize::from(self.width) + usize::from(placement.x);
        self.cells[index].retain(|(_, occupant)| *occupant != id);
        Some((placement.x, placement.y))
    }

    /// Moves an entity, keeping its registration sequence.
    /// Validation happens before anything is touched.
    pub fn move_entity(&mut self, id: InstanceId, x: u16, y: u16) -> Result<(), GridError> {
        let new_index = self.index(x, y)?;
        let placement = *self.placements.get(&id).ok_or(GridError::NotRegistered(id))?;
        let old_index = usize::from(placement.y) * usize::from(self.width) + usize::from(placement.x);

        if old_index != new_index {
            self.cells[old_index].retain(|(_, occupant)| *occupant != id);
            Self::insert_sorted(&mut self.cells[new_index], placement.seq, id);
        }
        self.placements.insert(id, Placement { x, y, seq: placement.seq });
        Ok(())
    }

    /// First occupant of a cell by registration order
    pub fn entity_at(&self, x: i32, y: i32, exclude: Option<InstanceId>) -> Option<InstanceId> {
        if !self.in_bounds(x, y) {
            return None;
        }
        let index = y as usize * usize::from(self.width) + x as usize;
        self.cells[index]
            .iter()
            .map(|(_, id)| *id)
            .find(|id| Some(*id) != exclude)
    }

    /// All occupants of a cell by registration order
    pub fn entities_at(&self, x: u16, y: u16) -> Vec<InstanceId> {
        match self.index(x, y) {
            Ok(index) => self.cells[index].iter().map(|(_, id)| *id).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Everything within Chebyshev `radius` of a cell, by registration order
    pub fn entities_around(&self, x: u16, y: u16, radius: u16) -> Vec<InstanceId> {
        let min_x = x.saturating_sub(radius);
        let min_y = y.saturating_sub(radius);
        let max_x = x.saturating_add(radius).min(self.width.saturating_sub(1));
        let max_y = y.saturating_add(radius).min(self.height.saturating_sub(1));

        let mut found: Vec<(u64, InstanceId)> = Vec::new();
        for cy in min_y..=max_y {
            for cx in min_x..=max_x {
                if let Ok(index) = self.index(cx, cy) {
                    found.extend_from_slice(&self.cells[index]);
                }
            }
        }
        found.sort_unstable_by_key(|(seq, _)| *seq);
        found.into_iter().map(|(_, id)| id).collect()
    }

    pub fn position_of(&self, id: InstanceId) -> Option<(u16, u16)> {
        self.placements.get(&id).map(|p| (p.x, p.y))
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.placements.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }
}

/// Collision bitmap plus per-cell occupancy counts
#[derive(Debug, Clone)]
pub struct PathingGrid {
    width: u16,
    height: u16,
    collision: Vec<bool>,
    occupied: Vec<u16>,
}

impl PathingGrid {
    pub fn new(width: u16, height: u16, collision: Vec<bool>) -> Self {
        let cells = usize::from(width) * usize::from(height);
        let mut collision = collision;
        collision.resize(cells, false);
        Self {
            width,
            height,
            collision,
            occupied: vec![0; cells],
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < i32::from(self.width) && y < i32::from(self.height)
    }

    fn index(&self, x: i32, y: i32) -> Result<usize, GridError> {
        if !self.in_bounds(x, y) {
            return Err(GridError::OutOfBounds { x, y });
        }
        Ok(y as usize * usize::from(self.width) + x as usize)
    }

    /// Static collision; out of bounds counts as collidable
    pub fn is_collidable(&self, x: i32, y: i32) -> bool {
        match self.index(x, y) {
            Ok(index) => self.collision[index],
            Err(_) => true,
        }
    }

    /// Collidable or currently occupied
    pub fn is_blocked(&self, x: i32, y: i32) -> bool {
        match self.index(x, y) {
            Ok(index) => self.collision[index] || self.occupied[index] > 0,
            Err(_) => true,
        }
    }

    pub fn occupy(&mut self, x: u16, y: u16) -> Result<(), GridError> {
        let index = self.index(i32::from(x), i32::from(y))?;
        self.occupied[index] = self.occupied[index].saturating_add(1);
        Ok(())
    }

    pub fn vacate(&mut self, x: u16, y: u16) -> Result<(), GridError> {
        let index = self.index(i32::from(x), i32::from(y))?;
        self.occupied[index] = self.occupied[index].saturating_sub(1);
        Ok(())
    }

    pub fn occupancy(&self, x: u16, y: u16) -> u16 {
        match self.index(i32::from(x), i32::from(y)) {
            Ok(index) => self.occupied[index],
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_register_and_query() {
        let mut grid = SpatialGrid::new(10, 10);
        grid.register(1, 2, 2).unwrap();
        grid.register(2, 2, 2).unwrap();
        grid.register(3, 5, 5).unwrap();

        assert_eq!(grid.entity_at(2, 2, None), Some(1));
        assert_eq!(grid.entity_at(2, 2, Some(1)), Some(2));
        assert_eq!(grid.entity_at(4, 4, None), None);
        assert_eq!(grid.entities_around(3, 3, 1), vec![1, 2]);
        assert_eq!(grid.entities_around(3, 3, 2), vec![1, 2, 3]);
        assert_eq!(grid.len(), 3);
    }

    #[test]
    fn test_out_of_bounds_is_rejected_not_clamped() {
        let mut grid = SpatialGrid::new(10, 10);
        assert_eq!(grid.register(1, 10, 0), Err(GridError::OutOfBounds { x: 10, y: 0 }));
        assert!(grid.is_empty());

        grid.register(1, 9, 9).unwrap();
        assert_eq!(grid.move_entity(1, 9, 10), Err(GridError::OutOfBounds { x: 9, y: 10 }));
        assert_eq!(grid.position_of(1), Some((9, 9)));

        assert_eq!(grid.entity_at(-1, 0, None), None);
        assert_eq!(grid.entity_at(10, 10, None), None);
    }

    #[test]
    fn test_move_keeps_registration_order() {
        let mut grid = SpatialGrid::new(10, 10);
        grid.register(1, 0, 0).unwrap();
        grid.register(2, 1, 1).unwrap();
        grid.move_entity(1, 1, 1).unwrap();

        assert_eq!(grid.entities_at(1, 1), vec![1, 2]);
        assert!(grid.entities_at(0, 0).is_empty());
    }

    #[test]
    fn test_double_registration_fails() {
        let mut grid = SpatialGrid::new(4, 4);
        grid.register(7, 1, 1).unwrap();
        assert_eq!(grid.register(7, 2, 2), Err(GridError::AlreadyRegistered(7)));
        assert_eq!(grid.move_entity(8, 2, 2), Err(GridError::NotRegistered(8)));
        assert_eq!(grid.unregister(7), Some((1, 1)));
        assert_eq!(grid.unregister(7), None);
    }

    #[test]
    fn test_random_operations_keep_index_consistent() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut grid = SpatialGrid::new(16, 16);
        let mut expected: HashMap<InstanceId, (u16, u16)> = HashMap::new();

        for _ in 0..2_000 {
            let id = rng.gen_range(0..40u64);
            let x = rng.gen_range(0..16u16);
            let y = rng.gen_range(0..16u16);
            match rng.gen_range(0..3) {
                0 => {
                    if grid.register(id, x, y).is_ok() {
                        expected.insert(id, (x, y));
                    }
                }
                1 => {
                    if grid.move_entity(id, x, y).is_ok() {
                        expected.insert(id, (x, y));
                    }
                }
                _ => {
                    assert_eq!(grid.unregister(id), expected.remove(&id));
                }
            }
        }

        assert_eq!(grid.len(), expected.len());
        for (id, (x, y)) in &expected {
            assert_eq!(grid.position_of(*id), Some((*x, *y)));
            assert!(grid.entities_at(*x, *y).contains(id));
        }
        let total: usize = grid.entities_around(8, 8, 16).len();
        assert_eq!(total, expected.len());
    }

    #[test]
    fn test_pathing_grid_blocking() {
        let mut collision = vec![false; 9];
        collision[4] = true;
        let mut pathing = PathingGrid::new(3, 3, collision);

        assert!(pathing.is_collidable(1, 1));
        assert!(pathing.is_collidable(-1, 0));
        assert!(!pathing.is_blocked(0, 0));

        pathing.occupy(0, 0).unwrap();
        pathing.occupy(0, 0).unwrap();
        assert!(pathing.is_blocked(0, 0));
        pathing.vacate(0, 0).unwrap();
        assert!(pathing.is_blocked(0, 0));
        pathing.vacate(0, 0).unwrap();
        assert!(!pathing.is_blocked(0, 0));

        assert_eq!(pathing.occupy(3, 0), Err(GridError::OutOfBounds { x: 3, y: 0 }));
    }

    #[test]
    fn test_distance_is_chebyshev() {
        assert_eq!(distance((0, 0), (3, 1)), 3);
        assert_eq!(distance((5, 5), (4, 6)), 1);
        assert_eq!(distance((2, 2), (2, 2)), 0);
    }
}
