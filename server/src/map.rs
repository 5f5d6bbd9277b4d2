//! World map: dimensions, collision tiles, PvP areas and spawn placements.

use serde::{Deserialize, Serialize};

use crate::content::ContentError;
use crate::grid::PathingGrid;

/// Rectangular tile area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl Area {
    pub fn contains(&self, x: u16, y: u16) -> bool {
        x >= self.x
            && y >= self.y
            && u32::from(x) < u32::from(self.x) + u32::from(self.width)
            && u32::from(y) < u32::from(self.y) + u32::from(self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: u16,
    pub y: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySpawn {
    pub key: String,
    pub x: u16,
    pub y: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChestSpawn {
    pub x: u16,
    pub y: u16,
    /// Item keys one of which is handed out when opened
    pub items: Vec<String>,
    #[serde(default = "default_chest_respawn")]
    pub respawn_delay_ms: u64,
}

fn default_chest_respawn() -> u64 {
    25_000
}

/// Mobs standing in `area` guard a chest that appears at `chest` once the
/// last of them dies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChestArea {
    pub area: Area,
    pub chest: Point,
    pub items: Vec<String>,
}

/// Map file as stored on disk (`map.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapData {
    pub width: u16,
    pub height: u16,
    /// Collidable tile indices (`y * width + x`)
    #[serde(default)]
    pub collisions: Vec<u32>,
    #[serde(default = "default_group_size")]
    pub group_width: u16,
    #[serde(default = "default_group_size")]
    pub group_height: u16,
    pub spawn: Point,
    #[serde(default)]
    pub pvp_areas: Vec<Area>,
    #[serde(default)]
    pub mobs: Vec<EntitySpawn>,
    #[serde(default)]
    pub npcs: Vec<EntitySpawn>,
    #[serde(default)]
    pub chests: Vec<ChestSpawn>,
    #[serde(default)]
    pub chest_areas: Vec<ChestArea>,
}

fn default_group_size() -> u16 {
    16
}

/// Validated map
#[derive(Debug, Clone)]
pub struct Map {
    pub width: u16,
    pub height: u16,
    collisions: Vec<bool>,
    pub group_width: u16,
    pub group_height: u16,
    pub spawn: Point,
    pub pvp_areas: Vec<Area>,
    pub mobs: Vec<EntitySpawn>,
    pub npcs: Vec<EntitySpawn>,
    pub chests: Vec<ChestSpawn>,
    pub chest_areas: Vec<ChestArea>,
}

impl Map {
    pub fn from_data(data: MapData) -> Result<Self, ContentError> {
        if data.width == 0 || data.height == 0 {
            return Err(ContentError::Invalid("map has zero size".into()));
        }
        if data.group_width == 0 || data.group_height == 0 {
            return Err(ContentError::Invalid("group size must be positive".into()));
        }

        let cells = usize::from(data.width) * usize::from(data.height);
        let mut collisions = vec![false; cells];
        for &index in &data.collisions {
            let index = index as usize;
            if index >= cells {
                return Err(ContentError::Invalid(format!("collision index {} is outside the map", index)));
            }
            collisions[index] = true;
        }

        let map = Self {
            width: data.width,
            height: data.height,
            collisions,
            group_width: data.group_width,
            group_height: data.group_height,
            spawn: data.spawn,
            pvp_areas: data.pvp_areas,
            mobs: data.mobs,
            npcs: data.npcs,
            chests: data.chests,
            chest_areas: data.chest_areas,
        };

        if !map.is_walkable(map.spawn.x, map.spawn.y) {
            return Err(ContentError::Invalid(format!(
                "spawn point {},{} is not walkable",
                map.spawn.x, map.spawn.y
            )));
        }
        let placements = map
            .mobs
            .iter()
            .chain(&map.npcs)
            .map(|s| (s.x, s.y))
            .chain(map.chests.iter().map(|c| (c.x, c.y)))
            .chain(map.chest_areas.iter().map(|a| (a.chest.x, a.chest.y)));
        for (x, y) in placements {
            if !map.is_walkable(x, y) {
                return Err(ContentError::Invalid(format!("placement {},{} is not walkable", x, y)));
            }
        }

        Ok(map)
    }

    pub fn in_bounds(&self, x: u16, y: u16) -> bool {
        x < self.width && y < self.height
    }

    pub fn is_collidable(&self, x: u16, y: u16) -> bool {
        if !self.in_bounds(x, y) {
            return true;
        }
        self.collisions[usize::from(y) * usize::from(self.width) + usize::from(x)]
    }

    pub fn is_walkable(&self, x: u16, y: u16) -> bool {
        self.in_bounds(x, y) && !self.is_collidable(x, y)
    }

    pub fn is_pvp(&self, x: u16, y: u16) -> bool {
        self.pvp_areas.iter().any(|area| area.contains(x, y))
    }

    /// Index of the chest area covering a cell
    pub fn chest_area_at(&self, x: u16, y: u16) -> Option<usize> {
        self.chest_areas.iter().position(|chest_area| chest_area.area.contains(x, y))
    }

    /// Fresh pathing grid carrying this map's collisions
    pub fn pathing_grid(&self) -> PathingGrid {
        PathingGrid::new(self.width, self.height, self.collisions.clone())
    }

    /// Small built-in map used when no map file is provided.
    ///
    /// 64x48 tiles, walled border, a town around the spawn point, a field of
    /// rats to the east, goblins in the south and a PvP arena in the
    /// north-east corner.
    pub fn builtin_data() -> MapData {
        let width: u16 = 64;
        let height: u16 = 48;
        let mut collisions = Vec::new();
        let mut block = |x: u16, y: u16| collisions.push(u32::from(y) * u32::from(width) + u32::from(x));

        for x in 0..width {
            block(x, 0);
            block(x, height - 1);
        }
        for y in 1..height - 1 {
            block(0, y);
            block(width - 1, y);
        }
        // Town wall with a gate at y = 12
        for y in 4..20 {
            if y != 12 {
                block(20, y);
            }
        }
        // Pond in the field
        for x in 34..38 {
            for y in 20..23 {
                block(x, y);
            }
        }

        let spawn = |key: &str, x: u16, y: u16| EntitySpawn { key: key.to_string(), x, y };

        MapData {
            width,
            height,
            collisions,
            group_width: 16,
            group_height: 16,
            spawn: Point { x: 10, y: 12 },
            pvp_areas: vec![Area { x: 48, y: 1, width: 15, height: 12 }],
            mobs: vec![
                spawn("rat", 28, 10),
                spawn("rat", 30, 14),
                spawn("rat", 26, 16),
                spawn("rat", 31, 8),
                spawn("goblin", 24, 34),
                spawn("goblin", 30, 38),
                spawn("skeletonarcher", 44, 36),
            ],
            npcs: vec![
                spawn("guard", 18, 12),
                spawn("banker", 6, 6),
                spawn("enchanter", 12, 6),
            ],
            chests: vec![ChestSpawn {
                x: 40,
                y: 40,
                items: vec!["flask".into(), "ring1".into(), "pendant1".into()],
                respawn_delay_ms: default_chest_respawn(),
            }],
            // The goblin camp hides a chest
            chest_areas: vec![ChestArea {
                area: Area { x: 22, y: 32, width: 12, height: 10 },
                chest: Point { x: 27, y: 36 },
                items: vec!["sword2".into(), "leatherarmor".into()],
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_map_is_valid() {
        let map = Map::from_data(Map::builtin_data()).unwrap();
        assert!(map.is_collidable(0, 0));
        assert!(map.is_walkable(map.spawn.x, map.spawn.y));
        assert!(map.is_pvp(50, 5));
        assert!(!map.is_pvp(10, 12));
        assert!(map.is_collidable(200, 200));
    }

    #[test]
    fn test_rejects_collision_outside_map() {
        let mut data = Map::builtin_data();
        data.collisions.push(u32::MAX);
        assert!(matches!(Map::from_data(data), Err(ContentError::Invalid(_))));
    }

    #[test]
    fn test_rejects_spawn_on_wall() {
        let mut data = Map::builtin_data();
        data.spawn = Point { x: 0, y: 0 };
        assert!(Map::from_data(data).is_err());
    }

    #[test]
    fn test_chest_area_lookup() {
        let map = Map::from_data(Map::builtin_data()).unwrap();
        assert_eq!(map.chest_area_at(24, 34), Some(0));
        assert_eq!(map.chest_area_at(28, 10), None);

        let mut data = Map::builtin_data();
        data.chest_areas[0].chest = Point { x: 0, y: 0 };
        assert!(Map::from_data(data).is_err());
    }

    #[test]
    fn test_area_contains_is_half_open() {
        let area = Area { x: 2, y: 2, width: 3, height: 1 };
        assert!(area.contains(2, 2));
        assert!(area.contains(4, 2));
        assert!(!area.contains(5, 2));
        assert!(!area.contains(2, 3));
    }
}
