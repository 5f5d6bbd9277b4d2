//! Chests placed by the map or revealed by clearing a chest area. Opening
//! one drops a random item from its list.

use rand::seq::SliceRandom;
use rand::Rng;

use realm_shared::{EntityKind, EntityState, InstanceId};

/// Where a chest came from, which decides how it comes back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChestOrigin {
    /// Index into the map's chest placements; respawns after a delay
    Placed(usize),
    /// Index into the map's chest areas; reappears when the area is cleared again
    Area(usize),
}

#[derive(Debug, Clone)]
pub struct Chest {
    pub id: InstanceId,
    pub x: u16,
    pub y: u16,
    pub items: Vec<String>,
    pub origin: ChestOrigin,
}

impl Chest {
    pub fn position(&self) -> (u16, u16) {
        (self.x, self.y)
    }

    pub fn roll_item<R: Rng>(&self, rng: &mut R) -> Option<&str> {
        self.items.choose(rng).map(String::as_str)
    }

    pub fn entity_state(&self) -> EntityState {
        EntityState::new(EntityKind::Chest, self.id, "chest", "Chest", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_roll_picks_from_list() {
        let chest = Chest {
            id: 1,
            x: 0,
            y: 0,
            items: vec!["burger".into(), "flask".into()],
            origin: ChestOrigin::Placed(0),
        };
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let key = chest.roll_item(&mut rng).unwrap();
            assert!(key == "burger" || key == "flask");
        }

        let empty = Chest { items: Vec::new(), ..chest };
        assert_eq!(empty.roll_item(&mut rng), None);
    }
}
