//! World item entity (dropped items).

use realm_shared::{EntityKind, EntityState, Enchantment, InstanceId};

/// An item on the ground that can be picked up
#[derive(Debug, Clone)]
pub struct WorldItem {
    pub id: InstanceId,
    pub key: String,
    pub name: String,
    pub count: u32,
    pub ability: Enchantment,
    pub ability_level: u32,
    pub x: u16,
    pub y: u16,
    /// Tick at which the item disappears
    pub expires_at: u64,
}

impl WorldItem {
    pub fn position(&self) -> (u16, u16) {
        (self.x, self.y)
    }

    pub fn entity_state(&self) -> EntityState {
        let mut state = EntityState::new(EntityKind::Item, self.id, &self.key, &self.name, self.x, self.y);
        state.count = Some(self.count);
        state
    }
}
