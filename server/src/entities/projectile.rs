//! Projectiles in flight between a ranged attacker and its target.

use realm_shared::{EntityKind, EntityState, Hit, InstanceId};

#[derive(Debug, Clone)]
pub struct Projectile {
    pub id: InstanceId,
    /// Sprite name, e.g. `projectile-pinearrow`
    pub name: String,
    pub source: InstanceId,
    pub target: InstanceId,
    pub hit: Hit,
    pub x: u16,
    pub y: u16,
    pub impact_tick: u64,
}

impl Projectile {
    pub fn entity_state(&self) -> EntityState {
        let mut state = EntityState::new(EntityKind::Projectile, self.id, &self.name, &self.name, self.x, self.y);
        state.source = Some(self.source);
        state.target = Some(self.target);
        state
    }
}
