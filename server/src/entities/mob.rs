//! Server-side mob entity.

use std::collections::BTreeMap;

use rand::Rng;

use realm_shared::{Enchantment, EntityKind, EntityState, InstanceId};

use crate::content::MobDef;
use crate::formulas::{self, CombatStats};

use super::{Character, Combatant};

/// Server-side mob state
#[derive(Debug, Clone)]
pub struct Mob {
    pub character: Character,
    pub key: String,
    pub name: String,
    pub spawn: (u16, u16),
    pub aggressive: bool,
    pub aggro_range: u16,
    /// Item key to weight out of 1000
    pub drops: BTreeMap<String, u32>,
    /// Milliseconds, `-1` for never
    pub respawn_delay: i64,
    /// Placed by the map rather than spawned at runtime
    pub is_static: bool,
    pub spawn_distance: u16,
    pub armour_level: u32,
    pub weapon_level: u32,
    pub experience: u64,
    pub projectile: String,
}

impl Mob {
    pub fn from_def(id: InstanceId, def: &MobDef, x: u16, y: u16, is_static: bool) -> Self {
        let mut character = Character::new(id, x, y, def.hit_points, def.level);
        character.attack_range = def.attack_range.max(1);

        Self {
            character,
            key: def.key.clone(),
            name: def.name.clone(),
            spawn: (x, y),
            aggressive: def.aggressive,
            aggro_range: def.aggro_range,
            drops: def.drops.clone(),
            respawn_delay: def.respawn_delay,
            is_static,
            spawn_distance: def.spawn_distance,
            armour_level: def.armour_level,
            weapon_level: def.weapon_level,
            experience: def.experience,
            projectile: def.projectile.clone(),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.character.id
    }

    /// Mobs leave players well above their own level alone
    pub fn can_aggro(&self, player_level: u32) -> bool {
        let ceiling = self.character.level * 3 / 2;
        self.aggressive && ceiling >= player_level
    }

    /// Too far from home; drop the target and walk back
    pub fn is_outside_spawn(&self) -> bool {
        self.character.distance_to(self.spawn) > self.spawn_distance
    }

    pub fn should_respawn(&self) -> bool {
        self.is_static && self.respawn_delay != -1
    }

    pub fn roll_drop<R: Rng>(&self, rng: &mut R) -> Option<(String, u32)> {
        formulas::roll_drop(&self.drops, self.character.level, rng)
    }

    /// Back to spawn with full health
    pub fn reset(&mut self) {
        let character = &mut self.character;
        character.stop();
        character.target = None;
        character.attackers.clear();
        character.x = self.spawn.0;
        character.y = self.spawn.1;
        character.hit_points = character.max_hit_points;
    }

    pub fn entity_state(&self) -> EntityState {
        let character = &self.character;
        let mut state = EntityState::new(EntityKind::Mob, character.id, &self.key, &self.name, character.x, character.y);
        state.hit_points = Some(character.hit_points);
        state.max_hit_points = Some(character.max_hit_points);
        state.level = Some(character.level);
        state
    }
}

impl Combatant for Mob {
    fn character(&self) -> &Character {
        &self.character
    }

    fn character_mut(&mut self) -> &mut Character {
        &mut self.character
    }

    fn combat_stats(&self) -> CombatStats {
        CombatStats {
            level: self.character.level,
            weapon_level: self.weapon_level,
            armour_level: self.armour_level,
        }
    }

    fn special_ability(&self) -> Option<(Enchantment, u32)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Content;
    use crate::entities::DamageOutcome;

    fn goblin() -> Mob {
        let content = Content::builtin().unwrap();
        Mob::from_def(5, &content.mobs["goblin"], 20, 20, true)
    }

    #[test]
    fn test_aggro_ceiling() {
        let mob = goblin();
        assert!(mob.can_aggro(7));
        assert!(!mob.can_aggro(8));

        let passive = Mob { aggressive: false, ..mob };
        assert!(!passive.can_aggro(1));
    }

    #[test]
    fn test_leash_and_reset() {
        let mut mob = goblin();
        mob.character.x = 30;
        mob.character.target = Some(9);
        mob.character.hit_points = 3;
        assert!(mob.is_outside_spawn());

        mob.reset();
        assert_eq!(mob.character.position(), (20, 20));
        assert_eq!(mob.character.target, None);
        assert!(mob.character.is_full_health());
        assert!(!mob.is_outside_spawn());
    }

    #[test]
    fn test_respawn_rules() {
        let mob = goblin();
        assert!(mob.should_respawn());
        assert!(!Mob { is_static: false, ..mob.clone() }.should_respawn());
        assert!(!Mob { respawn_delay: -1, ..mob }.should_respawn());
    }

    #[test]
    fn test_damage_to_death() {
        let mut mob = goblin();
        assert_eq!(mob.apply_damage(60), DamageOutcome::Survived { remaining: 10 });
        assert_eq!(mob.apply_damage(60), DamageOutcome::Died);
        assert!(mob.character.dead);
        assert_eq!(mob.special_ability(), None);
    }
}
