//! Mob behaviour: aggro scan, chase, attack, leash back to spawn.

use log::{debug, warn};

use realm_shared::{CombatOpcode, EntityKind, InstanceId, MovementUpdate, ServerMessage};

use crate::grid::distance;

use super::World;

impl World {
    pub(super) fn update_mobs(&mut self) {
        let mut ids: Vec<InstanceId> =
            self.mobs.iter().filter(|(_, m)| !m.character.dead).map(|(id, _)| *id).collect();
        ids.sort_unstable();

        for id in ids {
            self.update_mob(id);
        }
    }

    fn update_mob(&mut self, id: InstanceId) {
        let Some(mob) = self.mobs.get_mut(&id) else {
            return;
        };
        if mob.character.dead {
            return;
        }
        mob.character.attack_cooldown = mob.character.attack_cooldown.saturating_sub(1);
        if !mob.character.can_move() {
            return;
        }

        if let Some(target) = mob.character.target {
            if self.hostile_position(id, target).is_none() {
                self.disengage(id);
            }
        }
        if self.mobs.get(&id).is_some_and(|m| m.character.target.is_none()) {
            self.acquire_target(id);
        }

        let Some(mob) = self.mobs.get(&id) else {
            return;
        };
        match mob.character.target {
            Some(target) => {
                if mob.is_outside_spawn() {
                    self.leash(id);
                    return;
                }
                self.chase(id, target);
            }
            None => self.return_home(id),
        }
        self.step(id);
    }

    /// First living player in aggro range the mob is willing to pick on
    fn acquire_target(&mut self, id: InstanceId) {
        let Some(mob) = self.mobs.get(&id) else {
            return;
        };
        if !mob.aggressive {
            return;
        }
        let (x, y) = mob.character.position();
        let target = self.grid.entities_around(x, y, mob.aggro_range).into_iter().find(|candidate| {
            self.players
                .get(candidate)
                .is_some_and(|p| !p.character.dead && mob.can_aggro(p.character.level))
        });
        let Some(target) = target else {
            return;
        };

        if let Some(mob) = self.mobs.get_mut(&id) {
            mob.character.target = Some(target);
        }
        if let Some(player) = self.players.get_mut(&target) {
            player.character.attackers.insert(id);
        }
        let initiate = ServerMessage::Combat { kind: CombatOpcode::Initiate, attacker: id, target, hit: None };
        self.send_around(id, initiate, true);
        debug!("Mob {} aggroed on player {}", id, target);
    }

    fn chase(&mut self, id: InstanceId, target: InstanceId) {
        let Some(target_position) = self.hostile_position(id, target) else {
            return;
        };
        let tick = self.tick;
        let interval = u64::from(self.config.mob_movement_interval_ticks);
        let Some(character) = self.mobs.get_mut(&id).map(|m| &mut m.character) else {
            return;
        };

        if character.in_attack_range(target_position) {
            character.stop();
            if character.attack_cooldown == 0 {
                self.perform_attack(id, target);
            }
            return;
        }

        let heading_there = character
            .path
            .back()
            .is_some_and(|end| distance(*end, target_position) <= character.attack_range);
        if heading_there || tick.saturating_sub(character.last_move_tick) < interval {
            return;
        }
        let origin = character.position();
        let path = self.route(origin, target_position, true);
        if let Some(mob) = self.mobs.get_mut(&id) {
            mob.character.set_path(path);
        }
    }

    fn return_home(&mut self, id: InstanceId) {
        let Some(mob) = self.mobs.get(&id) else {
            return;
        };
        let origin = mob.character.position();
        if origin == mob.spawn || mob.character.is_moving() {
            return;
        }
        let spawn = mob.spawn;
        let path = self.route(origin, spawn, false);
        if let Some(mob) = self.mobs.get_mut(&id) {
            mob.character.set_path(path);
        }
    }

    /// Strayed too far: forget the fight and snap back to spawn healed
    fn leash(&mut self, id: InstanceId) {
        self.disengage(id);
        self.release_targeters(id);
        let Some(mob) = self.mobs.get_mut(&id) else {
            return;
        };
        let from = mob.character.position();
        mob.reset();
        let to = mob.spawn;
        let hit_points = mob.character.hit_points;

        if let Err(error) = self.relocate(id, EntityKind::Mob, from, to) {
            warn!("Failed to return mob {} to spawn: {}", id, error);
        }
        self.update_group(id, to, true);

        let update = MovementUpdate::Move { id, x: to.0, y: to.1, forced: true, with_animation: false };
        self.send_around(id, ServerMessage::Movement(update), true);
        self.send_around(id, ServerMessage::Points { id, hit_points, mana: None }, true);
        debug!("Mob {} leashed back to {:?}", id, to);
    }
}
