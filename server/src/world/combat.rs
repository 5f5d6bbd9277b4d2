//! Hit resolution, projectiles, death and the rewards that follow.

use std::collections::HashMap;

use log::{debug, info, warn};
use rand::Rng;

use realm_shared::{
    CombatOpcode, Enchantment, EntityKind, ExperienceInfo, HealInfo, Hit, HitKind, InstanceId, MovementUpdate,
    ServerMessage,
};

use crate::content::DEFAULT_PROJECTILE;
use crate::entities::{Combatant, DamageOutcome, Mob, Player, Projectile};
use crate::formulas;

use super::{ActionError, Task, World};

/// Rolls one hit of `attacker` against `defender`.
///
/// Critical hits multiply the base damage by `1 + ability_level`; stun and
/// explosive procs keep the base damage and change the hit kind, leaving
/// their side effects to the caller.
pub fn get_hit<R: Rng>(attacker: &dyn Combatant, defender: &dyn Combatant, rng: &mut R) -> Hit {
    let base = formulas::damage(&attacker.combat_stats(), &defender.combat_stats());
    let mut hit = Hit::new(HitKind::Damage, base);

    if let Some((ability, level)) = attacker.special_ability() {
        if ability.is_special() && formulas::is_special(level, rng) {
            hit.kind = HitKind::for_enchantment(ability);
            if ability == Enchantment::Critical {
                hit.damage = base.saturating_mul(1 + level);
            }
        }
    }

    hit.ranged(attacker.character().is_ranged())
}

fn combatant<'a>(
    players: &'a HashMap<InstanceId, Player>,
    mobs: &'a HashMap<InstanceId, Mob>,
    id: InstanceId,
) -> Option<&'a dyn Combatant> {
    if let Some(player) = players.get(&id) {
        return Some(player);
    }
    mobs.get(&id).map(|mob| mob as &dyn Combatant)
}

fn combatant_mut<'a>(
    players: &'a mut HashMap<InstanceId, Player>,
    mobs: &'a mut HashMap<InstanceId, Mob>,
    id: InstanceId,
) -> Option<&'a mut dyn Combatant> {
    if let Some(player) = players.get_mut(&id) {
        return Some(player);
    }
    mobs.get_mut(&id).map(|mob| mob as &mut dyn Combatant)
}

impl World {
    /// Position of `target` if `attacker` may fight it right now. Players
    /// fight mobs, mobs fight players, and players fight each other only
    /// while both stand in a PvP area.
    pub(super) fn hostile_position(&self, attacker: InstanceId, target: InstanceId) -> Option<(u16, u16)> {
        if attacker == target {
            return None;
        }
        let attacker_is_player = self.players.contains_key(&attacker);

        if let Some(player) = self.players.get(&target) {
            if player.character.dead {
                return None;
            }
            if attacker_is_player {
                let attacker_pvp = self.players.get(&attacker).is_some_and(|p| p.character.pvp);
                if !(attacker_pvp && player.character.pvp) {
                    return None;
                }
            }
            return Some(player.character.position());
        }

        let mob = self.mobs.get(&target)?;
        if mob.character.dead || !attacker_is_player {
            return None;
        }
        Some(mob.character.position())
    }

    /// Points `id` at `target` and starts closing in
    pub(super) fn engage(&mut self, id: InstanceId, target: InstanceId) -> Result<(), ActionError> {
        let target_position = match self.hostile_position(id, target) {
            Some(position) => position,
            None if self.players.contains_key(&target) => return Err(ActionError::NotInPvp),
            None => return Err(ActionError::NotFound),
        };

        let current = self.character(id).ok_or(ActionError::NotFound)?;
        if !current.can_move() {
            return Err(ActionError::CannotMove);
        }
        if current.target != Some(target) {
            self.disengage(id);
        }

        if let Some(player) = self.players.get_mut(&id) {
            player.pending = None;
        }
        let Some(character) = self.character_mut(id) else {
            return Err(ActionError::NotFound);
        };
        character.target = Some(target);
        let origin = character.position();
        let in_range = character.in_attack_range(target_position);
        let ready = character.is_ranged() && character.attack_cooldown == 0;
        if in_range {
            character.stop();
        }
        if let Some(victim) = self.character_mut(target) {
            victim.attackers.insert(id);
        }

        let initiate = ServerMessage::Combat { kind: CombatOpcode::Initiate, attacker: id, target, hit: None };
        self.send_around(id, initiate, true);

        if in_range {
            if ready {
                self.perform_attack(id, target);
            }
            return Ok(());
        }

        let path = self.route(origin, target_position, true);
        if path.is_empty() {
            self.disengage(id);
            return Err(ActionError::NoPath);
        }
        if let Some(character) = self.character_mut(id) {
            character.set_path(path);
        }
        Ok(())
    }

    /// Drops the current target, leaving its attacker list
    pub(super) fn disengage(&mut self, id: InstanceId) {
        let Some(target) = self.character_mut(id).and_then(|c| c.clear_target()) else {
            return;
        };
        if let Some(victim) = self.character_mut(target) {
            victim.attackers.remove(&id);
        }
    }

    /// Clears `id` from every target and attacker list. Players that were
    /// attacking it get `Combat Finish`.
    pub(super) fn release_targeters(&mut self, id: InstanceId) {
        let mut released = Vec::new();
        for player in self.players.values_mut() {
            let character = &mut player.character;
            character.attackers.remove(&id);
            if character.target == Some(id) {
                character.target = None;
                character.stop();
                released.push(character.id);
            }
        }
        for mob in self.mobs.values_mut() {
            let character = &mut mob.character;
            character.attackers.remove(&id);
            if character.target == Some(id) {
                character.target = None;
                character.stop();
            }
        }

        released.sort_unstable();
        for attacker in released {
            let finish = ServerMessage::Combat { kind: CombatOpcode::Finish, attacker, target: id, hit: None };
            self.send_to(attacker, finish);
        }
    }

    /// Keeps a player with a target in range and swinging
    pub(super) fn pursue(&mut self, id: InstanceId) {
        let Some(target) = self.players.get(&id).and_then(|p| p.character.target) else {
            return;
        };
        let Some(target_position) = self.hostile_position(id, target) else {
            self.disengage(id);
            let finish = ServerMessage::Combat { kind: CombatOpcode::Finish, attacker: id, target, hit: None };
            self.send_to(id, finish);
            return;
        };

        let Some(character) = self.players.get_mut(&id).map(|p| &mut p.character) else {
            return;
        };
        if character.in_attack_range(target_position) {
            character.stop();
            if character.attack_cooldown == 0 && !character.stunned {
                self.perform_attack(id, target);
            }
            return;
        }

        let heading_there = character
            .path
            .back()
            .is_some_and(|end| crate::grid::distance(*end, target_position) <= character.attack_range);
        if heading_there || !character.can_move() {
            return;
        }
        let origin = character.position();
        let path = self.route(origin, target_position, true);
        if let Some(player) = self.players.get_mut(&id) {
            player.character.set_path(path);
        }
    }

    /// One attack: melee lands now, ranged launches a projectile
    pub(super) fn perform_attack(&mut self, attacker: InstanceId, target: InstanceId) {
        let hit = {
            let (Some(source), Some(victim)) = (
                combatant(&self.players, &self.mobs, attacker),
                combatant(&self.players, &self.mobs, target),
            ) else {
                return;
            };
            if source.character().dead || victim.character().dead {
                return;
            }
            get_hit(source, victim, &mut self.rng)
        };

        let cooldown = self.config.attack_rate_ticks;
        if let Some(character) = self.character_mut(attacker) {
            character.attack_cooldown = cooldown;
        }
        if let Some(victim) = self.character_mut(target) {
            victim.attackers.insert(attacker);
        }

        if hit.is_ranged {
            self.fire_projectile(attacker, target, hit);
        } else {
            self.apply_hit(attacker, target, hit);
        }
    }

    fn fire_projectile(&mut self, source: InstanceId, target: InstanceId, hit: Hit) {
        let Some((x, y)) = self.character(source).map(|c| c.position()) else {
            return;
        };
        let name = match self.mobs.get(&source) {
            Some(mob) => mob.projectile.clone(),
            None => DEFAULT_PROJECTILE.to_string(),
        };

        let id = self.allocate_id();
        let impact_tick = self.tick + u64::from(self.config.projectile_travel_ticks.max(1));
        if let Err(error) = self.place(id, EntityKind::Projectile, x, y) {
            warn!("Failed to launch projectile from {}: {}", source, error);
            return;
        }
        self.projectiles.insert(id, Projectile { id, name, source, target, hit, x, y, impact_tick });
        self.announce(id);
        self.scheduler.schedule(impact_tick, Task::ProjectileImpact(id));
    }

    pub(super) fn projectile_impact(&mut self, id: InstanceId) {
        let Some(projectile) = self.projectiles.remove(&id) else {
            return;
        };
        self.despawn(id, EntityKind::Projectile);
        self.apply_hit(projectile.source, projectile.target, projectile.hit);
    }

    /// Lands a resolved hit, running its side effects
    pub(super) fn apply_hit(&mut self, attacker: InstanceId, target: InstanceId, hit: Hit) {
        let Some(victim) = combatant_mut(&mut self.players, &mut self.mobs, target) else {
            return;
        };
        if victim.character().dead {
            return;
        }
        let terror_due = self.tick + self.config.ms_to_ticks(self.config.terror_duration_ms);
        let outcome = victim.apply_damage(hit.damage);
        let character = victim.character_mut();
        character.attackers.insert(attacker);
        if hit.has_terror {
            character.terrify_until(terror_due);
        }
        let (hit_points, position) = (character.hit_points, character.position());
        if hit.has_terror {
            self.scheduler.schedule(terror_due, Task::ClearTerror(target));
        }

        let combat = ServerMessage::Combat { kind: CombatOpcode::Hit, attacker, target, hit: Some(hit.clone()) };
        self.send_around(target, combat, true);
        if let Some(player) = self.players.get(&target) {
            self.send_to(target, ServerMessage::Points { id: target, hit_points, mana: Some(player.mana) });
        }

        // Mobs turn on whoever hits them first
        if self.players.contains_key(&attacker) {
            if let Some(mob) = self.mobs.get_mut(&target).filter(|m| m.character.target.is_none()) {
                mob.character.target = Some(attacker);
                if let Some(player) = self.players.get_mut(&attacker) {
                    player.character.attackers.insert(target);
                }
            }
        }

        let splash: Vec<InstanceId> = if hit.kind == HitKind::Explosive && !hit.is_aoe {
            self.grid
                .entities_around(position.0, position.1, 1)
                .into_iter()
                .filter(|id| *id != target && *id != attacker && self.hostile_position(attacker, *id).is_some())
                .collect()
        } else {
            Vec::new()
        };

        match outcome {
            DamageOutcome::Died => self.kill(target, Some(attacker)),
            DamageOutcome::Survived { .. } => {
                if hit.kind == HitKind::Stun && !hit.is_aoe {
                    self.stun(target);
                }
            }
        }

        let splash_hit = hit.splash();
        for other in splash {
            self.apply_hit(attacker, other, splash_hit.clone());
        }
    }

    /// Stuns for `stun_duration_ms`, extending a stun already running
    pub(super) fn stun(&mut self, id: InstanceId) {
        let due = self.tick + self.config.ms_to_ticks(self.config.stun_duration_ms);
        let Some(character) = self.character_mut(id) else {
            return;
        };
        character.stun_until(due);

        self.send_around(id, ServerMessage::Movement(MovementUpdate::Stunned { id, state: true }), true);
        self.scheduler.schedule(due, Task::ClearStun(id));
    }

    // -------------------------------------------------------------------------
    // Death
    // -------------------------------------------------------------------------

    pub(super) fn kill(&mut self, id: InstanceId, killer: Option<InstanceId>) {
        if self.mobs.contains_key(&id) {
            self.kill_mob(id, killer);
        } else if self.players.contains_key(&id) {
            self.kill_player(id, killer);
        }
    }

    /// Kills a live mob or player outright
    pub fn kill_entity(&mut self, id: InstanceId) -> bool {
        let alive = self.character(id).is_some_and(|c| !c.dead);
        if alive {
            self.kill(id, None);
        }
        alive
    }

    fn kill_mob(&mut self, id: InstanceId, killer: Option<InstanceId>) {
        let Some(mob) = self.mobs.get_mut(&id) else {
            return;
        };
        mob.character.dead = true;
        mob.character.hit_points = 0;
        mob.character.stop();
        let position = mob.character.position();
        let experience = mob.experience;
        let respawn = mob.should_respawn().then(|| (mob.key.clone(), mob.spawn, mob.respawn_delay));
        let drop = mob.roll_drop(&mut self.rng);

        self.disengage(id);
        if let Some(mob) = self.mobs.get_mut(&id) {
            mob.character.attackers.clear();
        }
        self.unplace(id, EntityKind::Mob);
        if let Some(group) = self.groups.remove(id) {
            self.announce_despawn(id, group);
        }
        self.release_targeters(id);
        self.chest_area_guard_died(id);

        if let Some(killer) = killer.filter(|k| self.players.contains_key(k)) {
            self.grant_experience(killer, experience);
        }
        if let Some((key, count)) = drop {
            self.drop_item(&key, count, Enchantment::None, 0, position.0, position.1);
        }

        let removal = self.tick + self.config.ms_to_ticks(self.config.death_animation_ms);
        self.scheduler.schedule(removal, Task::RemoveMob(id));
        if let Some((key, (x, y), delay)) = respawn {
            let due = self.tick + self.config.ms_to_ticks(delay.max(0) as u64);
            self.scheduler.schedule(due, Task::RespawnMob { key, x, y });
        }
        debug!("Mob {} died at {:?}, killer {:?}", id, position, killer);
    }

    /// Dead but present: registry and region keep the player, the grid
    /// does not, until it asks to respawn.
    fn kill_player(&mut self, id: InstanceId, killer: Option<InstanceId>) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        let character = &mut player.character;
        character.dead = true;
        character.hit_points = 0;
        character.stop();
        character.stunned = false;
        character.frozen = false;
        player.pending = None;

        self.disengage(id);
        if let Some(player) = self.players.get_mut(&id) {
            player.character.attackers.clear();
        }
        self.unplace(id, EntityKind::Player);
        if let Some(group) = self.groups.group_id(id) {
            self.announce_despawn(id, group);
        }
        self.release_targeters(id);
        self.send_to(id, ServerMessage::Death(id));

        if let Some(killer) = killer.filter(|k| *k != id && self.players.contains_key(k)) {
            if let Some(winner) = self.players.get_mut(&killer) {
                winner.pvp_kills += 1;
            }
            if let Some(loser) = self.players.get_mut(&id) {
                loser.pvp_deaths += 1;
            }
        }

        if let Some(player) = self.players.get(&id) {
            info!("{} ({}) died, killer {:?}", player.username, id, killer);
        }
    }

    /// Brings a dead player back at the map spawn, or right next to it when
    /// the spawn cell is taken, with full points. The player stays dead if
    /// there is nowhere to stand.
    pub(super) fn respawn_player(&mut self, id: InstanceId) -> Result<(), ActionError> {
        let spawn = self.content.map.spawn;
        let player = self.players.get(&id).ok_or(ActionError::NotFound)?;
        if !player.character.dead {
            return Ok(());
        }

        let (x, y) = if self.pathing.is_blocked(i32::from(spawn.x), i32::from(spawn.y)) {
            self.free_cell_near((spawn.x, spawn.y)).ok_or(ActionError::SpawnBlocked)?
        } else {
            (spawn.x, spawn.y)
        };
        if let Err(error) = self.place(id, EntityKind::Player, x, y) {
            warn!("Failed to respawn player {}: {}", id, error);
            return Err(ActionError::SpawnBlocked);
        }
        if let Some(player) = self.players.get_mut(&id) {
            player.revive_at(x, y);
            player.known.clear();
        }

        self.send_to(id, ServerMessage::Respawn { id, x, y });
        self.announce(id);
        self.check_pvp(id);
        self.refresh_visibility(id);
        if let Some(player) = self.players.get(&id) {
            let sync = ServerMessage::Sync(player.sync_info());
            info!("{} ({}) respawned", player.username, id);
            self.send_around(id, sync, true);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Rewards and regeneration
    // -------------------------------------------------------------------------

    pub fn grant_experience(&mut self, id: InstanceId, amount: u64) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        let gain = player.add_experience(amount);
        let info = ExperienceInfo {
            id,
            amount,
            experience: player.experience,
            level: player.character.level,
        };
        let sync = player.sync_info();
        if gain.levelled_up() {
            info!("{} reached level {}", player.username, gain.level);
        }

        self.send_around(id, ServerMessage::Experience(info), true);
        self.send_around(id, ServerMessage::Sync(sync), true);
        if gain.levelled_up() {
            self.send_to(id, ServerMessage::notify(format!("Congratulations! You are now level {}.", gain.level)));
        }
    }

    /// Heals every living player that is out of combat
    pub(super) fn regenerate(&mut self) {
        let rate = self.config.heal_rate;
        let mut ids: Vec<InstanceId> =
            self.players.iter().filter(|(_, p)| p.needs_regeneration()).map(|(id, _)| *id).collect();
        ids.sort_unstable();

        for id in ids {
            let Some(player) = self.players.get_mut(&id) else {
                continue;
            };
            let healed = player.character.heal(rate);
            let restored = player.restore_mana(rate);
            let points = ServerMessage::Points { id, hit_points: player.character.hit_points, mana: Some(player.mana) };

            if healed > 0 {
                let heal = HealInfo { id, kind: HitKind::Heal, amount: healed };
                self.send_around(id, ServerMessage::Heal(heal), true);
            }
            if restored > 0 {
                self.send_to(id, ServerMessage::Heal(HealInfo { id, kind: HitKind::Mana, amount: restored }));
            }
            self.send_to(id, points);
        }
    }
}
