//! Click handling, path following and region bookkeeping for moving
//! characters.

use log::{trace, warn};

use realm_shared::{EntityKind, InstanceId, MovementUpdate, ServerMessage};

use crate::entities::Interaction;
use crate::grid::distance;

use super::{ActionError, Target, World};

/// What one movement step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Not moving
    Idle,
    /// Moving, but the cadence or a status effect holds it back this tick
    Waiting,
    Moved,
    /// Took the last step of the path
    Arrived,
    /// The next cell became blocked; the path was dropped
    Blocked,
}

/// What sits on a clicked cell, by priority
enum Clicked {
    Target(InstanceId),
    Interact(Interaction),
    Item(InstanceId),
}

impl World {
    fn clicked_entity(&self, player: InstanceId, x: u16, y: u16) -> Option<Clicked> {
        let others: Vec<InstanceId> = self.grid.entities_at(x, y).into_iter().filter(|id| *id != player).collect();

        if let Some(target) = others.iter().copied().find(|id| self.hostile_position(player, *id).is_some()) {
            return Some(Clicked::Target(target));
        }
        for id in others.iter().copied() {
            if self.npcs.contains_key(&id) {
                return Some(Clicked::Interact(Interaction::Talk(id)));
            }
            if self.chests.contains_key(&id) {
                return Some(Clicked::Interact(Interaction::Open(id)));
            }
        }
        others.into_iter().find(|id| self.items.contains_key(id)).map(Clicked::Item)
    }

    /// Path from `from` to `to`. With `adjacent` the target cell may be
    /// occupied and the walk stops one cell short of it. An empty result
    /// means unreachable.
    pub(super) fn route(&mut self, from: (u16, u16), to: (u16, u16), adjacent: bool) -> Vec<(u16, u16)> {
        let ignore: Vec<(u16, u16)> = if adjacent { vec![from, to] } else { vec![from] };
        let mut path = self.pathfinder.find(&self.pathing, from, to, &ignore);
        if adjacent && !path.is_empty() {
            path.pop();
        }
        path
    }

    /// A click on a tile: attack, pick up, talk, open, or walk there
    pub(super) fn click(&mut self, id: InstanceId, x: u16, y: u16) -> Result<(), ActionError> {
        let player = self.players.get(&id).ok_or(ActionError::NotFound)?;
        if !player.character.can_move() {
            return Err(ActionError::CannotMove);
        }
        if !self.content.map.in_bounds(x, y) {
            return Err(ActionError::OutOfBounds);
        }
        let origin = player.character.position();

        match self.clicked_entity(id, x, y) {
            Some(Clicked::Target(target)) => return self.engage(id, target),
            Some(Clicked::Item(item)) => {
                self.disengage(id);
                if origin == (x, y) {
                    return self.pick_up(id, item);
                }
                return self.walk(id, origin, (x, y), false, Some(Interaction::Pickup(item)));
            }
            Some(Clicked::Interact(interaction)) => {
                self.disengage(id);
                if distance(origin, (x, y)) <= 1 {
                    if let Some(player) = self.players.get_mut(&id) {
                        player.character.stop();
                        player.pending = None;
                    }
                    return self.interact(id, interaction);
                }
                return self.walk(id, origin, (x, y), true, Some(interaction));
            }
            None => {}
        }

        if self.pathing.is_collidable(i32::from(x), i32::from(y)) {
            return Err(ActionError::Collidable);
        }
        self.disengage(id);
        self.walk(id, origin, (x, y), false, None)
    }

    fn walk(
        &mut self,
        id: InstanceId,
        origin: (u16, u16),
        to: (u16, u16),
        adjacent: bool,
        pending: Option<Interaction>,
    ) -> Result<(), ActionError> {
        if origin == to {
            return Ok(());
        }
        let path = self.route(origin, to, adjacent);
        if path.is_empty() {
            return Err(ActionError::NoPath);
        }

        let player = self.players.get_mut(&id).ok_or(ActionError::NotFound)?;
        player.character.set_path(path);
        player.pending = pending;
        if !player.character.is_moving() {
            // Already standing where the walk would end
            if let Some(interaction) = player.pending.take() {
                return self.interact(id, interaction);
            }
        }
        Ok(())
    }

    /// Advances one step along the current path if the cadence allows
    pub(super) fn step(&mut self, id: InstanceId) -> StepOutcome {
        let tick = self.tick;
        let (kind, interval) = if self.players.contains_key(&id) {
            (EntityKind::Player, self.config.movement_interval_ticks)
        } else if self.mobs.contains_key(&id) {
            (EntityKind::Mob, self.config.mob_movement_interval_ticks)
        } else {
            return StepOutcome::Idle;
        };

        let Some(character) = self.character(id) else {
            return StepOutcome::Idle;
        };
        if !character.is_moving() {
            return StepOutcome::Idle;
        }
        if !character.can_move() || tick.saturating_sub(character.last_move_tick) < u64::from(interval) {
            return StepOutcome::Waiting;
        }
        let from = character.position();
        let Some(next) = character.next_step() else {
            return StepOutcome::Idle;
        };

        let blocked =
            distance(from, next) != 1 || self.pathing.is_blocked(i32::from(next.0), i32::from(next.1));
        if blocked {
            trace!("Entity {} blocked at {:?} heading to {:?}", id, from, next);
            if let Some(character) = self.character_mut(id) {
                character.stop();
            }
            return StepOutcome::Blocked;
        }
        if let Err(error) = self.relocate(id, kind, from, next) {
            warn!("Failed to move entity {}: {}", id, error);
            if let Some(character) = self.character_mut(id) {
                character.stop();
            }
            return StepOutcome::Blocked;
        }

        let Some(character) = self.character_mut(id) else {
            return StepOutcome::Idle;
        };
        character.advance(tick);
        let arrived = !character.is_moving();

        if let Some(group) = self.groups.group_id(id) {
            let exclude = (kind == EntityKind::Player).then_some(id);
            let update = MovementUpdate::Move { id, x: next.0, y: next.1, forced: false, with_animation: false };
            self.push(Target::AdjacentGroups { group, exclude }, ServerMessage::Movement(update));
        }
        self.update_group(id, next, false);
        if kind == EntityKind::Player {
            self.check_pvp(id);
        }

        if arrived {
            StepOutcome::Arrived
        } else {
            StepOutcome::Moved
        }
    }

    /// Player movement and auto-attacks for this tick
    pub(super) fn update_players(&mut self) {
        let mut ids: Vec<InstanceId> = self.players.keys().copied().collect();
        ids.sort_unstable();

        for id in ids {
            let Some(player) = self.players.get_mut(&id) else {
                continue;
            };
            if player.character.dead {
                continue;
            }
            player.character.attack_cooldown = player.character.attack_cooldown.saturating_sub(1);

            self.pursue(id);
            if self.step(id) == StepOutcome::Arrived {
                self.arrive(id);
            }
        }
    }

    /// Runs the interaction a player walked up to
    fn arrive(&mut self, id: InstanceId) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        let Some(interaction) = player.pending.take() else {
            return;
        };
        let here = player.character.position();

        let reached = match interaction {
            Interaction::Pickup(item) => self.items.get(&item).map(|i| i.position()) == Some(here),
            Interaction::Talk(_) | Interaction::Open(_) => self
                .position_of(interaction.target())
                .is_some_and(|position| distance(here, position) <= 1),
        };
        if !reached {
            return;
        }
        if let Err(error) = self.interact(id, interaction) {
            self.report(id, error);
        }
    }

    /// Toggles the PvP flag when a player crosses a PvP area boundary
    pub(super) fn check_pvp(&mut self, id: InstanceId) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        let (x, y) = player.character.position();
        let pvp = self.content.map.is_pvp(x, y);
        if player.character.pvp == pvp {
            return;
        }
        player.character.pvp = pvp;

        let notice = if pvp {
            "You have entered a PvP zone!"
        } else {
            "You are no longer in a PvP zone!"
        };
        self.send_to(id, ServerMessage::notify(notice));
        if let Some(group) = self.groups.group_id(id) {
            self.push(Target::Group(group), ServerMessage::Pvp { id, pvp });
        }

        let target = self.players.get(&id).and_then(|p| p.character.target);
        if !pvp && target.is_some_and(|t| self.players.contains_key(&t)) {
            self.disengage(id);
        }
    }
}
