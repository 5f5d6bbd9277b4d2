//! State shared by everything that fights: players and mobs.

use std::collections::{BTreeSet, VecDeque};

use realm_shared::{Enchantment, InstanceId};

use crate::formulas::CombatStats;
use crate::grid::distance;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementState {
    Idle,
    Moving,
}

/// Result of taking damage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    Survived { remaining: u32 },
    Died,
}

/// Character core embedded in [`Player`](super::Player) and [`Mob`](super::Mob)
#[derive(Debug, Clone)]
pub struct Character {
    pub id: InstanceId,
    pub x: u16,
    pub y: u16,
    pub hit_points: u32,
    pub max_hit_points: u32,
    pub level: u32,
    /// Resolved through the world registry; may point at something gone
    pub target: Option<InstanceId>,
    /// Ids currently attacking this character
    pub attackers: BTreeSet<InstanceId>,
    pub movement: MovementState,
    pub stunned: bool,
    pub frozen: bool,
    pub terror: bool,
    /// Ticks at which each status wears off. Only meaningful while the flag is set.
    pub stunned_until: u64,
    pub frozen_until: u64,
    pub terror_until: u64,
    /// Remaining cells, consumed front to back
    pub path: VecDeque<(u16, u16)>,
    pub attack_range: u16,
    pub pvp: bool,
    /// Ticks until the next attack is allowed
    pub attack_cooldown: u32,
    pub last_move_tick: u64,
    pub dead: bool,
}

impl Character {
    pub fn new(id: InstanceId, x: u16, y: u16, hit_points: u32, level: u32) -> Self {
        Self {
            id,
            x,
            y,
            hit_points,
            max_hit_points: hit_points,
            level,
            target: None,
            attackers: BTreeSet::new(),
            movement: MovementState::Idle,
            stunned: false,
            frozen: false,
            terror: false,
            stunned_until: 0,
            frozen_until: 0,
            terror_until: 0,
            path: VecDeque::new(),
            attack_range: 1,
            pvp: false,
            attack_cooldown: 0,
            last_move_tick: 0,
            dead: false,
        }
    }

    pub fn position(&self) -> (u16, u16) {
        (self.x, self.y)
    }

    pub fn distance_to(&self, position: (u16, u16)) -> u16 {
        distance(self.position(), position)
    }

    pub fn is_adjacent(&self, position: (u16, u16)) -> bool {
        self.distance_to(position) == 1
    }

    pub fn in_attack_range(&self, position: (u16, u16)) -> bool {
        let gap = self.distance_to(position);
        gap >= 1 && gap <= self.attack_range
    }

    pub fn is_ranged(&self) -> bool {
        self.attack_range > 1
    }

    pub fn can_move(&self) -> bool {
        !self.dead && !self.stunned && !self.frozen
    }

    pub fn is_moving(&self) -> bool {
        self.movement == MovementState::Moving
    }

    /// Replaces the path. A leading cell equal to the current position is dropped.
    pub fn set_path(&mut self, path: Vec<(u16, u16)>) {
        self.path = path.into_iter().collect();
        if self.path.front() == Some(&self.position()) {
            self.path.pop_front();
        }
        self.movement = if self.path.is_empty() {
            MovementState::Idle
        } else {
            MovementState::Moving
        };
    }

    pub fn next_step(&self) -> Option<(u16, u16)> {
        self.path.front().copied()
    }

    /// Commits the front step as the new position
    pub fn advance(&mut self, tick: u64) -> Option<(u16, u16)> {
        let (x, y) = self.path.pop_front()?;
        self.x = x;
        self.y = y;
        self.last_move_tick = tick;
        if self.path.is_empty() {
            self.movement = MovementState::Idle;
        }
        Some((x, y))
    }

    pub fn stop(&mut self) {
        self.path.clear();
        self.movement = MovementState::Idle;
    }

    /// Stuns until `until`. A longer stun already running is kept.
    pub fn stun_until(&mut self, until: u64) {
        self.stunned_until = if self.stunned { self.stunned_until.max(until) } else { until };
        self.stunned = true;
        self.stop();
    }

    pub fn freeze_until(&mut self, until: u64) {
        self.frozen_until = if self.frozen { self.frozen_until.max(until) } else { until };
        self.frozen = true;
        self.stop();
    }

    pub fn terrify_until(&mut self, until: u64) {
        self.terror_until = if self.terror { self.terror_until.max(until) } else { until };
        self.terror = true;
    }

    /// Lifts the stun once its latest expiry has passed
    pub fn expire_stun(&mut self, tick: u64) -> bool {
        let expired = self.stunned && tick >= self.stunned_until;
        if expired {
            self.stunned = false;
        }
        expired
    }

    pub fn expire_freeze(&mut self, tick: u64) -> bool {
        let expired = self.frozen && tick >= self.frozen_until;
        if expired {
            self.frozen = false;
        }
        expired
    }

    pub fn expire_terror(&mut self, tick: u64) -> bool {
        let expired = self.terror && tick >= self.terror_until;
        if expired {
            self.terror = false;
        }
        expired
    }

    pub fn clear_target(&mut self) -> Option<InstanceId> {
        self.target.take()
    }

    pub fn is_full_health(&self) -> bool {
        self.hit_points >= self.max_hit_points
    }

    /// Heals up to max, returning how much was actually restored
    pub fn heal(&mut self, amount: u32) -> u32 {
        let before = self.hit_points;
        self.hit_points = self.hit_points.saturating_add(amount).min(self.max_hit_points);
        self.hit_points - before
    }

    /// Sets a new maximum, clamping the current value to it
    pub fn set_max_hit_points(&mut self, max: u32) {
        self.max_hit_points = max;
        self.hit_points = self.hit_points.min(max);
    }
}

/// Capabilities the combat engine needs from a fighter
pub trait Combatant {
    fn character(&self) -> &Character;

    fn character_mut(&mut self) -> &mut Character;

    fn combat_stats(&self) -> CombatStats;

    /// Enchantment and ability level that may replace a normal hit
    fn special_ability(&self) -> Option<(Enchantment, u32)>;

    fn apply_damage(&mut self, damage: u32) -> DamageOutcome {
        let character = self.character_mut();
        character.hit_points = character.hit_points.saturating_sub(damage);
        if character.hit_points == 0 {
            character.dead = true;
            DamageOutcome::Died
        } else {
            DamageOutcome::Survived { remaining: character.hit_points }
        }
    }
}
