//! Server-side player entity.

use std::collections::{BTreeMap, HashSet};

use realm_shared::{
    ContainerType, Enchantment, EntityKind, EntityState, EquipmentSlot, InstanceId, SyncInfo, WelcomeInfo,
};

use crate::content::Content;
use crate::formulas::{self, CombatStats};
use crate::persistence::{AccountRecord, PlayerRecord};

use super::{Character, Combatant, Container, Equipment, QuestLog};

/// What a player walks up to before acting on it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    Pickup(InstanceId),
    Talk(InstanceId),
    Open(InstanceId),
}

impl Interaction {
    pub fn target(&self) -> InstanceId {
        match self {
            Self::Pickup(id) | Self::Talk(id) | Self::Open(id) => *id,
        }
    }
}

/// Level before and after an experience gain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExperienceGain {
    pub previous_level: u32,
    pub level: u32,
}

impl ExperienceGain {
    pub fn levelled_up(&self) -> bool {
        self.level > self.previous_level
    }
}

/// Server-side player state
#[derive(Debug, Clone)]
pub struct Player {
    pub character: Character,
    pub account_id: i64,
    pub username: String,
    pub email: Option<String>,
    pub rights: u8,
    /// Unix milliseconds
    pub ban: i64,
    /// Unix milliseconds
    pub mute: i64,
    pub mana: u32,
    pub max_mana: u32,
    pub experience: u64,
    pub inventory: Container,
    pub bank: Container,
    pub equipment: Equipment,
    pub quests: QuestLog,
    pub achievements: BTreeMap<u32, u32>,
    pub guild: Option<String>,
    /// Position at the last group recompute
    pub group_anchor: (u16, u16),
    /// Entity ids the client has been told about
    pub known: HashSet<InstanceId>,
    pub pending: Option<Interaction>,
    pub last_npc: Option<InstanceId>,
    pub guest: bool,
    pub pvp_kills: u32,
    pub pvp_deaths: u32,
}

impl Player {
    /// Builds a player from its saved record. Positions that are no longer
    /// walkable on the current map fall back to the spawn point.
    pub fn from_record(id: InstanceId, record: &PlayerRecord, content: &Content, guest: bool) -> Self {
        let account = &record.account;
        let map = &content.map;
        let (x, y) = if map.is_walkable(account.x, account.y) {
            (account.x, account.y)
        } else {
            (map.spawn.x, map.spawn.y)
        };

        let level = formulas::exp_to_level(account.experience);
        let max_hit_points = formulas::max_hit_points(level);
        let max_mana = formulas::max_mana(level);

        let mut character = Character::new(id, x, y, max_hit_points, level);
        if account.hit_points > 0 {
            character.hit_points = account.hit_points.min(max_hit_points);
        }
        character.pvp = map.is_pvp(x, y);

        let mana = match account.mana {
            0 => max_mana,
            mana => mana.min(max_mana),
        };

        Self {
            character,
            account_id: account.id,
            username: account.username.clone(),
            email: account.email.clone(),
            rights: account.rights,
            ban: account.ban,
            mute: account.mute,
            mana,
            max_mana,
            experience: account.experience,
            inventory: Container::load(ContainerType::Inventory, &record.inventory, content),
            bank: Container::load(ContainerType::Bank, &record.bank, content),
            equipment: Equipment::load(&account.equipment, content),
            quests: QuestLog::load(&record.quests),
            achievements: record.achievements.clone(),
            guild: account.guild.clone(),
            group_anchor: (x, y),
            known: HashSet::new(),
            pending: None,
            last_npc: None,
            guest,
            pvp_kills: account.pvp_kills,
            pvp_deaths: account.pvp_deaths,
        }
    }

    pub fn to_record(&self) -> PlayerRecord {
        let character = &self.character;
        PlayerRecord {
            account: AccountRecord {
                id: self.account_id,
                username: self.username.clone(),
                email: self.email.clone(),
                rights: self.rights,
                x: character.x,
                y: character.y,
                experience: self.experience,
                hit_points: character.hit_points,
                mana: self.mana,
                ban: self.ban,
                mute: self.mute,
                pvp_kills: self.pvp_kills,
                pvp_deaths: self.pvp_deaths,
                guild: self.guild.clone(),
                equipment: self.equipment.records(),
            },
            inventory: self.inventory.records(),
            bank: self.bank.records(),
            quests: self.quests.records(),
            achievements: self.achievements.clone(),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.character.id
    }

    pub fn is_admin(&self) -> bool {
        self.rights >= 1
    }

    pub fn is_banned(&self, now_ms: i64) -> bool {
        self.ban > now_ms
    }

    pub fn is_muted(&self, now_ms: i64) -> bool {
        self.mute > now_ms
    }

    /// Range granted by the equipped weapon
    pub fn update_attack_range(&mut self, ranged_attack_range: u16) {
        self.character.attack_range = if self.equipment.is_ranged() { ranged_attack_range } else { 1 };
    }

    /// Level requirement check for an item
    pub fn can_equip(&self, level_requirement: u32) -> bool {
        self.character.level >= level_requirement
    }

    /// Adds experience and raises the point maxima on level change
    pub fn add_experience(&mut self, amount: u64) -> ExperienceGain {
        let previous_level = self.character.level;
        self.experience = self.experience.saturating_add(amount);
        let level = formulas::exp_to_level(self.experience).max(previous_level);

        if level != previous_level {
            self.character.level = level;
            self.character.set_max_hit_points(formulas::max_hit_points(level));
            self.max_mana = formulas::max_mana(level);
            self.mana = self.mana.min(self.max_mana);
        }

        ExperienceGain { previous_level, level }
    }

    /// Restores mana up to max, returning the amount gained
    pub fn restore_mana(&mut self, amount: u32) -> u32 {
        let before = self.mana;
        self.mana = self.mana.saturating_add(amount).min(self.max_mana);
        self.mana - before
    }

    pub fn needs_regeneration(&self) -> bool {
        let character = &self.character;
        !character.dead && character.attackers.is_empty() && (!character.is_full_health() || self.mana < self.max_mana)
    }

    /// Alive again at `(x, y)` with full points
    pub fn revive_at(&mut self, x: u16, y: u16) {
        let character = &mut self.character;
        character.x = x;
        character.y = y;
        character.dead = false;
        character.stunned = false;
        character.frozen = false;
        character.terror = false;
        character.target = None;
        character.attackers.clear();
        character.stop();
        character.hit_points = character.max_hit_points;
        self.mana = self.max_mana;
        self.pending = None;
        self.group_anchor = (x, y);
    }

    pub fn welcome_info(&self) -> WelcomeInfo {
        let character = &self.character;
        WelcomeInfo {
            instance: character.id,
            username: self.username.clone(),
            x: character.x,
            y: character.y,
            rights: self.rights,
            hit_points: character.hit_points,
            mana: self.mana,
            experience: self.experience,
            level: character.level,
            pvp_kills: self.pvp_kills,
            pvp_deaths: self.pvp_deaths,
        }
    }

    pub fn sync_info(&self) -> SyncInfo {
        let character = &self.character;
        SyncInfo {
            id: character.id,
            hit_points: character.hit_points,
            max_hit_points: character.max_hit_points,
            mana: self.mana,
            max_mana: self.max_mana,
            experience: self.experience,
            level: character.level,
            armour: self.equipment.key_of(EquipmentSlot::Armour),
            weapon: self.equipment.key_of(EquipmentSlot::Weapon),
        }
    }

    pub fn entity_state(&self) -> EntityState {
        let character = &self.character;
        let mut state = EntityState::new(
            EntityKind::Player,
            character.id,
            &self.username,
            &self.username,
            character.x,
            character.y,
        );
        state.hit_points = Some(character.hit_points);
        state.max_hit_points = Some(character.max_hit_points);
        state.level = Some(character.level);
        state.pvp = Some(character.pvp);
        state.rights = Some(self.rights);
        state.equipment = Some(self.equipment.batch());
        state
    }
}

impl Combatant for Player {
    fn character(&self) -> &Character {
        &self.character
    }

    fn character_mut(&mut self) -> &mut Character {
        &mut self.character
    }

    fn combat_stats(&self) -> CombatStats {
        CombatStats {
            level: self.character.level,
            weapon_level: self.equipment.weapon_level(),
            armour_level: self.equipment.armour_level(),
        }
    }

    fn special_ability(&self) -> Option<(Enchantment, u32)> {
        self.equipment.weapon_ability()
    }
}
