//! Shared entity definitions and the structured payloads carried by packets.

use serde::{Deserialize, Serialize};

use crate::{EquipmentData, HitKind};

/// Server-assigned id of a live entity
pub type InstanceId = u64;

/// Entity kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Player,
    Mob,
    Npc,
    Item,
    Chest,
    Projectile,
}

impl EntityKind {
    pub fn is_character(&self) -> bool {
        matches!(self, Self::Player | Self::Mob)
    }
}

/// Everything a client needs to draw an entity, sent with `Spawn`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityState {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub instance: InstanceId,
    /// Template key (`"rat"`, `"sword1"`) or username for players
    pub string: String,
    pub name: String,
    pub x: u16,
    pub y: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_points: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hit_points: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvp: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rights: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment: Option<Vec<EquipmentData>>,
    /// Projectiles only: who fired at whom
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<InstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<InstanceId>,
}

impl EntityState {
    pub fn new(kind: EntityKind, instance: InstanceId, string: &str, name: &str, x: u16, y: u16) -> Self {
        Self {
            kind,
            instance,
            string: string.to_string(),
            name: name.to_string(),
            x,
            y,
            hit_points: None,
            max_hit_points: None,
            level: None,
            count: None,
            pvp: None,
            rights: None,
            equipment: None,
            source: None,
            target: None,
        }
    }
}

/// Sent once after a successful login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeInfo {
    pub instance: InstanceId,
    pub username: String,
    pub x: u16,
    pub y: u16,
    pub rights: u8,
    pub hit_points: u32,
    pub mana: u32,
    pub experience: u64,
    pub level: u32,
    pub pvp_kills: u32,
    pub pvp_deaths: u32,
}

/// Full point/level refresh for a player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncInfo {
    pub id: InstanceId,
    pub hit_points: u32,
    pub max_hit_points: u32,
    pub mana: u32,
    pub max_mana: u32,
    pub experience: u64,
    pub level: u32,
    pub armour: String,
    pub weapon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatInfo {
    pub name: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colour: Option<String>,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub with_bubble: bool,
    /// Bubble lifetime in milliseconds
    #[serde(default)]
    pub duration: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperienceInfo {
    pub id: InstanceId,
    pub amount: u64,
    pub experience: u64,
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealInfo {
    pub id: InstanceId,
    /// `heal` or `mana`
    #[serde(rename = "type")]
    pub kind: HitKind,
    pub amount: u32,
}

/// Quest progress as listed in the login batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestInfo {
    pub id: u32,
    pub name: String,
    pub stage: u32,
    pub stages: u32,
    pub finished: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_state_omits_absent_fields() {
        let mut state = EntityState::new(EntityKind::Mob, 42, "rat", "Rat", 3, 4);
        state.hit_points = Some(20);

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["type"], "mob");
        assert_eq!(value["hitPoints"], 20);
        assert!(value.get("equipment").is_none());
        assert!(value.get("pvp").is_none());

        let back: EntityState = serde_json::from_value(value).unwrap();
        assert_eq!(back, state);
    }
}
