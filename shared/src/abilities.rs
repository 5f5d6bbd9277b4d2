//! Enchantment abilities and the hit payload carried by combat packets.

use serde::{Deserialize, Serialize};

// =============================================================================
// Enchantments
// =============================================================================

/// Special ability an equipped item can carry.
///
/// Only weapons roll their ability when attacking; the other slots keep the
/// value so it survives save/load and shows up in equipment data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enchantment {
    #[default]
    None,
    Critical,
    Stun,
    Explosive,
}

impl Enchantment {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Critical),
            2 => Some(Self::Stun),
            3 => Some(Self::Explosive),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Critical => 1,
            Self::Stun => 2,
            Self::Explosive => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Critical => "critical",
            Self::Stun => "stun",
            Self::Explosive => "explosive",
        }
    }

    /// Whether this enchantment can replace a normal hit.
    pub fn is_special(&self) -> bool {
        !matches!(self, Self::None)
    }
}

// =============================================================================
// Hits
// =============================================================================

/// What kind of number the client should float above the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitKind {
    Damage,
    Critical,
    Stun,
    Explosive,
    Heal,
    Mana,
    Experience,
    LevelUp,
}

impl HitKind {
    /// Hit kind produced when an enchantment procs
    pub fn for_enchantment(enchantment: Enchantment) -> Self {
        match enchantment {
            Enchantment::None => Self::Damage,
            Enchantment::Critical => Self::Critical,
            Enchantment::Stun => Self::Stun,
            Enchantment::Explosive => Self::Explosive,
        }
    }
}

/// A single resolved hit. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hit {
    #[serde(rename = "type")]
    pub kind: HitKind,
    pub damage: u32,
    #[serde(default)]
    pub is_ranged: bool,
    #[serde(default, rename = "isAoE")]
    pub is_aoe: bool,
    #[serde(default)]
    pub has_terror: bool,
}

impl Hit {
    pub fn new(kind: HitKind, damage: u32) -> Self {
        Self {
            kind,
            damage,
            is_ranged: false,
            is_aoe: false,
            has_terror: false,
        }
    }

    pub fn ranged(mut self, is_ranged: bool) -> Self {
        self.is_ranged = is_ranged;
        self
    }

    /// Splash copy of this hit for entities standing next to the target
    pub fn splash(&self) -> Self {
        Self {
            kind: self.kind,
            damage: self.damage,
            is_ranged: self.is_ranged,
            is_aoe: true,
            has_terror: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enchantment_round_trips_through_u8() {
        for value in 0..4u8 {
            let enchantment = Enchantment::from_u8(value).unwrap();
            assert_eq!(enchantment.as_u8(), value);
        }
        assert!(Enchantment::from_u8(9).is_none());
        assert!(!Enchantment::None.is_special());
        assert!(Enchantment::Explosive.is_special());
    }

    #[test]
    fn test_hit_serializes_with_client_field_names() {
        let hit = Hit::new(HitKind::Critical, 12).splash();
        let value = serde_json::to_value(&hit).unwrap();

        assert_eq!(value["type"], "critical");
        assert_eq!(value["damage"], 12);
        assert_eq!(value["isAoE"], true);
        assert_eq!(value["hasTerror"], true);
    }
}
