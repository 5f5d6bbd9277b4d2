//! Item definitions shared between client and server.

use serde::{Deserialize, Serialize};

use crate::Enchantment;

/// Item definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDef {
    pub id: u32,
    /// String identifier used on the wire and in content tables ("sword1")
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: ItemKind,
    #[serde(default)]
    pub level_requirement: u32,
    #[serde(default = "default_max_stack")]
    pub max_stack: u32,
    #[serde(default)]
    pub weapon_level: u32,
    #[serde(default)]
    pub armour_level: u32,
    #[serde(default)]
    pub ranged: bool,
    /// Hit points restored when eaten
    #[serde(default)]
    pub heal: u32,
    /// Mana restored when eaten
    #[serde(default)]
    pub mana: u32,
}

fn default_max_stack() -> u32 {
    1
}

impl ItemDef {
    pub fn is_equippable(&self) -> bool {
        self.kind.equipment_slot().is_some()
    }

    pub fn is_stackable(&self) -> bool {
        self.max_stack > 1
    }

    pub fn is_edible(&self) -> bool {
        self.kind == ItemKind::Consumable
    }
}

/// Item types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Weapon,
    Armour,
    Pendant,
    Ring,
    Boots,
    Consumable,
    Material,
    Currency,
}

impl ItemKind {
    /// Equipment slot this kind of item goes into, if any
    pub fn equipment_slot(&self) -> Option<EquipmentSlot> {
        match self {
            Self::Armour => Some(EquipmentSlot::Armour),
            Self::Weapon => Some(EquipmentSlot::Weapon),
            Self::Pendant => Some(EquipmentSlot::Pendant),
            Self::Ring => Some(EquipmentSlot::Ring),
            Self::Boots => Some(EquipmentSlot::Boots),
            _ => None,
        }
    }
}

/// Equipment slots, in the order the client expects them in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EquipmentSlot {
    Armour = 0,
    Weapon = 1,
    Pendant = 2,
    Ring = 3,
    Boots = 4,
}

impl EquipmentSlot {
    pub const ALL: [EquipmentSlot; 5] = [
        Self::Armour,
        Self::Weapon,
        Self::Pendant,
        Self::Ring,
        Self::Boots,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Armour),
            1 => Some(Self::Weapon),
            2 => Some(Self::Pendant),
            3 => Some(Self::Ring),
            4 => Some(Self::Boots),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Armour => "armour",
            Self::Weapon => "weapon",
            Self::Pendant => "pendant",
            Self::Ring => "ring",
            Self::Boots => "boots",
        }
    }
}

/// One equipped item as sent to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentData {
    #[serde(rename = "type")]
    pub slot: EquipmentSlot,
    pub name: String,
    pub key: String,
    pub count: u32,
    pub ability: Enchantment,
    pub ability_level: u32,
}

/// One occupied inventory or bank slot as sent to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSlot {
    pub index: u32,
    pub key: String,
    pub count: u32,
    #[serde(default)]
    pub ability: Enchantment,
    #[serde(default)]
    pub ability_level: u32,
}

/// Key of the currency item dropped by mobs
pub const GOLD_KEY: &str = "gold";

/// Built-in item definitions, used when no content directory is provided
pub fn get_item_definitions() -> Vec<ItemDef> {
    fn item(id: u32, key: &str, name: &str, kind: ItemKind) -> ItemDef {
        ItemDef {
            id,
            key: key.into(),
            name: name.into(),
            description: String::new(),
            kind,
            level_requirement: 0,
            max_stack: 1,
            weapon_level: 0,
            armour_level: 0,
            ranged: false,
            heal: 0,
            mana: 0,
        }
    }

    vec![
        ItemDef { max_stack: 1_000_000, description: "Shiny.".into(), ..item(1, GOLD_KEY, "Gold", ItemKind::Currency) },
        ItemDef { heal: 15, max_stack: 20, description: "Restores 15 hit points.".into(), ..item(2, "burger", "Burger", ItemKind::Consumable) },
        ItemDef { heal: 40, max_stack: 20, description: "Restores 40 hit points.".into(), ..item(3, "flask", "Flask", ItemKind::Consumable) },
        ItemDef { mana: 30, max_stack: 20, description: "Restores 30 mana.".into(), ..item(4, "manaflask", "Mana Flask", ItemKind::Consumable) },
        ItemDef { weapon_level: 1, ..item(10, "sword1", "Wooden Sword", ItemKind::Weapon) },
        ItemDef { weapon_level: 3, level_requirement: 5, ..item(11, "sword2", "Steel Sword", ItemKind::Weapon) },
        ItemDef { weapon_level: 6, level_requirement: 15, ..item(12, "axe", "Battle Axe", ItemKind::Weapon) },
        ItemDef { weapon_level: 2, ranged: true, level_requirement: 3, ..item(13, "bow1", "Wooden Bow", ItemKind::Weapon) },
        ItemDef { armour_level: 1, ..item(20, "clotharmor", "Cloth Armour", ItemKind::Armour) },
        ItemDef { armour_level: 2, level_requirement: 5, ..item(21, "leatherarmor", "Leather Armour", ItemKind::Armour) },
        ItemDef { armour_level: 4, level_requirement: 15, ..item(22, "mailarmor", "Mail Armour", ItemKind::Armour) },
        ItemDef { armour_level: 1, ..item(30, "pendant1", "Copper Pendant", ItemKind::Pendant) },
        ItemDef { armour_level: 1, ..item(31, "ring1", "Copper Ring", ItemKind::Ring) },
        ItemDef { armour_level: 1, ..item(32, "boots1", "Leather Boots", ItemKind::Boots) },
        ItemDef { max_stack: 99, description: "A slimy trophy.".into(), ..item(40, "slime", "Slime Ball", ItemKind::Material) },
        ItemDef { max_stack: 99, description: "Handed out by the guard.".into(), ..item(41, "letter", "Sealed Letter", ItemKind::Material) },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_items_have_unique_ids_and_keys() {
        let items = get_item_definitions();
        let mut ids: Vec<u32> = items.iter().map(|i| i.id).collect();
        let mut keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
        ids.sort();
        ids.dedup();
        keys.sort();
        keys.dedup();

        assert_eq!(ids.len(), items.len());
        assert_eq!(keys.len(), items.len());
    }

    #[test]
    fn test_item_def_deserializes_with_defaults() {
        let def: ItemDef = serde_json::from_str(
            r#"{"id": 99, "key": "stick", "name": "Stick", "kind": "weapon", "weaponLevel": 1}"#,
        )
        .unwrap();

        assert_eq!(def.max_stack, 1);
        assert!(def.is_equippable());
        assert_eq!(def.kind.equipment_slot(), Some(EquipmentSlot::Weapon));
        assert!(!def.ranged);
    }
}
