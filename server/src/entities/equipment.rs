//! Equipped items and the combat numbers they contribute.

use log::warn;

use realm_shared::{Enchantment, EquipmentData, EquipmentSlot, ItemDef};

use crate::content::Content;
use crate::persistence::EquipmentRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquippedItem {
    pub key: String,
    pub name: String,
    pub count: u32,
    pub ability: Enchantment,
    pub ability_level: u32,
    pub weapon_level: u32,
    pub armour_level: u32,
    pub ranged: bool,
}

impl EquippedItem {
    pub fn from_def(def: &ItemDef, count: u32, ability: Enchantment, ability_level: u32) -> Self {
        Self {
            key: def.key.clone(),
            name: def.name.clone(),
            count: count.max(1),
            ability,
            ability_level,
            weapon_level: def.weapon_level,
            armour_level: def.armour_level,
            ranged: def.ranged,
        }
    }

    pub fn data(&self, slot: EquipmentSlot) -> EquipmentData {
        EquipmentData {
            slot,
            name: self.name.clone(),
            key: self.key.clone(),
            count: self.count,
            ability: self.ability,
            ability_level: self.ability_level,
        }
    }
}

/// One optional item per [`EquipmentSlot`]
#[derive(Debug, Clone, Default)]
pub struct Equipment {
    slots: [Option<EquippedItem>; 5],
}

impl Equipment {
    pub fn load(records: &[EquipmentRecord], content: &Content) -> Self {
        let mut equipment = Self::default();
        for record in records {
            let slot = EquipmentSlot::from_u8(record.slot);
            let def = content.item(&record.key);
            match (slot, def) {
                (Some(slot), Some(def)) if def.kind.equipment_slot() == Some(slot) => {
                    let ability = Enchantment::from_u8(record.ability).unwrap_or_default();
                    equipment.set(slot, EquippedItem::from_def(def, record.count, ability, record.ability_level));
                }
                _ => warn!("Dropping stored equipment {} in slot {}", record.key, record.slot),
            }
        }
        equipment
    }

    pub fn get(&self, slot: EquipmentSlot) -> Option<&EquippedItem> {
        self.slots[usize::from(slot.as_u8())].as_ref()
    }

    /// Puts an item in a slot, returning what was there
    pub fn set(&mut self, slot: EquipmentSlot, item: EquippedItem) -> Option<EquippedItem> {
        self.slots[usize::from(slot.as_u8())].replace(item)
    }

    pub fn take(&mut self, slot: EquipmentSlot) -> Option<EquippedItem> {
        self.slots[usize::from(slot.as_u8())].take()
    }

    pub fn weapon_level(&self) -> u32 {
        self.get(EquipmentSlot::Weapon).map_or(0, |w| w.weapon_level)
    }

    /// Armour level summed over every worn piece
    pub fn armour_level(&self) -> u32 {
        self.slots.iter().flatten().map(|item| item.armour_level).sum()
    }

    pub fn is_ranged(&self) -> bool {
        self.get(EquipmentSlot::Weapon).is_some_and(|w| w.ranged)
    }

    /// Weapon enchantment, if it has one
    pub fn weapon_ability(&self) -> Option<(Enchantment, u32)> {
        self.get(EquipmentSlot::Weapon)
            .filter(|w| w.ability.is_special())
            .map(|w| (w.ability, w.ability_level))
    }

    pub fn key_of(&self, slot: EquipmentSlot) -> String {
        self.get(slot).map(|item| item.key.clone()).unwrap_or_default()
    }

    pub fn batch(&self) -> Vec<EquipmentData> {
        EquipmentSlot::ALL
            .iter()
            .filter_map(|slot| self.get(*slot).map(|item| item.data(*slot)))
            .collect()
    }

    pub fn records(&self) -> Vec<EquipmentRecord> {
        EquipmentSlot::ALL
            .iter()
            .filter_map(|slot| {
                self.get(*slot).map(|item| EquipmentRecord {
                    slot: slot.as_u8(),
                    key: item.key.clone(),
                    count: item.count,
                    ability: item.ability.as_u8(),
                    ability_level: item.ability_level,
                })
            })
            .collect()
    }
}
