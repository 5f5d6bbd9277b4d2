//! Inventory and bank slot storage.

use log::warn;

use realm_shared::{ContainerBatch, ContainerSlot, ContainerType, Enchantment, ItemDef};

use crate::content::Content;
use crate::persistence::SlotRecord;

pub const INVENTORY_SIZE: usize = 20;
pub const BANK_SIZE: usize = 56;

/// Contents of one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub key: String,
    pub count: u32,
    pub ability: Enchantment,
    pub ability_level: u32,
}

#[derive(Debug, Clone)]
pub struct Container {
    kind: ContainerType,
    slots: Vec<Option<Slot>>,
}

impl Container {
    pub fn new(kind: ContainerType) -> Self {
        let size = match kind {
            ContainerType::Inventory => INVENTORY_SIZE,
            ContainerType::Bank => BANK_SIZE,
        };
        Self { kind, slots: vec![None; size] }
    }

    /// Rebuild from stored slots, skipping unknown items and bad indices
    pub fn load(kind: ContainerType, records: &[SlotRecord], content: &Content) -> Self {
        let mut container = Self::new(kind);
        for record in records {
            let index = record.index as usize;
            if index >= container.slots.len() || content.item(&record.key).is_none() {
                warn!("Dropping stored {:?} slot {} ({})", kind, record.index, record.key);
                continue;
            }
            container.slots[index] = Some(Slot {
                key: record.key.clone(),
                count: record.count.max(1),
                ability: Enchantment::from_u8(record.ability).unwrap_or_default(),
                ability_level: record.ability_level,
            });
        }
        container
    }

    pub fn kind(&self) -> ContainerType {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    pub fn find(&self, key: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.key == key))
    }

    /// Slot index `add` would write to, without changing anything
    fn target_slot(&self, item: &ItemDef, count: u32) -> Option<usize> {
        if item.is_stackable() {
            let stack = self.slots.iter().position(|slot| {
                slot.as_ref()
                    .is_some_and(|s| s.key == item.key && s.count + count <= item.max_stack)
            });
            if stack.is_some() {
                return stack;
            }
        }
        self.slots.iter().position(Option::is_none)
    }

    pub fn can_hold(&self, item: &ItemDef, count: u32) -> bool {
        self.target_slot(item, count).is_some()
    }

    /// Adds items, stacking onto an existing slot where possible.
    /// Returns the touched index, or `None` when the container is full.
    pub fn add(&mut self, item: &ItemDef, count: u32, ability: Enchantment, ability_level: u32) -> Option<usize> {
        let count = count.max(1);
        let index = self.target_slot(item, count)?;
        match &mut self.slots[index] {
            Some(slot) => slot.count += count,
            empty => {
                *empty = Some(Slot {
                    key: item.key.clone(),
                    count,
                    ability,
                    ability_level,
                })
            }
        }
        Some(index)
    }

    /// Takes up to `count` from a slot, clearing it when emptied.
    /// Returns what was taken.
    pub fn remove(&mut self, index: usize, count: u32) -> Option<Slot> {
        let entry = self.slots.get_mut(index)?;
        let slot = entry.as_mut()?;
        let taken = count.clamp(1, slot.count);

        let removed = Slot {
            key: slot.key.clone(),
            count: taken,
            ability: slot.ability,
            ability_level: slot.ability_level,
        };
        slot.count -= taken;
        if slot.count == 0 {
            *entry = None;
        }
        Some(removed)
    }

    /// Removes `count` of the first slot holding `key`, returning its index
    pub fn remove_key(&mut self, key: &str, count: u32) -> Option<usize> {
        let index = self.find(key)?;
        self.remove(index, count)?;
        Some(index)
    }

    pub fn slot_data(&self, index: usize) -> Option<ContainerSlot> {
        self.get(index).map(|slot| ContainerSlot {
            index: index as u32,
            key: slot.key.clone(),
            count: slot.count,
            ability: slot.ability,
            ability_level: slot.ability_level,
        })
    }

    pub fn batch(&self) -> ContainerBatch {
        ContainerBatch {
            size: self.slots.len() as u32,
            slots: (0..self.slots.len()).filter_map(|i| self.slot_data(i)).collect(),
        }
    }

    pub fn records(&self) -> Vec<SlotRecord> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref().map(|s| SlotRecord {
                    index: index as u32,
                    key: s.key.clone(),
                    count: s.count,
                    ability: s.ability.as_u8(),
                    ability_level: s.ability_level,
                })
            })
            .collect()
    }
}
