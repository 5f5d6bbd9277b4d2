//! Chest areas: a chest appears once every static mob in the area is dead
//! and is taken away again when a guard respawns.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, info, warn};

use realm_shared::{EntityKind, InstanceId};

use crate::entities::{Chest, ChestOrigin};

use super::World;

#[derive(Debug, Default)]
pub(super) struct ChestAreaState {
    /// Living static mobs spawned inside the area
    pub(super) guards: BTreeSet<InstanceId>,
    pub(super) chest: Option<InstanceId>,
}

impl World {
    /// Enlists a freshly spawned static mob with the area it stands in. A
    /// repopulated area loses its unopened chest.
    pub(super) fn guard_chest_area(&mut self, mob: InstanceId, x: u16, y: u16) {
        let Some(index) = self.content.map.chest_area_at(x, y) else {
            return;
        };
        let Some(state) = self.chest_areas.get_mut(index) else {
            return;
        };
        state.guards.insert(mob);

        if let Some(chest) = state.chest.take() {
            if self.chests.remove(&chest).is_some() {
                self.despawn(chest, EntityKind::Chest);
                debug!("Chest area {} repopulated, chest {} removed", index, chest);
            }
        }
    }

    /// Drops a dead mob from its area, revealing the chest if it was the last
    pub(super) fn chest_area_guard_died(&mut self, mob: InstanceId) {
        let Some(index) = self.chest_areas.iter().position(|state| state.guards.contains(&mob)) else {
            return;
        };
        let state = &mut self.chest_areas[index];
        state.guards.remove(&mob);
        if state.guards.is_empty() && state.chest.is_none() {
            self.spawn_area_chest(index);
        }
    }

    pub(super) fn chest_area_looted(&mut self, index: usize, chest: InstanceId) {
        if let Some(state) = self.chest_areas.get_mut(index).filter(|s| s.chest == Some(chest)) {
            state.chest = None;
        }
    }

    fn spawn_area_chest(&mut self, index: usize) -> Option<InstanceId> {
        let content = Arc::clone(&self.content);
        let area = content.map.chest_areas.get(index)?;
        let (x, y) = (area.chest.x, area.chest.y);

        let id = self.allocate_id();
        if let Err(error) = self.place(id, EntityKind::Chest, x, y) {
            warn!("Failed to reveal chest for area {}: {}", index, error);
            return None;
        }
        self.chests.insert(
            id,
            Chest {
                id,
                x,
                y,
                items: area.items.clone(),
                origin: ChestOrigin::Area(index),
            },
        );
        if let Some(state) = self.chest_areas.get_mut(index) {
            state.chest = Some(id);
        }
        self.announce(id);
        info!("Chest area {} cleared, chest {} revealed at {},{}", index, id, x, y);
        Some(id)
    }
}
