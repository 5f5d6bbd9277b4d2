//! Server-side NPC entity.

use realm_shared::{EntityKind, EntityState, InstanceId};

use crate::content::NpcRole;

/// Server-side NPC state
#[derive(Debug, Clone)]
pub struct Npc {
    pub id: InstanceId,
    pub key: String,
    pub name: String,
    pub role: NpcRole,
    pub x: u16,
    pub y: u16,
    /// Conversation cursor shared by everyone talking to this NPC
    talk_index: usize,
}

impl Npc {
    pub fn new(id: InstanceId, key: &str, name: &str, role: NpcRole, x: u16, y: u16) -> Self {
        Self {
            id,
            key: key.to_string(),
            name: name.to_string(),
            role,
            x,
            y,
            talk_index: 0,
        }
    }

    pub fn position(&self) -> (u16, u16) {
        (self.x, self.y)
    }

    /// Index of the next line out of `lines`, or `None` once the
    /// conversation has run out, which also rewinds it.
    pub fn talk(&mut self, lines: usize) -> Option<usize> {
        if self.talk_index >= lines {
            self.talk_index = 0;
            return None;
        }
        let index = self.talk_index;
        self.talk_index += 1;
        Some(index)
    }

    pub fn reset_talk(&mut self) {
        self.talk_index = 0;
    }

    pub fn entity_state(&self) -> EntityState {
        EntityState::new(EntityKind::Npc, self.id, &self.key, &self.name, self.x, self.y)
    }
}
