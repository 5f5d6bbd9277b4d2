//! Player actions queued by the network layer and applied at the start of
//! each tick.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};

use realm_shared::{
    ChatInfo, ClientMessage, ContainerRemoval, ContainerType, ContainerUpdate, Enchantment, EntityKind, EquipmentSlot,
    EquipmentUpdate, HealInfo, HitKind, InstanceId, ItemDef, NpcTalk, NpcUpdate, PointerUpdate, QuestProgress,
    QuestUpdate, ServerMessage,
};

use crate::commands;
use crate::content::NpcRole;
use crate::entities::{ChestOrigin, EquippedItem, Interaction, QuestTalk};
use crate::grid::distance;

use super::{Target, Task, World};

/// Longest chat line relayed, in characters
pub const MAX_CHAT_LENGTH: usize = 256;
const BUBBLE_DURATION_MS: u32 = 5_000;
const GLOBAL_CHAT_COLOUR: &str = "rgba(191, 161, 63, 1.0)";

/// A decoded client request, applied in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerAction {
    Move { x: u16, y: u16 },
    Stop,
    Attack(InstanceId),
    ClearTarget,
    Request,
    Who(Vec<InstanceId>),
    Chat(String),
    InventorySelect(u32),
    InventoryRemove { index: u32, count: u32 },
    BankSelect { container: ContainerType, index: u32 },
    Unequip(EquipmentSlot),
    Respawn,
}

impl PlayerAction {
    /// The world-facing part of a client message. Session messages
    /// (intro, ready, ping) have no action.
    pub fn from_client(message: &ClientMessage) -> Option<Self> {
        let action = match message {
            ClientMessage::Move { x, y } => Self::Move { x: *x, y: *y },
            ClientMessage::Stop => Self::Stop,
            ClientMessage::Attack(id) => Self::Attack(*id),
            ClientMessage::ClearTarget => Self::ClearTarget,
            ClientMessage::Request(_) => Self::Request,
            ClientMessage::Who(ids) => Self::Who(ids.clone()),
            ClientMessage::Chat(text) => Self::Chat(text.clone()),
            ClientMessage::InventorySelect(index) => Self::InventorySelect(*index),
            ClientMessage::InventoryRemove { index, count } => Self::InventoryRemove { index: *index, count: *count },
            ClientMessage::BankSelect { container, index } => Self::BankSelect { container: *container, index: *index },
            ClientMessage::Unequip(slot) => Self::Unequip(*slot),
            ClientMessage::Respawn(_) => Self::Respawn,
            ClientMessage::Intro { .. } | ClientMessage::Ready | ClientMessage::Network(_) => return None,
        };
        Some(action)
    }

    /// Actions a dead player may still take
    fn allowed_while_dead(&self) -> bool {
        matches!(self, Self::Respawn | Self::Chat(_) | Self::Request | Self::Who(_))
    }
}

/// Why an action was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    OutOfBounds,
    Collidable,
    NoPath,
    CannotMove,
    Dead,
    LevelTooLow(u32),
    InventoryFull,
    BankFull,
    BankClosed,
    NotFound,
    InvalidSlot,
    NotInPvp,
    Muted,
    SpawnBlocked,
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds => write!(f, "Target is out of bounds"),
            Self::Collidable => write!(f, "Target cell is collidable"),
            Self::NoPath => write!(f, "No path to target"),
            Self::CannotMove => write!(f, "Character cannot move"),
            Self::Dead => write!(f, "Character is dead"),
            Self::LevelTooLow(level) => write!(f, "Requires level {}", level),
            Self::InventoryFull => write!(f, "Inventory is full"),
            Self::BankFull => write!(f, "Bank is full"),
            Self::BankClosed => write!(f, "No banker nearby"),
            Self::NotFound => write!(f, "Entity not found"),
            Self::InvalidSlot => write!(f, "Invalid slot"),
            Self::NotInPvp => write!(f, "Target is not attackable outside PvP"),
            Self::Muted => write!(f, "Player is muted"),
            Self::SpawnBlocked => write!(f, "No free cell at the spawn point"),
        }
    }
}

impl std::error::Error for ActionError {}

impl ActionError {
    /// Text shown to the player, if the failure is worth telling them about
    pub fn user_message(&self) -> Option<String> {
        let message = match self {
            Self::LevelTooLow(level) => format!("You need to be level {} to equip this item.", level),
            Self::InventoryFull => "You do not have enough space in your inventory.".to_string(),
            Self::BankFull => "You do not have enough space in your bank.".to_string(),
            Self::BankClosed => "You need to be next to a banker.".to_string(),
            Self::NotInPvp => "You can only attack players inside a PvP area.".to_string(),
            Self::Muted => "You are currently muted.".to_string(),
            Self::SpawnBlocked => "The spawn point is crowded, try again in a moment.".to_string(),
            _ => return None,
        };
        Some(message)
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn container_message(kind: ContainerType, update: ContainerUpdate) -> ServerMessage {
    match kind {
        ContainerType::Inventory => ServerMessage::Inventory(update),
        ContainerType::Bank => ServerMessage::Bank(update),
    }
}

fn removal(index: usize, count: u32) -> ContainerUpdate {
    ContainerUpdate::Remove(ContainerRemoval { index: index as u32, count })
}

impl World {
    pub(super) fn process_actions(&mut self) {
        while let Some((id, action)) = self.actions.pop_front() {
            let Some(player) = self.players.get(&id) else {
                continue;
            };
            if player.character.dead && !action.allowed_while_dead() {
                continue;
            }
            if let Err(error) = self.handle_action(id, action) {
                self.report(id, error);
            }
        }
    }

    /// Logs a rejected action and tells the player when it is worth it
    pub(super) fn report(&mut self, id: InstanceId, error: ActionError) {
        debug!("Action by {} rejected: {}", id, error);
        if let Some(message) = error.user_message() {
            self.send_to(id, ServerMessage::notify(message));
        }
    }

    fn handle_action(&mut self, id: InstanceId, action: PlayerAction) -> Result<(), ActionError> {
        match action {
            PlayerAction::Move { x, y } => self.click(id, x, y),
            PlayerAction::Stop => {
                let player = self.players.get_mut(&id).ok_or(ActionError::NotFound)?;
                player.character.stop();
                player.pending = None;
                Ok(())
            }
            PlayerAction::Attack(target) => self.engage(id, target),
            PlayerAction::ClearTarget => {
                self.disengage(id);
                Ok(())
            }
            PlayerAction::Request => {
                self.refresh_visibility(id);
                Ok(())
            }
            PlayerAction::Who(ids) => {
                self.reveal(id, &ids);
                Ok(())
            }
            PlayerAction::Chat(text) => self.chat(id, &text),
            PlayerAction::InventorySelect(index) => self.use_item(id, index as usize),
            PlayerAction::InventoryRemove { index, count } => self.discard(id, index as usize, count),
            PlayerAction::BankSelect { container, index } => self.bank_transfer(id, container, index as usize),
            PlayerAction::Unequip(slot) => self.unequip(id, slot),
            PlayerAction::Respawn => self.respawn_player(id),
        }
    }

    // -------------------------------------------------------------------------
    // Chat
    // -------------------------------------------------------------------------

    fn chat(&mut self, id: InstanceId, text: &str) -> Result<(), ActionError> {
        let text: String = text.trim().chars().take(MAX_CHAT_LENGTH).collect();
        if text.is_empty() {
            return Ok(());
        }

        if let Some(result) = commands::parse_and_execute(self, id, &text) {
            debug!("Command '{}' by {}: {}", text, id, result.message);
            if !result.message.is_empty() {
                self.send_to(id, ServerMessage::notify(result.message));
            }
            return Ok(());
        }

        let player = self.players.get(&id).ok_or(ActionError::NotFound)?;
        if player.is_muted(unix_millis()) {
            return Err(ActionError::Muted);
        }
        let name = player.username.clone();

        if let Some(global) = text.strip_prefix('@') {
            let chat = ChatInfo {
                name,
                text: global.trim().to_string(),
                colour: Some(GLOBAL_CHAT_COLOUR.to_string()),
                is_global: true,
                with_bubble: false,
                duration: 0,
            };
            self.push(Target::Broadcast, ServerMessage::Chat(chat));
        } else {
            debug!("{}: {}", name, text);
            let chat = ChatInfo {
                name,
                text,
                colour: None,
                is_global: false,
                with_bubble: true,
                duration: BUBBLE_DURATION_MS,
            };
            self.send_around(id, ServerMessage::Chat(chat), true);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Inventory, bank and equipment
    // -------------------------------------------------------------------------

    /// Selecting an inventory slot equips or eats it
    fn use_item(&mut self, id: InstanceId, index: usize) -> Result<(), ActionError> {
        let content = Arc::clone(&self.content);
        let player = self.players.get(&id).ok_or(ActionError::NotFound)?;
        let slot = player.inventory.get(index).ok_or(ActionError::InvalidSlot)?;
        let def = content.item(&slot.key).ok_or(ActionError::NotFound)?;

        if def.is_equippable() {
            self.equip(id, index, def)
        } else if def.is_edible() {
            self.eat(id, index, def)
        } else {
            Ok(())
        }
    }

    fn equip(&mut self, id: InstanceId, index: usize, def: &ItemDef) -> Result<(), ActionError> {
        let slot = def.kind.equipment_slot().ok_or(ActionError::InvalidSlot)?;
        let content = Arc::clone(&self.content);
        let ranged_range = self.config.ranged_attack_range;

        let player = self.players.get_mut(&id).ok_or(ActionError::NotFound)?;
        if !player.can_equip(def.level_requirement) {
            return Err(ActionError::LevelTooLow(def.level_requirement));
        }
        let taken = player.inventory.remove(index, 1).ok_or(ActionError::InvalidSlot)?;
        let mut messages = vec![ServerMessage::Inventory(removal(index, taken.count))];

        let item = EquippedItem::from_def(def, 1, taken.ability, taken.ability_level);
        let data = item.data(slot);
        if let Some(previous) = player.equipment.set(slot, item) {
            let returned = content
                .item(&previous.key)
                .and_then(|prev| player.inventory.add(prev, previous.count.max(1), previous.ability, previous.ability_level));
            match returned.and_then(|at| player.inventory.slot_data(at)) {
                Some(added) => messages.push(ServerMessage::Inventory(ContainerUpdate::Add(added))),
                None => warn!("{} lost '{}' while equipping", player.username, previous.key),
            }
        }
        player.update_attack_range(ranged_range);
        let sync = player.sync_info();

        for message in messages {
            self.send_to(id, message);
        }
        self.send_around(id, ServerMessage::Equipment(EquipmentUpdate::Equip(data)), true);
        self.send_around(id, ServerMessage::Sync(sync), true);
        Ok(())
    }

    fn unequip(&mut self, id: InstanceId, slot: EquipmentSlot) -> Result<(), ActionError> {
        let content = Arc::clone(&self.content);
        let ranged_range = self.config.ranged_attack_range;

        let player = self.players.get_mut(&id).ok_or(ActionError::NotFound)?;
        let equipped = player.equipment.get(slot).ok_or(ActionError::NotFound)?;
        let def = content.item(&equipped.key).ok_or(ActionError::NotFound)?;
        let count = equipped.count.max(1);
        if !player.inventory.can_hold(def, count) {
            return Err(ActionError::InventoryFull);
        }

        let item = player.equipment.take(slot).ok_or(ActionError::NotFound)?;
        let at = player
            .inventory
            .add(def, count, item.ability, item.ability_level)
            .ok_or(ActionError::InventoryFull)?;
        let added = player.inventory.slot_data(at);
        player.update_attack_range(ranged_range);
        let sync = player.sync_info();

        if let Some(added) = added {
            self.send_to(id, ServerMessage::Inventory(ContainerUpdate::Add(added)));
        }
        self.send_around(id, ServerMessage::Equipment(EquipmentUpdate::Unequip(slot)), true);
        self.send_around(id, ServerMessage::Sync(sync), true);
        Ok(())
    }

    fn eat(&mut self, id: InstanceId, index: usize, def: &ItemDef) -> Result<(), ActionError> {
        let player = self.players.get_mut(&id).ok_or(ActionError::NotFound)?;
        player.inventory.remove(index, 1).ok_or(ActionError::InvalidSlot)?;
        let healed = player.character.heal(def.heal);
        let restored = player.restore_mana(def.mana);
        let points = ServerMessage::Points { id, hit_points: player.character.hit_points, mana: Some(player.mana) };

        self.send_to(id, ServerMessage::Inventory(removal(index, 1)));
        if healed > 0 {
            self.send_around(id, ServerMessage::Heal(HealInfo { id, kind: HitKind::Heal, amount: healed }), true);
        }
        if restored > 0 {
            self.send_to(id, ServerMessage::Heal(HealInfo { id, kind: HitKind::Mana, amount: restored }));
        }
        self.send_to(id, points);
        Ok(())
    }

    /// Drops part of a stack on the ground under the player
    fn discard(&mut self, id: InstanceId, index: usize, count: u32) -> Result<(), ActionError> {
        let player = self.players.get_mut(&id).ok_or(ActionError::NotFound)?;
        let (x, y) = player.character.position();
        let removed = player.inventory.remove(index, count.max(1)).ok_or(ActionError::InvalidSlot)?;

        self.send_to(id, ServerMessage::Inventory(removal(index, removed.count)));
        self.drop_item(&removed.key, removed.count, removed.ability, removed.ability_level, x, y);
        Ok(())
    }

    /// Whether the last NPC the player talked to is a banker next to them
    fn near_banker(&self, id: InstanceId) -> bool {
        let Some(player) = self.players.get(&id) else {
            return false;
        };
        player
            .last_npc
            .and_then(|npc| self.npcs.get(&npc))
            .is_some_and(|npc| npc.role == NpcRole::Banker && distance(npc.position(), player.character.position()) <= 1)
    }

    /// Moves a whole slot between inventory and bank
    fn bank_transfer(&mut self, id: InstanceId, from: ContainerType, index: usize) -> Result<(), ActionError> {
        if !self.near_banker(id) {
            return Err(ActionError::BankClosed);
        }
        let content = Arc::clone(&self.content);
        let player = self.players.get_mut(&id).ok_or(ActionError::NotFound)?;

        let (source, destination, full) = match from {
            ContainerType::Inventory => (&mut player.inventory, &mut player.bank, ActionError::BankFull),
            ContainerType::Bank => (&mut player.bank, &mut player.inventory, ActionError::InventoryFull),
        };
        let slot = source.get(index).ok_or(ActionError::InvalidSlot)?;
        let count = slot.count;
        let def = content.item(&slot.key).ok_or(ActionError::NotFound)?;
        if !destination.can_hold(def, count) {
            return Err(full);
        }

        let moved = source.remove(index, count).ok_or(ActionError::InvalidSlot)?;
        let at = destination.add(def, moved.count, moved.ability, moved.ability_level).ok_or(full)?;
        let added = destination.slot_data(at);
        let to = destination.kind();

        self.send_to(id, container_message(from, removal(index, moved.count)));
        if let Some(added) = added {
            self.send_to(id, container_message(to, ContainerUpdate::Add(added)));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // World interactions
    // -------------------------------------------------------------------------

    pub(super) fn interact(&mut self, id: InstanceId, interaction: Interaction) -> Result<(), ActionError> {
        match interaction {
            Interaction::Pickup(item) => self.pick_up(id, item),
            Interaction::Talk(npc) => self.talk_to_npc(id, npc),
            Interaction::Open(chest) => self.open_chest(id, chest),
        }
    }

    pub(super) fn pick_up(&mut self, id: InstanceId, item_id: InstanceId) -> Result<(), ActionError> {
        let content = Arc::clone(&self.content);
        let item = self.items.get(&item_id).ok_or(ActionError::NotFound)?;
        let def = content.item(&item.key).ok_or(ActionError::NotFound)?;
        let (count, ability, ability_level) = (item.count, item.ability, item.ability_level);

        let player = self.players.get_mut(&id).ok_or(ActionError::NotFound)?;
        if !player.inventory.can_hold(def, count) {
            return Err(ActionError::InventoryFull);
        }
        let at = player
            .inventory
            .add(def, count, ability, ability_level)
            .ok_or(ActionError::InventoryFull)?;
        let added = player.inventory.slot_data(at);

        self.items.remove(&item_id);
        self.despawn(item_id, EntityKind::Item);
        if let Some(added) = added {
            self.send_to(id, ServerMessage::Inventory(ContainerUpdate::Add(added)));
        }
        Ok(())
    }

    fn talk_to_npc(&mut self, id: InstanceId, npc_id: InstanceId) -> Result<(), ActionError> {
        let content = Arc::clone(&self.content);
        let npc = self.npcs.get_mut(&npc_id).ok_or(ActionError::NotFound)?;
        let player = self.players.get_mut(&id).ok_or(ActionError::NotFound)?;
        player.last_npc = Some(npc_id);

        let mut messages = Vec::new();
        let quest = content.quest_for_npc(&npc.key).filter(|q| !player.quests.is_finished(q));

        if let Some(quest) = quest {
            let inventory = &player.inventory;
            match player.quests.talk(quest, npc, |key| inventory.contains(key)) {
                Some(QuestTalk::Line(text)) => messages.push(ServerMessage::Npc(NpcUpdate::Talk(NpcTalk { id: npc_id, text }))),
                Some(QuestTalk::Advance { consume }) => {
                    if let Some(key) = consume {
                        if let Some(index) = player.inventory.remove_key(&key, 1) {
                            messages.push(ServerMessage::Inventory(removal(index, 1)));
                        }
                    }
                    let stage = player.quests.advance(quest);
                    if player.quests.is_finished(quest) {
                        info!("{} finished quest '{}'", player.username, quest.name);
                        messages.push(ServerMessage::Quest(QuestUpdate::Finish { id: quest.id }));
                        messages.push(ServerMessage::Pointer(PointerUpdate::Remove));
                    } else {
                        messages.push(ServerMessage::Quest(QuestUpdate::Progress(QuestProgress { id: quest.id, stage })));
                    }
                }
                None => {}
            }
        } else {
            let def = content.npcs.get(&npc.key);
            match npc.role {
                NpcRole::Talker => {
                    let lines = def.map(|d| d.dialogue.as_slice()).unwrap_or_default();
                    if !lines.is_empty() {
                        // An exhausted conversation closes with an empty line
                        let text = npc.talk(lines.len()).map(|i| lines[i].clone()).unwrap_or_default();
                        messages.push(ServerMessage::Npc(NpcUpdate::Talk(NpcTalk { id: npc_id, text })));
                    }
                }
                NpcRole::Banker => {
                    messages.push(ServerMessage::Npc(NpcUpdate::Bank));
                    messages.push(ServerMessage::Bank(ContainerUpdate::Batch(player.bank.batch())));
                }
                NpcRole::Enchanter => messages.push(ServerMessage::Npc(NpcUpdate::Enchant)),
                NpcRole::Countdown => {
                    let countdown = def.map(|d| d.countdown).unwrap_or_default();
                    messages.push(ServerMessage::Npc(NpcUpdate::Countdown { id: npc_id, countdown }));
                }
            }
        }

        for message in messages {
            self.send_to(id, message);
        }
        Ok(())
    }

    fn open_chest(&mut self, id: InstanceId, chest_id: InstanceId) -> Result<(), ActionError> {
        let chest = self.chests.remove(&chest_id).ok_or(ActionError::NotFound)?;
        self.despawn(chest_id, EntityKind::Chest);
        debug!("Player {} opened chest {}", id, chest_id);

        if let Some(key) = chest.roll_item(&mut self.rng).map(str::to_string) {
            self.drop_item(&key, 1, Enchantment::None, 0, chest.x, chest.y);
        }
        match chest.origin {
            ChestOrigin::Placed(spawn_index) => {
                let delay = self.content.map.chests.get(spawn_index).map_or(0, |spawn| spawn.respawn_delay_ms);
                let due = self.tick + self.config.ms_to_ticks(delay);
                self.scheduler.schedule(due, Task::RespawnChest { spawn_index });
            }
            ChestOrigin::Area(index) => self.chest_area_looted(index, chest_id),
        }
        Ok(())
    }
}
