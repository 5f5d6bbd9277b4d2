//! The authoritative world: every live entity, the spatial indexes, and
//! the per-tick simulation that turns queued player actions into outgoing
//! messages.

mod actions;
mod chest_areas;
mod combat;
mod groups;
mod mob_ai;
mod movement;
mod scheduler;
#[cfg(test)]
mod tests;

pub use actions::{ActionError, PlayerAction};
use chest_areas::ChestAreaState;
pub use combat::get_hit;
pub use groups::{GroupId, GroupManager};
pub use movement::StepOutcome;
pub use scheduler::{Scheduler, Task};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use realm_shared::{
    ContainerUpdate, Enchantment, EntityKind, EntityState, EquipmentUpdate, InstanceId, ListDiff, MovementUpdate,
    PointerUpdate, QuestUpdate, ServerMessage,
};

use crate::config::WorldConfig;
use crate::content::Content;
use crate::entities::{Character, Chest, ChestOrigin, Mob, Npc, Player, Projectile, WorldItem};
use crate::grid::{GridError, PathingGrid, SpatialGrid};
use crate::navigation::{Adjacency, Pathfinder};

// =============================================================================
// Outbox
// =============================================================================

/// Who an outgoing message is for. Resolved to player ids when the outbox
/// is drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Player(InstanceId),
    Group(GroupId),
    AdjacentGroups { group: GroupId, exclude: Option<InstanceId> },
    Broadcast,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub target: Target,
    pub message: ServerMessage,
}

/// Whether an entity of this kind blocks the cell it stands on
fn occupies(kind: EntityKind) -> bool {
    matches!(kind, EntityKind::Player | EntityKind::Mob | EntityKind::Npc | EntityKind::Chest)
}

// =============================================================================
// World
// =============================================================================

pub struct World {
    config: WorldConfig,
    content: Arc<Content>,
    grid: SpatialGrid,
    pathing: PathingGrid,
    pathfinder: Pathfinder,
    groups: GroupManager,
    scheduler: Scheduler,
    rng: StdRng,
    tick: u64,
    next_instance: InstanceId,
    players: HashMap<InstanceId, Player>,
    mobs: HashMap<InstanceId, Mob>,
    items: HashMap<InstanceId, WorldItem>,
    npcs: HashMap<InstanceId, Npc>,
    chests: HashMap<InstanceId, Chest>,
    projectiles: HashMap<InstanceId, Projectile>,
    chest_areas: Vec<ChestAreaState>,
    actions: VecDeque<(InstanceId, PlayerAction)>,
    outbox: Vec<Outgoing>,
}

impl World {
    /// Builds the world and populates it with the map's mobs, NPCs and chests.
    pub fn new(config: WorldConfig, content: Arc<Content>) -> Self {
        let map = &content.map;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut world = Self {
            grid: SpatialGrid::new(map.width, map.height),
            pathing: map.pathing_grid(),
            pathfinder: Pathfinder::new(config.adjacency),
            groups: GroupManager::new(map.width, map.height, map.group_width, map.group_height),
            scheduler: Scheduler::new(),
            rng,
            tick: 0,
            next_instance: 1,
            players: HashMap::new(),
            mobs: HashMap::new(),
            items: HashMap::new(),
            npcs: HashMap::new(),
            chests: HashMap::new(),
            projectiles: HashMap::new(),
            chest_areas: map.chest_areas.iter().map(|_| ChestAreaState::default()).collect(),
            actions: VecDeque::new(),
            outbox: Vec::new(),
            config,
            content,
        };

        world.populate();
        world
    }

    fn populate(&mut self) {
        let content = Arc::clone(&self.content);
        let map = &content.map;

        for spawn in &map.mobs {
            if self.spawn_mob(&spawn.key, spawn.x, spawn.y, true).is_none() {
                warn!("Could not spawn mob '{}' at {},{}", spawn.key, spawn.x, spawn.y);
            }
        }
        for spawn in &map.npcs {
            self.spawn_npc(&spawn.key, spawn.x, spawn.y);
        }
        for index in 0..map.chests.len() {
            self.spawn_chest(index);
        }

        let regen = self.config.ms_to_ticks(self.config.regen_interval_ms);
        self.scheduler.schedule(regen, Task::Regenerate);

        info!(
            "World populated: {} mobs, {} npcs, {} chests on a {}x{} map, {} movement",
            self.mobs.len(),
            self.npcs.len(),
            self.chests.len(),
            map.width,
            map.height,
            match self.pathfinder.adjacency() {
                Adjacency::Four => "4-way",
                Adjacency::Eight => "8-way",
            }
        );
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Next instance id; ids are never reused
    pub fn allocate_id(&mut self) -> InstanceId {
        let id = self.next_instance;
        self.next_instance += 1;
        id
    }

    pub fn player(&self, id: InstanceId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn mob(&self, id: InstanceId) -> Option<&Mob> {
        self.mobs.get(&id)
    }

    pub fn population(&self) -> usize {
        self.players.len()
    }

    pub fn is_online(&self, username: &str) -> bool {
        self.players.values().any(|p| p.username.eq_ignore_ascii_case(username))
    }

    pub fn kind_of(&self, id: InstanceId) -> Option<EntityKind> {
        if self.players.contains_key(&id) {
            Some(EntityKind::Player)
        } else if self.mobs.contains_key(&id) {
            Some(EntityKind::Mob)
        } else if self.items.contains_key(&id) {
            Some(EntityKind::Item)
        } else if self.npcs.contains_key(&id) {
            Some(EntityKind::Npc)
        } else if self.chests.contains_key(&id) {
            Some(EntityKind::Chest)
        } else if self.projectiles.contains_key(&id) {
            Some(EntityKind::Projectile)
        } else {
            None
        }
    }

    pub fn entity_state(&self, id: InstanceId) -> Option<EntityState> {
        match self.kind_of(id)? {
            EntityKind::Player => self.players.get(&id).map(Player::entity_state),
            EntityKind::Mob => self.mobs.get(&id).map(Mob::entity_state),
            EntityKind::Item => self.items.get(&id).map(WorldItem::entity_state),
            EntityKind::Npc => self.npcs.get(&id).map(Npc::entity_state),
            EntityKind::Chest => self.chests.get(&id).map(Chest::entity_state),
            EntityKind::Projectile => self.projectiles.get(&id).map(Projectile::entity_state),
        }
    }

    /// Recorded position, including dead players that are off the grid
    pub fn position_of(&self, id: InstanceId) -> Option<(u16, u16)> {
        match self.kind_of(id)? {
            EntityKind::Player => self.players.get(&id).map(|p| p.character.position()),
            EntityKind::Mob => self.mobs.get(&id).map(|m| m.character.position()),
            EntityKind::Item => self.items.get(&id).map(WorldItem::position),
            EntityKind::Npc => self.npcs.get(&id).map(Npc::position),
            EntityKind::Chest => self.chests.get(&id).map(Chest::position),
            EntityKind::Projectile => self.projectiles.get(&id).map(|p| (p.x, p.y)),
        }
    }

    fn character(&self, id: InstanceId) -> Option<&Character> {
        if let Some(player) = self.players.get(&id) {
            return Some(&player.character);
        }
        self.mobs.get(&id).map(|mob| &mob.character)
    }

    fn character_mut(&mut self, id: InstanceId) -> Option<&mut Character> {
        if let Some(player) = self.players.get_mut(&id) {
            return Some(&mut player.character);
        }
        self.mobs.get_mut(&id).map(|mob| &mut mob.character)
    }

    /// Closest walkable, unoccupied neighbour of a cell
    pub fn free_cell_near(&self, (x, y): (u16, u16)) -> Option<(u16, u16)> {
        const OFFSETS: [(i32, i32); 8] = [(1, 0), (-1, 0), (0, 1), (0, -1), (1, 1), (-1, 1), (1, -1), (-1, -1)];
        OFFSETS.iter().find_map(|(dx, dy)| {
            let (nx, ny) = (i32::from(x) + dx, i32::from(y) + dy);
            if self.pathing.is_blocked(nx, ny) {
                None
            } else {
                Some((nx as u16, ny as u16))
            }
        })
    }

    fn npc_by_key(&self, key: &str) -> Option<InstanceId> {
        self.npcs.values().filter(|npc| npc.key == key).map(|npc| npc.id).min()
    }

    // -------------------------------------------------------------------------
    // Messaging
    // -------------------------------------------------------------------------

    pub fn push(&mut self, target: Target, message: ServerMessage) {
        self.outbox.push(Outgoing { target, message });
    }

    pub fn send_to(&mut self, id: InstanceId, message: ServerMessage) {
        self.push(Target::Player(id), message);
    }

    /// Sends to the players around an entity's region
    fn send_around(&mut self, id: InstanceId, message: ServerMessage, include_self: bool) {
        if let Some(group) = self.groups.group_id(id) {
            let exclude = if include_self { None } else { Some(id) };
            self.push(Target::AdjacentGroups { group, exclude }, message);
        }
    }

    /// Resolves every pending message to its recipients, in push order
    pub fn drain_outbox(&mut self) -> Vec<(InstanceId, ServerMessage)> {
        let outgoing = std::mem::take(&mut self.outbox);
        let mut resolved = Vec::with_capacity(outgoing.len());

        for Outgoing { target, message } in outgoing {
            match target {
                Target::Player(id) => {
                    if self.players.contains_key(&id) {
                        resolved.push((id, message));
                    }
                }
                Target::Group(group) => {
                    for id in self.groups.players_in(group) {
                        resolved.push((id, message.clone()));
                    }
                }
                Target::AdjacentGroups { group, exclude } => {
                    for id in self.groups.players_around(group) {
                        if Some(id) != exclude {
                            resolved.push((id, message.clone()));
                        }
                    }
                }
                Target::Broadcast => {
                    let mut ids: Vec<InstanceId> = self.players.keys().copied().collect();
                    ids.sort_unstable();
                    for id in ids {
                        resolved.push((id, message.clone()));
                    }
                }
            }
        }

        resolved
    }

    // -------------------------------------------------------------------------
    // Placement
    // -------------------------------------------------------------------------

    /// Puts an entity on the grid, the pathing overlay and its region
    fn place(&mut self, id: InstanceId, kind: EntityKind, x: u16, y: u16) -> Result<(), GridError> {
        self.grid.register(id, x, y)?;
        if occupies(kind) {
            if let Err(error) = self.pathing.occupy(x, y) {
                self.grid.unregister(id);
                return Err(error);
            }
        }
        let group = self.groups.group_of(x, y);
        self.groups.add(id, group, kind == EntityKind::Player);
        Ok(())
    }

    /// Takes an entity off the grid and pathing overlay. Region membership
    /// is left alone.
    fn unplace(&mut self, id: InstanceId, kind: EntityKind) -> Option<(u16, u16)> {
        let (x, y) = self.grid.unregister(id)?;
        if occupies(kind) {
            if let Err(error) = self.pathing.vacate(x, y) {
                warn!("Failed to vacate {},{} for {}: {}", x, y, id, error);
            }
        }
        Some((x, y))
    }

    fn relocate(&mut self, id: InstanceId, kind: EntityKind, from: (u16, u16), to: (u16, u16)) -> Result<(), GridError> {
        self.grid.move_entity(id, to.0, to.1)?;
        if occupies(kind) {
            self.pathing.vacate(from.0, from.1)?;
            self.pathing.occupy(to.0, to.1)?;
        }
        Ok(())
    }

    /// Tells nearby players about an entity
    fn announce(&mut self, id: InstanceId) {
        let (Some(state), Some(group)) = (self.entity_state(id), self.groups.group_id(id)) else {
            return;
        };
        for viewer in self.groups.players_around(group) {
            if viewer != id {
                if let Some(player) = self.players.get_mut(&viewer) {
                    player.known.insert(id);
                }
            }
        }
        self.push(Target::AdjacentGroups { group, exclude: Some(id) }, ServerMessage::Spawn(state));
    }

    fn announce_despawn(&mut self, id: InstanceId, group: GroupId) {
        for player in self.players.values_mut() {
            player.known.remove(&id);
        }
        self.push(Target::AdjacentGroups { group, exclude: Some(id) }, ServerMessage::Despawn(id));
    }

    /// Removes a non-player entity from the grid and its region, telling
    /// nearby players. The registry record is the caller's business.
    fn despawn(&mut self, id: InstanceId, kind: EntityKind) {
        self.unplace(id, kind);
        if let Some(group) = self.groups.remove(id) {
            self.announce_despawn(id, group);
        }
    }

    /// Recomputes an entity's region after it moved. Players only do so once
    /// they are `group_hysteresis` tiles away from the last anchor, unless
    /// `force` is set.
    fn update_group(&mut self, id: InstanceId, position: (u16, u16), force: bool) {
        let hysteresis = self.config.group_hysteresis;
        let is_player = match self.players.get_mut(&id) {
            Some(player) => {
                let (ax, ay) = player.group_anchor;
                let far = position.0.abs_diff(ax) >= hysteresis || position.1.abs_diff(ay) >= hysteresis;
                if !force && !far {
                    return;
                }
                player.group_anchor = position;
                true
            }
            None => false,
        };

        let group = self.groups.group_of(position.0, position.1);
        let Some(previous) = self.groups.change(id, group) else {
            return;
        };
        if previous != group {
            debug!("Entity {} moved from group {} to {}", id, previous, group);
            self.on_group_change(id, previous, group, is_player);
        }
    }

    fn on_group_change(&mut self, id: InstanceId, previous: GroupId, group: GroupId, is_player: bool) {
        let before: HashSet<InstanceId> = self.groups.players_around(previous).into_iter().collect();
        let after: HashSet<InstanceId> = self.groups.players_around(group).into_iter().collect();

        let mut entering: Vec<InstanceId> = after.difference(&before).copied().filter(|v| *v != id).collect();
        let mut leaving: Vec<InstanceId> = before.difference(&after).copied().filter(|v| *v != id).collect();
        entering.sort_unstable();
        leaving.sort_unstable();

        let visible = self.grid.contains(id);
        if let Some(state) = self.entity_state(id).filter(|_| visible) {
            for viewer in entering {
                if let Some(player) = self.players.get_mut(&viewer) {
                    player.known.insert(id);
                }
                self.send_to(viewer, ServerMessage::Spawn(state.clone()));
            }
        }
        for viewer in leaving {
            if let Some(player) = self.players.get_mut(&viewer) {
                player.known.remove(&id);
            }
            self.send_to(viewer, ServerMessage::Despawn(id));
        }

        if is_player {
            self.refresh_visibility(id);
        }
    }

    /// Sends a player the ids it should see, despawning what it should not
    fn refresh_visibility(&mut self, id: InstanceId) {
        let Some(group) = self.groups.group_id(id) else {
            return;
        };
        let visible: HashSet<InstanceId> = self
            .groups
            .entities_around(group)
            .into_iter()
            .filter(|entity| *entity != id && self.grid.contains(*entity))
            .collect();

        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        let diff = ListDiff::compute(&player.known, &visible);
        player.known = visible;

        for removed in diff.remove {
            self.send_to(id, ServerMessage::Despawn(removed));
        }
        let mut list: Vec<InstanceId> = diff.new.into_iter().chain(diff.keep).collect();
        list.sort_unstable();
        self.send_to(id, ServerMessage::List(list));
    }

    /// Answers a `Who` request with a `Spawn` per live, visible id
    fn reveal(&mut self, id: InstanceId, ids: &[InstanceId]) {
        let mut seen = HashSet::new();
        for wanted in ids {
            if *wanted == id || !seen.insert(*wanted) || !self.grid.contains(*wanted) {
                continue;
            }
            if let Some(state) = self.entity_state(*wanted) {
                if let Some(player) = self.players.get_mut(&id) {
                    player.known.insert(*wanted);
                }
                self.send_to(id, ServerMessage::Spawn(state));
            }
        }
    }

    // -------------------------------------------------------------------------
    // Spawning
    // -------------------------------------------------------------------------

    /// Spawns a mob from its template. Static mobs belong to the map and
    /// respawn after death.
    pub fn spawn_mob(&mut self, key: &str, x: u16, y: u16, is_static: bool) -> Option<InstanceId> {
        let content = Arc::clone(&self.content);
        let def = content.mobs.get(key)?;

        let id = self.allocate_id();
        if let Err(error) = self.place(id, EntityKind::Mob, x, y) {
            warn!("Failed to place mob '{}': {}", key, error);
            return None;
        }
        self.mobs.insert(id, Mob::from_def(id, def, x, y, is_static));
        self.announce(id);
        if is_static {
            self.guard_chest_area(id, x, y);
        }
        debug!("Spawned mob {} '{}' at {},{}", id, key, x, y);
        Some(id)
    }

    fn spawn_npc(&mut self, key: &str, x: u16, y: u16) -> Option<InstanceId> {
        let content = Arc::clone(&self.content);
        let Some(def) = content.npcs.get(key) else {
            warn!("Unknown NPC '{}' in map", key);
            return None;
        };

        let id = self.allocate_id();
        if let Err(error) = self.place(id, EntityKind::Npc, x, y) {
            warn!("Failed to place NPC '{}': {}", key, error);
            return None;
        }
        self.npcs.insert(id, Npc::new(id, key, &def.name, def.role, x, y));
        self.announce(id);
        Some(id)
    }

    fn spawn_chest(&mut self, spawn_index: usize) -> Option<InstanceId> {
        let content = Arc::clone(&self.content);
        let spawn = content.map.chests.get(spawn_index)?;

        let id = self.allocate_id();
        if let Err(error) = self.place(id, EntityKind::Chest, spawn.x, spawn.y) {
            warn!("Failed to place chest {}: {}", spawn_index, error);
            return None;
        }
        self.chests.insert(
            id,
            Chest {
                id,
                x: spawn.x,
                y: spawn.y,
                items: spawn.items.clone(),
                origin: ChestOrigin::Placed(spawn_index),
            },
        );
        self.announce(id);
        Some(id)
    }

    /// Drops an item on the ground; it expires after `item_lifetime_ms`
    pub fn drop_item(
        &mut self,
        key: &str,
        count: u32,
        ability: Enchantment,
        ability_level: u32,
        x: u16,
        y: u16,
    ) -> Option<InstanceId> {
        let content = Arc::clone(&self.content);
        let Some(def) = content.item(key) else {
            warn!("Tried to drop unknown item '{}'", key);
            return None;
        };

        let id = self.allocate_id();
        if let Err(error) = self.place(id, EntityKind::Item, x, y) {
            warn!("Failed to drop '{}': {}", key, error);
            return None;
        }
        let expires_at = self.tick + self.config.ms_to_ticks(self.config.item_lifetime_ms);
        self.items.insert(
            id,
            WorldItem {
                id,
                key: key.to_string(),
                name: def.name.clone(),
                count: count.max(1),
                ability,
                ability_level,
                x,
                y,
                expires_at,
            },
        );
        self.announce(id);
        self.scheduler.schedule(expires_at, Task::ExpireItem(id));
        Some(id)
    }

    // -------------------------------------------------------------------------
    // Players
    // -------------------------------------------------------------------------

    /// Inserts a logged-in player and sends its initial state
    pub fn add_player(&mut self, mut player: Player) -> Result<(), GridError> {
        let id = player.id();
        let (x, y) = player.character.position();
        player.group_anchor = (x, y);
        player.known.clear();
        player.update_attack_range(self.config.ranged_attack_range);

        self.place(id, EntityKind::Player, x, y)?;

        let content = Arc::clone(&self.content);
        self.send_to(id, ServerMessage::Equipment(EquipmentUpdate::Batch(player.equipment.batch())));
        self.send_to(id, ServerMessage::Inventory(ContainerUpdate::Batch(player.inventory.batch())));
        self.send_to(id, ServerMessage::Bank(ContainerUpdate::Batch(player.bank.batch())));
        self.send_to(id, ServerMessage::Quest(QuestUpdate::Batch(player.quests.batch(&content))));
        for quest in &content.quests {
            if player.quests.is_finished(quest) {
                continue;
            }
            if let Some(npc) = self.npc_by_key(&quest.npc) {
                self.send_to(id, ServerMessage::Pointer(PointerUpdate::Npc(npc)));
            }
        }

        info!("{} ({}) entered the world at {},{}", player.username, id, x, y);
        self.players.insert(id, player);
        self.announce(id);
        self.refresh_visibility(id);
        self.check_pvp(id);

        let population = self.players.len() as u32;
        self.push(Target::Broadcast, ServerMessage::Population(population));
        Ok(())
    }

    /// Takes a player out of the world, clearing every reference to it
    pub fn remove_player(&mut self, id: InstanceId) -> Option<Player> {
        if !self.players.contains_key(&id) {
            return None;
        }

        self.disengage(id);
        self.unplace(id, EntityKind::Player);
        if let Some(group) = self.groups.remove(id) {
            self.announce_despawn(id, group);
        }
        self.release_targeters(id);

        let mut orphaned: Vec<InstanceId> = self
            .projectiles
            .values()
            .filter(|p| p.source == id || p.target == id)
            .map(|p| p.id)
            .collect();
        orphaned.sort_unstable();
        for projectile in orphaned {
            self.projectiles.remove(&projectile);
            self.despawn(projectile, EntityKind::Projectile);
        }
        self.actions.retain(|(actor, _)| *actor != id);

        let mut player = self.players.remove(&id)?;
        player.known.clear();
        player.pending = None;
        player.character.attackers.clear();

        info!("{} ({}) left the world", player.username, id);
        let population = self.players.len() as u32;
        self.push(Target::Broadcast, ServerMessage::Population(population));
        Some(player)
    }

    /// Moves a player instantly, used by admin commands
    pub fn teleport(&mut self, id: InstanceId, x: u16, y: u16) -> Result<(), ActionError> {
        let map = &self.content.map;
        if !map.in_bounds(x, y) {
            return Err(ActionError::OutOfBounds);
        }
        if !map.is_walkable(x, y) {
            return Err(ActionError::Collidable);
        }

        let player = self.players.get_mut(&id).ok_or(ActionError::NotFound)?;
        if player.character.dead {
            return Err(ActionError::Dead);
        }
        let from = player.character.position();
        player.character.stop();
        player.pending = None;

        self.relocate(id, EntityKind::Player, from, (x, y)).map_err(|_| ActionError::OutOfBounds)?;
        if let Some(player) = self.players.get_mut(&id) {
            player.character.x = x;
            player.character.y = y;
        }

        let teleport = ServerMessage::Teleport { id, x, y, with_animation: true };
        self.send_around(id, teleport, true);
        self.update_group(id, (x, y), true);
        self.check_pvp(id);
        Ok(())
    }

    /// Freezes a character in place for `freeze_duration_ms`
    pub fn freeze(&mut self, id: InstanceId) -> bool {
        let due = self.tick + self.config.ms_to_ticks(self.config.freeze_duration_ms);
        let Some(character) = self.character_mut(id).filter(|c| !c.dead) else {
            return false;
        };
        character.freeze_until(due);

        self.send_around(id, ServerMessage::Movement(MovementUpdate::Freeze { id, state: true }), true);
        self.scheduler.schedule(due, Task::ClearFreeze(id));
        true
    }

    /// Full hit points and mana
    pub fn restore(&mut self, id: InstanceId) -> bool {
        let Some(player) = self.players.get_mut(&id).filter(|p| !p.character.dead) else {
            return false;
        };
        let max = player.character.max_hit_points;
        player.character.heal(max);
        player.mana = player.max_mana;
        let points = ServerMessage::Points { id, hit_points: player.character.hit_points, mana: Some(player.mana) };
        self.send_around(id, points, true);
        true
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    pub fn queue_action(&mut self, id: InstanceId, action: PlayerAction) {
        self.actions.push_back((id, action));
    }

    /// One simulation step: actions, players, mobs, then scheduled tasks
    pub fn update(&mut self) {
        self.tick += 1;
        self.process_actions();
        self.update_players();
        self.update_mobs();
        self.run_scheduled();
    }

    fn run_scheduled(&mut self) {
        for task in self.scheduler.drain_due(self.tick) {
            match task {
                Task::RespawnMob { key, x, y } => {
                    if self.spawn_mob(&key, x, y, true).is_none() {
                        warn!("Failed to respawn '{}' at {},{}", key, x, y);
                    }
                }
                Task::RemoveMob(id) => {
                    self.mobs.remove(&id);
                }
                Task::ExpireItem(id) => {
                    if self.items.remove(&id).is_some() {
                        self.despawn(id, EntityKind::Item);
                    }
                }
                Task::ProjectileImpact(id) => self.projectile_impact(id),
                Task::ClearStun(id) => {
                    let tick = self.tick;
                    if self.character_mut(id).is_some_and(|c| c.expire_stun(tick)) {
                        self.send_around(id, ServerMessage::Movement(MovementUpdate::Stunned { id, state: false }), true);
                    }
                }
                Task::ClearFreeze(id) => {
                    let tick = self.tick;
                    if self.character_mut(id).is_some_and(|c| c.expire_freeze(tick)) {
                        self.send_around(id, ServerMessage::Movement(MovementUpdate::Freeze { id, state: false }), true);
                    }
                }
                Task::ClearTerror(id) => {
                    let tick = self.tick;
                    if let Some(character) = self.character_mut(id) {
                        character.expire_terror(tick);
                    }
                }
                Task::RespawnChest { spawn_index } => {
                    self.spawn_chest(spawn_index);
                }
                Task::Regenerate => {
                    self.regenerate();
                    let due = self.tick + self.config.ms_to_ticks(self.config.regen_interval_ms);
                    self.scheduler.schedule(due, Task::Regenerate);
                }
            }
        }
    }
}
