//! Whole-world scenarios driven through queued actions and `update`.

use std::sync::Arc;

use realm_shared::{
    CombatOpcode, ContainerUpdate, Enchantment, EquipmentSlot, Hit, HitKind, InstanceId, MovementUpdate, NpcUpdate,
    QuestProgress, QuestUpdate, ServerMessage,
};

use super::{PlayerAction, Task, World};
use crate::config::WorldConfig;
use crate::content::Content;
use crate::entities::{ChestOrigin, Player};
use crate::formulas::level_experience;
use crate::map::{Area, ChestArea, EntitySpawn, Map, MapData, Point};
use crate::navigation::Adjacency;
use crate::persistence::PlayerRecord;

type Sent = Vec<(InstanceId, ServerMessage)>;

/// 64x32 open field, four regions wide and two high, one wall at (15,10)
fn field() -> MapData {
    MapData {
        width: 64,
        height: 32,
        collisions: vec![10 * 64 + 15],
        group_width: 16,
        group_height: 16,
        spawn: Point { x: 4, y: 4 },
        pvp_areas: vec![Area { x: 40, y: 16, width: 20, height: 14 }],
        mobs: Vec::new(),
        npcs: Vec::new(),
        chests: Vec::new(),
        chest_areas: Vec::new(),
    }
}

fn content_with(map: MapData) -> Content {
    let mut content = Content::builtin().unwrap();
    content.map = Map::from_data(map).unwrap();
    content
}

fn config() -> WorldConfig {
    WorldConfig {
        seed: Some(42),
        movement_interval_ticks: 1,
        mob_movement_interval_ticks: 1,
        ..WorldConfig::default()
    }
}

fn build(content: Content) -> World {
    World::new(config(), Arc::new(content))
}

fn eight_way(map: MapData) -> World {
    let config = WorldConfig { adjacency: Adjacency::Eight, ..config() };
    World::new(config, Arc::new(content_with(map)))
}

fn world() -> World {
    build(content_with(field()))
}

fn player(world: &mut World, name: &str, (x, y): (u16, u16), level: u32) -> Player {
    let id = world.allocate_id();
    let mut record = PlayerRecord::new(name, (x, y));
    record.account.experience = level_experience(level);
    let content = Arc::clone(&world.content);
    Player::from_record(id, &record, &content, false)
}

fn join(world: &mut World, name: &str, position: (u16, u16), level: u32) -> InstanceId {
    let player = player(world, name, position, level);
    let id = player.id();
    world.add_player(player).unwrap();
    id
}

fn run(world: &mut World, ticks: usize) -> Sent {
    let mut sent = Vec::new();
    for _ in 0..ticks {
        world.update();
        sent.extend(world.drain_outbox());
    }
    sent
}

fn received(sent: &Sent, id: InstanceId) -> Vec<&ServerMessage> {
    sent.iter().filter(|(to, _)| *to == id).map(|(_, message)| message).collect()
}

fn notified(sent: &Sent, id: InstanceId, text: &str) -> bool {
    received(sent, id)
        .into_iter()
        .any(|m| matches!(m, ServerMessage::Notification { message, .. } if message == text))
}

// -----------------------------------------------------------------------------
// Movement and combat
// -----------------------------------------------------------------------------

#[test]
fn test_clicking_adjacent_mob_engages_without_moving() {
    let mut world = world();
    let alice = join(&mut world, "alice", (10, 10), 5);
    let rat = world.spawn_mob("rat", 11, 10, false).unwrap();
    world.drain_outbox();

    world.queue_action(alice, PlayerAction::Move { x: 11, y: 10 });
    let sent = run(&mut world, 1);

    let initiated = received(&sent, alice).into_iter().any(|m| {
        matches!(m, ServerMessage::Combat { kind: CombatOpcode::Initiate, attacker, target, .. }
            if *attacker == alice && *target == rat)
    });
    assert!(initiated);

    let player = world.player(alice).unwrap();
    assert_eq!(player.character.target, Some(rat));
    assert!(!player.character.is_moving());
    assert_eq!(player.character.position(), (10, 10));
    assert!(world.mob(rat).unwrap().character.attackers.contains(&alice));
}

#[test]
fn test_move_onto_wall_is_rejected() {
    let mut world = world();
    let alice = join(&mut world, "alice", (10, 10), 1);
    world.drain_outbox();

    world.queue_action(alice, PlayerAction::Move { x: 15, y: 10 });
    world.queue_action(alice, PlayerAction::Move { x: 500, y: 10 });
    let sent = run(&mut world, 5);

    assert!(!sent.iter().any(|(_, m)| matches!(m, ServerMessage::Movement(_))));
    let player = world.player(alice).unwrap();
    assert_eq!(player.character.position(), (10, 10));
    assert!(!player.character.is_moving());
}

#[test]
fn test_walks_to_clicked_cell() {
    let mut world = world();
    let alice = join(&mut world, "alice", (10, 10), 1);
    world.drain_outbox();

    world.queue_action(alice, PlayerAction::Move { x: 13, y: 12 });
    let sent = run(&mut world, 10);

    assert_eq!(world.player(alice).unwrap().character.position(), (13, 12));
    let moves = received(&sent, alice)
        .into_iter()
        .filter(|m| matches!(m, ServerMessage::Movement(MovementUpdate::Move { id, .. }) if *id == alice))
        .count();
    // The mover is excluded from its own step broadcasts
    assert_eq!(moves, 0);
}

/// Positions `id` was broadcast stepping through, as seen by `viewer`
fn steps(sent: &Sent, viewer: InstanceId, id: InstanceId) -> Vec<(u16, u16)> {
    received(sent, viewer)
        .into_iter()
        .filter_map(|m| match m {
            ServerMessage::Movement(MovementUpdate::Move { id: mover, x, y, .. }) if *mover == id => Some((*x, *y)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_eight_way_walks_diagonally() {
    let mut world = eight_way(field());
    let alice = join(&mut world, "alice", (10, 10), 1);
    let bob = join(&mut world, "bob", (2, 2), 1);
    world.drain_outbox();

    world.queue_action(alice, PlayerAction::Move { x: 13, y: 13 });
    let sent = run(&mut world, 3);

    assert_eq!(world.player(alice).unwrap().character.position(), (13, 13));
    assert_eq!(steps(&sent, bob, alice), vec![(11, 11), (12, 12), (13, 13)]);
}

#[test]
fn test_four_way_walks_around_the_diagonal() {
    let mut world = world();
    let alice = join(&mut world, "alice", (10, 10), 1);
    let bob = join(&mut world, "bob", (2, 2), 1);
    world.drain_outbox();

    world.queue_action(alice, PlayerAction::Move { x: 13, y: 13 });
    let sent = run(&mut world, 10);

    let path = steps(&sent, bob, alice);
    assert_eq!(path.len(), 6);
    let mut previous = (10, 10);
    for cell in path {
        assert_eq!(cell.0.abs_diff(previous.0) + cell.1.abs_diff(previous.1), 1);
        previous = cell;
    }
}

#[test]
fn test_diagonal_steps_never_cut_wall_corners() {
    // Walls at (15,10) and (16,11) pinch the diagonal between (15,11) and (16,10)
    let mut map = field();
    map.collisions.push(11 * 64 + 16);
    let walls = [(15u16, 10u16), (16, 11)];
    let mut world = eight_way(map);
    let alice = join(&mut world, "alice", (15, 11), 1);
    let bob = join(&mut world, "bob", (12, 14), 1);
    world.drain_outbox();

    world.queue_action(alice, PlayerAction::Move { x: 16, y: 10 });
    let sent = run(&mut world, 20);

    assert_eq!(world.player(alice).unwrap().character.position(), (16, 10));
    let path = steps(&sent, bob, alice);
    assert!(path.len() > 1);
    let mut previous = (15, 11);
    for cell in path {
        assert!(!walls.contains(&cell));
        if cell.0 != previous.0 && cell.1 != previous.1 {
            assert!(!walls.contains(&(cell.0, previous.1)), "cut a corner from {:?} to {:?}", previous, cell);
            assert!(!walls.contains(&(previous.0, cell.1)), "cut a corner from {:?} to {:?}", previous, cell);
        }
        previous = cell;
    }
}

#[test]
fn test_static_mob_dies_once_and_respawns() {
    let mut world = world();
    let alice = join(&mut world, "alice", (10, 10), 5);
    let rat = world.spawn_mob("rat", 11, 10, true).unwrap();
    world.mobs.get_mut(&rat).unwrap().character.hit_points = 1;
    world.drain_outbox();

    world.queue_action(alice, PlayerAction::Move { x: 11, y: 10 });
    let sent = run(&mut world, 40);

    let despawns = received(&sent, alice).into_iter().filter(|m| **m == ServerMessage::Despawn(rat)).count();
    assert_eq!(despawns, 1);
    assert!(world.mob(rat).is_none());
    assert!(world.scheduler.pending(&Task::RespawnMob { key: "rat".into(), x: 11, y: 10 }));

    let player = world.player(alice).unwrap();
    assert_eq!(player.experience, level_experience(5) + 10);
    assert_eq!(player.character.target, None);
    assert!(received(&sent, alice).into_iter().any(|m| {
        matches!(m, ServerMessage::Combat { kind: CombatOpcode::Finish, target, .. } if *target == rat)
    }));
}

#[test]
fn test_spawned_mob_stays_dead() {
    let mut world = world();
    let rat = world.spawn_mob("rat", 11, 10, false).unwrap();
    assert!(world.kill_entity(rat));
    assert!(!world.kill_entity(rat));
    assert!(!world.scheduler.pending(&Task::RespawnMob { key: "rat".into(), x: 11, y: 10 }));
}

#[test]
fn test_no_respawn_with_negative_delay() {
    let mut content = content_with(field());
    content.mobs.get_mut("rat").unwrap().respawn_delay = -1;
    let mut world = build(content);

    let rat = world.spawn_mob("rat", 11, 10, true).unwrap();
    world.kill_entity(rat);
    assert!(!world.scheduler.pending(&Task::RespawnMob { key: "rat".into(), x: 11, y: 10 }));
    assert!(world.scheduler.pending(&Task::RemoveMob(rat)));
}

#[test]
fn test_leashed_mob_releases_its_attackers() {
    let mut world = world();
    let alice = join(&mut world, "alice", (10, 10), 5);
    let rat = world.spawn_mob("rat", 11, 10, true).unwrap();
    {
        let mob = world.mobs.get_mut(&rat).unwrap();
        mob.character.max_hit_points = 10_000;
        mob.character.hit_points = 10_000;
    }
    world.queue_action(alice, PlayerAction::Move { x: 11, y: 10 });
    for _ in 0..10 {
        run(&mut world, 1);
        if world.mob(rat).unwrap().character.target == Some(alice) {
            break;
        }
    }
    assert_eq!(world.mob(rat).unwrap().character.target, Some(alice));

    world.mobs.get_mut(&rat).unwrap().spawn = (50, 25);
    let sent = run(&mut world, 1);

    let finished = received(&sent, alice).into_iter().any(|m| {
        matches!(m, ServerMessage::Combat { kind: CombatOpcode::Finish, target, .. } if *target == rat)
    });
    assert!(finished);
    let player = world.player(alice).unwrap();
    assert_eq!(player.character.target, None);
    assert!(!player.character.attackers.contains(&rat));
    let mob = world.mob(rat).unwrap();
    assert_eq!(mob.character.position(), (50, 25));
    assert_eq!(mob.character.hit_points, mob.character.max_hit_points);
}

#[test]
fn test_stun_lasts_its_full_duration_even_when_reapplied() {
    let mut world = world();
    let alice = join(&mut world, "alice", (10, 10), 1);
    let bob = join(&mut world, "bob", (12, 10), 1);
    let duration = world.config.ms_to_ticks(world.config.stun_duration_ms) as usize;

    world.stun(alice);
    run(&mut world, duration - 1);
    assert!(world.player(alice).unwrap().character.stunned);

    // Second stun lands just before the first one would end
    world.stun(alice);
    let sent = run(&mut world, duration - 1);
    assert!(world.player(alice).unwrap().character.stunned);
    assert!(!sent
        .iter()
        .any(|(_, m)| matches!(m, ServerMessage::Movement(MovementUpdate::Stunned { state: false, .. }))));

    let sent = run(&mut world, 1);
    assert!(!world.player(alice).unwrap().character.stunned);
    let released = received(&sent, bob).into_iter().any(|m| {
        matches!(m, ServerMessage::Movement(MovementUpdate::Stunned { id, state: false }) if *id == alice)
    });
    assert!(released);
}

#[test]
fn test_refreeze_extends_the_freeze() {
    let mut world = world();
    let alice = join(&mut world, "alice", (10, 10), 1);
    let bob = join(&mut world, "bob", (12, 10), 1);
    let duration = world.config.ms_to_ticks(world.config.freeze_duration_ms) as usize;

    assert!(world.freeze(alice));
    run(&mut world, duration / 2);
    assert!(world.freeze(alice));

    // Past the first freeze's expiry, still held by the second
    run(&mut world, duration / 2 + 1);
    assert!(world.player(alice).unwrap().character.frozen);
    world.queue_action(alice, PlayerAction::Move { x: 10, y: 12 });
    run(&mut world, 1);
    assert_eq!(world.player(alice).unwrap().character.position(), (10, 10));

    let sent = run(&mut world, duration / 2);
    assert!(!world.player(alice).unwrap().character.frozen);
    let thawed = received(&sent, bob).into_iter().any(|m| {
        matches!(m, ServerMessage::Movement(MovementUpdate::Freeze { id, state: false }) if *id == alice)
    });
    assert!(thawed);
}

#[test]
fn test_terror_mark_wears_off() {
    let mut world = world();
    let alice = join(&mut world, "alice", (10, 10), 5);
    let rat = world.spawn_mob("rat", 11, 10, false).unwrap();
    {
        let mob = world.mobs.get_mut(&rat).unwrap();
        mob.character.max_hit_points = 10_000;
        mob.character.hit_points = 10_000;
    }
    let duration = world.config.ms_to_ticks(world.config.terror_duration_ms);

    world.apply_hit(alice, rat, Hit::new(HitKind::Explosive, 1).splash());
    assert!(world.mob(rat).unwrap().character.terror);
    assert!(world.scheduler.pending(&Task::ClearTerror(rat)));

    run(&mut world, duration as usize);
    assert!(!world.mob(rat).unwrap().character.terror);
}

#[test]
fn test_ranged_attack_launches_projectile() {
    let mut world = world();
    let mut archer = player(&mut world, "archer", (10, 10), 5);
    let bow = world.content.item("bow1").unwrap().clone();
    let slot = archer.inventory.add(&bow, 1, Enchantment::None, 0).unwrap();
    let archer_id = archer.id();
    world.add_player(archer).unwrap();

    world.queue_action(archer_id, PlayerAction::InventorySelect(slot as u32));
    run(&mut world, 1);
    {
        let archer = world.player(archer_id).unwrap();
        assert_eq!(archer.character.attack_range, world.config.ranged_attack_range);
        assert!(archer.inventory.contains("sword1"));
        assert!(!archer.inventory.contains("bow1"));
    }

    let rat = world.spawn_mob("rat", 14, 10, false).unwrap();
    world.queue_action(archer_id, PlayerAction::Attack(rat));
    run(&mut world, 1);
    assert_eq!(world.projectiles.len(), 1);
    assert_eq!(world.player(archer_id).unwrap().character.position(), (10, 10));

    let ticks = world.config.projectile_travel_ticks as usize;
    let sent = run(&mut world, ticks);
    assert!(world.projectiles.is_empty());
    let landed = received(&sent, archer_id).into_iter().any(|m| {
        matches!(m, ServerMessage::Combat { kind: CombatOpcode::Hit, target, hit: Some(hit), .. }
            if *target == rat && hit.is_ranged)
    });
    assert!(landed);
    let rat = world.mob(rat).unwrap();
    assert!(rat.character.hit_points < rat.character.max_hit_points);
}

#[test]
fn test_equip_checks_level() {
    let mut world = world();
    let mut novice = player(&mut world, "novice", (10, 10), 1);
    let bow = world.content.item("bow1").unwrap().clone();
    let slot = novice.inventory.add(&bow, 1, Enchantment::None, 0).unwrap();
    let novice_id = novice.id();
    world.add_player(novice).unwrap();

    world.queue_action(novice_id, PlayerAction::InventorySelect(slot as u32));
    let sent = run(&mut world, 1);

    assert!(notified(&sent, novice_id, "You need to be level 3 to equip this item."));
    let novice = world.player(novice_id).unwrap();
    assert!(novice.inventory.contains("bow1"));
    assert_eq!(novice.character.attack_range, 1);
}

#[test]
fn test_unequip_returns_weapon() {
    let mut world = world();
    let alice = join(&mut world, "alice", (10, 10), 1);

    world.queue_action(alice, PlayerAction::Unequip(EquipmentSlot::Weapon));
    run(&mut world, 1);
    assert!(world.player(alice).unwrap().inventory.contains("sword1"));
}

// -----------------------------------------------------------------------------
// Regions
// -----------------------------------------------------------------------------

#[test]
fn test_spawn_seen_by_adjacent_regions_only() {
    let mut world = world();
    let near = join(&mut world, "near", (2, 2), 1);
    let beside = join(&mut world, "beside", (20, 2), 1);
    let far = join(&mut world, "far", (50, 2), 1);
    world.drain_outbox();

    let rat = world.spawn_mob("rat", 5, 5, false).unwrap();
    let sent = world.drain_outbox();
    let saw = |id| {
        received(&sent, id).into_iter().any(|m| matches!(m, ServerMessage::Spawn(state) if state.instance == rat))
    };

    assert!(saw(near));
    assert!(saw(beside));
    assert!(!saw(far));
}

#[test]
fn test_region_change_waits_for_hysteresis() {
    let mut world = world();
    let alice = join(&mut world, "alice", (14, 2), 1);
    assert_eq!(world.groups.group_id(alice), Some(0));

    world.queue_action(alice, PlayerAction::Move { x: 17, y: 2 });
    run(&mut world, 10);
    assert_eq!(world.player(alice).unwrap().character.position(), (17, 2));
    assert_eq!(world.groups.group_id(alice), Some(0));

    world.queue_action(alice, PlayerAction::Move { x: 24, y: 2 });
    run(&mut world, 15);
    assert_eq!(world.groups.group_id(alice), Some(1));
    assert_eq!(world.player(alice).unwrap().group_anchor, (24, 2));
}

#[test]
fn test_region_change_spawns_for_new_viewers() {
    let mut world = world();
    let walker = join(&mut world, "walker", (2, 2), 1);
    let watcher = join(&mut world, "watcher", (40, 2), 1);
    world.drain_outbox();

    world.queue_action(walker, PlayerAction::Move { x: 14, y: 2 });
    let sent = run(&mut world, 20);

    // Region 0 does not border the watcher's region 2
    assert_eq!(world.groups.group_id(walker), Some(0));
    assert!(!received(&sent, watcher).into_iter().any(|m| matches!(m, ServerMessage::Spawn(s) if s.instance == walker)));

    world.queue_action(walker, PlayerAction::Move { x: 24, y: 2 });
    let sent = run(&mut world, 20);
    assert_eq!(world.groups.group_id(walker), Some(1));
    assert!(received(&sent, watcher).into_iter().any(|m| matches!(m, ServerMessage::Spawn(s) if s.instance == walker)));
}

// -----------------------------------------------------------------------------
// Items, NPCs and quests
// -----------------------------------------------------------------------------

#[test]
fn test_walks_over_and_picks_up_item() {
    let mut world = world();
    let alice = join(&mut world, "alice", (10, 10), 1);
    let burger = world.drop_item("burger", 2, Enchantment::None, 0, 13, 10).unwrap();
    world.drain_outbox();

    world.queue_action(alice, PlayerAction::Move { x: 13, y: 10 });
    let sent = run(&mut world, 10);

    let player = world.player(alice).unwrap();
    assert_eq!(player.character.position(), (13, 10));
    assert!(player.inventory.contains("burger"));
    assert!(world.items.is_empty());
    assert!(received(&sent, alice).into_iter().any(|m| *m == ServerMessage::Despawn(burger)));
    assert!(received(&sent, alice).into_iter().any(|m| matches!(m, ServerMessage::Inventory(ContainerUpdate::Add(_)))));
}

#[test]
fn test_item_expires() {
    let mut world = world();
    world.drop_item("gold", 5, Enchantment::None, 0, 20, 20).unwrap();
    let lifetime = world.config.ms_to_ticks(world.config.item_lifetime_ms) as usize;

    run(&mut world, lifetime - 1);
    assert_eq!(world.items.len(), 1);
    run(&mut world, 1);
    assert!(world.items.is_empty());
}

#[test]
fn test_quest_runs_through_the_guard() {
    let mut map = field();
    map.npcs.push(EntitySpawn { key: "guard".into(), x: 12, y: 10 });
    let mut world = build(content_with(map));
    let guard = world.npc_by_key("guard").unwrap();

    let alice = join(&mut world, "alice", (10, 10), 1);
    let sent = world.drain_outbox();
    assert!(received(&sent, alice)
        .into_iter()
        .any(|m| *m == ServerMessage::Pointer(realm_shared::PointerUpdate::Npc(guard))));

    let talk = |world: &mut World| {
        world.queue_action(alice, PlayerAction::Move { x: 12, y: 10 });
        run(world, 5)
    };
    let said = |sent: &Sent| received(sent, alice).into_iter().any(|m| matches!(m, ServerMessage::Npc(NpcUpdate::Talk(_))));

    // Walks next to the guard, then talks on arrival
    assert!(said(&talk(&mut world)));
    assert_eq!(world.player(alice).unwrap().character.position(), (11, 10));
    assert!(said(&talk(&mut world)));

    let sent = talk(&mut world);
    let progressed = |sent: &Sent, stage| {
        received(sent, alice)
            .into_iter()
            .any(|m| *m == ServerMessage::Quest(QuestUpdate::Progress(QuestProgress { id: 0, stage })))
    };
    assert!(progressed(&sent, 1));

    // No slime yet: the guard only repeats itself
    let sent = talk(&mut world);
    assert!(said(&sent));
    assert!(!progressed(&sent, 2));

    let slime = world.content.item("slime").unwrap().clone();
    world.players.get_mut(&alice).unwrap().inventory.add(&slime, 1, Enchantment::None, 0);
    let sent = talk(&mut world);
    assert!(progressed(&sent, 2));
    assert!(!world.player(alice).unwrap().inventory.contains("slime"));
}

#[test]
fn test_bank_needs_a_banker() {
    let mut map = field();
    map.npcs.push(EntitySpawn { key: "banker".into(), x: 30, y: 10 });
    let mut world = build(content_with(map));

    let mut alice = player(&mut world, "alice", (10, 10), 1);
    let burger = world.content.item("burger").unwrap().clone();
    alice.inventory.add(&burger, 3, Enchantment::None, 0);
    let alice_id = alice.id();
    world.add_player(alice).unwrap();

    let deposit = PlayerAction::BankSelect { container: realm_shared::ContainerType::Inventory, index: 0 };
    world.queue_action(alice_id, deposit.clone());
    let sent = run(&mut world, 1);
    assert!(notified(&sent, alice_id, "You need to be next to a banker."));

    world.queue_action(alice_id, PlayerAction::Move { x: 30, y: 10 });
    let sent = run(&mut world, 30);
    assert!(received(&sent, alice_id).into_iter().any(|m| *m == ServerMessage::Npc(NpcUpdate::Bank)));

    world.queue_action(alice_id, deposit);
    run(&mut world, 1);
    let alice = world.player(alice_id).unwrap();
    assert!(alice.bank.contains("burger"));
    assert!(!alice.inventory.contains("burger"));
}

/// Two static rats guarding a chest area at (20,2)-(27,7), chest at (24,4)
fn guarded(respawn_delay: i64) -> World {
    let mut map = field();
    map.mobs = vec![
        EntitySpawn { key: "rat".into(), x: 21, y: 3 },
        EntitySpawn { key: "rat".into(), x: 26, y: 6 },
    ];
    map.chest_areas = vec![ChestArea {
        area: Area { x: 20, y: 2, width: 8, height: 6 },
        chest: Point { x: 24, y: 4 },
        items: vec!["flask".into()],
    }];
    let mut content = content_with(map);
    content.mobs.get_mut("rat").unwrap().respawn_delay = respawn_delay;
    build(content)
}

fn guards(world: &World) -> Vec<InstanceId> {
    let mut ids: Vec<InstanceId> = world.chest_areas[0].guards.iter().copied().collect();
    ids.sort_unstable();
    ids
}

#[test]
fn test_clearing_a_chest_area_reveals_its_chest() {
    let mut world = guarded(15_000);
    let alice = join(&mut world, "alice", (23, 4), 5);
    world.drain_outbox();
    let rats = guards(&world);
    assert_eq!(rats.len(), 2);

    world.kill_entity(rats[0]);
    assert!(world.chests.is_empty());

    world.kill_entity(rats[1]);
    let sent = world.drain_outbox();
    let chest = world.chests.values().next().unwrap();
    let chest_id = chest.id;
    assert_eq!(chest.origin, ChestOrigin::Area(0));
    assert_eq!(chest.position(), (24, 4));
    assert_eq!(world.chest_areas[0].chest, Some(chest_id));
    assert!(received(&sent, alice)
        .into_iter()
        .any(|m| matches!(m, ServerMessage::Spawn(state) if state.instance == chest_id)));

    // Looting does not schedule a timed respawn; the area has to be cleared again
    world.queue_action(alice, PlayerAction::Move { x: 24, y: 4 });
    run(&mut world, 1);
    assert!(world.chests.is_empty());
    assert!(world.chest_areas[0].chest.is_none());
    assert!(!world.scheduler.pending(&Task::RespawnChest { spawn_index: 0 }));
    assert!(world.items.values().any(|item| item.key == "flask"));
}

#[test]
fn test_returning_guards_take_the_chest_back() {
    let mut world = guarded(100);
    for rat in guards(&world) {
        world.kill_entity(rat);
    }
    assert_eq!(world.chests.len(), 1);
    assert!(guards(&world).is_empty());

    run(&mut world, 3);

    assert_eq!(guards(&world).len(), 2);
    assert!(world.chests.is_empty());
    assert!(world.chest_areas[0].chest.is_none());
}

#[test]
fn test_spawned_mobs_do_not_guard_chest_areas() {
    let mut world = guarded(15_000);
    let extra = world.spawn_mob("rat", 22, 5, false).unwrap();
    assert!(!guards(&world).contains(&extra));

    for rat in guards(&world) {
        world.kill_entity(rat);
    }
    assert_eq!(world.chests.len(), 1);
    assert!(!world.mob(extra).unwrap().character.dead);
}

// -----------------------------------------------------------------------------
// Players
// -----------------------------------------------------------------------------

#[test]
fn test_players_fight_only_in_pvp() {
    let mut world = world();
    let alice = join(&mut world, "alice", (10, 10), 1);
    let bob = join(&mut world, "bob", (11, 10), 1);
    world.queue_action(alice, PlayerAction::Attack(bob));
    let sent = run(&mut world, 1);
    assert!(notified(&sent, alice, "You can only attack players inside a PvP area."));
    assert_eq!(world.player(alice).unwrap().character.target, None);

    let carol = join(&mut world, "carol", (45, 20), 1);
    let dave = join(&mut world, "dave", (46, 20), 1);
    assert!(world.player(carol).unwrap().character.pvp);
    world.queue_action(carol, PlayerAction::Attack(dave));
    run(&mut world, 1);
    assert_eq!(world.player(carol).unwrap().character.target, Some(dave));
    assert!(world.player(dave).unwrap().character.hit_points < world.player(dave).unwrap().character.max_hit_points);
}

#[test]
fn test_dead_player_stays_until_respawn() {
    let mut world = world();
    let alice = join(&mut world, "alice", (10, 10), 1);
    let bob = join(&mut world, "bob", (12, 10), 1);
    world.drain_outbox();

    assert!(world.kill_entity(alice));
    let sent = world.drain_outbox();
    assert!(received(&sent, alice).into_iter().any(|m| *m == ServerMessage::Death(alice)));
    assert!(received(&sent, bob).into_iter().any(|m| *m == ServerMessage::Despawn(alice)));
    assert!(world.player(alice).unwrap().character.dead);
    assert!(!world.grid.contains(alice));
    assert_eq!(world.groups.group_id(alice), Some(0));

    // Moves are ignored while dead
    world.queue_action(alice, PlayerAction::Move { x: 11, y: 11 });
    world.queue_action(alice, PlayerAction::Respawn);
    let sent = run(&mut world, 1);

    let spawn = world.content.map.spawn;
    assert!(received(&sent, alice)
        .into_iter()
        .any(|m| *m == ServerMessage::Respawn { id: alice, x: spawn.x, y: spawn.y }));
    let player = world.player(alice).unwrap();
    assert!(!player.character.dead);
    assert!(player.character.is_full_health());
    assert_eq!(player.character.position(), (spawn.x, spawn.y));
}

#[test]
fn test_respawn_steps_aside_from_an_occupied_spawn() {
    let mut world = world();
    let spawn = world.content.map.spawn;
    join(&mut world, "camper", (spawn.x, spawn.y), 1);
    let alice = join(&mut world, "alice", (10, 10), 1);
    world.kill_entity(alice);

    world.queue_action(alice, PlayerAction::Respawn);
    run(&mut world, 1);

    let player = world.player(alice).unwrap();
    assert!(!player.character.dead);
    assert_eq!(player.character.position(), (spawn.x + 1, spawn.y));
    assert_eq!(world.grid.position_of(alice), Some((spawn.x + 1, spawn.y)));
}

#[test]
fn test_respawn_waits_while_spawn_is_surrounded() {
    let mut world = world();
    let spawn = world.content.map.spawn;
    for dx in 0..3u16 {
        for dy in 0..3u16 {
            let name = format!("camper{}{}", dx, dy);
            join(&mut world, &name, (spawn.x + dx - 1, spawn.y + dy - 1), 1);
        }
    }
    let alice = join(&mut world, "alice", (10, 10), 1);
    world.kill_entity(alice);
    world.drain_outbox();

    world.queue_action(alice, PlayerAction::Respawn);
    let sent = run(&mut world, 1);

    assert!(notified(&sent, alice, "The spawn point is crowded, try again in a moment."));
    assert!(world.player(alice).unwrap().character.dead);
    assert!(!world.grid.contains(alice));
}

#[test]
fn test_leaving_clears_targets() {
    let mut world = world();
    let alice = join(&mut world, "alice", (10, 10), 5);
    let rat = world.spawn_mob("rat", 11, 10, false).unwrap();
    world.queue_action(alice, PlayerAction::Attack(rat));
    run(&mut world, 1);
    assert_eq!(world.mob(rat).unwrap().character.target, Some(alice));

    let player = world.remove_player(alice).unwrap();
    assert!(player.character.target.is_none());
    assert!(world.mob(rat).unwrap().character.target.is_none());
    assert!(!world.grid.contains(alice));
    assert_eq!(world.population(), 0);
}

#[test]
fn test_chat_reaches_region_or_everyone() {
    let mut world = world();
    let alice = join(&mut world, "alice", (2, 2), 1);
    let far = join(&mut world, "far", (50, 2), 1);
    world.drain_outbox();

    world.queue_action(alice, PlayerAction::Chat("hello there".into()));
    let sent = run(&mut world, 1);
    assert!(received(&sent, alice).into_iter().any(|m| matches!(m, ServerMessage::Chat(c) if c.text == "hello there")));
    assert!(!received(&sent, far).into_iter().any(|m| matches!(m, ServerMessage::Chat(_))));

    world.queue_action(alice, PlayerAction::Chat("@anyone about?".into()));
    let sent = run(&mut world, 1);
    assert!(received(&sent, far)
        .into_iter()
        .any(|m| matches!(m, ServerMessage::Chat(c) if c.is_global && c.text == "anyone about?")));

    world.players.get_mut(&alice).unwrap().mute = i64::MAX;
    world.queue_action(alice, PlayerAction::Chat("still here".into()));
    let sent = run(&mut world, 1);
    assert!(notified(&sent, alice, "You are currently muted."));
    assert!(!received(&sent, far).into_iter().any(|m| matches!(m, ServerMessage::Chat(_))));
}

#[test]
fn test_regeneration_heals_idle_players() {
    let mut world = world();
    let alice = join(&mut world, "alice", (10, 10), 1);
    world.players.get_mut(&alice).unwrap().character.hit_points = 5;

    let interval = world.config.ms_to_ticks(world.config.regen_interval_ms) as usize;
    let sent = run(&mut world, interval);

    assert_eq!(world.player(alice).unwrap().character.hit_points, 5 + world.config.heal_rate);
    assert!(received(&sent, alice).into_iter().any(|m| matches!(m, ServerMessage::Heal(_))));
}
