//! Chat command system for admin and player commands.

use realm_shared::{InstanceId, PointerUpdate, ServerMessage};

use crate::world::World;

/// Result of executing a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Whether the command was successful
    pub success: bool,
    /// Message to display to the user
    pub message: String,
}

impl CommandResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Parse and execute a chat command.
/// Returns None if it's not a command (doesn't start with /)
pub fn parse_and_execute(world: &mut World, player_id: InstanceId, content: &str) -> Option<CommandResult> {
    let body = content.strip_prefix('/')?;

    let parts: Vec<&str> = body.split_whitespace().collect();
    let Some((command, args)) = parts.split_first() else {
        return Some(CommandResult::error("Invalid command"));
    };
    let command = command.to_lowercase();
    let is_admin = world.player(player_id).is_some_and(|p| p.is_admin());

    let admin_only = matches!(
        command.as_str(),
        "teleport" | "tp" | "heal" | "exp" | "freeze" | "spawn" | "kill" | "pointer"
    );
    if admin_only && !is_admin {
        return Some(CommandResult::error("This command requires admin privileges"));
    }

    Some(match command.as_str() {
        // === All player commands ===
        "help" => cmd_help(is_admin),
        "coords" => cmd_coords(player_id, world),
        "players" => cmd_players(world),

        // === Admin-only commands ===
        "teleport" | "tp" => cmd_teleport(player_id, args, world),
        "heal" => cmd_heal(player_id, world),
        "exp" => cmd_exp(player_id, args, world),
        "freeze" => cmd_freeze(args, world),
        "spawn" => cmd_spawn(player_id, args, world),
        "kill" => cmd_kill(args, world),
        "pointer" => cmd_pointer(player_id, args, world),

        _ => CommandResult::error(format!("Unknown command: /{}", command)),
    })
}

fn parse_id(args: &[&str]) -> Option<InstanceId> {
    args.first()?.parse().ok()
}

fn parse_position(args: &[&str]) -> Option<(u16, u16)> {
    match args {
        [x, y, ..] => Some((x.parse().ok()?, y.parse().ok()?)),
        _ => None,
    }
}

fn cmd_help(is_admin: bool) -> CommandResult {
    let mut help = String::from("Commands: /help, /coords, /players");
    if is_admin {
        help.push_str(
            ", /teleport <x> <y>, /heal, /exp <amount>, /freeze <id>, /spawn <mob>, /kill <id>, /pointer <x> <y>",
        );
    }
    CommandResult::success(help)
}

fn cmd_coords(player_id: InstanceId, world: &World) -> CommandResult {
    match world.player(player_id) {
        Some(player) => {
            let (x, y) = player.character.position();
            CommandResult::success(format!("Position: {}, {}", x, y))
        }
        None => CommandResult::error("Player not found"),
    }
}

fn cmd_players(world: &World) -> CommandResult {
    let mut names: Vec<&str> = world.players().map(|p| p.username.as_str()).collect();
    names.sort_unstable();
    CommandResult::success(format!("{} online: {}", names.len(), names.join(", ")))
}

fn cmd_teleport(player_id: InstanceId, args: &[&str], world: &mut World) -> CommandResult {
    let Some((x, y)) = parse_position(args) else {
        return CommandResult::error("Usage: /teleport <x> <y>");
    };
    match world.teleport(player_id, x, y) {
        Ok(()) => CommandResult::success(format!("Teleported to {}, {}", x, y)),
        Err(error) => CommandResult::error(format!("Cannot teleport: {}", error)),
    }
}

fn cmd_heal(player_id: InstanceId, world: &mut World) -> CommandResult {
    if world.restore(player_id) {
        CommandResult::success("Fully healed")
    } else {
        CommandResult::error("Cannot heal right now")
    }
}

fn cmd_exp(player_id: InstanceId, args: &[&str], world: &mut World) -> CommandResult {
    let Some(amount) = args.first().and_then(|a| a.parse::<u64>().ok()) else {
        return CommandResult::error("Usage: /exp <amount>");
    };
    world.grant_experience(player_id, amount);
    CommandResult::success(format!("Gained {} experience", amount))
}

fn cmd_freeze(args: &[&str], world: &mut World) -> CommandResult {
    let Some(target) = parse_id(args) else {
        return CommandResult::error("Usage: /freeze <id>");
    };
    if world.freeze(target) {
        CommandResult::success(format!("Froze {}", target))
    } else {
        CommandResult::error(format!("No living character with id {}", target))
    }
}

fn cmd_spawn(player_id: InstanceId, args: &[&str], world: &mut World) -> CommandResult {
    let Some(key) = args.first() else {
        return CommandResult::error("Usage: /spawn <mob>");
    };
    let Some(origin) = world.player(player_id).map(|p| p.character.position()) else {
        return CommandResult::error("Player not found");
    };
    let Some((x, y)) = world.free_cell_near(origin) else {
        return CommandResult::error("No free cell nearby");
    };
    match world.spawn_mob(key, x, y, false) {
        Some(id) => CommandResult::success(format!("Spawned {} ({}) at {}, {}", key, id, x, y)),
        None => CommandResult::error(format!("Unknown mob: {}", key)),
    }
}

fn cmd_kill(args: &[&str], world: &mut World) -> CommandResult {
    let Some(target) = parse_id(args) else {
        return CommandResult::error("Usage: /kill <id>");
    };
    if world.kill_entity(target) {
        CommandResult::success(format!("Killed {}", target))
    } else {
        CommandResult::error(format!("No living character with id {}", target))
    }
}

fn cmd_pointer(player_id: InstanceId, args: &[&str], world: &mut World) -> CommandResult {
    let Some((x, y)) = parse_position(args) else {
        return CommandResult::error("Usage: /pointer <x> <y>");
    };
    world.send_to(player_id, ServerMessage::Pointer(PointerUpdate::Location { x, y }));
    CommandResult::success(String::new())
}
