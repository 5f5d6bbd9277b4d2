//! Server-side entity definitions.

mod character;
mod chest;
mod containers;
mod equipment;
mod item;
mod mob;
mod npc;
mod player;
mod projectile;
mod quests;

pub use character::{Character, Combatant, DamageOutcome, MovementState};
pub use chest::{Chest, ChestOrigin};
pub use containers::{Container, Slot, BANK_SIZE, INVENTORY_SIZE};
pub use equipment::{Equipment, EquippedItem};
pub use item::WorldItem;
pub use mob::Mob;
pub use npc::Npc;
pub use player::{ExperienceGain, Interaction, Player};
pub use projectile::Projectile;
pub use quests::{QuestLog, QuestTalk};
