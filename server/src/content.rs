//! Static content tables: items, mobs, NPCs, quests and the map.
//!
//! Loaded once at startup and shared read-only. Every table comes from a
//! JSON file in the content directory when present and falls back to the
//! built-in definitions otherwise.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use realm_shared::{get_item_definitions, ItemDef};

use crate::map::{Map, MapData};

/// Mob template
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MobDef {
    pub key: String,
    pub name: String,
    pub hit_points: u32,
    pub level: u32,
    #[serde(default)]
    pub armour_level: u32,
    #[serde(default)]
    pub weapon_level: u32,
    #[serde(default)]
    pub aggressive: bool,
    #[serde(default = "default_aggro_range")]
    pub aggro_range: u16,
    #[serde(default = "default_attack_range")]
    pub attack_range: u16,
    #[serde(default)]
    pub experience: u64,
    /// Item key to weight out of 1000
    #[serde(default)]
    pub drops: BTreeMap<String, u32>,
    /// Milliseconds until a static mob comes back, `-1` for never
    #[serde(default = "default_respawn_delay")]
    pub respawn_delay: i64,
    /// Leash distance from the spawn point
    #[serde(default = "default_spawn_distance")]
    pub spawn_distance: u16,
    #[serde(default = "default_projectile")]
    pub projectile: String,
}

fn default_aggro_range() -> u16 {
    2
}

fn default_attack_range() -> u16 {
    1
}

fn default_respawn_delay() -> i64 {
    30_000
}

fn default_spawn_distance() -> u16 {
    7
}

/// Projectile sprite for ranged attackers that do not name their own
pub const DEFAULT_PROJECTILE: &str = "projectile-pinearrow";

fn default_projectile() -> String {
    DEFAULT_PROJECTILE.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NpcRole {
    #[default]
    Talker,
    Banker,
    Enchanter,
    Countdown,
}

/// NPC template
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpcDef {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub role: NpcRole,
    #[serde(default)]
    pub dialogue: Vec<String>,
    /// Seconds shown by countdown NPCs
    #[serde(default)]
    pub countdown: u32,
}

/// What a quest stage asks of the player
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QuestTask {
    /// Talk to the quest NPC until the dialogue runs out
    Talk { lines: Vec<String> },
    /// Bring one of an item to the quest NPC
    Item { key: String, lines: Vec<String> },
}

impl QuestTask {
    pub fn lines(&self) -> &[String] {
        match self {
            Self::Talk { lines } | Self::Item { lines, .. } => lines,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestDef {
    pub id: u32,
    pub name: String,
    /// NPC key the whole quest is run through
    pub npc: String,
    pub tasks: Vec<QuestTask>,
}

impl QuestDef {
    pub fn stages(&self) -> u32 {
        self.tasks.len() as u32
    }
}

/// All content tables
#[derive(Debug, Clone)]
pub struct Content {
    pub items: HashMap<String, ItemDef>,
    pub mobs: HashMap<String, MobDef>,
    pub npcs: HashMap<String, NpcDef>,
    pub quests: Vec<QuestDef>,
    pub map: Map,
}

impl Content {
    /// Load tables from `dir`, falling back to built-ins for missing files
    pub fn load(dir: Option<&Path>) -> Result<Self, ContentError> {
        let items: Vec<ItemDef> = read_table(dir, "items.json")?.unwrap_or_else(get_item_definitions);
        let mobs: Vec<MobDef> = read_table(dir, "mobs.json")?.unwrap_or_else(builtin_mobs);
        let npcs: Vec<NpcDef> = read_table(dir, "npcs.json")?.unwrap_or_else(builtin_npcs);
        let quests: Vec<QuestDef> = read_table(dir, "quests.json")?.unwrap_or_else(builtin_quests);
        let map_data: MapData = read_table(dir, "map.json")?.unwrap_or_else(Map::builtin_data);

        let content = Self {
            items: items.into_iter().map(|i| (i.key.clone(), i)).collect(),
            mobs: mobs.into_iter().map(|m| (m.key.clone(), m)).collect(),
            npcs: npcs.into_iter().map(|n| (n.key.clone(), n)).collect(),
            quests,
            map: Map::from_data(map_data)?,
        };
        content.validate()?;

        info!(
            "Loaded content: {} items, {} mobs, {} npcs, {} quests, map {}x{}",
            content.items.len(),
            content.mobs.len(),
            content.npcs.len(),
            content.quests.len(),
            content.map.width,
            content.map.height
        );

        Ok(content)
    }

    /// Built-in tables only
    pub fn builtin() -> Result<Self, ContentError> {
        Self::load(None)
    }

    fn validate(&self) -> Result<(), ContentError> {
        for spawn in &self.map.mobs {
            if !self.mobs.contains_key(&spawn.key) {
                return Err(ContentError::Invalid(format!("map spawns unknown mob '{}'", spawn.key)));
            }
        }
        for spawn in &self.map.npcs {
            if !self.npcs.contains_key(&spawn.key) {
                return Err(ContentError::Invalid(format!("map spawns unknown npc '{}'", spawn.key)));
            }
        }
        for chest in &self.map.chests {
            if let Some(key) = chest.items.iter().find(|k| !self.items.contains_key(*k)) {
                return Err(ContentError::Invalid(format!("chest holds unknown item '{}'", key)));
            }
        }
        for mob in self.mobs.values() {
            if let Some(key) = mob.drops.keys().find(|k| !self.items.contains_key(*k)) {
                return Err(ContentError::Invalid(format!("mob '{}' drops unknown item '{}'", mob.key, key)));
            }
            let total: u32 = mob.drops.values().sum();
            if total > 1000 {
                return Err(ContentError::Invalid(format!("mob '{}' drop weights exceed 1000", mob.key)));
            }
        }
        for quest in &self.quests {
            if !self.npcs.contains_key(&quest.npc) {
                return Err(ContentError::Invalid(format!("quest {} uses unknown npc '{}'", quest.id, quest.npc)));
            }
            if quest.tasks.is_empty() {
                return Err(ContentError::Invalid(format!("quest {} has no tasks", quest.id)));
            }
            for task in &quest.tasks {
                if let QuestTask::Item { key, .. } = task {
                    if !self.items.contains_key(key) {
                        return Err(ContentError::Invalid(format!("quest {} needs unknown item '{}'", quest.id, key)));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn item(&self, key: &str) -> Option<&ItemDef> {
        self.items.get(key)
    }

    pub fn quest(&self, id: u32) -> Option<&QuestDef> {
        self.quests.iter().find(|q| q.id == id)
    }

    /// Quest run through the given NPC, if any
    pub fn quest_for_npc(&self, npc_key: &str) -> Option<&QuestDef> {
        self.quests.iter().find(|q| q.npc == npc_key)
    }
}

fn read_table<T: DeserializeOwned>(dir: Option<&Path>, file: &str) -> Result<Option<T>, ContentError> {
    let Some(dir) = dir else {
        return Ok(None);
    };

    let path = dir.join(file);
    if !path.exists() {
        warn!("{} not found, using built-in table", path.display());
        return Ok(None);
    }

    let text = std::fs::read_to_string(&path)
        .map_err(|e| ContentError::Io(path.display().to_string(), e.to_string()))?;
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| ContentError::Parse(path.display().to_string(), e.to_string()))
}

fn builtin_mobs() -> Vec<MobDef> {
    let mob = |key: &str, name: &str, hit_points: u32, level: u32| MobDef {
        key: key.into(),
        name: name.into(),
        hit_points,
        level,
        armour_level: 0,
        weapon_level: 0,
        aggressive: false,
        aggro_range: default_aggro_range(),
        attack_range: default_attack_range(),
        experience: 0,
        drops: BTreeMap::new(),
        respawn_delay: default_respawn_delay(),
        spawn_distance: default_spawn_distance(),
        projectile: default_projectile(),
    };
    let drops = |entries: &[(&str, u32)]| -> BTreeMap<String, u32> {
        entries.iter().map(|(k, w)| (k.to_string(), *w)).collect()
    };

    vec![
        MobDef {
            experience: 10,
            drops: drops(&[("gold", 400), ("burger", 150), ("slime", 150)]),
            respawn_delay: 15_000,
            ..mob("rat", "Rat", 25, 1)
        },
        MobDef {
            aggressive: true,
            aggro_range: 3,
            armour_level: 1,
            weapon_level: 2,
            experience: 45,
            drops: drops(&[("gold", 500), ("flask", 150), ("sword2", 30), ("leatherarmor", 30)]),
            ..mob("goblin", "Goblin", 70, 5)
        },
        MobDef {
            aggressive: true,
            aggro_range: 5,
            attack_range: 5,
            weapon_level: 2,
            experience: 60,
            drops: drops(&[("gold", 500), ("bow1", 50), ("manaflask", 100)]),
            projectile: "projectile-arrow".into(),
            ..mob("skeletonarcher", "Skeleton Archer", 60, 7)
        },
    ]
}

fn builtin_npcs() -> Vec<NpcDef> {
    vec![
        NpcDef {
            key: "guard".into(),
            name: "Guard".into(),
            role: NpcRole::Talker,
            dialogue: vec![
                "Stay out of trouble.".into(),
                "The field to the east is crawling with rats.".into(),
            ],
            countdown: 0,
        },
        NpcDef {
            key: "banker".into(),
            name: "Banker".into(),
            role: NpcRole::Banker,
            dialogue: vec!["Your valuables are safe with me.".into()],
            countdown: 0,
        },
        NpcDef {
            key: "enchanter".into(),
            name: "Enchanter".into(),
            role: NpcRole::Enchanter,
            dialogue: vec!["Bring me shards and I will sharpen your blade.".into()],
            countdown: 0,
        },
    ]
}

fn builtin_quests() -> Vec<QuestDef> {
    vec![QuestDef {
        id: 0,
        name: "Bulky Situation".into(),
        npc: "guard".into(),
        tasks: vec![
            QuestTask::Talk {
                lines: vec![
                    "Psst, over here.".into(),
                    "The rats ate my lunch. Could you fetch me a slime ball?".into(),
                ],
            },
            QuestTask::Item {
                key: "slime".into(),
                lines: vec!["The rats in the field drop them.".into()],
            },
            QuestTask::Talk {
                lines: vec!["Much obliged. Here, the town is safer with you around.".into()],
            },
        ],
    }]
}

/// Content loading errors
#[derive(Debug)]
pub enum ContentError {
    Io(String, String),
    Parse(String, String),
    Invalid(String),
}

impl fmt::Display for ContentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(path, e) => write!(f, "Failed to read {}: {}", path, e),
            Self::Parse(path, e) => write!(f, "Failed to parse {}: {}", path, e),
            Self::Invalid(msg) => write!(f, "Invalid content: {}", msg),
        }
    }
}

impl std::error::Error for ContentError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_content_is_consistent() {
        let content = Content::builtin().unwrap();
        assert!(content.item("gold").is_some());
        assert_eq!(content.mobs["rat"].projectile, "projectile-pinearrow");
        assert_eq!(content.quest_for_npc("guard").map(|q| q.id), Some(0));
        assert_eq!(content.quest(0).unwrap().stages(), 3);
    }

    #[test]
    fn test_mob_def_defaults() {
        let def: MobDef = serde_json::from_str(
            r#"{"key": "bat", "name": "Bat", "hitPoints": 10, "level": 2, "drops": {"gold": 100}}"#,
        )
        .unwrap();
        assert_eq!(def.attack_range, 1);
        assert_eq!(def.respawn_delay, 30_000);
        assert_eq!(def.projectile, "projectile-pinearrow");
        assert!(!def.aggressive);
    }

    #[test]
    fn test_quest_task_tagging() {
        let task: QuestTask =
            serde_json::from_str(r#"{"type": "item", "key": "slime", "lines": ["bring it"]}"#).unwrap();
        assert_eq!(task, QuestTask::Item { key: "slime".into(), lines: vec!["bring it".into()] });
    }

    #[test]
    fn test_missing_directory_falls_back_to_builtins() {
        let dir = std::env::temp_dir().join("realm-content-that-does-not-exist");
        let content = Content::load(Some(&dir)).unwrap();
        assert_eq!(content.map.width, 64);
    }

    #[test]
    fn test_overrides_from_directory() {
        let dir = std::env::temp_dir().join(format!("realm-content-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("npcs.json"),
            r#"[{"key": "guard", "name": "Captain"}, {"key": "banker", "name": "Banker", "role": "banker"},
                {"key": "enchanter", "name": "Enchanter", "role": "enchanter"}]"#,
        )
        .unwrap();

        let content = Content::load(Some(&dir)).unwrap();
        assert_eq!(content.npcs["guard"].name, "Captain");
        assert_eq!(content.npcs["banker"].role, NpcRole::Banker);

        std::fs::write(dir.join("mobs.json"), "not json").unwrap();
        assert!(matches!(Content::load(Some(&dir)), Err(ContentError::Parse(_, _))));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
