//! Per-player quest progress.

use std::collections::BTreeMap;

use realm_shared::QuestInfo;

use crate::content::{Content, QuestDef, QuestTask};

use super::Npc;

/// What talking to a quest NPC did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestTalk {
    /// Show a dialogue line
    Line(String),
    /// The current stage is done; `consume` names an item to hand over
    Advance { consume: Option<String> },
}

/// Quest id to stage reached
#[derive(Debug, Clone, Default)]
pub struct QuestLog {
    stages: BTreeMap<u32, u32>,
}

impl QuestLog {
    pub fn load(stages: &BTreeMap<u32, u32>) -> Self {
        Self { stages: stages.clone() }
    }

    pub fn stage(&self, id: u32) -> u32 {
        self.stages.get(&id).copied().unwrap_or(0)
    }

    pub fn is_finished(&self, quest: &QuestDef) -> bool {
        self.stage(quest.id) >= quest.stages()
    }

    /// Moves to the next stage, returning it
    pub fn advance(&mut self, quest: &QuestDef) -> u32 {
        let stage = (self.stage(quest.id) + 1).min(quest.stages());
        self.stages.insert(quest.id, stage);
        stage
    }

    pub fn records(&self) -> BTreeMap<u32, u32> {
        self.stages.clone()
    }

    pub fn batch(&self, content: &Content) -> Vec<QuestInfo> {
        content
            .quests
            .iter()
            .map(|quest| QuestInfo {
                id: quest.id,
                name: quest.name.clone(),
                stage: self.stage(quest.id),
                stages: quest.stages(),
                finished: self.is_finished(quest),
            })
            .collect()
    }

    /// Runs one conversation step with the quest's NPC.
    ///
    /// Returns `None` once the quest is finished so the caller falls back to
    /// the NPC's regular dialogue.
    pub fn talk(&self, quest: &QuestDef, npc: &mut Npc, has_item: impl Fn(&str) -> bool) -> Option<QuestTalk> {
        let task = quest.tasks.get(self.stage(quest.id) as usize)?;

        let step = match task {
            QuestTask::Talk { lines } => match npc.talk(lines.len()) {
                Some(index) => QuestTalk::Line(lines[index].clone()),
                None => QuestTalk::Advance { consume: None },
            },
            QuestTask::Item { key, lines } => {
                if has_item(key) {
                    npc.reset_talk();
                    QuestTalk::Advance { consume: Some(key.clone()) }
                } else {
                    match npc.talk(lines.len()) {
                        Some(index) => QuestTalk::Line(lines[index].clone()),
                        // Wrapped around; start the reminder over
                        None => match npc.talk(lines.len()) {
                            Some(index) => QuestTalk::Line(lines[index].clone()),
                            None => return None,
                        },
                    }
                }
            }
        };

        Some(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::NpcRole;

    fn guard() -> Npc {
        Npc::new(7, "guard", "Guard", NpcRole::Talker, 18, 12)
    }

    #[test]
    fn test_talk_stage_advances_after_last_line() {
        let content = Content::builtin().unwrap();
        let quest = content.quest(0).unwrap();
        let log = QuestLog::default();
        let mut npc = guard();

        assert!(matches!(log.talk(quest, &mut npc, |_| false), Some(QuestTalk::Line(_))));
        assert!(matches!(log.talk(quest, &mut npc, |_| false), Some(QuestTalk::Line(_))));
        assert_eq!(log.talk(quest, &mut npc, |_| false), Some(QuestTalk::Advance { consume: None }));
    }

    #[test]
    fn test_item_stage_needs_the_item() {
        let content = Content::builtin().unwrap();
        let quest = content.quest(0).unwrap();
        let mut log = QuestLog::default();
        assert_eq!(log.advance(quest), 1);
        let mut npc = guard();

        for _ in 0..3 {
            assert!(matches!(log.talk(quest, &mut npc, |_| false), Some(QuestTalk::Line(_))));
        }
        assert_eq!(
            log.talk(quest, &mut npc, |key| key == "slime"),
            Some(QuestTalk::Advance { consume: Some("slime".into()) })
        );
    }

    #[test]
    fn test_finished_quest_stops_talking() {
        let content = Content::builtin().unwrap();
        let quest = content.quest(0).unwrap();
        let mut log = QuestLog::default();
        for _ in 0..10 {
            log.advance(quest);
        }

        assert_eq!(log.stage(0), quest.stages());
        assert!(log.is_finished(quest));
        assert_eq!(log.talk(quest, &mut guard(), |_| true), None);

        let batch = log.batch(&content);
        assert!(batch[0].finished);
    }
}
