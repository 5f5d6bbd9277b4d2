//! Tick-based timers drained by the world loop.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use realm_shared::InstanceId;

/// Deferred world work. Tasks naming ids that are gone by the time they
/// fire do nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    RespawnMob { key: String, x: u16, y: u16 },
    /// Death animation finished; drop the record
    RemoveMob(InstanceId),
    ExpireItem(InstanceId),
    ProjectileImpact(InstanceId),
    ClearStun(InstanceId),
    ClearFreeze(InstanceId),
    ClearTerror(InstanceId),
    RespawnChest { spawn_index: usize },
    /// Recurring player regeneration
    Regenerate,
}

/// Min-heap of tasks by due tick, insertion order breaking ties
#[derive(Default)]
pub struct Scheduler {
    queue: BinaryHeap<Reverse<(u64, u64)>>,
    tasks: HashMap<u64, Task>,
    sequence: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due_tick: u64, task: Task) {
        let sequence = self.sequence;
        self.sequence += 1;
        self.queue.push(Reverse((due_tick, sequence)));
        self.tasks.insert(sequence, task);
    }

    /// Removes and returns every task due at or before `tick`, in order
    pub fn drain_due(&mut self, tick: u64) -> Vec<Task> {
        let mut due = Vec::new();
        while let Some(Reverse((due_tick, sequence))) = self.queue.peek().copied() {
            if due_tick > tick {
                break;
            }
            self.queue.pop();
            if let Some(task) = self.tasks.remove(&sequence) {
                due.push(task);
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pending(&self, task: &Task) -> bool {
        self.tasks.values().any(|t| t == task)
    }
}
