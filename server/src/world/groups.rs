//! Coarse map regions that bound message fan-out and visibility.

use std::collections::{BTreeSet, HashMap};

use realm_shared::InstanceId;

/// Region index, `gy * groups_x + gx`
pub type GroupId = u32;

pub struct GroupManager {
    group_width: u16,
    group_height: u16,
    groups_x: u32,
    groups_y: u32,
    members: Vec<BTreeSet<InstanceId>>,
    players: Vec<BTreeSet<InstanceId>>,
    membership: HashMap<InstanceId, (GroupId, bool)>,
}

impl GroupManager {
    pub fn new(map_width: u16, map_height: u16, group_width: u16, group_height: u16) -> Self {
        let group_width = group_width.max(1);
        let group_height = group_height.max(1);
        let groups_x = u32::from(map_width).div_ceil(u32::from(group_width)).max(1);
        let groups_y = u32::from(map_height).div_ceil(u32::from(group_height)).max(1);
        let count = (groups_x * groups_y) as usize;

        Self {
            group_width,
            group_height,
            groups_x,
            groups_y,
            members: vec![BTreeSet::new(); count],
            players: vec![BTreeSet::new(); count],
            membership: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Region containing a tile; tiles past the edge map to the last region
    pub fn group_of(&self, x: u16, y: u16) -> GroupId {
        let gx = (u32::from(x) / u32::from(self.group_width)).min(self.groups_x - 1);
        let gy = (u32::from(y) / u32::from(self.group_height)).min(self.groups_y - 1);
        gy * self.groups_x + gx
    }

    fn coords(&self, group: GroupId) -> (i64, i64) {
        (i64::from(group % self.groups_x), i64::from(group / self.groups_x))
    }

    /// `group` itself plus up to eight neighbours, ascending
    pub fn adjacent(&self, group: GroupId) -> Vec<GroupId> {
        let (gx, gy) = self.coords(group);
        let mut groups = Vec::with_capacity(9);
        for dy in -1..=1 {
            for dx in -1..=1 {
                let (nx, ny) = (gx + dx, gy + dy);
                if nx >= 0 && ny >= 0 && nx < i64::from(self.groups_x) && ny < i64::from(self.groups_y) {
                    groups.push((ny as u32) * self.groups_x + nx as u32);
                }
            }
        }
        groups
    }

    pub fn is_adjacent(&self, a: GroupId, b: GroupId) -> bool {
        let (ax, ay) = self.coords(a);
        let (bx, by) = self.coords(b);
        (ax - bx).abs() <= 1 && (ay - by).abs() <= 1
    }

    pub fn add(&mut self, id: InstanceId, group: GroupId, is_player: bool) {
        if group as usize >= self.members.len() {
            return;
        }
        self.remove(id);
        self.members[group as usize].insert(id);
        if is_player {
            self.players[group as usize].insert(id);
        }
        self.membership.insert(id, (group, is_player));
    }

    pub fn remove(&mut self, id: InstanceId) -> Option<GroupId> {
        let (group, _) = self.membership.remove(&id)?;
        self.members[group as usize].remove(&id);
        self.players[group as usize].remove(&id);
        Some(group)
    }

    /// Moves an entity to another region, returning the one it left
    pub fn change(&mut self, id: InstanceId, group: GroupId) -> Option<GroupId> {
        let (previous, is_player) = *self.membership.get(&id)?;
        if previous != group {
            self.add(id, group, is_player);
        }
        Some(previous)
    }

    pub fn group_id(&self, id: InstanceId) -> Option<GroupId> {
        self.membership.get(&id).map(|(group, _)| *group)
    }

    pub fn members(&self, group: GroupId) -> impl Iterator<Item = InstanceId> + '_ {
        self.members.get(group as usize).into_iter().flatten().copied()
    }

    pub fn players_in(&self, group: GroupId) -> impl Iterator<Item = InstanceId> + '_ {
        self.players.get(group as usize).into_iter().flatten().copied()
    }

    /// Players in `group` and its neighbours
    pub fn players_around(&self, group: GroupId) -> Vec<InstanceId> {
        self.adjacent(group).into_iter().flat_map(|g| self.players_in(g)).collect()
    }

    /// Every member of `group` and its neighbours
    pub fn entities_around(&self, group: GroupId) -> Vec<InstanceId> {
        self.adjacent(group).into_iter().flat_map(|g| self.members(g)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> GroupManager {
        // 4x3 regions of 16x16
        GroupManager::new(64, 48, 16, 16)
    }

    #[test]
    fn test_group_of() {
        let groups = manager();
        assert_eq!(groups.len(), 12);
        assert_eq!(groups.group_of(0, 0), 0);
        assert_eq!(groups.group_of(17, 0), 1);
        assert_eq!(groups.group_of(0, 16), 4);
        assert_eq!(groups.group_of(63, 47), 11);
        assert_eq!(groups.group_of(500, 500), 11);
    }

    #[test]
    fn test_adjacent_at_edges() {
        let groups = manager();
        assert_eq!(groups.adjacent(0), vec![0, 1, 4, 5]);
        assert_eq!(groups.adjacent(5), vec![0, 1, 2, 4, 5, 6, 8, 9, 10]);
        assert_eq!(groups.adjacent(11), vec![6, 7, 10, 11]);
        assert!(groups.is_adjacent(0, 5));
        assert!(!groups.is_adjacent(0, 2));
    }

    #[test]
    fn test_spawn_reaches_adjacent_regions_only() {
        let mut groups = manager();
        groups.add(1, 0, true); // A
        groups.add(2, 1, true); // B, next to A
        groups.add(3, 3, true); // C, two regions away
        groups.add(100, 0, false);

        let audience = groups.players_around(groups.group_of(2, 2));
        assert!(audience.contains(&1));
        assert!(audience.contains(&2));
        assert!(!audience.contains(&3));
        assert!(!audience.contains(&100));
    }

    #[test]
    fn test_change_and_remove() {
        let mut groups = manager();
        groups.add(7, 0, true);
        assert_eq!(groups.change(7, 5), Some(0));
        assert_eq!(groups.group_id(7), Some(5));
        assert_eq!(groups.players_in(5).collect::<Vec<_>>(), vec![7]);
        assert_eq!(groups.members(0).count(), 0);

        assert_eq!(groups.remove(7), Some(5));
        assert_eq!(groups.remove(7), None);
        assert_eq!(groups.change(7, 1), None);
        assert_eq!(groups.players_in(5).count(), 0);
    }
}
