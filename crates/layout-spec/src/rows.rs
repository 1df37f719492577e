//! Row identity for repeating groups.
//!
//! Every group instance owns an arena of row uuids. Rows whose data carries
//! a uuid keep that one; other rows get one minted the first time their
//! slot is created, and a minted uuid is never reused. Deletion removes the
//! uuid and shifts later rows down.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::error::EngineError;
use crate::node::{PathStep, RowId};

/// A group instance: its base id plus the row it sits in, if any.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaKey {
    pub base_id: String,
    pub parent_row: Option<Uuid>,
}

impl ArenaKey {
    pub fn new(base_id: impl Into<String>, parent_row: Option<Uuid>) -> Self {
        Self {
            base_id: base_id.into(),
            parent_row,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowChangeKind {
    Insert,
    Remove,
}

/// A row change not yet mirrored in the visibility tree. The group path is
/// in the coordinates of the tree at the time of the change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChange {
    pub kind: RowChangeKind,
    pub group_path: Vec<PathStep>,
    pub index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowArena {
    uuids: Vec<Uuid>,
}

impl RowArena {
    pub fn len(&self) -> usize {
        self.uuids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uuids.is_empty()
    }

    pub fn uuids(&self) -> &[Uuid] {
        &self.uuids
    }

    pub fn rows(&self) -> Vec<RowId> {
        self.uuids
            .iter()
            .enumerate()
            .map(|(index, uuid)| RowId {
                index: index as u32,
                uuid: *uuid,
            })
            .collect()
    }

    /// Makes the arena match `ids`, one entry per row. Rows with an id keep
    /// it. A row without one keeps the uuid of its slot unless some row of
    /// `ids` claims that uuid, and gets a fresh one otherwise.
    ///
    /// Returns the removals (highest index first) and then the inserts
    /// (lowest index first) that turn the old rows into the new ones.
    pub fn align(&mut self, ids: &[Option<Uuid>]) -> Vec<(RowChangeKind, usize)> {
        let claimed = ids.iter().flatten().copied().collect::<HashSet<_>>();
        let mut used = HashSet::with_capacity(ids.len());
        let mut next = Vec::with_capacity(ids.len());
        for (slot, id) in ids.iter().copied().enumerate() {
            let uuid = id
                .filter(|uuid| !used.contains(uuid))
                .or_else(|| {
                    self.uuids
                        .get(slot)
                        .copied()
                        .filter(|old| !claimed.contains(old) && !used.contains(old))
                })
                .unwrap_or_else(Uuid::new_v4);
            used.insert(uuid);
            next.push(uuid);
        }
        let changes = row_changes(&self.uuids, &next);
        self.uuids = next;
        changes
    }

    pub fn insert(&mut self, index: usize) -> Option<Uuid> {
        if index > self.uuids.len() {
            return None;
        }
        let uuid = Uuid::new_v4();
        self.uuids.insert(index, uuid);
        Some(uuid)
    }

    pub fn remove(&mut self, index: usize) -> Option<Uuid> {
        (index < self.uuids.len()).then(|| self.uuids.remove(index))
    }
}

/// Steps from `old` to `new`. Surviving rows that changed their relative
/// order are removed and inserted again.
fn row_changes(old: &[Uuid], new: &[Uuid]) -> Vec<(RowChangeKind, usize)> {
    let old_set = old.iter().collect::<HashSet<_>>();
    let new_set = new.iter().collect::<HashSet<_>>();
    let kept_old = old.iter().filter(|uuid| new_set.contains(uuid));
    let kept_new = new.iter().filter(|uuid| old_set.contains(uuid));
    let reordered = !kept_old.eq(kept_new);

    let removals = old
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, uuid)| reordered || !new_set.contains(uuid))
        .map(|(index, _)| (RowChangeKind::Remove, index));
    let inserts = new
        .iter()
        .enumerate()
        .filter(|(_, uuid)| reordered || !old_set.contains(uuid))
        .map(|(index, _)| (RowChangeKind::Insert, index));
    removals.chain(inserts).collect()
}

/// All arenas, with pass bookkeeping so arenas of groups that disappeared
/// (for instance because their parent row was deleted) are dropped.
#[derive(Debug, Default)]
pub struct RowRegistry {
    arenas: HashMap<ArenaKey, RowArena>,
    touched: HashSet<ArenaKey>,
    changes: Vec<RowChange>,
}

impl RowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_pass(&mut self) {
        self.touched.clear();
    }

    /// Drops arenas no group asked for during the pass.
    pub fn end_pass(&mut self) -> usize {
        let before = self.arenas.len();
        let touched = &self.touched;
        self.arenas.retain(|key, _| touched.contains(key));
        let dropped = before - self.arenas.len();
        if dropped > 0 {
            log::debug!("dropped {} row arena(s) of vanished groups", dropped);
        }
        dropped
    }

    /// Aligns the arena of `key` with the rows in the data. Changes to an
    /// arena that already existed are kept for `take_changes`, addressed by
    /// `group_path`.
    pub fn align(
        &mut self,
        key: &ArenaKey,
        ids: &[Option<Uuid>],
        group_path: &[PathStep],
    ) -> Vec<RowId> {
        self.touched.insert(key.clone());
        let existed = self.arenas.contains_key(key);
        let arena = self.arenas.entry(key.clone()).or_default();
        let changes = arena.align(ids);
        let rows = arena.rows();
        if existed && !changes.is_empty() {
            log::debug!(
                "rows of '{}' follow the data: {} change(s)",
                key.base_id,
                changes.len()
            );
            self.changes
                .extend(changes.into_iter().map(|(kind, index)| RowChange {
                    kind,
                    group_path: group_path.to_vec(),
                    index,
                }));
        }
        rows
    }

    /// Row changes found by `align` since the last call, in pass order.
    pub fn take_changes(&mut self) -> Vec<RowChange> {
        std::mem::take(&mut self.changes)
    }

    pub fn get(&self, key: &ArenaKey) -> Option<&RowArena> {
        self.arenas.get(key)
    }

    pub fn insert_row(&mut self, key: &ArenaKey, index: usize) -> Result<Uuid, EngineError> {
        let arena = self.arenas.entry(key.clone()).or_default();
        let len = arena.len();
        arena.insert(index).ok_or_else(|| EngineError::RowOutOfRange {
            group: key.base_id.clone(),
            index,
            len,
        })
    }

    pub fn remove_row(&mut self, key: &ArenaKey, index: usize) -> Result<Uuid, EngineError> {
        let len = self.arenas.get(key).map_or(0, RowArena::len);
        self.arenas
            .get_mut(key)
            .and_then(|arena| arena.remove(index))
            .ok_or_else(|| EngineError::RowOutOfRange {
                group: key.base_id.clone(),
                index,
                len,
            })
    }

    pub fn len(&self) -> usize {
        self.arenas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arenas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unidentified(count: usize) -> Vec<Option<Uuid>> {
        vec![None; count]
    }

    fn group_path() -> Vec<PathStep> {
        vec![PathStep {
            base_id: "Group".into(),
            row: None,
        }]
    }

    #[test]
    fn deleting_first_row_keeps_remaining_uuids() {
        let mut arena = RowArena::default();
        arena.align(&unidentified(3));
        let [a, b, c] = [arena.uuids()[0], arena.uuids()[1], arena.uuids()[2]];

        assert_eq!(arena.remove(0), Some(a));
        assert!(arena.align(&unidentified(2)).is_empty());
        assert_eq!(arena.uuids(), &[b, c]);
        assert_eq!(arena.rows()[0], RowId { index: 0, uuid: b });
    }

    #[test]
    fn growing_mints_fresh_uuids_and_shrinking_forgets_them() {
        let mut arena = RowArena::default();
        arena.align(&unidentified(2));
        let first = arena.uuids().to_vec();
        assert_eq!(
            arena.align(&unidentified(1)),
            vec![(RowChangeKind::Remove, 1)]
        );
        arena.align(&unidentified(2));
        assert_eq!(arena.uuids()[0], first[0]);
        assert_ne!(arena.uuids()[1], first[1]);
    }

    #[test]
    fn stored_ids_decide_which_row_went_away() {
        let [a, b, c] = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let mut arena = RowArena::default();
        arena.align(&[Some(a), Some(b), Some(c)]);
        assert_eq!(arena.uuids(), &[a, b, c]);

        let changes = arena.align(&[Some(b), Some(c)]);
        assert_eq!(arena.uuids(), &[b, c]);
        assert_eq!(changes, vec![(RowChangeKind::Remove, 0)]);

        let d = Uuid::new_v4();
        let changes = arena.align(&[Some(b), Some(d), Some(c)]);
        assert_eq!(arena.uuids(), &[b, d, c]);
        assert_eq!(changes, vec![(RowChangeKind::Insert, 1)]);
    }

    #[test]
    fn rows_without_ids_never_take_a_claimed_uuid() {
        let [a, b] = [Uuid::new_v4(), Uuid::new_v4()];
        let mut arena = RowArena::default();
        arena.align(&[Some(a), Some(b)]);

        arena.align(&[None, Some(a), Some(a)]);
        let uuids = arena.uuids().to_vec();
        assert_eq!(uuids[1], a);
        assert!(!uuids.contains(&b));
        assert_ne!(uuids[0], a);
        assert_ne!(uuids[2], a);
        assert_ne!(uuids[0], uuids[2]);
    }

    #[test]
    fn reordered_rows_are_removed_and_inserted_again() {
        let [a, b] = [Uuid::new_v4(), Uuid::new_v4()];
        let mut arena = RowArena::default();
        arena.align(&[Some(a), Some(b)]);
        let changes = arena.align(&[Some(b), Some(a)]);
        assert_eq!(
            changes,
            vec![
                (RowChangeKind::Remove, 1),
                (RowChangeKind::Remove, 0),
                (RowChangeKind::Insert, 0),
                (RowChangeKind::Insert, 1),
            ]
        );
    }

    #[test]
    fn insert_mints_uuid_at_position() {
        let mut arena = RowArena::default();
        arena.align(&unidentified(2));
        let before = arena.uuids().to_vec();
        let fresh = arena.insert(1).expect("insert");
        assert_eq!(arena.uuids(), &[before[0], fresh, before[1]]);
        assert_eq!(arena.insert(9), None);
    }

    #[test]
    fn registry_records_changes_of_known_arenas_only() {
        let mut registry = RowRegistry::new();
        let key = ArenaKey::new("Group", None);
        registry.align(&key, &unidentified(3), &group_path());
        assert!(registry.take_changes().is_empty());

        registry.align(&key, &unidentified(1), &group_path());
        let changes = registry.take_changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].kind, RowChangeKind::Remove);
        assert_eq!(changes[0].index, 2);
        assert_eq!(changes[1].index, 1);
        assert_eq!(changes[0].group_path, group_path());
        assert!(registry.take_changes().is_empty());
    }

    #[test]
    fn untouched_arenas_are_dropped_at_pass_end() {
        let mut registry = RowRegistry::new();
        let outer = ArenaKey::new("Outer", None);
        let inner = ArenaKey::new("Inner", Some(Uuid::new_v4()));
        registry.begin_pass();
        registry.align(&outer, &unidentified(1), &[]);
        registry.align(&inner, &unidentified(2), &[]);
        assert_eq!(registry.end_pass(), 0);

        registry.begin_pass();
        registry.align(&outer, &unidentified(1), &[]);
        assert_eq!(registry.end_pass(), 1);
        assert!(registry.get(&inner).is_none());
    }

    #[test]
    fn removing_out_of_range_reports_length() {
        let mut registry = RowRegistry::new();
        let key = ArenaKey::new("Group", None);
        registry.align(&key, &unidentified(1), &[]);
        assert_eq!(
            registry.remove_row(&key, 3),
            Err(EngineError::RowOutOfRange {
                group: "Group".into(),
                index: 3,
                len: 1,
            })
        );
    }
}
