//! Batched commits of generation-pass mutations.
//!
//! The builder never touches the published tree. It queues typed requests
//! here; once a pass goes quiet the queue applies everything to a staged
//! copy and publishes it with a single swap, so readers see either the old
//! tree or the complete new one.

use std::mem;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use uuid::Uuid;

use crate::node::{LayoutNode, NodeTree, RowExtras};
use crate::store::SnapshotStore;
use crate::value::ExprValue;

#[derive(Debug, Clone, PartialEq)]
pub struct SetRowUuid {
    pub node: String,
    pub index: usize,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetNodeProp {
    pub node: String,
    pub key: String,
    pub value: ExprValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetRowExtras {
    pub node: String,
    pub index: usize,
    pub extras: RowExtras,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetPageProp {
    pub page: String,
    pub key: String,
    pub value: ExprValue,
}

#[derive(Debug, Default)]
struct Queues {
    adds: Vec<LayoutNode>,
    row_uuids: Vec<SetRowUuid>,
    node_props: Vec<SetNodeProp>,
    row_extras: Vec<SetRowExtras>,
    page_props: Vec<SetPageProp>,
}

impl Queues {
    fn len(&self) -> usize {
        self.adds.len()
            + self.row_uuids.len()
            + self.node_props.len()
            + self.row_extras.len()
            + self.page_props.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct State {
    pending: Queues,
    /// Adds that arrived while a flush was running.
    deferred_adds: Vec<LayoutNode>,
    flushing: bool,
    generation: u64,
    queued_total: u64,
    last_checked: u64,
    version: u64,
    published_generation: u64,
}

/// Counts of what one flush applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub generation: u64,
    pub version: u64,
    pub adds: usize,
    pub row_uuids: usize,
    pub node_props: usize,
    pub row_extras: usize,
    pub page_props: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Nothing queued.
    Idle,
    /// Requests arrived since the previous tick; the pass is still running.
    Pending,
    Flushed(FlushReport),
}

#[derive(Debug, Default)]
pub struct CommitQueue {
    state: Mutex<State>,
    flushed: Condvar,
}

impl CommitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a pass. Adds deferred during the previous flush are queued
    /// ahead of anything the new pass produces.
    pub fn begin_pass(&self, generation: u64) {
        let mut state = self.lock();
        state.generation = generation;
        let deferred = mem::take(&mut state.deferred_adds);
        if !deferred.is_empty() {
            log::debug!(
                "pass {} starts with {} deferred add(s)",
                generation,
                deferred.len()
            );
            state.queued_total += deferred.len() as u64;
            let produced = mem::take(&mut state.pending.adds);
            state.pending.adds = deferred;
            state.pending.adds.extend(produced);
        }
    }

    pub fn add_node(&self, node: LayoutNode) {
        let mut state = self.lock();
        if state.flushing {
            state.deferred_adds.push(node);
            return;
        }
        state.pending.adds.push(node);
        state.queued_total += 1;
    }

    pub fn set_row_uuid(&self, node: impl Into<String>, index: usize, uuid: Uuid) {
        let request = SetRowUuid {
            node: node.into(),
            index,
            uuid,
        };
        self.push(|queues| queues.row_uuids.push(request));
    }

    pub fn set_node_prop(&self, node: impl Into<String>, key: impl Into<String>, value: ExprValue) {
        let request = SetNodeProp {
            node: node.into(),
            key: key.into(),
            value,
        };
        self.push(|queues| queues.node_props.push(request));
    }

    pub fn set_row_extras(&self, node: impl Into<String>, index: usize, extras: RowExtras) {
        let request = SetRowExtras {
            node: node.into(),
            index,
            extras,
        };
        self.push(|queues| queues.row_extras.push(request));
    }

    pub fn set_page_prop(&self, page: impl Into<String>, key: impl Into<String>, value: ExprValue) {
        let request = SetPageProp {
            page: page.into(),
            key: key.into(),
            value,
        };
        self.push(|queues| queues.page_props.push(request));
    }

    fn push(&self, apply: impl FnOnce(&mut Queues)) {
        let mut state = self.lock();
        apply(&mut state.pending);
        state.queued_total += 1;
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn deferred_len(&self) -> usize {
        self.lock().deferred_adds.len()
    }

    /// Number of flushes published so far.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Flushes once no request arrived since the previous tick.
    pub fn tick(&self, store: &SnapshotStore<NodeTree>) -> Tick {
        {
            let mut state = self.lock();
            if state.pending.is_empty() {
                state.last_checked = state.queued_total;
                return Tick::Idle;
            }
            if state.queued_total != state.last_checked {
                state.last_checked = state.queued_total;
                return Tick::Pending;
            }
        }
        match self.flush(store) {
            Some(report) => Tick::Flushed(report),
            None => Tick::Pending,
        }
    }

    /// Applies every queued request in the fixed order adds, row uuids,
    /// node properties, row extras, page properties, and publishes the
    /// result. Returns `None` when another flush is already running.
    pub fn flush(&self, store: &SnapshotStore<NodeTree>) -> Option<FlushReport> {
        let (queues, generation) = {
            let mut state = self.lock();
            if state.flushing {
                return None;
            }
            state.flushing = true;
            (mem::take(&mut state.pending), state.generation)
        };

        let current = store.snapshot();
        let mut staged = if current.generation() == generation {
            (*current).clone()
        } else {
            NodeTree::new(generation)
        };
        staged.set_generation(generation);

        let mut report = FlushReport {
            generation,
            adds: queues.adds.len(),
            row_uuids: queues.row_uuids.len(),
            node_props: queues.node_props.len(),
            row_extras: queues.row_extras.len(),
            page_props: queues.page_props.len(),
            ..FlushReport::default()
        };
        apply(&mut staged, queues);
        store.publish(staged);

        {
            let mut state = self.lock();
            state.flushing = false;
            state.version += 1;
            state.published_generation = generation;
            state.last_checked = state.queued_total;
            report.version = state.version;
        }
        self.flushed.notify_all();
        log::debug!(
            "flushed generation {} as version {}: {} add(s), {} row uuid(s), {} prop(s)",
            report.generation,
            report.version,
            report.adds,
            report.row_uuids,
            report.node_props
        );
        Some(report)
    }

    /// Blocks until at least `version` flushes have been published.
    pub fn wait_for_version(&self, version: u64, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .flushed
            .wait_timeout_while(state, timeout, |state| state.version < version)
            .unwrap_or_else(PoisonError::into_inner);
        state.version >= version
    }

    /// Blocks until a tree of at least `generation` has been published.
    pub fn wait_for_generation(&self, generation: u64, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .flushed
            .wait_timeout_while(state, timeout, |state| {
                state.published_generation < generation
            })
            .unwrap_or_else(PoisonError::into_inner);
        state.published_generation >= generation
    }

    /// Blocks until nothing is queued and no flush is running.
    pub fn wait_until_drained(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .flushed
            .wait_timeout_while(state, timeout, |state| {
                state.flushing || !state.pending.is_empty()
            })
            .unwrap_or_else(PoisonError::into_inner);
        !state.flushing && state.pending.is_empty()
    }
}

fn apply(tree: &mut NodeTree, queues: Queues) {
    let Queues {
        adds,
        row_uuids,
        node_props,
        row_extras,
        page_props,
    } = queues;

    for node in adds {
        tree.insert_node(node);
    }
    for request in row_uuids {
        match tree.row_mut(&request.node, request.index) {
            Some(row) => {
                row.index = request.index as u32;
                row.uuid = request.uuid;
            }
            None => log::warn!(
                "row uuid for '{}' row {} dropped: not a repeating node in this tree",
                request.node,
                request.index
            ),
        }
    }
    for request in node_props {
        match tree.node_mut(&request.node) {
            Some(node) => {
                node.props.insert(request.key, request.value);
            }
            None => log::warn!(
                "property '{}' for unknown node '{}' dropped",
                request.key,
                request.node
            ),
        }
    }
    for request in row_extras {
        match tree.row_mut(&request.node, request.index) {
            Some(row) => row.extras = request.extras,
            None => log::warn!(
                "row extras for '{}' row {} dropped",
                request.node,
                request.index
            ),
        }
    }
    for request in page_props {
        tree.page_mut(&request.page)
            .props
            .insert(request.key, request.value);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn group(id: &str) -> LayoutNode {
        let mut node = LayoutNode::new(id, id, "RepeatingGroup", "page1");
        node.rows = Some(Vec::new());
        node
    }

    #[test]
    fn tick_waits_for_a_quiet_check_before_flushing() {
        let queue = CommitQueue::new();
        let store = SnapshotStore::new(NodeTree::default());
        assert_eq!(queue.tick(&store), Tick::Idle);

        queue.begin_pass(1);
        queue.add_node(group("Group"));
        assert_eq!(queue.tick(&store), Tick::Pending);
        queue.set_row_uuid("Group", 0, Uuid::new_v4());
        assert_eq!(queue.tick(&store), Tick::Pending);

        let Tick::Flushed(report) = queue.tick(&store) else {
            panic!("expected a flush");
        };
        assert_eq!(report.adds, 1);
        assert_eq!(report.row_uuids, 1);
        assert_eq!(report.version, 1);
        assert_eq!(store.snapshot().generation(), 1);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn flush_applies_props_after_adds() {
        let queue = CommitQueue::new();
        let store = SnapshotStore::new(NodeTree::default());
        queue.begin_pass(1);
        // queued before the add, still applied because adds go first
        queue.set_node_prop("Group", "hidden", ExprValue::Bool(true));
        queue.add_node(group("Group"));
        queue.set_page_prop("page1", "hidden", ExprValue::Bool(false));
        queue.flush(&store).expect("flush");

        let tree = store.snapshot();
        assert!(tree.node("Group").expect("group").is_hidden());
        assert!(!tree.page("page1").expect("page").is_hidden());
    }

    #[test]
    fn a_new_generation_starts_from_an_empty_tree() {
        let queue = CommitQueue::new();
        let store = SnapshotStore::new(NodeTree::default());
        queue.begin_pass(1);
        queue.add_node(group("Old"));
        queue.flush(&store).expect("flush");

        queue.begin_pass(2);
        queue.add_node(group("New"));
        queue.flush(&store).expect("flush");
        let tree = store.snapshot();
        assert!(tree.node("Old").is_none());
        assert!(tree.node("New").is_some());

        // a second flush within the same generation extends it
        queue.add_node(group("Late"));
        queue.flush(&store).expect("flush");
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn adds_during_a_flush_wait_for_the_next_pass() {
        let queue = CommitQueue::new();
        queue.lock().flushing = true;
        queue.add_node(group("Late"));
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.deferred_len(), 1);

        queue.lock().flushing = false;
        queue.begin_pass(2);
        assert_eq!(queue.pending_len(), 1);
        assert_eq!(queue.deferred_len(), 0);
    }

    #[test]
    fn waiters_wake_on_flush() {
        let queue = Arc::new(CommitQueue::new());
        let store = Arc::new(SnapshotStore::new(NodeTree::default()));
        queue.begin_pass(1);
        queue.add_node(group("Group"));

        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_for_version(1, Duration::from_secs(5)))
        };
        queue.flush(&store).expect("flush");
        assert!(waiter.join().expect("join"));
        assert!(queue.wait_until_drained(Duration::from_millis(10)));
        assert!(!queue.wait_for_version(2, Duration::from_millis(10)));
    }
}
