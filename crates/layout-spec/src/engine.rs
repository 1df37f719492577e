//! The runtime facade: owns a compiled layout and everything derived from
//! it, runs generation passes and keeps the visibility tree in step with
//! the node tree.

use std::collections::HashSet;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::builder::{BuildReport, TreeBuilder};
use crate::commit::{CommitQueue, FlushReport, Tick};
use crate::config::EngineConfig;
use crate::context::{DataSources, EvalContext, RowCountSource};
use crate::error::{EngineError, LayoutError};
use crate::eval::Evaluator;
use crate::expr::TypedExpr;
use crate::functions::FunctionRegistry;
use crate::node::{LayoutNode, NodeKey, NodeTree, PathStep};
use crate::rows::{ArenaKey, RowChange, RowChangeKind, RowRegistry};
use crate::spec::LayoutSet;
use crate::store::SnapshotStore;
use crate::validate::{CompiledLayout, compile};
use crate::value::{ExprType, ExprValue};
use crate::visibility::{InteractionEvent, ValidationMask, VisibilityTree};

/// Why a pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationTrigger {
    DataChanged,
    RowsChanged,
    SettingsChanged,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    pub generation: u64,
    #[serde(flatten)]
    pub build: BuildReport,
    /// Row arenas dropped because their group vanished.
    pub dropped_arenas: usize,
    #[serde(skip)]
    pub flush: Option<FlushReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<GenerationTrigger>,
}

pub struct LayoutEngine {
    layout: CompiledLayout,
    registry: FunctionRegistry,
    config: EngineConfig,
    rows: RowRegistry,
    queue: Arc<CommitQueue>,
    tree: Arc<SnapshotStore<NodeTree>>,
    visibility: Arc<SnapshotStore<VisibilityTree>>,
    generation: u64,
    row_ops: Vec<RowChange>,
    last_trigger: Option<Instant>,
    triggers: Vec<GenerationTrigger>,
}

impl LayoutEngine {
    pub fn new(layout: &LayoutSet, config: EngineConfig) -> Result<Self, LayoutError> {
        Self::with_registry(layout, config, FunctionRegistry::with_builtins())
    }

    /// Like `new`, with a registry that may carry extra functions.
    pub fn with_registry(
        layout: &LayoutSet,
        config: EngineConfig,
        registry: FunctionRegistry,
    ) -> Result<Self, LayoutError> {
        let layout = compile(layout, &registry, config.default_show_mask())?;
        Ok(Self {
            layout,
            registry,
            config,
            rows: RowRegistry::new(),
            queue: Arc::new(CommitQueue::new()),
            tree: Arc::new(SnapshotStore::new(NodeTree::default())),
            visibility: Arc::new(SnapshotStore::new(VisibilityTree::new())),
            generation: 0,
            row_ops: Vec::new(),
            last_trigger: None,
            triggers: Vec::new(),
        })
    }

    pub fn layout(&self) -> &CompiledLayout {
        &self.layout
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn data_type(&self) -> Option<&str> {
        self.layout
            .data_type
            .as_deref()
            .or(self.config.data_type.as_deref())
    }

    /// Runs one full pass and publishes its tree.
    pub fn generate(
        &mut self,
        sources: &DataSources,
        row_counts: &dyn RowCountSource,
    ) -> GenerationReport {
        self.generation += 1;
        let generation = self.generation;
        let previous = self.tree.snapshot();

        self.queue.begin_pass(generation);
        self.rows.begin_pass();
        let fallback = self.config.data_type.as_deref();
        let build = TreeBuilder::new(
            &self.layout,
            &self.registry,
            sources,
            row_counts,
            &mut self.rows,
            &self.queue,
        )
        .with_fallback_data_type(fallback)
        .build();
        let dropped_arenas = self.rows.end_pass();

        let flush = self.drain();
        self.sync_visibility(&previous);

        self.last_trigger = None;
        let report = GenerationReport {
            generation,
            build,
            dropped_arenas,
            flush,
            triggers: mem::take(&mut self.triggers),
        };
        log::info!(
            "generation {} published: {} node(s), {} row(s)",
            generation,
            report.build.nodes,
            report.build.rows
        );
        report
    }

    /// Ticks the queue until the pass is published. A pass that queued
    /// nothing still publishes an empty tree for its generation.
    fn drain(&self) -> Option<FlushReport> {
        let deadline = Instant::now() + self.config.drain_timeout();
        loop {
            match self.queue.tick(&self.tree) {
                Tick::Flushed(report) => return Some(report),
                Tick::Idle => return self.queue.flush(&self.tree),
                Tick::Pending if Instant::now() >= deadline => {
                    log::warn!(
                        "generation {} still busy after {:?}, flushing anyway",
                        self.generation,
                        self.config.drain_timeout()
                    );
                    return self.queue.flush(&self.tree);
                }
                Tick::Pending => {}
            }
        }
    }

    /// Replays explicit row changes and then the ones the pass found in the
    /// data, drops entries of vanished nodes and creates entries for new
    /// ones.
    fn sync_visibility(&mut self, previous: &NodeTree) {
        let current = self.tree.snapshot();
        let mut ops = mem::take(&mut self.row_ops);
        let explicit = ops.len();
        ops.extend(self.rows.take_changes());
        let page_mask = self.config.default_show_mask() | ValidationMask::BACKEND;

        self.visibility.update(|visibility| {
            let mut applied: Vec<RowChange> = Vec::with_capacity(ops.len());
            for (position, op) in ops.into_iter().enumerate() {
                // changes found by the pass already use the new coordinates
                let group_path = if position < explicit {
                    match shift_through(&op.group_path, &applied) {
                        Some(path) => path,
                        None => continue,
                    }
                } else {
                    op.group_path.clone()
                };
                match op.kind {
                    RowChangeKind::Insert => visibility.insert_row_at(&group_path, op.index),
                    RowChangeKind::Remove => visibility.remove_row_at(&group_path, op.index),
                }
                applied.push(RowChange { group_path, ..op });
            }

            let live = current.nodes().map(LayoutNode::key).collect::<HashSet<NodeKey>>();
            for node in previous.nodes() {
                if live.contains(&node.key()) {
                    continue;
                }
                if let Some(path) = shift_through(&node.visibility_path(), &applied) {
                    visibility.remove_at(&path);
                }
            }

            for page in current.pages() {
                let step = PathStep {
                    base_id: page.id.clone(),
                    row: None,
                };
                visibility.add_at(&[step], page_mask);
            }
            for node in current.walk() {
                visibility.add_visibility_for_node(node);
            }
        });
    }

    /// Records a trigger. Passes run from `run_pending` once no trigger
    /// arrived for the configured debounce interval.
    pub fn notify(&mut self, trigger: GenerationTrigger, now: Instant) {
        self.last_trigger = Some(now);
        if !self.triggers.contains(&trigger) {
            self.triggers.push(trigger);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.last_trigger.is_some()
    }

    /// When the pending pass becomes due, if any.
    pub fn due_at(&self) -> Option<Instant> {
        self.last_trigger.map(|at| at + self.config.debounce())
    }

    pub fn run_pending(
        &mut self,
        now: Instant,
        sources: &DataSources,
        row_counts: &dyn RowCountSource,
    ) -> Option<GenerationReport> {
        let due = self.due_at()?;
        if now < due {
            return None;
        }
        Some(self.generate(sources, row_counts))
    }

    /// Inserts a row with a fresh uuid at `index` of a repeating group. Rows
    /// at and after `index` keep their uuids and move up by one. The
    /// change shows in the next generated tree.
    pub fn insert_row(&mut self, group_id: &str, index: usize) -> Result<Uuid, EngineError> {
        let (key, group_path) = self.group_key(group_id)?;
        let uuid = self.rows.insert_row(&key, index)?;
        self.row_ops.push(RowChange {
            kind: RowChangeKind::Insert,
            group_path,
            index,
        });
        Ok(uuid)
    }

    /// Removes the row at `index`; later rows keep their uuids and move
    /// down by one. Returns the uuid of the removed row.
    pub fn remove_row(&mut self, group_id: &str, index: usize) -> Result<Uuid, EngineError> {
        let (key, group_path) = self.group_key(group_id)?;
        let uuid = self.rows.remove_row(&key, index)?;
        self.row_ops.push(RowChange {
            kind: RowChangeKind::Remove,
            group_path,
            index,
        });
        Ok(uuid)
    }

    fn group_key(&self, group_id: &str) -> Result<(ArenaKey, Vec<PathStep>), EngineError> {
        let tree = self.tree.snapshot();
        let group = tree
            .node(group_id)
            .ok_or_else(|| EngineError::UnknownNode(group_id.to_string()))?;
        if !group.is_repeating() {
            return Err(EngineError::NotRepeating(group_id.to_string()));
        }
        let key = ArenaKey::new(&group.base_id, group.row_uuids.last().copied());
        Ok((key, group.visibility_path()))
    }

    pub fn snapshot(&self) -> Arc<NodeTree> {
        self.tree.snapshot()
    }

    pub fn visibility(&self) -> Arc<VisibilityTree> {
        self.visibility.snapshot()
    }

    /// Shared handle for readers on other threads.
    pub fn tree_store(&self) -> Arc<SnapshotStore<NodeTree>> {
        Arc::clone(&self.tree)
    }

    pub fn handle_event(&mut self, event: &InteractionEvent) -> Result<(), EngineError> {
        match event {
            InteractionEvent::Submit => {
                self.visibility
                    .update(|visibility| visibility.reveal_all(ValidationMask::ALL));
            }
            InteractionEvent::Blur { node } => {
                let tree = self.tree.snapshot();
                let node = known_node(&tree, node)?;
                self.visibility.update(|visibility| {
                    visibility.reveal_for_node(node, ValidationMask::ALL_EXCEPT_REQUIRED)
                });
            }
            InteractionEvent::Reveal { node, mask, row } => {
                let tree = self.tree.snapshot();
                let node = known_node(&tree, node)?;
                self.visibility
                    .update(|visibility| visibility.set_visibility_for_node(node, *mask, *row));
            }
        }
        Ok(())
    }

    pub fn visibility_for(
        &self,
        node_id: &str,
        row: Option<usize>,
    ) -> Result<ValidationMask, EngineError> {
        let tree = self.tree.snapshot();
        let node = known_node(&tree, node_id)?;
        Ok(self.visibility.snapshot().visibility_for_node(node, row))
    }

    pub fn wait_for_generation(&self, generation: u64, timeout: Duration) -> bool {
        self.queue.wait_for_generation(generation, timeout)
    }

    /// Evaluates a raw expression against the current tree, in the row
    /// scope of `node_id` when given.
    pub fn evaluate(
        &self,
        raw: &Value,
        node_id: Option<&str>,
        sources: &DataSources,
    ) -> Result<ExprValue, EngineError> {
        let expr = TypedExpr::parse(raw, &self.registry, ExprType::Any)?;
        let tree = self.tree.snapshot();
        let node = node_id.map(|id| known_node(&tree, id)).transpose()?;
        let (row_path, row_uuids, location) = match node {
            Some(node) => (
                node.row_path.as_slice(),
                node.row_uuids.as_slice(),
                node.data_location.as_ref(),
            ),
            None => (&[][..], &[][..], None),
        };
        let ctx = EvalContext::new(sources)
            .with_data_type(self.data_type())
            .with_rows(row_path, location)
            .with_row_uuids(row_uuids)
            .with_nodes(&*tree);
        Ok(Evaluator::new(&self.registry).evaluate(&expr, &ctx)?)
    }
}

fn known_node<'t>(tree: &'t NodeTree, id: &str) -> Result<&'t LayoutNode, EngineError> {
    tree.node(id)
        .ok_or_else(|| EngineError::UnknownNode(id.to_string()))
}

fn shift_through(path: &[PathStep], ops: &[RowChange]) -> Option<Vec<PathStep>> {
    ops.iter()
        .try_fold(path.to_vec(), |path, op| shift_path(path, op))
}

/// Maps a path recorded before `op` onto the tree after it. `None` when
/// the path ran through the removed row.
fn shift_path(mut path: Vec<PathStep>, op: &RowChange) -> Option<Vec<PathStep>> {
    let Some((group, ancestors)) = op.group_path.split_last() else {
        return Some(path);
    };
    let depth = ancestors.len();
    if path.len() <= depth + 1 || path[..depth] != *ancestors {
        return Some(path);
    }
    let step = &mut path[depth];
    let Some(row) = step.row.filter(|_| step.base_id == group.base_id) else {
        return Some(path);
    };
    step.row = match op.kind {
        RowChangeKind::Remove if row == op.index => return None,
        RowChangeKind::Remove if row > op.index => Some(row - 1),
        RowChangeKind::Insert if row >= op.index => Some(row + 1),
        _ => Some(row),
    };
    Some(path)
}
