//! Concrete node instances produced by a generation pass.

use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use crate::context::{NodeLookup, ResolvedNode};
use crate::path::DataReference;
use crate::value::ExprValue;
use crate::visibility::ValidationMask;

pub const HIDDEN: &str = "hidden";

/// Id of a node instance: the base id followed by its row path,
/// e.g. `Name-1-0` for row 0 of an inner group inside row 1 of an outer one.
pub fn indexed_id(base_id: &str, row_path: &[usize]) -> String {
    let mut id = base_id.to_string();
    for row in row_path {
        id.push('-');
        id.push_str(&row.to_string());
    }
    id
}

/// Stable row identity: the index shifts, the uuid never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RowId {
    pub index: u32,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowExtras {
    pub hidden_row: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<DataReference>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRow {
    pub index: u32,
    pub uuid: Uuid,
    pub children: Vec<String>,
    #[serde(flatten)]
    pub extras: RowExtras,
}

impl NodeRow {
    fn placeholder(index: usize) -> Self {
        Self {
            index: index as u32,
            uuid: Uuid::nil(),
            children: Vec::new(),
            extras: RowExtras::default(),
        }
    }
}

/// One step from the root towards a node: an ancestor's base id, and the
/// row of that ancestor the path continues in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PathStep {
    pub base_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
}

/// Identity of a node across passes: row indices may shift, row uuids don't.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub base_id: String,
    pub row_uuids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutNode {
    pub id: String,
    pub base_id: String,
    #[serde(rename = "type")]
    pub component_type: String,
    pub page: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Row of `parent` this node sits in, when the parent repeats.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_row: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub row_path: Vec<usize>,
    #[serde(skip)]
    pub row_uuids: Vec<Uuid>,
    /// Ancestors from the page down, excluding the node itself.
    #[serde(skip)]
    pub location: Vec<PathStep>,
    /// Data model location of the innermost row this node sits in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_location: Option<DataReference>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub bindings: BTreeMap<String, DataReference>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, ExprValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<NodeRow>>,
    #[serde(skip)]
    pub initial_mask: ValidationMask,
}

impl LayoutNode {
    /// A top-level node with no bindings, props or rows.
    pub fn new(
        id: impl Into<String>,
        base_id: impl Into<String>,
        component_type: impl Into<String>,
        page: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            base_id: base_id.into(),
            component_type: component_type.into(),
            page: page.into(),
            parent: None,
            parent_row: None,
            row_path: Vec::new(),
            row_uuids: Vec::new(),
            location: Vec::new(),
            data_location: None,
            bindings: BTreeMap::new(),
            props: BTreeMap::new(),
            children: Vec::new(),
            rows: None,
            initial_mask: ValidationMask::NONE,
        }
    }

    pub fn is_repeating(&self) -> bool {
        self.rows.is_some()
    }

    /// Effective hidden state, including hidden ancestors, rows and pages.
    pub fn is_hidden(&self) -> bool {
        matches!(self.props.get(HIDDEN), Some(ExprValue::Bool(true)))
    }

    pub fn prop(&self, key: &str) -> Option<&ExprValue> {
        self.props.get(key)
    }

    pub fn simple_binding(&self) -> Option<&DataReference> {
        self.bindings.get("simpleBinding")
    }

    pub fn rows(&self) -> &[NodeRow] {
        self.rows.as_deref().unwrap_or_default()
    }

    pub fn row_ids(&self) -> Vec<RowId> {
        self.rows()
            .iter()
            .map(|row| RowId {
                index: row.index,
                uuid: row.uuid,
            })
            .collect()
    }

    pub fn key(&self) -> NodeKey {
        NodeKey {
            base_id: self.base_id.clone(),
            row_uuids: self.row_uuids.clone(),
        }
    }

    pub fn visibility_path(&self) -> Vec<PathStep> {
        let mut path = self.location.clone();
        path.push(PathStep {
            base_id: self.base_id.clone(),
            row: None,
        });
        path
    }

    pub fn resolved(&self) -> ResolvedNode {
        ResolvedNode {
            id: self.id.clone(),
            binding: self.simple_binding().cloned(),
            hidden: self.is_hidden(),
            row_uuids: self.row_uuids.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageState {
    pub id: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, ExprValue>,
    pub top_level: Vec<String>,
}

impl PageState {
    pub fn is_hidden(&self) -> bool {
        matches!(self.props.get(HIDDEN), Some(ExprValue::Bool(true)))
    }
}

/// Read-only snapshot of one generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeTree {
    generation: u64,
    pages: Vec<PageState>,
    nodes: BTreeMap<String, LayoutNode>,
}

impl NodeTree {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            ..Self::default()
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&LayoutNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &LayoutNode> {
        self.nodes.values()
    }

    pub fn pages(&self) -> &[PageState] {
        &self.pages
    }

    pub fn page(&self, id: &str) -> Option<&PageState> {
        self.pages.iter().find(|page| page.id == id)
    }

    /// Every instance of a layout component, across all rows.
    pub fn instances_of<'a>(&'a self, base_id: &'a str) -> impl Iterator<Item = &'a LayoutNode> {
        self.nodes.values().filter(move |node| node.base_id == base_id)
    }

    /// Direct children followed by the children of each row, in row order.
    pub fn children_of(&self, id: &str) -> Vec<&LayoutNode> {
        let Some(node) = self.nodes.get(id) else {
            return Vec::new();
        };
        node.children
            .iter()
            .chain(node.rows().iter().flat_map(|row| row.children.iter()))
            .filter_map(|child| self.nodes.get(child))
            .collect()
    }

    /// Nodes in document order: page by page, parents before children.
    pub fn walk(&self) -> Vec<&LayoutNode> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for page in &self.pages {
            for id in &page.top_level {
                self.walk_from(id, &mut out);
            }
        }
        out
    }

    fn walk_from<'a>(&'a self, id: &str, out: &mut Vec<&'a LayoutNode>) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        out.push(node);
        for child in self.children_of(id) {
            self.walk_from(&child.id, out);
        }
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Option<&mut LayoutNode> {
        self.nodes.get_mut(id)
    }

    pub(crate) fn page_mut(&mut self, id: &str) -> &mut PageState {
        let position = match self.pages.iter().position(|page| page.id == id) {
            Some(position) => position,
            None => {
                self.pages.push(PageState {
                    id: id.to_string(),
                    ..PageState::default()
                });
                self.pages.len() - 1
            }
        };
        &mut self.pages[position]
    }

    /// Inserts `node` and links it under its parent or page. A node added
    /// twice keeps the children already linked to it.
    pub(crate) fn insert_node(&mut self, mut node: LayoutNode) {
        if let Some(previous) = self.nodes.remove(&node.id) {
            node.children = previous.children;
            if node.rows.is_some() {
                node.rows = previous.rows;
            }
        }

        match (&node.parent, node.parent_row) {
            (Some(parent_id), row) => match self.nodes.get_mut(parent_id) {
                Some(parent) => link_child(parent, row, &node.id),
                None => log::warn!(
                    "parent '{}' of '{}' is not in the tree, node left unlinked",
                    parent_id,
                    node.id
                ),
            },
            (None, _) => {
                let page = self.page_mut(&node.page);
                if !page.top_level.contains(&node.id) {
                    page.top_level.push(node.id.clone());
                }
            }
        }

        self.nodes.insert(node.id.clone(), node);
    }

    pub(crate) fn row_mut(&mut self, id: &str, index: usize) -> Option<&mut NodeRow> {
        let rows = self.nodes.get_mut(id)?.rows.as_mut()?;
        ensure_row(rows, index);
        rows.get_mut(index)
    }
}

fn ensure_row(rows: &mut Vec<NodeRow>, index: usize) {
    while rows.len() <= index {
        let next = rows.len();
        rows.push(NodeRow::placeholder(next));
    }
}

fn link_child(parent: &mut LayoutNode, row: Option<usize>, child: &str) {
    let siblings = match (row, parent.rows.as_mut()) {
        (Some(index), Some(rows)) => {
            ensure_row(rows, index);
            &mut rows[index].children
        }
        _ => &mut parent.children,
    };
    if !siblings.iter().any(|existing| existing == child) {
        siblings.push(child.to_string());
    }
}

/// Closest match for `base_id`: same row path, then each shorter prefix of
/// it, then the top level. `accept` sees each candidate id with the number
/// of rows it is nested in.
pub(crate) fn closest_id<F>(base_id: &str, row_path: &[usize], accept: F) -> Option<String>
where
    F: Fn(&str, usize) -> bool,
{
    (0..=row_path.len())
        .rev()
        .map(|depth| (indexed_id(base_id, &row_path[..depth]), depth))
        .find(|(candidate, depth)| accept(candidate, *depth))
        .map(|(candidate, _)| candidate)
}

/// A node nested in `own` rows is reachable from a caller in `caller` rows
/// at `depth` only when those are the caller's first `depth` rows. Equal
/// indexes in another group's rows do not count.
pub(crate) fn shares_rows(own: &[Uuid], caller: &[Uuid], depth: usize) -> bool {
    own.len() == depth && caller.get(..depth) == Some(own)
}

impl NodeLookup for NodeTree {
    fn closest(
        &self,
        base_id: &str,
        row_path: &[usize],
        row_uuids: &[Uuid],
    ) -> Option<ResolvedNode> {
        closest_id(base_id, row_path, |candidate, depth| {
            self.nodes.get(candidate).is_some_and(|node| {
                node.base_id == base_id && shares_rows(&node.row_uuids, row_uuids, depth)
            })
        })
        .and_then(|id| self.nodes.get(&id))
        .map(LayoutNode::resolved)
    }
}
