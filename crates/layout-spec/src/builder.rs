//! One generation pass over a compiled layout.
//!
//! The builder walks pages and components depth first, instantiates the
//! rows of repeating groups, evaluates every dynamic property in the scope
//! of the node's row and queues the results on the commit queue. It never
//! reads or writes the published tree: `component` only sees nodes built
//! earlier in the same pass, so a forward reference reads as null.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use uuid::Uuid;

use crate::commit::CommitQueue;
use crate::context::{DataSources, EvalContext, NodeLookup, ResolvedNode, RowCountSource};
use crate::eval::Evaluator;
use crate::expr::TypedExpr;
use crate::functions::FunctionRegistry;
use crate::node::{HIDDEN, LayoutNode, PathStep, RowExtras, closest_id, indexed_id, shares_rows};
use crate::path::DataReference;
use crate::rows::{ArenaKey, RowRegistry};
use crate::spec::{GROUP_BINDING, SIMPLE_BINDING};
use crate::validate::{CompiledComponent, CompiledLayout};
use crate::value::ExprValue;

pub const REQUIRED: &str = "required";
pub const READ_ONLY: &str = "readOnly";

/// What one pass produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub nodes: usize,
    pub rows: usize,
    /// Property evaluations that failed and fell back to their default.
    pub failures: usize,
}

/// Nodes built so far in this pass, as `component` sees them.
#[derive(Default)]
struct BuiltNodes {
    nodes: HashMap<String, ResolvedNode>,
}

impl NodeLookup for BuiltNodes {
    fn closest(
        &self,
        base_id: &str,
        row_path: &[usize],
        row_uuids: &[Uuid],
    ) -> Option<ResolvedNode> {
        let id = closest_id(base_id, row_path, |candidate, depth| {
            self.nodes
                .get(candidate)
                .is_some_and(|node| shares_rows(&node.row_uuids, row_uuids, depth))
        })?;
        self.nodes.get(&id).cloned()
    }
}

/// Where in the tree the next component is placed.
#[derive(Debug, Clone, Default)]
struct Scope {
    page: String,
    parent: Option<String>,
    parent_row: Option<usize>,
    row_path: Vec<usize>,
    row_uuids: Vec<Uuid>,
    location: Vec<PathStep>,
    data_location: Option<DataReference>,
    hidden: bool,
}

impl Scope {
    fn page(page: &str, hidden: bool) -> Self {
        Self {
            page: page.to_string(),
            location: vec![PathStep {
                base_id: page.to_string(),
                row: None,
            }],
            hidden,
            ..Self::default()
        }
    }

    fn child_of(&self, node_id: &str, base_id: &str, hidden: bool) -> Self {
        let mut scope = self.clone();
        scope.parent = Some(node_id.to_string());
        scope.parent_row = None;
        scope.location.push(PathStep {
            base_id: base_id.to_string(),
            row: None,
        });
        scope.hidden = hidden;
        scope
    }

    fn row_of(&self, node_id: &str, base_id: &str, index: usize, uuid: Uuid, hidden: bool) -> Self {
        let mut scope = self.clone();
        scope.parent = Some(node_id.to_string());
        scope.parent_row = Some(index);
        scope.row_path.push(index);
        scope.row_uuids.push(uuid);
        scope.location.push(PathStep {
            base_id: base_id.to_string(),
            row: Some(index),
        });
        scope.hidden = hidden;
        scope
    }
}

struct Evaluated {
    hidden: bool,
    required: bool,
    read_only: bool,
    properties: BTreeMap<String, ExprValue>,
}

pub struct TreeBuilder<'a> {
    layout: &'a CompiledLayout,
    evaluator: Evaluator<'a>,
    sources: &'a DataSources,
    row_counts: &'a dyn RowCountSource,
    rows: &'a mut RowRegistry,
    queue: &'a CommitQueue,
    data_type: Option<&'a str>,
    built: BuiltNodes,
    failures: Cell<usize>,
    report: BuildReport,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(
        layout: &'a CompiledLayout,
        registry: &'a FunctionRegistry,
        sources: &'a DataSources,
        row_counts: &'a dyn RowCountSource,
        rows: &'a mut RowRegistry,
        queue: &'a CommitQueue,
    ) -> Self {
        Self {
            layout,
            evaluator: Evaluator::new(registry),
            sources,
            row_counts,
            rows,
            queue,
            data_type: layout.data_type.as_deref(),
            built: BuiltNodes::default(),
            failures: Cell::new(0),
            report: BuildReport::default(),
        }
    }

    /// Data type used for bindings and `dataModel` when the layout names none.
    pub fn with_fallback_data_type(mut self, data_type: Option<&'a str>) -> Self {
        self.data_type = self.data_type.or(data_type);
        self
    }

    pub fn build(mut self) -> BuildReport {
        let layout = self.layout;
        for page in layout.pages() {
            let root = Scope::page(&page.id, false);
            let hidden = self.flag(&page.hidden, &root, &page.id, HIDDEN);
            self.queue
                .set_page_prop(&page.id, HIDDEN, ExprValue::Bool(hidden));

            let scope = Scope::page(&page.id, hidden);
            for id in &page.top_level {
                self.build_component(id, &scope);
            }
        }
        self.report.failures = self.failures.get();
        log::debug!(
            "built {} node(s) and {} row(s), {} failed evaluation(s)",
            self.report.nodes,
            self.report.rows,
            self.report.failures
        );
        self.report
    }

    fn data_type(&self) -> Option<&'a str> {
        self.data_type
            .or(self.sources.default_data_type.as_deref())
    }

    fn build_component(&mut self, id: &str, scope: &Scope) {
        let layout = self.layout;
        let Some(component) = layout.component(id) else {
            log::warn!("component '{}' is not in the compiled layout", id);
            return;
        };
        let node_id = indexed_id(&component.id, &scope.row_path);
        let bindings = self.resolve_bindings(component, &node_id, scope);
        let evaluated = self.evaluate_component(component, &node_id, scope);
        let hidden = evaluated.hidden || scope.hidden;

        let mut node = LayoutNode::new(&node_id, &component.id, &component.kind, &scope.page);
        node.parent = scope.parent.clone();
        node.parent_row = scope.parent_row;
        node.row_path = scope.row_path.clone();
        node.row_uuids = scope.row_uuids.clone();
        node.location = scope.location.clone();
        node.data_location = scope.data_location.clone();
        node.bindings = bindings;
        node.initial_mask = component.initial_mask;
        if component.repeating {
            node.rows = Some(Vec::new());
        }
        let resolved = ResolvedNode {
            id: node_id.clone(),
            binding: node.bindings.get(SIMPLE_BINDING).cloned(),
            hidden,
            row_uuids: scope.row_uuids.clone(),
        };
        let group_binding = node.bindings.get(GROUP_BINDING).cloned();
        self.queue.add_node(node);

        self.queue
            .set_node_prop(&node_id, HIDDEN, ExprValue::Bool(hidden));
        self.queue
            .set_node_prop(&node_id, REQUIRED, ExprValue::Bool(evaluated.required));
        self.queue
            .set_node_prop(&node_id, READ_ONLY, ExprValue::Bool(evaluated.read_only));
        for (key, value) in evaluated.properties {
            self.queue.set_node_prop(&node_id, key, value);
        }

        self.built.nodes.insert(node_id.clone(), resolved);
        self.report.nodes += 1;

        if component.repeating {
            self.build_rows(component, &node_id, group_binding, scope, hidden);
        } else if !component.children.is_empty() {
            let children = scope.child_of(&node_id, &component.id, hidden);
            for child in &component.children {
                self.build_component(child, &children);
            }
        }
    }

    fn build_rows(
        &mut self,
        component: &CompiledComponent,
        node_id: &str,
        group_binding: Option<DataReference>,
        scope: &Scope,
        hidden: bool,
    ) {
        let mut ids = self.row_counts.row_ids(node_id, group_binding.as_ref());
        if let Some(max) = component.max_count
            && ids.len() > max
        {
            log::debug!("'{}' has {} row(s), capped at {}", node_id, ids.len(), max);
            ids.truncate(max);
        }

        let key = ArenaKey::new(&component.id, scope.row_uuids.last().copied());
        let mut group_path = scope.location.clone();
        group_path.push(PathStep {
            base_id: component.id.clone(),
            row: None,
        });
        let rows = self.rows.align(&key, &ids, &group_path);
        self.report.rows += rows.len();

        for row in rows {
            let index = row.index as usize;
            self.queue.set_row_uuid(node_id, index, row.uuid);

            let mut row_scope = scope.row_of(node_id, &component.id, index, row.uuid, hidden);
            if let Some(binding) = &group_binding {
                row_scope.data_location = Some(DataReference {
                    data_type: binding.data_type.clone(),
                    field: binding.field.with_last_index(index),
                });
            }

            let hidden_row = match &component.hidden_row {
                Some(expr) => self.flag(expr, &row_scope, node_id, "hiddenRow"),
                None => false,
            };
            self.queue.set_row_extras(
                node_id,
                index,
                RowExtras {
                    hidden_row,
                    location: row_scope.data_location.clone(),
                },
            );

            row_scope.hidden = hidden || hidden_row;
            for child in &component.children {
                self.build_component(child, &row_scope);
            }
        }
    }

    /// Data model bindings with row placeholders filled in and unindexed
    /// paths moved onto the current row.
    fn resolve_bindings(
        &self,
        component: &CompiledComponent,
        node_id: &str,
        scope: &Scope,
    ) -> BTreeMap<String, DataReference> {
        let mut resolved = BTreeMap::new();
        if component.bindings.is_empty() {
            return resolved;
        }
        let Some(data_type) = self.data_type() else {
            log::warn!("no data type for the bindings of '{}'", node_id);
            return resolved;
        };

        for (key, path) in &component.bindings {
            let field = if path.has_placeholders() {
                match path.resolve_placeholders(&scope.row_path) {
                    Ok(field) => field,
                    Err(err) => {
                        self.failures.set(self.failures.get() + 1);
                        log::warn!("binding '{}' of '{}' not resolved: {}", key, node_id, err);
                        continue;
                    }
                }
            } else if let Some(location) = &scope.data_location
                && location.data_type == data_type
            {
                path.transpose(&location.field)
            } else {
                path.clone()
            };
            resolved.insert(
                key.clone(),
                DataReference {
                    data_type: data_type.to_string(),
                    field,
                },
            );
        }
        resolved
    }

    fn evaluate_component(
        &self,
        component: &CompiledComponent,
        node_id: &str,
        scope: &Scope,
    ) -> Evaluated {
        Evaluated {
            hidden: self.flag(&component.hidden, scope, node_id, HIDDEN),
            required: self.flag(&component.required, scope, node_id, REQUIRED),
            read_only: self.flag(&component.read_only, scope, node_id, READ_ONLY),
            properties: component
                .properties
                .iter()
                .map(|(key, expr)| {
                    let value = self.evaluate(expr, scope, node_id, key, ExprValue::Null);
                    (key.clone(), value)
                })
                .collect(),
        }
    }

    fn flag(&self, expr: &TypedExpr, scope: &Scope, owner: &str, property: &str) -> bool {
        self.evaluate(expr, scope, owner, property, ExprValue::Bool(false))
            .as_bool()
            .unwrap_or(false)
    }

    fn evaluate(
        &self,
        expr: &TypedExpr,
        scope: &Scope,
        owner: &str,
        property: &str,
        default: ExprValue,
    ) -> ExprValue {
        let ctx = EvalContext::new(self.sources)
            .with_data_type(self.data_type())
            .with_rows(&scope.row_path, scope.data_location.as_ref())
            .with_row_uuids(&scope.row_uuids)
            .with_nodes(&self.built);
        match self.evaluator.evaluate(expr, &ctx) {
            Ok(value) => value,
            Err(err) => {
                self.failures.set(self.failures.get() + 1);
                log::warn!(
                    "'{}.{}' = {} failed, using {}: {}",
                    owner,
                    property,
                    expr.expr,
                    default.display_text(),
                    err
                );
                default
            }
        }
    }
}
