use serde_json::{Map, Value, json};

use crate::builder::{READ_ONLY, REQUIRED};
use crate::context::DataSources;
use crate::node::{LayoutNode, NodeTree};
use crate::value::ExprValue;
use crate::visibility::{ValidationMask, VisibilityTree};

/// One node as shown to renderers.
#[derive(Debug, Clone)]
pub struct RenderNode {
    pub id: String,
    pub kind: String,
    pub page: String,
    /// Nesting below the page, for indentation.
    pub depth: usize,
    pub hidden: bool,
    pub required: bool,
    pub read_only: bool,
    pub binding: Option<String>,
    pub current_value: Option<Value>,
    pub mask: ValidationMask,
    pub rows: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RenderPage {
    pub id: String,
    pub hidden: bool,
    pub visible_nodes: usize,
    pub total_nodes: usize,
}

/// Collected payload used by both text and JSON renderers.
#[derive(Debug, Clone)]
pub struct RenderPayload {
    pub generation: u64,
    pub pages: Vec<RenderPage>,
    pub nodes: Vec<RenderNode>,
}

/// Build the renderer payload from one tree snapshot, its visibility masks
/// and the data it was generated from.
pub fn build_render_payload(
    tree: &NodeTree,
    visibility: &VisibilityTree,
    sources: &DataSources,
) -> RenderPayload {
    let nodes = tree
        .walk()
        .into_iter()
        .map(|node| RenderNode {
            id: node.id.clone(),
            kind: node.component_type.clone(),
            page: node.page.clone(),
            depth: node.location.len().saturating_sub(1),
            hidden: node.is_hidden(),
            required: flag(node, REQUIRED),
            read_only: flag(node, READ_ONLY),
            binding: node.simple_binding().map(ToString::to_string),
            current_value: node
                .simple_binding()
                .and_then(|binding| sources.read_raw(binding))
                .cloned(),
            mask: if visibility.contains(&node.visibility_path()) {
                visibility.visibility_for_node(node, None)
            } else {
                ValidationMask::NONE
            },
            rows: node
                .rows()
                .iter()
                .map(|row| row.uuid.to_string())
                .collect(),
        })
        .collect::<Vec<_>>();

    let pages = tree
        .pages()
        .iter()
        .map(|page| {
            let on_page = nodes.iter().filter(|node| node.page == page.id);
            RenderPage {
                id: page.id.clone(),
                hidden: page.is_hidden(),
                visible_nodes: on_page.clone().filter(|node| !node.hidden).count(),
                total_nodes: on_page.count(),
            }
        })
        .collect();

    RenderPayload {
        generation: tree.generation(),
        pages,
        nodes,
    }
}

fn flag(node: &LayoutNode, key: &str) -> bool {
    matches!(node.prop(key), Some(ExprValue::Bool(true)))
}

/// Render the payload as a structured JSON-friendly value.
pub fn render_json(payload: &RenderPayload) -> Value {
    let nodes = payload
        .nodes
        .iter()
        .map(|node| {
            let mut map = Map::new();
            map.insert("id".into(), Value::String(node.id.clone()));
            map.insert("type".into(), Value::String(node.kind.clone()));
            map.insert("page".into(), Value::String(node.page.clone()));
            map.insert("hidden".into(), Value::Bool(node.hidden));
            map.insert("required".into(), Value::Bool(node.required));
            map.insert("read_only".into(), Value::Bool(node.read_only));
            if let Some(binding) = &node.binding {
                map.insert("binding".into(), Value::String(binding.clone()));
            }
            if let Some(current_value) = &node.current_value {
                map.insert("current_value".into(), current_value.clone());
            }
            map.insert("validations".into(), Value::String(node.mask.to_string()));
            if !node.rows.is_empty() {
                map.insert(
                    "rows".into(),
                    Value::Array(node.rows.iter().cloned().map(Value::String).collect()),
                );
            }
            Value::Object(map)
        })
        .collect::<Vec<_>>();

    let pages = payload
        .pages
        .iter()
        .map(|page| {
            json!({
                "id": page.id,
                "hidden": page.hidden,
                "visible": page.visible_nodes,
                "total": page.total_nodes,
            })
        })
        .collect::<Vec<_>>();

    json!({
        "generation": payload.generation,
        "pages": pages,
        "nodes": nodes,
    })
}

/// Render the payload as an indented outline, hidden nodes omitted.
pub fn render_text(payload: &RenderPayload) -> String {
    let mut lines = vec![format!("Generation: {}", payload.generation)];
    for page in &payload.pages {
        let mut header = format!(
            "Page: {} ({}/{} visible)",
            page.id, page.visible_nodes, page.total_nodes
        );
        if page.hidden {
            header.push_str(" [hidden]");
        }
        lines.push(header);

        for node in payload
            .nodes
            .iter()
            .filter(|node| node.page == page.id && !node.hidden)
        {
            let mut entry = format!("{}- {} ({})", "  ".repeat(node.depth + 1), node.id, node.kind);
            if node.required {
                entry.push_str(" [required]");
            }
            if node.read_only {
                entry.push_str(" [read-only]");
            }
            if let Some(value) = &node.current_value {
                entry.push_str(&format!(" = {}", value_to_display(value)));
            }
            if !node.rows.is_empty() {
                entry.push_str(&format!(" {} row(s)", node.rows.len()));
            }
            lines.push(entry);
        }
    }
    lines.join("\n")
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "null".into(),
        other => other.to_string(),
    }
}
