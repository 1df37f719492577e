//! Static checks on a layout and compilation into the form the builder
//! walks. Everything that can be rejected before a user touches the form
//! is rejected here: structural problems, unknown functions, arity errors
//! and malformed data model paths.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ExprError, LayoutError};
use crate::expr::TypedExpr;
use crate::functions::FunctionRegistry;
use crate::path::DataModelPath;
use crate::spec::{ComponentSpec, LayoutSet};
use crate::value::{ExprType, ExprValue};
use crate::visibility::ValidationMask;

static ROW_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\d+$").expect("row suffix pattern compiles"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutIssue {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    pub message: String,
}

impl fmt::Display for LayoutIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.code)?;
        let mut location = Vec::new();
        if let Some(page) = &self.page {
            location.push(page.as_str());
        }
        if let Some(component) = &self.component {
            location.push(component.as_str());
        }
        if let Some(property) = &self.property {
            location.push(property.as_str());
        }
        if !location.is_empty() {
            write!(f, " {}", location.join("."))?;
        }
        write!(f, ": {}", self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<LayoutIssue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledComponent {
    pub id: String,
    pub kind: String,
    pub page: String,
    pub bindings: BTreeMap<String, DataModelPath>,
    pub children: Vec<String>,
    pub repeating: bool,
    pub max_count: Option<usize>,
    pub hidden: TypedExpr,
    pub required: TypedExpr,
    pub read_only: TypedExpr,
    pub hidden_row: Option<TypedExpr>,
    pub properties: BTreeMap<String, TypedExpr>,
    pub initial_mask: ValidationMask,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPage {
    pub id: String,
    pub hidden: TypedExpr,
    /// Components not claimed as a child, in listed order.
    pub top_level: Vec<String>,
}

/// A validated layout with every expression parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledLayout {
    pub data_type: Option<String>,
    pages: Vec<CompiledPage>,
    components: BTreeMap<String, CompiledComponent>,
}

impl CompiledLayout {
    pub fn pages(&self) -> &[CompiledPage] {
        &self.pages
    }

    pub fn component(&self, id: &str) -> Option<&CompiledComponent> {
        self.components.get(id)
    }

    pub fn components(&self) -> impl Iterator<Item = &CompiledComponent> {
        self.components.values()
    }
}

/// Checks `layout` without compiling it.
pub fn validate(layout: &LayoutSet, registry: &FunctionRegistry) -> ValidationReport {
    let mut compiler = Compiler::new(registry, ValidationMask::SCHEMA);
    compiler.run(layout);
    ValidationReport {
        valid: compiler.issues.is_empty(),
        issues: compiler.issues,
    }
}

/// Validates and compiles `layout`. `default_show` applies to components
/// without their own `showValidations`.
pub fn compile(
    layout: &LayoutSet,
    registry: &FunctionRegistry,
    default_show: ValidationMask,
) -> Result<CompiledLayout, LayoutError> {
    let mut compiler = Compiler::new(registry, default_show);
    let compiled = compiler.run(layout);
    if compiler.issues.is_empty() {
        Ok(compiled)
    } else {
        Err(LayoutError::Invalid(compiler.issues))
    }
}

struct Compiler<'r> {
    registry: &'r FunctionRegistry,
    default_show: ValidationMask,
    issues: Vec<LayoutIssue>,
}

impl<'r> Compiler<'r> {
    fn new(registry: &'r FunctionRegistry, default_show: ValidationMask) -> Self {
        Self {
            registry,
            default_show,
            issues: Vec::new(),
        }
    }

    fn issue(
        &mut self,
        code: &str,
        page: Option<&str>,
        component: Option<&str>,
        property: Option<&str>,
        message: impl Into<String>,
    ) {
        self.issues.push(LayoutIssue {
            code: code.into(),
            page: page.map(Into::into),
            component: component.map(Into::into),
            property: property.map(Into::into),
            message: message.into(),
        });
    }

    fn run(&mut self, layout: &LayoutSet) -> CompiledLayout {
        let mut seen_pages = BTreeSet::new();
        for page in &layout.pages {
            if page.id.trim().is_empty() {
                self.issue("invalid_id", None, None, None, "page id is empty");
            } else if !seen_pages.insert(page.id.as_str()) {
                self.issue("duplicate_id", Some(&page.id), None, None, "page id is used twice");
            }
        }

        let mut owners: HashMap<&str, &str> = HashMap::new();
        for (page, component) in layout.components() {
            if let Some(previous) = owners.insert(component.id.as_str(), page.id.as_str()) {
                self.issue(
                    "duplicate_id",
                    Some(&page.id),
                    Some(&component.id),
                    None,
                    format!("id already used on page '{}'", previous),
                );
            }
            self.check_id(&page.id, component);
        }

        let parents = self.check_children(layout, &owners);
        self.check_cycles(layout, &owners);

        let mut pages = Vec::with_capacity(layout.pages.len());
        let mut components = BTreeMap::new();
        for page in &layout.pages {
            let hidden = self.expression(
                page.hidden.as_ref(),
                ExprType::Boolean,
                Value::Bool(false),
                &page.id,
                None,
                "hidden",
            );
            let top_level = page
                .components
                .iter()
                .filter(|component| !parents.contains_key(component.id.as_str()))
                .map(|component| component.id.clone())
                .collect();
            pages.push(CompiledPage {
                id: page.id.clone(),
                hidden,
                top_level,
            });

            for component in &page.components {
                let compiled = self.component(&page.id, component);
                components.entry(component.id.clone()).or_insert(compiled);
            }
        }

        CompiledLayout {
            data_type: layout.data_type.clone(),
            pages,
            components,
        }
    }

    fn check_id(&mut self, page: &str, component: &ComponentSpec) {
        if component.id.trim().is_empty() {
            self.issue("invalid_id", Some(page), None, None, "component id is empty");
        } else if ROW_SUFFIX.is_match(&component.id) {
            self.issue(
                "invalid_id",
                Some(page),
                Some(&component.id),
                None,
                "ids ending in '-<number>' clash with row instance ids",
            );
        }
    }

    /// Returns child id -> parent id for every valid claim.
    fn check_children<'a>(
        &mut self,
        layout: &'a LayoutSet,
        owners: &HashMap<&str, &str>,
    ) -> HashMap<&'a str, &'a str> {
        let mut parents: HashMap<&'a str, &'a str> = HashMap::new();
        for (page, component) in layout.components() {
            for child in &component.children {
                match owners.get(child.as_str()) {
                    None => self.issue(
                        "missing_child",
                        Some(&page.id),
                        Some(&component.id),
                        Some("children"),
                        format!("child '{}' does not exist", child),
                    ),
                    Some(child_page) if *child_page != page.id => self.issue(
                        "cross_page_child",
                        Some(&page.id),
                        Some(&component.id),
                        Some("children"),
                        format!("child '{}' lives on page '{}'", child, child_page),
                    ),
                    Some(_) => {
                        if let Some(previous) = parents.get(child.as_str()) {
                            self.issue(
                                "multiple_parents",
                                Some(&page.id),
                                Some(&component.id),
                                Some("children"),
                                format!("child '{}' is already claimed by '{}'", child, previous),
                            );
                        } else {
                            parents.insert(child.as_str(), component.id.as_str());
                        }
                    }
                }
            }
        }
        parents
    }

    fn check_cycles(&mut self, layout: &LayoutSet, owners: &HashMap<&str, &str>) {
        let graph: HashMap<&str, &[String]> = layout
            .components()
            .map(|(_, component)| (component.id.as_str(), component.children.as_slice()))
            .collect();
        let mut done: BTreeSet<&str> = BTreeSet::new();
        let mut reported: BTreeSet<String> = BTreeSet::new();

        for start in graph.keys().copied().collect::<BTreeSet<_>>() {
            let mut stack: Vec<&str> = Vec::new();
            let found = find_cycle(start, &graph, &mut stack, &mut done);
            // members of a reported cycle are not searched again
            done.extend(stack.iter().copied());
            if let Some(at) = found
                && reported.insert(at.to_string())
            {
                let page = owners.get(at).copied();
                self.issue(
                    "cycle",
                    page,
                    Some(at),
                    Some("children"),
                    "component is its own ancestor",
                );
            }
        }
    }

    fn component(&mut self, page: &str, spec: &ComponentSpec) -> CompiledComponent {
        let id = spec.id.as_str();
        let mut bindings = BTreeMap::new();
        for (key, raw) in &spec.data_model_bindings {
            match DataModelPath::parse(raw) {
                Ok(path) => {
                    bindings.insert(key.clone(), path);
                }
                Err(err) => self.issue(
                    "invalid_binding",
                    Some(page),
                    Some(id),
                    Some(key),
                    err.to_string(),
                ),
            }
        }

        let boolean = |compiler: &mut Self, raw: Option<&Value>, name: &str| {
            compiler.expression(raw, ExprType::Boolean, Value::Bool(false), page, Some(id), name)
        };
        let hidden = boolean(self, spec.hidden.as_ref(), "hidden");
        let required = boolean(self, spec.required.as_ref(), "required");
        let read_only = boolean(self, spec.read_only.as_ref(), "readOnly");
        let hidden_row = spec
            .hidden_row
            .as_ref()
            .map(|raw| boolean(self, Some(raw), "hiddenRow"));

        let properties = spec
            .properties
            .iter()
            .map(|(key, raw)| {
                let expr = self.expression(Some(raw), ExprType::Any, Value::Null, page, Some(id), key);
                (key.clone(), expr)
            })
            .collect();

        let shown = spec
            .show_validations
            .as_deref()
            .map(ValidationMask::from_categories)
            .unwrap_or(self.default_show);

        CompiledComponent {
            id: spec.id.clone(),
            kind: spec.kind.clone(),
            page: page.to_string(),
            bindings,
            children: spec.children.clone(),
            repeating: spec.repeating,
            max_count: spec.max_count,
            hidden,
            required,
            read_only,
            hidden_row,
            properties,
            initial_mask: shown | ValidationMask::BACKEND,
        }
    }

    fn expression(
        &mut self,
        raw: Option<&Value>,
        expected: ExprType,
        default: Value,
        page: &str,
        component: Option<&str>,
        property: &str,
    ) -> TypedExpr {
        let raw = raw.unwrap_or(&default);
        match TypedExpr::parse(raw, self.registry, expected) {
            Ok(expr) => expr,
            Err(err) => {
                self.expression_issue(&err, page, component, property);
                TypedExpr::literal(ExprValue::from_json(&default).unwrap_or_default(), expected)
            }
        }
    }

    fn expression_issue(&mut self, err: &ExprError, page: &str, component: Option<&str>, property: &str) {
        self.issue(err.code(), Some(page), component, Some(property), err.to_string());
    }
}

/// Depth-first search; returns a node found on the current stack.
fn find_cycle<'a>(
    id: &'a str,
    graph: &HashMap<&'a str, &'a [String]>,
    stack: &mut Vec<&'a str>,
    done: &mut BTreeSet<&'a str>,
) -> Option<&'a str> {
    if stack.contains(&id) {
        return Some(id);
    }
    if done.contains(id) {
        return None;
    }
    stack.push(id);
    for child in graph.get(id).copied().unwrap_or_default() {
        if let Some(found) = find_cycle(child.as_str(), graph, stack, done) {
            return Some(found);
        }
    }
    stack.pop();
    done.insert(id);
    None
}
