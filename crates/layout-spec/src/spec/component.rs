use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::visibility::ValidationCategory;

/// Binding key holding the array a repeating group iterates over.
pub const GROUP_BINDING: &str = "group";
/// Binding key read by `component()`.
pub const SIMPLE_BINDING: &str = "simpleBinding";

/// One component as written in a layout file. Dynamic properties hold
/// either a literal or an expression array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data_model_bindings: BTreeMap<String, String>,
    /// Ids of child components on the same page.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(default)]
    pub repeating: bool,
    /// Upper bound on the number of rows instantiated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<Value>,
    /// Evaluated per row of a repeating group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden_row: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_validations: Option<Vec<ValidationCategory>>,
    /// Free-form dynamic properties, evaluated without a declared type.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}
