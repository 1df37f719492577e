use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LayoutError;
use crate::spec::component::ComponentSpec;

/// A page of components. Components are listed flat; groups reference
/// their children by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<Value>,
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
}

/// Top-level layout definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LayoutSet {
    /// Data type bindings and `dataModel` lookups default to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    pub pages: Vec<PageSpec>,
}

impl LayoutSet {
    pub fn from_json_str(raw: &str) -> Result<Self, LayoutError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn components(&self) -> impl Iterator<Item = (&PageSpec, &ComponentSpec)> {
        self.pages
            .iter()
            .flat_map(|page| page.components.iter().map(move |component| (page, component)))
    }

    pub fn schema() -> Value {
        serde_json::to_value(schemars::schema_for!(LayoutSet)).unwrap_or(Value::Null)
    }
}
