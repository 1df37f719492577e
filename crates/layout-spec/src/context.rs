//! Read-only data an expression may query while it is evaluated.

use std::collections::{BTreeMap, HashMap};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ExprError, ExprResult};
use crate::path::{DataModelPath, DataReference};
use crate::value::ExprValue;

/// Instance metadata exposed through `instanceContext`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_owner_party_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_owner_party_type: Option<String>,
}

impl InstanceContext {
    pub const KEYS: [&'static str; 4] = [
        "instanceId",
        "appId",
        "instanceOwnerPartyId",
        "instanceOwnerPartyType",
    ];

    /// `None` for keys that are not instance properties at all.
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        let value = match key {
            "instanceId" => &self.instance_id,
            "appId" => &self.app_id,
            "instanceOwnerPartyId" => &self.instance_owner_party_id,
            "instanceOwnerPartyType" => &self.instance_owner_party_type,
            _ => return None,
        };
        Some(value.as_deref())
    }
}

/// The process task the user is currently on, with the actions they may take.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    pub element_id: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub actions: BTreeMap<String, bool>,
}

impl TaskContext {
    pub const AUTH_KEYS: [&'static str; 6] =
        ["read", "write", "instantiate", "confirm", "sign", "reject"];

    pub fn allows(&self, key: &str) -> bool {
        match key {
            "read" => self.read,
            "write" => self.write,
            other => self.actions.get(other).copied().unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<TaskContext>,
}

/// Snapshot supplied by the application shell for one generation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataSources {
    /// Data models keyed by data type.
    #[serde(default)]
    pub form_data: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_data_type: Option<String>,
    #[serde(default)]
    pub instance: InstanceContext,
    #[serde(default)]
    pub process: ProcessContext,
    #[serde(default)]
    pub application_settings: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "nb".into()
}

impl Default for DataSources {
    fn default() -> Self {
        Self {
            form_data: BTreeMap::new(),
            default_data_type: None,
            instance: InstanceContext::default(),
            process: ProcessContext::default(),
            application_settings: Map::new(),
            roles: Vec::new(),
            language: default_language(),
        }
    }
}

impl DataSources {
    /// Adds a data model. The first one added becomes the default data type.
    pub fn with_data_model(mut self, data_type: impl Into<String>, data: Value) -> Self {
        let data_type = data_type.into();
        if self.default_data_type.is_none() {
            self.default_data_type = Some(data_type.clone());
        }
        self.form_data.insert(data_type, data);
        self
    }

    pub fn with_instance(mut self, instance: InstanceContext) -> Self {
        self.instance = instance;
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.application_settings.insert(key.into(), value);
        self
    }

    pub fn has_data_type(&self, data_type: &str) -> bool {
        self.form_data.contains_key(data_type)
    }

    pub fn read_raw(&self, reference: &DataReference) -> Option<&Value> {
        self.form_data
            .get(&reference.data_type)
            .and_then(|model| reference.field.lookup(model))
    }

    /// Reads a scalar. Absent fields, objects and arrays read as null.
    pub fn read(&self, reference: &DataReference) -> ExprResult<ExprValue> {
        if !self.has_data_type(&reference.data_type) {
            return Err(ExprError::invalid_path(
                reference.field.to_string(),
                format!("data model with type '{}' not found", reference.data_type),
            ));
        }
        Ok(self
            .read_raw(reference)
            .and_then(ExprValue::from_json)
            .unwrap_or_default())
    }
}

/// A node as seen from an expression through `component`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedNode {
    pub id: String,
    pub binding: Option<DataReference>,
    pub hidden: bool,
    /// Uuid of every row the node sits in, outermost first.
    pub row_uuids: Vec<Uuid>,
}

/// Node lookup by base id, relative to the row position of the caller.
pub trait NodeLookup {
    /// Nearest node named `base_id`: same row first, then enclosing rows,
    /// then the top level. Rows match by uuid, not only by index.
    fn closest(
        &self,
        base_id: &str,
        row_path: &[usize],
        row_uuids: &[Uuid],
    ) -> Option<ResolvedNode>;
}

/// Lookup used when an expression is evaluated outside any node tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNodes;

impl NodeLookup for NoNodes {
    fn closest(
        &self,
        _base_id: &str,
        _row_path: &[usize],
        _row_uuids: &[Uuid],
    ) -> Option<ResolvedNode> {
        None
    }
}

static NO_NODES: NoNodes = NoNodes;

/// Field of a row object that carries the row's uuid.
pub const ROW_ID_KEY: &str = "altinnRowId";

/// Number of rows currently in each repeating group.
pub trait RowCountSource {
    fn row_count(&self, group_id: &str, binding: Option<&DataReference>) -> usize;

    /// Stored uuid of each row, `None` for rows that carry none. Sources
    /// that only know counts report every row as unidentified.
    fn row_ids(&self, group_id: &str, binding: Option<&DataReference>) -> Vec<Option<Uuid>> {
        vec![None; self.row_count(group_id, binding)]
    }
}

/// Counts rows as the length of the array the group binding points to.
/// Row objects with a parseable `altinnRowId` keep that uuid.
impl RowCountSource for DataSources {
    fn row_count(&self, group_id: &str, binding: Option<&DataReference>) -> usize {
        self.row_ids(group_id, binding).len()
    }

    fn row_ids(&self, _group_id: &str, binding: Option<&DataReference>) -> Vec<Option<Uuid>> {
        let Some(rows) = binding
            .and_then(|binding| self.read_raw(binding))
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };
        rows.iter()
            .map(|row| {
                row.get(ROW_ID_KEY)
                    .and_then(Value::as_str)
                    .and_then(|id| Uuid::parse_str(id).ok())
            })
            .collect()
    }
}

impl RowCountSource for HashMap<String, usize> {
    fn row_count(&self, group_id: &str, _binding: Option<&DataReference>) -> usize {
        self.get(group_id).copied().unwrap_or(0)
    }
}

impl RowCountSource for BTreeMap<String, usize> {
    fn row_count(&self, group_id: &str, _binding: Option<&DataReference>) -> usize {
        self.get(group_id).copied().unwrap_or(0)
    }
}

/// Everything one evaluation may look at. Built fresh for every node.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub sources: &'a DataSources,
    /// Data type of the layout being evaluated.
    pub data_type: Option<&'a str>,
    /// Row index of every enclosing repeating group, outermost first.
    pub row_path: &'a [usize],
    /// Uuid of every enclosing row, parallel to `row_path`.
    pub row_uuids: &'a [Uuid],
    /// Data model location of the innermost enclosing row.
    pub location: Option<&'a DataReference>,
    pub nodes: &'a dyn NodeLookup,
    pub positional: &'a [ExprValue],
}

impl<'a> EvalContext<'a> {
    pub fn new(sources: &'a DataSources) -> Self {
        Self {
            sources,
            data_type: None,
            row_path: &[],
            row_uuids: &[],
            location: None,
            nodes: &NO_NODES,
            positional: &[],
        }
    }

    pub fn with_data_type(mut self, data_type: Option<&'a str>) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_rows(mut self, row_path: &'a [usize], location: Option<&'a DataReference>) -> Self {
        self.row_path = row_path;
        self.location = location;
        self
    }

    pub fn with_row_uuids(mut self, row_uuids: &'a [Uuid]) -> Self {
        self.row_uuids = row_uuids;
        self
    }

    pub fn with_nodes(mut self, nodes: &'a dyn NodeLookup) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_positional(mut self, positional: &'a [ExprValue]) -> Self {
        self.positional = positional;
        self
    }

    pub fn default_data_type(&self) -> Option<&'a str> {
        self.data_type
            .or(self.sources.default_data_type.as_deref())
    }

    /// Turns a `dataModel` argument into a concrete reference: row
    /// placeholders are substituted, and paths without explicit rows are
    /// moved onto the current row.
    pub fn resolve_reference(
        &self,
        raw_path: &str,
        data_type: Option<&str>,
    ) -> ExprResult<DataReference> {
        let data_type = data_type
            .or(self.default_data_type())
            .ok_or_else(|| ExprError::invalid_path(raw_path, "no data type to look up in"))?;
        if !self.sources.has_data_type(data_type) {
            return Err(ExprError::invalid_path(
                raw_path,
                format!("data model with type '{}' not found", data_type),
            ));
        }

        let path = DataModelPath::parse(raw_path)?;
        let field = if path.has_placeholders() {
            path.resolve_placeholders(self.row_path)?
        } else if let Some(location) = self.location
            && location.data_type == data_type
        {
            path.transpose(&location.field)
        } else {
            path
        };

        Ok(DataReference {
            data_type: data_type.to_string(),
            field,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sources() -> DataSources {
        DataSources::default().with_data_model(
            "model",
            json!({ "Group": [ { "Name": "a" }, { "Name": "b", "Tags": [1, 2] } ] }),
        )
    }

    #[test]
    fn first_data_model_becomes_default() {
        let sources = sources().with_data_model("other", json!({}));
        assert_eq!(sources.default_data_type.as_deref(), Some("model"));
    }

    #[test]
    fn placeholders_use_row_path() {
        let sources = sources();
        let rows = [1];
        let ctx = EvalContext::new(&sources).with_rows(&rows, None);
        let reference = ctx
            .resolve_reference("Group[{0}].Name", None)
            .expect("resolve");
        assert_eq!(sources.read(&reference), Ok(ExprValue::from("b")));
    }

    #[test]
    fn unindexed_paths_follow_current_row() {
        let sources = sources();
        let location = DataReference {
            data_type: "model".into(),
            field: DataModelPath::parse("Group[0]").expect("parse"),
        };
        let rows = [0];
        let ctx = EvalContext::new(&sources).with_rows(&rows, Some(&location));
        let reference = ctx.resolve_reference("Group.Name", None).expect("resolve");
        assert_eq!(reference.field.to_string(), "Group[0].Name");
    }

    #[test]
    fn unknown_data_type_is_an_invalid_path() {
        let sources = sources();
        let ctx = EvalContext::new(&sources);
        assert!(matches!(
            ctx.resolve_reference("Name", Some("missing")),
            Err(ExprError::InvalidPath { .. })
        ));
    }

    #[test]
    fn containers_read_as_null() {
        let sources = sources();
        let reference = DataReference {
            data_type: "model".into(),
            field: DataModelPath::parse("Group[1].Tags").expect("parse"),
        };
        assert_eq!(sources.read(&reference), Ok(ExprValue::Null));
    }

    #[test]
    fn row_counts_come_from_bound_arrays() {
        let sources = sources();
        let binding = DataReference {
            data_type: "model".into(),
            field: DataModelPath::parse("Group").expect("parse"),
        };
        assert_eq!(sources.row_count("Group", Some(&binding)), 2);
        assert_eq!(sources.row_count("Group", None), 0);
    }

    #[test]
    fn row_ids_come_from_row_objects() {
        let id = Uuid::new_v4();
        let sources = DataSources::default().with_data_model(
            "model",
            json!({ "Group": [{ "altinnRowId": id.to_string() }, { "altinnRowId": "nope" }, {}] }),
        );
        let binding = DataReference {
            data_type: "model".into(),
            field: DataModelPath::parse("Group").expect("parse"),
        };
        assert_eq!(sources.row_ids("Group", Some(&binding)), vec![Some(id), None, None]);
        assert_eq!(sources.row_count("Group", Some(&binding)), 3);
    }
}
