//! Data model field paths such as `Group.SubGroup[{0}].Field`.
//!
//! `{n}` placeholders stand for the row index of the repeating group at
//! nesting depth `n` (0 is the outermost group) and are substituted from the
//! evaluation context before lookup.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::{ExprError, ExprResult};

static SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<name>[^.\[\]{}\s]+)(?:\[(?:(?P<fixed>\d+)|\{(?P<slot>\d+)\})\])?$")
        .expect("segment pattern compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowIndex {
    Fixed(usize),
    Placeholder(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSegment {
    pub name: String,
    pub index: Option<RowIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataModelPath {
    segments: Vec<PathSegment>,
}

impl DataModelPath {
    pub fn parse(raw: &str) -> ExprResult<Self> {
        if raw.trim().is_empty() {
            return Err(ExprError::invalid_path(raw, "path is empty"));
        }

        let mut segments = Vec::new();
        for part in raw.split('.') {
            let captures = SEGMENT.captures(part).ok_or_else(|| {
                ExprError::invalid_path(raw, format!("malformed segment '{}'", part))
            })?;
            let index = if let Some(fixed) = captures.name("fixed") {
                Some(RowIndex::Fixed(parse_index(raw, fixed.as_str())?))
            } else if let Some(slot) = captures.name("slot") {
                Some(RowIndex::Placeholder(parse_index(raw, slot.as_str())?))
            } else {
                None
            };
            segments.push(PathSegment {
                name: captures["name"].to_string(),
                index,
            });
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn has_placeholders(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment.index, Some(RowIndex::Placeholder(_))))
    }

    pub fn has_indices(&self) -> bool {
        self.segments.iter().any(|segment| segment.index.is_some())
    }

    /// Replaces every `{n}` with `row_path[n]`.
    pub fn resolve_placeholders(&self, row_path: &[usize]) -> ExprResult<Self> {
        let mut segments = self.segments.clone();
        for segment in &mut segments {
            if let Some(RowIndex::Placeholder(depth)) = segment.index {
                let row = row_path.get(depth).copied().ok_or_else(|| {
                    ExprError::invalid_path(
                        self.to_string(),
                        format!(
                            "placeholder {{{}}} used at repeating depth {}",
                            depth,
                            row_path.len()
                        ),
                    )
                })?;
                segment.index = Some(RowIndex::Fixed(row));
            }
        }
        Ok(Self { segments })
    }

    /// Fills in row indices this path leaves out, taken from `location`
    /// where both paths walk through the same fields.
    /// `Group.Name` seen from `Group[1]` becomes `Group[1].Name`.
    pub fn transpose(&self, location: &DataModelPath) -> Self {
        let mut segments = self.segments.clone();
        for (segment, current) in segments.iter_mut().zip(&location.segments) {
            if segment.name != current.name {
                break;
            }
            match (segment.index, current.index) {
                (None, Some(index)) => segment.index = Some(index),
                (Some(own), Some(other)) if own != other => break,
                _ => {}
            }
        }
        Self { segments }
    }

    /// Copy of this path with the last segment pointing at `row`.
    pub fn with_last_index(&self, row: usize) -> Self {
        let mut segments = self.segments.clone();
        if let Some(last) = segments.last_mut() {
            last.index = Some(RowIndex::Fixed(row));
        }
        Self { segments }
    }

    pub fn lookup<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        let mut current = root;
        for segment in &self.segments {
            current = current.get(segment.name.as_str())?;
            match segment.index {
                Some(RowIndex::Fixed(row)) => current = current.get(row)?,
                Some(RowIndex::Placeholder(_)) => return None,
                None => {}
            }
        }
        Some(current)
    }
}

impl fmt::Display for DataModelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, segment) in self.segments.iter().enumerate() {
            if position > 0 {
                f.write_str(".")?;
            }
            f.write_str(&segment.name)?;
            match segment.index {
                Some(RowIndex::Fixed(row)) => write!(f, "[{}]", row)?,
                Some(RowIndex::Placeholder(depth)) => write!(f, "[{{{}}}]", depth)?,
                None => {}
            }
        }
        Ok(())
    }
}

/// A field path qualified by the data model (data type) it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataReference {
    pub data_type: String,
    pub field: DataModelPath,
}

impl fmt::Display for DataReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.data_type, self.field)
    }
}

impl Serialize for DataReference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn parse_index(raw: &str, digits: &str) -> ExprResult<usize> {
    digits
        .parse()
        .map_err(|_| ExprError::invalid_path(raw, format!("index '{}' is too large", digits)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_and_prints_round_trip() {
        let path = DataModelPath::parse("Group[{0}].Sub[2].Field").expect("parse");
        assert_eq!(path.to_string(), "Group[{0}].Sub[2].Field");
        assert!(path.has_placeholders());
    }

    #[test]
    fn rejects_malformed_paths() {
        for raw in ["", "a..b", "a[", "a[x]", "a.{0}", "a b", ".a", "a."] {
            assert!(
                matches!(
                    DataModelPath::parse(raw),
                    Err(ExprError::InvalidPath { .. })
                ),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn placeholders_follow_row_depth() {
        let path = DataModelPath::parse("Outer[{0}].Inner[{1}].Name").expect("parse");
        let resolved = path.resolve_placeholders(&[2, 5]).expect("resolve");
        assert_eq!(resolved.to_string(), "Outer[2].Inner[5].Name");
        assert!(path.resolve_placeholders(&[2]).is_err());
    }

    #[test]
    fn transpose_fills_missing_indices_only() {
        let location = DataModelPath::parse("Group[1].Rows[3]").expect("parse");
        let relative = DataModelPath::parse("Group.Rows.Value").expect("parse");
        assert_eq!(
            relative.transpose(&location).to_string(),
            "Group[1].Rows[3].Value"
        );

        let pinned = DataModelPath::parse("Group[0].Rows.Value").expect("parse");
        assert_eq!(pinned.transpose(&location).to_string(), "Group[0].Rows.Value");

        let other = DataModelPath::parse("Other.Value").expect("parse");
        assert_eq!(other.transpose(&location).to_string(), "Other.Value");
    }

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let data = json!({ "Group": [ { "Name": "a" }, { "Name": "b" } ] });
        let path = DataModelPath::parse("Group[1].Name").expect("parse");
        assert_eq!(path.lookup(&data), Some(&json!("b")));
        let missing = DataModelPath::parse("Group[4].Name").expect("parse");
        assert_eq!(missing.lookup(&data), None);
    }
}
