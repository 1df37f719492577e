//! Which categories of validation message each node may currently show.
//!
//! The tree mirrors the node tree: one entry per node, keyed by base id
//! under its parent, with a per-row list on repeating groups. Entries are
//! created when a node first appears and survive regenerations, so a mask
//! revealed by the user stays revealed until the node goes away.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::node::{LayoutNode, PathStep};

const ATTACHMENT_PREFIX: &str = "attachment/";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct ValidationMask(u32);

impl ValidationMask {
    pub const NONE: Self = Self(0);
    pub const SCHEMA: Self = Self(1);
    pub const COMPONENT: Self = Self(1 << 1);
    pub const EXPRESSION: Self = Self(1 << 2);
    pub const CUSTOM_BACKEND: Self = Self(1 << 3);
    pub const REQUIRED: Self = Self(1 << 4);
    pub const ALL_EXCEPT_REQUIRED: Self = Self(15);
    pub const ALL: Self = Self(31);
    /// Backend validations are never hidden.
    pub const BACKEND: Self = Self(1 << 6);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn from_categories(categories: &[ValidationCategory]) -> Self {
        categories
            .iter()
            .fold(Self::NONE, |mask, category| mask | category.mask())
    }
}

impl BitOr for ValidationMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ValidationMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ValidationMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for ValidationMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::SCHEMA, "Schema"),
            (Self::COMPONENT, "Component"),
            (Self::EXPRESSION, "Expression"),
            (Self::CUSTOM_BACKEND, "CustomBackend"),
            (Self::REQUIRED, "Required"),
            (Self::BACKEND, "Backend"),
        ];
        let set = names
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>();
        if set.is_empty() {
            f.write_str("None")
        } else {
            f.write_str(&set.join("|"))
        }
    }
}

/// Category names accepted by a component's `showValidations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ValidationCategory {
    Schema,
    Component,
    Expression,
    CustomBackend,
    Required,
    AllExceptRequired,
    All,
}

impl ValidationCategory {
    pub fn mask(self) -> ValidationMask {
        match self {
            ValidationCategory::Schema => ValidationMask::SCHEMA,
            ValidationCategory::Component => ValidationMask::COMPONENT,
            ValidationCategory::Expression => ValidationMask::EXPRESSION,
            ValidationCategory::CustomBackend => ValidationMask::CUSTOM_BACKEND,
            ValidationCategory::Required => ValidationMask::REQUIRED,
            ValidationCategory::AllExceptRequired => ValidationMask::ALL_EXCEPT_REQUIRED,
            ValidationCategory::All => ValidationMask::ALL,
        }
    }
}

/// User interactions that reveal validation messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionEvent {
    /// Focus left the node.
    Blur { node: String },
    /// The form was submitted.
    Submit,
    /// Explicit overwrite, optionally of one row of a repeating group.
    Reveal {
        node: String,
        mask: ValidationMask,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        row: Option<usize>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Visibility {
    pub mask: ValidationMask,
    #[serde(skip)]
    pub initial: ValidationMask,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, Visibility>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Option<Visibility>>,
}

impl Visibility {
    fn new(initial: ValidationMask) -> Self {
        Self {
            mask: initial,
            initial,
            ..Self::default()
        }
    }

    fn is_vacant(&self) -> bool {
        self.children.is_empty() && self.items.iter().all(Option::is_none)
    }

    fn prune_items(&mut self) {
        while matches!(self.items.last(), Some(None)) {
            self.items.pop();
        }
    }

    fn reveal(&mut self, mask: ValidationMask) {
        self.mask |= mask;
        for child in self.children.values_mut() {
            child.reveal(mask);
        }
        for item in self.items.iter_mut().flatten() {
            item.reveal(mask);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VisibilityTree {
    root: Visibility,
}

impl VisibilityTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> &Visibility {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Creates the node's entry with its initial mask. Existing entries are
    /// left untouched. Returns whether an entry was created.
    pub fn add_visibility_for_node(&mut self, node: &LayoutNode) -> bool {
        self.add_at(&node.visibility_path(), node.initial_mask)
    }

    pub fn remove_visibility_for_node(&mut self, node: &LayoutNode) -> bool {
        self.remove_at(&node.visibility_path())
    }

    /// Overwrites the mask of the node, or of one of its rows. The node's
    /// initial mask is always kept.
    pub fn set_visibility_for_node(
        &mut self,
        node: &LayoutNode,
        mask: ValidationMask,
        row: Option<usize>,
    ) -> bool {
        self.set_at(&node.visibility_path(), row, mask)
    }

    /// Adds `mask` to what the node already shows.
    pub fn reveal_for_node(&mut self, node: &LayoutNode, mask: ValidationMask) -> bool {
        let current = self.visibility_for_node(node, None);
        self.set_at(&node.visibility_path(), None, current | mask)
    }

    pub fn visibility_for_node(&self, node: &LayoutNode, row: Option<usize>) -> ValidationMask {
        self.mask_at(&node.visibility_path(), row)
    }

    pub fn set_attachment_visibility(
        &mut self,
        node: &LayoutNode,
        attachment_id: &str,
        mask: ValidationMask,
    ) -> bool {
        let path = node.visibility_path();
        let Some(entry) = self.entry_mut(&path) else {
            log::warn!(
                "no visibility entry for '{}', attachment '{}' not updated",
                node.id,
                attachment_id
            );
            return false;
        };
        let initial = entry.initial;
        let attachment = entry
            .children
            .entry(format!("{}{}", ATTACHMENT_PREFIX, attachment_id))
            .or_insert_with(|| Visibility::new(initial));
        attachment.mask = mask | attachment.initial;
        true
    }

    /// Attachment mask, falling back to the node's own mask until the
    /// attachment has been written.
    pub fn attachment_visibility(&self, node: &LayoutNode, attachment_id: &str) -> ValidationMask {
        let path = node.visibility_path();
        match self.entry(&path) {
            Some(entry) => entry
                .children
                .get(&format!("{}{}", ATTACHMENT_PREFIX, attachment_id))
                .unwrap_or(entry)
                .mask,
            None => {
                log::warn!("no visibility entry for '{}'", node.id);
                ValidationMask::NONE
            }
        }
    }

    /// Removes the row entry at `index` of the group, shifting later rows
    /// down.
    pub fn remove_row(&mut self, group: &LayoutNode, index: usize) {
        self.remove_row_at(&group.visibility_path(), index);
    }

    /// Opens an empty slot at `index`, shifting later rows up.
    pub fn insert_row(&mut self, group: &LayoutNode, index: usize) {
        self.insert_row_at(&group.visibility_path(), index);
    }

    pub fn remove_row_at(&mut self, group_path: &[PathStep], index: usize) {
        if let Some(entry) = self.entry_mut(group_path)
            && index < entry.items.len()
        {
            entry.items.remove(index);
            entry.prune_items();
        }
    }

    pub fn insert_row_at(&mut self, group_path: &[PathStep], index: usize) {
        if let Some(entry) = self.entry_mut(group_path)
            && index < entry.items.len()
        {
            entry.items.insert(index, None);
        }
    }

    /// ORs `mask` into every entry, as on submit.
    pub fn reveal_all(&mut self, mask: ValidationMask) {
        for child in self.root.children.values_mut() {
            child.reveal(mask);
        }
    }

    pub fn add_at(&mut self, path: &[PathStep], initial: ValidationMask) -> bool {
        let Some((last, parents)) = path.split_last() else {
            return false;
        };
        let Some(parent) = self.parent_for_insert(parents) else {
            log::warn!(
                "cannot add visibility for '{}': parent path {} is missing",
                last.base_id,
                describe(parents)
            );
            return false;
        };
        if parent.children.contains_key(&last.base_id) {
            return false;
        }
        parent
            .children
            .insert(last.base_id.clone(), Visibility::new(initial));
        true
    }

    pub fn remove_at(&mut self, path: &[PathStep]) -> bool {
        remove_in(&mut self.root, path)
    }

    pub fn set_at(&mut self, path: &[PathStep], row: Option<usize>, mask: ValidationMask) -> bool {
        let Some(entry) = self.entry_mut(path) else {
            log::warn!("visibility path {} not found, mask not set", describe(path));
            return false;
        };
        let target = match row {
            None => Some(entry),
            Some(row) => entry.items.get_mut(row).and_then(Option::as_mut),
        };
        match target {
            Some(target) => {
                target.mask = mask | target.initial;
                true
            }
            None => {
                log::warn!(
                    "visibility path {} has no row {:?}, mask not set",
                    describe(path),
                    row
                );
                false
            }
        }
    }

    /// Mask at `path`; misses are logged and read as an empty mask.
    pub fn mask_at(&self, path: &[PathStep], row: Option<usize>) -> ValidationMask {
        let entry = self.entry(path).and_then(|entry| match row {
            None => Some(entry),
            Some(row) => entry.items.get(row).and_then(Option::as_ref),
        });
        match entry {
            Some(entry) => entry.mask,
            None => {
                log::warn!("visibility path {} (row {:?}) not found", describe(path), row);
                ValidationMask::NONE
            }
        }
    }

    pub fn contains(&self, path: &[PathStep]) -> bool {
        self.entry(path).is_some()
    }

    fn entry(&self, path: &[PathStep]) -> Option<&Visibility> {
        let mut current = &self.root;
        for step in path {
            current = current.children.get(&step.base_id)?;
            if let Some(row) = step.row {
                current = current.items.get(row)?.as_ref()?;
            }
        }
        Some(current)
    }

    fn entry_mut(&mut self, path: &[PathStep]) -> Option<&mut Visibility> {
        let mut current = &mut self.root;
        for step in path {
            current = current.children.get_mut(&step.base_id)?;
            if let Some(row) = step.row {
                current = current.items.get_mut(row)?.as_mut()?;
            }
        }
        Some(current)
    }

    /// Walks to the parent entry, creating row entries on the way. Node
    /// entries are never created implicitly.
    fn parent_for_insert(&mut self, path: &[PathStep]) -> Option<&mut Visibility> {
        let mut current = &mut self.root;
        for step in path {
            current = current.children.get_mut(&step.base_id)?;
            if let Some(row) = step.row {
                let initial = current.initial;
                if current.items.len() <= row {
                    current.items.resize_with(row + 1, || None);
                }
                current = current.items[row].get_or_insert_with(|| Visibility::new(initial));
            }
        }
        Some(current)
    }
}

fn remove_in(entry: &mut Visibility, path: &[PathStep]) -> bool {
    let Some((step, rest)) = path.split_first() else {
        return false;
    };
    if rest.is_empty() {
        return entry.children.remove(&step.base_id).is_some();
    }

    let Some(child) = entry.children.get_mut(&step.base_id) else {
        return false;
    };
    let Some(row) = step.row else {
        return remove_in(child, rest);
    };

    let Some(Some(item)) = child.items.get_mut(row) else {
        return false;
    };
    let removed = remove_in(item, rest);
    if removed && item.is_vacant() {
        child.items[row] = None;
        child.prune_items();
    }
    removed
}

fn describe(path: &[PathStep]) -> String {
    if path.is_empty() {
        return "<root>".into();
    }
    path.iter()
        .map(|step| match step.row {
            Some(row) => format!("{}[{}]", step.base_id, row),
            None => step.base_id.clone(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(base_id: &str, row: Option<usize>) -> PathStep {
        PathStep {
            base_id: base_id.into(),
            row,
        }
    }

    fn initial() -> ValidationMask {
        ValidationMask::SCHEMA | ValidationMask::BACKEND
    }

    fn tree_with_row_child() -> VisibilityTree {
        let mut tree = VisibilityTree::new();
        assert!(tree.add_at(&[step("page", None)], initial()));
        assert!(tree.add_at(&[step("page", None), step("Group", None)], initial()));
        assert!(tree.add_at(
            &[step("page", None), step("Group", Some(0)), step("Name", None)],
            initial()
        ));
        tree
    }

    #[test]
    fn category_masks_match_bits() {
        assert_eq!(ValidationMask::ALL_EXCEPT_REQUIRED.bits(), 15);
        assert_eq!(ValidationMask::ALL.bits(), 31);
        assert_eq!(
            ValidationMask::from_categories(&[
                ValidationCategory::Schema,
                ValidationCategory::Required
            ])
            .bits(),
            17
        );
        assert_eq!(ValidationMask::from_bits(65).to_string(), "Schema|Backend");
    }

    #[test]
    fn setting_zero_keeps_initial_bits() {
        let mut tree = tree_with_row_child();
        let path = [step("page", None), step("Group", None)];
        assert!(tree.set_at(&path, None, ValidationMask::NONE));
        assert_eq!(tree.mask_at(&path, None), initial());
        assert!(tree.set_at(&path, None, ValidationMask::REQUIRED));
        assert_eq!(tree.mask_at(&path, None), initial() | ValidationMask::REQUIRED);
    }

    #[test]
    fn removing_last_child_of_row_removes_the_row_list() {
        let mut tree = tree_with_row_child();
        let group = [step("page", None), step("Group", None)];
        let name = [step("page", None), step("Group", Some(0)), step("Name", None)];
        assert!(tree.set_at(&name, None, ValidationMask::ALL));

        assert!(tree.remove_at(&name));
        assert!(!tree.contains(&name));
        let entry = tree.entry(&group).expect("group entry");
        assert!(entry.items.is_empty());

        assert!(tree.add_at(&name, initial()));
        assert_eq!(tree.mask_at(&name, None), initial());
    }

    #[test]
    fn removing_a_row_shifts_later_rows() {
        let mut tree = tree_with_row_child();
        let row_one = [step("page", None), step("Group", Some(1)), step("Name", None)];
        assert!(tree.add_at(&row_one, initial()));
        assert!(tree.set_at(&row_one, None, ValidationMask::ALL));

        let group = tree
            .entry_mut(&[step("page", None), step("Group", None)])
            .expect("group");
        group.items.remove(0);

        let shifted = [step("page", None), step("Group", Some(0)), step("Name", None)];
        assert_eq!(tree.mask_at(&shifted, None), ValidationMask::ALL | initial());
    }

    #[test]
    fn misses_read_as_empty_and_do_not_create_entries() {
        let mut tree = VisibilityTree::new();
        let path = [step("page", None), step("Missing", None)];
        assert_eq!(tree.mask_at(&path, None), ValidationMask::NONE);
        assert!(!tree.set_at(&path, None, ValidationMask::ALL));
        assert!(!tree.add_at(&path, initial()));
        assert!(tree.is_empty());
    }

    #[test]
    fn reveal_all_reaches_rows() {
        let mut tree = tree_with_row_child();
        tree.reveal_all(ValidationMask::ALL);
        let name = [step("page", None), step("Group", Some(0)), step("Name", None)];
        assert_eq!(tree.mask_at(&name, None), ValidationMask::ALL | ValidationMask::BACKEND);
        let group = [step("page", None), step("Group", None)];
        assert_eq!(tree.mask_at(&group, Some(0)), ValidationMask::ALL | ValidationMask::BACKEND);
    }

    #[test]
    fn events_deserialize_from_tagged_json() {
        let event: InteractionEvent =
            serde_json::from_str(r#"{"type":"reveal","node":"Name-0","mask":17}"#)
                .expect("deserialize");
        assert_eq!(
            event,
            InteractionEvent::Reveal {
                node: "Name-0".into(),
                mask: ValidationMask::from_bits(17),
                row: None,
            }
        );
    }
}
