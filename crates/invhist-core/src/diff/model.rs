//! Verdict types produced by the differ.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structured change verdict for one resource in one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// No stored state existed
    pub is_new: bool,
    /// Any flat scalar field (or the scope) differs
    pub core_changed: bool,
    /// Names of the core fields that differ, in schema order
    pub changed_fields: Vec<String>,
    /// Per child kind: did the collection change as a multiset
    pub child_changed: BTreeMap<String, bool>,
}

/// Coarse classification used for counters and log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeClass {
    New,
    Unchanged,
    CoreChanged,
    ChildrenOnly,
}

impl ChangeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeClass::New => "new",
            ChangeClass::Unchanged => "unchanged",
            ChangeClass::CoreChanged => "core_changed",
            ChangeClass::ChildrenOnly => "children_only",
        }
    }
}

impl Verdict {
    /// Verdict for a resource seen for the first time: every child kind changed
    pub fn new_resource<'a>(children: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            is_new: true,
            core_changed: false,
            changed_fields: Vec::new(),
            child_changed: children.into_iter().map(|c| (c.to_string(), true)).collect(),
        }
    }

    pub fn unchanged<'a>(children: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            is_new: false,
            core_changed: false,
            changed_fields: Vec::new(),
            child_changed: children.into_iter().map(|c| (c.to_string(), false)).collect(),
        }
    }

    pub fn has_any_change(&self) -> bool {
        self.is_new || self.core_changed || self.child_changed.values().any(|c| *c)
    }

    pub fn is_child_changed(&self, child: &str) -> bool {
        self.child_changed.get(child).copied().unwrap_or(false)
    }

    /// Child kinds whose collection changed, in name order
    pub fn changed_children(&self) -> Vec<&str> {
        self.child_changed
            .iter()
            .filter(|(_, changed)| **changed)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn classification(&self) -> ChangeClass {
        if self.is_new {
            ChangeClass::New
        } else if self.core_changed {
            ChangeClass::CoreChanged
        } else if self.has_any_change() {
            ChangeClass::ChildrenOnly
        } else {
            ChangeClass::Unchanged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_resource_marks_every_child() {
        let v = Verdict::new_resource(["labels", "disks"]);
        assert!(v.has_any_change());
        assert_eq!(v.changed_children(), vec!["disks", "labels"]);
        assert_eq!(v.classification(), ChangeClass::New);
    }

    #[test]
    fn test_unchanged_has_no_change() {
        let v = Verdict::unchanged(["labels"]);
        assert!(!v.has_any_change());
        assert!(!v.is_child_changed("labels"));
        assert_eq!(v.classification(), ChangeClass::Unchanged);
    }

    #[test]
    fn test_children_only_classification() {
        let mut v = Verdict::unchanged(["labels", "disks"]);
        v.child_changed.insert("labels".to_string(), true);
        assert!(v.has_any_change());
        assert_eq!(v.classification(), ChangeClass::ChildrenOnly);
        assert_eq!(v.changed_children(), vec!["labels"]);
    }
}
