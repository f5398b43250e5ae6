//! Verdict computation.
//!
//! The core entry point is [`diff`], which compares an optional stored
//! resource against a freshly normalized one under a [`ResourceSchema`].

use crate::diff::model::Verdict;
use crate::model::{CanonicalResource, ChildRecord, ChildSpec, Comparator, NaturalKey, ResourceSchema};
use serde_json::Value;
use std::collections::BTreeMap;

/// Compare stored state (`old`) with a new observation.
///
/// `old == None` yields `is_new` with every child kind marked changed.
/// Otherwise the scope and every declared core field are compared with the
/// field's comparator, and each child collection is compared as an unordered
/// multiset keyed by its natural key.
pub fn diff(
    old: Option<&CanonicalResource>,
    new: &CanonicalResource,
    schema: &ResourceSchema,
) -> Verdict {
    let Some(old) = old else {
        return Verdict::new_resource(schema.child_names());
    };

    let mut changed_fields = Vec::new();
    if old.scope != new.scope {
        changed_fields.push("scope".to_string());
    }
    for field in &schema.fields {
        if !values_equal(field.comparator, old.get(&field.name), new.get(&field.name)) {
            changed_fields.push(field.name.clone());
        }
    }

    let child_changed = schema
        .children
        .iter()
        .map(|spec| {
            let changed =
                collection_changed(spec, old.children_of(&spec.name), new.children_of(&spec.name));
            (spec.name.clone(), changed)
        })
        .collect();

    Verdict {
        is_new: false,
        core_changed: !changed_fields.is_empty(),
        changed_fields,
        child_changed,
    }
}

/// Compare two values under a comparator. Null only equals null.
pub fn values_equal(comparator: Comparator, a: &Value, b: &Value) -> bool {
    match (comparator, a, b) {
        (Comparator::IgnoreCase, Value::String(x), Value::String(y)) => {
            x.to_lowercase() == y.to_lowercase()
        }
        (Comparator::UnorderedList, Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && sorted_canonical(x) == sorted_canonical(y)
        }
        _ => a == b,
    }
}

fn sorted_canonical(items: &[Value]) -> Vec<String> {
    let mut out: Vec<String> = items.iter().map(Value::to_string).collect();
    out.sort();
    out
}

fn collection_changed(spec: &ChildSpec, old: &[ChildRecord], new: &[ChildRecord]) -> bool {
    // Cardinality mismatch is the fast path.
    if old.len() != new.len() {
        return true;
    }
    if old.is_empty() {
        return false;
    }

    let old_groups = group_by_key(spec, old);
    let new_groups = group_by_key(spec, new);
    if old_groups.len() != new_groups.len() {
        return true;
    }

    for (key, old_records) in &old_groups {
        let Some(new_records) = new_groups.get(key) else {
            return true;
        };
        if old_records.len() != new_records.len() {
            return true;
        }
        let pairs_equal = old_records
            .iter()
            .zip(new_records.iter())
            .all(|(a, b)| records_equal(spec, a, b));
        if !pairs_equal {
            return true;
        }
    }
    false
}

/// Group records by natural key; duplicates within a key are ordered by
/// their comparator-normalized text so that pairing is independent of input
/// order and of differences the comparators ignore.
fn group_by_key<'a>(
    spec: &ChildSpec,
    records: &'a [ChildRecord],
) -> BTreeMap<NaturalKey, Vec<&'a ChildRecord>> {
    let mut groups: BTreeMap<NaturalKey, Vec<&ChildRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.natural_key(spec)).or_default().push(record);
    }
    for group in groups.values_mut() {
        if group.len() > 1 {
            group.sort_by_cached_key(|r| r.comparable_text(spec));
        }
    }
    groups
}

fn records_equal(spec: &ChildSpec, a: &ChildRecord, b: &ChildRecord) -> bool {
    spec.fields
        .iter()
        .all(|field| values_equal(field.comparator, a.get(&field.name), b.get(&field.name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attributes, FieldSpec};
    use chrono::Utc;
    use serde_json::json;

    fn schema() -> ResourceSchema {
        ResourceSchema::new("widget")
            .field(FieldSpec::text("title"))
            .field(FieldSpec::text("zone").with_comparator(Comparator::IgnoreCase))
            .field(FieldSpec::json("tags").with_comparator(Comparator::UnorderedList))
            .child(ChildSpec::key_value("labels"))
            .child(ChildSpec::new("licenses").key(FieldSpec::text("license")))
    }

    fn resource(title: &str, labels: &[(&str, &str)]) -> CanonicalResource {
        let mut attributes = Attributes::new();
        attributes.insert("title".to_string(), json!(title));
        attributes.insert("zone".to_string(), json!("us-east1-b"));
        attributes.insert("tags".to_string(), json!(["http", "ssh"]));
        let labels = labels
            .iter()
            .map(|(k, v)| ChildRecord::new().with("key", *k).with("value", *v))
            .collect();
        let mut children = BTreeMap::new();
        children.insert("labels".to_string(), labels);
        children.insert(
            "licenses".to_string(),
            vec![ChildRecord::new().with("license", "debian-12")],
        );
        CanonicalResource {
            id: "w-1".to_string(),
            scope: "proj-a".to_string(),
            collected_at: Utc::now(),
            attributes,
            children,
        }
    }

    #[test]
    fn test_absent_old_is_new() {
        let new = resource("A", &[]);
        let v = diff(None, &new, &schema());
        assert!(v.is_new);
        assert!(v.is_child_changed("labels"));
        assert!(v.is_child_changed("licenses"));
    }

    #[test]
    fn test_identical_is_unchanged() {
        let a = resource("A", &[("env", "prod"), ("team", "core")]);
        let b = a.clone();
        let v = diff(Some(&a), &b, &schema());
        assert!(!v.has_any_change());
    }

    #[test]
    fn test_collected_at_is_not_a_change() {
        let a = resource("A", &[]);
        let mut b = a.clone();
        b.collected_at = a.collected_at + chrono::Duration::hours(1);
        assert!(!diff(Some(&a), &b, &schema()).has_any_change());
    }

    #[test]
    fn test_core_change_lists_field() {
        let a = resource("A", &[("env", "prod")]);
        let b = resource("B", &[("env", "prod")]);
        let v = diff(Some(&a), &b, &schema());
        assert!(v.core_changed);
        assert_eq!(v.changed_fields, vec!["title"]);
        assert!(v.changed_children().is_empty());
    }

    #[test]
    fn test_child_only_change() {
        let a = resource("A", &[("env", "prod"), ("team", "core")]);
        let b = resource("A", &[("env", "prod"), ("team", "core"), ("tier", "web")]);
        let v = diff(Some(&a), &b, &schema());
        assert!(!v.core_changed);
        assert_eq!(v.changed_children(), vec!["labels"]);
    }

    #[test]
    fn test_child_value_change_same_cardinality() {
        let a = resource("A", &[("env", "prod")]);
        let b = resource("A", &[("env", "staging")]);
        assert!(diff(Some(&a), &b, &schema()).is_child_changed("labels"));
    }

    #[test]
    fn test_child_key_swap_same_cardinality() {
        let a = resource("A", &[("env", "prod")]);
        let b = resource("A", &[("stage", "prod")]);
        assert!(diff(Some(&a), &b, &schema()).is_child_changed("labels"));
    }

    #[test]
    fn test_child_order_is_not_a_change() {
        let a = resource("A", &[("env", "prod"), ("team", "core"), ("tier", "web")]);
        let b = resource("A", &[("tier", "web"), ("env", "prod"), ("team", "core")]);
        assert!(!diff(Some(&a), &b, &schema()).has_any_change());
    }

    #[test]
    fn test_duplicate_keys_compared_as_multiset() {
        let a = resource("A", &[("env", "a"), ("env", "b")]);
        let b = resource("A", &[("env", "b"), ("env", "a")]);
        let c = resource("A", &[("env", "a"), ("env", "a")]);
        assert!(!diff(Some(&a), &b, &schema()).has_any_change());
        assert!(diff(Some(&a), &c, &schema()).is_child_changed("labels"));
    }

    #[test]
    fn test_comparators() {
        assert!(values_equal(Comparator::IgnoreCase, &json!("US-EAST1"), &json!("us-east1")));
        assert!(!values_equal(Comparator::Exact, &json!("US-EAST1"), &json!("us-east1")));
        assert!(values_equal(
            Comparator::UnorderedList,
            &json!(["a", "b", "b"]),
            &json!(["b", "a", "b"])
        ));
        assert!(!values_equal(
            Comparator::UnorderedList,
            &json!(["a", "b", "b"]),
            &json!(["a", "a", "b"])
        ));
        assert!(!values_equal(Comparator::Exact, &Value::Null, &json!("")));
    }

    #[test]
    fn test_scope_change_is_core_change() {
        let a = resource("A", &[]);
        let mut b = a.clone();
        b.scope = "proj-b".to_string();
        let v = diff(Some(&a), &b, &schema());
        assert!(v.core_changed);
        assert_eq!(v.changed_fields, vec!["scope"]);
    }

    #[test]
    fn test_child_comparators_apply_to_pairing_and_keys() {
        // Given: duplicate keys whose values differ only in case
        let aliases = ChildSpec::new("aliases")
            .key(FieldSpec::text("slot"))
            .field(FieldSpec::text("alias").with_comparator(Comparator::IgnoreCase));
        let alias = |v: &str| ChildRecord::new().with("slot", "x").with("alias", v);
        let old = [alias("A"), alias("b")];
        let new = [alias("B"), alias("a")];

        // Then: the multisets are equal under the field comparator
        assert!(!collection_changed(&aliases, &old, &new));
        assert!(collection_changed(&aliases, &old, &[alias("A"), alias("c")]));

        // Given: a key field that ignores case
        let nics = ChildSpec::new("nics")
            .key(FieldSpec::text("name").with_comparator(Comparator::IgnoreCase))
            .field(FieldSpec::text("ip"));
        let nic = |n: &str, ip: &str| ChildRecord::new().with("name", n).with("ip", ip);

        // Then: keys differing only in case identify the same record
        assert_eq!(nic("NIC0", "").natural_key(&nics), nic("nic0", "").natural_key(&nics));
        assert!(!collection_changed(&nics, &[nic("NIC0", "10.0.0.2")], &[nic("nic0", "10.0.0.2")]));
        assert!(collection_changed(&nics, &[nic("NIC0", "10.0.0.2")], &[nic("nic0", "10.0.0.3")]));
    }
}
