//! Differ behaviour over whole canonical resources

mod common;

use common::{instance, instance_schema};
use invhist_core::{diff, ChangeClass};
use proptest::prelude::*;

#[test]
fn test_first_observation_is_new_with_every_child_changed() {
    let fresh = instance("A", &[("env", "prod")], &[("boot", 10)]);
    let verdict = diff(None, &fresh, &instance_schema());

    assert_eq!(verdict.classification(), ChangeClass::New);
    assert_eq!(verdict.changed_children(), vec!["disks", "labels"]);
}

#[test]
fn test_title_change_leaves_children_unflagged() {
    let old = instance("A", &[("env", "prod")], &[("boot", 10)]);
    let new = instance("B", &[("env", "prod")], &[("boot", 10)]);
    let verdict = diff(Some(&old), &new, &instance_schema());

    assert_eq!(verdict.classification(), ChangeClass::CoreChanged);
    assert_eq!(verdict.changed_fields, vec!["title".to_string()]);
    assert!(!verdict.is_child_changed("labels"));
    assert!(!verdict.is_child_changed("disks"));
}

#[test]
fn test_label_added_flags_labels_only() {
    let old = instance("A", &[("env", "prod"), ("team", "core")], &[("boot", 10)]);
    let new = instance(
        "A",
        &[("env", "prod"), ("team", "core"), ("tier", "web")],
        &[("boot", 10)],
    );
    let verdict = diff(Some(&old), &new, &instance_schema());

    assert_eq!(verdict.classification(), ChangeClass::ChildrenOnly);
    assert_eq!(verdict.changed_children(), vec!["labels"]);
}

#[test]
fn test_disk_resize_flags_disks_only() {
    let old = instance("A", &[], &[("boot", 10), ("data", 100)]);
    let new = instance("A", &[], &[("data", 200), ("boot", 10)]);
    let verdict = diff(Some(&old), &new, &instance_schema());

    assert_eq!(verdict.changed_children(), vec!["disks"]);
}

proptest! {
    /// Permuting any child collection never produces a change.
    #[test]
    fn prop_child_order_never_drives_a_diff(
        labels in prop::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,6}", 0..8),
        disks in prop::collection::btree_map("[a-z]{1,6}", 1i64..500, 0..5),
        seed in any::<u64>(),
    ) {
        let labels: Vec<(String, String)> = labels.into_iter().collect();
        let disks: Vec<(String, i64)> = disks.into_iter().collect();

        let mut shuffled_labels = labels.clone();
        let mut shuffled_disks = disks.clone();
        if !shuffled_labels.is_empty() {
            let n = (seed as usize) % shuffled_labels.len();
            shuffled_labels.rotate_left(n);
            shuffled_labels.reverse();
        }
        if !shuffled_disks.is_empty() {
            let n = (seed as usize / 7) % shuffled_disks.len();
            shuffled_disks.rotate_left(n);
        }

        let l1: Vec<(&str, &str)> = labels.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let l2: Vec<(&str, &str)> = shuffled_labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let d1: Vec<(&str, i64)> = disks.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        let d2: Vec<(&str, i64)> = shuffled_disks.iter().map(|(k, v)| (k.as_str(), *v)).collect();

        let old = instance("A", &l1, &d1);
        let new = instance("A", &l2, &d2);
        let verdict = diff(Some(&old), &new, &instance_schema());
        prop_assert!(!verdict.has_any_change());
    }
}
