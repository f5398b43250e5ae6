use chrono::{DateTime, TimeZone, Utc};
use invhist_core::model::Attributes;
use invhist_core::{CanonicalResource, ChildRecord, ChildSpec, FieldSpec, ResourceSchema};
use serde_json::json;
use std::collections::BTreeMap;

/// Instance-like schema with two child kinds
#[allow(dead_code)]
pub fn instance_schema() -> ResourceSchema {
    ResourceSchema::new("instance")
        .field(FieldSpec::text("title"))
        .field(FieldSpec::integer("cpus"))
        .child(ChildSpec::key_value("labels"))
        .child(
            ChildSpec::new("disks")
                .key(FieldSpec::text("device_name"))
                .field(FieldSpec::integer("size_gb")),
        )
}

#[allow(dead_code)]
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// Build a canonical instance with the given labels and disks
#[allow(dead_code)]
pub fn instance(
    title: &str,
    labels: &[(&str, &str)],
    disks: &[(&str, i64)],
) -> CanonicalResource {
    let mut attributes = Attributes::new();
    attributes.insert("title".to_string(), json!(title));
    attributes.insert("cpus".to_string(), json!(2));

    let mut children = BTreeMap::new();
    children.insert(
        "labels".to_string(),
        labels
            .iter()
            .map(|(k, v)| ChildRecord::new().with("key", *k).with("value", *v))
            .collect(),
    );
    children.insert(
        "disks".to_string(),
        disks
            .iter()
            .map(|(name, size)| {
                ChildRecord::new()
                    .with("device_name", *name)
                    .with("size_gb", *size)
            })
            .collect(),
    );

    CanonicalResource {
        id: "i-1".to_string(),
        scope: "proj-a".to_string(),
        collected_at: at(1_700_000_000),
        attributes,
        children,
    }
}
