#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use invhist_core::model::{ChildRecord, ChildSpec, Comparator, FieldSpec, ResourceSchema};
use invhist_core::normalize::{canonicalize, MappedResource};
use invhist_core::{diff, CanonicalResource};
use invhist_store::{UpsertOutcome, VersionedStore};
use serde_json::json;

pub fn instance_schema() -> ResourceSchema {
    ResourceSchema::new("instance")
        .field(FieldSpec::text("title"))
        .field(FieldSpec::text("zone").with_comparator(Comparator::IgnoreCase))
        .field(FieldSpec::integer("cpus"))
        .field(FieldSpec::real("load"))
        .field(FieldSpec::boolean("preemptible"))
        .field(FieldSpec::json("metadata"))
        .child(ChildSpec::key_value("labels"))
        .child(
            ChildSpec::new("disks")
                .key(FieldSpec::text("device_name"))
                .field(FieldSpec::integer("size_gb"))
                .field(FieldSpec::json("source")),
        )
}

pub fn store() -> VersionedStore {
    VersionedStore::open_in_memory(instance_schema()).expect("store should open")
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// Canonical instance built through the same path the reconciler uses
pub fn instance(
    id: &str,
    title: &str,
    labels: &[(&str, &str)],
    collected_at: DateTime<Utc>,
) -> CanonicalResource {
    let labels = labels
        .iter()
        .map(|(k, v)| ChildRecord::new().with("key", *k).with("value", *v))
        .collect();
    let disks = vec![ChildRecord::new()
        .with("device_name", "boot")
        .with("size_gb", 10)
        .with("source", json!({"image": "debian-12", "flags": [1, 2.5]}))];
    let mapped = MappedResource::new(id)
        .attr("title", title)
        .attr("zone", "us-east1-b")
        .attr("cpus", 4)
        .attr("load", 0.5)
        .attr("preemptible", false)
        .attr("metadata", json!({"startup": "echo hi", "tags": ["a", "b"]}))
        .children("labels", labels)
        .children("disks", disks);
    canonicalize(&instance_schema(), mapped, "proj-a", collected_at).expect("valid instance")
}

/// Load, diff and upsert one resource, the way one reconciler step does
pub fn reconcile(store: &VersionedStore, resource: &CanonicalResource) -> UpsertOutcome {
    let old = store.load(&resource.id).expect("load");
    let verdict = diff(old.as_ref().map(|r| &r.resource), resource, store.schema());
    store.upsert(&verdict, resource).expect("upsert")
}

pub fn count(store: &VersionedStore, sql: &str) -> i64 {
    store
        .with_conn(|conn| {
            Ok(conn
                .query_row(sql, [], |row| row.get::<_, i64>(0))
                .expect("count query"))
        })
        .unwrap()
}
