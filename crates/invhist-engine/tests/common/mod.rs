#![allow(dead_code)]

use invhist_core::model::RawResource;
use invhist_engine::kinds;
use invhist_engine::{Reconciler, SnapshotSource, StaticSource};
use invhist_store::VersionedStore;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub source: Arc<StaticSource>,
    pub store: Arc<VersionedStore>,
    pub reconciler: Reconciler,
}

pub fn harness() -> Harness {
    let kind = kinds::builtin("compute_instance").unwrap();
    let store = Arc::new(VersionedStore::open_in_memory(kind.schema().clone()).unwrap());
    let source = Arc::new(StaticSource::new());
    let reconciler = Reconciler::new(
        kind,
        store.clone(),
        source.clone() as Arc<dyn SnapshotSource>,
    )
    .unwrap();
    Harness {
        source,
        store,
        reconciler,
    }
}

/// GCP-style instance payload with one boot disk and one NIC
pub fn instance(id: &str, name: &str, labels: &[(&str, &str)]) -> Value {
    let labels: serde_json::Map<String, Value> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect();
    json!({
        "id": id,
        "name": name,
        "zone": "projects/p/zones/us-east1-b",
        "machineType": "projects/p/zones/us-east1-b/machineTypes/e2-medium",
        "status": "RUNNING",
        "labels": labels,
        "disks": [{
            "deviceName": "boot",
            "boot": true,
            "diskSizeGb": "10",
            "licenses": ["projects/debian-cloud/global/licenses/debian-12"]
        }],
        "networkInterfaces": [{"name": "nic0", "networkIP": "10.0.0.2"}]
    })
}

pub fn raws(values: Vec<Value>) -> Vec<RawResource> {
    values.into_iter().map(RawResource::new).collect()
}

/// Keep consecutive cycles on distinct millisecond watermarks
pub async fn next_cycle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}
