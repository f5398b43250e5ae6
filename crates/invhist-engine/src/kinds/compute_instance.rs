//! `compute_instance`: virtual machines with labels, disks, network
//! interfaces and licenses

use super::{id_at, last_segment};
use invhist_core::errors::NormalizeError;
use invhist_core::model::{ChildRecord, ChildSpec, Comparator, FieldSpec, RawResource, ResourceSchema};
use invhist_core::{MappedResource, ResourceKind};
use serde_json::Value;

pub struct ComputeInstance {
    schema: ResourceSchema,
}

impl ComputeInstance {
    pub fn new() -> Self {
        let schema = ResourceSchema::new("compute_instance")
            .field(FieldSpec::text("name"))
            .field(FieldSpec::text("zone").with_comparator(Comparator::IgnoreCase))
            .field(FieldSpec::text("machine_type"))
            .field(FieldSpec::text("status"))
            .field(FieldSpec::text("cpu_platform"))
            .field(FieldSpec::boolean("can_ip_forward"))
            .field(FieldSpec::boolean("deletion_protection"))
            .field(FieldSpec::text("creation_timestamp"))
            .field(FieldSpec::json("tags").with_comparator(Comparator::UnorderedList))
            .field(FieldSpec::json("metadata"))
            .field(FieldSpec::json("scheduling"))
            .field(FieldSpec::json("service_accounts"))
            .child(ChildSpec::key_value("labels"))
            .child(
                ChildSpec::new("disks")
                    .key(FieldSpec::text("device_name"))
                    .field(FieldSpec::boolean("boot"))
                    .field(FieldSpec::boolean("auto_delete"))
                    .field(FieldSpec::integer("disk_size_gb"))
                    .field(FieldSpec::text("source"))
                    .field(FieldSpec::text("mode"))
                    .field(FieldSpec::text("interface"))
                    .field(FieldSpec::text("disk_type")),
            )
            .child(
                ChildSpec::new("network_interfaces")
                    .key(FieldSpec::text("name"))
                    .field(FieldSpec::text("network"))
                    .field(FieldSpec::text("subnetwork"))
                    .field(FieldSpec::text("network_ip"))
                    .field(FieldSpec::json("access_configs")),
            )
            .child(ChildSpec::new("licenses").key(FieldSpec::text("license")));
        Self { schema }
    }
}

impl Default for ComputeInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceKind for ComputeInstance {
    fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    fn resource_id(&self, raw: &RawResource) -> Option<String> {
        id_at(raw, "/id")
    }

    fn map(&self, raw: &RawResource) -> Result<MappedResource, NormalizeError> {
        if !raw.as_value().is_object() {
            return Err(NormalizeError::Rejected {
                reason: "instance payload is not an object".to_string(),
            });
        }

        let labels = raw
            .entries_at("/labels")
            .into_iter()
            .map(|(k, v)| ChildRecord::new().with("key", k).with("value", v.clone()))
            .collect();

        let mut licenses = Vec::new();
        let disks = raw
            .array_at("/disks")
            .iter()
            .map(|disk| {
                if let Some(urls) = disk.get("licenses").and_then(Value::as_array) {
                    licenses.extend(
                        urls.iter()
                            .map(|url| ChildRecord::new().with("license", last_segment(url.clone()))),
                    );
                }
                ChildRecord::new()
                    .with("device_name", field(disk, "deviceName"))
                    .with("boot", field(disk, "boot"))
                    .with("auto_delete", field(disk, "autoDelete"))
                    .with("disk_size_gb", field(disk, "diskSizeGb"))
                    .with("source", field(disk, "source"))
                    .with("mode", field(disk, "mode"))
                    .with("interface", field(disk, "interface"))
                    .with("disk_type", field(disk, "type"))
            })
            .collect();

        let network_interfaces = raw
            .array_at("/networkInterfaces")
            .iter()
            .map(|nic| {
                ChildRecord::new()
                    .with("name", field(nic, "name"))
                    .with("network", field(nic, "network"))
                    .with("subnetwork", field(nic, "subnetwork"))
                    .with("network_ip", field(nic, "networkIP"))
                    .with("access_configs", field(nic, "accessConfigs"))
            })
            .collect();

        Ok(MappedResource::new(self.resource_id(raw).unwrap_or_default())
            .attr("name", raw.value_at("/name"))
            .attr("zone", last_segment(raw.value_at("/zone")))
            .attr("machine_type", last_segment(raw.value_at("/machineType")))
            .attr("status", raw.value_at("/status"))
            .attr("cpu_platform", raw.value_at("/cpuPlatform"))
            .attr("can_ip_forward", raw.value_at("/canIpForward"))
            .attr("deletion_protection", raw.value_at("/deletionProtection"))
            .attr("creation_timestamp", raw.value_at("/creationTimestamp"))
            .attr("tags", raw.value_at("/tags/items"))
            .attr("metadata", raw.value_at("/metadata"))
            .attr("scheduling", raw.value_at("/scheduling"))
            .attr("service_accounts", raw.value_at("/serviceAccounts"))
            .children("labels", labels)
            .children("disks", disks)
            .children("network_interfaces", network_interfaces)
            .children("licenses", licenses))
    }
}

fn field(obj: &Value, name: &str) -> Value {
    obj.get(name).cloned().unwrap_or(Value::Null)
}
