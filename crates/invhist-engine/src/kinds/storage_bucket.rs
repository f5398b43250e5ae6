//! `storage_bucket`: object storage buckets with labels and ACL entries

use super::id_at;
use invhist_core::errors::NormalizeError;
use invhist_core::model::{ChildRecord, ChildSpec, Comparator, FieldSpec, RawResource, ResourceSchema};
use invhist_core::{MappedResource, ResourceKind};
use serde_json::Value;

pub struct StorageBucket {
    schema: ResourceSchema,
}

impl StorageBucket {
    pub fn new() -> Self {
        let schema = ResourceSchema::new("storage_bucket")
            .field(FieldSpec::text("name"))
            .field(FieldSpec::text("location").with_comparator(Comparator::IgnoreCase))
            .field(FieldSpec::text("storage_class"))
            .field(FieldSpec::integer("project_number"))
            .field(FieldSpec::text("time_created"))
            .field(FieldSpec::boolean("versioning_enabled"))
            .field(FieldSpec::json("lifecycle"))
            .field(FieldSpec::json("iam_configuration"))
            .child(ChildSpec::key_value("labels"))
            .child(
                ChildSpec::new("acl")
                    .key(FieldSpec::text("entity"))
                    .field(FieldSpec::text("role"))
                    .field(FieldSpec::text("email")),
            );
        Self { schema }
    }
}

impl Default for StorageBucket {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceKind for StorageBucket {
    fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    fn resource_id(&self, raw: &RawResource) -> Option<String> {
        id_at(raw, "/id").or_else(|| id_at(raw, "/name"))
    }

    fn map(&self, raw: &RawResource) -> Result<MappedResource, NormalizeError> {
        let labels = raw
            .entries_at("/labels")
            .into_iter()
            .map(|(k, v)| ChildRecord::new().with("key", k).with("value", v.clone()))
            .collect();

        let acl = raw
            .array_at("/acl")
            .iter()
            .map(|entry| {
                let get = |name: &str| entry.get(name).cloned().unwrap_or(Value::Null);
                ChildRecord::new()
                    .with("entity", get("entity"))
                    .with("role", get("role"))
                    .with("email", get("email"))
            })
            .collect();

        Ok(MappedResource::new(self.resource_id(raw).unwrap_or_default())
            .attr("name", raw.value_at("/name"))
            .attr("location", raw.value_at("/location"))
            .attr("storage_class", raw.value_at("/storageClass"))
            .attr("project_number", raw.value_at("/projectNumber"))
            .attr("time_created", raw.value_at("/timeCreated"))
            .attr("versioning_enabled", raw.value_at("/versioning/enabled"))
            .attr("lifecycle", raw.value_at("/lifecycle"))
            .attr("iam_configuration", raw.value_at("/iamConfiguration"))
            .children("labels", labels)
            .children("acl", acl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use invhist_core::normalize;
    use serde_json::json;

    #[test]
    fn test_maps_bucket_payload() {
        let raw = RawResource::new(json!({
            "name": "assets-prod",
            "location": "US",
            "storageClass": "STANDARD",
            "projectNumber": "123456789012",
            "versioning": {"enabled": true},
            "acl": [
                {"entity": "project-owners-123456789012", "role": "OWNER"},
                {"entity": "user-ops@example.com", "role": "READER", "email": "ops@example.com"}
            ]
        }));

        let resource = normalize(&StorageBucket::new(), &raw, "proj-a", Utc::now()).unwrap();

        assert_eq!(resource.id, "assets-prod");
        assert_eq!(resource.get("project_number"), &json!(123456789012_i64));
        assert_eq!(resource.get("versioning_enabled"), &json!(true));
        assert_eq!(resource.children_of("acl").len(), 2);
        assert!(resource.children_of("labels").is_empty());
    }
}
