use crate::condition::Condition;
use crate::descriptor::{ResourceName, ResourceType};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// LocationDescriptor carries the fully resolved resource list for a service at one deployment
/// location. It is derived from a `ServiceDescriptor` and lives inside the namespace derived for
/// that location; it is consumed by the downstream orchestration layer, which reports health back
/// through `status.conditions`.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    derive = "Default",
    derive = "PartialEq",
    group = "composer.dev",
    kind = "LocationDescriptor",
    namespaced,
    plural = "locationdescriptors",
    singular = "locationdescriptor",
    status = "LocationDescriptorStatus",
    version = "v1"
)]
#[serde(rename_all = "camelCase")]
pub struct LocationDescriptorSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<LocationResource>,
}

/// A resource at this location with its variable references already expanded.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationResource {
    pub name: ResourceName,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<LocationDependency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<Value>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationDependency {
    pub name: ResourceName,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationDescriptorStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
