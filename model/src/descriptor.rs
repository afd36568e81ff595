use crate::condition::Condition;
use crate::location::{string_newtype, Account, EnvType, Label, Location, Region};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

string_newtype!(
    /// The user-supplied name for a location within one descriptor.
    LocationName
);
string_newtype!(
    /// The name of a resource group within one descriptor.
    ResourceGroupName
);
string_newtype!(
    /// The name of a resource, unique within one resolved location.
    ResourceName
);
string_newtype!(
    /// The provider type of a resource, e.g. `DynamoDB` or `KubeCompute`.
    ResourceType
);
string_newtype!(
    /// A dotted scope string keying a block of configuration variables, e.g. `prod.us-west-1`.
    Scope
);

/// ServiceDescriptor describes the architecture of a service: where it deploys, the scoped
/// configuration variables those deployments can reference, and the resource groups to
/// materialize per location. The `CustomResource` derive also produces a `ServiceDescriptor`
/// struct representing the cluster-scoped CRD object.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    derive = "Default",
    derive = "PartialEq",
    group = "composer.dev",
    kind = "ServiceDescriptor",
    plural = "servicedescriptors",
    singular = "servicedescriptor",
    status = "ServiceDescriptorStatus",
    version = "v1",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Error", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Error\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptorSpec {
    /// The deployment targets this descriptor may reference, each under a user-supplied name.
    pub locations: Vec<DescriptorLocation>,
    /// Scoped configuration variables available to resource specs via `${self:...}` references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<ConfigSet>,
    /// Groups of resources to materialize at one or more of the named locations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_groups: Vec<ResourceGroup>,
}

/// A deployment target with the user-supplied name the descriptor's resource groups refer to
/// it by.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorLocation {
    pub name: LocationName,
    #[serde(default, skip_serializing_if = "Account::is_empty")]
    pub account: Account,
    pub region: Region,
    pub env_type: EnvType,
    #[serde(default, skip_serializing_if = "Label::is_empty")]
    pub label: Label,
}

impl DescriptorLocation {
    pub fn location(&self) -> Location {
        Location {
            account: self.account.clone(),
            region: self.region.clone(),
            env_type: self.env_type.clone(),
            label: self.label.clone(),
        }
    }
}

/// A block of configuration variables tagged with the scope they apply to. Duplicate scopes are
/// tolerated; the last one wins.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSet {
    pub scope: Scope,
    #[serde(default)]
    pub vars: Map<String, Value>,
}

/// A set of resources that exist at one or more locations. The `locations` entries refer back to
/// the names in the descriptor's top-level location list.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroup {
    pub name: ResourceGroupName,
    pub locations: Vec<LocationName>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<DescriptorResource>,
}

/// A single resource within a resource group. The spec document is arbitrary JSON and may
/// contain `${self:...}` variable references.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorResource {
    pub name: ResourceName,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ResourceDependency>,
    /// Specification of the desired behavior of the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<Value>,
}

/// The dependency of one resource on another, with optional attributes. Accepts either a bare
/// resource name or an object with `name` and `attributes`.
#[derive(Clone, Debug, Default, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDependency {
    pub name: ResourceName,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl<'de> Deserialize<'de> for ResourceDependency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Full {
            name: ResourceName,
            #[serde(default)]
            attributes: Map<String, Value>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Name(ResourceName),
            Full(Full),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Name(name) => Self {
                name,
                attributes: Map::new(),
            },
            Repr::Full(full) => Self {
                name: full.name,
                attributes: full.attributes,
            },
        })
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptorStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub location_statuses: Vec<LocationStatus>,
}

/// The per-location projection of a derived child's health, mirrored onto the descriptor.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationStatus {
    /// The name of the derived location descriptor (not the name of the location).
    pub descriptor_name: String,
    /// The namespace holding the derived location descriptor.
    pub descriptor_namespace: String,
    pub location: Location,
    pub conditions: Vec<Condition>,
}
