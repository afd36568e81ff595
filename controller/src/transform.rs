use crate::error::{ErrorList, ValidationError};
use crate::expand::{Resolver, SpecExpander};
use crate::vars::VarModel;
use composer_model::constants::{LABEL_SEPARATOR, RELEASE_PREFIX, SELF_PREFIX};
use composer_model::{
    ClusterLocation, CrdExt, DescriptorResource, Label, Location, ServiceDescriptor,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Everything needed to materialize the child objects for one service at one location: the
/// shared name of the namespace and the location descriptor inside it, plus the resources
/// with their variable references already expanded.
#[derive(Clone, Debug, PartialEq)]
pub struct FormationObjectInfo {
    /// The name of the location descriptor (not the name of the location).
    pub name: String,
    /// The namespace the location descriptor lives in. Currently equal to `name`.
    pub namespace: String,
    pub service_name: String,
    pub location: Location,
    pub resources: Vec<DescriptorResource>,
}

/// The namespace derived for a service at a location: the service name on its own, or
/// joined to the location's label when one is set.
pub fn generate_namespace_name(service_name: &str, label: &Label) -> String {
    if label.is_empty() {
        service_name.to_string()
    } else {
        format!("{}{}{}", service_name, LABEL_SEPARATOR, label)
    }
}

/// Splits a derived namespace name back into service name and label. Avoid where possible;
/// prefer reading the service labels off the namespace itself.
pub fn deconstruct_namespace_name(namespace_name: &str) -> (String, Label) {
    match namespace_name.split_once(LABEL_SEPARATOR) {
        Some((service_name, label)) => (service_name.to_string(), Label::from(label)),
        None => (namespace_name.to_string(), Label::default()),
    }
}

/// Turns a `ServiceDescriptor` into the per-location child definitions for the locations
/// matching this controller instance's cluster location. Validation problems across the
/// whole descriptor are reported together.
pub struct DescriptorTransformer {
    pub cluster_location: ClusterLocation,
}

impl DescriptorTransformer {
    pub fn new(cluster_location: ClusterLocation) -> Self {
        Self { cluster_location }
    }

    /// A descriptor with no resources at a matching location still yields a definition for
    /// that location, carrying only the location information.
    pub fn create_formation_object_def(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> Result<Vec<FormationObjectInfo>, ErrorList> {
        let mut errors = ErrorList::new();
        let spec = &descriptor.spec;

        let defined_locations: HashMap<_, _> = spec
            .locations
            .iter()
            .map(|location| (&location.name, location))
            .collect();
        let vars = VarModel::from_spec(spec);

        // Keyed by "namespace/name" so several groups at the same location collapse into
        // one definition; the BTreeMap keeps the output order deterministic.
        let mut formation_objects: BTreeMap<String, FormationObjectInfo> = BTreeMap::new();

        for resource_group in &spec.resource_groups {
            let mut group_locations = Vec::with_capacity(resource_group.locations.len());
            let mut group_ok = true;
            for location_ref in &resource_group.locations {
                match defined_locations.get(location_ref) {
                    Some(location) => group_locations.push(*location),
                    None => {
                        errors.push(ValidationError::UnknownLocation {
                            location: location_ref.to_string(),
                            group: resource_group.name.to_string(),
                        });
                        group_ok = false;
                    }
                }
            }
            if !group_ok {
                continue;
            }
            if group_locations.is_empty() {
                errors.push(ValidationError::LocationRequired {
                    group: resource_group.name.to_string(),
                });
                continue;
            }

            for descriptor_location in group_locations {
                let location = descriptor_location.location();
                if location.cluster_location() != self.cluster_location {
                    continue;
                }

                let service_name = descriptor.object_name();
                let namespace_name =
                    generate_namespace_name(service_name, &descriptor_location.label);
                let key = format!("{}/{}", namespace_name, namespace_name);
                let formation_object =
                    formation_objects
                        .entry(key)
                        .or_insert_with(|| FormationObjectInfo {
                            name: namespace_name.clone(),
                            namespace: namespace_name.clone(),
                            service_name: service_name.to_string(),
                            location: location.clone(),
                            resources: Vec::new(),
                        });

                // Bare `${name}` references are rewritten to `${self:name}` before the
                // real expansion, so both spellings behave identically.
                let normalize: &Resolver<'_> = &|var_name: &str| {
                    Ok(Value::String(format!("${{{}{}}}", SELF_PREFIX, var_name)))
                };
                let normalizer = SpecExpander {
                    resolver: normalize,
                    required_prefix: "",
                    reserved_prefixes: &[RELEASE_PREFIX, SELF_PREFIX],
                };

                let hierarchy = location.hierarchy();
                let resolve: &Resolver<'_> =
                    &|var_name: &str| vars.resolve(&hierarchy, var_name);
                let expander = SpecExpander {
                    resolver: resolve,
                    required_prefix: SELF_PREFIX,
                    reserved_prefixes: &[RELEASE_PREFIX],
                };

                for resource in &resource_group.resources {
                    let expanded_spec = match &resource.spec {
                        None => None,
                        Some(spec) => {
                            let normalized = match normalizer.expand(spec) {
                                Ok(normalized) => normalized,
                                Err(normalize_errors) => {
                                    errors.extend(normalize_errors);
                                    continue;
                                }
                            };
                            match expander.expand(&normalized) {
                                Ok(expanded) => Some(expanded),
                                Err(expand_errors) => {
                                    errors.extend(expand_errors);
                                    continue;
                                }
                            }
                        }
                    };
                    formation_object.resources.push(DescriptorResource {
                        spec: expanded_spec,
                        ..resource.clone()
                    });
                }
            }
        }

        // Resource naming has to make sense within each location: unique names, and
        // dependencies that point at resources which exist there.
        for formation_object in formation_objects.values() {
            let mut resource_names = HashSet::new();
            for resource in &formation_object.resources {
                if !resource_names.insert(&resource.name) {
                    errors.push(ValidationError::DuplicateResource {
                        name: resource.name.to_string(),
                    });
                }
            }
            for resource in &formation_object.resources {
                for dependency in &resource.depends_on {
                    if !resource_names.contains(&dependency.name) {
                        errors.push(ValidationError::MissingDependency {
                            dependency: dependency.name.to_string(),
                        });
                    }
                    if dependency.name == resource.name {
                        errors.push(ValidationError::SelfDependency {
                            name: resource.name.to_string(),
                        });
                    }
                }
            }
        }

        errors.into_result(formation_objects.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use composer_model::{
        Account, ConfigSet, DescriptorLocation, EnvType, LocationName, Region, ResourceGroup,
        ResourceDependency, ResourceGroupName, ResourceName, ResourceType, Scope,
        ServiceDescriptorSpec,
    };
    use serde_json::json;

    fn cluster_location() -> ClusterLocation {
        ClusterLocation {
            account: Account::from("acct"),
            region: Region::from("us-west-2"),
            env_type: EnvType::from("dev"),
        }
    }

    fn dev_location(name: &str, label: &str) -> DescriptorLocation {
        DescriptorLocation {
            name: LocationName::from(name),
            account: Account::from("acct"),
            region: Region::from("us-west-2"),
            env_type: EnvType::from("dev"),
            label: Label::from(label),
        }
    }

    fn resource(name: &str, spec: Option<Value>) -> DescriptorResource {
        DescriptorResource {
            name: ResourceName::from(name),
            resource_type: ResourceType::from("sqs"),
            depends_on: Vec::new(),
            spec,
        }
    }

    fn descriptor(spec: ServiceDescriptorSpec) -> ServiceDescriptor {
        ServiceDescriptor::new("my-service", spec)
    }

    fn group(name: &str, locations: &[&str], resources: Vec<DescriptorResource>) -> ResourceGroup {
        ResourceGroup {
            name: ResourceGroupName::from(name),
            locations: locations.iter().map(|l| LocationName::from(*l)).collect(),
            resources,
        }
    }

    #[test]
    fn namespace_name_with_and_without_label() {
        assert_eq!(generate_namespace_name("svc", &Label::default()), "svc");
        assert_eq!(
            generate_namespace_name("svc", &Label::from("dark")),
            "svc--dark"
        );
    }

    #[test]
    fn deconstruct_round_trips() {
        assert_eq!(
            deconstruct_namespace_name("svc--dark"),
            ("svc".to_string(), Label::from("dark"))
        );
        assert_eq!(
            deconstruct_namespace_name("svc"),
            ("svc".to_string(), Label::default())
        );
    }

    #[test]
    fn expands_variables_in_resource_specs() {
        let descriptor = descriptor(ServiceDescriptorSpec {
            locations: vec![dev_location("west", "")],
            config: vec![ConfigSet {
                scope: Scope::from("dev"),
                vars: json!({"queueName": "orders"}).as_object().cloned().unwrap(),
            }],
            resource_groups: vec![group(
                "main",
                &["west"],
                vec![resource("queue", Some(json!({"name": "${self:queueName}"})))],
            )],
        });

        let transformer = DescriptorTransformer::new(cluster_location());
        let defs = transformer.create_formation_object_def(&descriptor).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "my-service");
        assert_eq!(defs[0].namespace, "my-service");
        assert_eq!(defs[0].resources[0].spec, Some(json!({"name": "orders"})));
    }

    #[test]
    fn bare_references_are_normalized() {
        let descriptor = descriptor(ServiceDescriptorSpec {
            locations: vec![dev_location("west", "")],
            config: vec![ConfigSet {
                scope: Scope::from("dev"),
                vars: json!({"size": 3}).as_object().cloned().unwrap(),
            }],
            resource_groups: vec![group(
                "main",
                &["west"],
                vec![resource("queue", Some(json!({"size": "${size}"})))],
            )],
        });

        let transformer = DescriptorTransformer::new(cluster_location());
        let defs = transformer.create_formation_object_def(&descriptor).unwrap();
        assert_eq!(defs[0].resources[0].spec, Some(json!({"size": 3})));
    }

    #[test]
    fn labeled_location_gets_its_own_namespace() {
        let descriptor = descriptor(ServiceDescriptorSpec {
            locations: vec![dev_location("west", ""), dev_location("west-dark", "dark")],
            config: Vec::new(),
            resource_groups: vec![group("main", &["west", "west-dark"], vec![resource("q", None)])],
        });

        let transformer = DescriptorTransformer::new(cluster_location());
        let defs = transformer.create_formation_object_def(&descriptor).unwrap();
        let names: Vec<&str> = defs.iter().map(|def| def.name.as_str()).collect();
        assert_eq!(names, vec!["my-service", "my-service--dark"]);
    }

    #[test]
    fn other_cluster_locations_are_skipped() {
        let mut other = dev_location("east", "");
        other.region = Region::from("us-east-1");
        let descriptor = descriptor(ServiceDescriptorSpec {
            locations: vec![other],
            config: Vec::new(),
            resource_groups: vec![group("main", &["east"], vec![resource("q", None)])],
        });

        let transformer = DescriptorTransformer::new(cluster_location());
        let defs = transformer.create_formation_object_def(&descriptor).unwrap();
        assert!(defs.is_empty());
    }

    #[test]
    fn unknown_location_is_reported() {
        let descriptor = descriptor(ServiceDescriptorSpec {
            locations: vec![dev_location("west", "")],
            config: Vec::new(),
            resource_groups: vec![group("main", &["nowhere"], Vec::new())],
        });

        let transformer = DescriptorTransformer::new(cluster_location());
        let errors = transformer
            .create_formation_object_def(&descriptor)
            .unwrap_err();
        assert_eq!(
            errors.to_string(),
            "location \"nowhere\" not known for resourceGroup \"main\""
        );
    }

    #[test]
    fn group_without_locations_is_reported() {
        let descriptor = descriptor(ServiceDescriptorSpec {
            locations: vec![dev_location("west", "")],
            config: Vec::new(),
            resource_groups: vec![group("main", &[], Vec::new())],
        });

        let transformer = DescriptorTransformer::new(cluster_location());
        let errors = transformer
            .create_formation_object_def(&descriptor)
            .unwrap_err();
        assert_eq!(
            errors.to_string(),
            "at least 1 location must be defined for resourceGroup \"main\""
        );
    }

    #[test]
    fn duplicate_resources_at_one_location_are_reported() {
        let descriptor = descriptor(ServiceDescriptorSpec {
            locations: vec![dev_location("west", "")],
            config: Vec::new(),
            resource_groups: vec![
                group("one", &["west"], vec![resource("q", None)]),
                group("two", &["west"], vec![resource("q", None)]),
            ],
        });

        let transformer = DescriptorTransformer::new(cluster_location());
        let errors = transformer
            .create_formation_object_def(&descriptor)
            .unwrap_err();
        assert!(errors
            .errors()
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateResource { .. })));
    }

    #[test]
    fn dependency_must_exist_at_the_location() {
        let mut dependent = resource("q", None);
        dependent.depends_on = vec![ResourceDependency {
            name: ResourceName::from("missing"),
            attributes: Default::default(),
        }];
        let descriptor = descriptor(ServiceDescriptorSpec {
            locations: vec![dev_location("west", "")],
            config: Vec::new(),
            resource_groups: vec![group("main", &["west"], vec![dependent])],
        });

        let transformer = DescriptorTransformer::new(cluster_location());
        let errors = transformer
            .create_formation_object_def(&descriptor)
            .unwrap_err();
        assert_eq!(
            errors.to_string(),
            "dependency \"missing\" does not exist in this location"
        );
    }

    #[test]
    fn self_dependency_is_reported() {
        let mut dependent = resource("q", None);
        dependent.depends_on = vec![ResourceDependency {
            name: ResourceName::from("q"),
            attributes: Default::default(),
        }];
        let descriptor = descriptor(ServiceDescriptorSpec {
            locations: vec![dev_location("west", "")],
            config: Vec::new(),
            resource_groups: vec![group("main", &["west"], vec![dependent])],
        });

        let transformer = DescriptorTransformer::new(cluster_location());
        let errors = transformer
            .create_formation_object_def(&descriptor)
            .unwrap_err();
        assert_eq!(
            errors.to_string(),
            "resource \"q\" depends on itself"
        );
    }

    #[test]
    fn all_variable_problems_are_collected() {
        let descriptor = descriptor(ServiceDescriptorSpec {
            locations: vec![dev_location("west", "")],
            config: Vec::new(),
            resource_groups: vec![group(
                "main",
                &["west"],
                vec![
                    resource("a", Some(json!({"x": "${self:missing-one}"}))),
                    resource("b", Some(json!({"y": "${self:missing-two}"}))),
                ],
            )],
        });

        let transformer = DescriptorTransformer::new(cluster_location());
        let errors = transformer
            .create_formation_object_def(&descriptor)
            .unwrap_err();
        assert_eq!(errors.errors().len(), 2);
    }

    #[test]
    fn reserved_release_references_survive_expansion() {
        let descriptor = descriptor(ServiceDescriptorSpec {
            locations: vec![dev_location("west", "")],
            config: Vec::new(),
            resource_groups: vec![group(
                "main",
                &["west"],
                vec![resource("q", Some(json!({"image": "${release:tag}"})))],
            )],
        });

        let transformer = DescriptorTransformer::new(cluster_location());
        let defs = transformer.create_formation_object_def(&descriptor).unwrap();
        assert_eq!(
            defs[0].resources[0].spec,
            Some(json!({"image": "${release:tag}"}))
        );
    }
}
