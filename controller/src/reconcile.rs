use crate::cache::{
    ObjectCache, LOCATION_DESCRIPTOR_NAMESPACE_INDEX, NAMESPACE_SERVICE_NAME_INDEX,
};
use crate::constants::{requeue, requeue_error};
use crate::error::{Error, Result};
use crate::metrics::ConditionMetrics;
use crate::status::{
    calculate_location_statuses, roll_up_conditions, update_condition, update_location_statuses,
    FormationObjectResult,
};
use crate::transform::{deconstruct_namespace_name, DescriptorTransformer, FormationObjectInfo};
use crate::updater::{DescriptorChanges, DescriptorWriter, ObjectUpdater, UpdateError};
use composer_model::constants::{
    API_VERSION, FINALIZER_COMPOSITION, LABEL_SERVICE_LABEL, LABEL_SERVICE_NAME,
    REASON_RETRIABLE_ERROR, REASON_TERMINAL_ERROR, SERVICE_DESCRIPTOR_KIND,
};
use composer_model::{
    Clock, ClusterLocation, Condition, ConditionStatus, ConditionType, CrdExt, LocationDependency,
    LocationDescriptor, LocationDescriptorSpec, LocationResource, LocationStatus,
    ServiceDescriptor,
};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ListParams;
use kube::core::ObjectMeta;
use kube::runtime::controller::{self, Action, Controller as RuntimeController};
use kube::{Api, Client, ResourceExt};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The composition controller. One `process` pass takes a `ServiceDescriptor` from
/// whatever state the cluster is in towards its desired state: finalizer present,
/// a namespace and a `LocationDescriptor` per matching location, and a status that
/// aggregates the children. On deletion the same pass runs in reverse, tearing children
/// down before releasing the finalizer.
pub struct Controller {
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<dyn ConditionMetrics>,
    pub cluster_location: ClusterLocation,
    /// When set, only the service owning this namespace is processed, and only within it.
    pub namespace: Option<String>,
    pub transformer: DescriptorTransformer,
    pub namespace_cache: Arc<dyn ObjectCache<Namespace>>,
    pub location_descriptor_cache: Arc<dyn ObjectCache<LocationDescriptor>>,
    pub namespace_updater: Arc<dyn ObjectUpdater<Namespace>>,
    pub location_descriptor_updater: Arc<dyn ObjectUpdater<LocationDescriptor>>,
    pub descriptor_writer: Arc<dyn DescriptorWriter>,
}

/// How far the teardown of one namespace has progressed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TeardownState {
    /// A location descriptor in the namespace has not finished deleting.
    DescriptorDeleting,
    /// The namespace itself has not finished deleting.
    NamespaceDeleting,
    /// Nothing remains of this namespace.
    Gone,
}

impl Controller {
    /// Runs one reconciliation pass for the descriptor. Returns `Ok` both when the pass
    /// made progress and when it had nothing to do; write conflicts also end the pass
    /// with `Ok` since the conflicting change re-queues the object anyway.
    pub async fn process(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        let mut descriptor = descriptor.clone();
        let service_name = descriptor.object_name().to_string();
        debug!("Processing service descriptor '{}'", service_name);

        let deleting = descriptor.is_delete_requested();
        if !descriptor.has_finalizer(FINALIZER_COMPOSITION) {
            if deleting {
                debug!(
                    "Descriptor '{}' deleting without our finalizer, nothing to do",
                    service_name
                );
                return Ok(());
            }
            // Set the finalizer in its own pass so children are never created ahead of
            // the guarantee that we will clean them up.
            info!("Adding finalizer to '{}'", service_name);
            descriptor
                .metadata
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(FINALIZER_COMPOSITION.to_string());
            let changes = DescriptorChanges {
                resource: true,
                status: false,
            };
            return match self.descriptor_writer.update(&descriptor, changes).await {
                Ok(()) => Ok(()),
                Err(update_error) if update_error.is_conflict() => Ok(()),
                Err(source) => Err(Error::StatusWrite {
                    name: service_name,
                    source,
                }),
            };
        }

        if let Some(namespace) = &self.namespace {
            let (namespace_service, _) = deconstruct_namespace_name(namespace);
            if namespace_service != service_name {
                debug!(
                    "Descriptor '{}' does not own namespace '{}', skipping",
                    service_name, namespace
                );
                return Ok(());
            }
        }

        let mut results = Vec::new();
        let mut pass_error: Option<Error> = None;
        let mut delete_finished = true;

        if deleting {
            for namespace in self.known_namespaces(&service_name) {
                match self.teardown_namespace(&namespace).await {
                    Ok(state) => delete_finished = delete_finished && state == TeardownState::Gone,
                    Err(update_error) if update_error.is_conflict() => return Ok(()),
                    Err(source) => {
                        delete_finished = false;
                        pass_error = Some(Error::ObjectWrite { source });
                        break;
                    }
                }
            }
        } else {
            match self.transformer.create_formation_object_def(&descriptor) {
                Err(source) => pass_error = Some(Error::Validation { source }),
                Ok(definitions) => {
                    for definition in definitions {
                        if let Some(namespace) = &self.namespace {
                            if definition.namespace != *namespace {
                                continue;
                            }
                        }
                        match self.apply_location(&descriptor, &definition).await {
                            Ok(result) => results.push(result),
                            Err(update_error) if update_error.is_conflict() => return Ok(()),
                            Err(source) => {
                                pass_error = Some(Error::ObjectWrite { source });
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.finish_pass(descriptor, results, deleting && delete_finished, pass_error)
            .await
    }

    /// The namespaces this service is responsible for, from the informer cache rather
    /// than the (possibly already broken) descriptor spec. Sorted for deterministic
    /// teardown order.
    fn known_namespaces(&self, service_name: &str) -> Vec<Namespace> {
        let mut namespaces = self
            .namespace_cache
            .by_index(NAMESPACE_SERVICE_NAME_INDEX, service_name);
        if let Some(only) = &self.namespace {
            namespaces.retain(|namespace| namespace.name_any() == *only);
        }
        namespaces.sort_by_key(|namespace| namespace.name_any());
        namespaces
    }

    /// Ensures the namespace and the location descriptor for one location exist and
    /// match their desired state.
    async fn apply_location(
        &self,
        descriptor: &ServiceDescriptor,
        definition: &FormationObjectInfo,
    ) -> std::result::Result<FormationObjectResult, UpdateError> {
        debug!(
            "Ensuring namespace '{}' and location descriptor '{}'",
            definition.namespace, definition.name
        );
        let owned_by_descriptor = |existing: &Namespace| {
            if existing.is_controlled_by(descriptor) {
                Ok(())
            } else {
                Err(format!(
                    "namespace \"{}\" is not owned by service descriptor \"{}\"",
                    existing.object_name(),
                    descriptor.object_name()
                ))
            }
        };
        let namespace = self
            .namespace_updater
            .create_or_update(desired_namespace(definition, descriptor), &owned_by_descriptor)
            .await?;

        // Ownership is enforced through the namespace; everything inside it is ours.
        let location_descriptor = self
            .location_descriptor_updater
            .create_or_update(desired_location_descriptor(definition), &|_| Ok(()))
            .await?;

        Ok(FormationObjectResult {
            namespace,
            location_descriptor,
        })
    }

    /// Deletes the location descriptors in the namespace, then the namespace itself, one
    /// stage per pass. The watch on the children re-queues the descriptor as each stage
    /// completes, so this never blocks waiting for deletions.
    async fn teardown_namespace(
        &self,
        namespace: &Namespace,
    ) -> std::result::Result<TeardownState, UpdateError> {
        let namespace_name = namespace.name_any();
        let mut descriptors_remain = false;
        for location_descriptor in self
            .location_descriptor_cache
            .by_index(LOCATION_DESCRIPTOR_NAMESPACE_INDEX, &namespace_name)
        {
            let remaining = self
                .location_descriptor_updater
                .delete_and_get(Some(&namespace_name), &location_descriptor.name_any())
                .await?;
            descriptors_remain = descriptors_remain || remaining.is_some();
        }
        if descriptors_remain {
            return Ok(TeardownState::DescriptorDeleting);
        }

        match self
            .namespace_updater
            .delete_and_get(None, &namespace_name)
            .await?
        {
            Some(_) => Ok(TeardownState::NamespaceDeleting),
            None => Ok(TeardownState::Gone),
        }
    }

    /// Folds the outcome of the pass into the descriptor's status and writes it, and
    /// releases the finalizer once a deletion has fully finished.
    ///
    /// On a failed pass the three top-level conditions report the error and the stored
    /// per-location statuses are left untouched; they still describe the last state the
    /// controller observed successfully.
    async fn finish_pass(
        &self,
        mut descriptor: ServiceDescriptor,
        results: Vec<FormationObjectResult>,
        remove_finalizer: bool,
        pass_error: Option<Error>,
    ) -> Result<()> {
        let service_name = descriptor.object_name().to_string();

        let mut location_statuses: Option<Vec<LocationStatus>> = None;
        let (in_progress, ready, error_condition) = match &pass_error {
            Some(pass_error) => {
                let mut in_progress = Condition::new(ConditionType::InProgress);
                let ready = Condition::new(ConditionType::Ready);
                let mut error_condition =
                    Condition::with_status(ConditionType::Error, ConditionStatus::True);
                error_condition.message = pass_error.to_string();
                if pass_error.is_retriable() {
                    error_condition.reason = REASON_RETRIABLE_ERROR.to_string();
                    in_progress.status = ConditionStatus::True;
                } else {
                    error_condition.reason = REASON_TERMINAL_ERROR.to_string();
                }
                (in_progress, ready, error_condition)
            }
            None => {
                let statuses = calculate_location_statuses(
                    &self.cluster_location,
                    self.namespace_cache.as_ref(),
                    self.location_descriptor_cache.as_ref(),
                    &service_name,
                    results,
                );
                let rolled_up = roll_up_conditions(&statuses);
                location_statuses = Some(statuses);
                rolled_up
            }
        };

        let mut finalizers_updated = false;
        if remove_finalizer && pass_error.is_none() {
            info!("Removing finalizer from '{}'", service_name);
            if let Some(finalizers) = descriptor.metadata.finalizers.as_mut() {
                finalizers.retain(|finalizer| finalizer != FINALIZER_COMPOSITION);
                finalizers_updated = true;
            }
        }

        let clock = self.clock.as_ref();
        let metrics = self.metrics.as_ref();
        let mut updated = update_condition(clock, metrics, &mut descriptor, in_progress);
        updated = update_condition(clock, metrics, &mut descriptor, ready) || updated;
        updated = update_condition(clock, metrics, &mut descriptor, error_condition) || updated;
        if let Some(statuses) = location_statuses {
            updated = update_location_statuses(clock, &mut descriptor, statuses) || updated;
        }

        let changes = DescriptorChanges {
            resource: finalizers_updated,
            status: updated,
        };
        if changes.any() {
            debug!("Writing status for '{}'", service_name);
            match self.descriptor_writer.update(&descriptor, changes).await {
                Ok(()) => {}
                Err(update_error) if update_error.is_conflict() => return Ok(()),
                Err(source) => {
                    return match pass_error {
                        // The pass failure is the more useful report.
                        Some(pass_error) => {
                            warn!(
                                "Unable to write status for '{}': {}",
                                service_name, source
                            );
                            Err(pass_error)
                        }
                        None => Err(Error::StatusWrite {
                            name: service_name,
                            source,
                        }),
                    };
                }
            }
        }

        match pass_error {
            Some(pass_error) => Err(pass_error),
            None => Ok(()),
        }
    }
}

/// The owner reference stamped onto derived namespaces, marking the descriptor as the
/// controlling owner and blocking its deletion while children remain.
pub fn descriptor_owner_reference(descriptor: &ServiceDescriptor) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: SERVICE_DESCRIPTOR_KIND.to_string(),
        name: descriptor.object_name().to_string(),
        uid: descriptor.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub fn desired_namespace(
    definition: &FormationObjectInfo,
    descriptor: &ServiceDescriptor,
) -> Namespace {
    let mut labels = BTreeMap::new();
    labels.insert(
        LABEL_SERVICE_NAME.to_string(),
        definition.service_name.clone(),
    );
    labels.insert(
        LABEL_SERVICE_LABEL.to_string(),
        definition.location.label.to_string(),
    );
    Namespace {
        metadata: ObjectMeta {
            name: Some(definition.namespace.clone()),
            labels: Some(labels),
            owner_references: Some(vec![descriptor_owner_reference(descriptor)]),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

pub fn desired_location_descriptor(definition: &FormationObjectInfo) -> LocationDescriptor {
    let resources = definition
        .resources
        .iter()
        .map(|resource| LocationResource {
            name: resource.name.clone(),
            resource_type: resource.resource_type.clone(),
            depends_on: resource
                .depends_on
                .iter()
                .map(|dependency| LocationDependency {
                    name: dependency.name.clone(),
                    attributes: dependency.attributes.clone(),
                })
                .collect(),
            spec: resource.spec.clone(),
        })
        .collect();
    let mut location_descriptor =
        LocationDescriptor::new(&definition.name, LocationDescriptorSpec { resources });
    location_descriptor.metadata.namespace = Some(definition.namespace.clone());
    location_descriptor
}

/// Whether the live namespace already carries the labels and owner references we would
/// write. The apiserver adds labels of its own, so only our labels are compared.
pub fn same_namespace_spec(desired: &Namespace, existing: &Namespace) -> bool {
    let existing_labels = existing.metadata.labels.as_ref();
    let labels_match = desired
        .metadata
        .labels
        .iter()
        .flatten()
        .all(|(key, value)| existing_labels.and_then(|labels| labels.get(key)) == Some(value));
    labels_match && desired.metadata.owner_references == existing.metadata.owner_references
}

pub fn same_location_descriptor_spec(
    desired: &LocationDescriptor,
    existing: &LocationDescriptor,
) -> bool {
    desired.spec == existing.spec
}

/// Watches `ServiceDescriptor` objects and runs [`Controller::process`] for each
/// delivery. Runs until the watch stream ends.
pub async fn run_composition_controller(client: Client, composition: Arc<Controller>) {
    RuntimeController::new(Api::<ServiceDescriptor>::all(client), ListParams::default())
        .run(reconcile, handle_reconciliation_error, composition)
        .for_each(|reconciliation_result| async move {
            if let Err(reconciliation_err) = reconciliation_result {
                match &reconciliation_err {
                    controller::Error::ObjectNotFound { .. } => {
                        debug!("Object is gone: {}", reconciliation_err)
                    }
                    _ => error!("Error during reconciliation: {}", reconciliation_err),
                }
            }
        })
        .await;
}

async fn reconcile(
    descriptor: Arc<ServiceDescriptor>,
    composition: Arc<Controller>,
) -> Result<Action> {
    match composition.process(&descriptor).await {
        Ok(()) => Ok(requeue()),
        Err(error) if error.is_retriable() => Err(error),
        Err(error) => {
            // Terminal failures are reported on the descriptor's Error condition;
            // retrying without a change to the inputs would only repeat them.
            error!(
                "Terminal error processing '{}': {}",
                descriptor.object_name(),
                error
            );
            Ok(requeue())
        }
    }
}

fn handle_reconciliation_error(
    _descriptor: Arc<ServiceDescriptor>,
    error: &Error,
    _composition: Arc<Controller>,
) -> Action {
    error!("Error during reconciliation: {}", error);
    requeue_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{
        location_descriptor_namespace_index, namespace_service_name_index, IndexedCache,
    };
    use crate::metrics::LogMetrics;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use composer_model::{
        Account, DescriptorLocation, DescriptorResource, EnvType, Label, LocationName, Region,
        ResourceGroup, ServiceDescriptorSpec,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::Resource;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    /// Applies writes straight to the backing cache, so a second pass observes what the
    /// first one wrote.
    struct FakeUpdater<K> {
        cache: Arc<IndexedCache<K>>,
        writes: AtomicUsize,
        deletes: AtomicUsize,
        fail_next_with_conflict: AtomicBool,
        fail_next_with_retriable: AtomicBool,
    }

    impl<K> FakeUpdater<K> {
        fn new(cache: Arc<IndexedCache<K>>) -> Arc<Self> {
            Arc::new(Self {
                cache,
                writes: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
                fail_next_with_conflict: AtomicBool::new(false),
                fail_next_with_retriable: AtomicBool::new(false),
            })
        }

        fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }

        fn deletes(&self) -> usize {
            self.deletes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl<K> ObjectUpdater<K> for FakeUpdater<K>
    where
        K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
    {
        async fn create_or_update(
            &self,
            desired: K,
            precondition: &crate::updater::Precondition<'_, K>,
        ) -> std::result::Result<K, UpdateError> {
            let name = desired.name_any();
            if self.fail_next_with_conflict.swap(false, Ordering::SeqCst) {
                return Err(UpdateError::Conflict { name });
            }
            if self.fail_next_with_retriable.swap(false, Ordering::SeqCst) {
                return Err(UpdateError::Retriable {
                    name,
                    reason: "the server is currently unable to handle the request".to_string(),
                });
            }
            if let Some(existing) = self.cache.get(desired.namespace().as_deref(), &name) {
                precondition(&existing).map_err(|reason| UpdateError::PreconditionFailed {
                    name: name.clone(),
                    reason,
                })?;
                if same_meta(&desired, &existing) {
                    return Ok(existing);
                }
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.cache.apply(desired.clone());
            Ok(desired)
        }

        async fn delete_and_get(
            &self,
            namespace: Option<&str>,
            name: &str,
        ) -> std::result::Result<Option<K>, UpdateError> {
            let mut existing = match self.cache.get(namespace, name) {
                None => return Ok(None),
                Some(existing) => existing,
            };
            if existing.meta().deletion_timestamp.is_none() {
                self.deletes.fetch_add(1, Ordering::SeqCst);
                existing.meta_mut().deletion_timestamp =
                    Some(Time(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()));
                self.cache.apply(existing.clone());
            }
            Ok(Some(existing))
        }
    }

    fn same_meta<K: Resource>(desired: &K, existing: &K) -> bool {
        desired.meta().labels == existing.meta().labels
    }

    struct FakeWriter {
        written: Mutex<Vec<(ServiceDescriptor, DescriptorChanges)>>,
        fail_next_with_conflict: AtomicBool,
    }

    impl FakeWriter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                written: Mutex::new(Vec::new()),
                fail_next_with_conflict: AtomicBool::new(false),
            })
        }

        fn writes(&self) -> usize {
            self.written.lock().unwrap().len()
        }

        fn last(&self) -> ServiceDescriptor {
            self.written.lock().unwrap().last().cloned().unwrap().0
        }

        fn last_changes(&self) -> DescriptorChanges {
            self.written.lock().unwrap().last().cloned().unwrap().1
        }
    }

    #[async_trait]
    impl DescriptorWriter for FakeWriter {
        async fn update(
            &self,
            descriptor: &ServiceDescriptor,
            changes: DescriptorChanges,
        ) -> std::result::Result<(), UpdateError> {
            if self.fail_next_with_conflict.swap(false, Ordering::SeqCst) {
                return Err(UpdateError::Conflict {
                    name: descriptor.object_name().to_string(),
                });
            }
            self.written.lock().unwrap().push((descriptor.clone(), changes));
            Ok(())
        }
    }

    struct Harness {
        controller: Controller,
        namespace_cache: Arc<IndexedCache<Namespace>>,
        location_descriptor_cache: Arc<IndexedCache<LocationDescriptor>>,
        namespace_updater: Arc<FakeUpdater<Namespace>>,
        location_descriptor_updater: Arc<FakeUpdater<LocationDescriptor>>,
        writer: Arc<FakeWriter>,
    }

    fn cluster_location() -> ClusterLocation {
        ClusterLocation {
            account: Account::from("123"),
            region: Region::from("us-west-1"),
            env_type: EnvType::from("prod"),
        }
    }

    fn harness() -> Harness {
        let namespace_cache = Arc::new(IndexedCache::new(vec![(
            NAMESPACE_SERVICE_NAME_INDEX,
            namespace_service_name_index as crate::cache::IndexFn<Namespace>,
        )]));
        let location_descriptor_cache = Arc::new(IndexedCache::new(vec![(
            LOCATION_DESCRIPTOR_NAMESPACE_INDEX,
            location_descriptor_namespace_index as crate::cache::IndexFn<LocationDescriptor>,
        )]));
        let namespace_updater = FakeUpdater::new(namespace_cache.clone());
        let location_descriptor_updater = FakeUpdater::new(location_descriptor_cache.clone());
        let writer = FakeWriter::new();
        let controller = Controller {
            clock: Arc::new(FixedClock(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap())),
            metrics: Arc::new(LogMetrics),
            cluster_location: cluster_location(),
            namespace: None,
            transformer: DescriptorTransformer::new(cluster_location()),
            namespace_cache: namespace_cache.clone(),
            location_descriptor_cache: location_descriptor_cache.clone(),
            namespace_updater: namespace_updater.clone(),
            location_descriptor_updater: location_descriptor_updater.clone(),
            descriptor_writer: writer.clone(),
        };
        Harness {
            controller,
            namespace_cache,
            location_descriptor_cache,
            namespace_updater,
            location_descriptor_updater,
            writer,
        }
    }

    fn descriptor() -> ServiceDescriptor {
        let mut descriptor = ServiceDescriptor::new(
            "my-service",
            ServiceDescriptorSpec {
                locations: vec![DescriptorLocation {
                    name: LocationName::from("west"),
                    account: Account::from("123"),
                    region: Region::from("us-west-1"),
                    env_type: EnvType::from("prod"),
                    label: Label::default(),
                }],
                config: Vec::new(),
                resource_groups: vec![ResourceGroup {
                    name: "main".into(),
                    locations: vec![LocationName::from("west")],
                    resources: vec![DescriptorResource {
                        name: "db".into(),
                        resource_type: "DynamoDB".into(),
                        depends_on: Vec::new(),
                        spec: Some(json!({"readCapacity": 5})),
                    }],
                }],
            },
        );
        descriptor.metadata.uid = Some("uid-1".to_string());
        descriptor
    }

    fn descriptor_with_finalizer() -> ServiceDescriptor {
        let mut descriptor = descriptor();
        descriptor.metadata.finalizers = Some(vec![FINALIZER_COMPOSITION.to_string()]);
        descriptor
    }

    fn find_overall(descriptor: &ServiceDescriptor, condition_type: ConditionType) -> Condition {
        let status = descriptor.status.as_ref().unwrap();
        composer_model::find_condition(&status.conditions, condition_type)
            .map(|(_, condition)| condition.clone())
            .unwrap()
    }

    #[tokio::test]
    async fn first_pass_only_adds_finalizer() {
        let harness = harness();
        harness.controller.process(&descriptor()).await.unwrap();

        assert_eq!(harness.writer.writes(), 1);
        let written = harness.writer.last();
        assert!(written.has_finalizer(FINALIZER_COMPOSITION));
        // A finalizer-only change touches the main resource, not the status subresource.
        assert_eq!(
            harness.writer.last_changes(),
            DescriptorChanges {
                resource: true,
                status: false,
            }
        );
        // No children until the finalizer write has gone through.
        assert_eq!(harness.namespace_updater.writes(), 0);
        assert_eq!(harness.location_descriptor_updater.writes(), 0);
    }

    #[tokio::test]
    async fn creates_namespace_and_location_descriptor() {
        let harness = harness();
        harness
            .controller
            .process(&descriptor_with_finalizer())
            .await
            .unwrap();

        let namespace = harness.namespace_cache.get(None, "my-service").unwrap();
        let labels = namespace.metadata.labels.unwrap();
        assert_eq!(labels.get(LABEL_SERVICE_NAME).unwrap(), "my-service");
        let owner = namespace.metadata.owner_references.unwrap().remove(0);
        assert_eq!(owner.uid, "uid-1");
        assert_eq!(owner.controller, Some(true));

        let location_descriptor = harness
            .location_descriptor_cache
            .get(Some("my-service"), "my-service")
            .unwrap();
        assert_eq!(location_descriptor.spec.resources.len(), 1);
        assert_eq!(
            location_descriptor.spec.resources[0].spec,
            Some(json!({"readCapacity": 5}))
        );

        // The status reports one location, with all conditions Unknown until the
        // location descriptor starts reporting its own.
        let written = harness.writer.last();
        let status = written.status.as_ref().unwrap();
        assert_eq!(status.location_statuses.len(), 1);
        assert_eq!(
            find_overall(&written, ConditionType::Ready).status,
            ConditionStatus::Unknown
        );
        // Only the status changed; the main resource is left alone.
        assert_eq!(
            harness.writer.last_changes(),
            DescriptorChanges {
                resource: false,
                status: true,
            }
        );
    }

    #[tokio::test]
    async fn settled_pass_writes_nothing() {
        let harness = harness();
        let descriptor = descriptor_with_finalizer();
        harness.controller.process(&descriptor).await.unwrap();
        let mut settled = descriptor;
        settled.status = harness.writer.last().status;

        harness.controller.process(&settled).await.unwrap();

        assert_eq!(harness.namespace_updater.writes(), 1);
        assert_eq!(harness.location_descriptor_updater.writes(), 1);
        assert_eq!(harness.writer.writes(), 1);
    }

    #[tokio::test]
    async fn write_conflict_ends_pass_quietly() {
        let harness = harness();
        harness
            .namespace_updater
            .fail_next_with_conflict
            .store(true, Ordering::SeqCst);

        harness
            .controller
            .process(&descriptor_with_finalizer())
            .await
            .unwrap();

        // The conflicting writer re-queues the object; no status write for this pass.
        assert_eq!(harness.writer.writes(), 0);
    }

    #[tokio::test]
    async fn transient_backend_failure_is_retriable() {
        let harness = harness();
        harness
            .namespace_updater
            .fail_next_with_retriable
            .store(true, Ordering::SeqCst);

        let error = harness
            .controller
            .process(&descriptor_with_finalizer())
            .await
            .unwrap_err();

        assert!(error.is_retriable());
        // A transient failure reports as retriable with the pass still in flight.
        let written = harness.writer.last();
        let error_condition = find_overall(&written, ConditionType::Error);
        assert_eq!(error_condition.status, ConditionStatus::True);
        assert_eq!(error_condition.reason, REASON_RETRIABLE_ERROR);
        assert_eq!(
            find_overall(&written, ConditionType::InProgress).status,
            ConditionStatus::True
        );
    }

    #[tokio::test]
    async fn foreign_namespace_is_a_terminal_error() {
        let harness = harness();
        let mut foreign = Namespace::default();
        foreign.metadata.name = Some("my-service".to_string());
        harness.namespace_cache.apply(foreign);

        let error = harness
            .controller
            .process(&descriptor_with_finalizer())
            .await
            .unwrap_err();

        assert!(!error.is_retriable());
        let written = harness.writer.last();
        let error_condition = find_overall(&written, ConditionType::Error);
        assert_eq!(error_condition.status, ConditionStatus::True);
        assert_eq!(error_condition.reason, REASON_TERMINAL_ERROR);
        assert!(error_condition.message.contains("is not owned by"));
    }

    #[tokio::test]
    async fn validation_failure_reports_terminal_error() {
        let harness = harness();
        let mut broken = descriptor_with_finalizer();
        broken.spec.resource_groups[0].locations = vec![LocationName::from("nowhere")];

        let error = harness.controller.process(&broken).await.unwrap_err();

        assert!(!error.is_retriable());
        let written = harness.writer.last();
        let error_condition = find_overall(&written, ConditionType::Error);
        assert_eq!(error_condition.reason, REASON_TERMINAL_ERROR);
        assert!(error_condition.message.contains("not known"));
        // Nothing was created for the broken descriptor.
        assert_eq!(harness.namespace_updater.writes(), 0);
    }

    #[tokio::test]
    async fn deleting_without_finalizer_is_a_noop() {
        let harness = harness();
        let mut deleting = descriptor();
        deleting.metadata.deletion_timestamp =
            Some(Time(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()));

        harness.controller.process(&deleting).await.unwrap();

        assert_eq!(harness.writer.writes(), 0);
        assert_eq!(harness.namespace_updater.writes(), 0);
    }

    #[tokio::test]
    async fn deletion_tears_down_in_stages() {
        let harness = harness();
        // Create the children first.
        let live = descriptor_with_finalizer();
        harness.controller.process(&live).await.unwrap();
        let mut deleting = live;
        deleting.status = harness.writer.last().status;
        deleting.metadata.deletion_timestamp =
            Some(Time(Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap()));

        // First deletion pass requests the location descriptor's deletion and keeps
        // the finalizer.
        harness.controller.process(&deleting).await.unwrap();
        assert_eq!(harness.location_descriptor_updater.deletes(), 1);
        assert_eq!(harness.namespace_updater.deletes(), 0);

        // A second pass while the child lingers asks for nothing new.
        harness.controller.process(&deleting).await.unwrap();
        assert_eq!(harness.location_descriptor_updater.deletes(), 1);

        // The child disappears; the next pass deletes the namespace.
        let lingering = harness
            .location_descriptor_cache
            .get(Some("my-service"), "my-service")
            .unwrap();
        harness.location_descriptor_cache.delete(&lingering);
        harness.controller.process(&deleting).await.unwrap();
        assert_eq!(harness.namespace_updater.deletes(), 1);
        assert!(harness.writer.last().has_finalizer(FINALIZER_COMPOSITION));

        // The namespace disappears; the final pass releases the finalizer. The
        // finalizer-releasing write goes to the main resource, and any status change
        // rides ahead of it, since releasing the last finalizer of a deleting object
        // lets the apiserver hard-delete it and nothing can be written afterwards.
        let namespace = harness.namespace_cache.get(None, "my-service").unwrap();
        harness.namespace_cache.delete(&namespace);
        harness.controller.process(&deleting).await.unwrap();
        assert!(!harness.writer.last().has_finalizer(FINALIZER_COMPOSITION));
        assert!(harness.writer.last_changes().resource);
    }

    #[tokio::test]
    async fn namespace_restriction_skips_other_services() {
        let mut harness = harness();
        harness.controller.namespace = Some("other-service".to_string());

        harness
            .controller
            .process(&descriptor_with_finalizer())
            .await
            .unwrap();

        assert_eq!(harness.namespace_updater.writes(), 0);
        assert_eq!(harness.writer.writes(), 0);
    }
}
