use crate::cache::{
    ObjectCache, LOCATION_DESCRIPTOR_NAMESPACE_INDEX, NAMESPACE_SERVICE_NAME_INDEX,
};
use crate::metrics::ConditionMetrics;
use composer_model::constants::{LABEL_SERVICE_LABEL, REASON_INTEROP_ERROR};
use composer_model::{
    calculate_condition_all, calculate_condition_any, fill_condition, fill_new_conditions,
    find_condition, Clock, ClusterLocation, Condition, ConditionStatus, ConditionType, Label,
    LocationDescriptor, LocationStatus, ServiceDescriptor,
};
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// A namespace together with the location descriptor inside it, as observed or written
/// during a pass.
#[derive(Clone, Debug)]
pub struct FormationObjectResult {
    pub namespace: Namespace,
    pub location_descriptor: LocationDescriptor,
}

/// Sort key for location statuses. The space separator sorts an unlabeled location
/// (`"svc svc"`) ahead of its labeled variants (`"svc--dark svc--dark"`).
fn ld_key(namespace: &str, name: &str) -> String {
    format!("{} {}", namespace, name)
}

fn ld_key_of(location_descriptor: &LocationDescriptor) -> String {
    ld_key(
        location_descriptor.namespace().as_deref().unwrap_or(""),
        &location_descriptor.name_any(),
    )
}

fn ld_key_of_status(status: &LocationStatus) -> String {
    ld_key(&status.descriptor_namespace, &status.descriptor_name)
}

/// Projects one condition of a child onto the parent's per-location status. A condition the
/// child does not report becomes `Unknown` with a synthetic interop reason.
fn copy_condition(
    location_descriptor: &LocationDescriptor,
    condition_type: ConditionType,
) -> Condition {
    let conditions = location_descriptor
        .status
        .as_ref()
        .map(|status| status.conditions.as_slice())
        .unwrap_or(&[]);
    match find_condition(conditions, condition_type) {
        None => Condition {
            reason: REASON_INTEROP_ERROR.to_string(),
            message: "Location descriptor not reporting state for this condition".to_string(),
            ..Condition::with_status(condition_type, ConditionStatus::Unknown)
        },
        Some((_, child_condition)) => Condition {
            condition_type,
            status: child_condition.status,
            reason: child_condition.reason.clone(),
            message: child_condition.message.clone(),
            last_transition_time: child_condition.last_transition_time,
        },
    }
}

/// Computes the per-location statuses for a service from everything the caches know about
/// plus the results of the current pass.
///
/// The caches are consulted so the descriptor reports on every child it is responsible
/// for, including ones the current spec no longer references. The two-stage lookup goes
/// through the namespace because its labels are the source of truth for the service name
/// and label.
pub fn calculate_location_statuses(
    cluster_location: &ClusterLocation,
    namespace_cache: &dyn ObjectCache<Namespace>,
    location_descriptor_cache: &dyn ObjectCache<LocationDescriptor>,
    service_name: &str,
    results: Vec<FormationObjectResult>,
) -> Vec<LocationStatus> {
    let mut all_results: BTreeMap<String, FormationObjectResult> = BTreeMap::new();
    for namespace in namespace_cache.by_index(NAMESPACE_SERVICE_NAME_INDEX, service_name) {
        let namespace_name = namespace.name_any();
        for location_descriptor in location_descriptor_cache
            .by_index(LOCATION_DESCRIPTOR_NAMESPACE_INDEX, &namespace_name)
        {
            all_results.insert(
                ld_key_of(&location_descriptor),
                FormationObjectResult {
                    namespace: namespace.clone(),
                    location_descriptor,
                },
            );
        }
    }
    // What this pass just observed wins over the cache.
    for result in results {
        all_results.insert(ld_key_of(&result.location_descriptor), result);
    }

    all_results
        .into_values()
        .map(|result| {
            let label = result
                .namespace
                .metadata
                .labels
                .as_ref()
                .and_then(|labels| labels.get(LABEL_SERVICE_LABEL))
                .map(|label| Label::from(label.clone()))
                .unwrap_or_default();
            let location = cluster_location.location(label);
            let location_descriptor = &result.location_descriptor;

            let has_conditions = location_descriptor
                .status
                .as_ref()
                .map(|status| !status.conditions.is_empty())
                .unwrap_or(false);
            let conditions = if has_conditions {
                vec![
                    copy_condition(location_descriptor, ConditionType::InProgress),
                    copy_condition(location_descriptor, ConditionType::Ready),
                    copy_condition(location_descriptor, ConditionType::Error),
                ]
            } else {
                // The child has not reported anything yet.
                vec![
                    Condition::with_status(ConditionType::InProgress, ConditionStatus::Unknown),
                    Condition::with_status(ConditionType::Ready, ConditionStatus::Unknown),
                    Condition::with_status(ConditionType::Error, ConditionStatus::Unknown),
                ]
            };

            LocationStatus {
                descriptor_name: location_descriptor.name_any(),
                descriptor_namespace: location_descriptor.namespace().unwrap_or_default(),
                location,
                conditions,
            }
        })
        .collect()
}

fn filter_conditions_by_type(
    statuses: &[LocationStatus],
    condition_type: ConditionType,
) -> Vec<Condition> {
    statuses
        .iter()
        .filter_map(|status| find_condition(&status.conditions, condition_type))
        .map(|(_, condition)| condition.clone())
        .collect()
}

/// Rolls the per-location statuses up into the descriptor's three top-level conditions:
/// `InProgress` is any-semantics, `Ready` all-semantics, `Error` any-semantics with a
/// message naming the failing locations. A single location's conditions are mirrored
/// verbatim so their reasons and messages carry through.
pub fn roll_up_conditions(
    location_statuses: &[LocationStatus],
) -> (Condition, Condition, Condition) {
    if location_statuses.is_empty() {
        let mut ready = Condition::with_status(ConditionType::Ready, ConditionStatus::True);
        ready.message = "No locations matching cluster location, nothing to process".to_string();
        return (
            Condition::new(ConditionType::InProgress),
            ready,
            Condition::new(ConditionType::Error),
        );
    }

    let in_progress_conditions =
        filter_conditions_by_type(location_statuses, ConditionType::InProgress);
    let ready_conditions = filter_conditions_by_type(location_statuses, ConditionType::Ready);
    let error_conditions = filter_conditions_by_type(location_statuses, ConditionType::Error);

    let in_progress = match in_progress_conditions.as_slice() {
        [only] => only.clone(),
        _ => Condition::with_status(
            ConditionType::InProgress,
            calculate_condition_any(&in_progress_conditions),
        ),
    };
    let ready = match ready_conditions.as_slice() {
        [only] => only.clone(),
        _ => Condition::with_status(
            ConditionType::Ready,
            calculate_condition_all(&ready_conditions),
        ),
    };
    let error = match error_conditions.as_slice() {
        [only] => only.clone(),
        _ => {
            let status = calculate_condition_any(&error_conditions);
            let mut error = Condition::with_status(ConditionType::Error, status);
            if status == ConditionStatus::True {
                let failing: Vec<String> = location_statuses
                    .iter()
                    .filter(|status| {
                        find_condition(&status.conditions, ConditionType::Error)
                            .map(|(_, c)| c.status == ConditionStatus::True)
                            .unwrap_or(false)
                    })
                    .map(|status| format!("\"{}\"", status.location))
                    .collect();
                if !failing.is_empty() {
                    error.message = format!("error processing location(s): [{}]", failing.join(", "));
                }
            }
            error
        }
    };

    (in_progress, ready, error)
}

/// Writes `condition` into the descriptor's status if it differs from the stored one,
/// keeping the transition timestamp monotonic. Reports whether a write is needed.
pub fn update_condition(
    clock: &dyn Clock,
    metrics: &dyn ConditionMetrics,
    descriptor: &mut ServiceDescriptor,
    mut condition: Condition,
) -> bool {
    let status = descriptor.status.get_or_insert_with(Default::default);
    let found = find_condition(&status.conditions, condition.condition_type)
        .map(|(position, old)| (position, old.clone()));
    let needs_update = fill_condition(
        clock,
        found.as_ref().map(|(_, old)| old),
        &mut condition,
    );
    if !needs_update {
        return false;
    }
    if condition.status == ConditionStatus::True {
        metrics.condition_transition(descriptor.metadata.name.as_deref().unwrap_or(""), &condition);
    }
    match found {
        Some((position, _)) => status.conditions[position] = condition,
        None => status.conditions.push(condition),
    }
    true
}

/// Replaces the descriptor's per-location statuses with the freshly computed list,
/// carrying over transition timestamps for unchanged conditions. Reports whether the
/// stored list changed.
pub fn update_location_statuses(
    clock: &dyn Clock,
    descriptor: &mut ServiceDescriptor,
    mut location_statuses: Vec<LocationStatus>,
) -> bool {
    let status = descriptor.status.get_or_insert_with(Default::default);
    let existing: BTreeMap<String, &LocationStatus> = status
        .location_statuses
        .iter()
        .filter(|existing| !existing.descriptor_name.is_empty())
        .map(|existing| (ld_key_of_status(existing), existing))
        .collect();

    let mut changed = location_statuses.len() != status.location_statuses.len();
    for location_status in location_statuses.iter_mut() {
        let existing_conditions = existing
            .get(&ld_key_of_status(location_status))
            .map(|existing| existing.conditions.as_slice());
        changed =
            fill_new_conditions(clock, existing_conditions, &mut location_status.conditions)
                || changed;
    }

    if changed {
        status.location_statuses = location_statuses;
    }
    changed
}
