use crate::Clock;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The three condition types tracked on descriptors and their derived children.
#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub enum ConditionType {
    InProgress,
    Ready,
    Error,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl Default for ConditionStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

/// A single observation about an object, in the style of Kubernetes status conditions.
///
/// The `last_transition_time` only advances when `status` changes; a condition written with an
/// unset timestamp inherits the prior condition's timestamp when nothing else changed. See
/// [`fill_condition`].
#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// A new condition of the given type with `status: False` and no timestamp, the starting
    /// point for every aggregation pass.
    pub fn new(condition_type: ConditionType) -> Self {
        Self {
            condition_type,
            status: ConditionStatus::False,
            reason: String::new(),
            message: String::new(),
            last_transition_time: None,
        }
    }

    pub fn with_status(condition_type: ConditionType, status: ConditionStatus) -> Self {
        Self {
            status,
            ..Self::new(condition_type)
        }
    }
}

/// Finds the condition of the given type, returning its position and a reference.
pub fn find_condition(
    conditions: &[Condition],
    condition_type: ConditionType,
) -> Option<(usize, &Condition)> {
    conditions
        .iter()
        .enumerate()
        .find(|(_, condition)| condition.condition_type == condition_type)
}

/// Fills `condition`'s transition timestamp relative to `old_condition` and reports whether the
/// condition changed and needs to be written.
///
/// If `condition`'s timestamp is unset it inherits the old condition's timestamp, and the
/// timestamp is excluded from the change comparison. The timestamp is advanced to `clock.now()`
/// only when the status actually transitions, so no-op updates never refresh it and it never goes
/// backward.
pub fn fill_condition(
    clock: &dyn Clock,
    old_condition: Option<&Condition>,
    condition: &mut Condition,
) -> bool {
    match old_condition {
        Some(old) => {
            let inherit_time = condition.last_transition_time.is_none();
            if inherit_time {
                condition.last_transition_time = old.last_transition_time;
            }

            let needs_update = condition != old;
            if needs_update && inherit_time && condition.status != old.status {
                condition.last_transition_time = Some(clock.now());
            }
            needs_update
        }
        None => {
            if condition.last_transition_time.is_none() {
                condition.last_transition_time = Some(clock.now());
            }
            true
        }
    }
}

/// Fills a whole list of freshly computed conditions against the previously stored list,
/// reporting whether anything changed.
pub fn fill_new_conditions(
    clock: &dyn Clock,
    existing_conditions: Option<&[Condition]>,
    new_conditions: &mut [Condition],
) -> bool {
    let mut updated = false;
    for condition in new_conditions.iter_mut() {
        let old_condition = existing_conditions
            .and_then(|existing| find_condition(existing, condition.condition_type))
            .map(|(_, old)| old.clone());
        updated = fill_condition(clock, old_condition.as_ref(), condition) || updated;
    }

    updated || existing_conditions.map(<[Condition]>::len).unwrap_or(0) != new_conditions.len()
}

/// ANY semantics: `True` if any condition is `True`, else `Unknown` if any is `Unknown`, else
/// `False`. An empty list is `False`.
pub fn calculate_condition_any(conditions: &[Condition]) -> ConditionStatus {
    let mut any_unknown = false;
    for condition in conditions {
        match condition.status {
            ConditionStatus::True => return ConditionStatus::True,
            ConditionStatus::Unknown => any_unknown = true,
            ConditionStatus::False => {}
        }
    }

    if any_unknown {
        ConditionStatus::Unknown
    } else {
        ConditionStatus::False
    }
}

/// ALL semantics: `True` only if every condition is `True`; `Unknown` if any is `Unknown`; else
/// `False`. An empty list is `Unknown`.
pub fn calculate_condition_all(conditions: &[Condition]) -> ConditionStatus {
    if conditions.is_empty() {
        return ConditionStatus::Unknown;
    }

    let mut any_false = false;
    for condition in conditions {
        match condition.status {
            ConditionStatus::Unknown => return ConditionStatus::Unknown,
            ConditionStatus::False => any_false = true,
            ConditionStatus::True => {}
        }
    }

    if any_false {
        ConditionStatus::False
    } else {
        ConditionStatus::True
    }
}
