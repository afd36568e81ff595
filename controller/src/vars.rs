use crate::error::ValidationError;
use crate::expand::merge;
use composer_model::constants::SCOPE_GLOBAL;
use composer_model::ServiceDescriptorSpec;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// The scoped configuration variables of one descriptor, resolved against a location's scope
/// hierarchy.
///
/// A variable reference like `compute.scaling.min` is looked up in every scope that matches
/// the location, from most specific (`env.region.label.account`) to least specific (`env`),
/// and finally in the `global` scope. Values found in more specific scopes win; maps found
/// at several levels are deep-merged with the more specific entries taking precedence, while
/// lists and scalars are replaced outright.
pub struct VarModel {
    scopes: HashMap<String, Map<String, Value>>,
}

/// The outcome of looking for a variable in a single scope.
enum ScopeLookup {
    /// The scope defines the variable; the value may be an explicit `null`.
    Found(Value),
    ScopeMissing,
    /// The scope exists but the path does not resolve within it.
    PathMissing { similar: Option<String> },
}

impl VarModel {
    /// Indexes a descriptor's config sections by scope. A scope listed twice keeps the last
    /// occurrence.
    pub fn from_spec(spec: &ServiceDescriptorSpec) -> Self {
        let mut scopes = HashMap::with_capacity(spec.config.len());
        for config_set in &spec.config {
            scopes.insert(config_set.scope.to_string(), config_set.vars.clone());
        }
        Self { scopes }
    }

    /// Resolves `var_name` against the scopes matching `hierarchy`, most specific first,
    /// with `global` as the least specific fallback.
    pub fn resolve(&self, hierarchy: &[String], var_name: &str) -> Result<Value, ValidationError> {
        let mut value: Option<Value> = None;
        let mut found = false;
        let mut similar: Option<String> = None;

        for idx in 0..hierarchy.len() {
            let scope = hierarchy[..hierarchy.len() - idx].join(".");
            match self.find_in_scope(&scope, var_name)? {
                ScopeLookup::ScopeMissing => {}
                ScopeLookup::PathMissing {
                    similar: path_similar,
                } => {
                    if path_similar.is_some() {
                        similar = path_similar;
                    }
                }
                ScopeLookup::Found(scope_value) => {
                    found = true;
                    if scope_value.is_null() {
                        continue;
                    }
                    value = Some(match value {
                        // A value from a more specific scope wins over this one.
                        Some(winner) => merge(winner, scope_value),
                        None => scope_value,
                    });
                }
            }
        }

        let global_value = match self.find_in_scope(SCOPE_GLOBAL, var_name)? {
            ScopeLookup::Found(global_value) if !global_value.is_null() => Some(global_value),
            _ => None,
        };

        if value.is_none() && global_value.is_none() && !found {
            return Err(ValidationError::VariableNotFound {
                var_name: var_name.to_string(),
                similar,
            });
        }

        Ok(match (value, global_value) {
            (Some(winner), Some(loser)) => merge(winner, loser),
            (Some(winner), None) => winner,
            (None, Some(loser)) => loser,
            (None, None) => Value::Null,
        })
    }

    fn find_in_scope(&self, scope: &str, var_name: &str) -> Result<ScopeLookup, ValidationError> {
        let vars = match self.scopes.get(scope) {
            Some(vars) => vars,
            None => return Ok(ScopeLookup::ScopeMissing),
        };
        find_in_map(vars, var_name)
    }
}

/// Walks a dotted path through nested maps. A missing key reports the closest existing key
/// at the level where the walk stopped; a non-map value in the middle of the path is a hard
/// error.
fn find_in_map(vars: &Map<String, Value>, var_name: &str) -> Result<ScopeLookup, ValidationError> {
    let segments: Vec<&str> = var_name.split('.').collect();
    let mut current = vars;
    for (position, segment) in segments.iter().enumerate() {
        let value = match current.get(*segment) {
            Some(value) => value,
            None => {
                return Ok(ScopeLookup::PathMissing {
                    similar: closest_key(current.keys(), segment),
                })
            }
        };
        if position == segments.len() - 1 {
            return Ok(ScopeLookup::Found(value.clone()));
        }
        current = match value {
            Value::Object(map) => map,
            _ => {
                return Err(ValidationError::NotAMap {
                    key: (*segment).to_string(),
                })
            }
        };
    }
    // Unreachable since split always yields at least one segment.
    Ok(ScopeLookup::PathMissing { similar: None })
}

/// The existing key closest to `target` by edit distance, for "did you mean" hints.
fn closest_key<'a>(keys: impl Iterator<Item = &'a String>, target: &str) -> Option<String> {
    keys.min_by_key(|key| levenshtein(key, target)).cloned()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut distances: Vec<usize> = (0..=b.len()).collect();
    for (i, a_char) in a.iter().enumerate() {
        let mut previous_diagonal = distances[0];
        distances[0] = i + 1;
        for (j, b_char) in b.iter().enumerate() {
            let substitution = previous_diagonal + usize::from(a_char != b_char);
            previous_diagonal = distances[j + 1];
            distances[j + 1] = substitution
                .min(distances[j + 1] + 1)
                .min(distances[j] + 1);
        }
    }
    distances[b.len()]
}
