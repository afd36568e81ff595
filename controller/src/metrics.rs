use composer_model::Condition;
use log::debug;

/// Receives notable condition transitions on descriptors. The controller records a
/// transition whenever a condition it writes becomes `True`.
pub trait ConditionMetrics: Send + Sync {
    fn condition_transition(&self, descriptor_name: &str, condition: &Condition);
}

/// Logs transitions at debug level. A metrics backend can stand in behind the same trait.
pub struct LogMetrics;

impl ConditionMetrics for LogMetrics {
    fn condition_transition(&self, descriptor_name: &str, condition: &Condition) {
        debug!(
            "Condition {:?} became True for '{}' (reason '{}')",
            condition.condition_type, descriptor_name, condition.reason
        );
    }
}
