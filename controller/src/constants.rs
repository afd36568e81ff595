use kube::runtime::controller::Action;
use std::time::Duration;

/// Which account, region and environment type this controller serves.
pub const ENV_ACCOUNT: &str = "COMPOSER_ACCOUNT";
pub const ENV_REGION: &str = "COMPOSER_REGION";
pub const ENV_ENV_TYPE: &str = "COMPOSER_ENV_TYPE";

/// When set, restricts the controller to the service owning this one namespace.
pub const ENV_NAMESPACE: &str = "COMPOSER_NAMESPACE";

/// Tell the controller to reconcile the object again after some duration.
pub(crate) fn requeue() -> Action {
    Action::requeue(Duration::from_secs(30))
}

/// Requeue quickly after an error.
pub(crate) fn requeue_error() -> Action {
    Action::requeue(Duration::from_secs(5))
}
