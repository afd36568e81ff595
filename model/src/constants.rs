/// Helper macro to avoid retyping the base domain-like name of our system when creating further
/// string constants from it. When given no parameters, this returns the base domain-like name of
/// the system. When given a string literal parameter it adds `/parameter` to the end.
macro_rules! composer {
    () => {
        "composer.dev"
    };
    ($s:literal) => {
        concat!(composer!(), "/", $s)
    };
}

// System identifiers
pub const DOMAIN: &str = composer!();
pub const GROUP: &str = composer!();
pub const API_VERSION: &str = composer!("v1");

// Object kinds written by the controller
pub const SERVICE_DESCRIPTOR_KIND: &str = "ServiceDescriptor";
pub const LOCATION_DESCRIPTOR_KIND: &str = "LocationDescriptor";
pub const NAMESPACE_KIND: &str = "Namespace";

// Label keys stamped onto derived namespaces. The namespace labels are the source of truth for
// which service (and which location label) a namespace belongs to.
pub const LABEL_SERVICE_NAME: &str = composer!("service-name");
pub const LABEL_SERVICE_LABEL: &str = composer!("service-label");

/// The finalizer that blocks hard deletion of a `ServiceDescriptor` until its derived children
/// have been torn down.
pub const FINALIZER_COMPOSITION: &str = composer!("service-descriptor-composition");

// Condition reasons surfaced on descriptor status
pub const REASON_TERMINAL_ERROR: &str = "TerminalError";
pub const REASON_RETRIABLE_ERROR: &str = "RetriableError";
pub const REASON_INTEROP_ERROR: &str = "LocationInteropError";

/// The reserved scope every variable resolution falls back to.
pub const SCOPE_GLOBAL: &str = "global";

// Templating prefixes. `self:` placeholders are resolved by the descriptor transformer;
// `release:` placeholders are reserved for the downstream templating stage and pass through
// untouched.
pub const SELF_PREFIX: &str = "self:";
pub const RELEASE_PREFIX: &str = "release:";

/// The separator between a service name and its location label in derived namespace names.
pub const LABEL_SEPARATOR: &str = "--";

#[test]
fn composer_constants_macro_test() {
    assert_eq!("composer.dev", composer!());
    assert_eq!("composer.dev/v1", API_VERSION);
    assert_eq!("composer.dev/foo", composer!("foo"));
}
