/*!

This [controller] runs in a Kubernetes cluster and composes services: when a
`ServiceDescriptor` CRD instance is added to the cluster, it derives a namespace and a
`LocationDescriptor` for each of the descriptor's locations that match this cluster,
expanding `${self:...}` variable references along the way, and aggregates the children's
conditions back onto the descriptor's status.

[controller]: https://kubernetes.io/docs/concepts/architecture/controller/

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

pub mod cache;
pub mod constants;
pub mod error;
pub mod expand;
pub mod metrics;
pub mod reconcile;
pub mod status;
pub mod transform;
pub mod updater;
pub mod vars;
