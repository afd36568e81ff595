/*!

This library provides the Kubernetes custom resource definitions shared by the composer
controllers: the cluster-scoped `ServiceDescriptor` authored by service owners, and the
namespaced `LocationDescriptor` derived from it for each deployment location. It also
owns the condition model (status Boolean algebra and monotonic transition timestamps)
and small conveniences for querying object metadata.

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

pub use clock::{Clock, SystemClock};
pub use condition::{
    calculate_condition_all, calculate_condition_any, fill_condition, fill_new_conditions,
    find_condition, Condition, ConditionStatus, ConditionType,
};
pub use crd_ext::CrdExt;
pub use descriptor::{
    ConfigSet, DescriptorLocation, DescriptorResource, LocationName, LocationStatus,
    ResourceDependency, ResourceGroup, ResourceGroupName, ResourceName, ResourceType, Scope,
    ServiceDescriptor, ServiceDescriptorSpec, ServiceDescriptorStatus,
};
pub use location::{Account, ClusterLocation, EnvType, Label, Location, Region};
pub use location_descriptor::{
    LocationDependency, LocationDescriptor, LocationDescriptorSpec, LocationDescriptorStatus,
    LocationResource,
};

mod clock;
mod condition;
pub mod constants;
mod crd_ext;
mod descriptor;
mod location;
mod location_descriptor;
