use crate::{LocationDescriptor, ServiceDescriptor};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

/// Provides some conveniences for querying a `kube-rs` object.
pub trait CrdExt {
    /// Returns this object's `ObjectMeta` information (i.e. the `metadata` field). You implement
    /// this by returning `&self.metadata`. This allows the rest of this trait's functions to be
    /// implemented for you.
    fn object_meta(&self) -> &ObjectMeta;

    /// Returns the object.metadata.name field, unwrapping a potential `None` with `""`. In
    /// practice, an object's name cannot be missing since this is how we `GET` an object in the
    /// first place, so we do away with the `Option` for convenience.
    fn object_name(&self) -> &str {
        self.object_meta().name.as_deref().unwrap_or("")
    }

    /// Does the object have the given `finalizer`.
    fn has_finalizer(&self, finalizer: &str) -> bool {
        self.object_meta()
            .finalizers
            .as_ref()
            .map(|finalizers| finalizers.iter().any(|item| item == finalizer))
            .unwrap_or(false)
    }

    /// Has someone requested that the object be deleted.
    fn is_delete_requested(&self) -> bool {
        self.object_meta().deletion_timestamp.is_some()
    }

    /// The owner reference marked as the managing controller, if any.
    fn controller_owner(&self) -> Option<&OwnerReference> {
        self.object_meta()
            .owner_references
            .as_ref()?
            .iter()
            .find(|reference| reference.controller == Some(true))
    }

    /// Whether this object's controlling owner reference points at `owner`, compared by UID.
    fn is_controlled_by(&self, owner: &impl CrdExt) -> bool {
        let owner_uid = match &owner.object_meta().uid {
            Some(uid) => uid,
            None => return false,
        };
        self.controller_owner()
            .map(|reference| &reference.uid == owner_uid)
            .unwrap_or(false)
    }
}

impl CrdExt for ServiceDescriptor {
    fn object_meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl CrdExt for LocationDescriptor {
    fn object_meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl CrdExt for Namespace {
    fn object_meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}
