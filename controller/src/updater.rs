use crate::cache::ObjectCache;
use async_trait::async_trait;
use composer_model::{CrdExt, ServiceDescriptor};
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Resource, ResourceExt};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use snafu::Snafu;
use std::fmt::Debug;
use std::sync::Arc;

/// How a write to the apiserver failed.
///
/// `Conflict` covers optimistic-concurrency failures (409, including `AlreadyExists` on
/// create) and means another writer got there first; the caller should end its pass and
/// wait for the next delivery rather than treat it as an error.
#[derive(Clone, Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum UpdateError {
    #[snafu(display("conflicting write for '{}'", name))]
    Conflict { name: String },

    #[snafu(display("precondition failed for '{}': {}", name, reason))]
    PreconditionFailed { name: String, reason: String },

    #[snafu(display("retriable failure writing '{}': {}", name, reason))]
    Retriable { name: String, reason: String },

    #[snafu(display("failure writing '{}': {}", name, reason))]
    Terminal { name: String, reason: String },
}

impl UpdateError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, UpdateError::Conflict { .. })
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, UpdateError::Retriable { .. })
    }
}

/// Sorts an apiserver error into the [`UpdateError`] taxonomy. Throttling and server-side
/// failures are worth retrying; everything else the apiserver rejected is not going to
/// succeed until the inputs change.
fn classify_write(error: kube::Error, name: &str) -> UpdateError {
    match error {
        kube::Error::Api(response) => {
            if response.code == 409 {
                UpdateError::Conflict {
                    name: name.to_string(),
                }
            } else if response.code == 429 || response.code >= 500 {
                UpdateError::Retriable {
                    name: name.to_string(),
                    reason: response.message,
                }
            } else {
                UpdateError::Terminal {
                    name: name.to_string(),
                    reason: response.message,
                }
            }
        }
        // Transport-level failures say nothing about the request itself.
        other => UpdateError::Retriable {
            name: name.to_string(),
            reason: other.to_string(),
        },
    }
}

/// A check applied to the live object before it is overwritten, e.g. an ownership check.
/// Returning `Err` with a reason fails the write with [`UpdateError::PreconditionFailed`].
pub type Precondition<'a, K> = dyn Fn(&K) -> Result<(), String> + Send + Sync + 'a;

/// Writes one kind of child object, reading the current state from the informer cache so
/// that an unchanged object costs no apiserver round trip.
#[async_trait]
pub trait ObjectUpdater<K>: Send + Sync {
    /// Creates `desired` if it is absent, or overwrites the live object when the desired
    /// state differs. Returns the live object, which is untouched when it already matches.
    async fn create_or_update(
        &self,
        desired: K,
        precondition: &Precondition<'_, K>,
    ) -> Result<K, UpdateError>;

    /// Requests foreground deletion of the object and reports what remains: `Some` while
    /// the object still exists (deletion pending), `None` once it is gone.
    async fn delete_and_get(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, UpdateError>;
}

/// [`ObjectUpdater`] backed by a [`kube::Api`]. The `api_for` function supplies the right
/// `Api` for a target namespace so one updater serves both cluster-scoped and namespaced
/// kinds. The `same_spec` function decides whether the live object already matches the
/// desired one, which is what makes a settled pass write-free.
pub struct ApiUpdater<K> {
    api_for: Box<dyn Fn(Option<&str>) -> Api<K> + Send + Sync>,
    cache: Arc<dyn ObjectCache<K>>,
    same_spec: fn(&K, &K) -> bool,
}

impl<K> ApiUpdater<K> {
    pub fn new(
        api_for: impl Fn(Option<&str>) -> Api<K> + Send + Sync + 'static,
        cache: Arc<dyn ObjectCache<K>>,
        same_spec: fn(&K, &K) -> bool,
    ) -> Self {
        Self {
            api_for: Box::new(api_for),
            cache,
            same_spec,
        }
    }
}

#[async_trait]
impl<K> ObjectUpdater<K> for ApiUpdater<K>
where
    K: Resource<DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    async fn create_or_update(
        &self,
        desired: K,
        precondition: &Precondition<'_, K>,
    ) -> Result<K, UpdateError> {
        let name = desired.name_any();
        let namespace = desired.namespace();
        let api = (self.api_for)(namespace.as_deref());

        match self.cache.get(namespace.as_deref(), &name) {
            None => {
                debug!("Creating {} '{}'", K::kind(&()), name);
                api.create(&PostParams::default(), &desired)
                    .await
                    .map_err(|error| classify_write(error, &name))
            }
            Some(existing) => {
                precondition(&existing).map_err(|reason| UpdateError::PreconditionFailed {
                    name: name.clone(),
                    reason,
                })?;
                if (self.same_spec)(&desired, &existing) {
                    return Ok(existing);
                }
                // Carry the observed resourceVersion so a concurrent writer surfaces as 409.
                let mut desired = desired;
                desired.meta_mut().resource_version = existing.resource_version().into();
                debug!("Updating {} '{}'", K::kind(&()), name);
                api.replace(&name, &PostParams::default(), &desired)
                    .await
                    .map_err(|error| classify_write(error, &name))
            }
        }
    }

    async fn delete_and_get(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, UpdateError> {
        let existing = match self.cache.get(namespace, name) {
            None => return Ok(None),
            Some(existing) => existing,
        };
        if existing.meta().deletion_timestamp.is_some() {
            // Deletion already requested; don't ask again.
            return Ok(Some(existing));
        }

        debug!("Deleting {} '{}'", K::kind(&()), name);
        let api = (self.api_for)(namespace);
        match api.delete(name, &DeleteParams::foreground()).await {
            Ok(_) => {}
            Err(kube::Error::Api(response)) if response.code == 404 => return Ok(None),
            Err(error) => return Err(classify_write(error, name)),
        }
        // The watch will report the disappearance; until then the object still exists.
        Ok(Some(existing))
    }
}

/// Which parts of a `ServiceDescriptor` a pass actually touched. Finalizers live on the
/// main resource and conditions behind the status subresource, so each gets its own
/// write, issued only when needed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DescriptorChanges {
    pub resource: bool,
    pub status: bool,
}

impl DescriptorChanges {
    pub fn any(&self) -> bool {
        self.resource || self.status
    }
}

/// Persists changes to a `ServiceDescriptor`, both its metadata (finalizers) and status.
#[async_trait]
pub trait DescriptorWriter: Send + Sync {
    async fn update(
        &self,
        descriptor: &ServiceDescriptor,
        changes: DescriptorChanges,
    ) -> Result<(), UpdateError>;
}

pub struct ApiDescriptorWriter {
    api: Api<ServiceDescriptor>,
}

impl ApiDescriptorWriter {
    pub fn new(api: Api<ServiceDescriptor>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl DescriptorWriter for ApiDescriptorWriter {
    async fn update(
        &self,
        descriptor: &ServiceDescriptor,
        changes: DescriptorChanges,
    ) -> Result<(), UpdateError> {
        let name = descriptor.object_name();

        // The status subresource is written first. The resource write is the one that can
        // release the last finalizer of a deleting descriptor, at which point the
        // apiserver hard-deletes the object and no further write can land, so it must
        // come last.
        if changes.status {
            let data = serde_json::to_vec(descriptor).map_err(|error| UpdateError::Terminal {
                name: name.to_string(),
                reason: error.to_string(),
            })?;
            let updated = self
                .api
                .replace_status(name, &PostParams::default(), data)
                .await
                .map_err(|error| classify_write(error, name))?;
            if changes.resource {
                // Carry the resourceVersion the status write produced, or the resource
                // write would always lose a conflict against it.
                let mut desired = descriptor.clone();
                desired.metadata.resource_version = updated.resource_version().into();
                self.api
                    .replace(name, &PostParams::default(), &desired)
                    .await
                    .map_err(|error| classify_write(error, name))?;
            }
            return Ok(());
        }

        if changes.resource {
            self.api
                .replace(name, &PostParams::default(), descriptor)
                .await
                .map_err(|error| classify_write(error, name))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("code {}", code),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn conflict_is_conflict() {
        assert!(classify_write(api_error(409), "x").is_conflict());
    }

    #[test]
    fn throttling_and_server_errors_are_retriable() {
        assert!(classify_write(api_error(429), "x").is_retriable());
        assert!(classify_write(api_error(500), "x").is_retriable());
        assert!(classify_write(api_error(503), "x").is_retriable());
    }

    #[test]
    fn client_errors_are_terminal() {
        let error = classify_write(api_error(422), "x");
        assert!(!error.is_retriable());
        assert!(!error.is_conflict());
    }
}
