use composer_model::constants::LABEL_SERVICE_NAME;
use composer_model::LocationDescriptor;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ListParams;
use kube::runtime::watcher;
use kube::{Api, Resource, ResourceExt};
use log::warn;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};

/// Index of `Namespace` objects by the value of their service-name label.
pub const NAMESPACE_SERVICE_NAME_INDEX: &str = "namespaceServiceName";

/// Index of `LocationDescriptor` objects by the namespace they live in.
pub const LOCATION_DESCRIPTOR_NAMESPACE_INDEX: &str = "locationDescriptorNamespace";

/// Read access to locally cached objects of one kind, fed by a watch. Lookups are
/// infallible; a miss only means the cache has not (or no longer) seen the object.
pub trait ObjectCache<K>: Send + Sync {
    fn get(&self, namespace: Option<&str>, name: &str) -> Option<K>;

    /// All objects whose index function produced `value` under the named index. Unknown
    /// index names yield nothing.
    fn by_index(&self, index_name: &str, value: &str) -> Vec<K>;
}

/// Computes the index values an object should be findable under.
pub type IndexFn<K> = fn(&K) -> Vec<String>;

/// An [`ObjectCache`] kept current by [`run_watcher`].
pub struct IndexedCache<K> {
    objects: RwLock<HashMap<String, K>>,
    indexes: Vec<(&'static str, IndexFn<K>)>,
}

fn object_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(namespace) => format!("{}/{}", namespace, name),
        None => name.to_string(),
    }
}

impl<K> IndexedCache<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync,
{
    pub fn new(indexes: Vec<(&'static str, IndexFn<K>)>) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            indexes,
        }
    }

    fn key_of(object: &K) -> String {
        object_key(object.namespace().as_deref(), &object.name_any())
    }

    pub fn apply(&self, object: K) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(Self::key_of(&object), object);
        }
    }

    pub fn delete(&self, object: &K) {
        if let Ok(mut objects) = self.objects.write() {
            objects.remove(&Self::key_of(object));
        }
    }

    pub fn replace_all(&self, new_objects: Vec<K>) {
        if let Ok(mut objects) = self.objects.write() {
            objects.clear();
            for object in new_objects {
                objects.insert(Self::key_of(&object), object);
            }
        }
    }
}

impl<K> ObjectCache<K> for IndexedCache<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync,
{
    fn get(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        self.objects
            .read()
            .ok()
            .and_then(|objects| objects.get(&object_key(namespace, name)).cloned())
    }

    fn by_index(&self, index_name: &str, value: &str) -> Vec<K> {
        let index_fn = match self
            .indexes
            .iter()
            .find(|(name, _)| *name == index_name)
            .map(|(_, index_fn)| *index_fn)
        {
            Some(index_fn) => index_fn,
            None => return Vec::new(),
        };
        match self.objects.read() {
            Ok(objects) => objects
                .values()
                .filter(|object| index_fn(object).iter().any(|indexed| indexed == value))
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Feeds a cache from a watch on the apiserver until the stream ends. Watch errors are
/// logged and the watch restarts itself with a fresh list.
pub async fn run_watcher<K>(api: Api<K>, cache: Arc<IndexedCache<K>>)
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    let mut stream = Box::pin(watcher(api, ListParams::default()));
    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Applied(object)) => cache.apply(object),
            Ok(watcher::Event::Deleted(object)) => cache.delete(&object),
            Ok(watcher::Event::Restarted(objects)) => cache.replace_all(objects),
            Err(error) => warn!("Error watching {}: {}", K::kind(&()), error),
        }
    }
}

/// Index function for [`NAMESPACE_SERVICE_NAME_INDEX`].
pub fn namespace_service_name_index(namespace: &Namespace) -> Vec<String> {
    namespace
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(LABEL_SERVICE_NAME))
        .map(|service_name| vec![service_name.clone()])
        .unwrap_or_default()
}

/// Index function for [`LOCATION_DESCRIPTOR_NAMESPACE_INDEX`].
pub fn location_descriptor_namespace_index(descriptor: &LocationDescriptor) -> Vec<String> {
    descriptor
        .metadata
        .namespace
        .as_ref()
        .map(|namespace| vec![namespace.clone()])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;
    use maplit::btreemap;

    fn namespace(name: &str, service_name: Option<&str>) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: service_name.map(|service_name| {
                    btreemap! {LABEL_SERVICE_NAME.to_string() => service_name.to_string()}
                }),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        }
    }

    fn namespace_cache() -> IndexedCache<Namespace> {
        IndexedCache::new(vec![(
            NAMESPACE_SERVICE_NAME_INDEX,
            namespace_service_name_index as IndexFn<Namespace>,
        )])
    }

    #[test]
    fn get_after_apply_and_delete() {
        let cache = namespace_cache();
        let ns = namespace("svc", Some("svc"));
        cache.apply(ns.clone());
        assert!(cache.get(None, "svc").is_some());
        cache.delete(&ns);
        assert!(cache.get(None, "svc").is_none());
    }

    #[test]
    fn index_finds_labeled_objects_only() {
        let cache = namespace_cache();
        cache.apply(namespace("svc", Some("svc")));
        cache.apply(namespace("svc--dark", Some("svc")));
        cache.apply(namespace("kube-system", None));
        cache.apply(namespace("other", Some("other")));

        let mut names: Vec<String> = cache
            .by_index(NAMESPACE_SERVICE_NAME_INDEX, "svc")
            .into_iter()
            .map(|ns| ns.metadata.name.unwrap_or_default())
            .collect();
        names.sort();
        assert_eq!(names, vec!["svc".to_string(), "svc--dark".to_string()]);
    }

    #[test]
    fn unknown_index_is_empty() {
        let cache = namespace_cache();
        cache.apply(namespace("svc", Some("svc")));
        assert!(cache.by_index("nope", "svc").is_empty());
    }

    #[test]
    fn restart_replaces_contents() {
        let cache = namespace_cache();
        cache.apply(namespace("old", Some("old")));
        cache.replace_all(vec![namespace("new", Some("new"))]);
        assert!(cache.get(None, "old").is_none());
        assert!(cache.get(None, "new").is_some());
    }
}
