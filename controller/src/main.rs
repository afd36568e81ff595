use composer_controller::cache::{
    location_descriptor_namespace_index, namespace_service_name_index, run_watcher, IndexFn,
    IndexedCache, LOCATION_DESCRIPTOR_NAMESPACE_INDEX, NAMESPACE_SERVICE_NAME_INDEX,
};
use composer_controller::constants::{ENV_ACCOUNT, ENV_ENV_TYPE, ENV_NAMESPACE, ENV_REGION};
use composer_controller::metrics::LogMetrics;
use composer_controller::reconcile::{
    run_composition_controller, same_location_descriptor_spec, same_namespace_spec, Controller,
};
use composer_controller::transform::DescriptorTransformer;
use composer_controller::updater::{ApiDescriptorWriter, ApiUpdater};
use composer_model::{
    Account, ClusterLocation, EnvType, LocationDescriptor, Region, ServiceDescriptor, SystemClock,
};
use env_logger::Builder;
use k8s_openapi::api::core::v1::Namespace;
use kube::{Api, Client};
use log::{error, info, LevelFilter};
use std::sync::Arc;

/// The log level used when the `RUST_LOG` environment variable does not exist.
const DEFAULT_LEVEL_FILTER: LevelFilter = LevelFilter::Info;

#[tokio::main]
async fn main() {
    init_logger();
    info!("Starting");

    // Initialize the k8s client from in-cluster variables or KUBECONFIG.
    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(e) => {
            error!("Unable to create k8s client: {}", e);
            std::process::exit(1);
        }
    };

    let cluster_location = match cluster_location_from_env() {
        Ok(cluster_location) => cluster_location,
        Err(e) => {
            error!("Unable to determine cluster location: {}", e);
            std::process::exit(1);
        }
    };
    let namespace = std::env::var(ENV_NAMESPACE).ok();

    // Informer caches for the children, fed by watches for the controller's lifetime.
    let namespace_cache = Arc::new(IndexedCache::new(vec![(
        NAMESPACE_SERVICE_NAME_INDEX,
        namespace_service_name_index as IndexFn<Namespace>,
    )]));
    let location_descriptor_cache = Arc::new(IndexedCache::new(vec![(
        LOCATION_DESCRIPTOR_NAMESPACE_INDEX,
        location_descriptor_namespace_index as IndexFn<LocationDescriptor>,
    )]));
    tokio::spawn(run_watcher(
        Api::<Namespace>::all(client.clone()),
        namespace_cache.clone(),
    ));
    tokio::spawn(run_watcher(
        Api::<LocationDescriptor>::all(client.clone()),
        location_descriptor_cache.clone(),
    ));

    let namespace_updater = ApiUpdater::new(
        {
            let client = client.clone();
            move |_namespace: Option<&str>| Api::<Namespace>::all(client.clone())
        },
        namespace_cache.clone(),
        same_namespace_spec,
    );
    let location_descriptor_updater = ApiUpdater::new(
        {
            let client = client.clone();
            move |namespace: Option<&str>| match namespace {
                Some(namespace) => Api::<LocationDescriptor>::namespaced(client.clone(), namespace),
                None => Api::<LocationDescriptor>::all(client.clone()),
            }
        },
        location_descriptor_cache.clone(),
        same_location_descriptor_spec,
    );
    let descriptor_writer = ApiDescriptorWriter::new(Api::<ServiceDescriptor>::all(client.clone()));

    let composition = Arc::new(Controller {
        clock: Arc::new(SystemClock),
        metrics: Arc::new(LogMetrics),
        cluster_location: cluster_location.clone(),
        namespace,
        transformer: DescriptorTransformer::new(cluster_location),
        namespace_cache,
        location_descriptor_cache,
        namespace_updater: Arc::new(namespace_updater),
        location_descriptor_updater: Arc::new(location_descriptor_updater),
        descriptor_writer: Arc::new(descriptor_writer),
    });

    run_composition_controller(client, composition).await;
}

/// The location this controller instance serves, taken from the environment.
fn cluster_location_from_env() -> Result<ClusterLocation, String> {
    let account = require_env(ENV_ACCOUNT)?;
    let region = require_env(ENV_REGION)?;
    let env_type = require_env(ENV_ENV_TYPE)?;
    Ok(ClusterLocation {
        account: Account::from(account),
        region: Region::from(region),
        env_type: EnvType::from(env_type),
    })
}

fn require_env(name: &str) -> Result<String, String> {
    std::env::var(name).map_err(|_| format!("{} is not set", name))
}

/// Extract the value of `RUST_LOG` if it exists, otherwise log this crate at
/// `DEFAULT_LEVEL_FILTER`.
fn init_logger() {
    match std::env::var(env_logger::DEFAULT_FILTER_ENV).ok() {
        Some(_) => {
            // RUST_LOG exists; env_logger will use it.
            Builder::from_default_env().init();
        }
        None => {
            // RUST_LOG does not exist; use default log level for this crate only.
            Builder::new()
                .filter(Some(env!("CARGO_CRATE_NAME")), DEFAULT_LEVEL_FILTER)
                .filter(Some("composer_model"), DEFAULT_LEVEL_FILTER)
                .init();
        }
    }
}
