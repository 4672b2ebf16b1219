pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use config::{ControllerConfig, RequeueIntervals};
pub use controller::{
    BackoffConfig, Context, Error, FINALIZER, ObjectKey, ObjectStore, Result, error_policy,
    reconcile, reconcile_key,
};
pub use crd::Postgres;
pub use health::{HealthState, Metrics};

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::Controller;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Run the Postgres controller until the watch streams end or a shutdown signal arrives.
///
/// Watches Postgres resources and the StatefulSets and Services they own, so a
/// change to a child re-triggers reconciliation of its owner. Cancelling
/// `shutdown` makes in-flight passes stop before their next write.
pub async fn run_controller(
    client: Client,
    config: &ControllerConfig,
    health_state: Option<Arc<HealthState>>,
    shutdown: CancellationToken,
) {
    let namespace = config.namespace.as_deref();
    tracing::info!(
        "Starting controller for Postgres resources (scope: {})",
        namespace.unwrap_or("cluster-wide")
    );

    let mut ctx = Context::new(client.clone())
        .with_requeue(config.requeue.clone())
        .with_shutdown(shutdown);
    if let Some(state) = &health_state {
        state.set_ready(true).await;
        ctx = ctx.with_health_state(state.clone());
    }
    let ctx = Arc::new(ctx);

    let instances: Api<Postgres> = scoped_api(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client, namespace);

    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(instances, watcher_config.clone())
        .owns(statefulsets, watcher_config.clone())
        .owns(services, watcher_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    let is_not_found = matches!(
                        &e,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
                    );
                    if is_not_found {
                        tracing::debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        tracing::error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    if let Some(state) = &health_state {
        state.set_ready(false).await;
    }
    tracing::info!("Controller stopped");
}

/// Wait up to `grace` for the controller task to finish after shutdown was requested.
///
/// Returns false when the grace period elapsed first; the task keeps running
/// until the runtime is dropped.
pub async fn drain_controller(handle: &mut JoinHandle<()>, grace: Duration) -> bool {
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(())) => {
            tracing::info!("Controller drained");
            true
        }
        Ok(Err(e)) => {
            tracing::error!("Controller task panicked: {}", e);
            true
        }
        Err(_) => {
            tracing::warn!("Grace period elapsed with reconciliations still running");
            false
        }
    }
}
