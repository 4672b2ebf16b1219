use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::config::RequeueIntervals;
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::store::{KubeStore, ObjectKey, ObjectStore};
use crate::crd::Postgres;
use crate::health::HealthState;

/// Shared context for the controller
///
/// Holds one store per object kind so the reconcile engine can run against
/// the API server or an in-memory store alike.
pub struct Context {
    pub postgres: Arc<dyn ObjectStore<Postgres>>,
    pub secrets: Arc<dyn ObjectStore<Secret>>,
    pub statefulsets: Arc<dyn ObjectStore<StatefulSet>>,
    pub services: Arc<dyn ObjectStore<Service>>,
    pub requeue: RequeueIntervals,
    pub backoff: BackoffConfig,
    /// Metrics sink, absent in tests
    pub health_state: Option<Arc<HealthState>>,
    shutdown: CancellationToken,
    /// Consecutive failed passes per key
    errors: Mutex<HashMap<ObjectKey, u32>>,
}

impl Context {
    /// Context backed by the Kubernetes API
    pub fn new(client: Client) -> Self {
        Self::with_stores(
            Arc::new(KubeStore::new(client.clone())),
            Arc::new(KubeStore::new(client.clone())),
            Arc::new(KubeStore::new(client.clone())),
            Arc::new(KubeStore::new(client)),
        )
    }

    /// Context backed by the given stores, with default intervals
    pub fn with_stores(
        postgres: Arc<dyn ObjectStore<Postgres>>,
        secrets: Arc<dyn ObjectStore<Secret>>,
        statefulsets: Arc<dyn ObjectStore<StatefulSet>>,
        services: Arc<dyn ObjectStore<Service>>,
    ) -> Self {
        Self {
            postgres,
            secrets,
            statefulsets,
            services,
            requeue: RequeueIntervals::default(),
            backoff: BackoffConfig::default(),
            health_state: None,
            shutdown: CancellationToken::new(),
            errors: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_requeue(mut self, requeue: RequeueIntervals) -> Self {
        self.requeue = requeue;
        self
    }

    pub fn with_health_state(mut self, health_state: Arc<HealthState>) -> Self {
        self.health_state = Some(health_state);
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Fail with [`Error::Cancelled`] once shutdown was requested
    pub fn ensure_not_cancelled(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Record a failed pass for `key`, returning the number of consecutive failures before it
    pub fn record_error(&self, key: &ObjectKey) -> u32 {
        let mut errors = self.errors.lock().unwrap_or_else(|e| e.into_inner());
        let count = errors.entry(key.clone()).or_default();
        let attempt = *count;
        *count = count.saturating_add(1);
        attempt
    }

    /// Forget failures for `key` after a successful pass
    pub fn reset_errors(&self, key: &ObjectKey) {
        let mut errors = self.errors.lock().unwrap_or_else(|e| e.into_inner());
        errors.remove(key);
    }
}
