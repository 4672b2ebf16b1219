//! Access to the declarative store
//!
//! The reconcile engine talks to the API server only through [`ObjectStore`],
//! one store per object kind. [`KubeStore`] is the production implementation;
//! tests substitute an in-memory store.

use std::fmt;
use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::resources::FIELD_MANAGER;

/// Namespaced objects the controller reads and writes
pub trait StoredObject:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + DeserializeOwned
    + Serialize
    + Debug
    + Send
    + Sync
    + 'static
{
}

impl<K> StoredObject for K where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static
{
}

/// (namespace, name) identifying a resource
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing object, failing if it carries no namespace or name
    pub fn from_resource<K: Resource>(obj: &K) -> Result<Self> {
        let namespace = obj
            .meta()
            .namespace
            .clone()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let name = obj
            .meta()
            .name
            .clone()
            .ok_or(Error::MissingObjectKey(".metadata.name"))?;
        Ok(Self { namespace, name })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Result of a delete request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteStatus {
    /// The object is gone
    Deleted,
    /// Deletion was accepted but the object still exists (finalizers pending)
    InProgress,
    /// There was nothing to delete
    NotFound,
}

/// Typed access to one kind of namespaced object.
///
/// `update` and `update_status` send the object's `resourceVersion` as the
/// optimistic-concurrency token and fail with [`Error::Conflict`] when it is
/// stale. `create` fails with [`Error::AlreadyExists`] when the name is taken.
#[async_trait]
pub trait ObjectStore<K: StoredObject>: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    async fn create(&self, namespace: &str, obj: &K) -> Result<K>;

    async fn update(&self, namespace: &str, obj: &K) -> Result<K>;

    async fn update_status(&self, namespace: &str, obj: &K) -> Result<K>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<DeleteStatus>;
}

/// [`ObjectStore`] backed by the Kubernetes API
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K: StoredObject> KubeStore<K> {
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn is_conflict(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(resp) if resp.code == 409)
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(resp) if resp.code == 404)
}

#[async_trait]
impl<K: StoredObject> ObjectStore<K> for KubeStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.name_any();
        match self.api(namespace).create(&PostParams::default(), obj).await {
            Ok(created) => Ok(created),
            Err(e) if is_conflict(&e) => Err(Error::AlreadyExists(format!("{namespace}/{name}"))),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.name_any();
        match self
            .api(namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
        {
            Ok(updated) => Ok(updated),
            Err(e) if is_conflict(&e) => Err(Error::Conflict(format!("{namespace}/{name}"))),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_status(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.name_any();
        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);

        // resourceVersion in a merge patch acts as a precondition
        let patch = json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": status,
        });

        match self
            .api(namespace)
            .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
        {
            Ok(updated) => Ok(updated),
            Err(e) if is_conflict(&e) => Err(Error::Conflict(format!("{namespace}/{name}"))),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<DeleteStatus> {
        match self
            .api(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(response) if response.is_left() => Ok(DeleteStatus::InProgress),
            Ok(_) => Ok(DeleteStatus::Deleted),
            Err(e) if is_not_found(&e) => {
                debug!("{} {}/{} already deleted", K::kind(&()), namespace, name);
                Ok(DeleteStatus::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }
}
