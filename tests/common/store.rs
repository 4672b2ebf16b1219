//! In-memory object store
//!
//! Behaves like the API server as far as the reconcile engine can tell:
//! resource versions are checked on update, names are unique, deleting an
//! object that still has finalizers only marks it, and removing the last
//! finalizer of a marked object removes it. Every successful write is logged.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use postgres_controller::controller::{DeleteStatus, Error, ObjectStore, Result, StoredObject};

/// Kind of write recorded by [`MemoryStore`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Update,
    UpdateStatus,
    Delete,
}

/// One recorded write
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Write {
    pub op: WriteOp,
    pub name: String,
}

pub struct MemoryStore<K> {
    objects: Mutex<BTreeMap<(String, String), K>>,
    writes: Mutex<Vec<Write>>,
    version: AtomicU64,
    /// Deletes leave the object terminating instead of removing it
    pub graceful_delete: AtomicBool,
    /// The next create loses a race: the object appears and AlreadyExists is returned
    pub race_next_create: AtomicBool,
    /// The next update or status update fails with a conflict
    pub conflict_next_update: AtomicBool,
    /// Every write fails with a server error
    pub fail_writes: AtomicBool,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            writes: Mutex::new(Vec::new()),
            version: AtomicU64::new(1),
            graceful_delete: AtomicBool::new(false),
            race_next_create: AtomicBool::new(false),
            conflict_next_update: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }
}

pub fn deletion_time() -> Time {
    serde_json::from_value(serde_json::json!("2026-10-18T12:00:00Z")).unwrap()
}

fn api_error(code: u16, reason: &str) -> Error {
    Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} from memory store"),
        reason: reason.to_string(),
        code,
    }))
}

fn key_of<K: StoredObject>(namespace: &str, obj: &K) -> (String, String) {
    (namespace.to_string(), obj.name_any())
}

impl<K: StoredObject> MemoryStore<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        self.version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn record(&self, op: WriteOp, name: &str) {
        self.writes.lock().unwrap().push(Write {
            op,
            name: name.to_string(),
        });
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(api_error(500, "InternalError"));
        }
        Ok(())
    }

    /// Seed an object without recording a write
    pub fn insert(&self, namespace: &str, mut obj: K) {
        obj.meta_mut().namespace = Some(namespace.to_string());
        obj.meta_mut().resource_version = Some(self.next_version());
        let key = key_of(namespace, &obj);
        self.objects.lock().unwrap().insert(key, obj);
    }

    /// Change an object the way another actor would, without recording a write
    pub fn modify(&self, namespace: &str, name: &str, f: impl FnOnce(&mut K)) {
        let version = self.next_version();
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .get_mut(&(namespace.to_string(), name.to_string()))
            .unwrap_or_else(|| panic!("{namespace}/{name} not in store"));
        f(obj);
        obj.meta_mut().resource_version = Some(version);
    }

    /// Remove an object the way another actor would
    pub fn remove(&self, namespace: &str, name: &str) {
        self.objects
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
    }

    pub fn get_now(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn contains(&self, namespace: &str, name: &str) -> bool {
        self.get_now(namespace, name).is_some()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn count_of(&self, op: WriteOp) -> usize {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.op == op)
            .count()
    }

    fn check_version(&self, stored: &K, incoming: &K) -> Result<()> {
        if self.conflict_next_update.swap(false, Ordering::SeqCst)
            || stored.resource_version() != incoming.resource_version()
        {
            return Err(Error::Conflict(incoming.name_any()));
        }
        Ok(())
    }
}

#[async_trait]
impl<K: StoredObject> ObjectStore<K> for MemoryStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.get_now(namespace, name))
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<K> {
        self.check_writable()?;
        let key = key_of(namespace, obj);
        let mut created = obj.clone();
        created.meta_mut().namespace = Some(namespace.to_string());
        created.meta_mut().resource_version = Some(self.next_version());
        if created.meta().uid.is_none() {
            created.meta_mut().uid = Some(format!("uid-{}", key.1));
        }

        let mut objects = self.objects.lock().unwrap();
        if self.race_next_create.swap(false, Ordering::SeqCst) {
            objects.insert(key.clone(), created);
            return Err(Error::AlreadyExists(key.1));
        }
        if objects.contains_key(&key) {
            return Err(Error::AlreadyExists(key.1));
        }
        objects.insert(key.clone(), created.clone());
        drop(objects);

        self.record(WriteOp::Create, &key.1);
        Ok(created)
    }

    async fn update(&self, namespace: &str, obj: &K) -> Result<K> {
        self.check_writable()?;
        let key = key_of(namespace, obj);
        let version = self.next_version();

        let mut objects = self.objects.lock().unwrap();
        let Some(stored) = objects.get(&key) else {
            return Err(api_error(404, "NotFound"));
        };
        self.check_version(stored, obj)?;

        // Status is a subresource and ignored on the main resource
        let mut value = serde_json::to_value(obj)?;
        if let Some(status) = serde_json::to_value(stored)?.get("status") {
            value["status"] = status.clone();
        } else if let Some(map) = value.as_object_mut() {
            map.remove("status");
        }
        let mut updated: K = serde_json::from_value(value)?;
        updated.meta_mut().resource_version = Some(version);

        let finalized = updated.meta().deletion_timestamp.is_some() && updated.finalizers().is_empty();
        if finalized {
            objects.remove(&key);
        } else {
            objects.insert(key.clone(), updated.clone());
        }
        drop(objects);

        self.record(WriteOp::Update, &key.1);
        Ok(updated)
    }

    async fn update_status(&self, namespace: &str, obj: &K) -> Result<K> {
        self.check_writable()?;
        let key = key_of(namespace, obj);
        let version = self.next_version();

        let mut objects = self.objects.lock().unwrap();
        let Some(stored) = objects.get(&key) else {
            return Err(api_error(404, "NotFound"));
        };
        self.check_version(stored, obj)?;

        let mut value = serde_json::to_value(stored)?;
        value["status"] = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let mut updated: K = serde_json::from_value(value)?;
        updated.meta_mut().resource_version = Some(version);
        objects.insert(key.clone(), updated.clone());
        drop(objects);

        self.record(WriteOp::UpdateStatus, &key.1);
        Ok(updated)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<DeleteStatus> {
        self.check_writable()?;
        let key = (namespace.to_string(), name.to_string());
        let version = self.next_version();

        let mut objects = self.objects.lock().unwrap();
        let Some(stored) = objects.get_mut(&key) else {
            return Ok(DeleteStatus::NotFound);
        };

        let status = if self.graceful_delete.load(Ordering::SeqCst) || !stored.finalizers().is_empty() {
            if stored.meta().deletion_timestamp.is_none() {
                stored.meta_mut().deletion_timestamp = Some(deletion_time());
                stored.meta_mut().resource_version = Some(version);
            }
            DeleteStatus::InProgress
        } else {
            objects.remove(&key);
            DeleteStatus::Deleted
        };
        drop(objects);

        self.record(WriteOp::Delete, name);
        Ok(status)
    }
}
