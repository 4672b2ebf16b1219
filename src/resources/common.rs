//! Common utilities for child object generation
//!
//! Names, labels and owner references shared by the workload and endpoint
//! builders. Every value is built fresh per call.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::crd::Postgres;

/// API version for the Postgres CRD
pub const API_VERSION: &str = "postgres.snappcloud.io/v1alpha1";

/// Kind for the Postgres CRD
pub const KIND: &str = "Postgres";

/// Field manager name used for writes
pub const FIELD_MANAGER: &str = "postgres-controller";

/// Label carrying the owning instance name
pub const INSTANCE_LABEL: &str = "postgres.snappcloud.io/instance";

/// PostgreSQL listen port
pub const POSTGRES_PORT: i32 = 5432;

/// Name of the network endpoint for an instance
///
/// Derived from the instance name so that several instances in one namespace
/// never share an endpoint.
pub fn endpoint_name(instance: &str) -> String {
    format!("{instance}-postgres")
}

/// Generate an owner reference for a Postgres instance
///
/// Child objects are garbage collected with the instance if the finalizer
/// cleanup ever gets bypassed.
pub fn owner_reference(pg: &Postgres) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: pg.name_any(),
        uid: pg.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Whether `child` is controlled by `pg`
pub fn is_owned_by<K: Resource>(child: &K, pg: &Postgres) -> bool {
    let Some(uid) = pg.metadata.uid.as_deref() else {
        return false;
    };
    child
        .meta()
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.uid == uid && r.controller == Some(true)))
}

/// Labels used to select the pods of an instance
pub fn selector_labels(instance: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), "postgres".to_string()),
        (
            "app.kubernetes.io/instance".to_string(),
            instance.to_string(),
        ),
        (INSTANCE_LABEL.to_string(), instance.to_string()),
    ])
}

/// Labels applied to every object belonging to an instance
pub fn standard_labels(instance: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(instance);
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        "database".to_string(),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        FIELD_MANAGER.to_string(),
    );
    labels
}

/// Copy `desired` labels onto `live`, leaving labels set by others alone
///
/// Returns true when `live` changed.
pub fn merge_labels(
    live: &mut Option<BTreeMap<String, String>>,
    desired: &Option<BTreeMap<String, String>>,
) -> bool {
    let Some(desired) = desired else {
        return false;
    };
    let live = live.get_or_insert_with(BTreeMap::new);
    let mut changed = false;
    for (key, value) in desired {
        if live.get(key) != Some(value) {
            live.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}
