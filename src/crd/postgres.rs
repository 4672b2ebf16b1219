use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Postgres is the Schema for the postgreses API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    group = "postgres.snappcloud.io",
    version = "v1alpha1",
    kind = "Postgres",
    plural = "postgreses",
    shortname = "pg",
    namespaced,
    status = "PostgresStatus",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Storage", "type":"string", "jsonPath":".spec.persistence.size"}"#,
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PostgresSpec {
    /// PostgreSQL version, used as the image tag (e.g. "15", "16")
    pub version: String,

    /// Storage for the data volume
    pub persistence: PersistenceSpec,

    /// Database name and credential reference
    pub auth: AuthSpec,
}

/// Storage configuration for the PostgreSQL data volume
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceSpec {
    /// Size of the persistent volume (e.g. "10Gi")
    pub size: String,

    /// Storage class name (uses the cluster default if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

/// Authentication settings
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    /// Name of the database created on first start
    pub database: String,

    /// Secret in the same namespace holding `username` and `password`
    pub secret_ref: String,
}

/// Status of the Postgres instance
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostgresStatus {
    /// True when every desired workload replica is ready
    #[serde(default)]
    pub ready: bool,
}

impl Postgres {
    /// Whether the last evaluation recorded the instance as ready
    pub fn is_marked_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }

    /// Whether deletion has been requested
    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
