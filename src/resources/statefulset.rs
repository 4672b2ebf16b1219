//! Workload generation for a Postgres instance
//!
//! One single-replica StatefulSet per instance, named like the instance, with
//! a single volume claim template for the data directory. Credentials are
//! projected from the referenced Secret, so rotating them never requires a
//! new workload.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ExecAction, Lifecycle, LifecycleHandler,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec,
    SecretKeySelector, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use tracing::warn;

use crate::crd::Postgres;
use crate::resources::Converge;
use crate::resources::common::{
    POSTGRES_PORT, endpoint_name, merge_labels, owner_reference, selector_labels,
    standard_labels,
};

/// Desired replica count of every workload
pub const REPLICAS: i32 = 1;

/// Name of the database container
pub const CONTAINER_NAME: &str = "postgresql";

/// Name of the data volume claim template
pub const DATA_VOLUME: &str = "data";

/// Mount path of the data volume
pub const DATA_MOUNT_PATH: &str = "/var/lib/postgresql/data";

/// Keys expected in the credential Secret
pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";

/// Switch client authentication from trust to md5 once the data directory exists
const HBA_MD5_COMMAND: &str = "sed -i 's/trust/md5/g' /var/lib/postgresql/data/pg_hba.conf && echo 'host all all all md5' >> /var/lib/postgresql/data/pg_hba.conf";

/// Container image for a PostgreSQL version
pub fn image_for_version(version: &str) -> String {
    format!("postgres:{version}")
}

fn secret_env(name: &str, credential_ref: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: credential_ref.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn postgres_container(pg: &Postgres, credential_ref: &str) -> Container {
    Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(image_for_version(&pg.spec.version)),
        ports: Some(vec![ContainerPort {
            container_port: POSTGRES_PORT,
            name: Some("postgres".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(vec![
            EnvVar {
                name: "POSTGRES_DB".to_string(),
                value: Some(pg.spec.auth.database.clone()),
                ..Default::default()
            },
            secret_env("POSTGRES_USER", credential_ref, USERNAME_KEY),
            secret_env("POSTGRES_PASSWORD", credential_ref, PASSWORD_KEY),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: DATA_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        lifecycle: Some(Lifecycle {
            post_start: Some(LifecycleHandler {
                exec: Some(ExecAction {
                    command: Some(vec![
                        "/bin/sh".to_string(),
                        "-c".to_string(),
                        HBA_MD5_COMMAND.to_string(),
                    ]),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn data_claim_template(pg: &Postgres) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATA_VOLUME.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: pg.spec.persistence.storage_class.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(pg.spec.persistence.size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the workload for an instance
///
/// `credential_ref` names the Secret whose `username` and `password` entries
/// are referenced from the container environment.
pub fn build_workload(pg: &Postgres, credential_ref: &str) -> StatefulSet {
    let name = pg.name_any();

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: pg.namespace(),
            labels: Some(standard_labels(&name)),
            owner_references: Some(vec![owner_reference(pg)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            service_name: Some(endpoint_name(&name)),
            replicas: Some(REPLICAS),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(standard_labels(&name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![postgres_container(pg, credential_ref)],
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![data_claim_template(pg)]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn requested_storage(sts: &StatefulSetSpec) -> Option<&Quantity> {
    sts.volume_claim_templates
        .as_ref()?
        .iter()
        .find(|t| t.metadata.name.as_deref() == Some(DATA_VOLUME))?
        .spec
        .as_ref()?
        .resources
        .as_ref()?
        .requests
        .as_ref()?
        .get("storage")
}

fn converge_container(live: &mut Container, desired: &Container) -> bool {
    let mut changed = false;
    if live.image != desired.image {
        live.image = desired.image.clone();
        changed = true;
    }
    if live.env != desired.env {
        live.env = desired.env.clone();
        changed = true;
    }
    if live.ports != desired.ports {
        live.ports = desired.ports.clone();
        changed = true;
    }
    if live.lifecycle != desired.lifecycle {
        live.lifecycle = desired.lifecycle.clone();
        changed = true;
    }
    changed
}

impl Converge for StatefulSet {
    /// Converge replicas, labels and the database container.
    ///
    /// Selector, service name and claim templates are immutable on a
    /// StatefulSet and are never written back.
    fn converge(&mut self, desired: &Self) -> bool {
        let mut changed = merge_labels(&mut self.metadata.labels, &desired.metadata.labels);

        let Some(desired_spec) = desired.spec.as_ref() else {
            return changed;
        };
        let live_spec = self.spec.get_or_insert_with(Default::default);

        if live_spec.replicas != desired_spec.replicas {
            live_spec.replicas = desired_spec.replicas;
            changed = true;
        }

        let desired_template_labels = desired_spec
            .template
            .metadata
            .as_ref()
            .and_then(|m| m.labels.clone());
        let live_template_meta = live_spec
            .template
            .metadata
            .get_or_insert_with(Default::default);
        changed |= merge_labels(&mut live_template_meta.labels, &desired_template_labels);

        if let Some(desired_pod) = desired_spec.template.spec.as_ref() {
            let live_pod = live_spec.template.spec.get_or_insert_with(Default::default);
            for desired_container in &desired_pod.containers {
                match live_pod
                    .containers
                    .iter_mut()
                    .find(|c| c.name == desired_container.name)
                {
                    Some(live_container) => {
                        changed |= converge_container(live_container, desired_container);
                    }
                    None => {
                        live_pod.containers.push(desired_container.clone());
                        changed = true;
                    }
                }
            }
        }

        if requested_storage(live_spec) != requested_storage(desired_spec) {
            warn!(
                workload = %self.name_any(),
                "Requested storage differs from the live claim template; claim templates are immutable and the change is not applied"
            );
        }

        changed
    }
}
