//! Network endpoint generation for a Postgres instance
//!
//! A ClusterIP Service per instance exposing the PostgreSQL port and
//! selecting the instance's pods. The name is derived from the instance name.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::Postgres;
use crate::resources::Converge;
use crate::resources::common::{
    POSTGRES_PORT, endpoint_name, merge_labels, owner_reference, selector_labels,
    standard_labels,
};

/// Build the network endpoint for an instance
pub fn build_endpoint(pg: &Postgres) -> Service {
    let instance = pg.name_any();

    Service {
        metadata: ObjectMeta {
            name: Some(endpoint_name(&instance)),
            namespace: pg.namespace(),
            labels: Some(standard_labels(&instance)),
            owner_references: Some(vec![owner_reference(pg)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(&instance)),
            ports: Some(vec![ServicePort {
                port: POSTGRES_PORT,
                target_port: Some(IntOrString::Int(POSTGRES_PORT)),
                name: Some("postgres".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl Converge for Service {
    /// Converge labels, selector, ports and type.
    ///
    /// Cluster IPs and other server-assigned fields are left as they are.
    fn converge(&mut self, desired: &Self) -> bool {
        let mut changed = merge_labels(&mut self.metadata.labels, &desired.metadata.labels);

        let Some(desired_spec) = desired.spec.as_ref() else {
            return changed;
        };
        let live_spec = self.spec.get_or_insert_with(Default::default);

        if live_spec.selector != desired_spec.selector {
            live_spec.selector = desired_spec.selector.clone();
            changed = true;
        }
        if live_spec.ports != desired_spec.ports {
            live_spec.ports = desired_spec.ports.clone();
            changed = true;
        }
        if live_spec.type_ != desired_spec.type_ {
            live_spec.type_ = desired_spec.type_.clone();
            changed = true;
        }

        changed
    }
}
