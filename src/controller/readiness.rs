//! Readiness evaluation for Postgres instances

use k8s_openapi::api::apps::v1::StatefulSet;

/// Whether every desired replica of the workload reports ready.
///
/// Desired replicas default to 1 and ready replicas to 0, as the API server
/// does when the fields are unset.
pub fn is_ready(workload: &StatefulSet) -> bool {
    let desired = workload.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = workload
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    ready == desired
}

/// The `status.ready` value to write, if it differs from what is recorded
pub fn readiness_transition(recorded: bool, observed: bool) -> Option<bool> {
    (recorded != observed).then_some(observed)
}
