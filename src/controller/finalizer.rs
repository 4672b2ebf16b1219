//! Finalizer protocol for Postgres instances
//!
//! The marker is attached on first sight and gates removal of the record
//! until the owned children were deleted explicitly and in order: workload
//! first, endpoint once the workload is gone. Owner references stay in place
//! as the garbage-collection backstop.

use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::controller::store::{DeleteStatus, ObjectStore, StoredObject};
use crate::crd::Postgres;
use crate::resources::common::{endpoint_name, is_owned_by};

/// Finalizer marker owned by this controller
pub const FINALIZER: &str = "postgres.snappcloud.io/finalizer";

/// Marker set on records by earlier releases of the operator
///
/// Honoured during deletion and stripped together with [`FINALIZER`], never added.
pub const LEGACY_FINALIZER: &str = "postgres.finalizer";

/// Progress of a cleanup pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanupProgress {
    /// Both children are absent or terminating; the marker may be removed
    Complete,
    /// The workload is still terminating; check again later
    Pending,
}

/// State of one child after a delete attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChildDeletion {
    Gone,
    Terminating,
}

fn is_ours(finalizer: &str) -> bool {
    finalizer == FINALIZER || finalizer == LEGACY_FINALIZER
}

/// Check if the finalizer, or its legacy alias, is present
pub fn has_finalizer(pg: &Postgres) -> bool {
    pg.finalizers().iter().any(|f| is_ours(f))
}

/// Whether a live record still lacks the current marker
///
/// Records carrying only the legacy alias get the current marker added too.
pub fn needs_finalizer(pg: &Postgres) -> bool {
    !pg.finalizers().iter().any(|f| f == FINALIZER)
}

/// Add the finalizer, writing against the version that was read
pub async fn add_finalizer(store: &dyn ObjectStore<Postgres>, pg: &Postgres) -> Result<Postgres> {
    let ns = pg.namespace().unwrap_or_default();
    let mut updated = pg.clone();
    updated.finalizers_mut().push(FINALIZER.to_string());

    let stored = store.update(&ns, &updated).await?;
    info!(name = %pg.name_any(), namespace = %ns, "Added finalizer");
    Ok(stored)
}

/// Remove the finalizer and its legacy alias, keeping markers owned by others
pub async fn remove_finalizer(
    store: &dyn ObjectStore<Postgres>,
    pg: &Postgres,
) -> Result<Postgres> {
    let ns = pg.namespace().unwrap_or_default();
    let mut updated = pg.clone();
    updated.finalizers_mut().retain(|f| !is_ours(f));

    let stored = store.update(&ns, &updated).await?;
    info!(name = %pg.name_any(), namespace = %ns, "Removed finalizer");
    Ok(stored)
}

/// Delete the children of a terminating instance
///
/// The endpoint is only deleted once the workload no longer exists, so pods
/// stay reachable until they are gone. No pass ever waits in-process.
pub async fn cleanup(ctx: &Context, pg: &Postgres) -> Result<CleanupProgress> {
    let ns = pg.namespace().unwrap_or_default();
    let name = pg.name_any();
    info!(name = %name, namespace = %ns, "Finalizer cleanup started");

    match delete_child(ctx.statefulsets.as_ref(), pg, &ns, &name).await? {
        ChildDeletion::Terminating => {
            debug!(name = %name, "Workload still terminating, endpoint kept for now");
            return Ok(CleanupProgress::Pending);
        }
        ChildDeletion::Gone => {}
    }

    ctx.ensure_not_cancelled()?;
    // Terminating is as good as gone for the endpoint
    delete_child(ctx.services.as_ref(), pg, &ns, &endpoint_name(&name)).await?;

    info!(name = %name, namespace = %ns, "Finalizer cleanup complete");
    Ok(CleanupProgress::Complete)
}

async fn delete_child<K: StoredObject>(
    store: &dyn ObjectStore<K>,
    owner: &Postgres,
    ns: &str,
    name: &str,
) -> Result<ChildDeletion> {
    let kind = K::kind(&());
    let Some(live) = store.get(ns, name).await? else {
        return Ok(ChildDeletion::Gone);
    };

    if !is_owned_by(&live, owner) {
        warn!(kind = %kind, namespace = %ns, name = %name, "Not controlled by this instance, leaving it in place");
        return Ok(ChildDeletion::Gone);
    }

    if live.meta().deletion_timestamp.is_some() {
        return Ok(ChildDeletion::Terminating);
    }

    let status = store.delete(ns, name).await?;
    info!(kind = %kind, namespace = %ns, name = %name, ?status, "Deleted child object");
    Ok(match status {
        DeleteStatus::Deleted | DeleteStatus::NotFound => ChildDeletion::Gone,
        DeleteStatus::InProgress => ChildDeletion::Terminating,
    })
}
