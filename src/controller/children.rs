//! Get-or-create (and converge) logic for child objects
//!
//! Safe to call on every pass: an existing child is left alone unless the
//! fields this controller owns drifted from the desired state, and losing a
//! create race to another pass counts as finding the object.

use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::error::{Error, Result};
use crate::controller::store::{ObjectStore, StoredObject};
use crate::crd::Postgres;
use crate::resources::Converge;
use crate::resources::common::is_owned_by;

/// Result of ensuring one child object
#[derive(Clone, Debug, PartialEq)]
pub enum ChildOutcome<K> {
    /// The child was missing and has just been created, by this pass or a racing one
    Created,
    /// The child existed but drifted and was written back
    Updated,
    /// The child is being deleted by someone else; it is recreated once gone
    Terminating,
    /// The child matches the desired state
    Unchanged(K),
}

/// Make sure `desired` exists in the store and carries the fields this controller owns.
///
/// Fails with [`Error::ValidationError`] when an object of the same name
/// exists but is controlled by something else.
pub async fn ensure_exists<K>(
    store: &dyn ObjectStore<K>,
    owner: &Postgres,
    desired: K,
) -> Result<ChildOutcome<K>>
where
    K: StoredObject + Converge,
{
    let ns = desired.namespace().unwrap_or_default();
    let name = desired.name_any();
    let kind = K::kind(&());

    let live = match store.get(&ns, &name).await? {
        Some(live) => live,
        None => match store.create(&ns, &desired).await {
            Ok(_) => {
                info!(kind = %kind, namespace = %ns, name = %name, "Created child object");
                return Ok(ChildOutcome::Created);
            }
            Err(Error::AlreadyExists(_)) => {
                debug!(kind = %kind, name = %name, "Child created concurrently, re-reading");
                match store.get(&ns, &name).await? {
                    Some(live) => live,
                    // Gone again already; verify on the next pass
                    None => return Ok(ChildOutcome::Created),
                }
            }
            Err(e) => return Err(e),
        },
    };

    if !is_owned_by(&live, owner) {
        return Err(Error::ValidationError(format!(
            "{kind} {ns}/{name} exists and is not controlled by Postgres {}",
            owner.name_any()
        )));
    }

    if live.meta().deletion_timestamp.is_some() {
        debug!(kind = %kind, name = %name, "Child is terminating");
        return Ok(ChildOutcome::Terminating);
    }

    let mut converged = live.clone();
    if converged.converge(&desired) {
        store.update(&ns, &converged).await?;
        info!(kind = %kind, namespace = %ns, name = %name, "Corrected drift on child object");
        return Ok(ChildOutcome::Updated);
    }

    Ok(ChildOutcome::Unchanged(live))
}
