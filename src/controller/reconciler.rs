//! Reconciliation logic for Postgres resources
//!
//! One pass converges a single resource one step: finalizer first, then the
//! workload, then the endpoint, then readiness. Every pass starts from a fresh
//! read and recomputes everything from live objects, so repeated or
//! redelivered passes are harmless.

use std::sync::Arc;
use std::time::Instant;

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::children::{ChildOutcome, ensure_exists};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::finalizer::{
    CleanupProgress, add_finalizer, cleanup, has_finalizer, needs_finalizer, remove_finalizer,
};
use crate::controller::readiness::{is_ready, readiness_transition};
use crate::controller::status::StatusManager;
use crate::controller::store::ObjectKey;
use crate::controller::validation::validate_spec;
use crate::crd::Postgres;
use crate::resources::{build_endpoint, build_workload};

/// Entry point for the controller runtime
///
/// The cached object only supplies the key; the pass itself works on a
/// fresh read.
#[instrument(skip(pg, ctx), fields(name = %pg.name_any(), namespace = pg.namespace().unwrap_or_default()))]
pub async fn reconcile(pg: Arc<Postgres>, ctx: Arc<Context>) -> Result<Action> {
    let key = ObjectKey::from_resource(pg.as_ref())?;
    let started = Instant::now();

    let pass = run_pass(&key, &ctx).await;

    if let Some(health) = &ctx.health_state {
        health.metrics.record_reconcile(
            &key.namespace,
            &key.name,
            started.elapsed().as_secs_f64(),
        );
        match &pass {
            Err(_) => health.metrics.record_error(&key.namespace, &key.name),
            Ok(Pass::Released) => health.metrics.forget_instance(&key.namespace, &key.name),
            Ok(Pass::Active(_)) => {}
        }
    }

    let result = pass.map(Pass::into_action);

    match &result {
        Ok(action) => {
            ctx.reset_errors(&key);
            debug!(?action, "Reconciliation completed");
        }
        Err(e) => error!("Reconciliation failed: {}", e),
    }
    result
}

/// Error policy for the controller with exponential backoff per resource
pub fn error_policy(pg: Arc<Postgres>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = pg.name_any();
    let key = ObjectKey::new(pg.namespace().unwrap_or_default(), name.clone());
    let attempt = ctx.record_error(&key);
    let delay = ctx.backoff.delay_for_error(error, attempt);

    if error.is_retryable() {
        warn!(
            "Retryable error for {}: {}, requeuing in {:?} (attempt {})",
            name,
            error,
            delay,
            attempt + 1
        );
    } else {
        error!(
            "Non-retryable error for {}: {}, requeuing in {:?} for manual intervention",
            name, error, delay
        );
    }

    Action::requeue(delay)
}

/// How a pass left the instance
enum Pass {
    /// Still managed; the runtime should follow the action
    Active(Action),
    /// Gone, or our marker was just removed
    Released,
}

impl Pass {
    fn into_action(self) -> Action {
        match self {
            Pass::Active(action) => action,
            Pass::Released => Action::await_change(),
        }
    }
}

/// Run one reconcile pass for the resource identified by `key`
pub async fn reconcile_key(key: &ObjectKey, ctx: &Context) -> Result<Action> {
    run_pass(key, ctx).await.map(Pass::into_action)
}

async fn run_pass(key: &ObjectKey, ctx: &Context) -> Result<Pass> {
    let Some(pg) = ctx.postgres.get(&key.namespace, &key.name).await? else {
        debug!(%key, "Postgres no longer exists, nothing to do");
        return Ok(Pass::Released);
    };

    if pg.is_terminating() {
        return handle_deletion(&pg, ctx).await;
    }

    reconcile_active(key, &pg, ctx).await.map(Pass::Active)
}

async fn reconcile_active(key: &ObjectKey, pg: &Postgres, ctx: &Context) -> Result<Action> {
    if needs_finalizer(pg) {
        ctx.ensure_not_cancelled()?;
        add_finalizer(ctx.postgres.as_ref(), pg).await?;
        // Children are handled by the pass triggered by this write
        return Ok(Action::requeue(ctx.requeue.create));
    }

    validate_spec(pg)?;

    let secret_ref = pg.spec.auth.secret_ref.as_str();
    if ctx.secrets.get(&key.namespace, secret_ref).await?.is_none() {
        warn!(secret = %secret_ref, "Referenced credential secret not found");
        return Err(Error::MissingCredential(format!(
            "{}/{}",
            key.namespace, secret_ref
        )));
    }

    ctx.ensure_not_cancelled()?;
    let workload = match ensure_exists(
        ctx.statefulsets.as_ref(),
        pg,
        build_workload(pg, secret_ref),
    )
    .await?
    {
        ChildOutcome::Unchanged(workload) => workload,
        outcome => return Ok(requeue_for(&outcome, ctx)),
    };

    ctx.ensure_not_cancelled()?;
    let endpoint = ensure_exists(ctx.services.as_ref(), pg, build_endpoint(pg)).await?;
    if !matches!(endpoint, ChildOutcome::Unchanged(_)) {
        return Ok(requeue_for(&endpoint, ctx));
    }

    let ready = is_ready(&workload);
    if let Some(health) = &ctx.health_state {
        health
            .metrics
            .set_instance_ready(&key.namespace, &key.name, ready);
    }

    if let Some(new_ready) = readiness_transition(pg.is_marked_ready(), ready) {
        ctx.ensure_not_cancelled()?;
        StatusManager::new(pg, ctx).set_ready(new_ready).await?;
        if new_ready {
            info!(%key, "Postgres is ready");
        }
    }

    if ready {
        Ok(Action::await_change())
    } else {
        debug!(%key, "Workload not ready yet");
        Ok(Action::requeue(ctx.requeue.poll))
    }
}

fn requeue_for<K>(outcome: &ChildOutcome<K>, ctx: &Context) -> Action {
    match outcome {
        ChildOutcome::Terminating => Action::requeue(ctx.requeue.deletion_recheck),
        _ => Action::requeue(ctx.requeue.create),
    }
}

/// Handle deletion of a Postgres resource
///
/// Only child cleanup and marker removal happen here; status is not touched
/// once deletion was requested.
async fn handle_deletion(pg: &Postgres, ctx: &Context) -> Result<Pass> {
    let name = pg.name_any();

    if !has_finalizer(pg) {
        debug!("Deletion of {} not gated by our finalizer", name);
        return Ok(Pass::Released);
    }

    info!("Handling deletion of {}", name);
    match cleanup(ctx, pg).await? {
        CleanupProgress::Pending => Ok(Pass::Active(Action::requeue(
            ctx.requeue.deletion_recheck,
        ))),
        CleanupProgress::Complete => {
            ctx.ensure_not_cancelled()?;
            remove_finalizer(ctx.postgres.as_ref(), pg).await?;
            Ok(Pass::Released)
        }
    }
}
