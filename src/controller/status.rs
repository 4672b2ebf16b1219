//! Status updates for Postgres resources

use kube::ResourceExt;
use tracing::info;

use crate::controller::Context;
use crate::controller::error::Result;
use crate::crd::{Postgres, PostgresStatus};

/// Status manager for a freshly read Postgres resource
pub struct StatusManager<'a> {
    pg: &'a Postgres,
    ctx: &'a Context,
}

impl<'a> StatusManager<'a> {
    pub fn new(pg: &'a Postgres, ctx: &'a Context) -> Self {
        Self { pg, ctx }
    }

    /// Write `status.ready`, guarded by the resource version that was read
    pub async fn set_ready(&self, ready: bool) -> Result<Postgres> {
        let ns = self.pg.namespace().unwrap_or_default();
        let mut updated = self.pg.clone();
        updated.status = Some(PostgresStatus { ready });

        let stored = self.ctx.postgres.update_status(&ns, &updated).await?;
        info!(name = %self.pg.name_any(), namespace = %ns, ready, "Updated readiness");
        Ok(stored)
    }
}
