//! Controller configuration read from the environment

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::controller::error::{Error, Result};

/// Default interval between readiness polls while the workload is not ready
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Default delay before re-verifying a child that was just created or updated
pub const DEFAULT_CREATE_REQUEUE_SECS: u64 = 1;

/// Default delay before re-checking a workload that is still terminating
pub const DEFAULT_DELETION_RECHECK_SECS: u64 = 5;

/// Default bind address of the health server
pub const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8080";

/// Delays the reconcile engine asks the controller runtime to wait before the next pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequeueIntervals {
    /// Workload exists but is not ready yet
    pub poll: Duration,
    /// A child object was created or corrected in this pass
    pub create: Duration,
    /// Cleanup is waiting for the workload to terminate
    pub deletion_recheck: Duration,
}

impl Default for RequeueIntervals {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            create: Duration::from_secs(DEFAULT_CREATE_REQUEUE_SECS),
            deletion_recheck: Duration::from_secs(DEFAULT_DELETION_RECHECK_SECS),
        }
    }
}

/// Runtime configuration of the controller process
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// Namespace to watch, `None` for cluster-wide
    pub namespace: Option<String>,
    pub requeue: RequeueIntervals,
    pub health_addr: SocketAddr,
}

impl ControllerConfig {
    /// Read the configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, which returns the value of a variable if set
    ///
    /// Recognised variables:
    /// - `WATCH_NAMESPACE`: namespace to watch (empty or unset watches all namespaces)
    /// - `POLL_INTERVAL_SECS`, `CREATE_REQUEUE_SECS`, `DELETION_RECHECK_SECS`
    /// - `HEALTH_ADDR`: bind address of the health and metrics server
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let namespace = lookup("WATCH_NAMESPACE")
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty());

        let requeue = RequeueIntervals {
            poll: secs(&lookup, "POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?,
            create: secs(&lookup, "CREATE_REQUEUE_SECS", DEFAULT_CREATE_REQUEUE_SECS)?,
            deletion_recheck: secs(
                &lookup,
                "DELETION_RECHECK_SECS",
                DEFAULT_DELETION_RECHECK_SECS,
            )?,
        };

        let health_addr = parse(
            "HEALTH_ADDR",
            &lookup("HEALTH_ADDR").unwrap_or_else(|| DEFAULT_HEALTH_ADDR.to_string()),
        )?;

        Ok(Self {
            namespace,
            requeue,
            health_addr,
        })
    }
}

fn secs<F>(lookup: &F, key: &str, default: u64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let value = match lookup(key) {
        Some(raw) => parse::<u64>(key, &raw)?,
        None => default,
    };
    if value == 0 {
        return Err(Error::InvalidConfig(format!("{key} must be greater than zero")));
    }
    Ok(Duration::from_secs(value))
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{key} has invalid value {raw:?}")))
}
