pub mod children;
pub mod context;
pub mod error;
pub mod finalizer;
pub mod readiness;
pub mod reconciler;
pub mod status;
pub mod store;
pub mod validation;

pub use children::{ChildOutcome, ensure_exists};
pub use context::Context;
pub use error::{BackoffConfig, Error, Result};
pub use finalizer::{CleanupProgress, FINALIZER, LEGACY_FINALIZER, cleanup, has_finalizer};
pub use readiness::{is_ready, readiness_transition};
pub use reconciler::{error_policy, reconcile, reconcile_key};
pub use status::StatusManager;
pub use store::{DeleteStatus, KubeStore, ObjectKey, ObjectStore, StoredObject};
pub use validation::validate_spec;
