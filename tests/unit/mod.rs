// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for the postgres controller
//!
//! The reconcile engine runs against in-memory stores, so every test here
//! observes the exact writes a pass issues without a cluster.

#[path = "../common/mod.rs"]
mod common;

mod children;
