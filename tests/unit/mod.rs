// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for the k0s control-plane operator
//!
//! This module contains unit tests for:
//! - Version comparison and upgrade skew
//! - Failure-domain placement
//! - Replica status computation from machines and update plans
//! - Remediation decisions and their execution
//! - Status aggregation and conditions
//! - Full reconcile passes against in-memory clusters
//! - Spec validation

#[path = "../common/mod.rs"]
mod common;

mod replica_status;
mod version;
