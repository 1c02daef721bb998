//! Validation of K0sControlPlane specs
//!
//! Checks run at the start of every pass, before anything is read from or
//! written to the clusters.

use crate::controller::error::{Error, Result};
use crate::controller::version;
use crate::crd::K0sControlPlane;

/// Maximum number of control-plane replicas (arbitrary limit for safety)
pub const MAX_REPLICAS: i32 = 15;

/// Validate the control plane spec
pub fn validate_spec(kcp: &K0sControlPlane) -> Result<()> {
    validate_replicas(kcp.spec.replicas)?;
    validate_version(&kcp.spec.version)?;
    validate_failure_domains(&kcp.spec.failure_domains)?;

    let reported = kcp
        .status
        .as_ref()
        .map(|s| s.version.as_str())
        .unwrap_or_default();
    validate_upgrade(reported, &kcp.spec.version)?;
    Ok(())
}

fn validate_replicas(replicas: i32) -> Result<()> {
    if replicas < 0 {
        return Err(Error::ValidationError(format!(
            "replica count {} must not be negative",
            replicas
        )));
    }

    if replicas > MAX_REPLICAS {
        return Err(Error::ValidationError(format!(
            "replica count {} exceeds maximum {}",
            replicas, MAX_REPLICAS
        )));
    }

    Ok(())
}

fn validate_version(desired: &str) -> Result<()> {
    version::normalize(desired).map(|_| ())
}

/// The reported fleet version may move at most one minor forward
fn validate_upgrade(reported: &str, desired: &str) -> Result<()> {
    if reported.is_empty() {
        return Ok(());
    }
    version::check_upgrade_skew(reported, desired)
}

fn validate_failure_domains(domains: &[String]) -> Result<()> {
    if domains.iter().any(|d| d.trim().is_empty()) {
        return Err(Error::ValidationError(
            "failure domain names must not be empty".to_string(),
        ));
    }
    Ok(())
}
