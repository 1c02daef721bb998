//! Autopilot update plan documents
//!
//! An in-place upgrade is requested by posting a single-command plan that
//! updates k0s on every control-plane replica listed as a static target.

use chrono::Utc;
use serde_json::{Value, json};

use crate::controller::error::Result;
use crate::controller::version;
use crate::crd::{PLAN_API_VERSION, PLAN_KIND, PLAN_NAME};
use crate::resources::common::standard_labels;

/// Where k0s release binaries are downloaded from
pub const DOWNLOAD_BASE_URL: &str = "https://get.k0sproject.io";

/// Architectures a plan carries download links for
const ARCHITECTURES: [&str; 3] = ["amd64", "arm64", "arm"];

/// Plan id for upgrading a cluster to a version
///
/// The id only depends on the target, so reposting for the same version is a no-op.
pub fn plan_id(cluster_name: &str, version: &str) -> String {
    format!("id-{}-{}", cluster_name, version)
}

/// Build the plan document that upgrades `targets` from `current` to `desired`
///
/// Fails when the jump is not an allowed upgrade.
pub fn generate_update_plan(
    cluster_name: &str,
    current: &str,
    desired: &str,
    targets: &[String],
) -> Result<Value> {
    if !current.is_empty() {
        version::check_upgrade_skew(current, desired)?;
    }

    let platforms: serde_json::Map<String, Value> = ARCHITECTURES
        .iter()
        .map(|arch| {
            (
                format!("linux-{}", arch),
                json!({ "url": format!("{}/{}/k0s-{}-{}", DOWNLOAD_BASE_URL, desired, desired, arch) }),
            )
        })
        .collect();

    Ok(json!({
        "apiVersion": PLAN_API_VERSION,
        "kind": PLAN_KIND,
        "metadata": {
            "name": PLAN_NAME,
            "labels": standard_labels(cluster_name),
        },
        "spec": {
            "id": plan_id(cluster_name, desired),
            "timestamp": Utc::now().to_rfc3339(),
            "commands": [{
                "k0supdate": {
                    "version": desired,
                    "platforms": platforms,
                    "targets": {
                        "controllers": {
                            "discovery": {
                                "static": { "nodes": targets }
                            }
                        }
                    }
                }
            }]
        }
    }))
}
