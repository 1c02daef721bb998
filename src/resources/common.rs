//! Common metadata for objects the operator creates

use std::collections::BTreeMap;

/// Operator name as recorded in `app.kubernetes.io/managed-by`
pub const MANAGED_BY: &str = "k0s-controlplane-operator";

/// Standard labels for objects created on behalf of a control plane
pub fn standard_labels(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "app.kubernetes.io/managed-by".to_string(),
            MANAGED_BY.to_string(),
        ),
        (
            "app.kubernetes.io/component".to_string(),
            "control-plane".to_string(),
        ),
        (
            crate::crd::CLUSTER_NAME_LABEL.to_string(),
            cluster_name.to_string(),
        ),
    ])
}
