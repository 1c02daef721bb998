//! Operator configuration read from the environment

use std::time::Duration;

use tracing::warn;

/// Runtime settings for the operator process
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Identity used for leader election
    pub pod_name: String,
    /// Namespace holding the leader election lease
    pub pod_namespace: String,
    /// Only watch this namespace; cluster-wide when `None`
    pub watch_namespace: Option<String>,
    /// Address of the health and metrics server
    pub health_bind_addr: String,
    /// Ceiling on each control-plane API probe
    pub api_probe_timeout: Duration,
    /// Interval between control-plane endpoint checks
    pub endpoint_poll_interval: Duration,
    /// How long to wait for a control-plane endpoint before giving up the pass
    pub endpoint_wait_timeout: Duration,
    /// Read the running k0s version from replicas during in-place updates
    pub live_version_probe: bool,
    /// Requeue interval for a settled fleet
    pub resync_interval: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            pod_name: "unknown".to_string(),
            pod_namespace: "default".to_string(),
            watch_namespace: None,
            health_bind_addr: "0.0.0.0:8080".to_string(),
            api_probe_timeout: Duration::from_secs(10),
            endpoint_poll_interval: Duration::from_secs(1),
            endpoint_wait_timeout: Duration::from_secs(180),
            live_version_probe: false,
            resync_interval: Duration::from_secs(60),
        }
    }
}

impl OperatorConfig {
    /// Build the configuration from environment variables, defaulting what is unset
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let pod_name = lookup("POD_NAME").unwrap_or_else(|| {
            warn!("POD_NAME not set, using hostname");
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or(defaults.pod_name.clone())
        });
        let pod_namespace = lookup("POD_NAMESPACE").unwrap_or_else(|| {
            warn!("POD_NAMESPACE not set, using 'default'");
            defaults.pod_namespace.clone()
        });

        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| match v.parse::<u64>() {
                    Ok(n) if n > 0 => Some(Duration::from_secs(n)),
                    _ => {
                        warn!("Ignoring invalid {}={:?}", key, v);
                        None
                    }
                })
                .unwrap_or(default)
        };

        Self {
            pod_name,
            pod_namespace,
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            health_bind_addr: lookup("HEALTH_BIND_ADDR").unwrap_or(defaults.health_bind_addr),
            api_probe_timeout: secs("API_PROBE_TIMEOUT_SECS", defaults.api_probe_timeout),
            endpoint_poll_interval: defaults.endpoint_poll_interval,
            endpoint_wait_timeout: secs("ENDPOINT_WAIT_TIMEOUT_SECS", defaults.endpoint_wait_timeout),
            live_version_probe: lookup("LIVE_VERSION_PROBE")
                .is_some_and(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True")),
            resync_interval: secs("RESYNC_INTERVAL_SECS", defaults.resync_interval),
        }
    }
}
