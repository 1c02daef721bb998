//! Error types for the K0sControlPlane controller

use std::time::Duration;

use thiserror::Error;

/// Error variants are named with the `Error` suffix where they wrap another
/// error (e.g., `KubeError`), and after the condition they report otherwise.
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Version skew not allowed: {from} -> {to}")]
    VersionSkew { from: String, to: String },

    #[error("Unsupported update plan shape: {0}")]
    UnsupportedPlanShape(String),

    #[error("Unsupported update plan state: {0}")]
    UnsupportedPlanState(String),

    #[error("Upgrade not completed yet")]
    UpgradeNotCompleted,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Control plane API unreachable: {0}")]
    ApiUnreachable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Failed to execute command on replica: {0}")]
    ExecFailed(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Transient error (will retry): {0}")]
    TransientError(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Check if this error indicates a resource was not found
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::KubeError(e) => matches!(e, kube::Error::Api(api_err) if api_err.code == 404),
            _ => false,
        }
    }

    /// Errors that leave the status untouched and describe an invariant violation
    ///
    /// They are still retried, in case the plan or spec gets corrected.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Error::InvalidVersion(_)
                | Error::VersionSkew { .. }
                | Error::UnsupportedPlanShape(_)
                | Error::UnsupportedPlanState(_)
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors (except 409 Conflict, 429 TooManyRequests) are usually not retryable
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429;
                    }
                    true
                }
                _ => true,
            },
            // "Come back later" signal, not a failure
            Error::UpgradeNotCompleted => true,
            Error::ApiUnreachable(_) => true,
            Error::Timeout(_) => true,
            Error::ExecFailed(_) => true,
            Error::TransientError(_) => true,
            Error::NotFound(_) => true,
            Error::Cancelled => true,
            // The plan object may be corrected externally, so these requeue
            // with the long delay rather than not at all
            Error::UnsupportedPlanShape(_) => false,
            Error::UnsupportedPlanState(_) => false,
            Error::InvalidVersion(_) => false,
            Error::VersionSkew { .. } => false,
            Error::ValidationError(_) => false,
            Error::SerializationError(_) => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
    /// Fixed delay while an upgrade converges
    pub convergence_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300), // 5 minutes
            multiplier: 2.0,
            jitter: 0.1,
            convergence_delay: Duration::from_secs(10),
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Get the delay for an error, with different handling for retryable vs non-retryable
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if matches!(error, Error::UpgradeNotCompleted) {
            self.convergence_delay
        } else if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            // Non-retryable errors wait for manual intervention or an external fix
            self.max_delay
        }
    }
}
