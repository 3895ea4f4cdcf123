//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.

use std::time::Duration;
use thiserror::Error;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error (upstream or downstream)
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Validation error in resource spec
    #[error("Validation error: {0}")]
    Validation(String),

    /// Downstream cluster cannot be reached yet
    #[error("Downstream cluster not ready: {0}")]
    DownstreamNotReady(String),

    /// Downstream kubeconfig could not be loaded
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// Setting value could not be parsed
    #[error(transparent)]
    Settings(#[from] crate::settings::SettingsError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error should be retried.
    ///
    /// Optimistic-concurrency conflicts (409), rate limiting (429),
    /// unauthorized responses (401) and server errors are all transient:
    /// the workqueue retries them with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                matches!(
                    e,
                    kube::Error::Api(api_err)
                        if api_err.code >= 500
                            || api_err.code == 429
                            || api_err.code == 409
                            || api_err.code == 401
                ) || matches!(e, kube::Error::Service(_))
                    || matches!(e, kube::Error::HyperError(_))
            }
            Error::DownstreamNotReady(_) => true,
            Error::MissingField(_)
            | Error::Validation(_)
            | Error::Kubeconfig(_)
            | Error::Settings(_)
            | Error::Serialization(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            Duration::from_secs(30)
        } else {
            // Config errors need operator intervention; check back rarely
            Duration::from_secs(3600)
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
