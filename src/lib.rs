use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Write conflict on {0}; the object changed since it was read")]
    Conflict(String),

    #[error("{name} already belongs to PagerDutyIntegration {owner}")]
    DependentConflict { name: String, owner: String },

    #[error("The ClusterDeployment {namespace}/{name} does not exist")]
    ClusterDeploymentNotFound { namespace: String, name: String },

    #[error("The Secret {0} does not exist")]
    SecretNotFound(String),
    #[error("The Secret key {0} in {1} does not exist")]
    SecretKeyNotFound(String, String),

    #[error("The PagerDuty API key is not valid UTF-8")]
    InvalidApiKey,

    #[error("Failed to make PagerDuty API call: {0}")]
    PagerDutyRequest(#[source] reqwest::Error),

    #[error("PagerDuty API returned {status}: {message}")]
    PagerDutyApi { status: u16, message: String },

    #[error("PagerDuty rejected the API key")]
    PagerDutyAuth,

    #[error("Not ready: {message}")]
    NotReady {
        message: String,
        reason: String,
        requeue_after: Option<Duration>,
    },

    #[error("Reconcile did not finish within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::SerializationError(_) => "SerializationError",
            Error::KubeError(_) => "KubeError",
            Error::Conflict(_) => "Conflict",
            Error::DependentConflict { .. } => "DependentConflict",
            Error::ClusterDeploymentNotFound { .. } => "ClusterDeploymentNotFound",
            Error::SecretNotFound(_) => "SecretNotFound",
            Error::SecretKeyNotFound(_, _) => "SecretKeyNotFound",
            Error::InvalidApiKey => "InvalidApiKey",
            Error::PagerDutyRequest(_) => "PagerDutyRequest",
            Error::PagerDutyApi { .. } => "PagerDutyApi",
            Error::PagerDutyAuth => "PagerDutyAuth",
            Error::NotReady { .. } => "NotReady",
            Error::Timeout(_) => "Timeout",
            Error::InvalidUrl(_) => "InvalidUrl",
        }
    }

    /// Optimistic write collisions; worth retrying straight away against a fresh read
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::KubeError(kube::Error::Api(err)) => err.code == 409,
            _ => false,
        }
    }
}

pub mod config;

pub mod controllers;
pub use controllers::State;

/// PagerDuty REST client
pub mod pagerduty;

/// Periodic PagerDuty liveness check
pub mod heartbeat;

/// Lease based leader election
pub mod leader_election;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;

pub use metrics::{HeartbeatMetrics, HeartbeatOutcome, Metrics};

/// CRDs, both ours and Hive's
pub mod resources;

/// Finalizer, cleanup and cluster identity helpers
pub mod utils;

pub use controllers::pagerdutyintegration::run;
