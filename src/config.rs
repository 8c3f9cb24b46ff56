//! Process-wide configuration, resolved once at start-up and passed explicitly
//! to everything that needs it.

use std::time::Duration;

use url::Url;

pub const OPERATOR_NAME: &str = "pagerduty-operator";
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "pagerduty-operator";

/// The well-known secret holding the operator's PagerDuty API key
pub const PAGERDUTY_API_SECRET_NAME: &str = "pagerduty-api-key";
pub const PAGERDUTY_API_SECRET_KEY: &str = "PAGERDUTY_API_KEY";

pub const DEFAULT_PAGERDUTY_API_URL: &str = "https://api.pagerduty.com";

/// How cluster identities are derived.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeploymentMode {
    #[default]
    Standard,
    /// Restricted environments, where the ClusterDeployment namespace carries the real cluster id
    Fedramp,
}

impl DeploymentMode {
    pub fn from_fedramp_flag(fedramp: bool) -> Self {
        if fedramp {
            DeploymentMode::Fedramp
        } else {
            DeploymentMode::Standard
        }
    }

    pub fn is_fedramp(&self) -> bool {
        matches!(self, DeploymentMode::Fedramp)
    }
}

#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Namespace the operator runs in; home of the API key secret and the leader lease
    pub operator_namespace: String,
    pub deployment_mode: DeploymentMode,
    pub pagerduty_api_url: Url,
    pub heartbeat_interval: Duration,
    /// Deadline for a single reconcile attempt
    pub reconcile_timeout: Duration,
    /// Upper bound on concurrently running reconciles
    pub concurrency: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            operator_namespace: DEFAULT_OPERATOR_NAMESPACE.into(),
            deployment_mode: DeploymentMode::Standard,
            pagerduty_api_url: Url::parse(DEFAULT_PAGERDUTY_API_URL)
                .expect("default PagerDuty url to be valid"),
            heartbeat_interval: Duration::from_secs(5 * 60),
            reconcile_timeout: Duration::from_secs(60),
            concurrency: 4,
        }
    }
}

/// Parses boolean flags the way operators tend to write them in env vars:
/// `1`, `t`, `true` and `0`, `f`, `false` in any case.
pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Ok(true),
        "0" | "f" | "false" => Ok(false),
        other => Err(format!("invalid boolean value '{other}'")),
    }
}

/// Parses durations given as whole seconds
pub fn parse_seconds(value: &str) -> Result<Duration, String> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| format!("invalid number of seconds '{value}': {e}"))
}
