use std::fmt;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

#[cfg(test)]
use mockall::automock;

use crate::resources::hive::ClusterDeployment;
use crate::resources::pagerdutyintegrations::PagerDutyIntegration;
use crate::Result;

mod client;

pub use client::PagerDutyClient;

/// A PagerDuty REST API key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// The desired shape of the PagerDuty service for one cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Deterministic per cluster; lookups before creation are keyed on it
    pub name: String,
    pub description: String,
    pub escalation_policy_id: String,
    pub resolve_timeout: Option<u32>,
    pub acknowledge_timeout: Option<u32>,
}

impl ServiceSettings {
    pub fn new(pdi: &PagerDutyIntegration, cd: &ClusterDeployment, cluster_id: &str) -> Self {
        let name = if cd.spec.base_domain.is_empty() {
            format!("{}-{cluster_id}", pdi.spec.service_prefix)
        } else {
            format!(
                "{}-{cluster_id}.{}",
                pdi.spec.service_prefix, cd.spec.base_domain
            )
        };

        Self {
            name,
            description: format!("{cluster_id} - managed by pagerduty-operator"),
            escalation_policy_id: pdi.spec.escalation_policy.clone(),
            // PagerDuty models a disabled timeout as null
            resolve_timeout: Some(pdi.spec.resolve_timeout).filter(|t| *t > 0),
            acknowledge_timeout: Some(pdi.spec.acknowledge_timeout).filter(|t| *t > 0),
        }
    }

    /// Stable digest of the settings, recorded in status to show what was last applied
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0]);
        hasher.update(self.description.as_bytes());
        hasher.update([0]);
        hasher.update(self.escalation_policy_id.as_bytes());
        hasher.update([0]);
        hasher.update(self.resolve_timeout.unwrap_or(0).to_be_bytes());
        hasher.update(self.acknowledge_timeout.unwrap_or(0).to_be_bytes());
        let digest = hasher.finalize();
        digest[..8].iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// A PagerDuty service as observed through the API
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub description: String,
    pub escalation_policy_id: String,
    pub resolve_timeout: Option<u32>,
    pub acknowledge_timeout: Option<u32>,
    /// The Events API v2 integration, if one has been created yet
    pub integration: Option<Integration>,
}

impl Service {
    /// Whether the service already carries the desired settings
    pub fn matches(&self, settings: &ServiceSettings) -> bool {
        self.name == settings.name
            && self.description == settings.description
            && self.escalation_policy_id == settings.escalation_policy_id
            && self.resolve_timeout == settings.resolve_timeout
            && self.acknowledge_timeout == settings.acknowledge_timeout
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Integration {
    pub id: String,
    pub integration_key: String,
}

/// The PagerDuty operations the operator relies on. Implementations do not retry;
/// retries come from the controller requeueing.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PagerDutyApi: Send + Sync {
    /// Fetch a service by id; `None` if PagerDuty no longer knows it
    async fn get_service(&self, api_key: &ApiKey, id: &str) -> Result<Option<Service>>;

    /// Find a service by its exact name
    async fn find_service(&self, api_key: &ApiKey, name: &str) -> Result<Option<Service>>;

    async fn create_service(&self, api_key: &ApiKey, settings: &ServiceSettings)
        -> Result<Service>;

    async fn update_service(
        &self,
        api_key: &ApiKey,
        id: &str,
        settings: &ServiceSettings,
    ) -> Result<Service>;

    /// Delete a service; deleting an unknown service succeeds
    async fn delete_service(&self, api_key: &ApiKey, id: &str) -> Result<()>;

    /// Create the Events API v2 integration whose key is delivered to the cluster
    async fn create_integration(&self, api_key: &ApiKey, service_id: &str)
        -> Result<Integration>;

    /// Cheap authenticated call used to check API health
    async fn check_abilities(&self, api_key: &ApiKey) -> Result<()>;
}
