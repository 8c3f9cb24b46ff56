//! The per-cluster ConfigMap is the operator's durable record of which PagerDuty service it
//! provisioned. It is written after every successful provisioning and removed last on cleanup.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;

use super::{object_meta, CONFIG_MAP_SUFFIX};
use crate::pagerduty::{Integration, Service, ServiceSettings};
use crate::resources::pagerdutyintegrations::PagerDutyIntegration;

pub const SERVICE_ID_KEY: &str = "SERVICE_ID";
pub const INTEGRATION_ID_KEY: &str = "INTEGRATION_ID";
pub const ESCALATION_POLICY_ID_KEY: &str = "ESCALATION_POLICY_ID";
pub const CLUSTER_ID_KEY: &str = "CLUSTER_ID";
pub const RESOLVE_TIMEOUT_KEY: &str = "RESOLVE_TIMEOUT";
pub const ACKNOWLEDGE_TIMEOUT_KEY: &str = "ACKNOWLEDGE_TIMEOUT";
pub const SERVICE_NAME_KEY: &str = "SERVICE_NAME";

pub fn config_map(
    pdi: &PagerDutyIntegration,
    cluster_id: &str,
    settings: &ServiceSettings,
    service: &Service,
    integration: &Integration,
) -> ConfigMap {
    let timeout = |t: Option<u32>| t.unwrap_or(0).to_string();

    ConfigMap {
        metadata: object_meta(pdi, CONFIG_MAP_SUFFIX),
        data: Some(BTreeMap::from_iter([
            (SERVICE_ID_KEY.into(), service.id.clone()),
            (INTEGRATION_ID_KEY.into(), integration.id.clone()),
            (
                ESCALATION_POLICY_ID_KEY.into(),
                settings.escalation_policy_id.clone(),
            ),
            (CLUSTER_ID_KEY.into(), cluster_id.into()),
            (RESOLVE_TIMEOUT_KEY.into(), timeout(settings.resolve_timeout)),
            (
                ACKNOWLEDGE_TIMEOUT_KEY.into(),
                timeout(settings.acknowledge_timeout),
            ),
            (SERVICE_NAME_KEY.into(), settings.name.clone()),
        ])),
        ..Default::default()
    }
}

/// The service id recorded by an earlier reconcile, if any
pub fn recorded_service_id(config_map: &ConfigMap) -> Option<String> {
    config_map
        .data
        .as_ref()?
        .get(SERVICE_ID_KEY)
        .filter(|id| !id.is_empty())
        .cloned()
}
