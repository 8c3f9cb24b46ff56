use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::config::OPERATOR_NAME;
use crate::resources::pagerdutyintegrations::PagerDutyIntegration;

pub mod configmap;
pub mod secret;
pub mod syncset;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const OWNED_BY_LABEL: &str = "pagerduty.openshift.io/owned-by";
pub const OWNED_BY_NAMESPACE_LABEL: &str = "pagerduty.openshift.io/owned-by-namespace";

pub const CONFIG_MAP_SUFFIX: &str = "-pd-config";
pub const SECRET_SUFFIX: &str = "-pd-secret";
pub const SYNC_SET_SUFFIX: &str = "-pd-sync";

// mandatory_labels are set on everything created for an integration; the controller watches
// objects carrying them and maps changes back to the owning integration
pub fn mandatory_labels(pdi: &PagerDutyIntegration) -> BTreeMap<String, String> {
    BTreeMap::from_iter([
        (MANAGED_BY_LABEL.into(), OPERATOR_NAME.into()),
        (OWNED_BY_LABEL.into(), pdi.name_any()),
        (
            OWNED_BY_NAMESPACE_LABEL.into(),
            pdi.namespace().unwrap_or_default(),
        ),
    ])
}

/// Metadata for a dependent named `suffix` living next to the ClusterDeployment.
///
/// Dependents sit in another namespace than the integration, so owner references cannot be
/// used; ownership is carried by labels instead.
pub fn object_meta(pdi: &PagerDutyIntegration, suffix: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(pdi.dependent_name(suffix)),
        namespace: Some(pdi.spec.cluster_deployment_ref.namespace.clone()),
        labels: Some(mandatory_labels(pdi)),
        ..Default::default()
    }
}

/// The integration, as `namespace/name`, that owns an object carrying these labels when it is
/// not `pdi`. Objects without ownership labels have no owner.
pub fn foreign_owner(
    pdi: &PagerDutyIntegration,
    labels: &BTreeMap<String, String>,
) -> Option<String> {
    let name = labels.get(OWNED_BY_LABEL)?;
    let namespace = labels.get(OWNED_BY_NAMESPACE_LABEL)?;

    if *name == pdi.name_any() && Some(namespace.as_str()) == pdi.namespace().as_deref() {
        None
    } else {
        Some(format!("{namespace}/{name}"))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use kube::api::ObjectMeta;

    use crate::resources::pagerdutyintegrations::{
        ClusterDeploymentReference, PagerDutyIntegration, PagerDutyIntegrationSpec,
    };

    pub fn integration() -> PagerDutyIntegration {
        let mut pdi = PagerDutyIntegration::new(
            "osd",
            PagerDutyIntegrationSpec {
                cluster_deployment_ref: ClusterDeploymentReference {
                    name: "cluster-a".into(),
                    namespace: "uhc-prod-abc".into(),
                },
                escalation_policy: "PESC123".into(),
                service_prefix: "osd".into(),
                resolve_timeout: 300,
                ..Default::default()
            },
        );
        pdi.metadata = ObjectMeta {
            name: Some("osd".into()),
            namespace: Some("pagerduty-operator".into()),
            ..Default::default()
        };
        pdi
    }
}
