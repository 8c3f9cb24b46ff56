use kube::ResourceExt;

use crate::config::DeploymentMode;
use crate::resources::hive::ClusterDeployment;

/// Label marking clusters operated by Red Hat itself
pub const RH_INFRA_LABEL: &str = "ext-pagerduty.openshift.io/rh-infra";

/// The identifier PagerDuty services are keyed on.
///
/// In fedramp mode the declared cluster name is not authoritative; the namespace naming
/// convention ends with the real cluster id, so the last `-` separated segment is used.
pub fn cluster_id(cd: &ClusterDeployment, mode: DeploymentMode) -> String {
    match mode {
        DeploymentMode::Fedramp => cd
            .metadata
            .namespace
            .as_deref()
            .unwrap_or_default()
            .rsplit('-')
            .next()
            .unwrap_or_default()
            .to_owned(),
        DeploymentMode::Standard => cd.spec.cluster_name.clone(),
    }
}

/// True only when the Red Hat infrastructure label is set to exactly `true`
pub fn is_red_hat_infrastructure(cd: &ClusterDeployment) -> bool {
    cd.labels().get(RH_INFRA_LABEL).map(String::as_str) == Some("true")
}

pub fn is_installed(cd: &ClusterDeployment) -> bool {
    cd.spec.installed
}

pub fn is_being_deleted(cd: &ClusterDeployment) -> bool {
    cd.metadata.deletion_timestamp.is_some()
}
