use super::{object_meta, SECRET_SUFFIX, SYNC_SET_SUFFIX};
use crate::resources::hive::{
    LocalObjectReference, SecretMapping, SecretObjectReference, SyncSet, SyncSetSpec,
};
use crate::resources::pagerdutyintegrations::PagerDutyIntegration;

/// Hive copies the integration Secret onto the managed cluster, and removes it again once the
/// SyncSet is gone
pub fn sync_set(pdi: &PagerDutyIntegration) -> SyncSet {
    let target = pdi.target_secret_ref();

    SyncSet {
        metadata: object_meta(pdi, SYNC_SET_SUFFIX),
        spec: SyncSetSpec {
            cluster_deployment_refs: vec![LocalObjectReference {
                name: pdi.spec.cluster_deployment_ref.name.clone(),
            }],
            resource_apply_mode: Some("Sync".into()),
            secret_mappings: vec![SecretMapping {
                source_ref: SecretObjectReference {
                    name: pdi.dependent_name(SECRET_SUFFIX),
                    namespace: Some(pdi.spec.cluster_deployment_ref.namespace.clone()),
                },
                target_ref: SecretObjectReference {
                    name: target.name,
                    namespace: Some(target.namespace),
                },
            }],
        },
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    use super::super::test_support::integration;
    use super::*;

    #[test]
    fn maps_integration_secret_onto_the_cluster() {
        let ss = sync_set(&integration());

        assert_json_include!(
            actual: serde_json::to_value(&ss).unwrap(),
            expected: json!({
                "apiVersion": "hive.openshift.io/v1",
                "kind": "SyncSet",
                "metadata": {
                    "name": "osd-cluster-a-pd-sync",
                    "namespace": "uhc-prod-abc",
                },
                "spec": {
                    "clusterDeploymentRefs": [{"name": "cluster-a"}],
                    "resourceApplyMode": "Sync",
                    "secretMappings": [{
                        "sourceRef": {"name": "osd-cluster-a-pd-secret", "namespace": "uhc-prod-abc"},
                        "targetRef": {"name": "pd-secret", "namespace": "openshift-monitoring"},
                    }],
                },
            })
        );
    }
}
