//! All API server access of the reconciler and the heartbeat goes through [`KubeClient`], so the
//! lifecycle can be driven against in-memory state in tests.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::events::{Event, EventType, Recorder};
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use tracing::*;

use super::reconcilers::secret::api_key_from_secret;
use crate::config::OPERATOR_NAME;
use crate::pagerduty::ApiKey;
use crate::resources::hive::{ClusterDeployment, SyncSet};
use crate::resources::pagerdutyintegrations::{PagerDutyIntegration, PagerDutyIntegrationStatus};
use crate::utils::cleanup;
use crate::{Error, Result};

#[async_trait]
pub trait KubeClient: Send + Sync {
    async fn get_integration(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PagerDutyIntegration>>;

    async fn get_cluster_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ClusterDeployment>>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    async fn apply_config_map(&self, config_map: ConfigMap) -> Result<()>;

    async fn apply_secret(&self, secret: Secret) -> Result<()>;

    async fn apply_sync_set(&self, sync_set: SyncSet) -> Result<()>;

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    async fn delete_sync_set(&self, namespace: &str, name: &str) -> Result<()>;

    /// Persist the finalizer list of `pdi`. The write is conditional on the resourceVersion
    /// `pdi` was read at; a concurrent change yields [`Error::Conflict`].
    async fn replace_finalizers(&self, pdi: &PagerDutyIntegration) -> Result<()>;

    async fn patch_status(
        &self,
        pdi: &PagerDutyIntegration,
        status: PagerDutyIntegrationStatus,
    ) -> Result<()>;

    async fn publish_event(
        &self,
        pdi: &PagerDutyIntegration,
        type_: EventType,
        reason: &str,
        note: String,
    ) -> Result<()>;
}

/// Read a PagerDuty API key from `key` of the Secret `namespace/name`
pub async fn read_api_key(
    kube: &dyn KubeClient,
    namespace: &str,
    name: &str,
    key: &str,
) -> Result<ApiKey> {
    let location = format!("{namespace}/{name}");
    let secret = kube
        .get_secret(namespace, name)
        .await?
        .ok_or_else(|| Error::SecretNotFound(location.clone()))?;
    api_key_from_secret(&secret, key, &location)
}

#[derive(Clone)]
pub struct KubeApi {
    client: Client,
    recorder: Recorder,
}

impl KubeApi {
    pub fn new(client: Client) -> Self {
        Self {
            recorder: Recorder::new(client.clone(), OPERATOR_NAME.into()),
            client,
        }
    }

    async fn apply<K>(&self, obj: K) -> Result<()>
    where
        K: Resource<DynamicType = (), Scope = kube::core::NamespaceResourceScope>
            + Clone
            + serde::Serialize
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
    {
        let name = obj.name_any();
        let namespace = obj.namespace().unwrap_or_default();
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        let params = PatchParams::apply(OPERATOR_NAME).force();
        debug!("Applying {} {}/{}", K::kind(&()), namespace, name);
        api.patch(&name, &params, &Patch::Apply(&obj)).await?;
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeApi {
    async fn get_integration(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PagerDutyIntegration>> {
        let api: Api<PagerDutyIntegration> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_cluster_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ClusterDeployment>> {
        let api: Api<ClusterDeployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn apply_config_map(&self, config_map: ConfigMap) -> Result<()> {
        self.apply(config_map).await
    }

    async fn apply_secret(&self, secret: Secret) -> Result<()> {
        self.apply(secret).await
    }

    async fn apply_sync_set(&self, sync_set: SyncSet) -> Result<()> {
        self.apply(sync_set).await
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        cleanup::delete_config_map(&self.client, name, namespace).await
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        cleanup::delete_secret(&self.client, name, namespace).await
    }

    async fn delete_sync_set(&self, namespace: &str, name: &str) -> Result<()> {
        cleanup::delete_sync_set(&self.client, name, namespace).await
    }

    async fn replace_finalizers(&self, pdi: &PagerDutyIntegration) -> Result<()> {
        let name = pdi.name_any();
        let namespace = pdi.namespace().unwrap_or_default();
        let api: Api<PagerDutyIntegration> = Api::namespaced(self.client.clone(), &namespace);

        // a merge patch replaces lists wholesale; the resourceVersion makes it conditional
        let patch = json!({
            "metadata": {
                "resourceVersion": pdi.resource_version(),
                "finalizers": pdi.finalizers(),
            }
        });

        match api
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 409 => Err(Error::Conflict(format!(
                "PagerDutyIntegration {namespace}/{name}"
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn patch_status(
        &self,
        pdi: &PagerDutyIntegration,
        status: PagerDutyIntegrationStatus,
    ) -> Result<()> {
        let api: Api<PagerDutyIntegration> =
            Api::namespaced(self.client.clone(), &pdi.namespace().unwrap_or_default());

        // always overwrite status object with what we saw
        let new_status = Patch::Apply(json!({
            "apiVersion": PagerDutyIntegration::api_version(&()),
            "kind": PagerDutyIntegration::kind(&()),
            "status": status,
        }));
        let ps = PatchParams::apply(OPERATOR_NAME).force();
        let _o = api.patch_status(&pdi.name_any(), &ps, &new_status).await?;
        Ok(())
    }

    async fn publish_event(
        &self,
        pdi: &PagerDutyIntegration,
        type_: EventType,
        reason: &str,
        note: String,
    ) -> Result<()> {
        self.recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note: Some(note),
                    action: "Reconcile".into(),
                    secondary: None,
                },
                &pdi.object_ref(&()),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, Request, Response};
    use kube::api::ObjectMeta;
    use kube::client::Body;

    use super::super::reconcilers::test_support::integration;
    use super::*;

    fn pdi_at_version(version: &str) -> PagerDutyIntegration {
        let mut pdi = integration();
        pdi.metadata = ObjectMeta {
            resource_version: Some(version.into()),
            finalizers: Some(vec!["pd.managed.openshift.io/pagerduty".into()]),
            ..pdi.metadata
        };
        pdi
    }

    #[tokio::test]
    async fn finalizer_write_is_conditional_on_resource_version() {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let kube = KubeApi::new(Client::new(mock_service, "default"));

        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), Method::PATCH);
            assert_eq!(
                request.uri().path(),
                "/apis/pagerduty.openshift.io/v1alpha1/namespaces/pagerduty-operator/pagerdutyintegrations/osd"
            );
            let body = request.into_body().collect_bytes().await.unwrap();
            let patch: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(
                patch,
                json!({"metadata": {
                    "resourceVersion": "42",
                    "finalizers": ["pd.managed.openshift.io/pagerduty"],
                }})
            );

            send.send_response(
                Response::builder()
                    .status(409)
                    .body(Body::from(
                        serde_json::to_vec(&json!({
                            "kind": "Status", "apiVersion": "v1", "metadata": {},
                            "status": "Failure", "message": "the object has been modified",
                            "reason": "Conflict", "code": 409,
                        }))
                        .unwrap(),
                    ))
                    .unwrap(),
            );
        });

        let err = kube.replace_finalizers(&pdi_at_version("42")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(err.is_conflict());
        server.await.unwrap();
    }
}
