//! In-memory stand-ins for the API server and PagerDuty, for driving whole reconciles in tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::runtime::events::EventType;
use kube::ResourceExt;

use super::kube_client::KubeClient;
use crate::pagerduty::{ApiKey, Integration, PagerDutyApi, Service, ServiceSettings};
use crate::resources::hive::{ClusterDeployment, SyncSet};
use crate::resources::pagerdutyintegrations::{PagerDutyIntegration, PagerDutyIntegrationStatus};
use crate::{Error, Result};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn key_of<K: kube::Resource>(obj: &K) -> Key {
    key(&obj.namespace().unwrap_or_default(), &obj.name_any())
}

#[derive(Default)]
pub struct FakeKube {
    pub integrations: Mutex<BTreeMap<Key, PagerDutyIntegration>>,
    pub cluster_deployments: Mutex<BTreeMap<Key, ClusterDeployment>>,
    pub secrets: Mutex<BTreeMap<Key, Secret>>,
    pub config_maps: Mutex<BTreeMap<Key, ConfigMap>>,
    pub sync_sets: Mutex<BTreeMap<Key, SyncSet>>,
    pub events: Mutex<Vec<(EventType, String)>>,
    /// Number of upcoming finalizer writes to reject as conflicting
    pub finalizer_conflicts: Mutex<u32>,
    versions: Mutex<u64>,
}

impl FakeKube {
    fn next_version(&self) -> String {
        let mut version = self.versions.lock().unwrap();
        *version += 1;
        version.to_string()
    }

    pub fn insert_integration(&self, mut pdi: PagerDutyIntegration) {
        pdi.metadata.resource_version = Some(self.next_version());
        self.integrations.lock().unwrap().insert(key_of(&pdi), pdi);
    }

    pub fn integration(&self, namespace: &str, name: &str) -> Option<PagerDutyIntegration> {
        self.integrations
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
    }

    /// Marks the integration as being deleted; it disappears once its finalizers are gone
    pub fn request_deletion(&self, namespace: &str, name: &str) {
        let mut integrations = self.integrations.lock().unwrap();
        let pdi = integrations.get_mut(&key(namespace, name)).unwrap();
        pdi.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
        );
        if pdi.finalizers().is_empty() {
            integrations.remove(&key(namespace, name));
        }
    }

    pub fn insert_cluster_deployment(&self, cd: ClusterDeployment) {
        self.cluster_deployments
            .lock()
            .unwrap()
            .insert(key_of(&cd), cd);
    }

    pub fn insert_secret(&self, secret: Secret) {
        self.secrets.lock().unwrap().insert(key_of(&secret), secret);
    }

    pub fn has_config_map(&self, namespace: &str, name: &str) -> bool {
        self.config_maps
            .lock()
            .unwrap()
            .contains_key(&key(namespace, name))
    }

    pub fn has_secret(&self, namespace: &str, name: &str) -> bool {
        self.secrets.lock().unwrap().contains_key(&key(namespace, name))
    }

    pub fn has_sync_set(&self, namespace: &str, name: &str) -> bool {
        self.sync_sets
            .lock()
            .unwrap()
            .contains_key(&key(namespace, name))
    }

    pub fn event_reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reason)| reason.clone())
            .collect()
    }
}

#[async_trait]
impl KubeClient for FakeKube {
    async fn get_integration(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PagerDutyIntegration>> {
        Ok(self.integration(namespace, name))
    }

    async fn get_cluster_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ClusterDeployment>> {
        Ok(self
            .cluster_deployments
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.secrets.lock().unwrap().get(&key(namespace, name)).cloned())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self
            .config_maps
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned())
    }

    async fn apply_config_map(&self, config_map: ConfigMap) -> Result<()> {
        self.config_maps
            .lock()
            .unwrap()
            .insert(key_of(&config_map), config_map);
        Ok(())
    }

    async fn apply_secret(&self, secret: Secret) -> Result<()> {
        self.insert_secret(secret);
        Ok(())
    }

    async fn apply_sync_set(&self, sync_set: SyncSet) -> Result<()> {
        self.sync_sets
            .lock()
            .unwrap()
            .insert(key_of(&sync_set), sync_set);
        Ok(())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        self.config_maps.lock().unwrap().remove(&key(namespace, name));
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.secrets.lock().unwrap().remove(&key(namespace, name));
        Ok(())
    }

    async fn delete_sync_set(&self, namespace: &str, name: &str) -> Result<()> {
        self.sync_sets.lock().unwrap().remove(&key(namespace, name));
        Ok(())
    }

    async fn replace_finalizers(&self, pdi: &PagerDutyIntegration) -> Result<()> {
        {
            let mut conflicts = self.finalizer_conflicts.lock().unwrap();
            if *conflicts > 0 {
                *conflicts -= 1;
                return Err(Error::Conflict(pdi.name_any()));
            }
        }

        let version = self.next_version();
        let mut integrations = self.integrations.lock().unwrap();
        let k = key_of(pdi);
        let stored = integrations
            .get_mut(&k)
            .ok_or_else(|| Error::Conflict(pdi.name_any()))?;
        if stored.metadata.resource_version != pdi.metadata.resource_version {
            return Err(Error::Conflict(pdi.name_any()));
        }

        stored.metadata.finalizers = Some(pdi.finalizers().to_vec());
        stored.metadata.resource_version = Some(version);

        // the API server purges deleted objects once their last finalizer is gone
        if stored.metadata.deletion_timestamp.is_some() && stored.finalizers().is_empty() {
            integrations.remove(&k);
        }
        Ok(())
    }

    async fn patch_status(
        &self,
        pdi: &PagerDutyIntegration,
        status: PagerDutyIntegrationStatus,
    ) -> Result<()> {
        let version = self.next_version();
        if let Some(stored) = self.integrations.lock().unwrap().get_mut(&key_of(pdi)) {
            stored.status = Some(status);
            stored.metadata.resource_version = Some(version);
        }
        Ok(())
    }

    async fn publish_event(
        &self,
        _pdi: &PagerDutyIntegration,
        type_: EventType,
        reason: &str,
        _note: String,
    ) -> Result<()> {
        self.events.lock().unwrap().push((type_, reason.to_string()));
        Ok(())
    }
}

/// A PagerDuty account holding services in memory
#[derive(Default)]
pub struct FakePagerDuty {
    pub services: Mutex<BTreeMap<String, Service>>,
    pub abilities_status: Mutex<Option<u16>>,
    ids: Mutex<u32>,
}

impl FakePagerDuty {
    fn next_id(&self, prefix: &str) -> String {
        let mut ids = self.ids.lock().unwrap();
        *ids += 1;
        format!("{prefix}{ids}")
    }

    pub fn service_count(&self) -> usize {
        self.services.lock().unwrap().len()
    }

    pub fn only_service(&self) -> Service {
        let services = self.services.lock().unwrap();
        assert_eq!(services.len(), 1, "expected exactly one service");
        services.values().next().unwrap().clone()
    }
}

#[async_trait]
impl PagerDutyApi for FakePagerDuty {
    async fn get_service(&self, _api_key: &ApiKey, id: &str) -> Result<Option<Service>> {
        Ok(self.services.lock().unwrap().get(id).cloned())
    }

    async fn find_service(&self, _api_key: &ApiKey, name: &str) -> Result<Option<Service>> {
        Ok(self
            .services
            .lock()
            .unwrap()
            .values()
            .find(|s| s.name == name)
            .cloned())
    }

    async fn create_service(
        &self,
        _api_key: &ApiKey,
        settings: &ServiceSettings,
    ) -> Result<Service> {
        let service = Service {
            id: self.next_id("PSVC"),
            name: settings.name.clone(),
            description: settings.description.clone(),
            escalation_policy_id: settings.escalation_policy_id.clone(),
            resolve_timeout: settings.resolve_timeout,
            acknowledge_timeout: settings.acknowledge_timeout,
            integration: None,
        };
        self.services
            .lock()
            .unwrap()
            .insert(service.id.clone(), service.clone());
        Ok(service)
    }

    async fn update_service(
        &self,
        _api_key: &ApiKey,
        id: &str,
        settings: &ServiceSettings,
    ) -> Result<Service> {
        let mut services = self.services.lock().unwrap();
        let service = services.get_mut(id).ok_or_else(|| Error::PagerDutyApi {
            status: 404,
            message: "Not Found".into(),
        })?;
        service.name = settings.name.clone();
        service.description = settings.description.clone();
        service.escalation_policy_id = settings.escalation_policy_id.clone();
        service.resolve_timeout = settings.resolve_timeout;
        service.acknowledge_timeout = settings.acknowledge_timeout;
        Ok(service.clone())
    }

    async fn delete_service(&self, _api_key: &ApiKey, id: &str) -> Result<()> {
        self.services.lock().unwrap().remove(id);
        Ok(())
    }

    async fn create_integration(&self, _api_key: &ApiKey, service_id: &str) -> Result<Integration> {
        let integration = Integration {
            id: self.next_id("PINT"),
            integration_key: self.next_id("key"),
        };
        let mut services = self.services.lock().unwrap();
        let service = services.get_mut(service_id).ok_or_else(|| Error::PagerDutyApi {
            status: 404,
            message: "Not Found".into(),
        })?;
        service.integration = Some(integration.clone());
        Ok(integration)
    }

    async fn check_abilities(&self, _api_key: &ApiKey) -> Result<()> {
        match *self.abilities_status.lock().unwrap() {
            None => Ok(()),
            Some(401) => Err(Error::PagerDutyAuth),
            Some(status) => Err(Error::PagerDutyApi {
                status,
                message: "unavailable".into(),
            }),
        }
    }
}
