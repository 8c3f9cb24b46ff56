use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::{metadata_watcher, watcher, WatchStreamExt};
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Config as ControllerConfig, Controller},
        events::EventType,
        watcher::Config,
    },
    Resource,
};
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

use crate::config::{OperatorConfig, OPERATOR_NAME};
use crate::controllers::{Diagnostics, State};
use crate::pagerduty::{ApiKey, Integration, PagerDutyApi, PagerDutyClient, Service, ServiceSettings};
use crate::resources::hive::{ClusterDeployment, SyncSet};
use crate::resources::pagerdutyintegrations::{
    DependentsReference, PagerDutyIntegration, PagerDutyIntegrationCondition,
    PagerDutyIntegrationStatus, PAGERDUTY_INTEGRATION_FINALIZER,
};
use crate::utils::cluster::{cluster_id, is_being_deleted, is_installed, is_red_hat_infrastructure};
use crate::utils::finalizers::{add_finalizer, delete_finalizer, has_finalizer};
use crate::{telemetry, Error, Metrics, Result};

use super::kube_client::{read_api_key, KubeApi, KubeClient};
use super::lifecycle::Lifecycle;
use super::reconcilers::configmap::{config_map, recorded_service_id};
use super::reconcilers::secret::integration_secret;
use super::reconcilers::syncset::sync_set;
use super::reconcilers::{
    foreign_owner, CONFIG_MAP_SUFFIX, MANAGED_BY_LABEL, OWNED_BY_LABEL, OWNED_BY_NAMESPACE_LABEL, SECRET_SUFFIX,
    SYNC_SET_SUFFIX,
};

const REASON_PROVISIONED: &str = "Provisioned";
const REASON_CLUSTER_DELETING: &str = "ClusterDeleting";
const REASON_SKIPPED: &str = "Skipped";
const REASON_CLUSTER_NOT_INSTALLED: &str = "ClusterNotInstalled";
const REASON_FAILED_RECONCILE: &str = "FailedReconcile";

// Context for our reconciler
#[derive(Clone)]
pub(super) struct Context {
    /// API server access
    pub kube: Arc<dyn KubeClient>,
    /// PagerDuty API access
    pub pagerduty: Arc<dyn PagerDutyApi>,
    pub config: OperatorConfig,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
}

impl Context {
    pub fn new(client: Client, metrics: Metrics, state: &State) -> Arc<Context> {
        Arc::new(Context {
            kube: Arc::new(KubeApi::new(client)),
            pagerduty: Arc::new(PagerDutyClient::new(state.config.pagerduty_api_url.clone())),
            config: state.config.clone(),
            diagnostics: state.diagnostics.clone(),
            metrics,
        })
    }
}

#[instrument(skip(ctx, pdi), fields(trace_id))]
async fn reconcile(pdi: Arc<PagerDutyIntegration>, ctx: Arc<Context>) -> Result<Action> {
    if let Some(trace_id) = telemetry::get_trace_id() {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    let _timer = ctx.metrics.count_and_measure::<PagerDutyIntegration>();
    ctx.diagnostics.write().await.last_event = Utc::now();

    info!("Reconciling PagerDutyIntegration \"{}\"", pdi.name_any());

    let deadline = ctx.config.reconcile_timeout;
    let result = tokio::time::timeout(deadline, reconcile_once(&pdi, &ctx))
        .await
        .unwrap_or_else(|_| Err(Error::Timeout(deadline)));

    match result {
        Ok(action) => Ok(action),
        Err(err) => {
            warn!("reconcile failed: {:?}", err);

            if let Err(e) = ctx
                .kube
                .publish_event(
                    &pdi,
                    EventType::Warning,
                    REASON_FAILED_RECONCILE,
                    err.to_string(),
                )
                .await
            {
                warn!("failed to publish event: {e}");
            }

            ctx.metrics.reconcile_failure(pdi.as_ref(), &err);
            Err(err)
        }
    }
}

// The triggering object may be stale; every attempt starts from what the API server holds now
async fn reconcile_once(pdi: &PagerDutyIntegration, ctx: &Context) -> Result<Action> {
    let fresh = ctx
        .kube
        .get_integration(&pdi.namespace().unwrap_or_default(), &pdi.name_any())
        .await?;

    let state = Lifecycle::observe(fresh.as_ref(), None, None);
    match (state, fresh) {
        (Lifecycle::PendingDelete, Some(pdi)) => pdi.cleanup(ctx).await,
        (Lifecycle::Absent | Lifecycle::Deleted, _) | (_, None) => {
            debug!(?state, "Nothing left to reconcile");
            Ok(Action::await_change())
        }
        (_, Some(pdi)) => pdi.reconcile_status(ctx).await,
    }
}

fn error_policy<K, C>(_pdi: Arc<K>, error: &Error, _ctx: C) -> Action {
    if error.is_conflict() {
        // re-read straight away; the object moved on under us
        Action::requeue(Duration::from_secs(1))
    } else {
        Action::requeue(Duration::from_secs(30))
    }
}

/// What a successful provisioning left behind
struct Provisioned {
    cluster_id: String,
    service: Service,
    integration: Integration,
    settings_hash: String,
    /// Whether anything was written to PagerDuty
    changed: bool,
}

impl PagerDutyIntegration {
    async fn api_key(&self, ctx: &Context) -> Result<ApiKey> {
        let (secret, key) = self.api_key_secret_ref(&ctx.config.operator_namespace);
        read_api_key(ctx.kube.as_ref(), &secret.namespace, &secret.name, key).await
    }

    /// The ConfigMap at `at`, unless another integration owns it
    async fn own_config_map(
        &self,
        ctx: &Context,
        at: &DependentsReference,
    ) -> Result<Option<ConfigMap>> {
        let name = at.object_name(CONFIG_MAP_SUFFIX);
        let config_map = ctx.kube.get_config_map(&at.namespace, &name).await?;

        if let Some(owner) = config_map
            .as_ref()
            .and_then(|cm| foreign_owner(self, cm.labels()))
        {
            return Err(Error::DependentConflict {
                name: format!("ConfigMap {}/{name}", at.namespace),
                owner,
            });
        }
        Ok(config_map)
    }

    /// The service id recorded for the dependents at `at`: from their ConfigMap, or else from
    /// status as long as status describes those same dependents
    async fn recorded_service_id(
        &self,
        ctx: &Context,
        at: &DependentsReference,
    ) -> Result<Option<String>> {
        let config_map = self.own_config_map(ctx, at).await?;

        Ok(config_map.as_ref().and_then(recorded_service_id).or_else(|| {
            self.status
                .as_ref()
                .filter(|s| s.dependents.as_ref().map_or(true, |d| d == at))
                .and_then(|s| s.service_id.clone())
        }))
    }

    // Lookup before create: the recorded id first, then the deterministic name, so that a
    // service created by an attempt which failed later on is found again
    async fn lookup_service(
        &self,
        ctx: &Context,
        api_key: &ApiKey,
        settings: &ServiceSettings,
    ) -> Result<Option<Service>> {
        if let Some(id) = self.recorded_service_id(ctx, &self.dependents()).await? {
            if let Some(service) = ctx.pagerduty.get_service(api_key, &id).await? {
                return Ok(Some(service));
            }
            debug!(service_id = %id, "Recorded PagerDuty service no longer exists");
        }

        ctx.pagerduty.find_service(api_key, &settings.name).await
    }

    async fn provision(&self, ctx: &Context) -> Result<Provisioned> {
        // a new target must not leave the old cluster receiving this integration's key
        self.release_stale(ctx).await?;

        let cd_ref = &self.spec.cluster_deployment_ref;
        let cd = ctx
            .kube
            .get_cluster_deployment(&cd_ref.namespace, &cd_ref.name)
            .await?
            .ok_or_else(|| Error::ClusterDeploymentNotFound {
                namespace: cd_ref.namespace.clone(),
                name: cd_ref.name.clone(),
            })?;

        if is_being_deleted(&cd) {
            self.teardown(ctx, Some(&cd)).await?;
            return Err(Error::NotReady {
                message: format!(
                    "ClusterDeployment {}/{} is being deleted",
                    cd_ref.namespace, cd_ref.name
                ),
                reason: REASON_CLUSTER_DELETING.into(),
                requeue_after: Some(Duration::from_secs(5 * 60)),
            });
        }

        if is_red_hat_infrastructure(&cd) {
            self.teardown(ctx, Some(&cd)).await?;
            return Err(Error::NotReady {
                message: "ClusterDeployment is Red Hat infrastructure; PagerDuty is not configured"
                    .into(),
                reason: REASON_SKIPPED.into(),
                requeue_after: Some(Duration::from_secs(5 * 60)),
            });
        }

        if !is_installed(&cd) {
            return Err(Error::NotReady {
                message: format!(
                    "ClusterDeployment {}/{} has not finished installing",
                    cd_ref.namespace, cd_ref.name
                ),
                reason: REASON_CLUSTER_NOT_INSTALLED.into(),
                requeue_after: None,
            });
        }

        let api_key = self.api_key(ctx).await?;
        let cluster_id = cluster_id(&cd, ctx.config.deployment_mode);
        let settings = ServiceSettings::new(self, &cd, &cluster_id);
        let record = self.lookup_service(ctx, &api_key, &settings).await?;

        let state = Lifecycle::observe(Some(self), record.as_ref(), Some(&settings));
        debug!(?state, service = %settings.name, "Observed PagerDuty service");

        let (service, mut changed) = match (state, record) {
            (Lifecycle::PendingUpdate, Some(existing)) => {
                info!(service_id = %existing.id, "Updating drifted PagerDuty service");
                let mut updated = ctx
                    .pagerduty
                    .update_service(&api_key, &existing.id, &settings)
                    .await?;
                updated.integration = updated.integration.or(existing.integration);
                (updated, true)
            }
            (_, Some(existing)) => (existing, false),
            (_, None) => (
                ctx.pagerduty.create_service(&api_key, &settings).await?,
                true,
            ),
        };

        let integration = match service.integration.clone() {
            Some(integration) => integration,
            None => {
                changed = true;
                ctx.pagerduty
                    .create_integration(&api_key, &service.id)
                    .await?
            }
        };

        if !has_finalizer(self, PAGERDUTY_INTEGRATION_FINALIZER) {
            let mut pdi = self.clone();
            add_finalizer(&mut pdi, PAGERDUTY_INTEGRATION_FINALIZER);
            ctx.kube.replace_finalizers(&pdi).await?;
        }

        ctx.kube
            .apply_config_map(config_map(
                self,
                &cluster_id,
                &settings,
                &service,
                &integration,
            ))
            .await?;
        ctx.kube
            .apply_secret(integration_secret(self, &integration))
            .await?;
        ctx.kube.apply_sync_set(sync_set(self)).await?;

        Ok(Provisioned {
            cluster_id,
            service,
            integration,
            settings_hash: settings.hash(),
            changed,
        })
    }

    async fn reconcile_status(&self, ctx: &Context) -> Result<Action> {
        let previous = self.status.clone().unwrap_or_default();

        let (result, status, message, reason, condition_status) = match self.provision(ctx).await
        {
            Ok(provisioned) => {
                if provisioned.changed {
                    if let Err(e) = ctx
                        .kube
                        .publish_event(
                            self,
                            EventType::Normal,
                            REASON_PROVISIONED,
                            format!(
                                "PagerDuty service `{}` is configured",
                                provisioned.service.name
                            ),
                        )
                        .await
                    {
                        warn!("failed to publish event: {e}");
                    }
                }

                // If no events were received, check back every 5 minutes
                let action = Action::requeue(Duration::from_secs(5 * 60));

                (
                    Ok(action),
                    PagerDutyIntegrationStatus {
                        observed_generation: self.metadata.generation,
                        cluster_id: Some(provisioned.cluster_id),
                        service_id: Some(provisioned.service.id),
                        integration_id: Some(provisioned.integration.id),
                        spec_hash: Some(provisioned.settings_hash),
                        dependents: Some(self.dependents()),
                        conditions: None,
                    },
                    "PagerDuty service provisioned successfully".to_string(),
                    REASON_PROVISIONED.to_string(),
                    "True",
                )
            }
            Err(Error::NotReady {
                message,
                reason,
                requeue_after,
            }) => {
                // default 1 minute in the NotReady case
                let requeue_after = requeue_after.unwrap_or(Duration::from_secs(60));

                info!("PagerDutyIntegration is not yet ready: {message}");

                // the external records are gone when the cluster or a previous target was released
                let released = reason == REASON_CLUSTER_DELETING
                    || reason == REASON_SKIPPED
                    || self.stale_dependents().is_some();
                let status = if released {
                    PagerDutyIntegrationStatus {
                        observed_generation: self.metadata.generation,
                        ..Default::default()
                    }
                } else {
                    PagerDutyIntegrationStatus {
                        observed_generation: self.metadata.generation,
                        ..previous
                    }
                };

                (
                    Ok(Action::requeue(requeue_after)),
                    status,
                    message,
                    reason,
                    "False",
                )
            }
            Err(err) => {
                let message = err.to_string();
                (
                    Err(err),
                    previous,
                    message,
                    REASON_FAILED_RECONCILE.to_string(),
                    "Unknown",
                )
            }
        };

        let existing_ready = self.ready_condition();
        let now = Time(Utc::now());

        let mut ready = PagerDutyIntegrationCondition {
            last_transition_time: Some(
                existing_ready
                    .and_then(|r| r.last_transition_time.clone())
                    .unwrap_or_else(|| now.clone()),
            ),
            message: Some(message),
            reason: Some(reason),
            status: condition_status.into(),
            r#type: "Ready".into(),
        };

        if existing_ready.map(|r| &r.status) != Some(&ready.status) {
            // update transition time if the status has at all changed
            ready.last_transition_time = Some(now)
        }

        ctx.kube
            .patch_status(
                self,
                PagerDutyIntegrationStatus {
                    conditions: Some(vec![ready]),
                    ..status
                },
            )
            .await?;

        result
    }

    // Finalizer cleanup (the object was deleted, ensure nothing is orphaned)
    async fn cleanup(&self, ctx: &Context) -> Result<Action> {
        if let Err(e) = ctx
            .kube
            .publish_event(
                self,
                EventType::Normal,
                "DeleteRequested",
                format!("Delete `{}`", self.name_any()),
            )
            .await
        {
            warn!("failed to publish event: {e}");
        }

        let cd_ref = &self.spec.cluster_deployment_ref;
        let cd = ctx
            .kube
            .get_cluster_deployment(&cd_ref.namespace, &cd_ref.name)
            .await?;

        self.release_stale(ctx).await?;
        self.teardown(ctx, cd.as_ref()).await?;
        Ok(Action::await_change())
    }

    /// Remove everything provisioned for this integration, then drop the finalizer
    async fn teardown(&self, ctx: &Context, cd: Option<&ClusterDeployment>) -> Result<()> {
        let guarded = has_finalizer(self, PAGERDUTY_INTEGRATION_FINALIZER);

        self.release(ctx, &self.dependents(), cd.filter(|_| guarded))
            .await?;

        if guarded {
            let mut pdi = self.clone();
            delete_finalizer(&mut pdi, PAGERDUTY_INTEGRATION_FINALIZER);
            ctx.kube.replace_finalizers(&pdi).await?;
        }

        Ok(())
    }

    /// Release the dependents applied for an earlier clusterDeploymentRef or servicePrefix
    async fn release_stale(&self, ctx: &Context) -> Result<()> {
        if let Some(stale) = self.stale_dependents() {
            info!(
                namespace = %stale.namespace,
                name = %stale.name,
                "Releasing dependents of a previous target"
            );
            self.release(ctx, &stale, None).await?;
        }
        Ok(())
    }

    /// Delete the dependents at `at` together with the PagerDuty service they record.
    /// The ConfigMap goes last: until then it records which PagerDuty service to delete.
    async fn release(
        &self,
        ctx: &Context,
        at: &DependentsReference,
        cd: Option<&ClusterDeployment>,
    ) -> Result<()> {
        let recorded = match self.recorded_service_id(ctx, at).await {
            Err(Error::DependentConflict { name, owner }) => {
                warn!("Leaving {name} to PagerDutyIntegration {owner}");
                return Ok(());
            }
            recorded => recorded?,
        };

        ctx.kube
            .delete_sync_set(&at.namespace, &at.object_name(SYNC_SET_SUFFIX))
            .await?;
        ctx.kube
            .delete_secret(&at.namespace, &at.object_name(SECRET_SUFFIX))
            .await?;

        // without a recorded id the service can only be found by name, which needs the cluster
        if recorded.is_some() || cd.is_some() {
            let api_key = self.api_key(ctx).await?;
            let service_id = match (recorded, cd) {
                (Some(id), _) => Some(id),
                (None, Some(cd)) => {
                    let settings = ServiceSettings::new(
                        self,
                        cd,
                        &cluster_id(cd, ctx.config.deployment_mode),
                    );
                    ctx.pagerduty
                        .find_service(&api_key, &settings.name)
                        .await?
                        .map(|s| s.id)
                }
                (None, None) => None,
            };

            if let Some(id) = service_id {
                info!(service_id = %id, "Deleting PagerDuty service");
                ctx.pagerduty.delete_service(&api_key, &id).await?;
            }
        }

        ctx.kube
            .delete_config_map(&at.namespace, &at.object_name(CONFIG_MAP_SUFFIX))
            .await
    }
}

// Initialize the controller and shared state (given the crd is installed)
pub async fn run(client: Client, metrics: Metrics, state: State) {
    let pdi_api = Api::<PagerDutyIntegration>::all(client.clone());
    let cd_api = Api::<ClusterDeployment>::all(client.clone());
    let cm_api = Api::<ConfigMap>::all(client.clone());
    let secret_api = Api::<Secret>::all(client.clone());
    let ss_api = Api::<SyncSet>::all(client.clone());

    if let Err(e) = pdi_api.list(&ListParams::default().limit(1)).await {
        error!("PagerDutyIntegration is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    if let Err(e) = cd_api.list(&ListParams::default().limit(1)).await {
        error!("ClusterDeployment is not queryable; {e:?}. Is Hive installed?");
        std::process::exit(1);
    }

    // all resources we create have this label
    let cfg = Config::default().labels(&format!("{MANAGED_BY_LABEL}={OPERATOR_NAME}"));

    let controller = Controller::new(pdi_api, Config::default()).with_config(
        ControllerConfig::default().concurrency(state.config.concurrency),
    );
    let pdi_store = controller.store();

    let cd_watcher = watcher(cd_api, Config::default())
        .map(|event| ensure_deletion_change(event))
        .touched_objects()
        // hive updates status constantly
        .predicate_filter(changed_predicate);

    let cm_watcher = metadata_watcher(cm_api, cfg.clone()).touched_objects();
    let secret_watcher = metadata_watcher(secret_api, cfg.clone()).touched_objects();
    let ss_watcher = metadata_watcher(ss_api, cfg.clone()).touched_objects();

    controller
        .shutdown_on_signal()
        .watches_stream(cd_watcher, move |cd| integrations_for(&pdi_store, &cd))
        .watches_stream(cm_watcher, |cm| owner_from_labels(&cm))
        .watches_stream(secret_watcher, |secret| owner_from_labels(&secret))
        .watches_stream(ss_watcher, |ss| owner_from_labels(&ss))
        .run(reconcile, error_policy, Context::new(client, metrics, &state))
        .filter_map(|x| async move { Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}

fn integrations_for(
    store: &Store<PagerDutyIntegration>,
    cd: &ClusterDeployment,
) -> Vec<ObjectRef<PagerDutyIntegration>> {
    let namespace = cd.namespace().unwrap_or_default();
    let name = cd.name_any();

    store
        .state()
        .into_iter()
        .filter(|pdi| {
            pdi.spec.cluster_deployment_ref.name == name
                && pdi.spec.cluster_deployment_ref.namespace == namespace
        })
        .map(|pdi| ObjectRef::from_obj(pdi.as_ref()))
        .collect()
}

fn owner_from_labels<K: Resource>(obj: &K) -> Option<ObjectRef<PagerDutyIntegration>> {
    let labels = obj.labels();
    if labels.get(MANAGED_BY_LABEL).map(String::as_str) != Some(OPERATOR_NAME) {
        // should have been caught by the label selector
        return None;
    }

    let name = labels.get(OWNED_BY_LABEL)?;
    let namespace = labels.get(OWNED_BY_NAMESPACE_LABEL)?;

    Some(ObjectRef::new(name).within(namespace))
}

// deletion apparently doesn't lead to any change in metadata otherwise, which means the changed_predicate
// would drop them.
fn ensure_deletion_change<K: Resource, E>(
    mut event: Result<kube::runtime::watcher::Event<K>, E>,
) -> Result<kube::runtime::watcher::Event<K>, E> {
    if let Ok(kube::runtime::watcher::Event::Delete(ref mut object)) = event {
        let meta = object.meta_mut();
        meta.generation = match meta.generation {
            Some(val) => Some(val + 1),
            None => Some(0),
        }
    }
    event
}

fn changed_predicate<K: Resource>(obj: &K) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    if let Some(g) = obj.meta().generation {
        // covers spec but not metadata or status
        g.hash(&mut hasher)
    }
    obj.labels().hash(&mut hasher);
    obj.meta().deletion_timestamp.is_some().hash(&mut hasher);
    Some(hasher.finish())
}
