//! Single active instance through a coordination.k8s.io/v1 Lease.
//!
//! Writes carry the resourceVersion that was read, so two candidates racing for an expired
//! lease cannot both win: the loser gets a 409 and goes back to waiting.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::*;

use crate::config::OPERATOR_NAME;
use crate::Result;

pub const LEADER_LEASE_NAME: &str = "pagerduty-operator-lock";

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

pub struct LeaderElector {
    client: Client,
    namespace: String,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            identity: identity.to_string(),
        }
    }

    /// Block until the lease is ours, then keep renewing it in the background
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(
            identity = %self.identity,
            lease = LEADER_LEASE_NAME,
            namespace = %self.namespace,
            "Waiting for leadership"
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Leadership acquired");
                    return self.create_guard();
                }
                Ok(false) => {
                    debug!(identity = %self.identity, "Lease held by another instance");
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "Failed to acquire lease, retrying");
                }
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    fn create_guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(lost_tx).await;
        });

        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();

        let Some(lease) = api.get_opt(LEADER_LEASE_NAME).await? else {
            return self.create_lease(&api, now).await;
        };

        let spec = lease.spec.clone().unwrap_or_default();
        let held_by_us = spec.holder_identity.as_deref() == Some(self.identity.as_str());

        if !held_by_us && !is_expired(&spec, now) {
            return Ok(false);
        }

        let transitions = spec.lease_transitions.unwrap_or(0);
        let updated = Lease {
            metadata: ObjectMeta {
                name: Some(LEADER_LEASE_NAME.into()),
                namespace: Some(self.namespace.clone()),
                resource_version: lease.metadata.resource_version.clone(),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
                acquire_time: if held_by_us {
                    spec.acquire_time.clone()
                } else {
                    Some(MicroTime(now))
                },
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(if held_by_us {
                    transitions
                } else {
                    transitions + 1
                }),
                ..Default::default()
            }),
        };

        match api
            .replace(LEADER_LEASE_NAME, &PostParams::default(), &updated)
            .await
        {
            Ok(_) => {
                if !held_by_us {
                    info!(identity = %self.identity, transitions = transitions + 1, "Took over expired lease");
                }
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_lease(&self, api: &Api<Lease>, now: DateTime<Utc>) -> Result<bool> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(LEADER_LEASE_NAME.into()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(0),
                ..Default::default()
            }),
        };

        match api.create(&PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            // someone else created it first
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        loop {
            tokio::time::sleep(RENEW_INTERVAL).await;

            match self.try_acquire_or_renew().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(identity = %self.identity, "Leadership lost");
                    let _ = lost_tx.send(());
                    return;
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "Lease renewal failed, leadership lost");
                    let _ = lost_tx.send(());
                    return;
                }
            }
        }
    }

    /// Hand the lease over right away instead of letting it expire
    async fn release_lease(&self) -> Result<()> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);

        let Some(lease) = api.get_opt(LEADER_LEASE_NAME).await? else {
            return Ok(());
        };

        let holder = lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref());
        if holder != Some(self.identity.as_str()) {
            return Ok(());
        }

        let past = Utc::now() - chrono::Duration::seconds(60);
        let patch = json!({
            "metadata": {
                "resourceVersion": lease.metadata.resource_version,
            },
            "spec": {
                "holderIdentity": null,
                "renewTime": MicroTime(past),
            }
        });

        api.patch(
            LEADER_LEASE_NAME,
            &PatchParams::apply(OPERATOR_NAME),
            &Patch::Merge(&patch),
        )
        .await?;

        info!(identity = %self.identity, "Lease released");
        Ok(())
    }
}

fn is_expired(spec: &LeaseSpec, now: DateTime<Utc>) -> bool {
    match (spec.renew_time.as_ref(), spec.lease_duration_seconds) {
        (Some(renewed), Some(duration)) => {
            now > renewed.0 + chrono::Duration::seconds(i64::from(duration))
        }
        _ => true,
    }
}

/// Held while this instance leads; the renewal task stops when it is dropped
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Resolves once the lease could not be renewed
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }

    pub async fn release(self) -> Result<()> {
        self.renewal_task.abort();
        self.elector.release_lease().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, Request, Response};
    use kube::client::Body;

    use super::*;

    fn spec(renewed_secs_ago: i64, duration: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some("other".into()),
            renew_time: Some(MicroTime(
                Utc::now() - chrono::Duration::seconds(renewed_secs_ago),
            )),
            lease_duration_seconds: Some(duration),
            ..Default::default()
        }
    }

    #[test]
    fn fresh_lease_is_not_expired() {
        assert!(!is_expired(&spec(5, 30), Utc::now()));
    }

    #[test]
    fn stale_lease_is_expired() {
        assert!(is_expired(&spec(45, 30), Utc::now()));
    }

    #[test]
    fn lease_without_renew_time_is_expired() {
        assert!(is_expired(&LeaseSpec::default(), Utc::now()));
    }

    #[tokio::test]
    async fn creates_missing_lease() {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");

        let server = tokio::spawn(async move {
            let path = "/apis/coordination.k8s.io/v1/namespaces/pagerduty-operator/leases";

            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), Method::GET);
            assert_eq!(request.uri().path(), format!("{path}/{LEADER_LEASE_NAME}"));
            send.send_response(
                Response::builder()
                    .status(404)
                    .body(Body::from(
                        serde_json::to_vec(&json!({
                            "kind": "Status", "apiVersion": "v1", "metadata": {},
                            "status": "Failure", "message": "not found",
                            "reason": "NotFound", "code": 404,
                        }))
                        .unwrap(),
                    ))
                    .unwrap(),
            );

            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), Method::POST);
            assert_eq!(request.uri().path(), path);
            let body = request.into_body().collect_bytes().await.unwrap();
            let lease: Lease = serde_json::from_slice(&body).unwrap();
            assert_eq!(
                lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref()),
                Some("pod-a")
            );
            send.send_response(
                Response::builder()
                    .body(Body::from(body.to_vec()))
                    .unwrap(),
            );
        });

        let elector = LeaderElector::new(client, "pagerduty-operator", "pod-a");
        assert!(elector.try_acquire_or_renew().await.unwrap());
        server.await.unwrap();
    }
}
