//! Idempotent deletion of the objects created next to a ClusterDeployment. An object that is
//! already gone, or disappears between our read and our delete, counts as deleted. Nothing here
//! retries; errors go back to the controller, which requeues.

use std::fmt::Debug;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, DeleteParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tracing::*;

use crate::resources::hive::SyncSet;
use crate::Result;

pub async fn delete_config_map(client: &Client, name: &str, namespace: &str) -> Result<()> {
    delete_dependent::<ConfigMap>(client, name, namespace).await
}

pub async fn delete_sync_set(client: &Client, name: &str, namespace: &str) -> Result<()> {
    delete_dependent::<SyncSet>(client, name, namespace).await
}

pub async fn delete_secret(client: &Client, name: &str, namespace: &str) -> Result<()> {
    delete_dependent::<Secret>(client, name, namespace).await
}

async fn delete_dependent<K>(client: &Client, name: &str, namespace: &str) -> Result<()>
where
    K: Resource<DynamicType = (), Scope = kube::core::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);

    if api.get_opt(name).await?.is_none() {
        return Ok(());
    }

    info!(
        namespace = %namespace,
        name = %name,
        "Deleting {}",
        K::kind(&())
    );

    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        // a concurrent deleter got there first
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
        Err(err) => Err(err.into()),
    }
}
