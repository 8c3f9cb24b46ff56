use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::*;
use url::Url;

use super::{ApiKey, Integration, PagerDutyApi, Service, ServiceSettings};
use crate::{Error, Result};

const ACCEPT_V2: &str = "application/vnd.pagerduty+json;version=2";
const EVENTS_V2_INTEGRATION: &str = "events_api_v2_inbound_integration";
/// Largest page the list endpoints hand out
const PAGE_LIMIT: usize = 100;

/// PagerDuty REST API v2 client
#[derive(Clone)]
pub struct PagerDutyClient {
    http_client: reqwest::Client,
    base_url: Url,
}

impl PagerDutyClient {
    pub fn new(mut base_url: Url) -> Self {
        // paths are joined relative to the base, which needs a trailing slash to keep its own path
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Self {
            http_client: reqwest::Client::new(),
            base_url,
        }
    }

    fn request(&self, method: Method, api_key: &ApiKey, path: &str) -> Result<reqwest::RequestBuilder> {
        Ok(self
            .http_client
            .request(method, self.base_url.join(path)?)
            .header(reqwest::header::ACCEPT, ACCEPT_V2)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Token token={}", api_key.expose()),
            ))
    }
}

// Turns a non-2xx response into the matching error
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(Error::PagerDutyAuth);
    }

    let message = resp.text().await.unwrap_or_default();
    Err(Error::PagerDutyApi {
        status: status.as_u16(),
        message,
    })
}

#[derive(Deserialize)]
struct ServiceEnvelope {
    service: ServiceBody,
}

#[derive(Deserialize)]
struct ServiceList {
    services: Vec<ServiceBody>,
    /// Whether further pages follow
    #[serde(default)]
    more: bool,
}

#[derive(Deserialize)]
struct ServiceBody {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    auto_resolve_timeout: Option<u32>,
    acknowledgement_timeout: Option<u32>,
    escalation_policy: Reference,
    #[serde(default)]
    integrations: Vec<IntegrationBody>,
}

#[derive(Deserialize)]
struct IntegrationEnvelope {
    integration: IntegrationBody,
}

#[derive(Deserialize)]
struct IntegrationBody {
    id: String,
    #[serde(rename = "type")]
    type_: String,
    integration_key: Option<String>,
}

#[derive(Deserialize, Serialize)]
struct Reference {
    id: String,
    #[serde(rename = "type")]
    type_: String,
}

impl From<ServiceBody> for Service {
    fn from(body: ServiceBody) -> Self {
        // integration references (as opposed to included integrations) carry no key
        let integration = body
            .integrations
            .into_iter()
            .filter(|i| i.type_ == EVENTS_V2_INTEGRATION || i.type_ == "generic_events_api_inbound_integration")
            .find_map(|i| {
                i.integration_key.map(|integration_key| Integration {
                    id: i.id,
                    integration_key,
                })
            });

        Service {
            id: body.id,
            name: body.name,
            description: body.description.unwrap_or_default(),
            escalation_policy_id: body.escalation_policy.id,
            resolve_timeout: body.auto_resolve_timeout,
            acknowledge_timeout: body.acknowledgement_timeout,
            integration,
        }
    }
}

fn service_payload(settings: &ServiceSettings) -> serde_json::Value {
    json!({
        "service": {
            "type": "service",
            "name": settings.name,
            "description": settings.description,
            "auto_resolve_timeout": settings.resolve_timeout,
            "acknowledgement_timeout": settings.acknowledge_timeout,
            "escalation_policy": Reference {
                id: settings.escalation_policy_id.clone(),
                type_: "escalation_policy_reference".into(),
            },
            "alert_creation": "create_alerts_and_incidents",
        }
    })
}

#[async_trait]
impl PagerDutyApi for PagerDutyClient {
    async fn get_service(&self, api_key: &ApiKey, id: &str) -> Result<Option<Service>> {
        let resp = self
            .request(Method::GET, api_key, &format!("services/{id}"))?
            .query(&[("include[]", "integrations")])
            .send()
            .await
            .map_err(Error::PagerDutyRequest)?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let envelope: ServiceEnvelope = check_status(resp)
            .await?
            .json()
            .await
            .map_err(Error::PagerDutyRequest)?;

        Ok(Some(envelope.service.into()))
    }

    async fn find_service(&self, api_key: &ApiKey, name: &str) -> Result<Option<Service>> {
        let limit = PAGE_LIMIT.to_string();
        let mut offset = 0;

        loop {
            let page: ServiceList = check_status(
                self.request(Method::GET, api_key, "services")?
                    .query(&[
                        ("query", name),
                        ("include[]", "integrations"),
                        ("limit", limit.as_str()),
                        ("offset", offset.to_string().as_str()),
                    ])
                    .send()
                    .await
                    .map_err(Error::PagerDutyRequest)?,
            )
            .await?
            .json()
            .await
            .map_err(Error::PagerDutyRequest)?;

            let fetched = page.services.len();

            // query is a substring match; only an exact name is ours
            if let Some(service) = page.services.into_iter().find(|s| s.name == name) {
                return Ok(Some(service.into()));
            }

            if !page.more || fetched == 0 {
                return Ok(None);
            }
            offset += fetched;
        }
    }

    async fn create_service(
        &self,
        api_key: &ApiKey,
        settings: &ServiceSettings,
    ) -> Result<Service> {
        debug!(name = %settings.name, "Creating PagerDuty service");

        let envelope: ServiceEnvelope = check_status(
            self.request(Method::POST, api_key, "services")?
                .json(&service_payload(settings))
                .send()
                .await
                .map_err(Error::PagerDutyRequest)?,
        )
        .await?
        .json()
        .await
        .map_err(Error::PagerDutyRequest)?;

        info!(
            service_id = %envelope.service.id,
            name = %settings.name,
            "Created PagerDuty service"
        );

        Ok(envelope.service.into())
    }

    async fn update_service(
        &self,
        api_key: &ApiKey,
        id: &str,
        settings: &ServiceSettings,
    ) -> Result<Service> {
        debug!(service_id = %id, name = %settings.name, "Updating PagerDuty service");

        let envelope: ServiceEnvelope = check_status(
            self.request(Method::PUT, api_key, &format!("services/{id}"))?
                .json(&service_payload(settings))
                .send()
                .await
                .map_err(Error::PagerDutyRequest)?,
        )
        .await?
        .json()
        .await
        .map_err(Error::PagerDutyRequest)?;

        Ok(envelope.service.into())
    }

    async fn delete_service(&self, api_key: &ApiKey, id: &str) -> Result<()> {
        let resp = self
            .request(Method::DELETE, api_key, &format!("services/{id}"))?
            .send()
            .await
            .map_err(Error::PagerDutyRequest)?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!(service_id = %id, "PagerDuty service already deleted");
            return Ok(());
        }

        check_status(resp).await?;
        info!(service_id = %id, "Deleted PagerDuty service");
        Ok(())
    }

    async fn create_integration(&self, api_key: &ApiKey, service_id: &str) -> Result<Integration> {
        let payload = json!({
            "integration": {
                "type": EVENTS_V2_INTEGRATION,
                "name": "Alertmanager",
                "service": {
                    "id": service_id,
                    "type": "service_reference",
                },
            }
        });

        let envelope: IntegrationEnvelope = check_status(
            self.request(
                Method::POST,
                api_key,
                &format!("services/{service_id}/integrations"),
            )?
            .json(&payload)
            .send()
            .await
            .map_err(Error::PagerDutyRequest)?,
        )
        .await?
        .json()
        .await
        .map_err(Error::PagerDutyRequest)?;

        let integration_key = envelope.integration.integration_key.ok_or_else(|| {
            Error::PagerDutyApi {
                status: 200,
                message: format!(
                    "integration {} was created without an integration key",
                    envelope.integration.id
                ),
            }
        })?;

        Ok(Integration {
            id: envelope.integration.id,
            integration_key,
        })
    }

    async fn check_abilities(&self, api_key: &ApiKey) -> Result<()> {
        check_status(
            self.request(Method::GET, api_key, "abilities")?
                .send()
                .await
                .map_err(Error::PagerDutyRequest)?,
        )
        .await?;
        Ok(())
    }
}
