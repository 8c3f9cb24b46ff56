use std::time::Instant;

use kube::Client;
use tokio::time::{interval, MissedTickBehavior};
use tracing::*;

use crate::config::{OperatorConfig, PAGERDUTY_API_SECRET_KEY, PAGERDUTY_API_SECRET_NAME};
use crate::controllers::pagerdutyintegration::{read_api_key, KubeApi, KubeClient};
use crate::pagerduty::{PagerDutyApi, PagerDutyClient};
use crate::{HeartbeatMetrics, HeartbeatOutcome};

/// Check the PagerDuty API every `heartbeat_interval` until the process exits
pub async fn run(client: Client, metrics: HeartbeatMetrics, config: OperatorConfig) {
    let kube = KubeApi::new(client);
    let pagerduty = PagerDutyClient::new(config.pagerduty_api_url.clone());

    let mut ticker = interval(config.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        tick(&kube, &pagerduty, &metrics, &config.operator_namespace).await;
    }
}

#[instrument(skip_all)]
pub async fn tick(
    kube: &dyn KubeClient,
    pagerduty: &dyn PagerDutyApi,
    metrics: &HeartbeatMetrics,
    namespace: &str,
) -> HeartbeatOutcome {
    let api_key = match read_api_key(
        kube,
        namespace,
        PAGERDUTY_API_SECRET_NAME,
        PAGERDUTY_API_SECRET_KEY,
    )
    .await
    {
        Ok(api_key) => api_key,
        Err(e) => {
            warn!("heartbeat could not read the PagerDuty API key: {e}");
            metrics.record(HeartbeatOutcome::SecretError, None);
            return HeartbeatOutcome::SecretError;
        }
    };

    let start = Instant::now();
    match pagerduty.check_abilities(&api_key).await {
        Ok(()) => {
            let elapsed = start.elapsed();
            debug!(?elapsed, "PagerDuty heartbeat succeeded");
            metrics.record(HeartbeatOutcome::Success, Some(elapsed));
            HeartbeatOutcome::Success
        }
        Err(e) => {
            warn!("PagerDuty heartbeat failed: {e}");
            metrics.record(HeartbeatOutcome::ApiError, None);
            HeartbeatOutcome::ApiError
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;

    use super::*;
    use crate::controllers::pagerdutyintegration::fakes::{FakeKube, FakePagerDuty};

    fn kube_with_key(key: &[u8]) -> FakeKube {
        let kube = FakeKube::default();
        kube.insert_secret(Secret {
            metadata: ObjectMeta {
                name: Some(PAGERDUTY_API_SECRET_NAME.into()),
                namespace: Some("pagerduty-operator".into()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                PAGERDUTY_API_SECRET_KEY.to_string(),
                ByteString(key.to_vec()),
            )])),
            ..Default::default()
        });
        kube
    }

    fn outcomes(metrics: &HeartbeatMetrics, outcome: &str) -> u64 {
        metrics.total.with_label_values(&[outcome]).get()
    }

    #[tokio::test]
    async fn healthy_api_is_up() {
        let metrics = HeartbeatMetrics::default();
        let outcome = tick(
            &kube_with_key(b"u+key"),
            &FakePagerDuty::default(),
            &metrics,
            "pagerduty-operator",
        )
        .await;

        assert_eq!(outcome, HeartbeatOutcome::Success);
        assert_eq!(metrics.api_up.get(), 1);
        assert_eq!(metrics.duration.get_sample_count(), 1);
        assert_eq!(outcomes(&metrics, "success"), 1);
    }

    #[tokio::test]
    async fn missing_secret_is_a_secret_error() {
        let metrics = HeartbeatMetrics::default();
        let outcome = tick(
            &FakeKube::default(),
            &FakePagerDuty::default(),
            &metrics,
            "pagerduty-operator",
        )
        .await;

        assert_eq!(outcome, HeartbeatOutcome::SecretError);
        assert_eq!(metrics.api_up.get(), 0);
        assert_eq!(outcomes(&metrics, "secret_error"), 1);
    }

    #[tokio::test]
    async fn rejected_key_is_an_api_error() {
        let metrics = HeartbeatMetrics::default();
        let pagerduty = FakePagerDuty::default();
        *pagerduty.abilities_status.lock().unwrap() = Some(401);

        let outcome = tick(
            &kube_with_key(b"u+key"),
            &pagerduty,
            &metrics,
            "pagerduty-operator",
        )
        .await;

        assert_eq!(outcome, HeartbeatOutcome::ApiError);
        assert_eq!(metrics.duration.get_sample_count(), 0);
        assert_eq!(outcomes(&metrics, "api_error"), 1);

        // failures never stop the next attempt from succeeding
        *pagerduty.abilities_status.lock().unwrap() = None;
        let outcome = tick(
            &kube_with_key(b"u+key"),
            &pagerduty,
            &metrics,
            "pagerduty-operator",
        )
        .await;
        assert_eq!(outcome, HeartbeatOutcome::Success);
        assert_eq!(metrics.api_up.get(), 1);
    }
}
