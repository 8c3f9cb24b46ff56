use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;

use super::{object_meta, SECRET_SUFFIX};
use crate::pagerduty::{ApiKey, Integration};
use crate::resources::pagerdutyintegrations::PagerDutyIntegration;
use crate::{Error, Result};

/// Key under which the integration key is delivered to the managed cluster
pub const PAGERDUTY_KEY: &str = "PAGERDUTY_KEY";

pub fn integration_secret(pdi: &PagerDutyIntegration, integration: &Integration) -> Secret {
    Secret {
        metadata: object_meta(pdi, SECRET_SUFFIX),
        type_: Some("Opaque".into()),
        data: Some(BTreeMap::from_iter([(
            PAGERDUTY_KEY.into(),
            ByteString(integration.integration_key.clone().into_bytes()),
        )])),
        ..Default::default()
    }
}

/// Pull an API key out of `secret`. `location` names the secret in errors.
pub fn api_key_from_secret(secret: &Secret, key: &str, location: &str) -> Result<ApiKey> {
    let value = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .ok_or_else(|| Error::SecretKeyNotFound(key.into(), location.into()))?;

    let value = std::str::from_utf8(&value.0).map_err(|_| Error::InvalidApiKey)?;
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::SecretKeyNotFound(key.into(), location.into()));
    }

    Ok(ApiKey::new(value))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::integration;
    use super::*;

    fn secret_with(key: &str, value: &[u8]) -> Secret {
        Secret {
            data: Some(BTreeMap::from([(key.to_string(), ByteString(value.to_vec()))])),
            ..Default::default()
        }
    }

    #[test]
    fn integration_key_is_delivered() {
        let secret = integration_secret(
            &integration(),
            &Integration {
                id: "PINT".into(),
                integration_key: "abc123".into(),
            },
        );

        assert_eq!(secret.metadata.name.as_deref(), Some("osd-cluster-a-pd-secret"));
        assert_eq!(
            secret.data.unwrap()[PAGERDUTY_KEY],
            ByteString(b"abc123".to_vec())
        );
    }

    #[test]
    fn api_key_is_trimmed() {
        let key = api_key_from_secret(
            &secret_with("PAGERDUTY_API_KEY", b"u+token\n"),
            "PAGERDUTY_API_KEY",
            "ns/name",
        )
        .unwrap();
        assert_eq!(key.expose(), "u+token");
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        let err = api_key_from_secret(&secret_with("OTHER", b"x"), "PAGERDUTY_API_KEY", "ns/name")
            .unwrap_err();
        assert!(matches!(err, Error::SecretKeyNotFound(ref k, ref l) if k == "PAGERDUTY_API_KEY" && l == "ns/name"));

        let err = api_key_from_secret(
            &secret_with("PAGERDUTY_API_KEY", b"  "),
            "PAGERDUTY_API_KEY",
            "ns/name",
        )
        .unwrap_err();
        assert!(matches!(err, Error::SecretKeyNotFound(_, _)));
    }

    #[test]
    fn non_utf8_key_is_rejected() {
        let err = api_key_from_secret(
            &secret_with("PAGERDUTY_API_KEY", &[0xff, 0xfe]),
            "PAGERDUTY_API_KEY",
            "ns/name",
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidApiKey));
    }
}
