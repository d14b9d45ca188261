//! Typed gateway client.
//!
//! Thin wrapper over the four HTTP operations of the payment gateway:
//! create intent, create instrument, attach instrument, check status.
//! Holds no state between calls; each operation is a single round trip.

use crate::config::GatewayConfig;
use crate::error::PaymentError;
use crate::models::{
    AttachResult, AuthorizationIntent, AuthorizationStatus, BillingDetails, ChallengeDescriptor,
    ChallengeKind, InstrumentSelection, PaymentInstrument, StatusSnapshot,
};
use anyhow::{anyhow, Context};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

/// Client for the payment gateway API.
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    config: GatewayConfig,
}

#[derive(Debug, Serialize)]
struct CreateIntentRequest<'a> {
    amount: u64,
    currency: &'a str,
    reference: &'a str,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: Option<String>,
    status: AuthorizationStatus,
    last_error: Option<LastError>,
}

#[derive(Debug, Serialize)]
struct CreateInstrumentRequest<'a> {
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<CardFields>,
    billing: &'a BillingDetails,
}

#[derive(Debug, Serialize)]
struct CardFields {
    number: String,
    exp_month: u8,
    exp_year: u16,
    cvc: String,
}

#[derive(Debug, Deserialize)]
struct InstrumentResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct AttachRequest<'a> {
    instrument_id: &'a str,
    client_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct AttachResponse {
    status: AuthorizationStatus,
    next_action: Option<NextAction>,
    last_error: Option<LastError>,
}

#[derive(Debug, Deserialize)]
struct NextAction {
    redirect: Option<RedirectAction>,
}

#[derive(Debug, Deserialize)]
struct RedirectAction {
    url: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: AuthorizationStatus,
    last_error: Option<LastError>,
}

#[derive(Debug, Deserialize)]
struct LastError {
    code: String,
    message: String,
}

/// Gateway error envelope, `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    error: GatewayErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorDetail {
    code: String,
    message: String,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build gateway HTTP client")?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.key_id.is_empty() && !self.config.key_secret.expose_secret().is_empty()
    }

    /// Create a new authorization intent.
    ///
    /// Not retried on failure: a blind retry could leave a stale
    /// duplicate intent on the gateway side.
    pub async fn create_intent(
        &self,
        amount: u64,
        currency: &str,
        reference: &str,
    ) -> Result<AuthorizationIntent, PaymentError> {
        let url = format!("{}/intents", self.config.api_base_url);
        let request = CreateIntentRequest {
            amount,
            currency,
            reference,
        };

        let (status, body) = self.post_json(&url, &request).await?;
        tracing::debug!(status = %status, body = %body, "gateway create_intent response");

        if status.is_success() {
            let parsed: IntentResponse = parse_body(&body)?;
            let client_secret = parsed.client_secret.ok_or_else(|| {
                PaymentError::GatewayUnavailable(anyhow!(
                    "gateway returned intent {} without a client secret",
                    parsed.id
                ))
            })?;
            tracing::info!(
                intent_id = %parsed.id,
                amount,
                currency,
                reference,
                "authorization intent created"
            );
            Ok(AuthorizationIntent {
                id: parsed.id,
                client_secret: Secret::new(client_secret),
                amount,
                currency: currency.to_string(),
                status: parsed.status,
                failure_reason: failure_reason(parsed.last_error),
            })
        } else if status.is_client_error() {
            let detail = error_detail(&body);
            tracing::warn!(code = %detail.code, message = %detail.message, "intent creation rejected");
            Err(PaymentError::InvalidRequest(anyhow!(
                "{}: {}",
                detail.code,
                detail.message
            )))
        } else {
            Err(unavailable("create_intent", status, &body))
        }
    }

    /// Tokenize a funding source. Single-use; attached to exactly one
    /// intent. Never retried automatically: resubmitting the same
    /// rejected details cannot succeed.
    pub async fn create_instrument(
        &self,
        selection: &InstrumentSelection,
        billing: &BillingDetails,
    ) -> Result<PaymentInstrument, PaymentError> {
        let url = format!("{}/instruments", self.config.api_base_url);
        let kind = selection.kind();
        let details = match selection {
            InstrumentSelection::Card(card) => Some(CardFields {
                number: card.number.expose_secret().clone(),
                exp_month: card.exp_month,
                exp_year: card.exp_year,
                cvc: card.cvc.expose_secret().clone(),
            }),
            InstrumentSelection::Wallet(_) => None,
        };
        let request = CreateInstrumentRequest {
            kind: kind_str(kind),
            details,
            billing,
        };

        let (status, body) = self.post_json(&url, &request).await?;
        tracing::debug!(status = %status, "gateway create_instrument response");

        if status.is_success() {
            let parsed: InstrumentResponse = parse_body(&body)?;
            tracing::info!(instrument_id = %parsed.id, kind = ?kind, "payment instrument created");
            Ok(PaymentInstrument {
                id: parsed.id,
                kind,
                billing: billing.clone(),
            })
        } else if status.is_client_error() {
            let detail = error_detail(&body);
            tracing::warn!(code = %detail.code, message = %detail.message, "instrument rejected");
            Err(PaymentError::InvalidInstrument(anyhow!(
                "{}: {}",
                detail.code,
                detail.message
            )))
        } else {
            Err(unavailable("create_instrument", status, &body))
        }
    }

    /// Attach an instrument to an intent. Never retried blindly: a
    /// repeat of a lost-but-delivered attach could double-charge.
    pub async fn attach_instrument(
        &self,
        intent_id: &str,
        client_secret: &Secret<String>,
        instrument_id: &str,
    ) -> Result<AttachResult, PaymentError> {
        let url = format!("{}/intents/{}/attach", self.config.api_base_url, intent_id);
        let request = AttachRequest {
            instrument_id,
            client_secret: client_secret.expose_secret(),
        };

        let (status, body) = self.post_json(&url, &request).await?;
        tracing::debug!(status = %status, body = %body, "gateway attach_instrument response");

        if status.is_success() {
            let parsed: AttachResponse = parse_body(&body)?;
            let challenge = parsed
                .next_action
                .and_then(|a| a.redirect)
                .map(|r| ChallengeDescriptor {
                    kind: ChallengeKind::Redirect,
                    url: r.url,
                });
            tracing::info!(
                intent_id,
                instrument_id,
                status = ?parsed.status,
                challenge = challenge.is_some(),
                "instrument attached"
            );
            Ok(AttachResult {
                status: parsed.status,
                challenge,
                failure_reason: failure_reason(parsed.last_error),
            })
        } else {
            Err(classify_intent_error("attach_instrument", status, &body))
        }
    }

    /// Fetch the current status of an intent. Idempotent read; safe to
    /// call repeatedly with the same intent/secret pair.
    pub async fn check_status(
        &self,
        intent_id: &str,
        client_secret: &Secret<String>,
    ) -> Result<StatusSnapshot, PaymentError> {
        let url = format!("{}/intents/{}/status", self.config.api_base_url, intent_id);

        let response = self
            .client
            .get(&url)
            .query(&[("client_secret", client_secret.expose_secret().as_str())])
            .basic_auth(&self.config.key_id, Some(self.config.key_secret.expose_secret()))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        tracing::debug!(status = %status, body = %body, "gateway check_status response");

        if status.is_success() {
            let parsed: StatusResponse = parse_body(&body)?;
            Ok(StatusSnapshot {
                status: parsed.status,
                failure_reason: failure_reason(parsed.last_error),
            })
        } else {
            Err(classify_intent_error("check_status", status, &body))
        }
    }

    async fn post_json<T: Serialize>(
        &self,
        url: &str,
        request: &T,
    ) -> Result<(StatusCode, String), PaymentError> {
        let response = self
            .client
            .post(url)
            .basic_auth(&self.config.key_id, Some(self.config.key_secret.expose_secret()))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        Ok((status, body))
    }
}

fn kind_str(kind: crate::models::InstrumentKind) -> &'static str {
    use crate::models::InstrumentKind::*;
    match kind {
        Card => "card",
        Gcash => "gcash",
        GrabPay => "grab_pay",
        Maya => "maya",
    }
}

/// Surface the gateway's `last_error` as a failure reason, keeping the
/// error code in the logs for support lookups.
fn failure_reason(last_error: Option<LastError>) -> Option<String> {
    last_error.map(|err| {
        tracing::debug!(code = %err.code, message = %err.message, "gateway reported last error");
        err.message
    })
}

fn transport_error(err: reqwest::Error) -> PaymentError {
    PaymentError::GatewayUnavailable(anyhow::Error::new(err))
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, PaymentError> {
    serde_json::from_str(body).map_err(|e| {
        PaymentError::GatewayUnavailable(anyhow!("malformed gateway response: {}", e))
    })
}

fn error_detail(body: &str) -> GatewayErrorDetail {
    serde_json::from_str::<GatewayErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| GatewayErrorDetail {
            code: "unknown".to_string(),
            message: body.to_string(),
        })
}

fn unavailable(operation: &str, status: StatusCode, body: &str) -> PaymentError {
    tracing::error!(operation, status = %status, body = %body, "gateway unavailable");
    PaymentError::GatewayUnavailable(anyhow!("{} returned {}", operation, status))
}

/// Classify a non-2xx response on an intent-scoped route. A stale or
/// mismatched client secret shows up as 404/409 or an `intent_expired`
/// error code; those require a fresh intent rather than a retry.
fn classify_intent_error(operation: &str, status: StatusCode, body: &str) -> PaymentError {
    if status.is_server_error() {
        return unavailable(operation, status, body);
    }
    let detail = error_detail(body);
    if status == StatusCode::NOT_FOUND
        || status == StatusCode::CONFLICT
        || detail.code == "intent_expired"
        || detail.code == "secret_mismatch"
    {
        tracing::warn!(operation, code = %detail.code, "intent expired or secret mismatched");
        return PaymentError::IntentExpired;
    }
    tracing::warn!(operation, code = %detail.code, message = %detail.message, "gateway rejected request");
    PaymentError::InvalidRequest(anyhow!("{}: {}", detail.code, detail.message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            api_base_url: "https://gateway.test/v1".to_string(),
            key_id: "pk_test_123".to_string(),
            key_secret: Secret::new("sk_test_123".to_string()),
            request_timeout: Duration::from_secs(20),
            intent_reuse_ttl: Duration::from_secs(900),
        }
    }

    #[test]
    fn is_configured_requires_both_credentials() {
        let client = GatewayClient::new(test_config()).unwrap();
        assert!(client.is_configured());

        let empty = GatewayConfig {
            key_id: String::new(),
            key_secret: Secret::new(String::new()),
            ..test_config()
        };
        assert!(!GatewayClient::new(empty).unwrap().is_configured());
    }

    #[test]
    fn classify_maps_stale_secret_to_intent_expired() {
        let body = r#"{"error":{"code":"intent_expired","message":"secret no longer valid"}}"#;
        let err = classify_intent_error("attach_instrument", StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, PaymentError::IntentExpired));

        let err = classify_intent_error("check_status", StatusCode::NOT_FOUND, "{}");
        assert!(matches!(err, PaymentError::IntentExpired));
    }

    #[test]
    fn classify_maps_5xx_to_unavailable() {
        let err = classify_intent_error("check_status", StatusCode::BAD_GATEWAY, "oops");
        assert!(matches!(err, PaymentError::GatewayUnavailable(_)));
    }

    #[test]
    fn error_detail_tolerates_unstructured_bodies() {
        let detail = error_detail("upstream timeout");
        assert_eq!(detail.code, "unknown");
        assert_eq!(detail.message, "upstream timeout");
    }
}
