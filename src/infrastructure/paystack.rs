use crate::domain::ids::GatewayReference;
use crate::domain::money::Amount;
use crate::domain::ports::{
    ChargeRequest, ChargeSession, ChargeStatus, ChargeVerification, GatewayError, PaymentGateway,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, header};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.paystack.co";

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub base_url: String,
    /// Where Paystack redirects the payer after checkout.
    pub callback_url: Option<String>,
    pub timeout: Duration,
}

/// Paystack wraps every payload in `{status, message, data}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: Option<String>,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    /// Minor units (kobo for NGN).
    amount: i64,
    currency: String,
    paid_at: Option<DateTime<Utc>>,
}

/// [`PaymentGateway`] over the Paystack transaction API.
#[derive(Clone)]
pub struct PaystackClient {
    client: Client,
    config: PaystackConfig,
}

impl PaystackClient {
    pub fn new(config: PaystackConfig) -> Result<Self, GatewayError> {
        if config.secret_key.trim().is_empty() {
            return Err(GatewayError::NotConfigured(
                "PAYSTACK_SECRET_KEY is empty".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::NotConfigured(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;
        if !envelope.status {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: envelope.message,
            });
        }
        envelope
            .data
            .ok_or_else(|| GatewayError::Malformed(format!("no data: {}", envelope.message)))
    }
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    async fn initialize(&self, request: ChargeRequest) -> Result<ChargeSession, GatewayError> {
        let mut body = json!({
            "email": request.email,
            "amount": to_minor_units(request.amount)?.to_string(),
            "currency": request.currency.as_str(),
            "reference": request.reference.as_str(),
            "metadata": request.metadata,
        });
        if let Some(callback) = &self.config.callback_url {
            body["callback_url"] = json!(callback);
        }

        tracing::debug!(reference = %request.reference, "paystack initialize");
        let response = self
            .client
            .post(self.url("/transaction/initialize"))
            .bearer_auth(&self.config.secret_key)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let data: InitializeData = Self::read(response).await?;
        Ok(ChargeSession {
            gateway_reference: GatewayReference::new(data.reference),
            authorization_url: data.authorization_url,
            access_code: data.access_code,
        })
    }

    async fn verify(&self, reference: &GatewayReference) -> Result<ChargeVerification, GatewayError> {
        tracing::debug!(%reference, "paystack verify");
        let response = self
            .client
            .get(self.url(&format!("/transaction/verify/{reference}")))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(ChargeVerification {
                status: ChargeStatus::Unknown,
                amount: Decimal::ZERO,
                currency: String::new(),
                paid_at: None,
            });
        }

        let data: VerifyData = Self::read(response).await?;
        Ok(ChargeVerification {
            status: charge_status(&data.status),
            amount: from_minor_units(data.amount),
            currency: data.currency,
            paid_at: data.paid_at,
        })
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(err.to_string())
    }
}

fn map_http_error(status: StatusCode, body: &str) -> GatewayError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        GatewayError::Transport(format!("paystack answered {status}"))
    } else {
        GatewayError::Rejected {
            status: status.as_u16(),
            message: body.chars().take(200).collect(),
        }
    }
}

fn charge_status(status: &str) -> ChargeStatus {
    match status {
        "success" => ChargeStatus::Success,
        "failed" | "reversed" => ChargeStatus::Failed,
        "abandoned" | "ongoing" | "pending" | "processing" | "queued" => ChargeStatus::Processing,
        _ => ChargeStatus::Unknown,
    }
}

fn to_minor_units(amount: Amount) -> Result<i64, GatewayError> {
    let minor = amount
        .value()
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or_else(|| GatewayError::Malformed(format!("{amount} is out of range")))?;
    if !minor.fract().is_zero() {
        return Err(GatewayError::Malformed(format!(
            "{amount} has more precision than the currency's minor unit"
        )));
    }
    minor
        .to_i64()
        .ok_or_else(|| GatewayError::Malformed(format!("{amount} is out of range")))
}

fn from_minor_units(minor: i64) -> Decimal {
    (Decimal::from(minor) / Decimal::ONE_HUNDRED).normalize()
}
