use crate::domain::money::{Amount, Currency};
use crate::domain::program::FeeSchedule;
use crate::error::{AdmissionError, Result};
use crate::infrastructure::paystack::{DEFAULT_BASE_URL, PaystackConfig};
use clap::Args;
use rust_decimal::Decimal;
use std::time::Duration;

/// Tunables shared by the lifecycle and reconciliation engines.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub fees: FeeSchedule,
    /// How long an applicant has to accept an offer.
    pub acceptance_window: chrono::Duration,
    /// Upper bound on any single payment gateway call.
    pub gateway_timeout: Duration,
    /// Attempts for an optimistic read-modify-write before giving up.
    pub write_attempts: u32,
    pub number_prefix: String,
    /// Attempts to claim a free application number.
    pub number_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fees: FeeSchedule::default(),
            acceptance_window: chrono::Duration::days(14),
            gateway_timeout: Duration::from_secs(15),
            write_attempts: 5,
            number_prefix: "UNI".to_string(),
            number_attempts: 8,
        }
    }
}

/// Command-line / environment view of [`EngineConfig`].
#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    /// Currency every fee is charged in.
    #[arg(long, env = "ADMISSIONS_CURRENCY", default_value = "NGN")]
    pub currency: String,

    #[arg(long, env = "ADMISSIONS_DEFAULT_FORM_FEE", default_value = "10000")]
    pub default_form_fee: Decimal,

    #[arg(long, env = "ADMISSIONS_DEFAULT_ACCEPTANCE_FEE", default_value = "50000")]
    pub default_acceptance_fee: Decimal,

    #[arg(long, env = "ADMISSIONS_DEFAULT_ADMISSION_FEE", default_value = "25000")]
    pub default_admission_fee: Decimal,

    /// Days an applicant has to accept an offer.
    #[arg(long, env = "ADMISSIONS_ACCEPTANCE_WINDOW_DAYS", default_value_t = 14)]
    pub acceptance_window_days: i64,

    #[arg(long, env = "ADMISSIONS_GATEWAY_TIMEOUT_SECS", default_value_t = 15)]
    pub gateway_timeout_secs: u64,

    #[arg(long, env = "ADMISSIONS_NUMBER_PREFIX", default_value = "UNI")]
    pub number_prefix: String,
}

impl EngineArgs {
    pub fn into_config(self) -> Result<EngineConfig> {
        let defaults = EngineConfig::default();
        let window_days = self.acceptance_window_days.max(1);
        let acceptance_window = chrono::TimeDelta::try_days(window_days).ok_or_else(|| {
            AdmissionError::ValidationError(format!(
                "acceptance window of {window_days} days is out of range"
            ))
        })?;
        Ok(EngineConfig {
            fees: FeeSchedule {
                currency: Currency::new(&self.currency)?,
                default_form_fee: Amount::new(self.default_form_fee)?,
                default_acceptance_fee: Amount::new(self.default_acceptance_fee)?,
                default_admission_fee: Amount::new(self.default_admission_fee)?,
            },
            acceptance_window,
            gateway_timeout: Duration::from_secs(self.gateway_timeout_secs.max(1)),
            number_prefix: self.number_prefix,
            ..defaults
        })
    }
}

/// Paystack credentials for the reconciliation commands.
#[derive(Debug, Clone, Args)]
pub struct PaystackArgs {
    #[arg(long, env = "PAYSTACK_SECRET_KEY", hide_env_values = true)]
    pub paystack_secret_key: String,

    #[arg(long, env = "PAYSTACK_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub paystack_base_url: String,

    #[arg(long, env = "PAYSTACK_CALLBACK_URL")]
    pub paystack_callback_url: Option<String>,
}

impl PaystackArgs {
    pub fn into_config(self, timeout: Duration) -> PaystackConfig {
        PaystackConfig {
            secret_key: self.paystack_secret_key,
            base_url: self.paystack_base_url,
            callback_url: self.paystack_callback_url,
            timeout,
        }
    }
}
