// src/valuation.rs

use crate::config::{ValuationBackend, ValuationSection};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use urlencoding::encode;

/// Failure talking to one of the pricing collaborators.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("service returned an unusable figure: {0}")]
    InvalidFigure(f64),
}

/// Looks up a vehicle's pre-loss market value.
#[async_trait]
pub trait ValuationLookup: Send + Sync {
    async fn pre_loss_value(&self, vin: &str, api_key: &str) -> Result<f64, ServiceError>;
}

/// Returns one configured value for every vehicle.
pub struct FixedValuation {
    pub value: f64,
}

#[async_trait]
impl ValuationLookup for FixedValuation {
    async fn pre_loss_value(&self, vin: &str, _api_key: &str) -> Result<f64, ServiceError> {
        info!(vin = %vin, value = self.value, "Using configured pre-loss value");
        Ok(self.value)
    }
}

#[derive(Debug, Deserialize)]
struct ValuationResponse {
    value: f64,
}

/// Queries a market-value service: `GET {base_url}?vin=...` answering
/// `{"value": <number>}`.
pub struct RemoteValuation {
    client: Client,
    base_url: String,
}

impl RemoteValuation {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ValuationLookup for RemoteValuation {
    async fn pre_loss_value(&self, vin: &str, api_key: &str) -> Result<f64, ServiceError> {
        if self.base_url.is_empty() {
            return Err(ServiceError::NotConfigured("valuation base_url"));
        }
        let url = format!("{}?vin={}", self.base_url, encode(vin));
        info!(url = %url, "Looking up pre-loss value");

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status { status, body });
        }

        let parsed: ValuationResponse = response.json().await?;
        if !parsed.value.is_finite() || parsed.value < 0.0 {
            return Err(ServiceError::InvalidFigure(parsed.value));
        }
        Ok(parsed.value)
    }
}

/// Build the lookup selected in the config.
pub fn from_config(section: &ValuationSection, client: Client) -> Box<dyn ValuationLookup> {
    match section.backend {
        ValuationBackend::Fixed => Box::new(FixedValuation {
            value: section.pre_loss_acv,
        }),
        ValuationBackend::Remote => Box::new(RemoteValuation::new(client, section.base_url.clone())),
    }
}
