// src/dv.rs

use crate::config::DvSection;
use crate::heuristics::ClaimFields;
use crate::valuation::ServiceError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Everything the diminished-value calculation needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DvInputs {
    pub pre_loss_acv: f64,
    pub repair_cost: f64,
    pub total_hours: f64,
    pub structural_hours: u32,
    pub loss_range: f64,
}

impl DvInputs {
    pub fn new(pre_loss_acv: f64, fields: &ClaimFields, loss_range: f64) -> Self {
        Self {
            pre_loss_acv,
            repair_cost: fields.repair_cost,
            total_hours: fields.total_hours,
            structural_hours: fields.structural_hours,
            loss_range,
        }
    }
}

/// DV amount, post-repair value and the depreciation component.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DvFigures {
    pub dv: f64,
    pub post_repair: f64,
    pub depreciation: f64,
}

#[async_trait]
pub trait DvCalculator: Send + Sync {
    async fn calculate(&self, inputs: &DvInputs, api_key: &str) -> Result<DvFigures, ServiceError>;
}

/// Delegates the calculation to an external service that accepts
/// [`DvInputs`] as JSON and answers with [`DvFigures`].
pub struct RemoteDvCalculator {
    client: Client,
    url: String,
}

impl RemoteDvCalculator {
    pub fn new(client: Client, section: &DvSection) -> Self {
        Self {
            client,
            url: section.url.clone(),
        }
    }
}

#[async_trait]
impl DvCalculator for RemoteDvCalculator {
    async fn calculate(&self, inputs: &DvInputs, api_key: &str) -> Result<DvFigures, ServiceError> {
        if self.url.is_empty() {
            return Err(ServiceError::NotConfigured("dv_service url"));
        }
        info!(
            url = %self.url,
            pre_loss_acv = inputs.pre_loss_acv,
            repair_cost = inputs.repair_cost,
            structural_hours = inputs.structural_hours,
            "Requesting DV calculation"
        );

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(inputs)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status { status, body });
        }

        let figures: DvFigures = response.json().await?;
        for v in [figures.dv, figures.post_repair, figures.depreciation] {
            if !v.is_finite() {
                return Err(ServiceError::InvalidFigure(v));
            }
        }
        Ok(figures)
    }
}
