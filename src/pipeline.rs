// src/pipeline.rs

use crate::config::{Config, ReportSection};
use crate::dv::{DvCalculator, DvFigures, DvInputs, RemoteDvCalculator};
use crate::heuristics::ClaimFields;
use crate::recognition::Recognizer;
use crate::report::{self, ReportError};
use crate::session::{Session, SessionError};
use crate::upload::Upload;
use crate::valuation::{self, ServiceError, ValuationLookup};
use reqwest::Client;
use thiserror::Error;
use tracing::{Instrument, info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("unsupported file type: {0} (expected pdf, jpg or png)")]
    UnsupportedFileType(String),
    #[error("valuation lookup failed: {0}")]
    Valuation(#[source] ServiceError),
    #[error("DV calculation failed: {0}")]
    Dv(#[source] ServiceError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// The collaborators one pipeline run talks to.
pub struct Services {
    pub recognizer: Recognizer,
    pub valuation: Box<dyn ValuationLookup>,
    pub dv: Box<dyn DvCalculator>,
    pub report: ReportSection,
}

impl Services {
    pub fn from_config(cfg: &Config) -> Result<Self, reqwest::Error> {
        let client = Client::new();
        Ok(Self {
            recognizer: Recognizer::new(cfg.recognition.clone())?,
            valuation: valuation::from_config(&cfg.valuation, client.clone()),
            dv: Box::new(RemoteDvCalculator::new(client, &cfg.dv_service)),
            report: cfg.report.clone(),
        })
    }
}

/// Outcome of a full run: the figures that went into the report and the
/// rendered PDF.
#[derive(Debug)]
pub struct ClaimReport {
    pub fields: ClaimFields,
    pub pre_loss_acv: f64,
    pub figures: DvFigures,
    pub pdf: Vec<u8>,
}

/// Read claim fields out of an uploaded estimate.
///
/// Only session and file-type problems are errors; recognition trouble is
/// absorbed and shows up as lowered confidence.
pub async fn parse_estimate(
    session: &Session,
    recognizer: &Recognizer,
    upload: &mut Upload,
) -> Result<ClaimFields, PipelineError> {
    session.ensure_ready()?;
    if upload.kind().is_none() {
        return Err(PipelineError::UnsupportedFileType(upload.file_name.clone()));
    }

    let fields = recognizer
        .recognize(upload, &session.keys.recognition, session.state)
        .await;

    if fields.is_mocked() {
        warn!(file = %upload.file_name, "Estimate could not be read; figures are placeholders");
    }
    info!(
        repair_cost = fields.repair_cost,
        total_hours = fields.total_hours,
        structural_hours = fields.structural_hours,
        severity = %fields.damage_severity,
        confidence = fields.confidence,
        "Parsed"
    );
    Ok(fields)
}

/// Value the vehicle, compute DV and render the report.
pub async fn build_report(
    session: &Session,
    services: &Services,
    fields: ClaimFields,
    vin: &str,
    loss_range: f64,
) -> Result<ClaimReport, PipelineError> {
    session.ensure_ready()?;
    let span = tracing::info_span!("report", vin = %vin, state = %session.state);
    price_and_render(session, services, fields, vin, loss_range)
        .instrument(span)
        .await
}

async fn price_and_render(
    session: &Session,
    services: &Services,
    fields: ClaimFields,
    vin: &str,
    loss_range: f64,
) -> Result<ClaimReport, PipelineError> {
    let pre_loss_acv = services
        .valuation
        .pre_loss_value(vin, &session.keys.valuation)
        .await
        .map_err(PipelineError::Valuation)?;

    let inputs = DvInputs::new(pre_loss_acv, &fields, loss_range);
    let figures = services
        .dv
        .calculate(&inputs, &session.keys.dv)
        .await
        .map_err(PipelineError::Dv)?;
    info!(
        dv = figures.dv,
        post_repair = figures.post_repair,
        depreciation = figures.depreciation,
        "DV computed"
    );

    let pdf = report::generate(
        &services.report,
        &figures,
        pre_loss_acv,
        fields.repair_cost,
        &fields,
        session.state,
    )?;

    Ok(ClaimReport {
        fields,
        pre_loss_acv,
        figures,
        pdf,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecognitionSection;
    use crate::session::{ApiKeys, UsState, test_session};
    use crate::valuation::FixedValuation;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Records its inputs and answers with a flat DV.
    #[derive(Default, Clone)]
    struct RecordingDv {
        seen: Arc<Mutex<Vec<DvInputs>>>,
    }

    #[async_trait]
    impl DvCalculator for RecordingDv {
        async fn calculate(&self, inputs: &DvInputs, _api_key: &str) -> Result<DvFigures, ServiceError> {
            self.seen.lock().unwrap().push(inputs.clone());
            Ok(DvFigures {
                dv: 1000.0,
                post_repair: inputs.pre_loss_acv - 1000.0,
                depreciation: 0.0,
            })
        }
    }

    struct FailingValuation;

    #[async_trait]
    impl ValuationLookup for FailingValuation {
        async fn pre_loss_value(&self, _vin: &str, _api_key: &str) -> Result<f64, ServiceError> {
            Err(ServiceError::NotConfigured("valuation base_url"))
        }
    }

    fn offline_recognizer() -> Recognizer {
        Recognizer::new(RecognitionSection {
            endpoint: "http://127.0.0.1:1/predict".to_string(),
            timeout_secs: Some(5),
            ..RecognitionSection::default()
        })
        .unwrap()
    }

    fn services(valuation: Box<dyn ValuationLookup>, dv: Box<dyn DvCalculator>) -> Services {
        Services {
            recognizer: offline_recognizer(),
            valuation,
            dv,
            report: ReportSection::default(),
        }
    }

    #[tokio::test]
    async fn test_unready_session_is_rejected() {
        let session = Session::new(
            UsState::MO,
            ApiKeys {
                recognition: "k".into(),
                valuation: "k".into(),
                dv: "k".into(),
            },
        );
        let mut upload = Upload::from_bytes("estimate.pdf", vec![1, 2, 3]);
        let err = parse_estimate(&session, &offline_recognizer(), &mut upload)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Session(SessionError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_unsupported_upload_is_rejected() {
        let session = test_session(UsState::MO);
        let mut upload = Upload::from_bytes("estimate.docx", vec![1, 2, 3]);
        let err = parse_estimate(&session, &offline_recognizer(), &mut upload)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFileType(name) if name == "estimate.docx"));
    }

    #[tokio::test]
    async fn test_full_run_with_unreachable_recognition() {
        let session = test_session(UsState::TX);
        let dv = Box::new(RecordingDv::default());
        let services = services(Box::new(FixedValuation { value: 16_000.0 }), dv);

        let mut upload = Upload::from_bytes("estimate.png", vec![0x89, b'P', b'N', b'G']);
        let fields = parse_estimate(&session, &services.recognizer, &mut upload)
            .await
            .unwrap();
        assert!(fields.is_mocked());

        let report = build_report(&session, &services, fields, "1GYKNCRS4NZ155289", 10_000.0)
            .await
            .unwrap();
        assert_eq!(report.pre_loss_acv, 16_000.0);
        assert_eq!(report.figures.dv, 1000.0);
        assert_eq!(report.figures.post_repair, 15_000.0);
        assert!(report.pdf.starts_with(b"%PDF"));
        assert_eq!(report.fields.repair_cost, 5000.0);
    }

    #[tokio::test]
    async fn test_dv_receives_claim_figures() {
        let session = test_session(UsState::IN);
        let dv = RecordingDv::default();
        let seen = dv.seen.clone();
        let services = services(Box::new(FixedValuation { value: 20_000.0 }), Box::new(dv));
        let fields = crate::fallback::fallback_fields("estimate.pdf", UsState::IN);

        build_report(&session, &services, fields, "VIN", 7_500.0).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![DvInputs {
                pre_loss_acv: 20_000.0,
                repair_cost: 5508.0,
                total_hours: 62.3,
                structural_hours: 1,
                loss_range: 7_500.0,
            }]
        );
    }

    #[tokio::test]
    async fn test_valuation_failure_propagates() {
        let session = test_session(UsState::MO);
        let services = services(Box::new(FailingValuation), Box::new(RecordingDv::default()));
        let fields = ClaimFields::unrecoverable();

        let err = build_report(&session, &services, fields, "VIN", 10_000.0)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Valuation(_)));
    }
}
