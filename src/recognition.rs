// src/recognition.rs

use crate::config::RecognitionSection;
use crate::fallback;
use crate::heuristics::{self, ClaimFields};
use crate::session::UsState;
use crate::upload::Upload;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;
use thiserror::Error;
use tracing::{Instrument, error, info, warn};

/// Confidence assumed when the prediction does not report one.
const DEFAULT_PREDICTION_CONFIDENCE: f64 = 0.9;

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("HTTP {0}")]
    Status(u16),
    #[error("Low Confidence ({0:.2})")]
    LowConfidence(f64),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unexpected prediction shape: {0}")]
    Shape(String),
    #[error("could not read upload: {0}")]
    Io(#[from] std::io::Error),
}

impl RecognitionError {
    /// Recoverable failures are answered with the fallback estimate; the
    /// rest with the zero-confidence mock record.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Status(_) | Self::LowConfidence(_))
    }
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    document: PredictedDocument,
}

#[derive(Debug, Deserialize)]
struct PredictedDocument {
    inference: Inference,
}

#[derive(Debug, Deserialize)]
struct Inference {
    prediction: Map<String, Value>,
}

/// Prediction after boundary validation: an overall confidence and the
/// named object fields in response order.
#[derive(Debug)]
pub struct Prediction {
    pub confidence: f64,
    pub fields: Vec<(String, Option<String>)>,
}

impl Prediction {
    fn from_map(map: Map<String, Value>) -> Result<Self, RecognitionError> {
        let mut confidence = DEFAULT_PREDICTION_CONFIDENCE;
        let mut fields = Vec::new();

        for (name, raw) in map {
            if name == "confidence" {
                confidence = raw
                    .as_f64()
                    .ok_or_else(|| RecognitionError::Shape(format!("confidence is {raw}")))?;
                continue;
            }
            // lists and scalars carry no single value
            let Value::Object(mut field) = raw else {
                continue;
            };
            let text = match field.remove("value") {
                None => None,
                Some(Value::String(s)) => Some(s),
                Some(other) => {
                    return Err(RecognitionError::Shape(format!(
                        "field {name:?} has non-text value {other}"
                    )));
                }
            };
            fields.push((name, text));
        }

        Ok(Self { confidence, fields })
    }

    /// All field values joined into one text blob.
    pub fn text(&self) -> String {
        self.fields
            .iter()
            .filter_map(|(_, v)| v.as_deref())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Validate a raw service response and return the recognised text.
pub fn interpret_response(
    status: u16,
    body: &[u8],
    min_confidence: f64,
) -> Result<String, RecognitionError> {
    if status != 200 {
        return Err(RecognitionError::Status(status));
    }

    let response: PredictResponse = serde_json::from_slice(body)?;
    let prediction = Prediction::from_map(response.document.inference.prediction)?;

    if prediction.confidence < min_confidence {
        return Err(RecognitionError::LowConfidence(prediction.confidence));
    }

    info!(
        confidence = prediction.confidence,
        fields = prediction.fields.len(),
        "Prediction accepted"
    );
    Ok(prediction.text())
}

/// Turn the outcome of a recognition call into a fields record. Never fails.
pub fn route(
    outcome: Result<String, RecognitionError>,
    file_name: &str,
    state: UsState,
) -> ClaimFields {
    match outcome {
        Ok(text) => heuristics::extract_claim_fields(&text, state),
        Err(e) if e.is_recoverable() => {
            warn!(error = %e, file = %file_name, "Recognition warning - fallback");
            fallback::fallback_fields(file_name, state)
        }
        Err(e) => {
            error!(error = %e, file = %file_name, "Recognition failed - mock");
            ClaimFields::unrecoverable()
        }
    }
}

/// Client for the external document recognition service.
pub struct Recognizer {
    client: Client,
    section: RecognitionSection,
}

impl Recognizer {
    pub fn new(section: RecognitionSection) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder();
        if let Some(secs) = section.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            client: builder.build()?,
            section,
        })
    }

    /// Recognise an uploaded estimate. Every failure is absorbed into a
    /// fallback or mock record; callers tell them apart by confidence.
    pub async fn recognize(&self, upload: &mut Upload, api_key: &str, state: UsState) -> ClaimFields {
        let span = tracing::info_span!("recognition", file = %upload.file_name, state = %state);
        let outcome = self.submit(upload, api_key).instrument(span).await;
        route(outcome, &upload.file_name, state)
    }

    async fn submit(&self, upload: &mut Upload, api_key: &str) -> Result<String, RecognitionError> {
        upload.content.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        upload.content.read_to_end(&mut bytes)?;

        let mut part = Part::bytes(bytes).file_name(upload.file_name.clone());
        if let Some(kind) = upload.kind() {
            part = part.mime_str(kind.mime())?;
        }
        let form = Form::new().part("document", part);

        info!(endpoint = %self.section.endpoint, "Submitting document");
        let response = self
            .client
            .post(&self.section.endpoint)
            .header("Authorization", format!("Token {api_key}"))
            .multipart(form)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.bytes().await?;
        interpret_response(status, &body, self.section.min_confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::{EXTRACTED_CONFIDENCE, FALLBACK_CONFIDENCE, MOCK_CONFIDENCE};

    fn body(prediction: &str) -> Vec<u8> {
        format!(r#"{{"document": {{"inference": {{"prediction": {prediction}}}}}}}"#).into_bytes()
    }

    #[test]
    fn test_accepts_confident_prediction() {
        let raw = body(
            r#"{
                "confidence": 0.95,
                "total_amount": {"value": "$7,250.00", "confidence": 0.99},
                "line_items": [{"description": "frame pull"}],
                "notes": {"value": "18.5 hours labor, moderate damage"},
                "locale": "en"
            }"#,
        );
        let text = interpret_response(200, &raw, 0.7).unwrap();
        assert_eq!(text, "$7,250.00 18.5 hours labor, moderate damage");
    }

    #[test]
    fn test_missing_confidence_defaults_high() {
        let raw = body(r#"{"notes": {"value": "severe"}}"#);
        assert_eq!(interpret_response(200, &raw, 0.7).unwrap(), "severe");
    }

    #[test]
    fn test_field_without_value_contributes_nothing() {
        let raw = body(r#"{"vendor": {"confidence": 0.4}, "notes": {"value": "minor"}}"#);
        assert_eq!(interpret_response(200, &raw, 0.7).unwrap(), "minor");
    }

    #[test]
    fn test_non_text_values_route_to_mock() {
        for value in ["7250.0", "null", "true", "[\"a\"]"] {
            let raw = body(&format!(r#"{{"total_amount": {{"value": {value}}}}}"#));
            let outcome = interpret_response(200, &raw, 0.7);
            assert!(
                matches!(outcome, Err(RecognitionError::Shape(_))),
                "value {value} was accepted"
            );
            let fields = route(outcome, "estimate.pdf", UsState::TX);
            assert_eq!(fields, ClaimFields::unrecoverable());
        }
    }

    #[test]
    fn test_confidence_threshold_is_inclusive() {
        let at_threshold = body(r#"{"confidence": 0.7, "notes": {"value": "$2,000.00 minor"}}"#);
        let fields = route(interpret_response(200, &at_threshold, 0.7), "estimate.pdf", UsState::MO);
        assert_eq!(fields.confidence, EXTRACTED_CONFIDENCE);
        assert_eq!(fields.repair_cost, 2000.0);

        let below = body(r#"{"confidence": 0.69, "notes": {"value": "$2,000.00 minor"}}"#);
        let outcome = interpret_response(200, &below, 0.7);
        assert!(matches!(outcome, Err(RecognitionError::LowConfidence(_))));
        let fields = route(outcome, "estimate.pdf", UsState::MO);
        assert_eq!(fields.confidence, FALLBACK_CONFIDENCE);
        assert_eq!(fields.repair_cost, 5508.0);
    }

    #[test]
    fn test_non_200_is_recoverable() {
        let err = interpret_response(401, b"unauthorized", 0.7).unwrap_err();
        assert!(matches!(err, RecognitionError::Status(401)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_low_confidence_is_recoverable() {
        let raw = body(r#"{"confidence": 0.5, "notes": {"value": "$9,999.00"}}"#);
        let err = interpret_response(200, &raw, 0.7).unwrap_err();
        assert!(matches!(err, RecognitionError::LowConfidence(c) if c == 0.5));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_malformed_json_is_unrecoverable() {
        let err = interpret_response(200, b"{not json", 0.7).unwrap_err();
        assert!(matches!(err, RecognitionError::Malformed(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_wrong_shape_is_unrecoverable() {
        let err = interpret_response(200, br#"{"document": {}}"#, 0.7).unwrap_err();
        assert!(!err.is_recoverable());

        let raw = body(r#"{"confidence": "high"}"#);
        let err = interpret_response(200, &raw, 0.7).unwrap_err();
        assert!(matches!(err, RecognitionError::Shape(_)));
    }

    #[test]
    fn test_low_confidence_routes_to_fallback() {
        let raw = body(r#"{"confidence": 0.5}"#);
        let fields = route(interpret_response(200, &raw, 0.7), "estimate.pdf", UsState::TX);
        assert_eq!(fields.confidence, FALLBACK_CONFIDENCE);
        assert_eq!(fields.repair_cost, 5508.0);
    }

    #[test]
    fn test_malformed_routes_to_mock() {
        let fields = route(interpret_response(200, b"<html>", 0.7), "estimate.pdf", UsState::TX);
        assert_eq!(fields, ClaimFields::unrecoverable());
        assert_eq!(fields.confidence, MOCK_CONFIDENCE);
    }

    #[test]
    fn test_success_routes_to_extractor() {
        let raw = body(r#"{"notes": {"value": "total $3,100.00, 20 hours, minor"}}"#);
        let fields = route(interpret_response(200, &raw, 0.7), "estimate.pdf", UsState::MO);
        assert_eq!(fields.confidence, EXTRACTED_CONFIDENCE);
        assert_eq!(fields.repair_cost, 3100.0);
        assert_eq!(fields.total_hours, 20.0);
        assert_eq!(fields.damage_severity.label, "minor");
    }

    #[tokio::test]
    async fn test_unreachable_service_yields_mock() {
        let section = RecognitionSection {
            endpoint: "http://127.0.0.1:1/predict".to_string(),
            timeout_secs: Some(5),
            ..RecognitionSection::default()
        };
        let recognizer = Recognizer::new(section).unwrap();
        let mut upload = Upload::from_bytes("estimate.pdf", b"%PDF-1.4 test".to_vec());

        let fields = recognizer.recognize(&mut upload, "key", UsState::IN).await;
        assert!(fields.is_mocked());
        assert_eq!(fields.damage_severity.label, "Moderate");
    }

    /// Accept one request on a local port, answer it with `reply`, and hand
    /// back the raw request bytes.
    async fn serve_once(reply: Vec<u8>) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/predict", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                if request_complete(&request) {
                    break;
                }
            }

            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                reply.len()
            );
            stream.write_all(head.as_bytes()).await.unwrap();
            stream.write_all(&reply).await.unwrap();
            stream.shutdown().await.unwrap();
            request
        });

        (endpoint, handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let Some(head_end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let head = String::from_utf8_lossy(&request[..head_end]);
        let body_len = request.len() - head_end - 4;
        match header(&head, "content-length") {
            Some(len) => body_len >= len.parse::<usize>().unwrap(),
            None => request.ends_with(b"0\r\n\r\n"),
        }
    }

    fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
        head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }

    fn wire_recognizer(endpoint: String) -> Recognizer {
        Recognizer::new(RecognitionSection {
            endpoint,
            timeout_secs: Some(10),
            ..RecognitionSection::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_request_carries_token_and_document_part() {
        let reply = body(r#"{"notes": {"value": "total $3,100.00, 20 hours, severe frame damage"}}"#);
        let (endpoint, server) = serve_once(reply).await;
        let recognizer = wire_recognizer(endpoint);
        let mut upload = Upload::from_bytes("estimate.pdf", b"%PDF-1.4 body-shop-estimate".to_vec());

        let fields = recognizer.recognize(&mut upload, "KEY123", UsState::TX).await;

        let request = server.await.unwrap();
        let text = String::from_utf8_lossy(&request);
        let head_end = text.find("\r\n\r\n").unwrap();
        assert!(text.starts_with("POST /predict "));
        assert_eq!(header(&text[..head_end], "authorization"), Some("Token KEY123"));
        assert!(text.contains(r#"name="document""#));
        assert!(text.contains(r#"filename="estimate.pdf""#));
        assert!(text.contains("%PDF-1.4 body-shop-estimate"));

        assert_eq!(fields.confidence, EXTRACTED_CONFIDENCE);
        assert_eq!(fields.repair_cost, 3100.0);
        assert_eq!(fields.total_hours, 20.0);
        assert_eq!(fields.structural_hours, 1);
        assert_eq!(fields.damage_severity.label, "frame");
    }

    #[tokio::test]
    async fn test_upload_is_rewound_before_sending() {
        let reply = body(r#"{"notes": {"value": "minor"}}"#);
        let (endpoint, server) = serve_once(reply).await;
        let recognizer = wire_recognizer(endpoint);
        let mut upload = Upload::from_bytes("scan.png", b"PNG-estimate-payload".to_vec());
        upload.content.seek(SeekFrom::End(0)).unwrap();

        let fields = recognizer.recognize(&mut upload, "KEY123", UsState::MO).await;

        let request = server.await.unwrap();
        let text = String::from_utf8_lossy(&request);
        assert!(text.contains("PNG-estimate-payload"));
        assert_eq!(fields.damage_severity.label, "minor");
        assert_eq!(fields.confidence, EXTRACTED_CONFIDENCE);
    }
}
