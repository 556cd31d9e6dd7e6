// src/heuristics/mod.rs

mod rules;

use crate::session::UsState;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Repair cost used when no monetary span is found.
pub const DEFAULT_REPAIR_COST: f64 = 5000.0;
/// Labor hours used when no hour span is found.
pub const DEFAULT_TOTAL_HOURS: f64 = 62.3;

/// Confidence assigned by each producer of a [`ClaimFields`] record.
pub const EXTRACTED_CONFIDENCE: f64 = 0.9;
pub const FALLBACK_CONFIDENCE: f64 = 0.7;
pub const MOCK_CONFIDENCE: f64 = 0.0;

/// Closed severity vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
    Unknown,
    Minor,
    Moderate,
    Severe,
    Structural,
    Frame,
    Suspension,
}

impl SeverityLevel {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word.to_lowercase().as_str() {
            "minor" => Some(Self::Minor),
            "moderate" => Some(Self::Moderate),
            "severe" => Some(Self::Severe),
            "structural" => Some(Self::Structural),
            "frame" => Some(Self::Frame),
            "suspension" => Some(Self::Suspension),
            _ => None,
        }
    }

    /// Structural keywords also count towards `structural_hours`.
    pub fn is_structural(self) -> bool {
        matches!(self, Self::Structural | Self::Frame)
    }
}

/// Severity level plus the text exactly as it appeared in the document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DamageSeverity {
    pub level: SeverityLevel,
    pub label: String,
}

impl DamageSeverity {
    pub fn unknown() -> Self {
        Self {
            level: SeverityLevel::Unknown,
            label: "Unknown".to_string(),
        }
    }

    pub fn matched(level: SeverityLevel, label: &str) -> Self {
        Self {
            level,
            label: label.to_string(),
        }
    }
}

impl fmt::Display for DamageSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Structured figures pulled out of a repair estimate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimFields {
    pub repair_cost: f64,
    pub total_hours: f64,
    pub structural_hours: u32,
    pub damage_severity: DamageSeverity,
    pub confidence: f64,
}

impl ClaimFields {
    /// Record returned when recognition failed outright. Nothing in it was
    /// read from the document.
    pub fn unrecoverable() -> Self {
        Self {
            repair_cost: DEFAULT_REPAIR_COST,
            total_hours: DEFAULT_TOTAL_HOURS,
            structural_hours: 0,
            damage_severity: DamageSeverity::matched(SeverityLevel::Moderate, "Moderate"),
            confidence: MOCK_CONFIDENCE,
        }
    }

    pub fn is_mocked(&self) -> bool {
        self.confidence == MOCK_CONFIDENCE
    }
}

/// Values accumulated while scanning. Numeric fields stay `None` until a
/// span parses successfully.
#[derive(Debug)]
pub(crate) struct Scan {
    pub repair_cost: Option<f64>,
    pub total_hours: Option<f64>,
    pub structural_hours: u32,
    pub damage_severity: DamageSeverity,
}

impl Scan {
    fn new() -> Self {
        Self {
            repair_cost: None,
            total_hours: None,
            structural_hours: 0,
            damage_severity: DamageSeverity::unknown(),
        }
    }

    fn finish(self) -> ClaimFields {
        ClaimFields {
            repair_cost: self.repair_cost.unwrap_or(DEFAULT_REPAIR_COST),
            total_hours: self.total_hours.unwrap_or(DEFAULT_TOTAL_HOURS),
            structural_hours: self.structural_hours,
            damage_severity: self.damage_severity,
            confidence: EXTRACTED_CONFIDENCE,
        }
    }
}

/// Extract claim figures from recognised estimate text.
///
/// `state` does not influence extraction; it is only recorded on the span.
/// Confidence is always [`EXTRACTED_CONFIDENCE`], even when every numeric
/// field ended up defaulted.
pub fn extract_claim_fields(text: &str, state: UsState) -> ClaimFields {
    let span = tracing::debug_span!("extract", state = %state, chars = text.len());
    let _guard = span.enter();

    let mut scan = Scan::new();
    for m in rules::scan(text) {
        debug!(category = ?m.rule.category, span = m.text, at = m.start, "Matched");
        (m.rule.apply)(&mut scan, m.text);
    }

    debug!(
        repair_cost = ?scan.repair_cost,
        total_hours = ?scan.total_hours,
        structural_hours = scan.structural_hours,
        severity = %scan.damage_severity,
        "Scan complete"
    );

    scan.finish()
}
