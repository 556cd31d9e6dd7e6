// src/fallback.rs

use crate::heuristics::{self, ClaimFields, FALLBACK_CONFIDENCE};
use crate::session::UsState;
use tracing::warn;

/// Stand-in estimate text used when the recognition service could not read
/// the document.
pub const FALLBACK_TEXT: &str = "repair cost $5508, total hours 62.3, severe frame damage";

/// Produce fields for a document the recognition service rejected.
///
/// The document itself is not read; every call yields the same record.
pub fn fallback_fields(file_name: &str, state: UsState) -> ClaimFields {
    warn!(file = %file_name, state = %state, "Using fallback estimate text");
    let mut fields = heuristics::extract_claim_fields(FALLBACK_TEXT, state);
    fields.confidence = FALLBACK_CONFIDENCE;
    fields
}
