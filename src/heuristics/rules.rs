use super::{DamageSeverity, Scan, SeverityLevel};
use regex::Regex;
use std::sync::LazyLock;

/// Lexical category a rule recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Hours,
    Money,
    Keyword,
}

pub struct Rule {
    pub category: Category,
    regex: Regex,
    pub apply: fn(&mut Scan, &str),
}

/// A span of the input claimed by one rule.
pub struct Match<'t> {
    pub rule: &'static Rule,
    pub start: usize,
    pub end: usize,
    pub text: &'t str,
}

/// Rules in priority order. When spans overlap the earlier rule keeps the
/// span, so "hours 62.30" is never read as a dollar amount.
static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule {
            category: Category::Hours,
            // "62.3 hours" or "hours: 1,062.3"
            regex: Regex::new(
                r"(?i)\b(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?\s*hours\b|\bhours\s*:?\s*(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?",
            )
            .expect("hours pattern"),
            apply: apply_hours,
        },
        Rule {
            category: Category::Money,
            // "$" prefixed, or bare with thousands separators / two-digit cents
            regex: Regex::new(
                r"\$\s?\d{1,3}(?:,\d{3})+(?:\.\d{2})?|\$\s?\d+(?:\.\d{2})?|\b\d{1,3}(?:,\d{3})+(?:\.\d{2})?\b|\b\d+\.\d{2}\b",
            )
            .expect("money pattern"),
            apply: apply_money,
        },
        Rule {
            category: Category::Keyword,
            regex: Regex::new(r"(?i)\b(?:minor|moderate|severe|structural|frame|suspension)\b")
                .expect("keyword pattern"),
            apply: apply_keyword,
        },
    ]
});

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+\.?\d*").expect("number pattern"));

/// Run every rule over `text` and return the surviving spans in text order.
pub fn scan(text: &str) -> Vec<Match<'_>> {
    let mut claimed: Vec<Match<'_>> = Vec::new();

    for rule in RULES.iter() {
        for m in rule.regex.find_iter(text) {
            let overlaps = claimed
                .iter()
                .any(|c| m.start() < c.end && c.start < m.end());
            if !overlaps {
                claimed.push(Match {
                    rule,
                    start: m.start(),
                    end: m.end(),
                    text: m.as_str(),
                });
            }
        }
    }

    claimed.sort_by_key(|m| m.start);
    claimed
}

/// Parse a currency span such as "$5,508.00". Returns `None` on anything
/// that is not a finite, non-negative number.
pub fn parse_amount(span: &str) -> Option<f64> {
    let cleaned: String = span
        .chars()
        .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
        .collect();
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Parse the first number inside an hours span.
pub fn parse_hours(span: &str) -> Option<f64> {
    NUMBER
        .find(span)
        .and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

// Last successful parse wins; a failed parse leaves the previous value.
fn apply_money(scan: &mut Scan, span: &str) {
    if let Some(v) = parse_amount(span) {
        scan.repair_cost = Some(v);
    }
}

fn apply_hours(scan: &mut Scan, span: &str) {
    if !span.to_lowercase().contains("hours") {
        return;
    }
    if let Some(v) = parse_hours(span) {
        scan.total_hours = Some(v);
    }
}

fn apply_keyword(scan: &mut Scan, span: &str) {
    let Some(level) = SeverityLevel::from_keyword(span) else {
        return;
    };
    if level.is_structural() {
        scan.structural_hours += 1;
    }
    scan.damage_severity = DamageSeverity::matched(level, span);
}
