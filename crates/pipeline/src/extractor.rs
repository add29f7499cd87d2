//! Candidate payload to typed value.
//!
//! Rules run in order and the first one that yields a positive finite
//! multiplier wins. A payload no rule understands is not an error.

use regex::Regex;
use roundcast_core_types::{
    clamp_confidence, ExtractedValue, ExtractionMethod, Multiplier, RawCandidate,
};
use serde_json::Value;
use tracing::trace;

use crate::PipelineError;

/// Field names checked in order in a structured payload.
pub const MULTIPLIER_FIELDS: [&str; 3] = ["multiplier", "mult", "value"];

/// Default two-decimal pattern used by [`DecimalPatternRule`].
pub const DECIMAL_PATTERN: &str = r"[0-9]+\.[0-9]{2}";

/// Multiplier and optional confidence recovered by one rule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RuleMatch {
    pub multiplier: Multiplier,
    pub confidence: Option<f64>,
}

pub trait ExtractionRule: Send + Sync {
    fn method(&self) -> ExtractionMethod;
    fn apply(&self, payload: &str) -> Option<RuleMatch>;
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Reads `multiplier`, `mult` or `value` from a JSON object.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredFieldRule;

impl ExtractionRule for StructuredFieldRule {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::StructuredField
    }

    fn apply(&self, payload: &str) -> Option<RuleMatch> {
        let trimmed = payload.trim_start();
        if !trimmed.starts_with('{') {
            return None;
        }
        let record: Value = serde_json::from_str(trimmed).ok()?;
        let object = record.as_object()?;
        let raw = MULTIPLIER_FIELDS
            .iter()
            .find_map(|field| object.get(*field).and_then(numeric))?;
        let multiplier = Multiplier::new(raw).ok()?;
        let confidence = object
            .get("confidence")
            .and_then(Value::as_f64)
            .and_then(clamp_confidence);
        Some(RuleMatch {
            multiplier,
            confidence,
        })
    }
}

/// First decimal number with exactly two fractional digits in the text.
#[derive(Debug, Clone)]
pub struct DecimalPatternRule {
    pattern: Regex,
}

impl DecimalPatternRule {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(DECIMAL_PATTERN).unwrap(),
        }
    }

    pub fn with_pattern(pattern: &str) -> Result<Self, PipelineError> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }
}

impl Default for DecimalPatternRule {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionRule for DecimalPatternRule {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::PatternMatch
    }

    fn apply(&self, payload: &str) -> Option<RuleMatch> {
        let found = self.pattern.find(payload)?;
        let raw: f64 = found.as_str().parse().ok()?;
        Some(RuleMatch {
            multiplier: Multiplier::new(raw).ok()?,
            confidence: None,
        })
    }
}

pub struct ValueExtractor {
    rules: Vec<Box<dyn ExtractionRule>>,
}

impl ValueExtractor {
    pub fn new(rules: Vec<Box<dyn ExtractionRule>>) -> Self {
        Self { rules }
    }

    pub fn push_rule(&mut self, rule: Box<dyn ExtractionRule>) {
        self.rules.push(rule);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn extract(&self, candidate: &RawCandidate) -> Option<ExtractedValue> {
        for rule in &self.rules {
            if let Some(found) = rule.apply(&candidate.payload) {
                return Some(ExtractedValue {
                    multiplier: found.multiplier,
                    source: candidate.source,
                    observed_at: candidate.observed_at,
                    method: rule.method(),
                    confidence: found.confidence,
                });
            }
        }
        trace!(
            target: "normalizer",
            source = %candidate.source,
            len = candidate.payload.len(),
            "no value in candidate"
        );
        None
    }
}

impl Default for ValueExtractor {
    fn default() -> Self {
        Self::new(vec![
            Box::new(StructuredFieldRule),
            Box::new(DecimalPatternRule::new()),
        ])
    }
}
