//! Merged WHOIS record built from one or more upstream response segments.
//!
//! A domain query referred from registry to registrar produces several raw
//! text segments; all of them contribute to a single [`WhoisRecord`].
//! Duplicate keys accumulate into a list rather than overwriting, so no
//! segment's answer is silently lost.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Separator between segments in the concatenated raw blob.
pub const RAW_SEGMENT_SEPARATOR: &str = "\n\n---\n\n";

/// A scalar field, or the accumulated values of a key that appeared more
/// than once across segments. Value order is first-seen order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    One(String),
    Many(Vec<String>),
}

impl FieldValue {
    fn push(&mut self, value: String) {
        match self {
            FieldValue::One(existing) => {
                *self = FieldValue::Many(vec![std::mem::take(existing), value]);
            }
            FieldValue::Many(values) => values.push(value),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoisRecord {
    pub fields: HashMap<String, FieldValue>,
    pub raw: String,
}

impl WhoisRecord {
    /// Merge upstream segments, in response order, into a single record.
    pub fn from_segments(segments: &[String]) -> Self {
        let mut fields: HashMap<String, FieldValue> = HashMap::new();

        for segment in segments {
            for (key, value) in parse_segment_fields(segment) {
                match fields.get_mut(&key) {
                    Some(existing) => existing.push(value),
                    None => {
                        fields.insert(key, FieldValue::One(value));
                    }
                }
            }
        }

        WhoisRecord {
            fields,
            raw: segments.join(RAW_SEGMENT_SEPARATOR),
        }
    }

    /// Fixed record for loopback targets; never touches an upstream server.
    pub fn loopback_sentinel() -> Self {
        WhoisRecord {
            fields: HashMap::new(),
            raw: "This is a localhost address. No WHOIS data exists for local interfaces."
                .to_string(),
        }
    }
}

/// Extract `key: value` pairs from one raw segment. Comment and marker
/// lines (`%`, `#`, `>>>`) are skipped, as are keys with empty values.
fn parse_segment_fields(segment: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    for line in segment.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('%') || line.starts_with('#') || line.starts_with(">>>") {
            continue;
        }

        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_lowercase();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                continue;
            }
            pairs.push((key, value.to_string()));
        }
    }

    pairs
}
