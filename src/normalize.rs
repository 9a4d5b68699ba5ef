//! Turns free-form user input into a typed lookup target.

use crate::errors::GatewayError;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

// Syntactic check only; octet range is left to the upstream provider.
static IPV4_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(\.\d{1,3}){3}$").expect("valid ipv4 literal pattern"));

/// A normalized lookup target. IPv6 text is not special-cased here; it
/// flows through as a domain-shaped value and the upstream provider decides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupTarget {
    Ip(String),
    Domain(String),
}

impl LookupTarget {
    pub fn value(&self) -> &str {
        match self {
            LookupTarget::Ip(value) | LookupTarget::Domain(value) => value,
        }
    }
}

/// Classify arbitrary user text as an IP literal or a domain hostname.
///
/// Lenient by design: input that fails URL parsing is still attempted
/// verbatim as a hostname. Only empty input is rejected.
pub fn classify(input: &str) -> Result<LookupTarget, GatewayError> {
    let cleaned = input.trim().to_lowercase();

    if cleaned.is_empty() {
        return Err(GatewayError::InvalidInput("empty lookup target".to_string()));
    }

    if IPV4_LITERAL.is_match(&cleaned) {
        return Ok(LookupTarget::Ip(cleaned));
    }

    Ok(LookupTarget::Domain(extract_hostname(&cleaned)))
}

fn extract_hostname(cleaned: &str) -> String {
    let candidate = if cleaned.starts_with("http://") || cleaned.starts_with("https://") {
        cleaned.to_string()
    } else {
        format!("http://{}", cleaned)
    };

    match Url::parse(&candidate) {
        Ok(url) => url
            .host_str()
            .map(|host| host.to_string())
            .unwrap_or_else(|| cleaned.to_string()),
        // Fall back to the cleaned string so odd input still reaches upstream
        Err(_) => cleaned.to_string(),
    }
}
