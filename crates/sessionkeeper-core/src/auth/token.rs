//! Unverified inspection of bearer token payloads.
//!
//! Tokens are `header.payload.signature` with a base64url JSON payload. The
//! signature is never checked here, so decoded claims only feed local expiry
//! bookkeeping and must not be used for authorization decisions.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// base64url that accepts payloads with or without `=` padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Claims read from a token payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Expiry, epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "crate::utils::serde_helpers::string_or_number_opt"
    )]
    pub sub: Option<String>,
    /// Every other claim, untouched.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl TokenClaims {
    /// The `exp` claim as an instant, if present and representable.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }

    /// Subject identifier: `sub`, falling back to `user_id` or `id`.
    pub fn subject(&self) -> Option<String> {
        if let Some(ref sub) = self.sub {
            return Some(sub.clone());
        }
        ["user_id", "id"].iter().find_map(|key| match self.extra.get(*key) {
            Some(JsonValue::String(s)) => Some(s.clone()),
            Some(JsonValue::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }
}

/// Decode the payload of a three-part token. Returns `None` on any structural
/// problem: wrong part count, empty parts, bad base64, or a non-object payload.
pub fn decode(token: &str) -> Option<TokenClaims> {
    let mut parts = token.split('.');
    let (header, payload, signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || header.is_empty() || payload.is_empty() || signature.is_empty() {
        return None;
    }

    let bytes = URL_SAFE_LENIENT.decode(payload).ok()?;
    let value: JsonValue = serde_json::from_slice(&bytes).ok()?;
    if !value.is_object() {
        return None;
    }

    // A non-integer `exp` (e.g. a string) makes the token malformed, not non-expiring.
    serde_json::from_value(value).ok()
}

/// Build an unsigned token around the given claims. Only useful for tests and
/// local tooling; the signature part is a fixed placeholder.
pub fn encode_unsigned(claims: &JsonValue) -> String {
    let header = URL_SAFE_LENIENT.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_LENIENT.encode(claims.to_string());
    format!("{}.{}.unsigned", header, payload)
}
