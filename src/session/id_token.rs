//! Identity-token payload extraction.
//!
//! The token's signature is NOT verified. The claims are only used to learn
//! which owner id the freshly issued access token belongs to; the platform
//! still enforces authorization on every API call.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde_json::{Map, Value};

use crate::error::AuthError;

/// Claim carrying the device-owner identifier.
pub const OWNER_CLAIM: &str = "pumperId";

const URL_SAFE_ANY_PAD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode the middle segment of a compact JWT as a JSON object.
pub fn decode_claims(id_token: &str) -> Result<Map<String, Value>, AuthError> {
    let segments: Vec<&str> = id_token.split('.').collect();
    if segments.len() != 3 {
        return Err(AuthError::MalformedIdToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let payload = URL_SAFE_ANY_PAD
        .decode(segments[1])
        .map_err(|e| AuthError::MalformedIdToken(format!("payload is not base64url: {}", e)))?;

    match serde_json::from_slice::<Value>(&payload) {
        Ok(Value::Object(claims)) => Ok(claims),
        Ok(_) => Err(AuthError::MalformedIdToken(
            "payload is not a JSON object".to_string(),
        )),
        Err(e) => Err(AuthError::MalformedIdToken(format!(
            "payload is not JSON: {}",
            e
        ))),
    }
}

/// Owner id from the identity token. Numeric claims are accepted as strings.
pub fn owner_id(id_token: &str) -> Result<String, AuthError> {
    let claims = decode_claims(id_token)?;
    match claims.get(OWNER_CLAIM) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(AuthError::MalformedIdToken(format!(
            "missing {} claim",
            OWNER_CLAIM
        ))),
    }
}
