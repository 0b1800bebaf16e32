//! Identity-token claim extraction.
//!
//! The identity token arrives directly from the provider's token endpoint
//! over TLS, and its claims are read without checking the provider's
//! signature. Callers must not use this on tokens received from anywhere
//! else.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::Value;

use super::ProviderError;

/// Decode the claims segment of a compact token and return its `email`.
pub fn extract_email(id_token: &str) -> Result<String, ProviderError> {
    let claims = decode_claims(id_token)?;
    match claims.get("email") {
        Some(Value::String(email)) => Ok(email.clone()),
        Some(_) => Err(ProviderError::ClaimDecode(
            "email claim is not a string".to_string(),
        )),
        None => Err(ProviderError::ClaimDecode(
            "email claim is absent".to_string(),
        )),
    }
}

fn decode_claims(id_token: &str) -> Result<Value, ProviderError> {
    let segments: Vec<&str> = id_token.split('.').collect();
    if segments.len() != 3 {
        return Err(ProviderError::ClaimDecode(format!(
            "expected 3 segments, got {}",
            segments.len()
        )));
    }

    // Some issuers keep the base64 padding
    let payload = segments[1];
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .map_err(|e| ProviderError::ClaimDecode(format!("payload encoding: {e}")))?;

    let claims: Value = serde_json::from_slice(&bytes)
        .map_err(|e| ProviderError::ClaimDecode(format!("payload json: {e}")))?;
    if !claims.is_object() {
        return Err(ProviderError::ClaimDecode(
            "payload is not a JSON object".to_string(),
        ));
    }
    Ok(claims)
}
