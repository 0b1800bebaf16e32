//! Stateless signed session tokens.
//!
//! Tokens use the compact JWS layout with HMAC-SHA256:
//!
//! Format:  base64url(header) "." base64url(claims) "." base64url(hmac)
//!
//! The claims are a JSON object that always carries `iat` and `exp` (unix
//! seconds) next to whatever the caller supplied. Nothing is stored
//! server-side; a token stops being accepted once `exp` is reached.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Claim set carried by a session token.
pub type Claims = Map<String, Value>;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Why a session token was not accepted.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed: {0}")]
    Malformed(&'static str),
    #[error("token signature is invalid")]
    Signature,
    #[error("token expired at {exp}")]
    Expired { exp: u64 },
    #[error("token claim is invalid: {0}")]
    Claim(&'static str),
}

impl TokenError {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::Malformed(_) => "malformed",
            TokenError::Signature => "signature",
            TokenError::Expired { .. } => "expired",
            TokenError::Claim(_) => "claim",
        }
    }
}

/// Process-wide symmetric secret. Read-only after construction.
#[derive(Clone)]
pub struct SigningKey(Arc<[u8]>);

impl SigningKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::from(bytes.into()))
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length.
        match HmacSha256::new_from_slice(&self.0) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC-SHA256 accepts any key length"),
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

/// Issues and verifies session tokens.
#[derive(Clone, Debug)]
pub struct SessionTokenService {
    key: SigningKey,
}

impl SessionTokenService {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Sign `claims` into a token valid for `ttl` from now.
    ///
    /// `exp` and `iat` are always set by the service and override any
    /// caller-supplied values of the same name.
    pub fn issue(&self, mut claims: Claims, ttl: Duration) -> Result<String, TokenError> {
        let now = unix_now();
        claims.insert("iat".to_string(), Value::from(now));
        claims.insert("exp".to_string(), Value::from(now.saturating_add(ttl.as_secs())));

        let payload = serde_json::to_vec(&claims).map_err(|_| TokenError::Malformed("claims"))?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HEADER),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature = self.sign(signing_input.as_bytes());

        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Check signature and expiry, returning the claims unchanged.
    ///
    /// The signature is checked before any claim is trusted, so a forged
    /// token reports [`TokenError::Signature`] even when it is also expired.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, unix_now())
    }

    pub(crate) fn verify_at(&self, token: &str, now: u64) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let (Some(header_segment), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed("expected three segments"));
        };

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_segment)
            .map_err(|_| TokenError::Malformed("header encoding"))?;
        let header: Value = serde_json::from_slice(&header_bytes)
            .map_err(|_| TokenError::Malformed("header json"))?;
        if header.get("alg").and_then(Value::as_str) != Some("HS256") {
            return Err(TokenError::Malformed("unsupported algorithm"));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed("signature encoding"))?;
        let mut mac = self.key.mac();
        mac.update(header_segment.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::Signature)?;

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed("payload encoding"))?;
        let claims: Claims = serde_json::from_slice(&payload_bytes)
            .map_err(|_| TokenError::Malformed("payload json"))?;

        let exp = match claims.get("exp") {
            None => return Err(TokenError::Claim("exp is missing")),
            Some(value) => value
                .as_u64()
                .ok_or(TokenError::Claim("exp is not a numeric timestamp"))?,
        };
        if exp <= now {
            return Err(TokenError::Expired { exp });
        }

        Ok(claims)
    }

    fn sign(&self, input: &[u8]) -> Vec<u8> {
        let mut mac = self.key.mac();
        mac.update(input);
        mac.finalize().into_bytes().to_vec()
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> SessionTokenService {
        SessionTokenService::new(SigningKey::new(vec![0xAA; 32]))
    }

    fn claims(value: Value) -> Claims {
        value.as_object().unwrap().clone()
    }

    /// Sign arbitrary claims without the service adding `exp`.
    fn sign_raw(service: &SessionTokenService, payload: &Value) -> String {
        let input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HEADER),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap())
        );
        let sig = service.sign(input.as_bytes());
        format!("{input}.{}", URL_SAFE_NO_PAD.encode(sig))
    }

    #[test]
    fn test_issue_then_verify_returns_claims() {
        let service = service();
        let token = service
            .issue(claims(json!({"sub": "user-1"})), Duration::from_secs(3600))
            .unwrap();

        let verified = service.verify(&token).unwrap();
        assert_eq!(verified["sub"], "user-1");

        let exp = verified["exp"].as_u64().unwrap();
        let expected = unix_now() + 3600;
        assert!(exp.abs_diff(expected) <= 5, "exp {exp} vs {expected}");
    }

    #[test]
    fn test_verify_preserves_all_claims() {
        let service = service();
        let original = claims(json!({
            "sub": "google:123",
            "email": "a@example.com",
            "roles": ["admin"],
        }));
        let token = service.issue(original.clone(), Duration::from_secs(60)).unwrap();
        let verified = service.verify(&token).unwrap();
        for (k, v) in &original {
            assert_eq!(&verified[k], v);
        }
    }

    #[test]
    fn test_expired_token_rejected() {
        let service = service();
        let token = service
            .issue(claims(json!({"sub": "user-1"})), Duration::from_secs(60))
            .unwrap();
        let later = unix_now() + 61;
        assert!(matches!(
            service.verify_at(&token, later),
            Err(TokenError::Expired { .. })
        ));
    }

    #[test]
    fn test_foreign_and_expired_reports_signature() {
        let foreign = SessionTokenService::new(SigningKey::new(vec![0x01; 32]));
        let token = sign_raw(&foreign, &json!({"sub": "user-1", "exp": 1_000}));
        assert!(matches!(
            service().verify_at(&token, 2_000),
            Err(TokenError::Signature)
        ));
        // Same claims under the right key: the expiry is what fails.
        let token = sign_raw(&service(), &json!({"sub": "user-1", "exp": 1_000}));
        assert!(matches!(
            service().verify_at(&token, 2_000),
            Err(TokenError::Expired { exp: 1_000 })
        ));
    }

    #[test]
    fn test_huge_ttl_saturates_expiry() {
        let service = service();
        let token = service
            .issue(claims(json!({"sub": "user-1"})), Duration::MAX)
            .unwrap();
        let verified = service.verify(&token).unwrap();
        assert_eq!(verified["exp"], json!(u64::MAX));
    }

    #[test]
    fn test_expiry_equal_to_now_is_expired() {
        let service = service();
        let token = sign_raw(&service, &json!({"sub": "x", "exp": 1_000}));
        assert_eq!(
            service.verify_at(&token, 1_000),
            Err(TokenError::Expired { exp: 1_000 })
        );
        assert!(service.verify_at(&token, 999).is_ok());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = service()
            .issue(claims(json!({"sub": "user-1"})), Duration::from_secs(60))
            .unwrap();
        let other = SessionTokenService::new(SigningKey::new(vec![0xBB; 32]));
        assert_eq!(other.verify(&token), Err(TokenError::Signature));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let service = service();
        let token = service
            .issue(claims(json!({"sub": "user-1"})), Duration::from_secs(60))
            .unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let forged_payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"admin","exp":99999999999}"#);
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        assert_eq!(service.verify(&forged), Err(TokenError::Signature));
    }

    #[test]
    fn test_missing_exp_is_claim_error() {
        let service = service();
        let token = sign_raw(&service, &json!({"sub": "user-1"}));
        assert_eq!(
            service.verify(&token),
            Err(TokenError::Claim("exp is missing"))
        );
    }

    #[test]
    fn test_non_numeric_exp_is_claim_error() {
        let service = service();
        let token = sign_raw(&service, &json!({"sub": "user-1", "exp": "tomorrow"}));
        assert!(matches!(service.verify(&token), Err(TokenError::Claim(_))));
    }

    #[test]
    fn test_garbage_input_is_malformed() {
        let service = service();
        for input in ["", "abc", "a.b", "a.b.c.d", "!!!.???.***"] {
            assert!(
                matches!(service.verify(input), Err(TokenError::Malformed(_))),
                "input {input:?}"
            );
        }
    }

    #[test]
    fn test_unsupported_algorithm_is_malformed() {
        let service = service();
        let token = service
            .issue(claims(json!({"sub": "user-1"})), Duration::from_secs(60))
            .unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let none_header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
        let forged = format!("{none_header}.{}.{}", parts[1], parts[2]);
        assert_eq!(
            service.verify(&forged),
            Err(TokenError::Malformed("unsupported algorithm"))
        );
    }

    #[test]
    fn test_signing_key_debug_is_redacted() {
        let key = SigningKey::new(b"super-secret-super-secret-000000".to_vec());
        assert_eq!(format!("{key:?}"), "SigningKey(..)");
    }
}
