//! Identity token decoding.
//!
//! The gate only needs the caller's claims as a JSON object; how a token is
//! verified is up to the [`TokenDecoder`] the embedding service plugs in.

use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token: {reason}")]
    Malformed { reason: String },

    #[error("token claims must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },

    #[error("token expired at {expired_at}")]
    Expired { expired_at: f64 },
}

/// Turns a raw identity token into the claims exposed to rules as `auth`.
pub trait TokenDecoder: Send + Sync {
    fn decode(&self, token: &str) -> Result<Value, TokenError>;
}

/// Claims decoder for local development and tests. It does **not** check
/// signatures.
///
/// Accepted forms, tried in order:
/// - `json:<claims>`
/// - a three-part `header.claims.signature` token with base64url claims
/// - base64url (no padding) encoded claims
/// - standard base64 encoded claims
///
/// A numeric `exp` claim (seconds since the epoch) in the past rejects the
/// token.
#[derive(Debug, Clone, Default)]
pub struct ClaimsTokenDecoder;

impl ClaimsTokenDecoder {
    pub fn new() -> Self {
        Self
    }

    fn claims(token: &str) -> Result<Value, TokenError> {
        if let Some(raw) = token.strip_prefix("json:") {
            return serde_json::from_str(raw).map_err(|e| TokenError::Malformed {
                reason: e.to_string(),
            });
        }

        let mut parts = token.split('.');
        if let (Some(_), Some(payload), Some(_), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        {
            return decode_json(general_purpose::URL_SAFE_NO_PAD.decode(payload).ok()).ok_or_else(
                || TokenError::Malformed {
                    reason: "claims segment is not base64url JSON".to_string(),
                },
            );
        }

        decode_json(general_purpose::URL_SAFE_NO_PAD.decode(token).ok())
            .or_else(|| decode_json(general_purpose::STANDARD.decode(token).ok()))
            .ok_or_else(|| TokenError::Malformed {
                reason: "unable to decode token".to_string(),
            })
    }
}

fn decode_json(bytes: Option<Vec<u8>>) -> Option<Value> {
    serde_json::from_slice(&bytes?).ok()
}

impl TokenDecoder for ClaimsTokenDecoder {
    fn decode(&self, token: &str) -> Result<Value, TokenError> {
        let claims = Self::claims(token.trim())?;
        if !claims.is_object() {
            return Err(TokenError::NotAnObject {
                found: crate::expression::type_name(&claims),
            });
        }

        // `exp` is NumericDate seconds and may carry a fraction.
        if let Some(exp) = claims.get("exp").and_then(Value::as_f64) {
            if exp <= chrono::Utc::now().timestamp() as f64 {
                return Err(TokenError::Expired { expired_at: exp });
            }
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(claims: &Value) -> String {
        general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string())
    }

    #[test]
    fn decodes_json_prefix() {
        let claims = ClaimsTokenDecoder::new()
            .decode(r#"json:{"uid":"u1","admin":true}"#)
            .unwrap();
        assert_eq!(claims, json!({ "uid": "u1", "admin": true }));
    }

    #[test]
    fn decodes_jwt_shaped_token() {
        let token = format!("eyJhbGciOiJub25lIn0.{}.sig", encode(&json!({ "uid": "u2" })));
        let claims = ClaimsTokenDecoder::new().decode(&token).unwrap();
        assert_eq!(claims["uid"], "u2");
    }

    #[test]
    fn decodes_plain_base64_variants() {
        let claims = json!({ "uid": "u3" });
        let decoder = ClaimsTokenDecoder::new();

        assert_eq!(decoder.decode(&encode(&claims)).unwrap(), claims);
        let standard = general_purpose::STANDARD.encode(claims.to_string());
        assert_eq!(decoder.decode(&standard).unwrap(), claims);
    }

    #[test]
    fn rejects_garbage_and_non_objects() {
        let decoder = ClaimsTokenDecoder::new();
        assert!(matches!(
            decoder.decode("%%%garbage%%%"),
            Err(TokenError::Malformed { .. })
        ));
        assert!(matches!(
            decoder.decode("json:[1,2]"),
            Err(TokenError::NotAnObject { found: "array" })
        ));
        assert!(matches!(
            decoder.decode("a.!!!.c"),
            Err(TokenError::Malformed { .. })
        ));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let decoder = ClaimsTokenDecoder::new();
        assert!(matches!(
            decoder.decode(r#"json:{"uid":"u1","exp":1}"#),
            Err(TokenError::Expired { expired_at }) if expired_at == 1.0
        ));
        assert!(matches!(
            decoder.decode(r#"json:{"uid":"7","exp":1.5}"#),
            Err(TokenError::Expired { expired_at }) if expired_at == 1.5
        ));

        let later = chrono::Utc::now().timestamp() + 3600;
        let token = format!(r#"json:{{"uid":"u1","exp":{later}}}"#);
        assert!(decoder.decode(&token).is_ok());
        let token = format!(r#"json:{{"uid":"u1","exp":{later}.5}}"#);
        assert!(decoder.decode(&token).is_ok());
    }
}
