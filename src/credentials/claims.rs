//! JWT claim decoding.
//!
//! Only the payload segment is read; signature verification is the upstream's
//! business. The `exp` claim is the single source of truth for token expiry.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<i64>,
}

/// Decodes the `exp` claim of a JWT.
///
/// # Returns
/// * `Ok(Some(instant))` - Token carries an expiry claim
/// * `Ok(None)` - Token is a JWT without `exp`
/// * `Err` - Token is not a decodable JWT
pub fn decode_expiry(jwt: &str) -> Result<Option<DateTime<Utc>>> {
    let mut segments = jwt.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(anyhow!("token is not a three-segment JWT"));
    };

    let bytes = BASE64URL
        .decode(payload.trim_end_matches('='))
        .context("Failed to base64url-decode JWT payload")?;
    let claims: Claims =
        serde_json::from_slice(&bytes).context("Failed to parse JWT payload as JSON")?;

    match claims.exp {
        Some(exp) => DateTime::<Utc>::from_timestamp(exp, 0)
            .map(Some)
            .ok_or_else(|| anyhow!("JWT exp claim out of range: {}", exp)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with_payload(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            BASE64URL.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            BASE64URL.encode(payload)
        )
    }

    #[test]
    fn test_decode_expiry() {
        let jwt = jwt_with_payload(r#"{"sub":"7","exp":1767225600}"#);
        let exp = decode_expiry(&jwt).unwrap().unwrap();
        assert_eq!(exp.timestamp(), 1_767_225_600);
    }

    #[test]
    fn test_decode_without_exp() {
        let jwt = jwt_with_payload(r#"{"sub":"7"}"#);
        assert!(decode_expiry(&jwt).unwrap().is_none());
    }

    #[test]
    fn test_decode_padded_payload() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":1700000000}"#);
        let jwt = format!("h.{}.s", payload);
        let exp = decode_expiry(&jwt).unwrap().unwrap();
        assert_eq!(exp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_decode_rejects_wrong_segment_count() {
        assert!(decode_expiry("a.b").is_err());
        assert!(decode_expiry("a.b.c.d").is_err());
    }

    #[test]
    fn test_decode_rejects_non_json_payload() {
        let jwt = format!("h.{}.s", BASE64URL.encode("not json"));
        assert!(decode_expiry(&jwt).is_err());
    }
}
