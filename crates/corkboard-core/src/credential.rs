//! Bearer credential decoding.
//!
//! The signature is never checked here; the server re-validates every
//! request. Decoded claims are used for display and for scheduling
//! renewal, nothing else.

use std::fmt;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CredentialError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
enum TenantClaim {
    Number(i64),
    Text(String),
}

impl TenantClaim {
    fn into_string(self) -> String {
        match self {
            Self::Number(value) => value.to_string(),
            Self::Text(value) => value,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: i64,
    pub username: String,
    pub tenant_id: serde_json::Value,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    raw: String,
    pub subject_id: i64,
    pub username: String,
    pub tenant_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("raw", &format_args!("<{} bytes>", self.raw.len()))
            .field("subject_id", &self.subject_id)
            .field("username", &self.username)
            .field("tenant_id", &self.tenant_id)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credential {
    #[tracing::instrument(skip(raw), fields(len = raw.len()))]
    pub fn decode(raw: &str) -> Result<Self, CredentialError> {
        let raw = raw.trim();
        let mut parts = raw.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CredentialError::Malformed);
        };
        if payload.is_empty() {
            return Err(CredentialError::Malformed);
        }

        let bytes = decode_segment(payload)?;
        let claims: Claims = serde_json::from_slice(&bytes)?;
        let tenant: TenantClaim = serde_json::from_value(claims.tenant_id)?;

        let issued_at = Utc
            .timestamp_opt(claims.iat, 0)
            .single()
            .ok_or(CredentialError::ClaimRange("iat"))?;
        let expires_at = match claims.exp {
            Some(exp) => Some(
                Utc.timestamp_opt(exp, 0)
                    .single()
                    .ok_or(CredentialError::ClaimRange("exp"))?,
            ),
            None => None,
        };

        Ok(Self {
            raw: raw.to_string(),
            subject_id: claims.id,
            username: claims.username,
            tenant_id: tenant.into_string(),
            issued_at,
            expires_at,
        })
    }

    /// The token exactly as issued, for the `Authorization` header.
    pub fn raw_token(&self) -> &str {
        &self.raw
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Time until renewal should fire, or `None` when the credential
    /// cannot be renewed ahead of expiry.
    pub fn renewal_delay(
        &self,
        now: DateTime<Utc>,
        skew: chrono::Duration,
    ) -> Option<Duration> {
        let expires_at = self.expires_at?;
        let delay = expires_at - now - skew;
        if delay <= chrono::Duration::zero() {
            return None;
        }
        delay.to_std().ok()
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, CredentialError> {
    let trimmed = segment.trim_end_matches('=');
    match URL_SAFE_NO_PAD.decode(trimmed) {
        Ok(bytes) => Ok(bytes),
        Err(_) => Ok(STANDARD_NO_PAD.decode(trimmed)?),
    }
}

/// Builds an unsigned token around `claims`. Used by the in-memory remote
/// and by tests; real tokens come from the identity service.
pub fn encode_unsigned(claims: &Claims) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = serde_json::to_vec(claims).unwrap_or_default();
    format!("{header}.{}.unsigned", URL_SAFE_NO_PAD.encode(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(exp: Option<i64>) -> Claims {
        Claims {
            id: 42,
            username: "alice".to_string(),
            tenant_id: serde_json::json!(7),
            iat: 1_700_000_000,
            exp,
        }
    }

    #[test]
    fn decodes_claims_without_verifying() {
        let token = encode_unsigned(&claims(Some(1_700_000_060)));
        let credential = Credential::decode(&token).expect("decode");

        assert_eq!(credential.subject_id, 42);
        assert_eq!(credential.username, "alice");
        assert_eq!(credential.tenant_id, "7");
        assert_eq!(credential.issued_at.timestamp(), 1_700_000_000);
        assert_eq!(
            credential.expires_at.map(|t| t.timestamp()),
            Some(1_700_000_060)
        );
        assert_eq!(credential.raw_token(), token);
    }

    #[test]
    fn accepts_padded_standard_alphabet_payloads() {
        let payload = STANDARD_NO_PAD.encode(
            br#"{"id":1,"username":"bo","tenant_id":"acme","iat":1700000000}"#,
        );
        let token = format!("e30.{payload}==.sig");
        let credential = Credential::decode(&token).expect("decode");
        assert_eq!(credential.tenant_id, "acme");
        assert_eq!(credential.expires_at, None);
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(matches!(
            Credential::decode("not-a-token"),
            Err(CredentialError::Malformed)
        ));
        assert!(matches!(
            Credential::decode("a..c"),
            Err(CredentialError::Malformed)
        ));
        assert!(matches!(
            Credential::decode("a.e30.c"),
            Err(CredentialError::Claims(_))
        ));
    }

    #[test]
    fn renewal_delay_subtracts_skew() {
        let token = encode_unsigned(&claims(Some(1_700_000_060)));
        let credential = Credential::decode(&token).expect("decode");
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().expect("ts");
        let skew = chrono::Duration::milliseconds(5_000);

        assert_eq!(
            credential.renewal_delay(now, skew),
            Some(Duration::from_secs(55))
        );

        let late = now + chrono::Duration::seconds(56);
        assert_eq!(credential.renewal_delay(late, skew), None);
    }

    #[test]
    fn debug_output_hides_raw_token() {
        let token = encode_unsigned(&claims(None));
        let credential = Credential::decode(&token).expect("decode");
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains(&token));
    }
}
