use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha1::Sha1;
use thiserror::Error;

use crate::config::RelayConfig;
use crate::error::AppError;

type HmacSha1 = Hmac<Sha1>;

/// Lifetime of every issued credential, in seconds
pub const RELAY_CREDENTIAL_TTL_SECS: i64 = 3600;

/// Username suffix used when the caller has no identity
const GUEST_USERNAME: &str = "temp";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("relay shared secret is not configured")]
    MissingSecret,
    #[error("relay shared secret rejected by MAC: {0}")]
    InvalidSecret(String),
}

impl From<CredentialError> for AppError {
    fn from(e: CredentialError) -> Self {
        AppError::Configuration(e.to_string())
    }
}

/// Relay username/password pair. The username embeds the expiry so the relay
/// can check freshness without shared state.
#[derive(Debug, Clone, Serialize)]
pub struct RelayCredential {
    pub username: String,
    pub password: String,
    pub ttl: i64,
    pub expires_at: i64,
    pub relay_uris: Vec<String>,
}

/// Derives relay credentials from the shared secret. Holds no mutable state.
#[derive(Debug, Clone)]
pub struct CredentialIssuer {
    secret: Option<String>,
    relay_uris: Vec<String>,
}

impl CredentialIssuer {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            secret: config.secret.clone(),
            relay_uris: config.uris.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn issue(&self, identity: Option<&str>) -> Result<RelayCredential, CredentialError> {
        self.issue_at(identity, chrono::Utc::now().timestamp())
    }

    /// Issue against an explicit clock reading (Unix seconds).
    pub fn issue_at(
        &self,
        identity: Option<&str>,
        now: i64,
    ) -> Result<RelayCredential, CredentialError> {
        let secret = self
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(CredentialError::MissingSecret)?;

        let expires_at = now + RELAY_CREDENTIAL_TTL_SECS;
        let principal = identity.filter(|i| !i.is_empty()).unwrap_or(GUEST_USERNAME);
        let username = format!("{}:{}", expires_at, principal);
        let password = sign(secret, &username)?;

        Ok(RelayCredential {
            username,
            password,
            ttl: RELAY_CREDENTIAL_TTL_SECS,
            expires_at,
            relay_uris: self.relay_uris.clone(),
        })
    }
}

fn sign(secret: &str, username: &str) -> Result<String, CredentialError> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|e| CredentialError::InvalidSecret(e.to_string()))?;
    mac.update(username.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer(secret: Option<&str>) -> CredentialIssuer {
        CredentialIssuer::new(&RelayConfig {
            secret: secret.map(str::to_string),
            uris: vec!["turn:relay.example.com:3478".to_string()],
        })
    }

    #[test]
    fn test_known_vector() {
        let credential = issuer(Some("S")).issue_at(Some("alice"), 1_700_000_000).unwrap();

        assert_eq!(credential.username, "1700003600:alice");
        assert_eq!(credential.password, "4VButtso+Q50x6LRtOCR1XJ4w2M=");
        assert_eq!(credential.expires_at, 1_700_003_600);
        assert_eq!(credential.ttl, 3600);
        assert_eq!(credential.relay_uris, vec!["turn:relay.example.com:3478"]);
    }

    #[test]
    fn test_guest_uses_temp() {
        let credential = issuer(Some("S")).issue_at(None, 1_700_000_000).unwrap();
        assert_eq!(credential.username, "1700003600:temp");
        assert_eq!(credential.password, "7b3AZUevUoILwh1caqp9zMhe40g=");
    }

    #[test]
    fn test_deterministic_for_same_second() {
        let issuer = issuer(Some("S"));
        let a = issuer.issue_at(Some("bob"), 42).unwrap();
        let b = issuer.issue_at(Some("bob"), 42).unwrap();
        assert_eq!(a.password, b.password);

        let c = issuer.issue_at(Some("bob"), 43).unwrap();
        assert_ne!(a.password, c.password);
    }

    #[test]
    fn test_missing_secret() {
        assert_eq!(
            issuer(None).issue(Some("alice")).unwrap_err(),
            CredentialError::MissingSecret
        );
        assert_eq!(
            issuer(Some("")).issue(None).unwrap_err(),
            CredentialError::MissingSecret
        );
        assert!(!issuer(Some("")).is_configured());
    }

    #[test]
    fn test_expiry_is_one_hour_ahead() {
        let before = chrono::Utc::now().timestamp();
        let credential = issuer(Some("S")).issue(Some("alice")).unwrap();
        let after = chrono::Utc::now().timestamp();

        assert!(credential.expires_at >= before + 3600);
        assert!(credential.expires_at <= after + 3600);
        assert!(credential.username.starts_with(&credential.expires_at.to_string()));
    }
}
