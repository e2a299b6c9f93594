//! Session tokens
//!
//! A session carries nothing but the verified principal (`sub`) and its
//! lifetime. Tokens are HS256 JWTs handed to the browser as a cookie and
//! also accepted as a bearer token for scripted clients.
//!
//! Security notes:
//! - Default lifetime is 31 days
//! - In production, SESSION_SECRET must be a strong random value of 32+ characters

use hyper::header::{HeaderMap, AUTHORIZATION, COOKIE};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::KeeperError;

/// Cookie holding the session token
pub const SESSION_COOKIE: &str = "kms_session";

/// Payload stored in the session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Principal identifier (pid)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Result of token validation
#[derive(Debug)]
pub struct TokenValidationResult {
    pub valid: bool,
    pub claims: Option<Claims>,
    pub error: Option<String>,
}

impl TokenValidationResult {
    pub fn valid(claims: Claims) -> Self {
        Self {
            valid: true,
            claims: Some(claims),
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            claims: None,
            error: Some(error.into()),
        }
    }
}

/// Issues and verifies session tokens
#[derive(Clone)]
pub struct SessionIssuer {
    secret: String,
    ttl_seconds: u64,
    secure_cookie: bool,
}

impl SessionIssuer {
    /// Create a new issuer
    ///
    /// Returns an error if the secret is empty or too short
    pub fn new(secret: String, ttl_seconds: u64, secure_cookie: bool) -> Result<Self, KeeperError> {
        if secret.is_empty() {
            return Err(KeeperError::Config(
                "SESSION_SECRET is required in production mode".into(),
            ));
        }

        if secret.len() < 32 {
            return Err(KeeperError::Config(
                "SESSION_SECRET must be at least 32 characters".into(),
            ));
        }

        Ok(Self {
            secret,
            ttl_seconds,
            secure_cookie,
        })
    }

    /// Create an issuer for dev mode (fixed secret)
    pub fn new_dev(ttl_seconds: u64) -> Self {
        Self {
            secret: "dev-mode-session-secret-not-for-production".into(),
            ttl_seconds,
            secure_cookie: false,
        }
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Issue a session token for a verified principal
    pub fn issue(&self, pid: &str) -> Result<String, KeeperError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| KeeperError::Internal(format!("System time error: {}", e)))?
            .as_secs();

        let claims = Claims {
            sub: pid.to_string(),
            iat: now,
            exp: now + self.ttl_seconds,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| KeeperError::Internal(format!("Failed to issue session: {}", e)))
    }

    /// Verify and decode a session token
    pub fn verify(&self, token: &str) -> TokenValidationResult {
        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        ) {
            Ok(token_data) => TokenValidationResult::valid(token_data.claims),
            Err(err) => {
                use jsonwebtoken::errors::ErrorKind;
                let error_msg = match err.kind() {
                    ErrorKind::ExpiredSignature => "Session expired",
                    ErrorKind::InvalidToken => "Invalid session token",
                    ErrorKind::InvalidSignature => "Invalid session signature",
                    _ => "Session validation failed",
                };
                TokenValidationResult::invalid(error_msg)
            }
        }
    }

    /// Principal carried by the request, if any valid session is attached.
    ///
    /// An invalid or expired token reads as "no principal"; the access gate
    /// turns that into `Unauthenticated`.
    pub fn principal(&self, headers: &HeaderMap) -> Option<String> {
        let token = extract_session_token(headers)?;
        let result = self.verify(&token);
        if let Some(error) = result.error {
            tracing::debug!("Ignoring session token: {}", error);
        }
        result.claims.map(|c| c.sub)
    }

    /// `Set-Cookie` value establishing a session
    pub fn session_cookie(&self, token: &str) -> String {
        let secure = if self.secure_cookie {
            "; Secure; SameSite=None"
        } else {
            "; SameSite=Lax"
        };
        format!(
            "{SESSION_COOKIE}={token}; Path=/; HttpOnly; Max-Age={}{secure}",
            self.ttl_seconds
        )
    }

    /// `Set-Cookie` value ending a session
    pub fn clear_cookie(&self) -> String {
        format!("{SESSION_COOKIE}=; Path=/; HttpOnly; Max-Age=0")
    }
}

/// Pull the session token from the cookie or an `Authorization` header
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all(COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((name, token)) = pair.trim().split_once('=') {
                if name == SESSION_COOKIE && !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    let header = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn test_issuer() -> SessionIssuer {
        SessionIssuer::new(
            "test-secret-that-is-at-least-32-characters-long".into(),
            3600,
            true,
        )
        .unwrap()
    }

    #[test]
    fn test_issue_and_verify() {
        let issuer = test_issuer();
        let token = issuer.issue("jdoe123").unwrap();

        let result = issuer.verify(&token);
        assert!(result.valid);
        let claims = result.claims.unwrap();
        assert_eq!(claims.sub, "jdoe123");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_rejects_foreign_signature() {
        let issuer = test_issuer();
        let other = SessionIssuer::new_dev(3600);
        let token = other.issue("jdoe123").unwrap();

        let result = issuer.verify(&token);
        assert!(!result.valid);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(SessionIssuer::new("short".into(), 3600, true).is_err());
        assert!(SessionIssuer::new(String::new(), 3600, true).is_err());
    }

    #[test]
    fn test_principal_from_cookie() {
        let issuer = test_issuer();
        let token = issuer.issue("jdoe123").unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {SESSION_COOKIE}={token}")).unwrap(),
        );

        assert_eq!(issuer.principal(&headers).as_deref(), Some("jdoe123"));
    }

    #[test]
    fn test_principal_from_bearer() {
        let issuer = test_issuer();
        let token = issuer.issue("admin1").unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );

        assert_eq!(issuer.principal(&headers).as_deref(), Some("admin1"));
    }

    #[test]
    fn test_garbage_token_yields_no_principal() {
        let issuer = test_issuer();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer not.a.jwt"));
        assert!(issuer.principal(&headers).is_none());
        assert!(issuer.principal(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_cookie_attributes() {
        let issuer = test_issuer();
        let cookie = issuer.session_cookie("abc");
        assert!(cookie.starts_with("kms_session=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(issuer.clear_cookie().contains("Max-Age=0"));
    }
}
