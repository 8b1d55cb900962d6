//! JWT token generation and validation.
//!
//! Access tokens are stateless and carry the subject's capability snapshot.
//! Refresh tokens only carry the user and the opaque token identity that keys
//! the server-side record. Both are HS256 and signed with the same secret.

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capability::{CapabilitySet, Role};

/// The only signing algorithm accepted or produced.
const ALGORITHM: Algorithm = Algorithm::HS256;

/// Authorization scheme expected in the `Authorization` header.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims for access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user UUID)
    pub sub: String,
    /// Display name
    pub username: String,
    pub role: Role,
    /// Capabilities resolved from the role at issuance time
    pub capabilities: CapabilitySet,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// JWT claims for refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Token identity, doubles as the lookup key of the stored record
    pub jti: String,
    /// Subject (user UUID)
    pub sub: String,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Validity periods for minted tokens.
///
/// Zero or negative lifetimes are accepted and produce tokens that never
/// verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    pub access: Duration,
    pub refresh: Duration,
}

/// Access token duration: 15 minutes
pub const DEFAULT_ACCESS_TOKEN_SECS: i64 = 15 * 60;

/// Refresh token duration: 2 weeks
pub const DEFAULT_REFRESH_TOKEN_SECS: i64 = 14 * 24 * 60 * 60;

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access: Duration::seconds(DEFAULT_ACCESS_TOKEN_SECS),
            refresh: Duration::seconds(DEFAULT_REFRESH_TOKEN_SECS),
        }
    }
}

/// Result of minting an access token.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    /// Seconds until expiry, as reported to clients
    pub expires_in: i64,
}

/// Result of minting a refresh token.
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub token: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Errors that can occur during JWT operations.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("bad token signature")]
    BadSignature,
    #[error("token asserts an unexpected signing algorithm")]
    AlgorithmMismatch,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("wrong token type")]
    WrongTokenType,
    #[error("failed to sign token: {0}")]
    Signing(jsonwebtoken::errors::Error),
}

impl TokenError {
    /// Short reason string for logs.
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::Malformed => "malformed",
            TokenError::BadSignature => "bad_signature",
            TokenError::AlgorithmMismatch => "algorithm_mismatch",
            TokenError::Expired => "expired",
            TokenError::NotYetValid => "not_yet_valid",
            TokenError::WrongTokenType => "wrong_token_type",
            TokenError::Signing(_) => "signing",
        }
    }

    fn from_decode(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            ErrorKind::InvalidAlgorithm => TokenError::AlgorithmMismatch,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::ImmatureSignature => TokenError::NotYetValid,
            _ => TokenError::Malformed,
        }
    }
}

/// Errors from parsing an `Authorization` header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BearerError {
    #[error("authorization header is empty")]
    Empty,
    #[error("authorization header does not use the Bearer scheme")]
    WrongScheme,
}

/// Extract the token from a `"Bearer <token>"` header value.
///
/// The scheme match is case-sensitive. An empty token after a well-formed
/// prefix is returned as-is and left for verification to reject.
pub fn extract_bearer(header_value: &str) -> Result<&str, BearerError> {
    if header_value.is_empty() {
        return Err(BearerError::Empty);
    }
    header_value
        .strip_prefix(BEARER_PREFIX)
        .ok_or(BearerError::WrongScheme)
}

/// Configuration for JWT operations.
#[derive(Clone)]
pub struct JwtConfig {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetimes: TokenLifetimes,
}

impl JwtConfig {
    /// Create a new JWT configuration with the given secret.
    pub fn new(secret: &[u8], lifetimes: TokenLifetimes) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            lifetimes,
        }
    }

    pub fn lifetimes(&self) -> TokenLifetimes {
        self.lifetimes
    }

    /// Mint an access token carrying the subject's identity and capabilities.
    pub fn mint_access(
        &self,
        user_uuid: &str,
        username: &str,
        role: &Role,
        capabilities: &CapabilitySet,
    ) -> Result<AccessToken, TokenError> {
        let now = Utc::now().timestamp();
        let lifetime = self.lifetimes.access.num_seconds();

        let claims = AccessClaims {
            sub: user_uuid.to_string(),
            username: username.to_string(),
            role: role.clone(),
            capabilities: capabilities.clone(),
            token_type: TokenType::Access,
            iat: now,
            nbf: now,
            exp: now + lifetime,
        };

        let token = jsonwebtoken::encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(TokenError::Signing)?;

        Ok(AccessToken {
            token,
            expires_in: lifetime,
        })
    }

    /// Mint a refresh token around an already generated token identity.
    pub fn mint_refresh(&self, user_uuid: &str, identity: &str) -> Result<RefreshToken, TokenError> {
        let now = Utc::now().timestamp();
        let exp = now + self.lifetimes.refresh.num_seconds();

        let claims = RefreshClaims {
            jti: identity.to_string(),
            sub: user_uuid.to_string(),
            token_type: TokenType::Refresh,
            iat: now,
            nbf: now,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(TokenError::Signing)?;

        Ok(RefreshToken {
            token,
            issued_at: now,
            expires_at: exp,
        })
    }

    /// Validate and decode an access token.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let claims: AccessClaims = self.decode(token)?;
        if claims.token_type != TokenType::Access {
            return Err(TokenError::WrongTokenType);
        }
        check_window(claims.nbf, claims.exp)?;
        Ok(claims)
    }

    /// Validate and decode a refresh token.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let claims: RefreshClaims = self.decode(token)?;
        if claims.token_type != TokenType::Refresh {
            return Err(TokenError::WrongTokenType);
        }
        check_window(claims.nbf, claims.exp)?;
        Ok(claims)
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, token: &str) -> Result<T, TokenError> {
        // Time checks are done in check_window so that a token expiring this
        // very second is already rejected.
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_required_spec_claims(&["exp", "nbf", "sub"]);

        jsonwebtoken::decode::<T>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(TokenError::from_decode)
    }
}

fn check_window(nbf: i64, exp: i64) -> Result<(), TokenError> {
    let now = Utc::now().timestamp();
    if exp <= now {
        return Err(TokenError::Expired);
    }
    if nbf > now {
        return Err(TokenError::NotYetValid);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: &[u8]) -> JwtConfig {
        JwtConfig::new(secret, TokenLifetimes::default())
    }

    fn manager_caps() -> CapabilitySet {
        ["tasks:read", "tasks:write"].into_iter().collect()
    }

    #[test]
    fn test_mint_and_verify_access_token() {
        let config = config(b"test-secret-key-for-testing");

        let result = config
            .mint_access("uuid-123", "alice", &Role::from("manager"), &manager_caps())
            .unwrap();
        assert_eq!(result.expires_in, DEFAULT_ACCESS_TOKEN_SECS);

        let claims = config.verify_access(&result.token).unwrap();
        assert_eq!(claims.sub, "uuid-123");
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.role, Role::from("manager"));
        assert_eq!(claims.capabilities, manager_caps());
        assert_eq!(claims.token_type, TokenType::Access);
        assert_eq!(claims.nbf, claims.iat);
        assert_eq!(claims.exp, claims.iat + DEFAULT_ACCESS_TOKEN_SECS);
    }

    #[test]
    fn test_mint_and_verify_refresh_token() {
        let config = config(b"test-secret-key-for-testing");

        let result = config.mint_refresh("uuid-123", "identity-abc").unwrap();
        assert_eq!(result.expires_at - result.issued_at, DEFAULT_REFRESH_TOKEN_SECS);

        let claims = config.verify_refresh(&result.token).unwrap();
        assert_eq!(claims.sub, "uuid-123");
        assert_eq!(claims.jti, "identity-abc");
        assert_eq!(claims.token_type, TokenType::Refresh);
        assert_eq!(claims.exp, result.expires_at);
    }

    #[test]
    fn test_empty_capabilities_round_trip() {
        let config = config(b"test-secret-key-for-testing");
        let token = config
            .mint_access("uuid-1", "bob", &Role::from("ghost"), &CapabilitySet::new())
            .unwrap();
        let claims = config.verify_access(&token.token).unwrap();
        assert!(claims.capabilities.is_empty());
    }

    #[test]
    fn test_wrong_token_type_rejected() {
        let config = config(b"test-secret-key-for-testing");

        let access = config
            .mint_access("uuid-123", "alice", &Role::from("user"), &manager_caps())
            .unwrap();
        let refresh = config.mint_refresh("uuid-123", "identity").unwrap();

        assert!(config.verify_refresh(&access.token).is_err());
        assert!(config.verify_access(&refresh.token).is_err());
    }

    #[test]
    fn test_malformed_token() {
        let config = config(b"test-secret-key-for-testing");
        assert!(matches!(
            config.verify_access("invalid-token"),
            Err(TokenError::Malformed)
        ));
        assert!(matches!(config.verify_access(""), Err(TokenError::Malformed)));
    }

    #[test]
    fn test_wrong_secret() {
        let config1 = config(b"secret-1");
        let config2 = config(b"secret-2");

        let access = config1
            .mint_access("uuid-123", "alice", &Role::from("user"), &manager_caps())
            .unwrap();
        assert!(matches!(
            config2.verify_access(&access.token),
            Err(TokenError::BadSignature)
        ));

        let refresh = config1.mint_refresh("uuid-123", "identity").unwrap();
        assert!(matches!(
            config2.verify_refresh(&refresh.token),
            Err(TokenError::BadSignature)
        ));
    }

    #[test]
    fn test_zero_and_negative_lifetimes_expire() {
        for secs in [0, -60] {
            let lifetimes = TokenLifetimes {
                access: Duration::seconds(secs),
                refresh: Duration::seconds(secs),
            };
            let config = JwtConfig::new(b"test-secret", lifetimes);

            let access = config
                .mint_access("uuid-123", "alice", &Role::from("user"), &manager_caps())
                .unwrap();
            assert!(matches!(
                config.verify_access(&access.token),
                Err(TokenError::Expired)
            ));

            let refresh = config.mint_refresh("uuid-123", "identity").unwrap();
            assert!(matches!(
                config.verify_refresh(&refresh.token),
                Err(TokenError::Expired)
            ));
        }
    }

    #[test]
    fn test_not_yet_valid_token() {
        let secret = b"test-secret";
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: "uuid-123".to_string(),
            username: "alice".to_string(),
            role: Role::from("user"),
            capabilities: CapabilitySet::new(),
            token_type: TokenType::Access,
            iat: now,
            nbf: now + 3600,
            exp: now + 7200,
        };
        let token = jsonwebtoken::encode(
            &Header::new(ALGORITHM),
            &claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap();

        let result = config(secret).verify_access(&token);
        assert!(matches!(result, Err(TokenError::NotYetValid)));
    }

    #[test]
    fn test_other_algorithm_family_rejected() {
        let secret = b"test-secret";
        let now = Utc::now().timestamp();
        let claims = RefreshClaims {
            jti: "identity".to_string(),
            sub: "uuid-123".to_string(),
            token_type: TokenType::Refresh,
            iat: now,
            nbf: now,
            exp: now + 60,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap();

        let result = config(secret).verify_refresh(&token);
        assert!(matches!(result, Err(TokenError::AlgorithmMismatch)));
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc"), Ok("abc"));
        assert_eq!(extract_bearer("Bearer "), Ok(""));
        assert_eq!(extract_bearer(""), Err(BearerError::Empty));
        assert_eq!(extract_bearer("Basic xyz"), Err(BearerError::WrongScheme));
        assert_eq!(extract_bearer("abc"), Err(BearerError::WrongScheme));
        assert_eq!(extract_bearer("bearer abc"), Err(BearerError::WrongScheme));
        assert_eq!(extract_bearer("Bearer"), Err(BearerError::WrongScheme));
    }
}
