//! JWT token generation and validation
//! Implements access token + refresh token pattern
//!
//! Tokens are HS256 only. The verify path pins the algorithm, issuer and
//! audience; expiry and not-before are checked against the injected clock.

use crate::{
    clock::SharedClock,
    config::SecurityConfig,
    error::{AppError, AuthError},
};
use chrono::Duration;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Minimum HS256 secret length in bytes
pub const MIN_SECRET_LENGTH: usize = 32;

/// Token type tag carried in the `type` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (account id)
    pub sub: String,

    /// Token type (access or refresh)
    #[serde(rename = "type")]
    pub token_type: TokenType,

    /// Issued at
    pub iat: i64,

    /// Not before (equal to iat)
    pub nbf: i64,

    /// Expiration
    pub exp: i64,

    /// JWT ID (unique token identifier, reserved for revocation)
    pub jti: String,

    pub iss: String,

    pub aud: String,
}

/// Token pair response
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64, // seconds until access token expires
}

/// Why a token was rejected. Internal only; clients see `AuthError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenRejection {
    #[error("malformed token")]
    Malformed,
    #[error("signature mismatch")]
    BadSignature,
    #[error("unexpected algorithm")]
    Algorithm,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("issuer mismatch")]
    IssuerMismatch,
    #[error("audience mismatch")]
    AudienceMismatch,
    #[error("token type mismatch")]
    TypeMismatch,
    #[error("token revoked")]
    Revoked,
    #[error("subject no longer exists")]
    UnknownSubject,
    #[error("tokens belong to different subjects")]
    SubjectMismatch,
}

impl TokenRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            TokenRejection::Malformed => "malformed",
            TokenRejection::BadSignature => "bad_signature",
            TokenRejection::Algorithm => "algorithm",
            TokenRejection::Expired => "expired",
            TokenRejection::NotYetValid => "not_yet_valid",
            TokenRejection::IssuerMismatch => "issuer_mismatch",
            TokenRejection::AudienceMismatch => "audience_mismatch",
            TokenRejection::TypeMismatch => "type_mismatch",
            TokenRejection::Revoked => "revoked",
            TokenRejection::UnknownSubject => "unknown_subject",
            TokenRejection::SubjectMismatch => "subject_mismatch",
        }
    }
}

impl From<TokenRejection> for AuthError {
    fn from(rejection: TokenRejection) -> Self {
        match rejection {
            TokenRejection::Expired => AuthError::TokenExpired,
            _ => AuthError::TokenInvalid,
        }
    }
}

/// JWT service
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    access_token_exp_secs: u64,
    refresh_token_exp_secs: u64,
    leeway_secs: i64,
    clock: SharedClock,
}

impl JwtService {
    /// Create JWT service from config
    pub fn from_config(config: &SecurityConfig, clock: SharedClock) -> Result<Self, AppError> {
        let secret = config.jwt_secret.expose_secret();

        // Ensure secret is at least 32 bytes for HS256
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(AppError::Config(format!(
                "JWT secret too short (min {} chars)",
                MIN_SECRET_LENGTH
            )));
        }

        if config.jwt_issuer.is_empty() || config.jwt_audience.is_empty() {
            return Err(AppError::Config("JWT issuer and audience are required".to_string()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        // exp/nbf are checked against the injected clock in `verify`
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_issuer(&[config.jwt_issuer.as_str()]);
        validation.set_audience(&[config.jwt_audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iat", "iss", "aud", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            access_token_exp_secs: config.access_token_exp_secs,
            refresh_token_exp_secs: config.refresh_token_exp_secs,
            leeway_secs: config.token_leeway_secs as i64,
            clock,
        })
    }

    pub fn access_ttl(&self) -> Duration {
        Duration::seconds(self.access_token_exp_secs as i64)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::seconds(self.refresh_token_exp_secs as i64)
    }

    /// Sign a token of the given type for `subject`
    pub fn issue(
        &self,
        subject: &str,
        token_type: TokenType,
        ttl: Duration,
    ) -> Result<String, AppError> {
        let now = self.clock.now();
        let expiration = now + ttl;

        let claims = Claims {
            sub: subject.to_string(),
            token_type,
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expiration.timestamp(),
            jti: Uuid::new_v4().to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Failed to encode {} token: {:?}", token_type.as_str(), e);
            AppError::Internal(format!("Failed to encode token: {}", e))
        })
    }

    /// Generate access token
    pub fn generate_access_token(&self, subject: &str) -> Result<String, AppError> {
        self.issue(subject, TokenType::Access, self.access_ttl())
    }

    /// Generate refresh token
    pub fn generate_refresh_token(&self, subject: &str) -> Result<String, AppError> {
        self.issue(subject, TokenType::Refresh, self.refresh_ttl())
    }

    /// Generate token pair
    pub fn generate_token_pair(&self, subject: &str) -> Result<TokenPair, AppError> {
        let access_token = self.generate_access_token(subject)?;

        let refresh_token = self.generate_refresh_token(subject)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "bearer",
            expires_in: self.access_token_exp_secs,
        })
    }

    /// Validate and decode token.
    ///
    /// With `expected` set, a token of the other type is rejected.
    pub fn verify(
        &self,
        token: &str,
        expected: Option<TokenType>,
    ) -> Result<Claims, TokenRejection> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                let rejection = match e.kind() {
                    ErrorKind::InvalidSignature => TokenRejection::BadSignature,
                    ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                        TokenRejection::Algorithm
                    }
                    ErrorKind::InvalidIssuer => TokenRejection::IssuerMismatch,
                    ErrorKind::InvalidAudience => TokenRejection::AudienceMismatch,
                    _ => TokenRejection::Malformed,
                };
                tracing::debug!(reason = rejection.reason(), "Token validation failed: {:?}", e);
                rejection
            })?
            .claims;

        let now = self.clock.now().timestamp();

        if now - self.leeway_secs >= claims.exp {
            tracing::debug!(jti = %claims.jti, "Token expired");
            return Err(TokenRejection::Expired);
        }

        if claims.nbf > now + self.leeway_secs {
            tracing::debug!(jti = %claims.jti, "Token used before nbf");
            return Err(TokenRejection::NotYetValid);
        }

        if let Some(expected) = expected {
            if claims.token_type != expected {
                tracing::debug!(
                    "Token type mismatch: expected '{}', got '{}'",
                    expected.as_str(),
                    claims.token_type.as_str()
                );
                return Err(TokenRejection::TypeMismatch);
            }
        }

        Ok(claims)
    }

    /// Validate access token specifically
    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenRejection> {
        self.verify(token, Some(TokenType::Access))
    }

    /// Validate refresh token specifically
    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenRejection> {
        self.verify(token, Some(TokenType::Refresh))
    }
}

impl fmt::Debug for JwtService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtService")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_exp_secs", &self.access_token_exp_secs)
            .field("refresh_token_exp_secs", &self.refresh_token_exp_secs)
            .finish_non_exhaustive()
    }
}
