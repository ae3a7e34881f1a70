//! Bearer credentials: the identity model and the validator seam.
//!
//! The auth gate (see [`middleware::auth`](crate::middleware::AuthGate)) only
//! extracts the credential. Deciding whether it is valid belongs to a
//! [`CredentialValidator`]; [`JwtValidator`] is the HS256 implementation the
//! binary ships with.

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::response::{IntoResponse, Response};

/// The authenticated caller, attached to the request by the auth gate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Identity {
    /// Stable subject identifier (the user id).
    pub subject: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,

    #[error("invalid credential: {0}")]
    InvalidCredential(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let mut res = Response::error(http::StatusCode::UNAUTHORIZED, &self.to_string());
        res.insert_header(
            http::header::WWW_AUTHENTICATE,
            http::HeaderValue::from_static("Bearer"),
        );
        res
    }
}

/// Validates an opaque bearer token.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user identifier)
    pub sub: String,
    /// Expiration time (as Unix timestamp)
    pub exp: u64,
    /// Issued at (as Unix timestamp)
    pub iat: u64,
}

impl Claims {
    pub fn new(subject: String, ttl: Duration) -> Self {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        Self { sub: subject, iat: now, exp: now + ttl.as_secs() }
    }
}

/// Issues and verifies HS256 tokens with a shared secret.
pub struct JwtValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl JwtValidator {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, subject: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims::new(subject.to_owned(), self.ttl);
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        use jsonwebtoken::errors::ErrorKind;

        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| {
                let reason = match err.kind() {
                    ErrorKind::ExpiredSignature => "token expired",
                    ErrorKind::InvalidSignature => "invalid signature",
                    ErrorKind::InvalidToken => "malformed token",
                    _ => "token verification failed",
                };
                AuthError::InvalidCredential(reason.to_owned())
            })
    }
}

#[async_trait]
impl CredentialValidator for JwtValidator {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = self.verify(token)?;
        Ok(Identity { subject: claims.sub })
    }
}
