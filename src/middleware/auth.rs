use std::sync::Arc;

use async_trait::async_trait;
use http::header::AUTHORIZATION;
use tracing::debug;

use super::{Next, Stage};
use crate::auth::{AuthError, CredentialValidator, Identity};
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// Rejects requests without a valid bearer credential.
///
/// On success the caller's [`Identity`] is inserted into the request
/// extensions; on failure the chain stops here with a `401`.
pub struct AuthGate {
    validator: Arc<dyn CredentialValidator>,
}

impl AuthGate {
    pub fn new(validator: Arc<dyn CredentialValidator>) -> Self {
        Self { validator }
    }

    pub async fn authenticate(&self, req: &Request) -> Result<Identity, AuthError> {
        let header = req
            .headers()
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingCredential)?;
        let header = header
            .to_str()
            .map_err(|_| AuthError::InvalidCredential("non-ascii authorization header".into()))?;
        let token = bearer_token(header).ok_or_else(|| {
            AuthError::InvalidCredential("expected `Bearer <token>`".into())
        })?;
        self.validator.validate(token).await
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[async_trait]
impl Stage for AuthGate {
    fn name(&self) -> &'static str { "auth" }

    async fn process(&self, mut req: Request, next: Next<'_>) -> Response {
        match self.authenticate(&req).await {
            Ok(identity) => {
                req.extensions_mut().insert(identity);
                next.run(req).await
            }
            Err(err) => {
                debug!(error = %err, "request rejected by auth gate");
                err.into_response()
            }
        }
    }
}
