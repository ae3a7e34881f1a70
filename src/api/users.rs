use http::StatusCode;
use serde::Serialize;

use super::{Api, caller};
use crate::error::HandlerError;
use crate::request::Request;
use crate::response::Response;
use crate::services::{Login, Registration};

#[derive(Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
    expires_in: u64,
}

/// POST /api/v1/users/register
pub(super) async fn register(api: Api, req: Request) -> Result<Response, HandlerError> {
    let registration: Registration = req.json()?;
    let user = api.users.register(registration).await?;
    tracing::info!(user_id = %user.id, "user registered");
    Ok(Response::builder().status(StatusCode::CREATED).json(&user))
}

/// POST /api/v1/users/login
pub(super) async fn login(api: Api, req: Request) -> Result<Response, HandlerError> {
    let login: Login = req.json()?;
    let user = api.users.login(login).await?;
    let access_token = api
        .tokens
        .issue(&user.id.to_string())
        .map_err(|e| HandlerError::Internal(e.into()))?;
    Ok(Response::json(&TokenResponse {
        access_token,
        token_type: "Bearer",
        expires_in: api.tokens.ttl().as_secs(),
    }))
}

/// GET /api/v1/users/profile
pub(super) async fn profile(api: Api, req: Request) -> Result<Response, HandlerError> {
    let user = api.users.profile(caller(&req)?).await?;
    Ok(Response::json(&user))
}
