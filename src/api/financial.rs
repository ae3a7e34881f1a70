use http::StatusCode;

use super::{Api, caller};
use crate::error::HandlerError;
use crate::request::Request;
use crate::response::Response;
use crate::services::NewRecord;

/// GET /api/v1/financial/data
pub(super) async fn list(api: Api, req: Request) -> Result<Response, HandlerError> {
    let records = api.financial.list(caller(&req)?).await?;
    Ok(Response::json(&records))
}

/// POST /api/v1/financial/data
pub(super) async fn create(api: Api, req: Request) -> Result<Response, HandlerError> {
    let user_id = caller(&req)?;
    let record: NewRecord = req.json()?;
    let created = api.financial.create(user_id, record).await?;
    Ok(Response::builder().status(StatusCode::CREATED).json(&created))
}

/// GET /api/v1/financial/analytics
pub(super) async fn analytics(api: Api, req: Request) -> Result<Response, HandlerError> {
    let summary = api.financial.analytics(caller(&req)?).await?;
    Ok(Response::json(&summary))
}
