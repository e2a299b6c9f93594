//! Consistency audit route (`/api/audit`)

use hyper::Response;

use super::{ok_json, ApiRequest, FullBody};
use crate::server::AppState;
use crate::types::Result;

pub async fn handle(state: &AppState, req: &ApiRequest) -> Result<Response<FullBody>> {
    let report = state.services.custody.audit(req.principal()).await?;
    ok_json(&report)
}
