//! Ledger routes (`/api/ledger/...`)

use hyper::{Method, Response};

use super::{no_route, ok_json, success_response, views, ApiRequest, FullBody, RecordView};
use crate::server::AppState;
use crate::services::{NewRecord, RecordUpdate};
use crate::types::Result;

pub async fn handle(state: &AppState, req: &ApiRequest, rest: &[&str]) -> Result<Response<FullBody>> {
    let ledger = &state.services.ledger;
    let principal = req.principal();

    match (&req.method, rest) {
        (&Method::GET, []) => {
            let records = ledger.list(principal).await?;
            ok_json(&views::<_, RecordView>(records))
        }
        (&Method::POST, []) => {
            let input: NewRecord = req.json()?;
            let record = ledger.append(principal, input).await?;
            ok_json(&RecordView::from(record))
        }
        (&Method::GET, [id]) => {
            let record = ledger.get(principal, id).await?;
            ok_json(&RecordView::from(record))
        }
        (&Method::PATCH, [id]) => {
            let update: RecordUpdate = req.json()?;
            ledger.update(principal, id, update).await?;
            success_response(format!("Successfully updated record {id}"))
        }
        (&Method::DELETE, [id]) => {
            ledger.delete(principal, id).await?;
            success_response(format!("Successfully deleted record {id}"))
        }
        _ => Err(no_route(&req.method, &req.path)),
    }
}
