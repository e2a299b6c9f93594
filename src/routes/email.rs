//! Notification routes (`/api/email/...`)

use hyper::{Method, Response};
use serde::Serialize;

use super::{no_route, ok_json, success_response, ApiRequest, FullBody};
use crate::server::AppState;
use crate::services::{KeyRequest, ReportRequest, ReturnRequest};
use crate::types::Result;

#[derive(Serialize)]
struct AdminEmail {
    admin_email: String,
}

#[derive(Serialize)]
struct Dispatched {
    success: bool,
    message: String,
    reference: String,
}

fn dispatched(message: &str, reference: String) -> Result<Response<FullBody>> {
    ok_json(&Dispatched {
        success: true,
        message: message.to_string(),
        reference,
    })
}

pub async fn handle(state: &AppState, req: &ApiRequest, rest: &[&str]) -> Result<Response<FullBody>> {
    let notifications = &state.services.notifications;
    let principal = req.principal();

    match (&req.method, rest) {
        (&Method::GET, []) => {
            let admin_email = notifications.admin_email(principal).await?;
            ok_json(&AdminEmail { admin_email })
        }
        (&Method::POST, ["request"]) => {
            let request: KeyRequest = req.json()?;
            let reference = notifications.request_key(principal, request).await?;
            dispatched("Request email queued", reference)
        }
        (&Method::POST, ["return"]) => {
            let request: ReturnRequest = req.json()?;
            let reference = notifications.request_return(principal, request).await?;
            dispatched("Return email queued", reference)
        }
        (&Method::POST, ["report"]) => {
            let request: ReportRequest = req.json()?;
            let reference = notifications.report_key(principal, request).await?;
            dispatched("Report email queued", reference)
        }
        (&Method::PATCH, [address]) => {
            notifications.set_admin_email(principal, address).await?;
            success_response(format!("Successfully changed admin email to {address}"))
        }
        _ => Err(no_route(&req.method, &req.path)),
    }
}
