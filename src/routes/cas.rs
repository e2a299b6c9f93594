//! Single sign-on routes (`/api/cas/...`)
//!
//! Login bounces the browser to CAS; CAS calls back with a ticket, which is
//! validated, mapped to a (possibly new) user, and exchanged for a session
//! cookie before redirecting to the original destination.

use hyper::{Method, Response};
use serde::Deserialize;
use tracing::info;

use super::{no_route, ok_json, redirect_response, ApiRequest, FullBody, UserView};
use crate::server::AppState;
use crate::types::{KeeperError, Result};

#[derive(Debug, Default, Deserialize)]
struct LoginQuery {
    destination: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CallbackQuery {
    destination: Option<String>,
    ticket: Option<String>,
}

fn require_destination(destination: Option<String>) -> Result<String> {
    destination.filter(|d| !d.trim().is_empty()).ok_or_else(|| {
        KeeperError::InvalidInput(
            "No destination address provided; it is needed to send you back after sign-in".into(),
        )
    })
}

pub async fn handle(state: &AppState, req: &ApiRequest, rest: &[&str]) -> Result<Response<FullBody>> {
    match (&req.method, rest) {
        (&Method::GET, ["login"]) => {
            let query: LoginQuery = req.query()?;
            let destination = require_destination(query.destination)?;
            redirect_response(&state.identity.login_url(&destination), None)
        }
        (&Method::GET, ["login_callback"]) => {
            let query: CallbackQuery = req.query()?;
            let destination = require_destination(query.destination)?;
            let ticket = query
                .ticket
                .filter(|t| !t.is_empty())
                .ok_or_else(|| KeeperError::InvalidInput("Missing CAS ticket".into()))?;

            let pid = state
                .identity
                .validate_ticket(&ticket, &destination)
                .await?
                .ok_or_else(|| KeeperError::Unauthenticated("Failed to verify ticket".into()))?;

            let user = state.resolver.resolve(&pid).await?;
            let token = state.sessions.issue(&user.pid)?;
            info!("Signed in {}", user.pid);
            redirect_response(&destination, Some(&state.sessions.session_cookie(&token)))
        }
        (&Method::GET, ["logout"]) => {
            if let Some(pid) = req.principal() {
                info!("Signed out {}", pid);
            }
            redirect_response(
                &state.identity.logout_url(),
                Some(&state.sessions.clear_cookie()),
            )
        }
        (&Method::GET, ["info"]) => {
            let user = state.services.directory.current(req.principal()).await?;
            ok_json(&UserView::from(user))
        }
        _ => Err(no_route(&req.method, &req.path)),
    }
}
