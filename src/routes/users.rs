//! User directory and custody routes (`/api/users/...`)

use hyper::{Method, Response};

use super::{no_route, ok_json, success_response, views, ApiRequest, FullBody, KeyView, UserView};
use crate::server::AppState;
use crate::services::{NewUser, UserUpdate};
use crate::types::Result;

pub async fn handle(state: &AppState, req: &ApiRequest, rest: &[&str]) -> Result<Response<FullBody>> {
    let services = &state.services;
    let principal = req.principal();

    match (&req.method, rest) {
        (&Method::GET, []) => {
            let users = services.directory.list(principal).await?;
            ok_json(&views::<_, UserView>(users))
        }
        (&Method::POST, []) => {
            let input: NewUser = req.json()?;
            let user = services.directory.create(principal, input).await?;
            success_response(format!("Successfully added user {}", user.pid))
        }
        // `name` is a reserved pid, so these never shadow a user's routes
        (&Method::GET, ["name", full_name]) => {
            let user = services.directory.get_by_name(principal, full_name).await?;
            ok_json(&UserView::from(user))
        }
        (&Method::GET, ["name", full_name, "keys"]) => {
            let keys = services.custody.keys_of_name(principal, full_name).await?;
            ok_json(&views::<_, KeyView>(keys))
        }
        (&Method::GET, [pid]) => {
            let user = services.directory.get(principal, pid).await?;
            ok_json(&UserView::from(user))
        }
        (&Method::PATCH, [pid]) => {
            let update: UserUpdate = req.json()?;
            let user = services.directory.update(principal, pid, update).await?;
            success_response(format!("Successfully updated user {}", user.pid))
        }
        (&Method::DELETE, [pid]) => {
            services.directory.delete(principal, pid).await?;
            success_response(format!("Successfully deleted user {pid}"))
        }
        (&Method::GET, [pid, "keys"]) => {
            let keys = services.custody.keys_of(principal, pid).await?;
            ok_json(&views::<_, KeyView>(keys))
        }
        (&Method::POST, [pid, "keys", tag]) => {
            services.custody.assign(principal, pid, tag).await?;
            success_response(format!("Successfully assigned key {tag} to {pid}"))
        }
        (&Method::DELETE, [pid, "keys", tag]) => {
            services.custody.unassign(principal, pid, tag).await?;
            success_response(format!("Successfully removed key {tag} from {pid}"))
        }
        _ => Err(no_route(&req.method, &req.path)),
    }
}
