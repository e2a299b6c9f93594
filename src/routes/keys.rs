//! Key inventory routes (`/api/keys/...`)

use hyper::{Method, Response};

use super::{no_route, ok_json, success_response, views, ApiRequest, FullBody, KeyView, UserView};
use crate::server::AppState;
use crate::services::{KeyUpdate, NewKey};
use crate::store::KeyFilter;
use crate::types::Result;

pub async fn handle(state: &AppState, req: &ApiRequest, rest: &[&str]) -> Result<Response<FullBody>> {
    let services = &state.services;
    let principal = req.principal();

    match (&req.method, rest) {
        (&Method::GET, []) => {
            let filter: KeyFilter = req.query()?;
            let keys = services.registry.list(principal, &filter).await?;
            ok_json(&views::<_, KeyView>(keys))
        }
        (&Method::POST, []) => {
            let input: NewKey = req.json()?;
            let key = services.registry.create(principal, input).await?;
            success_response(format!("Successfully added key with tag number {}", key.tag_number))
        }
        (&Method::GET, [tag]) => {
            let key = services.registry.get(principal, tag).await?;
            ok_json(&KeyView::from(key))
        }
        (&Method::PATCH, [tag]) => {
            let update: KeyUpdate = req.json()?;
            let key = services.registry.update(principal, tag, update).await?;
            success_response(format!("Successfully updated key with tag number {}", key.tag_number))
        }
        (&Method::DELETE, [tag]) => {
            services.custody.delete_cascade(principal, tag).await?;
            success_response(format!("Successfully deleted key with tag number {tag}"))
        }
        (&Method::GET, [tag, "owner"]) => {
            let owner = services.custody.owner(principal, tag).await?;
            ok_json(&UserView::from(owner))
        }
        (&Method::PATCH, [tag, "return"]) => {
            services.custody.return_key(principal, tag).await?;
            success_response(format!("Successfully returned key with tag number {tag}"))
        }
        _ => Err(no_route(&req.method, &req.path)),
    }
}
