//! HTTP routes for keykeeper
//!
//! The server strips `/api`, reads the whole body, and resolves the session
//! into a principal before any route runs, so handlers work on a plain
//! `ApiRequest` and return `Result<Response>`. Errors are rendered once, by
//! `error_response`.

pub mod audit;
pub mod cas;
pub mod email;
pub mod health;
pub mod keys;
pub mod ledger;
pub mod users;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE, LOCATION, SET_COOKIE};
use hyper::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::Role;
use crate::db::schemas::{Exchange, KeyDoc, KeyType, RecordDoc, UserDoc};
use crate::types::{KeeperError, Result};

pub type FullBody = Full<Bytes>;

// =============================================================================
// Request
// =============================================================================

/// A request after transport concerns are handled
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below `/api`, still percent-encoded
    pub path: String,
    pub query: Option<String>,
    /// Verified session principal, if any
    pub principal: Option<String>,
    pub body: Bytes,
}

impl ApiRequest {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: None,
            principal: None,
            body: Bytes::new(),
        }
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Non-empty, percent-decoded path segments
    pub fn segments(&self) -> Result<Vec<String>> {
        self.path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                urlencoding::decode(s)
                    .map(|decoded| decoded.into_owned())
                    .map_err(|_| KeeperError::InvalidInput(format!("Malformed path segment '{s}'")))
            })
            .collect()
    }

    /// Deserialize the JSON body into the operation's input type
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.is_empty() {
            return Err(KeeperError::InvalidInput("Missing JSON request body".into()));
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Deserialize the query string; a missing query reads as empty
    pub fn query<T: DeserializeOwned>(&self) -> Result<T> {
        serde_urlencoded::from_str(self.query.as_deref().unwrap_or(""))
            .map_err(|e| KeeperError::InvalidInput(format!("Invalid query: {}", e)))
    }
}

// =============================================================================
// Response bodies
// =============================================================================

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Key as returned to clients
#[derive(Debug, Serialize)]
pub struct KeyView {
    pub id: String,
    pub tag_number: String,
    pub series_id: String,
    pub sequence_id: i32,
    pub building: String,
    pub key_type: KeyType,
    pub location: Vec<String>,
    pub is_available: bool,
    pub comment: String,
}

impl From<KeyDoc> for KeyView {
    fn from(key: KeyDoc) -> Self {
        Self {
            id: key.id,
            tag_number: key.tag_number,
            series_id: key.series_id,
            sequence_id: key.sequence_id,
            building: key.building,
            key_type: key.key_type,
            location: key.location,
            is_available: key.is_available,
            comment: key.comment,
        }
    }
}

/// User as returned to clients; `owned_keys` holds key ids
#[derive(Debug, Serialize)]
pub struct UserView {
    pub pid: String,
    pub full_name: String,
    pub role: Role,
    pub owned_keys: Vec<String>,
}

impl From<UserDoc> for UserView {
    fn from(user: UserDoc) -> Self {
        Self {
            pid: user.pid,
            full_name: user.full_name,
            role: user.role,
            owned_keys: user.owned_keys,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecordView {
    pub id: String,
    pub tag_number: String,
    pub pid: String,
    pub date: DateTime<Utc>,
    pub exchange: Exchange,
    pub comment: String,
}

impl From<RecordDoc> for RecordView {
    fn from(record: RecordDoc) -> Self {
        Self {
            id: record.id,
            tag_number: record.tag_number,
            pid: record.pid,
            date: record.date,
            exchange: record.exchange,
            comment: record.comment,
        }
    }
}

pub fn views<D, V: From<D>>(docs: Vec<D>) -> Vec<V> {
    docs.into_iter().map(V::from).collect()
}

// =============================================================================
// Response helpers
// =============================================================================

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<FullBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub fn ok_json<T: Serialize>(body: &T) -> Result<Response<FullBody>> {
    Ok(json_response(StatusCode::OK, body))
}

pub fn success_response(message: impl Into<String>) -> Result<Response<FullBody>> {
    Ok(json_response(
        StatusCode::OK,
        &SuccessResponse {
            success: true,
            message: message.into(),
        },
    ))
}

pub fn error_response(err: &KeeperError) -> Response<FullBody> {
    let status = err.status_code();
    if status.is_server_error() {
        warn!("Request failed: {}", err);
    } else {
        debug!("Request rejected: {}", err);
    }
    json_response(
        status,
        &ErrorResponse {
            error: err.detail().to_string(),
            code: err.code().to_string(),
        },
    )
}

pub fn text_response(status: StatusCode, text: impl Into<String>) -> Response<FullBody> {
    let mut response = Response::new(Full::new(Bytes::from(text.into())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// 302 to `location`, optionally setting a cookie on the way
pub fn redirect_response(location: &str, set_cookie: Option<&str>) -> Result<Response<FullBody>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::FOUND;
    let location = HeaderValue::from_str(location)
        .map_err(|_| KeeperError::InvalidInput("Redirect target is not a valid URL".into()))?;
    response.headers_mut().insert(LOCATION, location);
    if let Some(cookie) = set_cookie {
        let cookie = HeaderValue::from_str(cookie)
            .map_err(|e| KeeperError::Internal(format!("Bad cookie header: {}", e)))?;
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    Ok(response)
}

/// Fallback for paths and methods no route claims
pub fn no_route(method: &Method, path: &str) -> KeeperError {
    KeeperError::NotFound(format!("No route for {method} {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_are_percent_decoded() {
        let req = ApiRequest::new(Method::GET, "/users/name/Jane%20Doe/keys");
        assert_eq!(
            req.segments().unwrap(),
            vec!["users", "name", "Jane Doe", "keys"]
        );
    }

    #[test]
    fn test_missing_body_is_invalid_input() {
        let req = ApiRequest::new(Method::POST, "/keys");
        let err = req.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, KeeperError::InvalidInput(_)));
    }

    #[test]
    fn test_error_response_shape() {
        let response = error_response(&KeeperError::Conflict("taken".into()));
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_redirect_sets_cookie() {
        let response = redirect_response("http://localhost:3000/", Some("kms_session=abc")).unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[SET_COOKIE], "kms_session=abc");
        assert!(redirect_response("bad\nurl", None).is_err());
    }
}
