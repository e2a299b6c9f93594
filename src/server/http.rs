//! HTTP server implementation
//!
//! hyper http1 with TokioIo, one task per connection. Transport concerns
//! (CORS, body collection, session lookup) are settled here; everything
//! below `/api` is handed to `route` as an `ApiRequest`.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::auth::{AccessGate, CasIdentityProvider, IdentityProvider, IdentityResolver, SessionIssuer};
use crate::config::Args;
use crate::routes::{self, error_response, no_route, ApiRequest, FullBody};
use crate::services::{Notifier, Services};
use crate::store::Stores;
use crate::types::{KeeperError, Result};

/// Largest request body accepted below `/api`
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub services: Services,
    pub sessions: SessionIssuer,
    /// Single sign-on provider (CAS)
    pub identity: Arc<dyn IdentityProvider>,
    /// Maps verified principals onto stored users
    pub resolver: IdentityResolver,
}

impl AppState {
    /// Wire every service over `stores`.
    ///
    /// Dev mode turns on the gate's role bypass and falls back to a fixed
    /// session secret when none is configured.
    pub fn new(args: Args, stores: &Stores, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let gate = if args.dev_mode {
            AccessGate::with_role_bypass(stores.users.clone())
        } else {
            AccessGate::new(stores.users.clone())
        };

        let ttl = args.session_ttl_seconds();
        let sessions = match (&args.session_secret, args.dev_mode) {
            (Some(secret), _) => SessionIssuer::new(secret.clone(), ttl, args.cookie_secure)?,
            (None, true) => SessionIssuer::new_dev(ttl),
            (None, false) => {
                return Err(KeeperError::Config(
                    "SESSION_SECRET is required in production mode".into(),
                ))
            }
        };

        let identity = Arc::new(CasIdentityProvider::new(
            &args.cas_server_url,
            &args.service_url,
        )?);
        let resolver = IdentityResolver::new(stores.users.clone());
        let services = Services::new(
            stores,
            gate,
            notifier,
            args.admin_email.clone(),
            args.mail_sender.clone(),
        );

        Ok(Self {
            args,
            services,
            sessions,
            identity,
            resolver,
        })
    }

    /// Swap the identity provider (tests and alternative SSO backends)
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Keykeeper listening on {} ({} storage)",
        state.args.listen, state.args.storage
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - role checks are bypassed for signed-in users");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<FullBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    let mut response = match (&method, path.as_str()) {
        (&Method::OPTIONS, _) => preflight_response(),

        (&Method::GET, "/health") | (&Method::GET, "/healthz") => {
            routes::health::health_check(&state)
        }

        (_, p) if p == "/api" || p.starts_with("/api/") => {
            let api_path = p.trim_start_matches("/api").to_string();
            let query = req.uri().query().map(str::to_string);
            let principal = state.sessions.principal(req.headers());

            match read_body(req).await {
                Ok(body) => {
                    let api_req = ApiRequest {
                        method: method.clone(),
                        path: api_path,
                        query,
                        principal,
                        body,
                    };
                    route(&state, api_req).await
                }
                Err(e) => error_response(&e),
            }
        }

        _ => error_response(&no_route(&method, &path)),
    };

    apply_cors(response.headers_mut(), state.args.cors_origin.as_deref());
    Ok(response)
}

/// Collect the request body, refusing anything over `MAX_BODY_BYTES`
async fn read_body(req: Request<Incoming>) -> Result<Bytes> {
    Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| KeeperError::InvalidInput(format!("Failed to read request body: {}", e)))
}

/// Dispatch a request below `/api`; errors are rendered here
pub async fn route(state: &AppState, req: ApiRequest) -> Response<FullBody> {
    match dispatch(state, &req).await {
        Ok(response) => response,
        Err(e) => error_response(&e),
    }
}

async fn dispatch(state: &AppState, req: &ApiRequest) -> Result<Response<FullBody>> {
    let segments = req.segments()?;
    let parts: Vec<&str> = segments.iter().map(String::as_str).collect();

    match parts.as_slice() {
        [] if req.method == Method::GET => Ok(routes::health::banner(state)),
        ["cas", rest @ ..] => routes::cas::handle(state, req, rest).await,
        ["keys", rest @ ..] => routes::keys::handle(state, req, rest).await,
        ["users", rest @ ..] => routes::users::handle(state, req, rest).await,
        ["ledger", rest @ ..] => routes::ledger::handle(state, req, rest).await,
        ["email", rest @ ..] => routes::email::handle(state, req, rest).await,
        ["audit"] if req.method == Method::GET => routes::audit::handle(state, req).await,
        _ => Err(no_route(&req.method, &req.path)),
    }
}

/// CORS preflight response
fn preflight_response() -> Response<FullBody> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET, POST, PATCH, DELETE, OPTIONS"),
    );
    headers.insert("Access-Control-Max-Age", HeaderValue::from_static("600"));
    response
}

/// Browsers only send the session cookie cross-origin to a named origin
fn apply_cors(headers: &mut HeaderMap, origin: Option<&str>) {
    match origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        Some(origin) => {
            headers.insert("Access-Control-Allow-Origin", origin);
            headers.insert(
                "Access-Control-Allow-Credentials",
                HeaderValue::from_static("true"),
            );
            headers.insert("Vary", HeaderValue::from_static("Origin"));
        }
        None => {
            headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
        }
    }
}
