//! Identity resolution
//!
//! The identity provider turns a one-time CAS ticket into a principal (pid).
//! The resolver maps that principal onto a stored user, provisioning a
//! requestor the first time a pid is seen.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::schemas::UserDoc;
use crate::store::UserStore;
use crate::types::validation::validate_pid;
use crate::types::{KeeperError, Result};

/// Exchanges external authentication assertions for a verified principal
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send a browser that needs to sign in
    fn login_url(&self, destination: &str) -> String;

    /// Where to send a browser after the local session is cleared
    fn logout_url(&self) -> String;

    /// Validate a one-time ticket. `Ok(None)` means the provider rejected it.
    async fn validate_ticket(&self, ticket: &str, destination: &str) -> Result<Option<String>>;
}

/// CAS 2.0 protocol client
pub struct CasIdentityProvider {
    server_url: String,
    service_url: String,
    http_client: reqwest::Client,
}

impl CasIdentityProvider {
    pub fn new(server_url: &str, service_url: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| KeeperError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            service_url: service_url.to_string(),
            http_client,
        })
    }

    /// Callback URL CAS redirects to, carrying the final destination along
    fn service_for(&self, destination: &str) -> String {
        format!(
            "{}?destination={}",
            self.service_url,
            urlencoding::encode(destination)
        )
    }
}

#[async_trait]
impl IdentityProvider for CasIdentityProvider {
    fn login_url(&self, destination: &str) -> String {
        format!(
            "{}/login?service={}",
            self.server_url,
            urlencoding::encode(&self.service_for(destination))
        )
    }

    fn logout_url(&self) -> String {
        format!("{}/logout", self.server_url)
    }

    async fn validate_ticket(&self, ticket: &str, destination: &str) -> Result<Option<String>> {
        let url = format!("{}/serviceValidate", self.server_url);
        let service = self.service_for(destination);

        let response = self
            .http_client
            .get(&url)
            .query(&[("service", service.as_str()), ("ticket", ticket)])
            .send()
            .await
            .map_err(|e| KeeperError::Internal(format!("CAS request failed: {}", e)))?;

        if !response.status().is_success() {
            warn!("CAS serviceValidate returned {}", response.status());
            return Ok(None);
        }

        let body = response
            .text()
            .await
            .map_err(|e| KeeperError::Internal(format!("CAS response unreadable: {}", e)))?;

        Ok(parse_cas_user(&body))
    }
}

/// Extract `<cas:user>` from a CAS 2.0 service response
fn parse_cas_user(body: &str) -> Option<String> {
    if body.contains("<cas:authenticationFailure") {
        debug!("CAS rejected ticket");
        return None;
    }
    let start = body.find("<cas:user>")? + "<cas:user>".len();
    let end = body[start..].find("</cas:user>")? + start;
    let user = body[start..end].trim();
    if user.is_empty() {
        None
    } else {
        Some(user.to_string())
    }
}

/// Maps verified principals onto stored users
#[derive(Clone)]
pub struct IdentityResolver {
    users: Arc<dyn UserStore>,
}

impl IdentityResolver {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Return the user for `pid`, provisioning a requestor on first sight.
    ///
    /// Two first logins racing each other both end up reading the same row.
    pub async fn resolve(&self, pid: &str) -> Result<UserDoc> {
        validate_pid(pid)?;

        if let Some(user) = self.users.find_by_pid(pid).await? {
            return Ok(user);
        }

        match self.users.insert(UserDoc::provisional(pid.to_string())).await {
            Ok(()) => info!("Provisioned new requestor '{}'", pid),
            Err(KeeperError::Conflict(_)) => {
                debug!("User '{}' provisioned concurrently", pid);
            }
            Err(e) => return Err(e),
        }

        self.users.find_by_pid(pid).await?.ok_or_else(|| {
            KeeperError::Internal(format!("User '{pid}' vanished right after provisioning"))
        })
    }
}
