//! Outbound notifications
//!
//! Mail is fire-and-forget: `dispatch` spawns delivery and returns at once,
//! and a failed delivery is logged, never propagated to the request that
//! triggered it. The admin address is state owned by the service, set at
//! construction and changed only through the admin-gated setter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::{AccessGate, PermissionLevel};
use crate::db::schemas::KeyType;
use crate::services::custody::CustodyCoordinator;
use crate::types::validation::{validate_email, validate_tag_number};
use crate::types::{KeeperError, Result};

/// A message ready for delivery
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Delivers notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log instead of sending them
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            to = ?notification.to,
            subject = %notification.subject,
            "Notification (not sent, no mail relay configured)"
        );
        debug!("{}", notification.body);
        Ok(())
    }
}

/// Posts notifications as JSON to an HTTP mail relay
pub struct RelayNotifier {
    relay_url: String,
    http_client: reqwest::Client,
}

impl RelayNotifier {
    pub fn new(relay_url: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| KeeperError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            relay_url: relay_url.to_string(),
            http_client,
        })
    }
}

#[async_trait]
impl Notifier for RelayNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let response = self
            .http_client
            .post(&self.relay_url)
            .json(notification)
            .send()
            .await
            .map_err(|e| KeeperError::Notification(format!("Mail relay unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(KeeperError::Notification(format!(
                "Mail relay returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Student id as a JSON number or string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StudentId {
    Number(u64),
    Text(String),
}

impl StudentId {
    /// The last four digits of a student id, exactly four digits
    fn digits(&self) -> Result<String> {
        let raw = match self {
            StudentId::Number(n) => n.to_string(),
            StudentId::Text(s) => s.trim().to_string(),
        };
        if raw.len() != 4 || !raw.chars().all(|c| c.is_ascii_digit()) {
            return Err(KeeperError::InvalidInput(format!(
                "student id must be four digits (got '{raw}')"
            )));
        }
        Ok(raw)
    }
}

/// Body for asking a key holder's supervisor for a key
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyRequest {
    pub student_id: StudentId,
    pub recipient: String,
    pub key_type: String,
    pub description: String,
    pub reason: String,
    pub supervisor: String,
}

/// Body for announcing a key return
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReturnRequest {
    pub tag_number: String,
}

/// Body for reporting a key lost or damaged
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportRequest {
    pub tag_number: String,
    pub reason: String,
}

/// Short reference carried in every subject line
fn reference_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

pub struct NotificationService {
    notifier: Arc<dyn Notifier>,
    admin_email: RwLock<String>,
    sender: String,
    custody: CustodyCoordinator,
    gate: AccessGate,
}

impl NotificationService {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        admin_email: String,
        sender: String,
        custody: CustodyCoordinator,
        gate: AccessGate,
    ) -> Self {
        Self {
            notifier,
            admin_email: RwLock::new(admin_email),
            sender,
            custody,
            gate,
        }
    }

    pub async fn admin_email(&self, principal: Option<&str>) -> Result<String> {
        self.gate.authorize(principal, PermissionLevel::Admin).await?;
        Ok(self.admin_email.read().await.clone())
    }

    pub async fn set_admin_email(&self, principal: Option<&str>, new_email: &str) -> Result<()> {
        let caller = self.gate.authorize(principal, PermissionLevel::Admin).await?;
        let new_email = new_email.trim();
        validate_email(new_email)?;

        *self.admin_email.write().await = new_email.to_string();
        info!("Admin email changed to {} by {}", new_email, caller.pid);
        Ok(())
    }

    /// Send a key request to the approver named in the body.
    /// Returns the reference id carried in the subject.
    pub async fn request_key(&self, principal: Option<&str>, request: KeyRequest) -> Result<String> {
        let caller = self
            .gate
            .authorize(principal, PermissionLevel::Authenticated)
            .await?;

        let student_id = request.student_id.digits()?;
        let recipient = request.recipient.trim().to_string();
        validate_email(&recipient)?;
        let key_type: KeyType = request.key_type.parse()?;

        let reference = reference_id();
        let body = format!(
            "{} ({}) is requesting a key.\n\n\
             Last 4 digits of student id: {}\n\
             Key type: {}\n\
             Description: {}\n\
             Reason: {}\n\
             Supervisor: {}\n\n\
             To approve, contact the room owner and/or supervisor, then arrange a time to hand over the key.",
            caller.full_name,
            caller.pid,
            student_id,
            key_type,
            request.description.trim(),
            request.reason.trim(),
            request.supervisor.trim(),
        );

        self.dispatch(Notification {
            from: self.sender.clone(),
            to: vec![recipient],
            subject: format!("Physical key request for {} (Reference: {})", caller.pid, reference),
            body,
        });
        Ok(reference)
    }

    /// Tell the administrator a user wants to hand a key back
    pub async fn request_return(
        &self,
        principal: Option<&str>,
        request: ReturnRequest,
    ) -> Result<String> {
        let caller = self
            .gate
            .authorize(principal, PermissionLevel::Authenticated)
            .await?;
        let tag_number = request.tag_number.trim();
        validate_tag_number(tag_number)?;

        let reference = reference_id();
        let body = format!(
            "{} ({}) wants to return the key with tag {}.\n\n\
             Email {} with instructions for handing it back. Once it is in hand, \
             unassign it from {} and mark it returned.",
            caller.full_name, caller.pid, tag_number, caller.pid, caller.pid
        );

        let admin = self.admin_email.read().await.clone();
        self.dispatch(Notification {
            from: self.sender.clone(),
            to: vec![admin],
            subject: format!(
                "Key return from {} for key {} (Request id: {})",
                caller.pid, tag_number, reference
            ),
            body,
        });
        Ok(reference)
    }

    /// Record that the caller's key is lost or damaged and alert the administrator.
    /// The key stays unavailable.
    pub async fn report_key(
        &self,
        principal: Option<&str>,
        request: ReportRequest,
    ) -> Result<String> {
        let caller = self
            .gate
            .authorize(principal, PermissionLevel::Authenticated)
            .await?;
        let tag_number = request.tag_number.trim();
        let (user, key) = self
            .custody
            .report(principal, &caller.pid, tag_number)
            .await?;

        let reference = reference_id();
        let body = format!(
            "{} ({}) has reported the key with tag {}.\n\
             Reason: {}\n\n\
             The key stays unavailable. If it is found or remade, unassign it and mark it returned.",
            user.full_name,
            user.pid,
            key.tag_number,
            request.reason.trim()
        );

        let admin = self.admin_email.read().await.clone();
        self.dispatch(Notification {
            from: self.sender.clone(),
            to: vec![admin],
            subject: format!(
                "NOTICE: key {} reported by {} (Request id: {})",
                key.tag_number, user.pid, reference
            ),
            body,
        });
        Ok(reference)
    }

    /// Hand the notification to the runtime. Delivery failures are logged only.
    pub fn dispatch(&self, notification: Notification) -> JoinHandle<()> {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.send(&notification).await {
                warn!(
                    subject = %notification.subject,
                    "Notification delivery failed: {}", e
                );
            }
        })
    }
}
