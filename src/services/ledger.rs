//! Custody ledger
//!
//! Append-mostly history of acquire/return/report events. Records copy the
//! tag and pid by value and are not checked against live keys or users, so
//! history outlives the things it describes. Any signed-in user may write.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::auth::{AccessGate, PermissionLevel};
use crate::db::schemas::{Exchange, RecordDoc};
use crate::store::{LedgerStore, RecordPatch};
use crate::types::validation::{validate_pid, validate_record_comment, validate_tag_number};
use crate::types::{KeeperError, Result};

/// Body for appending a record
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewRecord {
    pub tag_number: String,
    pub pid: String,
    pub exchange: Exchange,
    pub comment: String,
}

/// Body for updating a record; `date` is an ISO-8601 string
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordUpdate {
    pub tag_number: Option<String>,
    pub pid: Option<String>,
    pub date: Option<String>,
    pub exchange: Option<Exchange>,
    pub comment: Option<String>,
}

/// Parse an ISO-8601 timestamp. Offsets are honored; naive times and bare
/// dates are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }

    Err(KeeperError::InvalidInput(format!(
        "'{raw}' is not an ISO-8601 date"
    )))
}

#[derive(Clone)]
pub struct Ledger {
    records: Arc<dyn LedgerStore>,
    gate: AccessGate,
}

impl Ledger {
    pub fn new(records: Arc<dyn LedgerStore>, gate: AccessGate) -> Self {
        Self { records, gate }
    }

    pub async fn append(&self, principal: Option<&str>, input: NewRecord) -> Result<RecordDoc> {
        self.gate
            .authorize(principal, PermissionLevel::Authenticated)
            .await?;

        let tag_number = input.tag_number.trim().to_string();
        let pid = input.pid.trim().to_string();
        let comment = input.comment.trim().to_string();
        validate_tag_number(&tag_number)?;
        validate_pid(&pid)?;
        validate_record_comment(&comment)?;

        let record = RecordDoc::new(tag_number, pid, input.exchange, comment);
        self.records.insert(record.clone()).await?;
        info!(
            "Ledger: {} {} key {} ({})",
            record.pid, record.exchange, record.tag_number, record.id
        );
        Ok(record)
    }

    pub async fn get(&self, principal: Option<&str>, id: &str) -> Result<RecordDoc> {
        self.gate
            .authorize(principal, PermissionLevel::Authenticated)
            .await?;
        self.records.find(id).await?.ok_or_else(|| not_found(id))
    }

    pub async fn list(&self, principal: Option<&str>) -> Result<Vec<RecordDoc>> {
        self.gate
            .authorize(principal, PermissionLevel::Authenticated)
            .await?;
        self.records.list().await
    }

    pub async fn update(
        &self,
        principal: Option<&str>,
        id: &str,
        update: RecordUpdate,
    ) -> Result<RecordDoc> {
        self.gate
            .authorize(principal, PermissionLevel::Authenticated)
            .await?;

        let mut patch = RecordPatch {
            exchange: update.exchange,
            ..Default::default()
        };
        if let Some(tag) = update.tag_number {
            let tag = tag.trim().to_string();
            validate_tag_number(&tag)?;
            patch.tag_number = Some(tag);
        }
        if let Some(pid) = update.pid {
            let pid = pid.trim().to_string();
            validate_pid(&pid)?;
            patch.pid = Some(pid);
        }
        if let Some(date) = update.date {
            patch.date = Some(parse_timestamp(&date)?);
        }
        if let Some(comment) = update.comment {
            let comment = comment.trim().to_string();
            validate_record_comment(&comment)?;
            patch.comment = Some(comment);
        }

        if patch.is_empty() {
            return Err(KeeperError::InvalidInput("Nothing to update".into()));
        }

        let mut record = self.records.find(id).await?.ok_or_else(|| not_found(id))?;
        if !self.records.update(id, &patch).await? {
            return Err(not_found(id));
        }
        patch.apply_to(&mut record);
        info!("Ledger: updated record {}", id);
        Ok(record)
    }

    pub async fn delete(&self, principal: Option<&str>, id: &str) -> Result<()> {
        self.gate
            .authorize(principal, PermissionLevel::Authenticated)
            .await?;
        if !self.records.delete(id).await? {
            return Err(not_found(id));
        }
        info!("Ledger: deleted record {}", id);
        Ok(())
    }
}

fn not_found(id: &str) -> KeeperError {
    KeeperError::NotFound(format!("Record with id {id} does not exist"))
}
