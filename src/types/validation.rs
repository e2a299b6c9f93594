//! Field format rules shared by the registry, directory, and ledger

use regex::Regex;
use std::sync::LazyLock;

use crate::types::{KeeperError, Result};

pub const MIN_SEQUENCE_ID: i64 = 1;
pub const MAX_SEQUENCE_ID: i64 = 9999;
pub const MAX_SERIES_LENGTH: usize = 10;
pub const MAX_BUILDING_LENGTH: usize = 20;
pub const MAX_LOCATION_LENGTH: usize = 15;
pub const MIN_PID_LENGTH: usize = 3;
pub const MAX_PID_LENGTH: usize = 320;
pub const MAX_FULL_NAME_LENGTH: usize = 60;
pub const MAX_RECORD_COMMENT_LENGTH: usize = 240;

/// Path segments under `/users` that can never be a pid
pub const RESERVED_PIDS: &[&str] = &["name"];

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+[0-9.]*$").expect("tag pattern compiles"));
static SERIES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\-a-zA-Z0-9]+$").expect("series pattern compiles"));
static BUILDING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\-a-zA-Z0-9\s]+$").expect("building pattern compiles"));
static LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\-a-zA-Z0-9 ]+$").expect("location pattern compiles"));
static FULL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z\s]+$").expect("name pattern compiles"));
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9]+[.\-_])*[A-Za-z0-9]+@[A-Za-z0-9\-]+(\.[A-Za-z]{2,})+$")
        .expect("email pattern compiles")
});

fn invalid(msg: impl Into<String>) -> KeeperError {
    KeeperError::InvalidInput(msg.into())
}

fn check_length(field: &str, value: &str, min: usize, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(invalid(format!(
            "{field} must be between {min} and {max} characters (got {len})"
        )));
    }
    Ok(())
}

pub fn validate_tag_number(tag: &str) -> Result<()> {
    if !TAG_RE.is_match(tag) {
        return Err(invalid(format!(
            "tag number '{tag}' may only contain digits and dots, starting with a digit"
        )));
    }
    Ok(())
}

pub fn validate_series_id(series: &str) -> Result<()> {
    check_length("series id", series, 1, MAX_SERIES_LENGTH)?;
    if !SERIES_RE.is_match(series) {
        return Err(invalid(format!(
            "series id '{series}' may only contain letters, digits and dashes"
        )));
    }
    Ok(())
}

pub fn validate_sequence_id(sequence: i64) -> Result<i32> {
    if !(MIN_SEQUENCE_ID..=MAX_SEQUENCE_ID).contains(&sequence) {
        return Err(invalid(format!(
            "sequence id must be between {MIN_SEQUENCE_ID} and {MAX_SEQUENCE_ID} (got {sequence})"
        )));
    }
    // Range check above keeps this lossless
    Ok(sequence as i32)
}

pub fn validate_building(building: &str) -> Result<()> {
    check_length("building", building, 1, MAX_BUILDING_LENGTH)?;
    if !BUILDING_RE.is_match(building) {
        return Err(invalid(format!(
            "building '{building}' may only contain letters, digits, spaces and dashes"
        )));
    }
    Ok(())
}

pub fn validate_location(location: &[String]) -> Result<()> {
    if location.is_empty() {
        return Err(invalid("location needs at least one entry"));
    }
    for entry in location {
        check_length("each location", entry, 1, MAX_LOCATION_LENGTH)?;
        if !LOCATION_RE.is_match(entry) {
            return Err(invalid(format!(
                "location '{entry}' may only contain letters, digits, spaces and dashes"
            )));
        }
    }
    Ok(())
}

/// Split a comma-delimited location string into trimmed entries.
///
/// Stray list punctuation (`[`, `]`, quotes) left by clients that stringify
/// arrays is dropped.
pub fn split_location(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|segment| {
            segment
                .chars()
                .filter(|c| !matches!(c, '[' | ']' | '\'' | '"'))
                .collect::<String>()
                .trim()
                .to_string()
        })
        .collect()
}

pub fn validate_pid(pid: &str) -> Result<()> {
    check_length("pid", pid, MIN_PID_LENGTH, MAX_PID_LENGTH)?;
    if RESERVED_PIDS.contains(&pid) {
        return Err(invalid(format!("pid '{pid}' is reserved")));
    }
    Ok(())
}

pub fn validate_full_name(name: &str) -> Result<()> {
    check_length("full name", name, 1, MAX_FULL_NAME_LENGTH)?;
    if !FULL_NAME_RE.is_match(name) {
        return Err(invalid(format!(
            "full name '{name}' may only contain letters and spaces"
        )));
    }
    Ok(())
}

pub fn validate_record_comment(comment: &str) -> Result<()> {
    check_length("comment", comment, 0, MAX_RECORD_COMMENT_LENGTH)
}

pub fn validate_email(email: &str) -> Result<()> {
    if !EMAIL_RE.is_match(email) {
        return Err(invalid(format!("'{email}' is not a valid email address")));
    }
    Ok(())
}
