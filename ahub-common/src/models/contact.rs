//! Contact model and email normalization

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{Error, Result};

/// Longest address accepted (RFC 5321 path limit)
pub const MAX_EMAIL_LEN: usize = 254;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@.]+$").expect("static email regex")
});

/// Subscription state of a contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    #[default]
    Subscribed,
    Unsubscribed,
    Bounced,
    Complained,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::Subscribed => "subscribed",
            ContactStatus::Unsubscribed => "unsubscribed",
            ContactStatus::Bounced => "bounced",
            ContactStatus::Complained => "complained",
        }
    }
}

impl FromStr for ContactStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "subscribed" => Ok(ContactStatus::Subscribed),
            "unsubscribed" => Ok(ContactStatus::Unsubscribed),
            "bounced" => Ok(ContactStatus::Bounced),
            "complained" => Ok(ContactStatus::Complained),
            other => Err(Error::InvalidInput(format!("Unknown contact status: {}", other))),
        }
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a contact entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactSource {
    #[default]
    Manual,
    CsvImport,
    Api,
}

impl ContactSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactSource::Manual => "manual",
            ContactSource::CsvImport => "csv_import",
            ContactSource::Api => "api",
        }
    }
}

impl FromStr for ContactSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "manual" => Ok(ContactSource::Manual),
            "csv_import" => Ok(ContactSource::CsvImport),
            "api" => Ok(ContactSource::Api),
            other => Err(Error::InvalidInput(format!("Unknown contact source: {}", other))),
        }
    }
}

/// Persisted contact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub team_id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub status: ContactStatus,
    pub attributes: Map<String, Value>,
    pub source: ContactSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Fields for a new contact
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewContact {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    #[serde(default)]
    pub status: ContactStatus,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub source: ContactSource,
}

/// Partial update; `None` leaves a field unchanged
///
/// Attribute keys whose value is JSON `null` are removed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactPatch {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub status: Option<ContactStatus>,
    pub attributes: Option<Map<String, Value>>,
}

/// Trim and lower-case an address, then check its shape
pub fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();

    if email.is_empty() {
        return Err(Error::InvalidInput("Email is required".to_string()));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(Error::InvalidInput(format!(
            "Email exceeds {} characters",
            MAX_EMAIL_LEN
        )));
    }
    if !EMAIL_RE.is_match(&email) {
        return Err(Error::InvalidInput(format!("Invalid email address: {}", raw.trim())));
    }

    Ok(email)
}

/// Trim an optional text field, mapping blank to `None`
pub fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Merge `patch` into `target`; `null` values delete keys
pub fn merge_attributes(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        if value.is_null() {
            target.remove(&key);
        } else {
            target.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_email_lowercases_and_trims() {
        assert_eq!(
            normalize_email("  Jane.Doe@Example.COM ").unwrap(),
            "jane.doe@example.com"
        );
    }

    #[test]
    fn test_normalize_email_rejects_garbage() {
        assert!(normalize_email("").is_err());
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("two@@example.com").is_err());
        assert!(normalize_email("space in@example.com").is_err());
        assert!(normalize_email("nodot@example").is_err());
        assert!(normalize_email("trailing@example.").is_err());
    }

    #[test]
    fn test_normalize_email_length_limit() {
        let local = "a".repeat(250);
        assert!(normalize_email(&format!("{}@example.com", local)).is_err());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Bounced".parse::<ContactStatus>().unwrap(), ContactStatus::Bounced);
        assert!("pending".parse::<ContactStatus>().is_err());
    }

    #[test]
    fn test_merge_attributes_null_removes() {
        let mut attrs = Map::new();
        attrs.insert("plan".to_string(), json!("pro"));
        attrs.insert("seats".to_string(), json!(3));

        let patch = json!({"plan": null, "region": "eu"});
        merge_attributes(&mut attrs, patch.as_object().unwrap().clone());

        assert!(!attrs.contains_key("plan"));
        assert_eq!(attrs["seats"], json!(3));
        assert_eq!(attrs["region"], json!("eu"));
    }

    #[test]
    fn test_clean_optional() {
        assert_eq!(clean_optional(Some("  ".to_string())), None);
        assert_eq!(clean_optional(Some(" Ada ".to_string())), Some("Ada".to_string()));
        assert_eq!(clean_optional(None), None);
    }
}
