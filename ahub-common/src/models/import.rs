//! CSV import jobs and column mappings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::list::is_attribute_key;
use crate::{Error, Result};

/// Import job lifecycle: PENDING → PROCESSING → COMPLETED | FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    /// Created and enqueued, not picked up yet
    Pending,
    /// A worker is running the pipeline
    Processing,
    /// Finished; counters are final
    Completed,
    /// Aborted by an unrecoverable error
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Processing => "processing",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportStatus::Completed | ImportStatus::Failed)
    }
}

impl FromStr for ImportStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ImportStatus::Pending),
            "processing" => Ok(ImportStatus::Processing),
            "completed" => Ok(ImportStatus::Completed),
            "failed" => Ok(ImportStatus::Failed),
            other => Err(Error::InvalidInput(format!("Unknown import status: {}", other))),
        }
    }
}

/// Where a CSV column lands on a contact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnTarget {
    Email,
    FirstName,
    LastName,
    Phone,
    Company,
    Status,
    Attribute(String),
    Ignore,
}

impl fmt::Display for ColumnTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnTarget::Email => f.write_str("email"),
            ColumnTarget::FirstName => f.write_str("first_name"),
            ColumnTarget::LastName => f.write_str("last_name"),
            ColumnTarget::Phone => f.write_str("phone"),
            ColumnTarget::Company => f.write_str("company"),
            ColumnTarget::Status => f.write_str("status"),
            ColumnTarget::Attribute(key) => write!(f, "attribute:{}", key),
            ColumnTarget::Ignore => f.write_str("ignore"),
        }
    }
}

impl FromStr for ColumnTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "email" => Ok(ColumnTarget::Email),
            "first_name" => Ok(ColumnTarget::FirstName),
            "last_name" => Ok(ColumnTarget::LastName),
            "phone" => Ok(ColumnTarget::Phone),
            "company" => Ok(ColumnTarget::Company),
            "status" => Ok(ColumnTarget::Status),
            "ignore" => Ok(ColumnTarget::Ignore),
            other => match other.strip_prefix("attribute:") {
                Some(key) if is_attribute_key(key) => Ok(ColumnTarget::Attribute(key.to_string())),
                _ => Err(Error::InvalidInput(format!("Invalid column target: {}", other))),
            },
        }
    }
}

impl TryFrom<String> for ColumnTarget {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ColumnTarget> for String {
    fn from(value: ColumnTarget) -> Self {
        value.to_string()
    }
}

/// CSV header → target. Header comparison ignores case and surrounding whitespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMapping(pub BTreeMap<String, ColumnTarget>);

impl ColumnMapping {
    /// Exactly one column must feed `email`; other scalar targets at most once
    pub fn validate(&self) -> Result<()> {
        let mut seen: BTreeMap<String, usize> = BTreeMap::new();
        for target in self.0.values() {
            if *target == ColumnTarget::Ignore {
                continue;
            }
            *seen.entry(target.to_string()).or_default() += 1;
        }

        match seen.get("email").copied().unwrap_or(0) {
            0 => {
                return Err(Error::InvalidInput(
                    "Column mapping must map one column to email".to_string(),
                ))
            }
            1 => {}
            _ => {
                return Err(Error::InvalidInput(
                    "Column mapping maps more than one column to email".to_string(),
                ))
            }
        }

        if let Some((target, _)) = seen.iter().find(|(_, count)| **count > 1) {
            return Err(Error::InvalidInput(format!(
                "Column mapping maps more than one column to {}",
                target
            )));
        }

        Ok(())
    }

    /// Resolve the target of each header position. Unmapped headers are
    /// ignored, and a repeated header only binds at its first position.
    pub fn resolve(&self, headers: &[String]) -> Vec<ColumnTarget> {
        let mut normalized: BTreeMap<String, &ColumnTarget> = self
            .0
            .iter()
            .map(|(h, t)| (normalize_header(h), t))
            .collect();

        headers
            .iter()
            .map(|h| {
                normalized
                    .remove(&normalize_header(h))
                    .map(|t| t.clone())
                    .unwrap_or(ColumnTarget::Ignore)
            })
            .collect()
    }
}

/// Lower-case, trim and collapse inner whitespace
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .trim_start_matches('\u{feff}')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A rejected CSV row; `row` is the spreadsheet line number (header is line 1)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row: u64,
    pub message: String,
}

/// Persisted import job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub team_id: Uuid,
    pub upload_id: Uuid,
    pub list_id: Option<Uuid>,
    pub mapping: ColumnMapping,
    pub update_existing: bool,
    pub status: ImportStatus,
    pub total_rows: i64,
    pub created_count: i64,
    pub updated_count: i64,
    pub skipped_count: i64,
    pub failed_count: i64,
    pub errors: Vec<RowError>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    pub fn new(
        team_id: Uuid,
        upload_id: Uuid,
        list_id: Option<Uuid>,
        mapping: ColumnMapping,
        update_existing: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            team_id,
            upload_id,
            list_id,
            mapping,
            update_existing,
            status: ImportStatus::Pending,
            total_rows: 0,
            created_count: 0,
            updated_count: 0,
            skipped_count: 0,
            failed_count: 0,
            errors: Vec::new(),
            error_message: None,
            created_at: crate::db::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping(pairs: &[(&str, &str)]) -> ColumnMapping {
        let value = json!(pairs
            .iter()
            .map(|(h, t)| (h.to_string(), json!(t)))
            .collect::<serde_json::Map<_, _>>());
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_target_parse_and_display() {
        assert_eq!("email".parse::<ColumnTarget>().unwrap(), ColumnTarget::Email);
        assert_eq!(
            "attribute:plan".parse::<ColumnTarget>().unwrap(),
            ColumnTarget::Attribute("plan".to_string())
        );
        assert_eq!(ColumnTarget::Attribute("plan".to_string()).to_string(), "attribute:plan");
        assert!("attribute:".parse::<ColumnTarget>().is_err());
        assert!("attribute:a.b".parse::<ColumnTarget>().is_err());
        assert!("nickname".parse::<ColumnTarget>().is_err());
    }

    #[test]
    fn test_mapping_requires_single_email() {
        assert!(mapping(&[("Name", "first_name")]).validate().is_err());
        assert!(mapping(&[("E-mail", "email"), ("Mail", "email")]).validate().is_err());
        assert!(mapping(&[("E-mail", "email"), ("Notes", "ignore"), ("Extra", "ignore")])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_mapping_rejects_duplicate_targets() {
        let m = mapping(&[("Email", "email"), ("First", "first_name"), ("Given", "first_name")]);
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("first_name"));
    }

    #[test]
    fn test_mapping_resolve_is_case_insensitive() {
        let m = mapping(&[("Email Address", "email"), ("PLAN", "attribute:plan")]);
        let headers = vec![
            "email   address".to_string(),
            "plan".to_string(),
            "unknown".to_string(),
        ];
        assert_eq!(
            m.resolve(&headers),
            vec![
                ColumnTarget::Email,
                ColumnTarget::Attribute("plan".to_string()),
                ColumnTarget::Ignore
            ]
        );
    }

    #[test]
    fn test_mapping_resolve_binds_repeated_header_once() {
        let m = mapping(&[("Email", "email"), ("Name", "attribute:name")]);
        let headers = vec!["Email".to_string(), "Name".to_string(), "email".to_string()];
        assert_eq!(
            m.resolve(&headers),
            vec![
                ColumnTarget::Email,
                ColumnTarget::Attribute("name".to_string()),
                ColumnTarget::Ignore
            ]
        );
    }

    #[test]
    fn test_normalize_header_strips_bom() {
        assert_eq!(normalize_header("\u{feff}Email"), "email");
    }

    #[test]
    fn test_status_terminal() {
        assert!(ImportStatus::Completed.is_terminal());
        assert!(ImportStatus::Failed.is_terminal());
        assert!(!ImportStatus::Processing.is_terminal());
    }
}
