//! Audience lists and the contact filter that defines dynamic membership

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use uuid::Uuid;

use super::contact::{ContactSource, ContactStatus};
use crate::{Error, Result};

/// Longest list name accepted
pub const MAX_LIST_NAME_LEN: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    /// Membership managed explicitly (API or CSV import)
    Static,
    /// Membership evaluated from a stored filter at query time
    Dynamic,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Static => "static",
            ListKind::Dynamic => "dynamic",
        }
    }
}

impl FromStr for ListKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "static" => Ok(ListKind::Static),
            "dynamic" => Ok(ListKind::Dynamic),
            other => Err(Error::InvalidInput(format!("Unknown list kind: {}", other))),
        }
    }
}

/// Criteria selecting contacts; stored as JSON on dynamic lists
///
/// All present criteria must match (logical AND).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContactFilter {
    /// Case-insensitive substring over email, names and company
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ContactStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ContactSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_before: Option<DateTime<Utc>>,
    /// Exact equality on custom attributes (string, number or bool values)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl ContactFilter {
    pub fn is_empty(&self) -> bool {
        self.q.as_deref().map_or(true, |q| q.trim().is_empty())
            && self.status.is_none()
            && self.source.is_none()
            && self.created_after.is_none()
            && self.created_before.is_none()
            && self.attributes.is_empty()
    }

    /// Check the filter is usable as a dynamic list definition
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::InvalidInput(
                "Dynamic list filter needs at least one criterion".to_string(),
            ));
        }

        for (key, value) in &self.attributes {
            if !is_attribute_key(key) {
                return Err(Error::InvalidInput(format!("Invalid attribute key: {}", key)));
            }
            if !(value.is_string() || value.is_number() || value.is_boolean()) {
                return Err(Error::InvalidInput(format!(
                    "Attribute filter '{}' must be a string, number or boolean",
                    key
                )));
            }
        }

        if let (Some(after), Some(before)) = (self.created_after, self.created_before) {
            if after >= before {
                return Err(Error::InvalidInput(
                    "created_after must be earlier than created_before".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Attribute keys end up inside a JSON path, so they are restricted
pub fn is_attribute_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 64
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Persisted audience list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudienceList {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub kind: ListKind,
    pub filter: Option<ContactFilter>,
    pub member_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewList {
    pub name: String,
    pub description: Option<String>,
    pub kind: ListKind,
    pub filter: Option<ContactFilter>,
}

/// Partial update. `kind` is accepted only when it matches the stored kind.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub kind: Option<ListKind>,
    pub filter: Option<ContactFilter>,
}

/// Trim and bound-check a list name
pub fn normalize_list_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("List name is required".to_string()));
    }
    if name.chars().count() > MAX_LIST_NAME_LEN {
        return Err(Error::InvalidInput(format!(
            "List name exceeds {} characters",
            MAX_LIST_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

/// Kind/filter pairing rules for creation
pub fn validate_kind_filter(kind: ListKind, filter: Option<&ContactFilter>) -> Result<()> {
    match (kind, filter) {
        (ListKind::Static, Some(_)) => Err(Error::InvalidInput(
            "Static lists cannot have a filter".to_string(),
        )),
        (ListKind::Dynamic, None) => Err(Error::InvalidInput(
            "Dynamic lists require a filter".to_string(),
        )),
        (ListKind::Dynamic, Some(f)) => f.validate(),
        (ListKind::Static, None) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_filter_rejected_for_dynamic() {
        let err = validate_kind_filter(ListKind::Dynamic, Some(&ContactFilter::default()));
        assert!(err.is_err());
    }

    #[test]
    fn test_static_with_filter_rejected() {
        let filter = ContactFilter {
            status: Some(ContactStatus::Subscribed),
            ..Default::default()
        };
        assert!(validate_kind_filter(ListKind::Static, Some(&filter)).is_err());
        assert!(validate_kind_filter(ListKind::Dynamic, Some(&filter)).is_ok());
        assert!(validate_kind_filter(ListKind::Static, None).is_ok());
    }

    #[test]
    fn test_filter_rejects_nested_attribute_values() {
        let filter: ContactFilter = serde_json::from_value(json!({
            "attributes": {"plan": {"tier": "pro"}}
        }))
        .unwrap();
        assert!(filter.validate().is_err());
    }

    #[test]
    fn test_filter_rejects_unknown_fields() {
        let parsed: std::result::Result<ContactFilter, _> =
            serde_json::from_value(json!({"tags": ["vip"]}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_attribute_key_charset() {
        assert!(is_attribute_key("plan_tier"));
        assert!(is_attribute_key("utm-source"));
        assert!(!is_attribute_key("a.b"));
        assert!(!is_attribute_key("$[0]"));
        assert!(!is_attribute_key(""));
    }

    #[test]
    fn test_list_name_bounds() {
        assert_eq!(normalize_list_name("  Newsletter ").unwrap(), "Newsletter");
        assert!(normalize_list_name("   ").is_err());
        assert!(normalize_list_name(&"x".repeat(121)).is_err());
    }
}
