//! Column mapping suggestions and row → contact conversion

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::db::contacts::ContactDraft;
use crate::models::{clean_optional, normalize_email, normalize_header, ColumnMapping, ColumnTarget, ContactStatus};
use crate::{Error, Result};

const MAX_ATTRIBUTE_KEY_LEN: usize = 64;

fn synonym(header: &str) -> Option<ColumnTarget> {
    let target = match header {
        "email" | "e-mail" | "email address" | "e-mail address" | "mail" => ColumnTarget::Email,
        "first name" | "firstname" | "first_name" | "given name" | "forename" => ColumnTarget::FirstName,
        "last name" | "lastname" | "last_name" | "surname" | "family name" => ColumnTarget::LastName,
        "phone" | "phone number" | "mobile" | "telephone" | "tel" => ColumnTarget::Phone,
        "company" | "company name" | "organization" | "organisation" => ColumnTarget::Company,
        "status" | "subscribed" | "subscription status" => ColumnTarget::Status,
        _ => return None,
    };
    Some(target)
}

/// `"Favourite Colour!"` → `"favourite_colour"`
pub fn attribute_key(header: &str) -> String {
    let mut key = String::with_capacity(header.len());
    let mut pending_sep = false;
    for c in normalize_header(header).chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !key.is_empty() {
                key.push('_');
            }
            pending_sep = false;
            key.push(c);
        } else {
            pending_sep = true;
        }
    }
    key.truncate(MAX_ATTRIBUTE_KEY_LEN);
    key.trim_end_matches('_').to_string()
}

/// Guess a mapping from header names. Each standard field is claimed by the
/// first header that names it; everything else becomes an attribute.
pub fn suggest_mapping(headers: &[String]) -> ColumnMapping {
    let mut mapping = BTreeMap::new();
    let mut claimed: Vec<ColumnTarget> = Vec::new();

    for header in headers {
        if mapping.contains_key(header) {
            continue;
        }
        let normalized = normalize_header(header);
        let target = match synonym(&normalized) {
            Some(target) if !claimed.contains(&target) => {
                claimed.push(target.clone());
                target
            }
            _ => {
                let key = attribute_key(header);
                let target = ColumnTarget::Attribute(key);
                if key_is_usable(&target) && !claimed.contains(&target) {
                    claimed.push(target.clone());
                    target
                } else {
                    ColumnTarget::Ignore
                }
            }
        };
        mapping.insert(header.clone(), target);
    }

    ColumnMapping(mapping)
}

fn key_is_usable(target: &ColumnTarget) -> bool {
    matches!(target, ColumnTarget::Attribute(key) if !key.is_empty())
}

/// Status cells accept the status names plus yes/no style flags
pub fn parse_status_cell(value: &str) -> Result<ContactStatus> {
    match value.trim().to_lowercase().as_str() {
        "yes" | "y" | "true" | "1" => Ok(ContactStatus::Subscribed),
        "no" | "n" | "false" | "0" => Ok(ContactStatus::Unsubscribed),
        other => other.parse(),
    }
}

/// Build a draft from one record; `targets` is the resolved mapping per column
pub fn build_draft(targets: &[ColumnTarget], fields: &[String]) -> Result<ContactDraft> {
    let mut email = None;
    let mut draft = ContactDraft::default();
    let mut attributes = Map::new();

    for (target, value) in targets.iter().zip(fields.iter()) {
        let value = clean_optional(Some(value.clone()));
        match target {
            ColumnTarget::Email => email = value,
            ColumnTarget::FirstName => draft.first_name = value,
            ColumnTarget::LastName => draft.last_name = value,
            ColumnTarget::Phone => draft.phone = value,
            ColumnTarget::Company => draft.company = value,
            ColumnTarget::Status => {
                draft.status = value.as_deref().map(parse_status_cell).transpose()?;
            }
            ColumnTarget::Attribute(key) => {
                if let Some(value) = value {
                    attributes.insert(key.clone(), Value::String(value));
                }
            }
            ColumnTarget::Ignore => {}
        }
    }

    let email = email.ok_or_else(|| Error::InvalidInput("Email is required".to_string()))?;
    draft.email = normalize_email(&email)?;
    draft.attributes = attributes;
    Ok(draft)
}
