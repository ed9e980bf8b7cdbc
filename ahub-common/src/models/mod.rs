//! Domain models shared by the API and the worker

pub mod broadcast;
pub mod contact;
pub mod import;
pub mod list;

pub use broadcast::*;
pub use contact::*;
pub use import::*;
pub use list::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::{Error, Result};

/// Tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPurpose {
    ContactImport,
}

impl UploadPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadPurpose::ContactImport => "contact_import",
        }
    }
}

impl FromStr for UploadPurpose {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "contact_import" => Ok(UploadPurpose::ContactImport),
            other => Err(Error::InvalidInput(format!("Unknown upload purpose: {}", other))),
        }
    }
}

/// An object-storage upload slot handed out through a presigned URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: Uuid,
    pub team_id: Uuid,
    pub object_key: String,
    pub filename: String,
    pub content_type: String,
    pub purpose: UploadPurpose,
    pub created_at: DateTime<Utc>,
}
