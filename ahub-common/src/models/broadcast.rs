//! Broadcasts and delivery events reported by the email provider

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

use super::contact::ContactStatus;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastStatus {
    Draft,
    Scheduled,
    Sent,
}

impl BroadcastStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastStatus::Draft => "draft",
            BroadcastStatus::Scheduled => "scheduled",
            BroadcastStatus::Sent => "sent",
        }
    }
}

impl FromStr for BroadcastStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(BroadcastStatus::Draft),
            "scheduled" => Ok(BroadcastStatus::Scheduled),
            "sent" => Ok(BroadcastStatus::Sent),
            other => Err(Error::InvalidInput(format!("Unknown broadcast status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broadcast {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
    pub subject: String,
    pub list_id: Option<Uuid>,
    pub status: BroadcastStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBroadcast {
    pub name: String,
    pub subject: String,
    pub list_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BroadcastPatch {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub list_id: Option<Uuid>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Event types accepted from the provider webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailEventType {
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Complained,
    Unsubscribed,
}

impl EmailEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailEventType::Delivered => "delivered",
            EmailEventType::Opened => "opened",
            EmailEventType::Clicked => "clicked",
            EmailEventType::Bounced => "bounced",
            EmailEventType::Complained => "complained",
            EmailEventType::Unsubscribed => "unsubscribed",
        }
    }

    /// Contact status forced by this event, if any
    pub fn status_effect(&self) -> Option<ContactStatus> {
        match self {
            EmailEventType::Bounced => Some(ContactStatus::Bounced),
            EmailEventType::Complained => Some(ContactStatus::Complained),
            EmailEventType::Unsubscribed => Some(ContactStatus::Unsubscribed),
            _ => None,
        }
    }
}

/// Webhook payload for one event
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingEmailEvent {
    #[serde(rename = "type")]
    pub event_type: EmailEventType,
    pub email: String,
    pub team_id: Uuid,
    pub broadcast_id: Option<Uuid>,
    pub occurred_at: Option<DateTime<Utc>>,
    /// Provider's event id, used to drop redeliveries
    pub provider_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Per-type event counts for a broadcast
pub type EventCounts = BTreeMap<EmailEventType, i64>;
