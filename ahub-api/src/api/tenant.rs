//! Tenant selection
//!
//! Every tenant-scoped route takes a `Tenant`, resolved from the `X-Team-Id`
//! header. The header selects a team; it does not authenticate anyone.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::{ApiError, AppState};
use ahub_common::db::teams;

pub const TEAM_HEADER: &str = "x-team-id";

/// The team a request acts for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tenant(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for Tenant {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(TEAM_HEADER)
            .ok_or_else(|| ApiError::BadRequest("Missing X-Team-Id header".to_string()))?
            .to_str()
            .map_err(|_| ApiError::BadRequest("X-Team-Id header is not valid text".to_string()))?;

        let team_id = Uuid::parse_str(raw.trim())
            .map_err(|_| ApiError::BadRequest(format!("X-Team-Id is not a UUID: {}", raw)))?;

        if !teams::team_exists(&state.db, team_id).await? {
            return Err(ApiError::NotFound(format!("Team not found: {}", team_id)));
        }

        Ok(Tenant(team_id))
    }
}
