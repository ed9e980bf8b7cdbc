//! HTTP API handlers for ahub-api

pub mod broadcasts;
pub mod contacts;
pub mod health;
pub mod imports;
pub mod lists;
pub mod sse;
pub mod teams;
pub mod tenant;
pub mod uploads;
pub mod webhooks;

pub use broadcasts::broadcast_routes;
pub use contacts::contact_routes;
pub use health::health_routes;
pub use imports::import_routes;
pub use lists::list_routes;
pub use teams::team_routes;
pub use tenant::{Tenant, TEAM_HEADER};
pub use uploads::upload_routes;
pub use webhooks::webhook_routes;
