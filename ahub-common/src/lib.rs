//! # AudienceHub Common Library
//!
//! Shared code for the AudienceHub API and worker:
//! - Error type and configuration loading
//! - SQLite schema and repositories (teams, contacts, lists, uploads, imports, broadcasts)
//! - Domain models and pagination
//! - Object storage and job queue abstractions (S3/SQS via SigV4, in-memory)
//! - The CSV import pipeline and the in-process event bus

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod import;
pub mod models;
pub mod pagination;
pub mod queue;
pub mod sigv4;
pub mod storage;

pub use error::{Error, Result};
