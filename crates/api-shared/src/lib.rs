//! # API Shared
//!
//! Shared request and response definitions for the HMS APIs.
//!
//! Contains:
//! - JSON request/response bodies (`dto` module) with their OpenAPI schemas
//! - Shared services like `HealthService`
//!
//! Used by `api-rest` and the workspace's `hms-run` binary.

pub mod dto;
pub mod health;

pub use dto::*;
pub use health::HealthService;
