//! Shared errors, configuration, and auth types for Stratus.
//!
//! This crate provides common pieces used across all other crates:
//! - Application-wide error type with HTTP status and stable error codes
//! - Configuration management
//! - JWT claims and token service for the HTTP layer
//! - Pagination types for list endpoints

pub mod auth;
pub mod config;
pub mod error;
pub mod jwt;
pub mod types;

pub use auth::Claims;
pub use config::AppConfig;
pub use error::AppError;
pub use jwt::{JwtConfig, JwtError, JwtService};
