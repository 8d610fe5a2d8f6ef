/// Account state coordinator
///
/// Owns account identity, notification preferences and device push tokens
/// for downstream services. Every mutation commits to SQLite, invalidates
/// the cached account view, then emits a best-effort domain event.

pub mod account;
pub mod auth;
pub mod cache;
pub mod config;
pub mod context;
pub mod crypto;
pub mod db;
pub mod devices;
pub mod error;
pub mod events;
pub mod health;
pub mod metrics;
pub mod preferences;
pub mod server;

pub use context::AppContext;
pub use error::{ServiceError, ServiceResult};
