//! CostRoute Server
//!
//! Configuration loading, service wiring and the caller-facing HTTP API.
//! The `costroute-server` binary is a thin shell over this library.

pub mod api;
pub mod bootstrap;
pub mod config;

pub use api::{AppState, RouterReadiness, api_router};
pub use bootstrap::{Services, build_connector, build_connectors};
pub use config::{ConfigError, ProviderSettings, ProviderType, ServerConfig};
