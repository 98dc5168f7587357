//! Static application configuration, mapped from an optional TOML file.
//!
//! User preferences that change at runtime live in [`crate::settings`] instead.

pub mod app_config;

pub use app_config::AppConfig;
