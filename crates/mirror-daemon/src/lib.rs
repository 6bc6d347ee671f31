//! mirror-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod client;
pub mod config;
pub mod native_fs;

pub use client::{ConfluenceHttpClient, Credentials};
pub use config::{Config, ConfigError, TenantConfig};
pub use native_fs::NativeFs;
