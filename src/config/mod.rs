//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize, apply environment overrides)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated)
//!     → rewrite::RewriteConfig::resolve (immutable, shared via Arc)
//! ```
//!
//! # Design Decisions
//! - Config is resolved once before the first request and never mutated
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Lookup tables are ordered arrays; first match wins

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, resolve_config, ConfigError};
pub use schema::{
    CookieDomainMapping, HostMapping, ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig,
    StreamConfig, TimeoutConfig, UpstreamConfig,
};
