//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BridgeConfig (validated, immutable)
//!     → CLI flags override individual fields (main.rs)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the server starts
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, BridgeConfig, DatabaseConfig, LimitsConfig, ListenerConfig, LogFormat,
    ObservabilityConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
