//! Common types for Strata: resources, the deployment graph, the engine
//! boundary, ACL policy compilation and stack configuration.

#![deny(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod policy;
pub mod resource;
pub mod telemetry;
pub mod template;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for server-side apply when none is configured
pub const DEFAULT_FIELD_MANAGER: &str = "strata";

/// Label key carried by every namespace and workload resource Strata creates
pub const APP_LABEL_KEY: &str = "app";
