//! Infrastructure planning for Strata
//!
//! This crate turns a [`strata_common::config::StackConfig`] into a resource
//! graph and the trust material that roots it:
//!
//! - **PKI**: self-signed CA bootstrap for local clusters, with reuse of an
//!   intact CA already stored in the cluster
//! - **Bootstrap**: typed chart values and resource nodes for cert-manager,
//!   the internal ClusterIssuer, Valkey, Dragonfly and the Dragonfly operator
//! - **Stack**: the full graph in issue order, and a one-call deployment
//!
//! # Public API
//!
//! ## PKI
//! - [`pki::CertificateBootstrap`]: CA generation and lookup
//! - [`pki::TrustMaterial`]: PEM key and certificate pair
//! - [`pki::PkiError`]: Error type for PKI operations
//!
//! ## Bootstrap
//! Access via `strata_infra::bootstrap::*`:
//! - [`bootstrap::cert_manager::CertManagerDeployer`]
//! - [`bootstrap::issuer::IssuerProvisioner`]
//! - [`bootstrap::valkey::ValkeyDeployer`]
//! - [`bootstrap::dragonfly::DragonflyDeployer`]
//! - [`bootstrap::dragonfly_operator::DragonflyOperatorDeployer`]
//!
//! ## Stack
//! - [`stack::plan_stack`]: build the graph for a configuration
//! - [`stack::deploy_stack`]: bootstrap trust material, plan and deploy

#![deny(missing_docs)]

pub mod bootstrap;
pub mod pki;
pub mod stack;

pub use pki::{CertificateBootstrap, Environment, PkiError, TrustMaterial};
pub use stack::{deploy_stack, plan_stack};
