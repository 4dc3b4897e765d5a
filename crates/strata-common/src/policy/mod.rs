//! Access-control policy compilation
//!
//! Cache engines read their users from a plain-text ACL file. This module
//! turns structured [`Credential`]s into that file for the two grammars the
//! stack deploys.

pub mod acl;

pub use acl::{AclGrammar, Credential, PolicyCompiler, RenderedPolicy, ReplicationUsers};
