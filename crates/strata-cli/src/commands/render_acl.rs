//! Render-acl command

use clap::{Args, ValueEnum};
use strata_common::config::StackConfig;
use strata_common::policy::RenderedPolicy;
use strata_infra::bootstrap::{dragonfly, valkey};
use tracing::debug;

use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum AclTarget {
    /// Replicated layout with sentinel and replica users
    Valkey,
    /// Append-only layout, at least one user required
    Dragonfly,
}

#[derive(Args, Debug)]
pub struct RenderAclArgs {
    /// Workload whose ACL file to print
    #[arg(value_enum)]
    pub target: AclTarget,
}

pub fn run(args: RenderAclArgs, config: &StackConfig) -> Result<()> {
    let policy = compile(args.target, config)?;
    debug!(
        workload = ?args.target,
        grammar = policy.grammar().template_name(),
        users = policy.credential_count(),
        "rendered ACL file"
    );
    print!("{}", policy.text());
    Ok(())
}

fn compile(target: AclTarget, config: &StackConfig) -> Result<RenderedPolicy> {
    let policy = match target {
        AclTarget::Valkey => valkey::compile_policy(&config.valkey)?,
        AclTarget::Dragonfly => dragonfly::compile_policy(&config.dragonfly)?,
    };
    Ok(policy)
}
