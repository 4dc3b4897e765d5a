//! Plan command
//!
//! Runs the stack through the in-memory engine and prints what a deployment
//! would apply, in issue order. Secret values never appear in the output.


use clap::{Args, ValueEnum};
use serde_json::Value;
use strata_common::config::StackConfig;
use strata_common::engine::{AppliedRecord, RecordingEngine, REDACTED};
use strata_common::graph::Orchestrator;
use strata_infra::pki::{BootstrapConfig, CertificateBootstrap, Environment};
use strata_infra::plan_stack;

use crate::Result;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum PlanOutput {
    /// One YAML document per resource
    Yaml,
    /// One line per resource with its predecessors
    #[default]
    Table,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Output format
    #[arg(long, short, value_enum, default_value_t = PlanOutput::Table)]
    pub output: PlanOutput,
}

pub async fn run(args: PlanArgs, config: &StackConfig) -> Result<()> {
    let trust = CertificateBootstrap::new(BootstrapConfig::from(&config.cert_manager))
        .bootstrap(Environment::from_local_flag(config.local))
        .map_err(strata_common::Error::from)?;
    let graph = plan_stack(config, &trust)?;

    let engine = RecordingEngine::new();
    Orchestrator::new(&engine).deploy(&graph).await?;
    let records = engine.applied();

    let out = match args.output {
        PlanOutput::Yaml => render_yaml(&records)?,
        PlanOutput::Table => render_table(&records),
    };
    print!("{}", out);
    Ok(())
}

fn render_yaml(records: &[AppliedRecord]) -> Result<String> {
    let mut out = String::new();
    for record in records {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&redact(&record.manifest))?);
    }
    Ok(out)
}

fn render_table(records: &[AppliedRecord]) -> String {
    let rows: Vec<[String; 5]> = records
        .iter()
        .enumerate()
        .map(|(i, r)| {
            [
                (i + 1).to_string(),
                r.id.kind.name().to_string(),
                r.id.namespace.clone().unwrap_or_else(|| "-".to_string()),
                r.id.name.clone(),
                if r.after.is_empty() {
                    "-".to_string()
                } else {
                    r.after
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                },
            ]
        })
        .collect();

    let header = ["#", "KIND", "NAMESPACE", "NAME", "AFTER"];
    let mut widths = header.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row.iter()).take(4) {
            *w = (*w).max(cell.len());
        }
    }

    let mut out = String::new();
    let line = |out: &mut String, cells: [&str; 5]| {
        out.push_str(&format!(
            "{:<w0$}  {:<w1$}  {:<w2$}  {:<w3$}  {}\n",
            cells[0],
            cells[1],
            cells[2],
            cells[3],
            cells[4],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2],
            w3 = widths[3],
        ));
    };
    line(&mut out, header);
    for row in &rows {
        line(&mut out, row.each_ref().map(String::as_str));
    }
    out
}

/// Replace secret data and sensitive chart values with a marker
fn redact(manifest: &Value) -> Value {
    let mut manifest = manifest.clone();
    if manifest["kind"] == "Secret" {
        if let Some(Value::Object(data)) = manifest.get_mut("stringData") {
            for value in data.values_mut() {
                *value = Value::String(REDACTED.to_string());
            }
        }
    }
    if let Some(values) = manifest.get_mut("values") {
        for path in [&["auth", "password"][..], &["commonConfiguration"][..]] {
            redact_path(values, path);
        }
    }
    manifest
}

fn redact_path(value: &mut Value, path: &[&str]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cursor = value;
    for key in parents {
        match cursor.get_mut(*key) {
            Some(next) => cursor = next,
            None => return,
        }
    }
    if let Some(slot) = cursor.get_mut(*last) {
        *slot = Value::String(REDACTED.to_string());
    }
}
