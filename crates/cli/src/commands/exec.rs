// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::parse_cage_id;
use anyhow::Context;
use cage_kernel::types::{ExecutionSummary, Workload};
use cage_persistence::CageStore;
use cage_runtime::{Cage, CageError};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

pub struct ExecArgs {
    pub id: String,
    pub stdin: Option<PathBuf>,
    pub metrics_out: Option<PathBuf>,
    pub command: Vec<String>,
}

fn write_metrics(path: Option<&Path>) -> anyhow::Result<()> {
    if let Some(path) = path {
        std::fs::write(path, cage_runtime::telemetry::get_metrics())
            .with_context(|| format!("writing metrics to {}", path.display()))?;
    }
    Ok(())
}

/// Report for a run the cage aborted. `category` tells a cage failure apart
/// from a workload that happens to exit with the same code.
pub fn failure_report(id: &str, err: &CageError) -> Value {
    let mut report = json!({
        "status": "failed",
        "cage_id": id,
        "category": err.category().as_str(),
        "exit_code": err.category().code(),
        "error": err.to_string(),
    });
    if let CageError::PolicyViolation {
        operation,
        call,
        sequence_number,
    } = err
    {
        report["operation"] = json!(operation.as_str());
        report["call"] = json!(call);
        report["sequence_number"] = json!(sequence_number);
    }
    report
}

pub fn success_report(id: &str, summary: &ExecutionSummary) -> anyhow::Result<Value> {
    let mut report = serde_json::to_value(summary)?;
    if let Value::Object(fields) = &mut report {
        fields.insert("status".into(), json!("completed"));
        fields.insert("cage_id".into(), json!(id));
    }
    Ok(report)
}

/// Run a command in a stored cage. Returns the summary; the caller exits
/// with the workload's code.
pub fn run(store: &CageStore, args: ExecArgs) -> anyhow::Result<ExecutionSummary> {
    let id = parse_cage_id(&args.id)?;
    let config = store.load_resolved(&id)?;

    let (program, rest) = args
        .command
        .split_first()
        .context("no command given after --")?;
    let mut workload = Workload::new(program.as_str()).args(rest.iter().cloned());
    if let Some(path) = &args.stdin {
        let input = std::fs::read(path).with_context(|| format!("reading stdin file {}", path.display()))?;
        workload = workload.stdin(input);
    }

    let mut cage = Cage::new(config);
    let outcome = cage.execute(&workload);
    write_metrics(args.metrics_out.as_deref())?;

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&failure_report(&id.to_string(), &e))?);
            return Err(anyhow::Error::new(e).context(format!("cage {id} aborted")));
        }
    };
    let summary = result.summary();
    store.save_result(&id, &summary)?;

    println!("{}", serde_json::to_string_pretty(&success_report(&id.to_string(), &summary)?)?);
    Ok(summary)
}
