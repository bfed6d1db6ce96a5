// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use cage_cli::commands::{create, exec, export_proof, inspect, replay, verify};
use cage_cli::exit_code_for;
use cage_persistence::CageStore;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "cage")]
#[command(about = "Determinism Cage - run a program under a fixed syscall policy and record a verifiable witness", long_about = None)]
struct Cli {
    /// Cage store directory
    #[arg(long, global = true, env = "CAGE_HOME", default_value = ".cage")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a CageConfig JSON document and store it. Prints the cage id.
    Create {
        config: PathBuf,
    },
    /// Run a command inside a cage and print the execution summary.
    Exec {
        id: String,

        /// File whose contents are fed to the workload's stdin
        #[arg(long)]
        stdin: Option<PathBuf>,

        /// Write Prometheus metrics text here after the run
        #[arg(long)]
        metrics_out: Option<PathBuf>,

        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Verify a witness log's hash chain and Merkle root
    Verify {
        id: String,

        /// Witness log to check (defaults to the cage's own)
        #[arg(long)]
        witness_log: Option<PathBuf>,

        /// Merkle root the log must have
        #[arg(long)]
        expected_hash: Option<String>,
    },
    /// Re-execute a recorded run and compare it with the original
    Replay {
        id: String,

        #[arg(long)]
        witness_log: Option<PathBuf>,
    },
    /// Export a Merkle inclusion proof for one witness entry
    ExportProof {
        id: String,

        /// Sequence number of the entry
        #[arg(long)]
        entry: u64,

        #[arg(long)]
        witness_log: Option<PathBuf>,

        /// Write the proof here instead of stdout
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// Show a cage's stored files and witness entries
    Inspect {
        id: String,
    },
}

fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let store = CageStore::open(&cli.store)?;
    match cli.command {
        Commands::Create { config } => create::run(&store, &config).map(|_| 0),
        Commands::Exec {
            id,
            stdin,
            metrics_out,
            command,
        } => exec::run(
            &store,
            exec::ExecArgs {
                id,
                stdin,
                metrics_out,
                command,
            },
        )
        .map(|summary| summary.exit_code),
        Commands::Verify {
            id,
            witness_log,
            expected_hash,
        } => verify::run(&store, &id, witness_log, expected_hash.as_deref()),
        Commands::Replay { id, witness_log } => replay::run(&store, &id, witness_log),
        Commands::ExportProof {
            id,
            entry,
            witness_log,
            out,
        } => export_proof::run(&store, &id, entry, witness_log, out).map(|_| 0),
        Commands::Inspect { id } => inspect::run(&store, &id).map(|_| 0),
    }
}

fn main() -> ExitCode {
    cage_runtime::telemetry::init_telemetry("warn");
    let cli = Cli::parse();

    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    };
    ExitCode::from(code.clamp(0, 255) as u8)
}
