// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Four commands are supported:
//   1. `convert` — validates raw volumes and writes shards
//   2. `verify`  — decodes every record of a shard glob
//   3. `steps`   — prints steps per epoch for a block/batch setup
//   4. `preview` — runs the pipeline for a few batches

pub mod commands;

use anyhow::{bail, Result};
use clap::Parser;
use commands::{Commands, ConvertArgs, PreviewArgs, StepsArgs, VerifyArgs};

use crate::application::convert_use_case::ConvertUseCase;
use crate::application::inspect_use_case::{InspectUseCase, PreviewRequest, StepsQuery, VolumeCount};
use crate::data::pipeline::PipelineConfig;

#[derive(Parser, Debug)]
#[command(
    name = "volshard",
    version = "0.1.0",
    about = "Shard 3D volume datasets and stream them as augmented block batches."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Convert(args) => run_convert(args),
            Commands::Verify(args)  => run_verify(args),
            Commands::Steps(args)   => run_steps(args),
            Commands::Preview(args) => run_preview(args),
        }
    }
}

fn run_convert(args: ConvertArgs) -> Result<()> {
    tracing::info!("Converting volumes listed in '{}'", args.manifest.display());
    let report = ConvertUseCase::new(args.into()).execute()?;
    println!(
        "Converted {} pairs of shape {} into {} shards. Metadata: {}",
        report.validated.n_pairs,
        report.validated.shape,
        report.shards.len(),
        report.metadata_path.display()
    );
    Ok(())
}

fn run_verify(args: VerifyArgs) -> Result<()> {
    let summary = InspectUseCase::verify(&args.pattern)?;
    for (path, count) in &summary.files {
        println!("{:>6}  {}", count, path.display());
    }
    match summary.shape {
        Some(shape) => println!("{} records of shape {} in {} files", summary.records, shape, summary.files.len()),
        None => println!("0 records in {} files", summary.files.len()),
    }
    Ok(())
}

fn run_steps(args: StepsArgs) -> Result<()> {
    let count = match (args.dataset, args.n_volumes, args.volume_shape) {
        (Some(path), None, None) => VolumeCount::Metadata { path, split: args.split },
        (None, Some(n_volumes), Some(volume_shape)) => VolumeCount::Explicit { n_volumes, volume_shape },
        _ => bail!("Pass either --dataset or both --n-volumes and --volume-shape"),
    };
    let steps = InspectUseCase::steps(&StepsQuery {
        count,
        block_shape: args.block_shape,
        batch_size:  args.batch_size,
    })?;
    println!("{steps}");
    Ok(())
}

fn run_preview(args: PreviewArgs) -> Result<()> {
    let mut config = PipelineConfig::from_json_file(&args.config)?;
    if config.n_epochs.is_none() {
        // an unbounded stream would never stop on a short dataset
        config.n_epochs = Some(1);
    }
    let stats = InspectUseCase::preview(&PreviewRequest {
        config,
        batches:       args.batches,
        label_mapping: args.label_mapping,
        stats_csv:     args.stats_csv,
    })?;
    println!("Previewed {} batches", stats.len());
    Ok(())
}
