// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the subcommands and all their configurable flags.
// Shapes are written as "x,y,z" and parsed through Shape3's
// FromStr impl.

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::convert_use_case::ConvertConfig;
use crate::data::shard_format::Compression;
use crate::data::validator::VolumeValidator;
use crate::domain::volume::Shape3;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate raw volumes and write them into shard files
    Convert(ConvertArgs),

    /// Decode every record matched by a shard glob
    Verify(VerifyArgs),

    /// Compute the number of batches per epoch
    Steps(StepsArgs),

    /// Pull a few batches through the pipeline and log statistics
    Preview(PreviewArgs),
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// CSV with `features` and `labels` columns of .npy paths
    #[arg(long)]
    pub manifest: PathBuf,

    /// Directory receiving the shards and dataset.json
    #[arg(long, default_value = "shards")]
    pub output_dir: PathBuf,

    /// Shard file name prefix
    #[arg(long, default_value = "data")]
    pub prefix: String,

    /// Maximum number of feature/label pairs per shard file
    #[arg(long, default_value_t = 100)]
    pub examples_per_shard: usize,

    /// Fraction of rows held out as the "eval" split
    #[arg(long, default_value_t = 0.0)]
    pub eval_fraction: f64,

    /// Gzip every shard file
    #[arg(long)]
    pub gzip: bool,

    /// Seed for the train/eval split
    #[arg(long)]
    pub seed: Option<u64>,

    /// Largest distance from an integer a float label may have
    #[arg(long, default_value_t = VolumeValidator::DEFAULT_TOLERANCE)]
    pub label_tolerance: f64,
}

/// The application layer never sees clap types.
impl From<ConvertArgs> for ConvertConfig {
    fn from(a: ConvertArgs) -> Self {
        ConvertConfig {
            manifest:           a.manifest,
            output_dir:         a.output_dir,
            prefix:             a.prefix,
            examples_per_shard: a.examples_per_shard,
            eval_fraction:      a.eval_fraction,
            compression:        if a.gzip { Compression::Gzip } else { Compression::None },
            seed:               a.seed,
            label_tolerance:    a.label_tolerance,
        }
    }
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Glob matching the shard files, e.g. "shards/data-train-*.vshard"
    #[arg(long)]
    pub pattern: String,
}

#[derive(Args, Debug)]
pub struct StepsArgs {
    /// dataset.json written by `convert`
    #[arg(long, conflicts_with_all = ["n_volumes", "volume_shape"])]
    pub dataset: Option<PathBuf>,

    /// Split of the dataset to count
    #[arg(long, default_value = "train")]
    pub split: String,

    #[arg(long, requires = "volume_shape")]
    pub n_volumes: Option<usize>,

    #[arg(long, requires = "n_volumes")]
    pub volume_shape: Option<Shape3>,

    #[arg(long)]
    pub block_shape: Shape3,

    #[arg(long)]
    pub batch_size: usize,
}

#[derive(Args, Debug)]
pub struct PreviewArgs {
    /// Pipeline configuration JSON
    #[arg(long)]
    pub config: PathBuf,

    /// Number of batches to pull
    #[arg(long, default_value_t = 4)]
    pub batches: usize,

    /// CSV with `original,new` columns
    #[arg(long)]
    pub label_mapping: Option<PathBuf>,

    /// Append per-batch statistics to this CSV
    #[arg(long)]
    pub stats_csv: Option<PathBuf>,
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::super::Cli;
    use super::*;
    use clap::Parser;

    #[test]
    fn test_convert_args_map_to_config() {
        let cli = Cli::try_parse_from([
            "volshard", "convert", "--manifest", "m.csv", "--gzip", "--examples-per-shard", "8",
        ])
        .unwrap();
        let Commands::Convert(args) = cli.command else { panic!("expected convert") };
        let cfg: ConvertConfig = args.into();
        assert_eq!(cfg.compression, Compression::Gzip);
        assert_eq!(cfg.examples_per_shard, 8);
        assert_eq!(cfg.prefix, "data");
    }

    #[test]
    fn test_steps_parses_shapes() {
        let cli = Cli::try_parse_from([
            "volshard", "steps", "--n-volumes", "10", "--volume-shape", "256,256,256",
            "--block-shape", "128,128,128", "--batch-size", "2",
        ])
        .unwrap();
        let Commands::Steps(args) = cli.command else { panic!("expected steps") };
        assert_eq!(args.volume_shape, Some(Shape3::new(256, 256, 256)));
        assert_eq!(args.block_shape, Shape3::new(128, 128, 128));
    }

    #[test]
    fn test_steps_rejects_both_sources() {
        let parsed = Cli::try_parse_from([
            "volshard", "steps", "--dataset", "d.json", "--n-volumes", "1", "--volume-shape", "2,2,2",
            "--block-shape", "1,1,1", "--batch-size", "1",
        ]);
        assert!(parsed.is_err());
    }
}
