use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "blobstore",
    about = "Deduplicating content-addressed blob store",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the sha-256 content hash of files
    Hash(HashArgs),
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
    /// Exercise create/remove/gc against an in-memory repository
    Bench(BenchArgs),
}

#[derive(Args)]
pub struct HashArgs {
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Merge this TOML file over the defaults
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct BenchArgs {
    /// Distinct blobs to create
    #[arg(short = 'n', long, default_value = "1000")]
    pub count: usize,
    /// Size of each blob in bytes
    #[arg(short, long, default_value = "30720")]
    pub size: usize,
    /// Concurrent workers
    #[arg(short, long, default_value = "4")]
    pub workers: usize,
    /// Seed for generated content
    #[arg(long, default_value = "0")]
    pub seed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn bench_defaults() {
        let cli = Cli::parse_from(["blobstore", "bench"]);
        match cli.command {
            Command::Bench(args) => {
                assert_eq!(args.count, 1000);
                assert_eq!(args.size, 30 * 1024);
                assert_eq!(args.workers, 4);
            }
            _ => panic!("expected bench"),
        }
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn hash_requires_paths() {
        assert!(Cli::try_parse_from(["blobstore", "hash"]).is_err());
        let cli = Cli::try_parse_from(["blobstore", "--format", "json", "hash", "a", "b"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
    }
}
