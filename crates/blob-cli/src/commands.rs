use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use anyhow::Context;
use blob_crypto::hash_reader;
use blob_gc::GcConfig;
use blob_store::StoreConfig;
use blob_types::ContentHash;
use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::bench;
use crate::cli::*;

/// Store and collector settings as one document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectiveConfig {
    pub store: StoreConfig,
    pub gc: GcConfig,
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Hash(args) => cmd_hash(args, cli.format),
        Command::Config(args) => cmd_config(args, cli.format),
        Command::Bench(args) => cmd_bench(args, cli.format),
    }
}

fn hash_file(path: &Path) -> anyhow::Result<(ContentHash, u64)> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    hash_reader(&mut BufReader::new(file)).with_context(|| format!("cannot read {}", path.display()))
}

fn cmd_hash(args: HashArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut entries = Vec::with_capacity(args.paths.len());
    for path in &args.paths {
        let (hash, size) = hash_file(path)?;
        entries.push(serde_json::json!({
            "path": path.display().to_string(),
            "hash": &hash,
            "size": size,
        }));
        if format == OutputFormat::Text {
            println!("{}  {}", hash.as_str().yellow(), path.display());
        }
    }
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    }
    Ok(())
}

fn cmd_config(args: ConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = match &args.file {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
            parse_config(&text).with_context(|| format!("invalid config in {}", path.display()))?
        }
        None => EffectiveConfig::default(),
    };
    config.gc.validate()?;
    match format {
        OutputFormat::Text => print!("{}", toml::to_string_pretty(&config)?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
    }
    Ok(())
}

fn parse_config(text: &str) -> anyhow::Result<EffectiveConfig> {
    let config: EffectiveConfig = toml::from_str(text)?;
    if config.store.keys != config.gc.keys {
        anyhow::bail!("store and gc key layouts differ; the collector would not see the store's blobs");
    }
    Ok(config)
}

fn cmd_bench(args: BenchArgs, format: OutputFormat) -> anyhow::Result<()> {
    let report = bench::run(&args)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!(
                "{} {} blobs x {} bytes, {} workers",
                "bench".bold(),
                args.count,
                args.size,
                args.workers
            );
            for phase in &report.phases {
                println!(
                    "  {:<10} {:>9.2} ms  {:>10.0} ops/s",
                    phase.name.cyan(),
                    phase.millis,
                    phase.ops_per_sec
                );
            }
            println!(
                "  stored {} records, {} bytes; gc deleted {}",
                report.records.to_string().bold(),
                report.stored_bytes,
                report.gc_deleted.to_string().green()
            );
        }
    }
    Ok(())
}
