//! Kiln - asset cache baker
//!
//! Loads models through the engine's asset server so their binary mesh caches
//! are written ahead of time, and inspects existing cache files.

use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kiln_assets::{codec, AssetConfig, AssetServer, LoadSource};

#[derive(Parser)]
#[command(name = "kiln", version, about = "Bake and inspect Kiln mesh caches")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load models, writing mesh caches for any that lack one
    Bake {
        /// Asset config file (defaults to ~/.config/kiln/assets.toml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write caches under this directory instead of next to each model
        #[arg(long)]
        cache_root: Option<PathBuf>,
        /// Loader threads
        #[arg(long)]
        workers: Option<usize>,
        /// Ignore source modification times when reusing caches
        #[arg(long)]
        no_staleness_check: bool,
        /// Model files to load
        #[arg(required = true)]
        models: Vec<PathBuf>,
    },
    /// Print the contents of a mesh cache file
    Inspect {
        /// Path to a `.bin` cache
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Bake {
            config,
            cache_root,
            workers,
            no_staleness_check,
            models,
        } => {
            let mut config = match config {
                Some(path) => AssetConfig::load_from(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => AssetConfig::load(),
            };
            if cache_root.is_some() {
                config.cache_root = cache_root;
            }
            if workers.is_some() {
                config.worker_count = workers;
            }
            if no_staleness_check {
                config.check_staleness = false;
            }
            bake(config, &models)
        }
        Command::Inspect { file } => inspect(&file),
    }
}

fn bake(config: AssetConfig, models: &[PathBuf]) -> Result<()> {
    let server = AssetServer::new(config).context("Failed to create asset server")?;
    info!(
        "Baking {} models on {} workers",
        models.len(),
        server.pool().worker_count()
    );

    let (tx, rx) = mpsc::channel();
    for model in models {
        let tx = tx.clone();
        let requested = model.clone();
        server.request_model(model, move |result| {
            let _ = tx.send((requested, result));
        });
    }
    drop(tx);

    let mut failures = 0;
    for (path, result) in rx {
        match result {
            Ok(loaded) => {
                let record = &loaded.record;
                let origin = match record.source() {
                    LoadSource::Cache => "cache hit",
                    LoadSource::Parsed => "parsed",
                };
                println!(
                    "{}: {} meshes, {} vertices, {} indices ({})",
                    path.display(),
                    record.mesh_count(),
                    record.vertex_count(),
                    record.index_count(),
                    origin
                );
            }
            Err(e) => {
                error!("{}: {}", path.display(), e);
                failures += 1;
            }
        }
    }

    server.stop();

    if failures > 0 {
        bail!("{} of {} models failed to load", failures, models.len());
    }
    Ok(())
}

fn inspect(file: &Path) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let meshes =
        codec::decode(&bytes).with_context(|| format!("Failed to decode {}", file.display()))?;

    println!("{}: {} meshes, {} bytes", file.display(), meshes.len(), bytes.len());
    for (i, mesh) in meshes.iter().enumerate() {
        println!(
            "  mesh {}: {} vertices, {} indices, {} triangles",
            i,
            mesh.vertices.len(),
            mesh.indices.len(),
            mesh.triangle_count()
        );
    }
    Ok(())
}
