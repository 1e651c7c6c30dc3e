//! Recompute `manifest.json` for a model directory.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin write_manifest -- models
//! cargo run --bin write_manifest -- models --file anomaly_detector.json
//! ```
//!
//! Without `--file`, every `*.json` artifact in the directory (except the
//! manifest itself) is bound.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;

use vitalstream::adapters::models::{ArtifactManifest, MANIFEST_FILE};

#[derive(Parser)]
#[command(name = "write_manifest")]
#[command(about = "Bind model artifacts to their SHA-256 digests")]
struct Args {
    /// Directory holding the model artifacts
    model_dir: PathBuf,

    /// Artifact file name to bind (repeatable)
    #[arg(short, long = "file")]
    files: Vec<String>,
}

fn discover_artifacts(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to list {dir:?}"))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".json") && name != MANIFEST_FILE {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let files = if args.files.is_empty() {
        discover_artifacts(&args.model_dir)?
    } else {
        args.files
    };
    if files.is_empty() {
        bail!("No artifacts found in {:?}", args.model_dir);
    }

    let manifest = ArtifactManifest::build(&args.model_dir, &files)
        .context("Failed to hash artifacts")?;
    manifest
        .write(&args.model_dir)
        .context("Failed to write manifest")?;

    for (name, digest) in &manifest.files {
        println!("{digest}  {name}");
    }
    println!(
        "Wrote {:?}",
        args.model_dir.join(MANIFEST_FILE)
    );

    Ok(())
}
