//! `contracts-freeze`: snapshots the schema/contract files a `SchemaProvider`
//! would serve at a point in time, so a consumer can diff or roll back to a
//! known-good contract set. Adjacent to the event bus itself — the bus only
//! ever reads contracts through the `SchemaProvider` interface, never this
//! CLI's output directly.
//!
//! ```text
//! contracts-freeze create [version]   # defaults to a UTC timestamp
//! contracts-freeze list
//! ```
//!
//! `create` writes `contracts/_frozen/freeze-<version>.json` (one entry per
//! contract file: relative path, sha256, size) and the companion
//! `contracts/_frozen/sha-index-<version>.json` (a flat path -> sha256 map),
//! then overwrites `freeze-latest.json`/`sha-index-latest.json` with the
//! same content so callers can always resolve "the current frozen set"
//! without knowing the version string.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const FROZEN_DIR: &str = "_frozen";

#[derive(Parser)]
#[command(name = "contracts-freeze")]
#[command(about = "Freeze or list point-in-time snapshots of contract/schema files", long_about = None)]
struct Cli {
    /// Directory contract/schema files live under.
    #[arg(long, default_value = "contracts")]
    contracts_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Freeze the current contents of `contracts_dir` under a version.
    Create {
        /// The version tag. Defaults to a UTC timestamp (`%Y%m%dT%H%M%SZ`).
        version: Option<String>,
    },
    /// List previously frozen versions.
    List,
}

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("failed to read contracts directory `{path}`: {source}")]
    ReadDir { path: String, source: std::io::Error },
    #[error("failed to read contract file `{path}`: {source}")]
    ReadFile { path: String, source: std::io::Error },
    #[error("failed to write `{path}`: {source}")]
    Write { path: String, source: std::io::Error },
    #[error("failed to serialize manifest: {source}")]
    Serialize { #[source] source: serde_json::Error },
}

#[derive(Debug, Serialize, Deserialize)]
struct FrozenContract {
    path: String,
    sha256: String,
    size_bytes: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct FreezeManifest {
    version: String,
    created_at: DateTime<Utc>,
    contracts: Vec<FrozenContract>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Create { version } => create(&cli.contracts_dir, version),
        Command::List => list(&cli.contracts_dir),
    };

    if let Err(error) = &result {
        tracing::error!(%error, "contracts-freeze failed");
    }
    result.map_err(Into::into)
}

fn create(contracts_dir: &Path, version: Option<String>) -> Result<(), Error> {
    let version = version.unwrap_or_else(|| Utc::now().format("%Y%m%dT%H%M%SZ").to_string());
    let frozen_dir = contracts_dir.join(FROZEN_DIR);
    fs::create_dir_all(&frozen_dir).map_err(|source| Error::Write { path: frozen_dir.display().to_string(), source })?;

    let mut contracts = collect_contracts(contracts_dir, &frozen_dir)?;
    contracts.sort_by(|a, b| a.path.cmp(&b.path));

    let sha_index: std::collections::BTreeMap<String, String> =
        contracts.iter().map(|c| (c.path.clone(), c.sha256.clone())).collect();

    let manifest = FreezeManifest {
        version: version.clone(),
        created_at: Utc::now(),
        contracts,
    };

    write_json(&frozen_dir.join(format!("freeze-{version}.json")), &manifest)?;
    write_json(&frozen_dir.join("freeze-latest.json"), &manifest)?;
    write_json(&frozen_dir.join(format!("sha-index-{version}.json")), &sha_index)?;
    write_json(&frozen_dir.join("sha-index-latest.json"), &sha_index)?;

    println!("froze {} contract(s) as version {version}", manifest.contracts.len());
    Ok(())
}

fn list(contracts_dir: &Path) -> Result<(), Error> {
    let frozen_dir = contracts_dir.join(FROZEN_DIR);
    if !frozen_dir.is_dir() {
        println!("no frozen versions (no `{}` directory)", frozen_dir.display());
        return Ok(());
    }

    let mut versions = Vec::new();
    let entries = fs::read_dir(&frozen_dir).map_err(|source| Error::ReadDir { path: frozen_dir.display().to_string(), source })?;
    for entry in entries {
        let entry = entry.map_err(|source| Error::ReadDir { path: frozen_dir.display().to_string(), source })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(rest) = name.strip_prefix("freeze-") else { continue };
        let Some(version) = rest.strip_suffix(".json") else { continue };
        if version == "latest" {
            continue;
        }

        let bytes = fs::read(entry.path()).map_err(|source| Error::ReadFile { path: entry.path().display().to_string(), source })?;
        let manifest: FreezeManifest = serde_json::from_slice(&bytes).map_err(|source| Error::Serialize { source })?;
        versions.push(manifest);
    }

    versions.sort_by_key(|m| m.created_at);
    if versions.is_empty() {
        println!("no frozen versions");
    }
    for manifest in versions {
        println!("{}  {}  {} contract(s)", manifest.version, manifest.created_at.to_rfc3339(), manifest.contracts.len());
    }
    Ok(())
}

/// Walks `contracts_dir` (skipping `frozen_dir` itself) and hashes every
/// regular file found.
fn collect_contracts(contracts_dir: &Path, frozen_dir: &Path) -> Result<Vec<FrozenContract>, Error> {
    let mut contracts = Vec::new();
    if !contracts_dir.is_dir() {
        return Ok(contracts);
    }
    walk(contracts_dir, contracts_dir, frozen_dir, &mut contracts)?;
    Ok(contracts)
}

fn walk(root: &Path, dir: &Path, frozen_dir: &Path, out: &mut Vec<FrozenContract>) -> Result<(), Error> {
    let entries = fs::read_dir(dir).map_err(|source| Error::ReadDir { path: dir.display().to_string(), source })?;
    for entry in entries {
        let entry = entry.map_err(|source| Error::ReadDir { path: dir.display().to_string(), source })?;
        let path = entry.path();
        if path == frozen_dir {
            continue;
        }
        if path.is_dir() {
            walk(root, &path, frozen_dir, out)?;
            continue;
        }

        let bytes = fs::read(&path).map_err(|source| Error::ReadFile { path: path.display().to_string(), source })?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let sha256 = format!("{:x}", hasher.finalize());
        let relative = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().replace('\\', "/");

        out.push(FrozenContract {
            path: relative,
            sha256,
            size_bytes: bytes.len() as u64,
        });
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    let json = serde_json::to_vec_pretty(value).map_err(|source| Error::Serialize { source })?;
    fs::write(path, json).map_err(|source| Error::Write { path: path.display().to_string(), source })
}

#[cfg(test)]
mod test {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn create_then_list_round_trips() {
        let dir = tempdir().unwrap();
        let contracts_dir = dir.path().join("contracts");
        fs::create_dir_all(contracts_dir.join("memory")).unwrap();
        fs::write(contracts_dir.join("memory").join("write.schema.json"), b"{\"type\":\"object\"}").unwrap();

        create(&contracts_dir, Some("v1".to_string())).unwrap();

        let frozen_dir = contracts_dir.join(FROZEN_DIR);
        assert!(frozen_dir.join("freeze-v1.json").is_file());
        assert!(frozen_dir.join("freeze-latest.json").is_file());
        assert!(frozen_dir.join("sha-index-v1.json").is_file());
        assert!(frozen_dir.join("sha-index-latest.json").is_file());

        let manifest_bytes = fs::read(frozen_dir.join("freeze-v1.json")).unwrap();
        let manifest: FreezeManifest = serde_json::from_slice(&manifest_bytes).unwrap();
        assert_eq!(manifest.contracts.len(), 1);
        assert_eq!(manifest.contracts[0].path, "memory/write.schema.json");

        list(&contracts_dir).unwrap();
    }

    #[test]
    fn create_skips_the_frozen_directory_itself() {
        let dir = tempdir().unwrap();
        let contracts_dir = dir.path().join("contracts");
        fs::create_dir_all(&contracts_dir).unwrap();
        fs::write(contracts_dir.join("a.schema.json"), b"{}").unwrap();

        create(&contracts_dir, Some("v1".to_string())).unwrap();
        create(&contracts_dir, Some("v2".to_string())).unwrap();

        let frozen_dir = contracts_dir.join(FROZEN_DIR);
        let manifest_bytes = fs::read(frozen_dir.join("freeze-v2.json")).unwrap();
        let manifest: FreezeManifest = serde_json::from_slice(&manifest_bytes).unwrap();
        assert_eq!(manifest.contracts.len(), 1, "the _frozen directory must not be re-hashed into its own manifest");
    }
}
