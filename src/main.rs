use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use feedvault::config::{self, Config};
use feedvault::item::{write_feed, Item};
use feedvault::storage::{assemble_item, Storage, StorageParams, StorageRegistry};
use feedvault::util::atomic_write;

/// SEC-007: Archives hold private reading data. Keep the directory
/// user-only on Unix; silently skipped when the backend has no directory
/// (memory, `:memory:` databases).
fn restrict_dir_permissions(dir: &Path) {
    if !dir.is_dir() {
        return;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(dir, perms) {
                    tracing::warn!(
                        path = %dir.display(),
                        error = %e,
                        "Failed to set archive directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %dir.display(),
                    error = %e,
                    "Failed to read archive directory metadata"
                );
            }
        }
    }
}

/// Looks up the backend factory and opens storage, exiting with a listing
/// of available backends when the key is unknown.
fn open_storage(
    registry: &StorageRegistry,
    backend: &str,
    params: &StorageParams,
) -> Result<Arc<dyn Storage>> {
    let Some(factory) = registry.get(backend) else {
        eprintln!("Error: Unknown storage backend '{}'.", backend);
        eprintln!();
        eprintln!("Available backends:");
        for key in registry.keys() {
            if let Some(factory) = registry.get(key) {
                eprintln!("  {:<8} {}", factory.key(), factory.name());
            }
        }
        std::process::exit(1);
    };
    let storage = factory.create_storage(params).with_context(|| {
        format!(
            "Failed to open '{}' storage at {}",
            backend,
            params.archive_path.display()
        )
    })?;
    restrict_dir_permissions(&params.archive_path);
    Ok(storage)
}

#[derive(Parser, Debug)]
#[command(name = "feedvault", about = "Article archive maintenance for feed readers")]
struct Args {
    /// Config file (defaults to ~/.config/feedvault/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Archive directory (overrides the config file)
    #[arg(long, value_name = "DIR", global = true)]
    archive_dir: Option<PathBuf>,

    /// Storage backend key (overrides the config file)
    #[arg(long, value_name = "KEY", global = true)]
    backend: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List archived feeds with their counters
    Feeds,

    /// Write one feed's archive to a file (or stdout) as an Atom document
    Export {
        /// Feed URL whose archive to export
        url: String,

        /// Output file; stdout when omitted
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Copy every archive, counter and blob into another backend
    Migrate {
        /// Target backend key
        #[arg(long, value_name = "KEY")]
        to: String,

        /// Archive directory for the target (defaults to the source directory)
        #[arg(long, value_name = "DIR")]
        target_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let mut params = StorageParams::from_config(&config);
    if let Some(dir) = &args.archive_dir {
        params.archive_path = dir.clone();
    }
    let backend = args.backend.clone().unwrap_or_else(|| config.backend.clone());

    let registry = StorageRegistry::with_builtin();

    match args.command {
        Command::Feeds => {
            let storage = open_storage(&registry, &backend, &params)?;
            let feeds = storage.feeds();
            if feeds.is_empty() {
                println!("No archived feeds at {}", params.archive_path.display());
            } else {
                for url in &feeds {
                    let unread = storage.unread_for(url).unwrap_or(0);
                    let total = storage.total_count_for(url).unwrap_or(0);
                    let fetched = match storage.last_fetch_for(url) {
                        Some(when) => when.format("%Y-%m-%d %H:%M UTC").to_string(),
                        None => "never".to_string(),
                    };
                    println!(
                        "{:>5} unread / {:>5} total  fetched {:<20}  {}",
                        unread, total, fetched, url
                    );
                }
                println!("{} feeds", feeds.len());
            }
            storage.close().context("Failed to close storage")?;
        }

        Command::Export { url, output } => {
            let storage = open_storage(&registry, &backend, &params)?;
            // Opening an archive registers it, so check the listing first
            // instead of creating an empty archive for a typoed URL.
            if !storage.feeds().contains(&url) {
                eprintln!(
                    "Error: No archive for '{}' at {}",
                    url,
                    params.archive_path.display()
                );
                eprintln!();
                eprintln!("Run 'feedvault feeds' to list archived feeds.");
                std::process::exit(1);
            }
            let archive = storage
                .archive_for(&url)
                .with_context(|| format!("Failed to open archive for '{}'", url))?;
            let items: Vec<Item> = archive
                .articles()
                .iter()
                .filter_map(|guid| assemble_item(archive.as_ref(), guid))
                .collect();
            let xml = write_feed(&items).context("Failed to encode archive as Atom")?;
            match output {
                Some(path) => {
                    atomic_write(&path, &xml)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported {} articles to {}", items.len(), path.display());
                }
                None => {
                    use std::io::Write;
                    std::io::stdout()
                        .write_all(&xml)
                        .context("Failed to write to stdout")?;
                }
            }
            storage.close().context("Failed to close storage")?;
        }

        Command::Migrate { to, target_dir } => {
            let mut target_params = params.clone();
            if let Some(dir) = target_dir {
                target_params.archive_path = dir;
            }
            if to == backend && target_params.archive_path == params.archive_path {
                eprintln!(
                    "Error: Source and target are both '{}' at {}.",
                    to,
                    params.archive_path.display()
                );
                eprintln!("Pass --target-dir to migrate within the same backend.");
                std::process::exit(1);
            }

            let storage = open_storage(&registry, &backend, &params)?;
            let target = open_storage(&registry, &to, &target_params)?;

            target
                .add(storage.as_ref())
                .context("Migration failed; the target may hold a partial copy")?;
            target
                .commit()
                .context("Failed to commit migrated archives")?;
            let count = target.feeds().len();

            storage.close().context("Failed to close source storage")?;
            target.close().context("Failed to close target storage")?;
            println!(
                "Migrated {} feeds from '{}' to '{}' at {}",
                count,
                backend,
                to,
                target_params.archive_path.display()
            );
        }
    }

    Ok(())
}
