use rankmix::cache::{query_key, rerank_key, SqliteCache};
use rankmix::cli::{CacheAction, Cli, Commands, ConfigAction};
use rankmix::config::{expand_path, CacheBackend, Config};
use rankmix::error::{RankmixError, Result};
use std::path::PathBuf;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
        Commands::Cache { action } => {
            cmd_cache(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose { "rankmix=debug" } else { "rankmix=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path)?;
            let value = serde_json::to_value(&config).map_err(|e| RankmixError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            let shown = match section {
                Some(section) => value.get(&section).cloned().ok_or_else(|| {
                    RankmixError::Config(format!("Unknown config section: {}", section))
                })?,
                None => value,
            };

            let json = serde_json::to_string_pretty(&shown).map_err(|e| RankmixError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| RankmixError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn cmd_cache(config_path: Option<PathBuf>, action: CacheAction) -> Result<()> {
    let config = load_config(config_path)?;

    match action {
        CacheAction::Key {
            query,
            top_k,
            doc_id,
        } => {
            let top_k = top_k.unwrap_or(config.reranker.top_k);
            let key = query_key(&query, top_k).map_err(|e| RankmixError::Other(e.into()))?;
            println!("query:  {}", key);

            if let Some(doc_id) = doc_id {
                let key =
                    rerank_key(&doc_id, &query).map_err(|e| RankmixError::Other(e.into()))?;
                println!("rerank: {}", key);
            }
        }
        CacheAction::Stats => {
            let Some(cache) = open_sqlite_cache(&config)? else {
                return Ok(());
            };
            let stats = cache.stats()?;

            println!("Cache: {}", expand_path(&config.cache.path)?.display());
            println!("  Entries:    {}", stats.entries);
            println!("  Expired:    {}", stats.expired_entries);
            println!("  Compressed: {}", stats.compressed_entries);
            println!("  Size:       {} bytes", stats.total_size_bytes);
        }
        CacheAction::Purge { all } => {
            let Some(cache) = open_sqlite_cache(&config)? else {
                return Ok(());
            };

            let removed = if all {
                cache.clear()?
            } else {
                cache.purge_expired()?
            };
            println!("✓ Removed {} cache entries", removed);
        }
    }

    Ok(())
}

/// The configured SQLite cache, or `None` (with a note) for other backends
fn open_sqlite_cache(config: &Config) -> Result<Option<SqliteCache>> {
    if config.cache.backend != CacheBackend::Sqlite {
        println!(
            "Cache backend is {:?}; only the sqlite backend persists entries",
            config.cache.backend
        );
        return Ok(None);
    }

    let path = expand_path(&config.cache.path)?;
    Ok(Some(SqliteCache::open(
        &path,
        config.cache.compression_threshold,
    )?))
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'rankmix config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        return Ok(config);
    }

    Config::load(&path)
}
