use anyhow::{Context, Result};
use clap::Args;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// CLI arguments win over `OBJECT_CATALOG_*` environment variables, which win
/// over the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub max_connections: u32,
    pub default_page_size: i64,
}

/// Configuration flags accepted by every subcommand.
#[derive(Args, Debug, Default, Clone)]
pub struct ConfigArgs {
    /// Host to bind to (overrides OBJECT_CATALOG_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_CATALOG_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Database URL (overrides OBJECT_CATALOG_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Pool size (overrides OBJECT_CATALOG_MAX_CONNECTIONS)
    #[arg(long, global = true)]
    pub max_connections: Option<u32>,

    /// Page size of object listings (overrides OBJECT_CATALOG_DEFAULT_PAGE_SIZE)
    #[arg(long, global = true)]
    pub default_page_size: Option<i64>,
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

impl AppConfig {
    /// Merge parsed CLI args over the environment.
    pub fn from_env_and_args(args: &ConfigArgs) -> Result<Self> {
        let env_host = env_or("OBJECT_CATALOG_HOST", "0.0.0.0".to_string())?;
        let env_port = env_or("OBJECT_CATALOG_PORT", 3000u16)?;
        let env_db = env_or(
            "OBJECT_CATALOG_DATABASE_URL",
            "sqlite://./data/catalog.db".to_string(),
        )?;
        let env_max = env_or("OBJECT_CATALOG_MAX_CONNECTIONS", 5u32)?;
        let env_page = env_or("OBJECT_CATALOG_DEFAULT_PAGE_SIZE", 100i64)?;

        let cfg = Self {
            host: args.host.clone().unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.clone().unwrap_or(env_db),
            max_connections: args.max_connections.unwrap_or(env_max),
            default_page_size: args.default_page_size.unwrap_or(env_page),
        };
        if cfg.max_connections == 0 {
            anyhow::bail!("max_connections must be at least 1");
        }
        if cfg.default_page_size < 1 {
            anyhow::bail!("default_page_size must be at least 1");
        }
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
