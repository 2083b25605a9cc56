use anyhow::Result;
use axum::Router;
use clap::Parser;
use object_catalog::{
    Catalog,
    cli::{self, Cli, Command},
    config::AppConfig,
    db, routes,
    services::parser::ParserRegistry,
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // --- Parse config + command ---
    let cli = Cli::parse();
    let cfg = AppConfig::from_env_and_args(&cli.config)?;
    tracing::debug!("Starting object-catalog with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url, cfg.max_connections).await?);

    let catalog = Catalog::new(db.clone(), Arc::new(ParserRegistry::new()));
    let user = cli.identity.user();

    match cli.command {
        Command::Migrate => {
            db::run_migrations(&db).await?;
            tracing::info!("Database migration complete.");
        }
        Command::Serve => serve(&cfg, catalog).await?,
        Command::Bucket(command) => cli::run_bucket(&catalog, &user, command).await?,
        Command::Object(command) => cli::run_object(&catalog, &cfg, &user, command).await?,
        Command::Grant(command) => cli::run_grant(&catalog, &user, command).await?,
        Command::Access(command) => cli::run_access(&catalog, &user, command).await?,
    }

    Ok(())
}

async fn serve(cfg: &AppConfig, catalog: Catalog) -> Result<()> {
    let app: Router = routes::routes::routes().with_state(catalog);

    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
