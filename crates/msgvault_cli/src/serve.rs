//! The `serve` subcommand: builds the configured backend, opens the
//! namespace registry, and hands both to `msgvault_server::serve`.

use std::sync::Arc;

use anyhow::{bail, Result};
use msgvault::Store;
use msgvault_registry::RegistryHandle;
use msgvault_server::{hash_token, AppState, ServerConfig};
use tracing::info;

use crate::cli::{socket_addr, BackendKind, ServeArgs};

pub async fn run(args: ServeArgs) -> Result<()> {
    std::fs::create_dir_all(&args.data_dir)?;

    let admin_token_hash = if args.test_mode {
        None
    } else {
        match &args.token {
            Some(token) => Some(hash_token(token)),
            None => bail!("--token is required unless --test-mode is set"),
        }
    };

    let registry = RegistryHandle::open(args.data_dir.join("registry"), admin_token_hash)?;
    let store: Arc<dyn Store> = build_store(&args).await?;

    info!(backend = ?args.backend, test_mode = args.test_mode, "msgvault starting");

    let state = Arc::new(AppState::new(store, registry));
    let config = ServerConfig::new(socket_addr(args.port));
    msgvault_server::serve(config, state).await
}

async fn build_store(args: &ServeArgs) -> Result<Arc<dyn Store>> {
    match args.backend {
        BackendKind::Sled => {
            let backend = msgvault_sled::SledBackend::new(args.data_dir.join("sled"));
            Ok(Arc::new(backend))
        }
        BackendKind::Sqlite => {
            let backend = msgvault_sqlite::SqliteBackend::new(args.data_dir.join("sqlite"), args.test_mode);
            Ok(Arc::new(backend))
        }
        BackendKind::Postgres => {
            let url = args
                .database_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--database-url is required for --backend postgres"))?;
            let backend = msgvault_postgres::PostgresBackend::connect(&url).await?;
            Ok(Arc::new(backend))
        }
    }
}
