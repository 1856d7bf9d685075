//! Shell-relay daemon entry point.

use std::sync::Arc;

use tracing::info;

use shell_relay::api::{self, AppState};
use shell_relay::{
    cli, logging, Config, ConnectionStore, ConnectorContext, ConnectorRegistry, LaunchExchange,
    NativePtyFactory, SessionComposer,
};

#[tokio::main]
async fn main() -> shell_relay::Result<()> {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };

    if args.help {
        cli::print_help();
        return Ok(());
    }
    if args.version {
        cli::print_version();
        return Ok(());
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };

    std::env::set_var("RUST_LOG", config.log_filter());
    logging::init();

    info!("shell-relay v{}", env!("CARGO_PKG_VERSION"));

    let store = match &config.storage.entries {
        Some(path) if path.exists() => Arc::new(ConnectionStore::load(path)?),
        Some(path) => {
            info!(path = %path.display(), "entries file absent, starting empty");
            Arc::new(ConnectionStore::new())
        }
        None => Arc::new(ConnectionStore::new()),
    };
    info!(count = store.count(), "connection store ready");

    let context = ConnectorContext::new(Arc::new(NativePtyFactory::new()))
        .with_command_timeout(config.session.command_timeout());
    let registry = Arc::new(ConnectorRegistry::with_defaults(context));
    let composer = Arc::new(SessionComposer::new(Arc::clone(&registry)));
    let launch = Arc::new(LaunchExchange::new(Arc::clone(&store), registry));

    let state = AppState::new(Arc::clone(&store), Arc::clone(&composer), launch);
    api::serve(&config.bind_address(), state).await?;

    // Interrupt received: tear down sessions, persist entries
    composer.close_all(&store).await;
    if let Some(path) = &config.storage.entries {
        store.save(path)?;
        info!(path = %path.display(), "entries persisted");
    }

    Ok(())
}
