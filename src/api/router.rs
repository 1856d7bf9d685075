//! API router configuration.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    api_info, control_entry, delete_entry, get_entry, health, launch, list_entries,
    refresh_entry, AppState,
};

/// Create the API router with the given state.
pub fn create_router(state: AppState) -> Router {
    // Entry routes
    let entry_routes = Router::new()
        .route("/", get(list_entries))
        .route("/{name}", get(get_entry).delete(delete_entry))
        .route("/{name}/refresh", post(refresh_entry))
        .route("/{name}/{action}", post(control_entry));

    // API v1 routes
    let api_v1 = Router::new()
        .route("/", get(api_info))
        .route("/launch", post(launch))
        .nest("/entries", entry_routes);

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Start the API server.
///
/// Runs until the process receives an interrupt.
pub async fn serve(addr: &str, state: AppState) -> crate::Result<()> {
    let router = create_router(state);

    tracing::info!("Starting shell-relay daemon on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(crate::error::RelayError::Io)?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| crate::error::RelayError::Io(std::io::Error::other(e.to_string())))?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to install interrupt handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::backend::{ConnectorContext, ConnectorRegistry};
    use crate::compose::SessionComposer;
    use crate::launch::LaunchExchange;
    use crate::session::testing::{ScriptedBackend, ScriptedResponse};
    use crate::store::ConnectionStore;

    #[test]
    fn test_router_creation() {
        let backend = ScriptedBackend::new(|_| ScriptedResponse::exit(0));
        let store = Arc::new(ConnectionStore::new());
        let registry = Arc::new(ConnectorRegistry::with_defaults(ConnectorContext::new(
            backend.factory(),
        )));
        let state = AppState::new(
            Arc::clone(&store),
            Arc::new(SessionComposer::new(Arc::clone(&registry))),
            Arc::new(LaunchExchange::new(store, registry)),
        );

        let _router = create_router(state);
    }
}
