//! HTTP + WebSocket external interface: packet ingestion, mode control,
//! results retrieval and live event push.

mod routes;
mod ws;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::Context;

use crate::store::Store;

pub use routes::build_router;

/// Shared application state handed to every HTTP/WebSocket handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Mutex<Store>>,
}

impl AppState {
    pub fn new(store: Store) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }
}

/// Binds and serves the HTTP/WebSocket router until the process is signaled
/// to stop.
pub async fn run_http_server(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("binding HTTP listener")?;
    tracing::info!(%addr, "listening");
    let router = build_router(state);
    axum::serve(listener, router)
        .await
        .context("serving HTTP router")?;
    Ok(())
}
