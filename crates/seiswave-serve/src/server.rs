//! TCP accept loop

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use seiswave::QueryEngine;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::dispatch::DispatchRegistry;
use crate::pool::StorePool;
use crate::session::serve_connection;
use crate::stats::ConnectionRegistry;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Longest request line accepted before the connection is dropped.
    pub max_line_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: 4096,
        }
    }
}

/// State shared by every session for the lifetime of the server.
pub struct ServerState {
    pub registry: ConnectionRegistry,
    pub dispatch: DispatchRegistry,
    pub pool: StorePool,
    pub engine: QueryEngine,
    pub config: ServerConfig,
}

impl ServerState {
    /// State with the standard command set.
    pub fn new(pool: StorePool, engine: QueryEngine, config: ServerConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            dispatch: DispatchRegistry::standard(),
            pool,
            engine,
            config,
        }
    }

    pub fn with_dispatch(mut self, dispatch: DispatchRegistry) -> Self {
        self.dispatch = dispatch;
        self
    }
}

pub struct WaveServer {
    state: Arc<ServerState>,
}

impl WaveServer {
    pub fn new(state: ServerState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Accept connections until `shutdown` completes. Each connection runs on
    /// its own task; a failing connection never stops the loop.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        info!("Listening on {}", listener.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down");
                    self.state.pool.close();
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let _ = stream.set_nodelay(true);
                        tokio::spawn(serve_connection(stream, remote, self.state.clone()));
                    }
                    Err(e) => {
                        warn!("Accept failed: {e}");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
    }

    /// Bind `addr` and serve until the process ends.
    pub async fn listen(&self, addr: SocketAddr) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, std::future::pending()).await
    }
}
