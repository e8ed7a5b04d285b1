//! One connection's request loop
//!
//! Lines are read and answered strictly in order. Each line is either an
//! HTTP request line, answered by the status surface, or a native command
//! routed through the dispatch registry.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info};
use seiswave::{CommandCache, opcode_of};
use thiserror::Error;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};

use crate::dispatch::HandlerContext;
use crate::http;
use crate::pool::PoolError;
use crate::server::ServerState;
use crate::stats::ProtocolKind;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("unsupported command '{0}'")]
    Unsupported(String),
    #[error("request line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal failure during {stage}: {message}")]
    Internal { stage: &'static str, message: String },
}

impl SessionError {
    pub fn internal(stage: &'static str, message: impl Display) -> Self {
        SessionError::Internal {
            stage,
            message: message.to_string(),
        }
    }
}

impl From<PoolError> for SessionError {
    fn from(e: PoolError) -> Self {
        SessionError::internal("checkout", e)
    }
}

/// Run a session to completion, log how it ended, and unregister it.
pub async fn serve_connection<S>(stream: S, remote: SocketAddr, state: Arc<ServerState>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    state.registry.open(remote);
    debug!("{remote}: connected");

    match Session::new(stream, remote, &state).run().await {
        Ok(()) => debug!("{remote}: disconnected"),
        Err(SessionError::Io(e)) => debug!("{remote}: connection error: {e}"),
        Err(e @ (SessionError::Unsupported(_) | SessionError::LineTooLong { .. })) => {
            info!("{remote}: {e}, closing")
        }
        Err(e @ SessionError::Internal { .. }) => error!("{remote}: {e}"),
    }

    state.registry.close(remote);
}

struct Session<'a, S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    remote: SocketAddr,
    state: &'a ServerState,
    cache: CommandCache,
    line: Vec<u8>,
}

impl<'a, S> Session<'a, S>
where
    S: AsyncRead + AsyncWrite,
{
    fn new(stream: S, remote: SocketAddr, state: &'a ServerState) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
            remote,
            state,
            cache: CommandCache::new(),
            line: Vec::new(),
        }
    }

    async fn run(mut self) -> Result<(), SessionError> {
        while let Some(line) = self.read_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(request) = http::parse_request_line(&line) {
                self.serve_http(&request).await?;
            } else {
                self.serve_command(&line).await?;
            }
        }
        Ok(())
    }

    /// Next line without its terminator, `None` at end of stream.
    async fn read_line(&mut self) -> Result<Option<String>, SessionError> {
        let limit = self.state.config.max_line_bytes;
        self.line.clear();
        let n = (&mut self.reader)
            .take(limit as u64 + 2)
            .read_until(b'\n', &mut self.line)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        self.state.registry.record_read(self.remote, n);

        let content = self
            .line
            .strip_suffix(b"\n")
            .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
            .unwrap_or(self.line.as_slice());
        if content.len() > limit {
            return Err(SessionError::LineTooLong { limit });
        }
        Ok(Some(String::from_utf8_lossy(content).into_owned()))
    }

    async fn serve_http(&mut self, request: &http::HttpRequest) -> Result<(), SessionError> {
        // Headers are read and ignored.
        while let Some(header) = self.read_line().await? {
            if header.is_empty() {
                break;
            }
        }
        self.state
            .registry
            .record_command(self.remote, ProtocolKind::Http);
        debug!("{}: HTTP {:?} {}", self.remote, request.method, request.path);

        let reply = http::respond(request, &self.state.registry);
        self.write(&reply).await
    }

    async fn serve_command(&mut self, line: &str) -> Result<(), SessionError> {
        let Some(opcode) = opcode_of(line) else {
            debug!("{}: malformed command, no opcode: {line:?}", self.remote);
            return Ok(());
        };
        let state = self.state;
        let handler = state.dispatch.get(&opcode)?;
        state.registry.record_command(self.remote, ProtocolKind::Wws);

        let command = match self.cache.get_or_parse(line, handler.grammar()) {
            Ok(command) => command,
            Err(e) => {
                debug!("{}: malformed {opcode} command: {e}", self.remote);
                return Ok(());
            }
        };

        let ctx = HandlerContext {
            pool: &state.pool,
            engine: &state.engine,
            registry: &state.registry,
            remote: self.remote,
        };
        let response = handler.respond(&command, &ctx).await?;
        self.write(&response.encode()).await
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        self.state.registry.record_written(self.remote, bytes.len());
        Ok(())
    }
}
