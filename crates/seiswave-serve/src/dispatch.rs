//! Opcode dispatch and the standard request handlers

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use log::{debug, warn};
use seiswave::{
    Command, Grammar, QueryEngine, QueryError, QueryRequest, WaveformChunk, encode_binary,
    encode_text, epoch_now,
};

use crate::pool::StorePool;
use crate::protocol::Response;
use crate::session::SessionError;
use crate::stats::{ConnectionRegistry, SortSpec};

pub const PROTOCOL_VERSION: u32 = 3;

/// Everything a handler may touch while answering one request.
pub struct HandlerContext<'a> {
    pub pool: &'a StorePool,
    pub engine: &'a QueryEngine,
    pub registry: &'a ConnectionRegistry,
    pub remote: SocketAddr,
}

pub trait Handler: Send + Sync {
    /// How the arguments after `<OPCODE> <SEQ>` are parsed.
    fn grammar(&self) -> Grammar;

    fn respond<'a>(
        &'a self,
        command: &'a Command,
        ctx: &'a HandlerContext<'a>,
    ) -> BoxFuture<'a, Result<Response, SessionError>>;
}

/// Opcode → handler table. Read-only once built.
pub struct DispatchRegistry {
    handlers: IndexMap<String, Arc<dyn Handler>>,
}

impl DispatchRegistry {
    pub fn builder() -> DispatchBuilder {
        DispatchBuilder::default()
    }

    /// VERSION, MENU, GETSCNLRAW, GETSCNRAW, GETSCNLRSAMRAW and STATUS.
    pub fn standard() -> Self {
        Self::builder()
            .register("VERSION", VersionHandler)
            .register("MENU", MenuHandler)
            .register("GETSCNLRAW", WaveHandler::new(Grammar::Scnl))
            .register("GETSCNRAW", WaveHandler::new(Grammar::Scn))
            .register("GETSCNLRSAMRAW", WaveHandler::new(Grammar::Rsam))
            .register("STATUS", StatusHandler)
            .build()
    }

    /// Look up an upper-cased opcode.
    pub fn get(&self, opcode: &str) -> Result<&dyn Handler, SessionError> {
        self.handlers
            .get(opcode)
            .map(|handler| handler.as_ref())
            .ok_or_else(|| SessionError::Unsupported(opcode.to_string()))
    }

    pub fn opcodes(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl Default for DispatchRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Default)]
pub struct DispatchBuilder {
    handlers: IndexMap<String, Arc<dyn Handler>>,
}

impl DispatchBuilder {
    /// Registering an opcode again replaces its handler.
    pub fn register(mut self, opcode: &str, handler: impl Handler + 'static) -> Self {
        self.handlers
            .insert(opcode.to_ascii_uppercase(), Arc::new(handler));
        self
    }

    pub fn build(self) -> DispatchRegistry {
        DispatchRegistry {
            handlers: self.handlers,
        }
    }
}

// ============ Standard handlers ============

pub struct VersionHandler;

impl Handler for VersionHandler {
    fn grammar(&self) -> Grammar {
        Grammar::Bare
    }

    fn respond<'a>(
        &'a self,
        command: &'a Command,
        _ctx: &'a HandlerContext<'a>,
    ) -> BoxFuture<'a, Result<Response, SessionError>> {
        Box::pin(async move {
            Ok(Response::text(
                &command.seq,
                format!("PROTOCOL_VERSION: {PROTOCOL_VERSION}\n"),
            ))
        })
    }
}

/// One line per channel holding data: `<seq> <S> <C> <N> <L> <start> <end> i4`.
pub struct MenuHandler;

impl Handler for MenuHandler {
    fn grammar(&self) -> Grammar {
        Grammar::Bare
    }

    fn respond<'a>(
        &'a self,
        command: &'a Command,
        ctx: &'a HandlerContext<'a>,
    ) -> BoxFuture<'a, Result<Response, SessionError>> {
        Box::pin(async move {
            let handle = ctx.pool.checkout().await?;
            let store = handle.store();
            let channels = tokio::task::spawn_blocking(move || store.channels())
                .await
                .map_err(|e| SessionError::internal("menu", e))?;
            drop(handle);

            let mut menu = String::new();
            for channel in channels {
                let Some(span) = channel.span else {
                    continue;
                };
                let scnl = &channel.scnl;
                let _ = writeln!(
                    menu,
                    "{} {} {} {} {} {:.6} {:.6} i4",
                    command.seq,
                    scnl.station,
                    scnl.channel,
                    scnl.network,
                    scnl.location,
                    span.start(),
                    span.end()
                );
            }
            Ok(Response::text(&command.seq, menu))
        })
    }
}

/// Connection report; the first argument is an optional sort spec.
pub struct StatusHandler;

impl Handler for StatusHandler {
    fn grammar(&self) -> Grammar {
        Grammar::Bare
    }

    fn respond<'a>(
        &'a self,
        command: &'a Command,
        ctx: &'a HandlerContext<'a>,
    ) -> BoxFuture<'a, Result<Response, SessionError>> {
        Box::pin(async move {
            let sort = SortSpec::parse(command.arg(0).unwrap_or(""));
            Ok(Response::text(&command.seq, ctx.registry.report(sort)))
        })
    }
}

/// Raw or RSAM waveform query.
pub struct WaveHandler {
    grammar: Grammar,
}

impl WaveHandler {
    pub fn new(grammar: Grammar) -> Self {
        Self { grammar }
    }

    async fn run(&self, command: &Command, ctx: &HandlerContext<'_>) -> Result<Response, SessionError> {
        let Some(request) = QueryRequest::from_command(command) else {
            return Ok(Response::empty(&command.seq));
        };
        let started = Instant::now();
        let now = epoch_now();

        let handle = ctx.pool.checkout().await?;
        let store = handle.store();
        let engine = ctx.engine.clone();
        let job = request.clone();
        let result = tokio::task::spawn_blocking(move || engine.query(store.as_ref(), &job, now))
            .await
            .map_err(|e| QueryError::Cancelled(e.to_string()))
            .and_then(|inner| inner);
        drop(handle);

        let response = match result {
            Ok(chunks) => encode(command, &request, &chunks),
            Err(QueryError::Cancelled(message)) => {
                return Err(SessionError::internal("query", message));
            }
            Err(e) => {
                warn!(
                    "{} {} {:?} failed: {e}",
                    command.opcode, request.scnl, request.span
                );
                Response::empty(&command.seq)
            }
        };

        ctx.registry
            .record_query(ctx.remote, started.elapsed(), response.payload.len());
        if let Some(span) = ctx.engine.resolve(&request, now) {
            debug!(
                "{} {}: {:.3} - {:.3}, {} bytes",
                command.opcode,
                request.scnl,
                span.start(),
                span.end(),
                response.payload.len()
            );
        }
        Ok(response)
    }
}

fn encode(command: &Command, request: &QueryRequest, chunks: &[WaveformChunk]) -> Response {
    if !command.binary {
        let mut text = String::new();
        encode_text(chunks, &mut text);
        return Response::chunks(&command.seq, chunks.len(), text.into_bytes());
    }
    let mut payload = Vec::new();
    match encode_binary(chunks, &mut payload) {
        Ok(()) => Response::chunks(&command.seq, chunks.len(), payload),
        Err(e) => {
            warn!("{} {}: cannot encode result: {e}", command.opcode, request.scnl);
            Response::empty(&command.seq)
        }
    }
}

impl Handler for WaveHandler {
    fn grammar(&self) -> Grammar {
        self.grammar
    }

    fn respond<'a>(
        &'a self,
        command: &'a Command,
        ctx: &'a HandlerContext<'a>,
    ) -> BoxFuture<'a, Result<Response, SessionError>> {
        Box::pin(self.run(command, ctx))
    }
}
