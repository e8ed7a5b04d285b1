//! seiswave-serve - network surface for the seiswave core
//!
//! This crate provides:
//! - Line-oriented TCP server with one task per connection
//! - Opcode dispatch and the standard request handlers
//! - Bounded pool of backend store handles
//! - Connection statistics, served by STATUS and `GET /status`

pub mod dispatch;
pub mod http;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stats;

pub use dispatch::{DispatchBuilder, DispatchRegistry, Handler, HandlerContext, PROTOCOL_VERSION};
pub use pool::{PoolError, StoreHandle, StorePool};
pub use protocol::{ProtocolError, Response, ResponseHeader, decode_response, read_response};
pub use server::{ServerConfig, ServerError, ServerState, WaveServer};
pub use session::{SessionError, serve_connection};
pub use stats::{ConnectionRegistry, ConnectionSnapshot, ProtocolKind, RegistryTotals, SortSpec};

pub use seiswave::{QueryConfig, QueryEngine};
