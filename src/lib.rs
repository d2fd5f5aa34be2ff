//! # ponche-gateway
//!
//! Request/response gateway between the Ponche HTTP backend and its
//! data-layer process.
//!
//! Requests and responses travel as length-prefixed frames over a pair of
//! byte streams. Each request carries a correlation id; the data layer
//! echoes it, and the gateway routes every response to the caller that is
//! waiting for it, in whatever order responses arrive.
//!
//! ## Architecture
//!
//! - **Control Plane** (stdout): one JSON `$ready` line from the data layer
//! - **Data Plane** (socket): framed MsgPack or JSON records
//!
//! ```text
//! HTTP handler ─► QueryGateway::submit ─► PendingTable::register
//!                        │                         ▲
//!                        ▼                         │ resolve
//!                  FramedWriter ──► socket ──► data layer
//!                                                  │
//!                  Dispatcher ◄── FramedReader ◄───┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use ponche_gateway::{DataLayerClient, QueryGateway, TransportBootstrap};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let established = TransportBootstrap::with_generated_path()
//!         .spawn_peer(tokio::process::Command::new("./data_layer"))
//!         .establish()
//!         .await?;
//!
//!     let gateway = QueryGateway::builder().start(established.transport);
//!     let client = DataLayerClient::new(gateway);
//!
//!     let candidate = client.get_next_candidate("1").await?;
//!     println!("{}", candidate.name);
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod codec;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod methods;
pub mod pending;
pub mod protocol;
pub mod responder;
pub mod transport;

pub use config::GatewayConfig;
pub use dispatcher::DispatcherState;
pub use error::{BootstrapError, ChannelError, HandlerError, QueryError, TableError};
pub use gateway::{GatewayBuilder, PendingQuery, QueryGateway, Response};
pub use methods::{DataLayerClient, DataMethod};
pub use protocol::CorrelationId;
pub use responder::{RequestContext, Responder};
pub use transport::{Transport, TransportBootstrap};
