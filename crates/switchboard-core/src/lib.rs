//! # switchboard-core
//!
//! Foundation types shared by every Switchboard crate:
//!
//! - **Branded IDs**: [`ConnectionId`] as a newtype for type safety
//! - **Packets**: [`Packet`], the decoded `route` + `msg` + metadata frame
//! - **Route definitions**: [`RouteDefinition`], one declarative route table entry
//! - **Connection capability**: the [`Connection`] trait the transport implements
//! - **Errors**: the dispatch error taxonomy via `thiserror`

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod ids;
pub mod packet;
pub mod route;

pub use connection::{Connection, ConnectionRef, MemoryConnection, Metadata};
pub use errors::{
    ConfigurationError, ConnectionRejected, DispatchError, DuplicateConnection, HandlerError,
    MalformedMessageError, RoutingError, SendError,
};
pub use ids::ConnectionId;
pub use packet::Packet;
pub use route::RouteDefinition;
