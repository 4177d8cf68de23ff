//! An embeddable HTTP/2 server engine.
//!
//! Trellis bundles the three pieces a server embedding HTTP needs and nothing
//! else: an HTTP/2 protocol engine (framing, HPACK header compression, stream
//! multiplexing and flow control), a pattern based request router with
//! inherited route trees, and a session backed authorization service the
//! router consults.
//!
//! The protocol engine is byte driven. Feed it transport bytes with
//! [`Connection::on_bytes`], pull decoded requests out with
//! [`Connection::poll_event`], hand responses back with
//! [`Connection::write_response`] and flush whatever the engine wants to put
//! on the wire with [`Connection::take_output`]. Because no I/O happens
//! inside the engine it can be driven from any event loop; the [`server`]
//! module provides a ready made [tokio] driver for `AsyncRead + AsyncWrite`
//! transports.
//!
//! Routing and authorization are configured up front: build [`Route`]s
//! (optionally inheriting from a parent route), attach conditions, updates
//! and a target rule, then finalize them into a [`Host`]. At request time the
//! router picks the first matching route, runs its operations and binds a
//! [`Handler`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use trellis::route::{Host, Route};
//!
//! let mut host = Host::new("example.com", 443);
//! let mut route = Route::new();
//! route.set_pattern("^/users/{id=[0-9]+}/profile", 0);
//! route.set_methods("GET, POST");
//! route.set_target("run", "users/${id}").unwrap();
//! route.finalize();
//! host.add_route(route);
//! let host = Arc::new(host);
//! # drop(host);
//! ```
//!
//! [tokio]: https://docs.rs/tokio

#![deny(missing_debug_implementations)]
#![allow(clippy::len_without_is_empty)]

mod frame;

pub mod auth;
mod codec;
mod error;
mod hpack;
mod proto;
pub mod request;
pub mod route;
pub mod server;

pub use crate::error::Error;
pub use crate::frame::{Reason, StreamId};
pub use crate::proto::{Config, Connection, Event, ResponseUnit};
pub use crate::request::{Handler, RequestCtx, RouteAction};
pub use crate::route::{Host, Route};
