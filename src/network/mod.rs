//! Network Module
//!
//! Blocking TCP server speaking HTTP/1.1.
//!
//! ## Architecture
//! - Single acceptor thread (non-blocking accept, polls the shutdown flag)
//! - One thread per connection, bounded by `max_connections`
//! - Requests routed through a shared `http::Service` onto the `Store`
//! - SIGINT/SIGTERM set the shutdown flag (`Server::shutdown_on_signal`)

mod connection;
mod server;

pub use connection::Connection;
pub use server::Server;
