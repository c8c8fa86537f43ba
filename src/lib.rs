//! OJP: a transparent RPC proxy fronting relational databases.
//!
//! Three subsystems, one process: server-side session/connection lifecycle
//! (`session`, `pool`), the XA transaction registry (`xa`), and multinode
//! client-side coordination (`client`). `service` wires them into the
//! per-operation handlers the transport layer dispatches into; concrete SQL
//! execution against a real database is a collaborator behind
//! `service::BackendDriver`, not something this crate implements itself.

pub mod client;
pub mod cluster;
pub mod common;
pub mod config;
pub mod error;
pub mod pool;
pub mod service;
pub mod session;
pub mod streaming;
pub mod xa;

pub use error::{OjpError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
