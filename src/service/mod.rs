//! Server-side session lifecycle and action handlers (`spec.md` §4.4, §4.5,
//! §6, §9).

pub mod statement_service;
pub mod wire;

pub use statement_service::{BackendDriver, Server, SlotManagerConfig};
