//! Multi-node client-side coordination (`spec.md` §4.7).

pub mod connection_manager;

pub use connection_manager::{
    ClosurePlan, ConnectionManager, ConnectionManagerConfig, HealthProbe, ServerEndpoint,
};
