//! Backend connection pooling: `BackendSession`, the XA pool SPI, the
//! default CommonsPool2-style provider, and shared housekeeping
//! (`spec.md` §4.3).

mod backend_session;
mod commons_pool2;
mod housekeeping;
mod spi;

pub use backend_session::{pool_exhausted, BackendConnection, BackendSession, XaResourceHandle};
pub use commons_pool2::{BackendSessionFactory, CommonsPool2Pool, CommonsPool2Provider};
pub use housekeeping::HousekeepingExecutor;
pub use spi::{ManagedPool, PoolConfig, PoolHandle, PoolStatistics, ProviderRegistry, XaConnectionPoolProvider};
