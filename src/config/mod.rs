//! Connection hashing and layered Datasource/XA configuration (`spec.md`
//! §3, §6).

pub mod conn_hash;
pub mod datasource;
pub mod loader;

pub use conn_hash::{compute_conn_hash, ConnIdentity};
pub use datasource::{parse_isolation_or_default, DatasourceConfig, XaDatasourceConfig};
pub use loader::{ConfigLoader, OjpConfig, PropertiesFile, SystemProperties};
