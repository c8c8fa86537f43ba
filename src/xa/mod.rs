//! XA transaction identity and the transaction registry (`spec.md` §3, §4.2).

pub mod flags;
mod registry;
mod state;
mod xid;

pub use registry::{RegisterOutcome, XaStartTimeout, XaTransactionRegistry};
pub use state::{TxContext, TxState};
pub use xid::{WireXid, XidKey};
