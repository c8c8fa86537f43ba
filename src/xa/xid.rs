//! `XidKey`: the immutable, value-equal key for XA transaction branches.
//!
//! Grounded on the teacher's `ParticipantNode` in `transaction/distributed.rs`
//! (a `#[repr(C)] #[repr(align(64))]` value type used as a hash-map key) —
//! same shape of problem, a small POD used heavily as a map key, but without
//! the cache-line alignment attribute: `XidKey` is looked up through a
//! `DashMap`, not iterated in a hot numeric loop, so the alignment tuning the
//! teacher applies there would be cargo-culted here.

use std::fmt;

/// `{ formatId, gtrid, bqual }` per `spec.md` §3. `PartialEq`/`Eq`/`Hash` are
/// derived, which is correct here because `Vec<u8>` compares and hashes by
/// value, not identity — `spec.md` §8 requires this to hold "regardless of
/// byte-array identity."
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct XidKey {
    pub format_id: i32,
    pub gtrid: Vec<u8>,
    pub bqual: Vec<u8>,
}

impl XidKey {
    pub fn new(format_id: i32, gtrid: Vec<u8>, bqual: Vec<u8>) -> Self {
        Self {
            format_id,
            gtrid,
            bqual,
        }
    }

    /// Wire encoding per `spec.md` §6: `{ formatId: int32, globalTransactionId:
    /// bytes, branchQualifier: bytes }`.
    pub fn to_wire(&self) -> WireXid {
        WireXid {
            format_id: self.format_id,
            global_transaction_id: self.gtrid.clone(),
            branch_qualifier: self.bqual.clone(),
        }
    }

    pub fn from_wire(wire: &WireXid) -> Self {
        Self {
            format_id: wire.format_id,
            gtrid: wire.global_transaction_id.clone(),
            bqual: wire.branch_qualifier.clone(),
        }
    }
}

impl fmt::Display for XidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Xid(fmt={}, gtrid={}, bqual={})",
            self.format_id,
            hex_preview(&self.gtrid),
            hex_preview(&self.bqual)
        )
    }
}

fn hex_preview(bytes: &[u8]) -> String {
    bytes.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// The wire-level Xid shape from `spec.md` §6.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WireXid {
    pub format_id: i32,
    pub global_transaction_id: Vec<u8>,
    pub branch_qualifier: Vec<u8>,
}
