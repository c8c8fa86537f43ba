//! Block-wise result-set streaming with LOB externalization (`spec.md`
//! §4.5).
//!
//! Grounded on the teacher's streaming query-result machinery (row batches
//! sent as they're produced rather than materialized) combined with
//! `service::wire::OpResult` as the block envelope. `sqlparser`/backend
//! driver integration is a collaborator per `spec.md` §1, so this module
//! takes an already-materialized `Row` sequence rather than executing SQL
//! itself.

use futures::Stream;
use futures::StreamExt;

use crate::session::registry::{LobHandle, SessionObjectRegistry};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum CellValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    /// A BLOB/CLOB/binary column externalized as a handle, delivered via the
    /// separate LOB stream (`spec.md` §4.5).
    LobRef(LobHandle),
}

pub type Row = Vec<CellValue>;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResultBlock {
    /// Present only on the first block.
    pub columns: Option<Vec<ColumnDescriptor>>,
    pub rows: Vec<Row>,
    pub is_final: bool,
}

/// How many rows to pack per block. Backends whose drivers stream LOBs
/// row-by-row force `rows_per_block` down to 1 (`spec.md` §4.5: "the
/// implementation switches to one-row-per-block mode").
pub struct BlockingPolicy {
    pub rows_per_block: usize,
    pub lob_streamed_row_by_row: bool,
}

impl BlockingPolicy {
    pub fn effective_rows_per_block(&self) -> usize {
        if self.lob_streamed_row_by_row {
            1
        } else {
            self.rows_per_block.max(1)
        }
    }
}

/// A column value the backend driver produced, prior to LOB externalization.
pub enum RawCellValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Lob(Vec<u8>),
}

pub type RawRow = Vec<RawCellValue>;

fn externalize_row(raw: RawRow, registry: &SessionObjectRegistry) -> Row {
    raw.into_iter()
        .map(|cell| match cell {
            RawCellValue::Null => CellValue::Null,
            RawCellValue::Int(v) => CellValue::Int(v),
            RawCellValue::Float(v) => CellValue::Float(v),
            RawCellValue::Text(v) => CellValue::Text(v),
            RawCellValue::Bool(v) => CellValue::Bool(v),
            RawCellValue::Lob(bytes) => CellValue::LobRef(registry.register_lob(bytes)),
        })
        .collect()
}

/// Adapts a stream of backend rows into a stream of `ResultBlock`s: columns
/// are described once in the first block, each subsequent block carries up
/// to `policy.effective_rows_per_block()` rows, and LOB columns are
/// externalized into `registry` as they're packed.
pub fn stream_result_blocks<'a, S>(
    rows: S,
    columns: Vec<ColumnDescriptor>,
    policy: BlockingPolicy,
    registry: &'a SessionObjectRegistry,
) -> impl Stream<Item = ResultBlock> + 'a
where
    S: Stream<Item = RawRow> + 'a,
{
    let block_size = policy.effective_rows_per_block();
    let mut first_block = true;

    rows.map(move |raw_row| externalize_row(raw_row, registry))
        .chunks(block_size)
        .map(move |rows| {
            let columns_for_block = if first_block {
                first_block = false;
                Some(columns.clone())
            } else {
                None
            };
            ResultBlock {
                columns: columns_for_block,
                rows,
                is_final: false,
            }
        })
}
