//! Result-set streaming (`spec.md` §4.5).

pub mod result_stream;

pub use result_stream::{
    stream_result_blocks, BlockingPolicy, CellValue, ColumnDescriptor, RawCellValue, RawRow, ResultBlock, Row,
};
