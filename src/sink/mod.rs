//! Results sink — where finished answer sets go.

pub mod sheets;

use async_trait::async_trait;

use crate::error::SinkError;

/// External sink for collected answers. The engine writes one ordered row
/// per completed session; incremental per-item cell writes are an optional
/// optimization on top.
#[async_trait]
pub trait ResultsSink: Send + Sync {
    /// Append one finished row of values.
    async fn append_row(&self, values: &[String]) -> Result<(), SinkError>;

    /// Open a row seeded with the given values and return its row number,
    /// for later per-cell writes.
    async fn open_row(&self, seed: &[String]) -> Result<i64, SinkError>;

    /// Write one item's values into its cell of an opened row.
    async fn write_cell(&self, row: i64, index: usize, values: &[String]) -> Result<(), SinkError>;
}

pub use sheets::SheetsSink;
