//! The seam between the repositories and whatever spreadsheet backs them.

use async_trait::async_trait;

use crate::error::SheetError;

/// Rows of string cells, as exchanged with a spreadsheet.
pub type Rows = Vec<Vec<String>>;

/// Thin wrapper over the four remote spreadsheet operations plus the tab id
/// lookup needed for row deletion.
///
/// Every call is a single attempt. Implementations never retry and never
/// batch; a failure is reported straight back to the caller.
#[async_trait]
pub trait SheetClient: Send + Sync {
    /// Read the values in `range`.
    ///
    /// A range holding no values yields an empty vector rather than an error.
    /// Trailing empty cells and rows are not returned.
    async fn fetch_range(&self, range: &str) -> Result<Rows, SheetError>;

    /// Append `rows` as new rows after the last non-empty row of the range's tab.
    ///
    /// There is no deduplication: appending the same payload twice creates two rows.
    async fn append_rows(&self, range: &str, rows: Rows) -> Result<(), SheetError>;

    /// Overwrite `range` with `rows`. Callers must supply complete rows; cells
    /// of the range that are not supplied do not keep their old values.
    async fn update_range(&self, range: &str, rows: Rows) -> Result<(), SheetError>;

    /// Resolve the numeric id of the tab titled `title`.
    async fn sheet_id(&self, title: &str) -> Result<u32, SheetError>;

    /// Delete rows `[start, end)` (zero-based) of the tab with id `sheet_id`.
    async fn delete_rows(&self, sheet_id: u32, start: usize, end: usize) -> Result<(), SheetError>;
}
