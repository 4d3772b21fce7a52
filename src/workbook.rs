//! Local, in-process spreadsheet backend.
//!
//! A [`LocalWorkbook`] holds a set of titled tabs with numeric ids and behaves
//! like the remote spreadsheet API from the repositories' point of view. When
//! opened with a path, every mutation is written back to disk as a
//! gzip-compressed bincode snapshot, so the workbook survives restarts.

use async_trait::async_trait;
use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fs::{File, create_dir_all};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::SheetError;
use crate::range::SheetRange;
use crate::sheet::{Rows, SheetClient};

/// One tab of the workbook.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Tab {
    pub id: u32,
    pub title: String,
    pub rows: Vec<Vec<String>>,
}

/// Serializable workbook contents.
#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct Workbook {
    pub tabs: Vec<Tab>,
    pub next_id: u32,
}

impl Workbook {
    fn ensure_tab(&mut self, title: &str) -> bool {
        if self.tabs.iter().any(|t| t.title == title) {
            return false;
        }
        self.tabs.push(Tab {
            id: self.next_id,
            title: title.to_string(),
            rows: Vec::new(),
        });
        self.next_id += 1;
        true
    }

    fn tab(&self, title: &str) -> Result<&Tab, SheetError> {
        self.tabs
            .iter()
            .find(|t| t.title == title)
            .ok_or_else(|| SheetError::UnknownSheet(title.to_string()))
    }

    fn tab_mut(&mut self, title: &str) -> Result<&mut Tab, SheetError> {
        self.tabs
            .iter_mut()
            .find(|t| t.title == title)
            .ok_or_else(|| SheetError::UnknownSheet(title.to_string()))
    }
}

/// Save a workbook snapshot to `path`.
///
/// # Errors
/// * Returns `SheetError::Persist` if the file cannot be created or written
pub fn save_workbook(book: &Workbook, path: &Path) -> Result<(), SheetError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }

    let file = File::create(path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = BufWriter::new(encoder);

    serialize_into(&mut writer, book)?;
    writer.flush()?;

    let encoder = writer
        .into_inner()
        .map_err(|e| SheetError::Persist(e.to_string()))?;
    encoder.finish()?;

    Ok(())
}

/// Load a workbook snapshot from `path`.
///
/// # Errors
/// * Returns `SheetError::Persist` if the file is missing or not a valid snapshot
pub fn load_workbook(path: &Path) -> Result<Workbook, SheetError> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut reader = BufReader::new(decoder);

    let book: Workbook = deserialize_from(&mut reader)?;
    Ok(book)
}

/// Spreadsheet backend living in this process.
///
/// Snapshots are written with blocking file I/O while the workbook lock is
/// held, so a write call does not return until its snapshot is on disk and
/// concurrent writes are applied one at a time. Each write stalls its runtime
/// worker for the length of one gzip+bincode save of the whole workbook.
pub struct LocalWorkbook {
    book: Mutex<Workbook>,
    path: Option<PathBuf>,
}

impl LocalWorkbook {
    /// Create a workbook kept only in memory, with the given tabs.
    pub fn in_memory(tabs: &[&str]) -> Self {
        let mut book = Workbook::default();
        for title in tabs {
            book.ensure_tab(title);
        }
        LocalWorkbook {
            book: Mutex::new(book),
            path: None,
        }
    }

    /// Open the workbook stored at `path`, creating it if it does not exist.
    /// Any of `tabs` missing from the snapshot are added.
    ///
    /// # Errors
    /// * Returns `SheetError::Persist` if an existing snapshot cannot be read
    ///   or the new one cannot be written
    pub fn open(path: impl Into<PathBuf>, tabs: &[&str]) -> Result<Self, SheetError> {
        let path = path.into();

        let mut book = if path.exists() {
            info!("Loading workbook from {}", path.display());
            load_workbook(&path)?
        } else {
            info!("Creating new workbook at {}", path.display());
            Workbook::default()
        };

        let mut changed = !path.exists();
        for title in tabs {
            changed |= book.ensure_tab(title);
        }
        if changed {
            save_workbook(&book, &path)?;
        }

        Ok(LocalWorkbook {
            book: Mutex::new(book),
            path: Some(path),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Workbook>, SheetError> {
        self.book
            .lock()
            .map_err(|_| SheetError::Persist("workbook lock poisoned".to_string()))
    }

    fn persist(&self, book: &Workbook) -> Result<(), SheetError> {
        match &self.path {
            Some(path) => save_workbook(book, path).inspect_err(|e| {
                error!("Failed to save workbook to {}: {e}", path.display());
            }),
            None => Ok(()),
        }
    }
}

fn trim_row(row: &mut Vec<String>) {
    while row.last().is_some_and(|c| c.is_empty()) {
        row.pop();
    }
}

fn span_len(start: usize, end: Option<usize>) -> usize {
    end.map_or(usize::MAX, |e| e + 1 - start)
}

#[async_trait]
impl SheetClient for LocalWorkbook {
    async fn fetch_range(&self, range: &str) -> Result<Rows, SheetError> {
        let range = SheetRange::parse(range)?;
        let book = self.lock()?;
        let tab = book.tab(&range.tab)?;

        let (r0, r1) = range.row_bounds();
        let (c0, c1) = range.col_bounds();

        let mut rows: Rows = tab
            .rows
            .iter()
            .skip(r0)
            .take(span_len(r0, r1))
            .map(|row| {
                let mut cells: Vec<String> =
                    row.iter().skip(c0).take(span_len(c0, c1)).cloned().collect();
                trim_row(&mut cells);
                cells
            })
            .collect();

        while rows.last().is_some_and(|r| r.is_empty()) {
            rows.pop();
        }

        debug!("fetch {range}: {} rows", rows.len());
        Ok(rows)
    }

    async fn append_rows(&self, range: &str, rows: Rows) -> Result<(), SheetError> {
        let range = SheetRange::parse(range)?;
        let (c0, _) = range.col_bounds();

        let mut book = self.lock()?;
        let tab = book.tab_mut(&range.tab)?;

        let tail = tab
            .rows
            .iter()
            .rposition(|r| r.iter().any(|c| !c.is_empty()))
            .map_or(0, |i| i + 1);
        tab.rows.truncate(tail);

        for values in rows {
            let mut row = vec![String::new(); c0];
            row.extend(values);
            trim_row(&mut row);
            tab.rows.push(row);
        }

        debug!("append {range}: tab now has {} rows", tab.rows.len());
        self.persist(&book)
    }

    async fn update_range(&self, range: &str, rows: Rows) -> Result<(), SheetError> {
        let parsed = SheetRange::parse(range)?;
        let (r0, r1) = parsed.row_bounds();
        let (c0, c1) = parsed.col_bounds();

        if let Some(r1) = r1 {
            if rows.len() > r1 + 1 - r0 {
                return Err(SheetError::InvalidRange(format!(
                    "{range}: {} rows do not fit",
                    rows.len()
                )));
            }
        }
        if let Some(c1) = c1 {
            if rows.iter().any(|r| r.len() > c1 + 1 - c0) {
                return Err(SheetError::InvalidRange(format!("{range}: too many columns")));
            }
        }

        let mut book = self.lock()?;
        let tab = book.tab_mut(&parsed.tab)?;

        // Rows of a bounded range that the payload does not cover are cleared too.
        let height = r1.map_or(rows.len(), |r1| r1 + 1 - r0);
        let mut payload = rows.into_iter();

        for idx in r0..r0 + height {
            let values = payload.next().unwrap_or_default();
            let width = c1.map_or(values.len(), |c1| c1 + 1 - c0);

            while tab.rows.len() <= idx {
                tab.rows.push(Vec::new());
            }
            let row = &mut tab.rows[idx];
            if row.len() < c0 + width {
                row.resize(c0 + width, String::new());
            }

            let mut values = values.into_iter();
            for cell in row.iter_mut().skip(c0).take(width) {
                *cell = values.next().unwrap_or_default();
            }
            trim_row(row);
        }

        debug!("update {parsed}: {height} rows written");
        self.persist(&book)
    }

    async fn sheet_id(&self, title: &str) -> Result<u32, SheetError> {
        let book = self.lock()?;
        Ok(book.tab(title)?.id)
    }

    async fn delete_rows(&self, sheet_id: u32, start: usize, end: usize) -> Result<(), SheetError> {
        if start >= end {
            return Err(SheetError::InvalidRange(format!("rows {start}..{end}")));
        }

        let mut book = self.lock()?;
        let tab = book
            .tabs
            .iter_mut()
            .find(|t| t.id == sheet_id)
            .ok_or(SheetError::UnknownSheetId(sheet_id))?;

        let len = tab.rows.len();
        tab.rows.drain(start.min(len)..end.min(len));

        debug!("delete rows {start}..{end} of sheet {sheet_id}");
        self.persist(&book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[tokio::test]
    async fn blank_tab_fetches_empty() {
        let book = LocalWorkbook::in_memory(&["Stories"]);
        assert!(book.fetch_range("Stories!A:L").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_tab_is_an_error() {
        let book = LocalWorkbook::in_memory(&["Stories"]);
        let err = book.fetch_range("Nope!A:B").await.unwrap_err();
        assert!(matches!(err, SheetError::UnknownSheet(t) if t == "Nope"));
    }

    #[tokio::test]
    async fn append_adds_rows_at_tail_without_dedup() {
        let book = LocalWorkbook::in_memory(&["Stories"]);
        book.append_rows("Stories!A:C", vec![row(&["title", "excerpt"])])
            .await
            .unwrap();
        book.append_rows("Stories!A:C", vec![row(&["A", "a"])]).await.unwrap();
        book.append_rows("Stories!A:C", vec![row(&["A", "a"])]).await.unwrap();

        let rows = book.fetch_range("Stories!A:C").await.unwrap();
        assert_eq!(rows, vec![row(&["title", "excerpt"]), row(&["A", "a"]), row(&["A", "a"])]);
    }

    #[tokio::test]
    async fn fetch_trims_trailing_blank_cells_and_respects_columns() {
        let book = LocalWorkbook::in_memory(&["Users"]);
        book.append_rows("Users!A:D", vec![row(&["u1", "bob", "", ""]), row(&["u2", "amy", "x"])])
            .await
            .unwrap();

        assert_eq!(
            book.fetch_range("Users!A:D").await.unwrap(),
            vec![row(&["u1", "bob"]), row(&["u2", "amy", "x"])]
        );
        assert_eq!(
            book.fetch_range("Users!A:A").await.unwrap(),
            vec![row(&["u1"]), row(&["u2"])]
        );
        assert_eq!(book.fetch_range("Users!B2:C2").await.unwrap(), vec![row(&["amy", "x"])]);
    }

    #[tokio::test]
    async fn update_overwrites_the_whole_target_row() {
        let book = LocalWorkbook::in_memory(&["Stories"]);
        book.append_rows("Stories!A:C", vec![row(&["h1", "h2", "h3"]), row(&["a", "b", "c"])])
            .await
            .unwrap();

        book.update_range("Stories!A2:C2", vec![row(&["z"])]).await.unwrap();

        assert_eq!(book.fetch_range("Stories!A2:C2").await.unwrap(), vec![row(&["z"])]);
        assert_eq!(book.fetch_range("Stories!A1:C1").await.unwrap(), vec![row(&["h1", "h2", "h3"])]);
    }

    #[tokio::test]
    async fn update_rejects_payload_wider_than_range() {
        let book = LocalWorkbook::in_memory(&["Stories"]);
        let err = book
            .update_range("Stories!A1:B1", vec![row(&["1", "2", "3"])])
            .await
            .unwrap_err();
        assert!(matches!(err, SheetError::InvalidRange(_)));
    }

    #[tokio::test]
    async fn delete_removes_rows_and_checks_sheet_id() {
        let book = LocalWorkbook::in_memory(&["Stories", "Users"]);
        book.append_rows("Users!A:A", vec![row(&["h"]), row(&["1"]), row(&["2"])])
            .await
            .unwrap();

        let users = book.sheet_id("Users").await.unwrap();
        assert_eq!(users, 1);
        book.delete_rows(users, 1, 2).await.unwrap();
        assert_eq!(
            book.fetch_range("Users!A:A").await.unwrap(),
            vec![row(&["h"]), row(&["2"])]
        );

        let err = book.delete_rows(42, 0, 1).await.unwrap_err();
        assert!(matches!(err, SheetError::UnknownSheetId(42)));
    }

    #[tokio::test]
    async fn workbook_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("cms.bin.gz");

        {
            let book = LocalWorkbook::open(&path, &["Stories"]).unwrap();
            book.append_rows("Stories!A:B", vec![row(&["title"]), row(&["Hello"])])
                .await
                .unwrap();
        }

        let book = LocalWorkbook::open(&path, &["Stories", "Users"]).unwrap();
        assert_eq!(
            book.fetch_range("Stories!A:B").await.unwrap(),
            vec![row(&["title"]), row(&["Hello"])]
        );
        assert_eq!(book.sheet_id("Users").await.unwrap(), 1);
    }
}
