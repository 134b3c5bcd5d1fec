//! Spreadsheet-shaped roster store.
//!
//! Sheets are addressed like a spreadsheet: 1-based rows and columns, text
//! values, empty cells absent. `Sheet` is the seam the ledger and lookups are
//! written against; `SqliteSheet` keeps the cells in the `cells` table.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("backing store unavailable: {0}")]
    Backend(String),
}

/// Location of a cell on a sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

/// Column layout of the attendance sheets.
///
/// Registration rows only use `id`; check-in/out rows use all columns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Layout {
    /// First row appended IDs may land on; rows above it are left to headers.
    pub start_row: u32,
    pub id: u32,
    pub checkout_time: u32,
    pub expected_return: u32,
    pub reason: u32,
    pub late_sign_in: u32,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            start_row: 1,
            id: 2,
            checkout_time: 12,
            expected_return: 14,
            reason: 15,
            late_sign_in: 17,
        }
    }
}

impl Layout {
    pub fn is_valid(&self) -> bool {
        let cols = [
            self.id,
            self.checkout_time,
            self.expected_return,
            self.reason,
            self.late_sign_in,
        ];
        if self.start_row == 0 || cols.contains(&0) {
            return false;
        }
        let mut sorted = cols;
        sorted.sort_unstable();
        sorted.windows(2).all(|w| w[0] != w[1])
    }

    /// Row the next appended ID lands on, given how many values the ID column
    /// holds from row 1: directly below the last one, never above `start_row`.
    pub fn next_row(&self, existing: usize) -> u32 {
        let below_last = u32::try_from(existing).unwrap_or(u32::MAX).saturating_add(1);
        below_last.max(self.start_row)
    }
}

#[async_trait]
pub trait Sheet: Send + Sync {
    fn title(&self) -> &str;

    /// Values of column `col` from row 1 down to its last non-empty cell.
    /// Empty cells in between come back as empty strings.
    async fn column_values(&self, col: u32) -> Result<Vec<String>, StoreError>;

    /// First cell (row-major) whose value equals `value`.
    async fn find_cell(&self, value: &str) -> Result<Option<CellRef>, StoreError>;

    async fn cell(&self, row: u32, col: u32) -> Result<Option<String>, StoreError>;

    async fn update_cell(&self, row: u32, col: u32, value: &str) -> Result<(), StoreError>;

    /// Write several cells of one row; either all of them land or none do.
    async fn write_row(&self, row: u32, cells: &[(u32, String)]) -> Result<(), StoreError>;

    /// Every row from 1 to the last non-empty one, padded to the widest row.
    async fn rows(&self) -> Result<Vec<Vec<String>>, StoreError>;

    /// Rows after the header keyed by header text, skipping blank rows.
    async fn all_records(&self) -> Result<Vec<HashMap<String, String>>, StoreError> {
        let rows = self.rows().await?;
        let Some((header, body)) = rows.split_first() else {
            return Ok(Vec::new());
        };
        Ok(body
            .iter()
            .filter(|r| r.iter().any(|v| !v.is_empty()))
            .map(|r| {
                header
                    .iter()
                    .zip(r.iter())
                    .filter(|(h, _)| !h.is_empty())
                    .map(|(h, v)| (h.clone(), v.clone()))
                    .collect()
            })
            .collect())
    }
}

/// A named sheet stored in the `cells` table.
#[derive(Debug, Clone)]
pub struct SqliteSheet {
    pool: SqlitePool,
    name: String,
}

impl SqliteSheet {
    pub fn new(pool: SqlitePool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
        }
    }

    /// Replace the whole sheet with `rows` (row 1 first).
    #[instrument(skip_all, fields(sheet = %self.name))]
    pub async fn replace_all(&self, rows: &[Vec<String>]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM cells WHERE sheet = ?")
            .bind(&self.name)
            .execute(&mut *tx)
            .await?;
        let mut written = 0;
        for (r, values) in rows.iter().enumerate() {
            for (c, value) in values.iter().enumerate() {
                if value.is_empty() {
                    continue;
                }
                sqlx::query("INSERT INTO cells (sheet, row, col, value) VALUES (?, ?, ?, ?)")
                    .bind(&self.name)
                    .bind(r as i64 + 1)
                    .bind(c as i64 + 1)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
                written += 1;
            }
        }
        tx.commit().await?;
        Ok(written)
    }
}

const UPSERT_CELL: &str = "INSERT INTO cells (sheet, row, col, value) VALUES (?, ?, ?, ?) \
     ON CONFLICT(sheet, row, col) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP";

#[async_trait]
impl Sheet for SqliteSheet {
    fn title(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(sheet = %self.name, col))]
    async fn column_values(&self, col: u32) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT row, value FROM cells WHERE sheet = ? AND col = ? AND value <> '' ORDER BY row",
        )
        .bind(&self.name)
        .bind(i64::from(col))
        .fetch_all(&self.pool)
        .await?;

        let mut values = Vec::new();
        for row in rows {
            let r: i64 = row.get("row");
            let v: String = row.get("value");
            let idx = (r - 1) as usize;
            if values.len() < idx {
                values.resize(idx, String::new());
            }
            values.push(v);
        }
        Ok(values)
    }

    #[instrument(skip_all, fields(sheet = %self.name))]
    async fn find_cell(&self, value: &str) -> Result<Option<CellRef>, StoreError> {
        let row = sqlx::query(
            "SELECT row, col FROM cells WHERE sheet = ? AND value = ? ORDER BY row, col LIMIT 1",
        )
        .bind(&self.name)
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| CellRef {
            row: r.get::<i64, _>("row") as u32,
            col: r.get::<i64, _>("col") as u32,
        }))
    }

    async fn cell(&self, row: u32, col: u32) -> Result<Option<String>, StoreError> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM cells WHERE sheet = ? AND row = ? AND col = ?",
        )
        .bind(&self.name)
        .bind(i64::from(row))
        .bind(i64::from(col))
        .fetch_optional(&self.pool)
        .await?;
        Ok(value.filter(|v| !v.is_empty()))
    }

    #[instrument(skip_all, fields(sheet = %self.name, row, col))]
    async fn update_cell(&self, row: u32, col: u32, value: &str) -> Result<(), StoreError> {
        sqlx::query(UPSERT_CELL)
            .bind(&self.name)
            .bind(i64::from(row))
            .bind(i64::from(col))
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(sheet = %self.name, row))]
    async fn write_row(&self, row: u32, cells: &[(u32, String)]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (col, value) in cells {
            sqlx::query(UPSERT_CELL)
                .bind(&self.name)
                .bind(i64::from(row))
                .bind(i64::from(*col))
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn rows(&self) -> Result<Vec<Vec<String>>, StoreError> {
        let cells = sqlx::query(
            "SELECT row, col, value FROM cells WHERE sheet = ? AND value <> '' ORDER BY row, col",
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await?;

        let mut grid: BTreeMap<u32, BTreeMap<u32, String>> = BTreeMap::new();
        let mut width = 0;
        for c in cells {
            let r = c.get::<i64, _>("row") as u32;
            let col = c.get::<i64, _>("col") as u32;
            width = width.max(col);
            grid.entry(r).or_default().insert(col, c.get("value"));
        }
        let height = grid.keys().next_back().copied().unwrap_or(0);

        let mut rows = Vec::with_capacity(height as usize);
        for r in 1..=height {
            let mut values = vec![String::new(); width as usize];
            if let Some(cols) = grid.remove(&r) {
                for (c, v) in cols {
                    values[(c - 1) as usize] = v;
                }
            }
            rows.push(values);
        }
        Ok(rows)
    }
}
