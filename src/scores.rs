//! Subclan points lookup on the score sheet.
use std::sync::Arc;
use tracing::instrument;

use crate::sheet::{Sheet, StoreError};

#[derive(Clone)]
pub struct ScoreBoard {
    sheet: Arc<dyn Sheet>,
    points_col: u32,
}

impl ScoreBoard {
    pub fn new(sheet: Arc<dyn Sheet>, points_col: u32) -> Self {
        Self { sheet, points_col }
    }

    /// Points for `subclan` (case-insensitive, e.g. `m3`), read from the
    /// points column of the row where the subclan name appears.
    #[instrument(skip(self))]
    pub async fn points(&self, subclan: &str) -> Result<Option<String>, StoreError> {
        let subclan = subclan.trim().to_uppercase();
        if subclan.is_empty() {
            return Ok(None);
        }
        let Some(cell) = self.sheet.find_cell(&subclan).await? else {
            return Ok(None);
        };
        self.sheet.cell(cell.row, self.points_col).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::SqliteSheet;
    use sqlx::SqlitePool;

    #[tokio::test]
    async fn reads_points_from_subclan_row() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let sheet = SqliteSheet::new(pool, "Overall Day 3 Results");
        sheet.update_cell(1, 1, "Subclan").await.unwrap();
        sheet.update_cell(1, 7, "Total").await.unwrap();
        sheet.update_cell(2, 1, "M3").await.unwrap();
        sheet.update_cell(2, 7, "420").await.unwrap();
        sheet.update_cell(3, 1, "M4").await.unwrap();

        let board = ScoreBoard::new(Arc::new(sheet), 7);
        assert_eq!(board.points(" m3 ").await.unwrap().as_deref(), Some("420"));
        assert_eq!(board.points("M4").await.unwrap(), None);
        assert_eq!(board.points("Z9").await.unwrap(), None);
        assert_eq!(board.points("").await.unwrap(), None);
    }
}
