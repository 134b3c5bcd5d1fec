//! Read-only view over the camp masterlist sheet.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::instrument;

use crate::model::{pad_id, StudentId};
use crate::sheet::{Sheet, StoreError};

pub const COL_STUDENT_ID: &str = "Student ID";
pub const COL_NAME: &str = "Matriculated Name";
pub const COL_TELEGRAM: &str = "Telegram Username";
pub const COL_ROLE: &str = "Role";

/// Name shown when an ID has no name on the masterlist.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Who a Telegram handle belongs to, per the masterlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub role: String,
}

#[derive(Clone)]
pub struct Masterlist {
    sheet: Arc<dyn Sheet>,
}

impl Masterlist {
    pub fn new(sheet: Arc<dyn Sheet>) -> Self {
        Self { sheet }
    }

    /// IDs from `ids` that are not on the masterlist, in submission order.
    #[instrument(skip_all, fields(count = ids.len()))]
    pub async fn unknown_ids(&self, ids: &[StudentId]) -> Result<Vec<String>, StoreError> {
        let known: HashSet<String> = self
            .sheet
            .column_values(1)
            .await?
            .iter()
            .filter(|v| !v.trim().is_empty())
            .map(|v| pad_id(v))
            .collect();
        Ok(ids
            .iter()
            .filter(|id| !known.contains(id.as_str()))
            .map(|id| id.to_string())
            .collect())
    }

    /// Names for `ids`, in order.
    #[instrument(skip_all, fields(count = ids.len()))]
    pub async fn names(&self, ids: &[StudentId]) -> Result<Vec<String>, StoreError> {
        let by_id: HashMap<String, String> = self
            .sheet
            .all_records()
            .await?
            .into_iter()
            .filter_map(|mut r| {
                let id = r.remove(COL_STUDENT_ID)?;
                let name = r.remove(COL_NAME).unwrap_or_default();
                Some((pad_id(&id), name))
            })
            .collect();
        Ok(ids
            .iter()
            .map(|id| match by_id.get(id.as_str()) {
                Some(name) if !name.is_empty() => name.clone(),
                _ => UNKNOWN_NAME.to_string(),
            })
            .collect())
    }

    /// Look up a Telegram username (without the leading `@`).
    #[instrument(skip_all)]
    pub async fn member(&self, username: &str) -> Result<Option<Member>, StoreError> {
        let handle = format!("@{}", username.trim_start_matches('@'));
        let member = self
            .sheet
            .all_records()
            .await?
            .into_iter()
            .find(|r| {
                r.get(COL_TELEGRAM)
                    .is_some_and(|h| h.trim().eq_ignore_ascii_case(&handle))
            })
            .map(|mut r| Member {
                name: r.remove(COL_NAME).unwrap_or_default(),
                role: r.remove(COL_ROLE).unwrap_or_default(),
            });
        Ok(member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::SqliteSheet;
    use sqlx::SqlitePool;

    async fn masterlist() -> Masterlist {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let sheet = SqliteSheet::new(pool, "Masterlist");
        let rows: Vec<Vec<String>> = [
            [COL_STUDENT_ID, COL_NAME, COL_TELEGRAM, COL_ROLE],
            ["12345", "Alice Tan", "@alice", "Freshman"],
            ["00054321", "Bob Lim", "@BobL", "Orientation Group Leader"],
            ["00099999", "", "", "Freshman"],
        ]
        .iter()
        .map(|r| r.iter().map(|s| s.to_string()).collect())
        .collect();
        sheet.replace_all(&rows).await.unwrap();
        Masterlist::new(Arc::new(sheet))
    }

    fn ids(raw: &[&str]) -> Vec<StudentId> {
        raw.iter().map(|s| StudentId::parse(s).unwrap()).collect()
    }

    #[tokio::test]
    async fn membership_pads_sheet_values() {
        let ml = masterlist().await;
        let unknown = ml
            .unknown_ids(&ids(&["00012345", "00054321", "01111111"]))
            .await
            .unwrap();
        assert_eq!(unknown, vec!["01111111".to_string()]);
    }

    #[tokio::test]
    async fn names_follow_submission_order() {
        let ml = masterlist().await;
        let names = ml
            .names(&ids(&["00054321", "00012345", "00099999"]))
            .await
            .unwrap();
        assert_eq!(names, vec!["Bob Lim", "Alice Tan", UNKNOWN_NAME]);
    }

    #[tokio::test]
    async fn member_lookup_by_handle() {
        let ml = masterlist().await;
        let bob = ml.member("bobl").await.unwrap().unwrap();
        assert_eq!(bob.name, "Bob Lim");
        assert_eq!(bob.role, "Orientation Group Leader");
        assert_eq!(ml.member("mallory").await.unwrap(), None);
    }
}
