//! Makes sure row 1 of a tab holds the schema's header before data is written
//!
//! A tab is checked at most once per process until invalidated. An empty
//! row 1 gets the header. A header that starts with the position column but
//! differs from the schema is rewritten in place. A row 1 that does not start
//! with the position column is data, so a header row is inserted above it.

use crate::api::StructuralRequest;
use crate::credentials::Connection;
use crate::error::Result;
use crate::range::A1Range;
use crate::resolver::ResolvedTab;
use crate::schema::{POSITION_HEADER, TableSchema};
use diagnostics::*;
use std::collections::HashSet;
use tokio::sync::RwLock;

/// What `ensure` had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderAction {
    AlreadyVerified,
    Matched,
    Written,
    Rewritten,
    Inserted,
}

#[derive(Default)]
pub struct HeaderGuard {
    verified: RwLock<HashSet<(String, String)>>,
}

impl HeaderGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_verified(&self, spreadsheet_id: &str, title: &str) -> bool {
        self.verified
            .read()
            .await
            .contains(&(spreadsheet_id.to_string(), title.to_string()))
    }

    pub async fn ensure(
        &self,
        conn: &Connection,
        spreadsheet_id: &str,
        tab: &ResolvedTab,
        schema: &TableSchema,
    ) -> Result<HeaderAction> {
        if self.is_verified(spreadsheet_id, &tab.title).await {
            return Ok(HeaderAction::AlreadyVerified);
        }

        let title = tab.title.as_str();
        let headers = schema.headers();
        let range = A1Range::rows(title, 0, headers.len() - 1, 0, Some(0)).to_string();
        let existing = conn
            .api
            .get_values(spreadsheet_id, &range)
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let action = if existing == headers {
            HeaderAction::Matched
        } else if existing.is_empty() {
            conn.api
                .update_values(spreadsheet_id, &range, vec![headers])
                .await?;
            info!("Header row written to {title}", title: title);
            HeaderAction::Written
        } else if existing.first().map(String::as_str) == Some(POSITION_HEADER) {
            conn.api
                .update_values(spreadsheet_id, &range, vec![headers])
                .await?;
            warn!("Header row of {title} did not match its schema and was rewritten", title: title);
            HeaderAction::Rewritten
        } else {
            conn.api
                .batch_structural_update(
                    spreadsheet_id,
                    vec![StructuralRequest::InsertRows {
                        tab_id: tab.tab_id,
                        start: 0,
                        end: 1,
                    }],
                )
                .await?;
            conn.api
                .update_values(spreadsheet_id, &range, vec![headers])
                .await?;
            warn!("Row 1 of {title} held data; header row inserted above it", title: title);
            HeaderAction::Inserted
        };

        _ = self
            .verified
            .write()
            .await
            .insert((spreadsheet_id.to_string(), tab.title.clone()));
        Ok(action)
    }

    /// Forget one tab, e.g. after it was renamed or deleted
    pub async fn invalidate(&self, spreadsheet_id: &str, title: &str) {
        _ = self
            .verified
            .write()
            .await
            .remove(&(spreadsheet_id.to_string(), title.to_string()));
    }

    pub async fn invalidate_spreadsheet(&self, spreadsheet_id: &str) {
        self.verified
            .write()
            .await
            .retain(|(id, _)| id != spreadsheet_id);
    }

    pub async fn clear(&self) {
        self.verified.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySheets;

    fn schema() -> TableSchema {
        TableSchema {
            fields: vec!["title".to_string()],
            chunked_fields: vec!["body".to_string()],
        }
    }

    fn tab() -> ResolvedTab {
        ResolvedTab {
            title: "Notes".to_string(),
            tab_id: 0,
        }
    }

    #[tokio::test]
    async fn test_writes_header_once() {
        let sheets = MemorySheets::new();
        sheets.add_spreadsheet("s", &["Notes"]);
        let conn = sheets.service_connection();
        let guard = HeaderGuard::new();

        let action = guard.ensure(&conn, "s", &tab(), &schema()).await.unwrap();
        assert_eq!(action, HeaderAction::Written);
        assert_eq!(
            sheets.rows("s", "Notes").unwrap(),
            vec![vec!["position", "title", "body"]]
        );

        let action = guard.ensure(&conn, "s", &tab(), &schema()).await.unwrap();
        assert_eq!(action, HeaderAction::AlreadyVerified);

        guard.invalidate("s", "Notes").await;
        let action = guard.ensure(&conn, "s", &tab(), &schema()).await.unwrap();
        assert_eq!(action, HeaderAction::Matched);
    }

    #[tokio::test]
    async fn test_data_in_row_one_is_kept() {
        let sheets = MemorySheets::new();
        sheets.add_spreadsheet("s", &["Notes"]);
        let conn = sheets.service_connection();
        conn.api
            .update_values("s", "Notes!A1", vec![vec!["1".to_string(), "hello".to_string()]])
            .await
            .unwrap();

        let guard = HeaderGuard::new();
        let action = guard.ensure(&conn, "s", &tab(), &schema()).await.unwrap();
        assert_eq!(action, HeaderAction::Inserted);
        let rows = sheets.rows("s", "Notes").unwrap();
        assert_eq!(rows[0], vec!["position", "title", "body"]);
        assert_eq!(rows[1], vec!["1", "hello"]);
    }

    #[tokio::test]
    async fn test_stale_header_is_rewritten() {
        let sheets = MemorySheets::new();
        sheets.add_spreadsheet("s", &["Notes"]);
        let conn = sheets.service_connection();
        conn.api
            .update_values("s", "Notes!A1", vec![vec!["position".to_string(), "name".to_string()]])
            .await
            .unwrap();

        let guard = HeaderGuard::new();
        let action = guard.ensure(&conn, "s", &tab(), &schema()).await.unwrap();
        assert_eq!(action, HeaderAction::Rewritten);
        assert!(guard.is_verified("s", "Notes").await);
        guard.invalidate_spreadsheet("s").await;
        assert!(!guard.is_verified("s", "Notes").await);
    }
}
