//! The remote table API this crate consumes
//!
//! `SheetsApi` is the seam between the storage layer and the network. The
//! HTTP implementation lives in [`crate::http`]; [`crate::memory`] provides an
//! in-process one with the same semantics.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// One tab as listed by spreadsheet metadata
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    pub title: String,
    pub tab_id: i64,
    pub index: usize,
}

/// A range plus the values to write into it
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ValueRange {
    pub range: String,
    pub values: Vec<Vec<String>>,
}

impl ValueRange {
    pub fn new<S: Into<String>>(range: S, values: Vec<Vec<String>>) -> Self {
        Self {
            range: range.into(),
            values,
        }
    }
}

/// Tab-level structural operations, sent in batches.
///
/// Row indices are 0-based sheet rows (the header row is index 0) and
/// `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralRequest {
    InsertRows { tab_id: i64, start: usize, end: usize },
    DeleteRows { tab_id: i64, start: usize, end: usize },
    /// `destination` is expressed in row indices before the move
    MoveRows {
        tab_id: i64,
        start: usize,
        end: usize,
        destination: usize,
    },
    AddTab { title: String },
    RenameTab { tab_id: i64, title: String },
    DeleteTab { tab_id: i64 },
    ReindexTab { tab_id: i64, index: usize },
}

fn row_span(tab_id: i64, start: usize, end: usize) -> Value {
    json!({
        "sheetId": tab_id,
        "dimension": "ROWS",
        "startIndex": start,
        "endIndex": end,
    })
}

impl StructuralRequest {
    /// Wire form used by the spreadsheet batchUpdate endpoint
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            StructuralRequest::InsertRows { tab_id, start, end } => json!({
                "insertDimension": {
                    "range": row_span(*tab_id, *start, *end),
                    "inheritFromBefore": false,
                }
            }),
            StructuralRequest::DeleteRows { tab_id, start, end } => json!({
                "deleteDimension": { "range": row_span(*tab_id, *start, *end) }
            }),
            StructuralRequest::MoveRows {
                tab_id,
                start,
                end,
                destination,
            } => json!({
                "moveDimension": {
                    "source": row_span(*tab_id, *start, *end),
                    "destinationIndex": destination,
                }
            }),
            StructuralRequest::AddTab { title } => json!({
                "addSheet": { "properties": { "title": title } }
            }),
            StructuralRequest::RenameTab { tab_id, title } => json!({
                "updateSheetProperties": {
                    "properties": { "sheetId": tab_id, "title": title },
                    "fields": "title",
                }
            }),
            StructuralRequest::DeleteTab { tab_id } => json!({
                "deleteSheet": { "sheetId": tab_id }
            }),
            StructuralRequest::ReindexTab { tab_id, index } => json!({
                "updateSheetProperties": {
                    "properties": { "sheetId": tab_id, "index": index },
                    "fields": "index",
                }
            }),
        }
    }

    /// Whether the request changes the tab listing (as opposed to rows)
    #[must_use]
    pub fn touches_tabs(&self) -> bool {
        matches!(
            self,
            StructuralRequest::AddTab { .. }
                | StructuralRequest::RenameTab { .. }
                | StructuralRequest::DeleteTab { .. }
                | StructuralRequest::ReindexTab { .. }
        )
    }
}

/// Operations consumed from the spreadsheet service.
///
/// Every method addresses one spreadsheet by id. Value matrices are
/// row-major; reads omit trailing empty cells and rows the way the remote
/// service does.
#[async_trait]
pub trait SheetsApi: Send + Sync {
    async fn get_spreadsheet_metadata(&self, spreadsheet_id: &str) -> Result<Vec<TabInfo>>;

    async fn get_values(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>>;

    async fn update_values(&self, spreadsheet_id: &str, range: &str, values: Vec<Vec<String>>) -> Result<()>;

    async fn append_values(&self, spreadsheet_id: &str, range: &str, values: Vec<Vec<String>>) -> Result<()>;

    /// Several value writes in one call
    async fn batch_update_values(&self, spreadsheet_id: &str, data: Vec<ValueRange>) -> Result<()>;

    /// Structural requests applied in order in one call
    async fn batch_structural_update(&self, spreadsheet_id: &str, requests: Vec<StructuralRequest>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_rows_wire_form() {
        let req = StructuralRequest::MoveRows {
            tab_id: 7,
            start: 1,
            end: 2,
            destination: 4,
        };
        assert_eq!(
            req.to_json(),
            json!({
                "moveDimension": {
                    "source": {
                        "sheetId": 7,
                        "dimension": "ROWS",
                        "startIndex": 1,
                        "endIndex": 2,
                    },
                    "destinationIndex": 4,
                }
            })
        );
        assert!(!req.touches_tabs());
    }

    #[test]
    fn test_reindex_wire_form() {
        let req = StructuralRequest::ReindexTab { tab_id: 3, index: 0 };
        assert_eq!(
            req.to_json()["updateSheetProperties"]["fields"],
            json!("index")
        );
        assert!(req.touches_tabs());
    }
}
