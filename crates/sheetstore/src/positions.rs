//! Upkeep of the position column
//!
//! Column A of every data row holds that row's 1-based position. Appends,
//! deletes and moves change row order, and a renumber pass then rewrites the
//! whole column in ordered batches. A failed pass is not rolled back; running
//! it again converges.

use crate::api::{StructuralRequest, ValueRange};
use crate::credentials::Connection;
use crate::error::{Result, SheetError};
use crate::range::A1Range;
use diagnostics::*;

/// 0-based sheet row holding the record at 1-based `position` (row 0 is the header)
#[must_use]
pub fn sheet_row(position: usize) -> usize {
    position
}

/// Outcome of a completed renumber pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenumberReport {
    pub rows: usize,
    pub batches: usize,
}

/// Position cell updates for `count` data rows
#[must_use]
pub fn position_updates(title: &str, count: usize) -> Vec<ValueRange> {
    (1..=count)
        .map(|position| {
            ValueRange::new(
                A1Range::cell(title, 0, sheet_row(position)).to_string(),
                vec![vec![position.to_string()]],
            )
        })
        .collect()
}

/// Rewrite the position column of the first `count` data rows of `title`
pub async fn renumber(
    conn: &Connection,
    spreadsheet_id: &str,
    title: &str,
    count: usize,
    batch_size: usize,
) -> Result<RenumberReport> {
    let updates = position_updates(title, count);
    let total = updates.len().div_ceil(batch_size.max(1));
    let mut report = RenumberReport {
        rows: count,
        batches: 0,
    };

    for (n, batch) in updates.chunks(batch_size.max(1)).enumerate() {
        let size = batch.len();
        debug!("Renumber {title}: batch {n} of {total} ({size} rows)", title: title, n: n, total: total, size: size);
        if let Err(e) = conn
            .api
            .batch_update_values(spreadsheet_id, batch.to_vec())
            .await
        {
            let done = report.batches;
            let error_msg = e.to_string();
            warn!("Renumber of {title} stopped after {done} of {total} batches: {error_msg}", title: title, done: done, total: total, error_msg: error_msg);
            return Err(SheetError::incomplete(
                format!("renumber of '{title}' after {done} of {total} batches"),
                e,
            ));
        }
        report.batches += 1;
    }
    Ok(report)
}

/// Move request taking the record at `from` to position `to`.
///
/// The remote API takes the destination as a row index before the move, so
/// moving down targets the row after `to`.
#[must_use]
pub fn move_request(tab_id: i64, from: usize, to: usize) -> StructuralRequest {
    let start = sheet_row(from);
    let destination = if to > from {
        sheet_row(to) + 1
    } else {
        sheet_row(to)
    };
    StructuralRequest::MoveRows {
        tab_id,
        start,
        end: start + 1,
        destination,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteErrorKind;
    use crate::memory::MemorySheets;

    fn column_a(sheets: &MemorySheets) -> Vec<String> {
        sheets
            .rows("s", "T")
            .unwrap()
            .into_iter()
            .skip(1)
            .map(|r| r.first().cloned().unwrap_or_default())
            .collect()
    }

    #[tokio::test]
    async fn test_batches_are_capped() {
        let sheets = MemorySheets::new();
        sheets.add_spreadsheet("s", &["T"]);
        let conn = sheets.service_connection();

        let report = renumber(&conn, "s", "T", 250, 100).await.unwrap();
        assert_eq!(report, RenumberReport { rows: 250, batches: 3 });
        assert_eq!(sheets.batch_sizes(), vec![100, 100, 50]);

        let column = column_a(&sheets);
        assert_eq!(column.len(), 250);
        assert_eq!(column[0], "1");
        assert_eq!(column[249], "250");
    }

    #[tokio::test]
    async fn test_empty_table_sends_nothing() {
        let sheets = MemorySheets::new();
        sheets.add_spreadsheet("s", &["T"]);
        let report = renumber(&sheets.service_connection(), "s", "T", 0, 100)
            .await
            .unwrap();
        assert_eq!(report.batches, 0);
        assert_eq!(sheets.value_batch_calls(), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_then_retry_converges() {
        let sheets = MemorySheets::new();
        sheets.add_spreadsheet("s", &["T"]);
        let conn = sheets.service_connection();

        sheets.fail_value_batches_after(Some(1));
        let err = renumber(&conn, "s", "T", 150, 100).await.unwrap_err();
        assert!(matches!(err, SheetError::Incomplete { .. }));
        assert!(err.is_retryable());
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::RateLimited));
        assert!(err.to_string().contains("after 1 of 2 batches"));
        assert_eq!(column_a(&sheets).len(), 100);

        sheets.fail_value_batches_after(None);
        renumber(&conn, "s", "T", 150, 100).await.unwrap();
        let column = column_a(&sheets);
        assert_eq!(column.len(), 150);
        assert!(column.iter().enumerate().all(|(i, p)| *p == (i + 1).to_string()));
    }

    #[test]
    fn test_move_request_destination() {
        assert_eq!(
            move_request(7, 1, 3),
            StructuralRequest::MoveRows {
                tab_id: 7,
                start: 1,
                end: 2,
                destination: 4
            }
        );
        assert_eq!(
            move_request(7, 3, 1),
            StructuralRequest::MoveRows {
                tab_id: 7,
                start: 3,
                end: 4,
                destination: 1
            }
        );
    }
}
