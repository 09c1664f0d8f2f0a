//! Dated tabs and tab ordering
//!
//! Tabs named after a month, like "JAN 25", are kept most recent first,
//! after an optional pinned tab and before everything else.

use crate::api::{StructuralRequest, TabInfo};
use crate::credentials::Connection;
use crate::error::{Result, SheetError};
use crate::metadata_cache::MetadataCache;
use crate::resolver::normalize;
use chrono::{Datelike, NaiveDate};
use diagnostics::*;
use regex::Regex;
use std::sync::LazyLock;

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Two-digit years below this are 20xx, the rest 19xx
const YEAR_PIVOT: i32 = 50;

static DATED_TITLE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z]{3})[\s\-_']*(\d{2})\s*$").ok());

/// Sort key of a dated tab; later months compare greater
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderKey {
    pub year: i32,
    /// 1 through 12
    pub month: u32,
}

/// Order key of a title like "JAN 25", `None` when the title is not dated
#[must_use]
pub fn parse_order_key(title: &str) -> Option<OrderKey> {
    let pattern = DATED_TITLE.as_ref()?;
    let caps = pattern.captures(title)?;
    let abbrev = caps.get(1)?.as_str().to_ascii_uppercase();
    let month = MONTHS.iter().position(|m| *m == abbrev)?;
    let yy: i32 = caps.get(2)?.as_str().parse().ok()?;
    let year = if yy < YEAR_PIVOT { 2000 + yy } else { 1900 + yy };
    Some(OrderKey {
        year,
        month: month as u32 + 1,
    })
}

/// Title of the dated tab covering `date`
#[must_use]
pub fn dated_tab_title(date: NaiveDate) -> String {
    let month = MONTHS[date.month0() as usize];
    format!("{month} {:02}", date.year().rem_euclid(100))
}

/// Tabs in their target order: pinned, dated newest first, then the rest as they were
#[must_use]
pub fn reorder_plan(tabs: &[TabInfo], pinned: Option<&str>) -> Vec<TabInfo> {
    let pinned = pinned.map(normalize);
    let mut ordered: Vec<TabInfo> = tabs.to_vec();
    ordered.sort_by_key(|t| t.index);

    let mut head = Vec::new();
    let mut dated = Vec::new();
    let mut rest = Vec::new();
    for tab in ordered {
        if head.is_empty() && pinned.as_deref() == Some(normalize(&tab.title).as_str()) {
            head.push(tab);
        } else if let Some(key) = parse_order_key(&tab.title) {
            dated.push((key, tab));
        } else {
            rest.push(tab);
        }
    }
    // Stable, so equal keys keep their relative order.
    dated.sort_by(|a, b| b.0.cmp(&a.0));

    head.into_iter()
        .chain(dated.into_iter().map(|(_, t)| t))
        .chain(rest)
        .collect()
}

/// One reindex request per tab, in target order
#[must_use]
pub fn reorder_requests(plan: &[TabInfo]) -> Vec<StructuralRequest> {
    plan.iter()
        .enumerate()
        .map(|(index, tab)| StructuralRequest::ReindexTab {
            tab_id: tab.tab_id,
            index,
        })
        .collect()
}

/// Reorder every tab of a spreadsheet in one batch; returns titles in the new order
pub async fn reorder_all(
    conn: &Connection,
    cache: &MetadataCache,
    spreadsheet_id: &str,
    pinned: Option<&str>,
) -> Result<Vec<String>> {
    let tabs = cache.tabs(conn, spreadsheet_id).await?;
    let plan = reorder_plan(&tabs, pinned);
    let titles: Vec<String> = plan.iter().map(|t| t.title.clone()).collect();

    let unchanged = plan.iter().enumerate().all(|(i, t)| t.index == i);
    if unchanged {
        debug!("Tabs of {spreadsheet_id} already in order", spreadsheet_id: spreadsheet_id);
        return Ok(titles);
    }

    let requests = reorder_requests(&plan);
    let result = conn
        .api
        .batch_structural_update(spreadsheet_id, requests)
        .await;
    cache.invalidate(spreadsheet_id).await;
    result?;

    let count = titles.len();
    info!("Reordered {count} tabs of {spreadsheet_id}", count: count, spreadsheet_id: spreadsheet_id);
    Ok(titles)
}

/// Add a dated tab, refusing one whose title already exists
pub async fn add_dated_tab(
    conn: &Connection,
    cache: &MetadataCache,
    spreadsheet_id: &str,
    title: &str,
) -> Result<TabInfo> {
    if parse_order_key(title).is_none() {
        return Err(SheetError::InvalidRecord(format!(
            "'{title}' is not a dated tab title (expected e.g. \"JAN 25\")"
        )));
    }

    let tabs = cache.tabs(conn, spreadsheet_id).await?;
    let wanted = normalize(title);
    if let Some(existing) = tabs.iter().find(|t| normalize(&t.title) == wanted) {
        return Err(SheetError::Conflict(format!(
            "dated tab '{}' already exists",
            existing.title
        )));
    }

    let result = conn
        .api
        .batch_structural_update(
            spreadsheet_id,
            vec![StructuralRequest::AddTab {
                title: title.to_string(),
            }],
        )
        .await;
    cache.invalidate(spreadsheet_id).await;
    result?;
    info!("Created dated tab {title} in {spreadsheet_id}", title: title, spreadsheet_id: spreadsheet_id);

    let tabs = cache.tabs(conn, spreadsheet_id).await?;
    tabs.iter()
        .find(|t| t.title == title)
        .cloned()
        .ok_or_else(|| SheetError::TableNotFound {
            name: title.to_string(),
            candidates: tabs.iter().map(|t| t.title.clone()).collect(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySheets;
    use std::time::Duration;

    fn tabs(titles: &[&str]) -> Vec<TabInfo> {
        titles
            .iter()
            .enumerate()
            .map(|(index, title)| TabInfo {
                title: (*title).to_string(),
                tab_id: index as i64,
                index,
            })
            .collect()
    }

    fn titles(plan: &[TabInfo]) -> Vec<&str> {
        plan.iter().map(|t| t.title.as_str()).collect()
    }

    #[test]
    fn test_order_keys() {
        assert_eq!(parse_order_key("JAN 25"), Some(OrderKey { year: 2025, month: 1 }));
        assert_eq!(parse_order_key("dec 49"), Some(OrderKey { year: 2049, month: 12 }));
        assert_eq!(parse_order_key("Mar 50"), Some(OrderKey { year: 1950, month: 3 }));
        assert_eq!(parse_order_key("SEP-99"), Some(OrderKey { year: 1999, month: 9 }));
        assert_eq!(parse_order_key("Summary"), None);
        assert_eq!(parse_order_key("XYZ 25"), None);
        assert_eq!(parse_order_key("JAN 2025"), None);
        assert!(parse_order_key("JAN 25") > parse_order_key("DEC 24"));
        assert!(parse_order_key("JAN 25") < parse_order_key("FEB 25"));
        assert!(parse_order_key("FEB 25") < parse_order_key("JAN 26"));
        assert!(parse_order_key("JAN 99") < parse_order_key("JAN 00"));
    }

    #[test]
    fn test_dated_title() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        assert_eq!(dated_tab_title(date), "MAR 25");
        let date = NaiveDate::from_ymd_opt(2009, 11, 1).unwrap();
        assert_eq!(dated_tab_title(date), "NOV 09");
        assert_eq!(parse_order_key(&dated_tab_title(date)), Some(OrderKey { year: 2009, month: 11 }));
    }

    #[test]
    fn test_reorder_plan() {
        let listing = tabs(&["Notes", "JAN 25", "Summary", "DEC 24", "Archive", "FEB 25"]);
        let plan = reorder_plan(&listing, Some("summary"));
        assert_eq!(
            titles(&plan),
            vec!["Summary", "FEB 25", "JAN 25", "DEC 24", "Notes", "Archive"]
        );

        let plan = reorder_plan(&listing, None);
        assert_eq!(
            titles(&plan),
            vec!["FEB 25", "JAN 25", "DEC 24", "Notes", "Summary", "Archive"]
        );
    }

    #[tokio::test]
    async fn test_reorder_all_sends_one_batch() {
        let sheets = MemorySheets::new();
        sheets.add_spreadsheet("s", &["Notes", "JAN 25", "Summary", "FEB 25"]);
        let conn = sheets.service_connection();
        let cache = MetadataCache::new(Duration::from_secs(60));

        let order = reorder_all(&conn, &cache, "s", Some("Summary")).await.unwrap();
        assert_eq!(order, vec!["Summary", "FEB 25", "JAN 25", "Notes"]);
        assert_eq!(sheets.tab_titles("s"), order);
        assert_eq!(sheets.structural_calls(), 1);

        // Already ordered: nothing sent.
        _ = reorder_all(&conn, &cache, "s", Some("Summary")).await.unwrap();
        assert_eq!(sheets.structural_calls(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_dated_tab_rejected() {
        let sheets = MemorySheets::new();
        sheets.add_spreadsheet("s", &["Notes", "JAN 25"]);
        let conn = sheets.service_connection();
        let cache = MetadataCache::new(Duration::from_secs(60));

        let err = add_dated_tab(&conn, &cache, "s", "jan  25").await.unwrap_err();
        assert!(matches!(err, SheetError::Conflict(_)));

        let tab = add_dated_tab(&conn, &cache, "s", "FEB 25").await.unwrap();
        assert_eq!(tab.title, "FEB 25");
        assert_eq!(tab.index, 2);

        let err = add_dated_tab(&conn, &cache, "s", "Notes 2").await.unwrap_err();
        assert!(matches!(err, SheetError::InvalidRecord(_)));
    }
}
