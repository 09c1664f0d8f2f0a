use anyhow::{Context, Result};
use chrono::NaiveDate;
use sheetstore::retry::{default_backoff, with_backoff};
use sheetstore::{Access, SheetStore, TabInfo};

use crate::common::print_json;

fn tables_json(tabs: &[TabInfo]) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(tabs)?)
}

pub async fn tables_command(store: &SheetStore, access: &Access, alias: &str) -> Result<()> {
    let tabs = with_backoff(default_backoff(), move || store.list_tables(access, alias)).await?;
    print_json(&tables_json(&tabs)?)
}

pub async fn create_table_command(store: &SheetStore, access: &Access, alias: &str, name: &str) -> Result<()> {
    let tab = store.create_table(access, alias, name).await?;
    print_json(&serde_json::to_value(tab)?)
}

/// Create the dated table for `date` (YYYY-MM-DD), or for today
pub async fn create_dated_command(
    store: &SheetStore,
    access: &Access,
    alias: &str,
    date: Option<&str>,
) -> Result<()> {
    let date = match date {
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .with_context(|| format!("Invalid date '{text}', expected YYYY-MM-DD"))?,
        None => chrono::Local::now().date_naive(),
    };
    let tab = store.create_dated_table(access, alias, date).await?;
    print_json(&serde_json::to_value(tab)?)
}

pub async fn rename_table_command(
    store: &SheetStore,
    access: &Access,
    alias: &str,
    table: &str,
    new_name: &str,
) -> Result<()> {
    let tab = store.rename_table(access, alias, table, new_name).await?;
    print_json(&serde_json::to_value(tab)?)
}

pub async fn delete_table_command(store: &SheetStore, access: &Access, alias: &str, table: &str) -> Result<()> {
    store.delete_table(access, alias, table).await?;
    print_json(&serde_json::json!({ "deleted": table }))
}

pub async fn reorder_command(store: &SheetStore, access: &Access, alias: &str) -> Result<()> {
    let order = with_backoff(default_backoff(), move || store.reorder_tables(access, alias)).await?;
    print_json(&serde_json::to_value(order)?)
}
