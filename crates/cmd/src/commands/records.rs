use anyhow::Result;
use diagnostics::*;
use sheetstore::retry::{default_backoff, with_backoff};
use sheetstore::{Access, SheetStore};

use crate::common::{is_incomplete, parse_fields, print_json, record_json};

/// Repeat the renumber pass a mutation could not finish
async fn finish_renumber(store: &SheetStore, access: &Access, alias: &str, table: &str) -> Result<()> {
    warn!("Renumber pass incomplete for {table}, retrying", table: table);
    let report = with_backoff(default_backoff(), move || store.renumber(access, alias, table)).await?;
    let rows = report.rows;
    info!("Renumbered {rows} rows of {table}", rows: rows, table: table);
    Ok(())
}

pub async fn list_command(store: &SheetStore, access: &Access, alias: &str, table: &str) -> Result<()> {
    let records = with_backoff(default_backoff(), move || store.list_records(access, alias, table)).await?;
    let values: Vec<serde_json::Value> = records.iter().map(record_json).collect();
    print_json(&serde_json::Value::Array(values))
}

pub async fn get_command(store: &SheetStore, access: &Access, alias: &str, table: &str, position: usize) -> Result<()> {
    let record = with_backoff(default_backoff(), move || {
        store.get_record(access, alias, table, position)
    })
    .await?;
    print_json(&record_json(&record))
}

pub async fn create_command(
    store: &SheetStore,
    access: &Access,
    alias: &str,
    table: &str,
    fields: &[String],
) -> Result<()> {
    let values = parse_fields(fields)?;
    match store.create_record(access, alias, table, &values).await {
        Ok(record) => print_json(&record_json(&record)),
        Err(e) if is_incomplete(&e) => finish_renumber(store, access, alias, table).await,
        Err(e) => Err(e.into()),
    }
}

pub async fn update_command(
    store: &SheetStore,
    access: &Access,
    alias: &str,
    table: &str,
    position: usize,
    fields: &[String],
) -> Result<()> {
    let values = parse_fields(fields)?;
    let record = store
        .update_record(access, alias, table, position, &values)
        .await?;
    print_json(&record_json(&record))
}

pub async fn delete_command(store: &SheetStore, access: &Access, alias: &str, table: &str, position: usize) -> Result<()> {
    match store.delete_record(access, alias, table, position).await {
        Ok(record) => print_json(&record_json(&record)),
        Err(e) if is_incomplete(&e) => finish_renumber(store, access, alias, table).await,
        Err(e) => Err(e.into()),
    }
}

pub async fn move_command(
    store: &SheetStore,
    access: &Access,
    alias: &str,
    table: &str,
    from: usize,
    to: usize,
) -> Result<()> {
    match store.move_record(access, alias, table, from, to).await {
        Ok(record) => print_json(&record_json(&record)),
        Err(e) if is_incomplete(&e) => finish_renumber(store, access, alias, table).await,
        Err(e) => Err(e.into()),
    }
}

pub async fn renumber_command(store: &SheetStore, access: &Access, alias: &str, table: &str) -> Result<()> {
    let report = with_backoff(default_backoff(), move || store.renumber(access, alias, table)).await?;
    print_json(&serde_json::json!({ "rows": report.rows, "batches": report.batches }))
}
