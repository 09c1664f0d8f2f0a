//! The record store
//!
//! `SheetStore` owns every piece of shared state (cached clients, tab
//! listings, verified headers) and exposes record and table operations over
//! configured spreadsheets. Callers name a spreadsheet by alias and a table
//! by logical name, and pass their credentials with each call.

use crate::api::{StructuralRequest, TabInfo};
use crate::config::{SpreadsheetConfig, StoreConfig, ServiceIdentityKey, validate_config};
use crate::credentials::{Access, Connection, Connector, CredentialBroker};
use crate::error::{Result, SheetError};
use crate::header_guard::HeaderGuard;
use crate::http::HttpConnector;
use crate::lifecycle;
use crate::metadata_cache::MetadataCache;
use crate::positions::{self, RenumberReport};
use crate::range::A1Range;
use crate::resolver::{self, ResolvedTab, normalize};
use crate::schema::Record;
use chrono::NaiveDate;
use diagnostics::*;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct SheetStore {
    config: StoreConfig,
    broker: CredentialBroker,
    metadata: MetadataCache,
    headers: HeaderGuard,
}

impl SheetStore {
    /// Store over `connector`, after validating `config`
    pub fn new(config: StoreConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        validate_config(&config)?;
        let broker = CredentialBroker::new(
            connector,
            config.restricted_spreadsheet_id.clone(),
            config.service_identity.clone(),
            config.delegated_cache_limit,
        );
        let metadata = MetadataCache::new(config.metadata_ttl());
        Ok(Self {
            config,
            broker,
            metadata,
            headers: HeaderGuard::new(),
        })
    }

    /// Store talking to the remote service over HTTP
    pub fn over_http(config: StoreConfig) -> Result<Self> {
        let connector = HttpConnector::new(&config.api_base_url, config.request_timeout());
        Self::new(config, Arc::new(connector))
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[must_use]
    pub fn broker(&self) -> &CredentialBroker {
        &self.broker
    }

    #[must_use]
    pub fn metadata_cache(&self) -> &MetadataCache {
        &self.metadata
    }

    pub async fn reconfigure_service_identity(&self, key: Option<ServiceIdentityKey>) {
        self.broker.reconfigure_service_identity(key).await;
    }

    async fn target(&self, access: &Access, alias: &str) -> Result<(&SpreadsheetConfig, Connection)> {
        let sheet = self.config.spreadsheet(alias)?;
        let conn = self.broker.connect(access, &sheet.spreadsheet_id).await?;
        Ok((sheet, conn))
    }

    /// Resolve a logical table name, refreshing the listing once on a miss
    async fn resolve(&self, conn: &Connection, spreadsheet_id: &str, table: &str) -> Result<ResolvedTab> {
        let tabs = self.metadata.tabs(conn, spreadsheet_id).await?;
        let resolution = resolver::resolve(&tabs, table);
        if resolution.is_match() {
            return resolution.require(table);
        }

        // The listing may predate a tab created elsewhere.
        self.metadata.invalidate(spreadsheet_id).await;
        let tabs = self.metadata.tabs(conn, spreadsheet_id).await?;
        resolver::resolve(&tabs, table).require(table)
    }

    async fn structural(
        &self,
        conn: &Connection,
        spreadsheet_id: &str,
        requests: Vec<StructuralRequest>,
    ) -> Result<()> {
        let touches_tabs = requests.iter().any(StructuralRequest::touches_tabs);
        let result = conn
            .api
            .batch_structural_update(spreadsheet_id, requests)
            .await;
        if touches_tabs {
            self.metadata.invalidate(spreadsheet_id).await;
        }
        result
    }

    /// Data rows of a tab, position column included. Rows are read to their
    /// last used cell, however many chunk groups they span.
    async fn read_rows(
        &self,
        conn: &Connection,
        sheet: &SpreadsheetConfig,
        title: &str,
    ) -> Result<Vec<Vec<String>>> {
        let range = A1Range::whole(title).to_string();
        let rows = conn.api.get_values(&sheet.spreadsheet_id, &range).await?;
        Ok(rows.into_iter().skip(positions::sheet_row(1)).collect())
    }

    fn check_position(title: &str, position: usize, count: usize) -> Result<()> {
        if position == 0 || position > count {
            return Err(SheetError::RecordNotFound {
                table: title.to_string(),
                position,
                count,
            });
        }
        Ok(())
    }

    async fn tab_info(&self, conn: &Connection, spreadsheet_id: &str, tab_id: i64) -> Result<TabInfo> {
        let tabs = self.metadata.tabs(conn, spreadsheet_id).await?;
        tabs.iter()
            .find(|t| t.tab_id == tab_id)
            .cloned()
            .ok_or_else(|| SheetError::TableNotFound {
                name: format!("tab id {tab_id}"),
                candidates: tabs.iter().map(|t| t.title.clone()).collect(),
            })
    }

    /// Every record of a table in row order
    pub async fn list_records(&self, access: &Access, alias: &str, table: &str) -> Result<Vec<Record>> {
        let (sheet, conn) = self.target(access, alias).await?;
        let tab = self.resolve(&conn, &sheet.spreadsheet_id, table).await?;
        let rows = self.read_rows(&conn, sheet, &tab.title).await?;
        Ok(rows
            .iter()
            .enumerate()
            .map(|(i, row)| Record::from_row(&sheet.schema, i + 1, row))
            .collect())
    }

    /// The record at 1-based `position`
    pub async fn get_record(&self, access: &Access, alias: &str, table: &str, position: usize) -> Result<Record> {
        let (sheet, conn) = self.target(access, alias).await?;
        let tab = self.resolve(&conn, &sheet.spreadsheet_id, table).await?;
        let rows = self.read_rows(&conn, sheet, &tab.title).await?;
        Self::check_position(&tab.title, position, rows.len())?;
        Ok(Record::from_row(&sheet.schema, position, &rows[position - 1]))
    }

    /// Append a record at the end of a table
    pub async fn create_record(
        &self,
        access: &Access,
        alias: &str,
        table: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<Record> {
        let sheet = self.config.spreadsheet(alias)?;
        let cells = sheet.schema.encode_row(values, self.config.max_cell_len)?;

        let (sheet, conn) = self.target(access, alias).await?;
        let id = sheet.spreadsheet_id.as_str();
        let tab = self.resolve(&conn, id, table).await?;
        _ = self.headers.ensure(&conn, id, &tab, &sheet.schema).await?;

        let count = self.read_rows(&conn, sheet, &tab.title).await?.len();
        let position = count + 1;
        let mut row = Vec::with_capacity(cells.len() + 1);
        row.push(position.to_string());
        row.extend(cells);

        let last_col = row.len() - 1;
        let range = A1Range::rows(&tab.title, 0, last_col, 0, None).to_string();
        conn.api.append_values(id, &range, vec![row.clone()]).await?;
        let title = tab.title.as_str();
        info!("Appended record {position} to {title}", position: position, title: title);

        _ = positions::renumber(&conn, id, title, position, self.config.batch_size).await?;
        Ok(Record::from_row(&sheet.schema, position, &row))
    }

    /// Replace some fields of the record at `position`; fields not given keep their values
    pub async fn update_record(
        &self,
        access: &Access,
        alias: &str,
        table: &str,
        position: usize,
        values: &BTreeMap<String, String>,
    ) -> Result<Record> {
        let sheet = self.config.spreadsheet(alias)?;
        sheet.schema.check_fields(values)?;

        let (sheet, conn) = self.target(access, alias).await?;
        let id = sheet.spreadsheet_id.as_str();
        let tab = self.resolve(&conn, id, table).await?;
        _ = self.headers.ensure(&conn, id, &tab, &sheet.schema).await?;

        let rows = self.read_rows(&conn, sheet, &tab.title).await?;
        Self::check_position(&tab.title, position, rows.len())?;
        let old_row = &rows[position - 1];

        let mut merged = Record::from_row(&sheet.schema, position, old_row).to_map();
        merged.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        let cells = sheet.schema.encode_row(&merged, self.config.max_cell_len)?;

        let mut row = Vec::with_capacity(cells.len() + 1);
        row.push(position.to_string());
        row.extend(cells);
        // Blank whatever the previous, longer encoding left behind.
        if row.len() < old_row.len() {
            row.resize(old_row.len(), String::new());
        }

        let range = A1Range::cell(&tab.title, 0, positions::sheet_row(position)).to_string();
        conn.api.update_values(id, &range, vec![row.clone()]).await?;
        let title = tab.title.as_str();
        debug!("Updated record {position} in {title}", position: position, title: title);
        Ok(Record::from_row(&sheet.schema, position, &row))
    }

    /// Remove the record at `position`; later records move up one
    pub async fn delete_record(&self, access: &Access, alias: &str, table: &str, position: usize) -> Result<Record> {
        let (sheet, conn) = self.target(access, alias).await?;
        let id = sheet.spreadsheet_id.as_str();
        let tab = self.resolve(&conn, id, table).await?;

        let rows = self.read_rows(&conn, sheet, &tab.title).await?;
        let count = rows.len();
        Self::check_position(&tab.title, position, count)?;
        let removed = Record::from_row(&sheet.schema, position, &rows[position - 1]);

        let start = positions::sheet_row(position);
        self.structural(
            &conn,
            id,
            vec![StructuralRequest::DeleteRows {
                tab_id: tab.tab_id,
                start,
                end: start + 1,
            }],
        )
        .await?;
        let title = tab.title.as_str();
        info!("Deleted record {position} from {title}", position: position, title: title);

        _ = positions::renumber(&conn, id, title, count - 1, self.config.batch_size).await?;
        Ok(removed)
    }

    /// Move the record at `from` to `to`; records in between shift toward the gap
    pub async fn move_record(
        &self,
        access: &Access,
        alias: &str,
        table: &str,
        from: usize,
        to: usize,
    ) -> Result<Record> {
        let (sheet, conn) = self.target(access, alias).await?;
        let id = sheet.spreadsheet_id.as_str();
        let tab = self.resolve(&conn, id, table).await?;

        let rows = self.read_rows(&conn, sheet, &tab.title).await?;
        let count = rows.len();
        Self::check_position(&tab.title, from, count)?;
        Self::check_position(&tab.title, to, count)?;
        let mut moved = Record::from_row(&sheet.schema, from, &rows[from - 1]);
        if from == to {
            return Ok(moved);
        }

        self.structural(&conn, id, vec![positions::move_request(tab.tab_id, from, to)])
            .await?;
        let title = tab.title.as_str();
        info!("Moved record {from} to {to} in {title}", from: from, to: to, title: title);

        _ = positions::renumber(&conn, id, title, count, self.config.batch_size).await?;
        moved.position = to;
        moved.stored_position = Some(to);
        Ok(moved)
    }

    /// Rewrite every stored position of a table; safe to repeat after a failed pass
    pub async fn renumber(&self, access: &Access, alias: &str, table: &str) -> Result<RenumberReport> {
        let (sheet, conn) = self.target(access, alias).await?;
        let id = sheet.spreadsheet_id.as_str();
        let tab = self.resolve(&conn, id, table).await?;
        let count = self.read_rows(&conn, sheet, &tab.title).await?.len();
        positions::renumber(&conn, id, &tab.title, count, self.config.batch_size).await
    }

    /// Tabs in index order
    pub async fn list_tables(&self, access: &Access, alias: &str) -> Result<Vec<TabInfo>> {
        let (sheet, conn) = self.target(access, alias).await?;
        let tabs = self.metadata.tabs(&conn, &sheet.spreadsheet_id).await?;
        Ok(tabs.to_vec())
    }

    /// Create a table with the spreadsheet's header row.
    ///
    /// A dated name ("JAN 25") goes through [`Self::create_dated_table`]'s path.
    pub async fn create_table(&self, access: &Access, alias: &str, name: &str) -> Result<TabInfo> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SheetError::InvalidRecord("table name cannot be empty".to_string()));
        }
        if lifecycle::parse_order_key(name).is_some() {
            return self.create_dated_named(access, alias, name).await;
        }

        let (sheet, conn) = self.target(access, alias).await?;
        let id = sheet.spreadsheet_id.as_str();
        let tabs = self.metadata.tabs(&conn, id).await?;
        let wanted = normalize(name);
        if let Some(existing) = tabs.iter().find(|t| normalize(&t.title) == wanted) {
            return Err(SheetError::Conflict(format!(
                "table '{}' already exists",
                existing.title
            )));
        }

        self.structural(
            &conn,
            id,
            vec![StructuralRequest::AddTab {
                title: name.to_string(),
            }],
        )
        .await?;
        info!("Created table {name} in {id}", name: name, id: id);

        let tab = self.resolve(&conn, id, name).await?;
        _ = self.headers.ensure(&conn, id, &tab, &sheet.schema).await?;
        self.tab_info(&conn, id, tab.tab_id).await
    }

    /// Create the dated table for the month of `date` and reorder tabs
    pub async fn create_dated_table(&self, access: &Access, alias: &str, date: NaiveDate) -> Result<TabInfo> {
        let title = lifecycle::dated_tab_title(date);
        self.create_dated_named(access, alias, &title).await
    }

    async fn create_dated_named(&self, access: &Access, alias: &str, title: &str) -> Result<TabInfo> {
        let (sheet, conn) = self.target(access, alias).await?;
        let id = sheet.spreadsheet_id.as_str();

        let added = lifecycle::add_dated_tab(&conn, &self.metadata, id, title).await?;
        let tab = ResolvedTab {
            title: added.title,
            tab_id: added.tab_id,
        };
        _ = self.headers.ensure(&conn, id, &tab, &sheet.schema).await?;
        _ = lifecycle::reorder_all(&conn, &self.metadata, id, sheet.pinned_tab.as_deref()).await?;
        self.tab_info(&conn, id, tab.tab_id).await
    }

    /// Rename a table; a dated result triggers a reorder
    pub async fn rename_table(&self, access: &Access, alias: &str, table: &str, new_name: &str) -> Result<TabInfo> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(SheetError::InvalidRecord("table name cannot be empty".to_string()));
        }

        let (sheet, conn) = self.target(access, alias).await?;
        let id = sheet.spreadsheet_id.as_str();
        let tab = self.resolve(&conn, id, table).await?;

        let tabs = self.metadata.tabs(&conn, id).await?;
        let wanted = normalize(new_name);
        if let Some(existing) = tabs
            .iter()
            .find(|t| t.tab_id != tab.tab_id && normalize(&t.title) == wanted)
        {
            return Err(SheetError::Conflict(format!(
                "table '{}' already exists",
                existing.title
            )));
        }

        self.structural(
            &conn,
            id,
            vec![StructuralRequest::RenameTab {
                tab_id: tab.tab_id,
                title: new_name.to_string(),
            }],
        )
        .await?;
        self.headers.invalidate(id, &tab.title).await;
        let old = tab.title.as_str();
        info!("Renamed table {old} to {new_name} in {id}", old: old, new_name: new_name, id: id);

        if lifecycle::parse_order_key(new_name).is_some() {
            _ = lifecycle::reorder_all(&conn, &self.metadata, id, sheet.pinned_tab.as_deref()).await?;
        }
        self.tab_info(&conn, id, tab.tab_id).await
    }

    /// Delete a table and everything in it
    pub async fn delete_table(&self, access: &Access, alias: &str, table: &str) -> Result<()> {
        let (sheet, conn) = self.target(access, alias).await?;
        let id = sheet.spreadsheet_id.as_str();
        let tab = self.resolve(&conn, id, table).await?;

        self.structural(&conn, id, vec![StructuralRequest::DeleteTab { tab_id: tab.tab_id }])
            .await?;
        self.headers.invalidate(id, &tab.title).await;
        let title = tab.title.as_str();
        info!("Deleted table {title} from {id}", title: title, id: id);
        Ok(())
    }

    /// Pinned tab first, dated tabs newest first, the rest after; returns the new order
    pub async fn reorder_tables(&self, access: &Access, alias: &str) -> Result<Vec<String>> {
        let (sheet, conn) = self.target(access, alias).await?;
        lifecycle::reorder_all(
            &conn,
            &self.metadata,
            &sheet.spreadsheet_id,
            sheet.pinned_tab.as_deref(),
        )
        .await
    }

    /// Forget cached listings and verified headers for one spreadsheet, or all
    pub async fn invalidate(&self, alias: Option<&str>) -> Result<()> {
        match alias {
            Some(alias) => {
                let id = self.config.spreadsheet(alias)?.spreadsheet_id.as_str();
                self.metadata.invalidate(id).await;
                self.headers.invalidate_spreadsheet(id).await;
            }
            None => {
                self.metadata.clear().await;
                self.headers.clear().await;
            }
        }
        Ok(())
    }
}
