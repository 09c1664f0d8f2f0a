//! In-process implementation of the remote table API
//!
//! Follows the remote service's observable behavior closely enough for the
//! storage layer to run unchanged: reads drop trailing empty cells and rows,
//! structural batches apply all-or-nothing, tab titles are unique ignoring
//! case, and a spreadsheet can be limited to a set of principals.
//! Call counters and failure injection support tests.

use crate::api::{SheetsApi, StructuralRequest, TabInfo, ValueRange};
use crate::credentials::{Connected, Connection, Connector, Credential, CredentialContext};
use crate::error::{RemoteErrorKind, Result, SheetError};
use crate::range::A1Range;
use async_trait::async_trait;
use diagnostics::*;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Principal name of the service identity
pub const SERVICE_PRINCIPAL: &str = "service";

/// Principal name for a delegated token
#[must_use]
pub fn token_principal(token: &str) -> String {
    format!("token:{token}")
}

#[derive(Debug, Clone)]
struct MemoryTab {
    tab_id: i64,
    title: String,
    rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
struct Spreadsheet {
    tabs: Vec<MemoryTab>,
    next_tab_id: i64,
    allowed: Option<HashSet<String>>,
}

impl Spreadsheet {
    fn tab(&self, title: &str) -> Result<&MemoryTab> {
        self.tabs
            .iter()
            .find(|t| t.title == title)
            .ok_or_else(|| bad_request(format!("Unable to parse range: {title}")))
    }

    fn tab_mut(&mut self, title: &str) -> Result<&mut MemoryTab> {
        self.tabs
            .iter_mut()
            .find(|t| t.title == title)
            .ok_or_else(|| bad_request(format!("Unable to parse range: {title}")))
    }

    fn tab_by_id(&mut self, tab_id: i64) -> Result<&mut MemoryTab> {
        self.tabs
            .iter_mut()
            .find(|t| t.tab_id == tab_id)
            .ok_or_else(|| bad_request(format!("No grid with id: {tab_id}")))
    }

    fn title_taken(&self, title: &str, except: Option<i64>) -> bool {
        let lower = title.to_lowercase();
        self.tabs
            .iter()
            .any(|t| Some(t.tab_id) != except && t.title.to_lowercase() == lower)
    }

    fn apply(&mut self, request: &StructuralRequest) -> Result<()> {
        match request {
            StructuralRequest::InsertRows { tab_id, start, end } => {
                let tab = self.tab_by_id(*tab_id)?;
                pad_rows(&mut tab.rows, *start);
                for i in *start..*end {
                    tab.rows.insert(i, Vec::new());
                }
            }
            StructuralRequest::DeleteRows { tab_id, start, end } => {
                let tab = self.tab_by_id(*tab_id)?;
                let end = (*end).min(tab.rows.len());
                if *start < end {
                    _ = tab.rows.drain(*start..end);
                }
            }
            StructuralRequest::MoveRows {
                tab_id,
                start,
                end,
                destination,
            } => {
                let tab = self.tab_by_id(*tab_id)?;
                pad_rows(&mut tab.rows, (*end).max(*destination));
                let moved: Vec<Vec<String>> = tab.rows.drain(*start..*end).collect();
                let at = if *destination > *start {
                    destination - moved.len()
                } else {
                    *destination
                };
                for (offset, row) in moved.into_iter().enumerate() {
                    tab.rows.insert(at + offset, row);
                }
            }
            StructuralRequest::AddTab { title } => {
                if self.title_taken(title, None) {
                    return Err(SheetError::Conflict(format!(
                        "A sheet with the name \"{title}\" already exists"
                    )));
                }
                let tab_id = self.next_tab_id;
                self.next_tab_id += 1;
                self.tabs.push(MemoryTab {
                    tab_id,
                    title: title.clone(),
                    rows: Vec::new(),
                });
            }
            StructuralRequest::RenameTab { tab_id, title } => {
                if self.title_taken(title, Some(*tab_id)) {
                    return Err(SheetError::Conflict(format!(
                        "A sheet with the name \"{title}\" already exists"
                    )));
                }
                self.tab_by_id(*tab_id)?.title = title.clone();
            }
            StructuralRequest::DeleteTab { tab_id } => {
                let pos = self
                    .tabs
                    .iter()
                    .position(|t| t.tab_id == *tab_id)
                    .ok_or_else(|| bad_request(format!("No grid with id: {tab_id}")))?;
                _ = self.tabs.remove(pos);
            }
            StructuralRequest::ReindexTab { tab_id, index } => {
                let pos = self
                    .tabs
                    .iter()
                    .position(|t| t.tab_id == *tab_id)
                    .ok_or_else(|| bad_request(format!("No grid with id: {tab_id}")))?;
                let tab = self.tabs.remove(pos);
                let index = (*index).min(self.tabs.len());
                self.tabs.insert(index, tab);
            }
        }
        Ok(())
    }
}

fn bad_request(message: String) -> SheetError {
    SheetError::remote(RemoteErrorKind::Other, Some(400), message)
}

fn pad_rows(rows: &mut Vec<Vec<String>>, len: usize) {
    if rows.len() < len {
        rows.resize(len, Vec::new());
    }
}

fn write_matrix(tab: &mut MemoryTab, first_row: usize, first_col: usize, values: Vec<Vec<String>>) {
    pad_rows(&mut tab.rows, first_row + values.len());
    for (r, row_values) in values.into_iter().enumerate() {
        let row = &mut tab.rows[first_row + r];
        if row.len() < first_col + row_values.len() {
            row.resize(first_col + row_values.len(), String::new());
        }
        for (c, value) in row_values.into_iter().enumerate() {
            row[first_col + c] = value;
        }
    }
}

fn trimmed(row: &[String]) -> Vec<String> {
    let len = row.iter().rposition(|c| !c.is_empty()).map_or(0, |i| i + 1);
    row[..len].to_vec()
}

/// Shared in-memory spreadsheets
#[derive(Default)]
pub struct MemorySheets {
    state: Mutex<HashMap<String, Spreadsheet>>,
    metadata_calls: AtomicUsize,
    value_batch_calls: AtomicUsize,
    structural_calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
    fail_value_batches_after: Mutex<Option<usize>>,
}

impl MemorySheets {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, HashMap<String, Spreadsheet>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a spreadsheet holding empty tabs with the given titles
    pub fn add_spreadsheet(&self, spreadsheet_id: &str, titles: &[&str]) {
        let mut sheet = Spreadsheet::default();
        for title in titles {
            sheet.tabs.push(MemoryTab {
                tab_id: sheet.next_tab_id,
                title: (*title).to_string(),
                rows: Vec::new(),
            });
            sheet.next_tab_id += 1;
        }
        _ = self.state().insert(spreadsheet_id.to_string(), sheet);
    }

    /// Only these principals may use the spreadsheet from now on
    pub fn restrict(&self, spreadsheet_id: &str, principals: &[&str]) {
        if let Some(sheet) = self.state().get_mut(spreadsheet_id) {
            sheet.allowed = Some(principals.iter().map(|p| (*p).to_string()).collect());
        }
    }

    /// Raw rows of a tab, header included, as stored
    #[must_use]
    pub fn rows(&self, spreadsheet_id: &str, title: &str) -> Option<Vec<Vec<String>>> {
        self.state()
            .get(spreadsheet_id)
            .and_then(|s| s.tab(title).ok().map(|t| t.rows.clone()))
    }

    /// Tab titles in index order
    #[must_use]
    pub fn tab_titles(&self, spreadsheet_id: &str) -> Vec<String> {
        self.state()
            .get(spreadsheet_id)
            .map(|s| s.tabs.iter().map(|t| t.title.clone()).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn value_batch_calls(&self) -> usize {
        self.value_batch_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn structural_calls(&self) -> usize {
        self.structural_calls.load(Ordering::SeqCst)
    }

    /// Number of updates carried by each value batch, in call order
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make value batches fail (rate limited) once `n` more have succeeded
    pub fn fail_value_batches_after(&self, n: Option<usize>) {
        *self
            .fail_value_batches_after
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = n;
    }

    /// Client acting as `principal`
    #[must_use]
    pub fn client(self: &Arc<Self>, principal: &str) -> Arc<MemoryClient> {
        Arc::new(MemoryClient {
            sheets: self.clone(),
            principal: principal.to_string(),
        })
    }

    #[must_use]
    pub fn service_connection(self: &Arc<Self>) -> Connection {
        Connection {
            api: self.client(SERVICE_PRINCIPAL),
            context: CredentialContext::service(),
        }
    }

    #[must_use]
    pub fn delegated_connection(self: &Arc<Self>, token: &str) -> Connection {
        Connection {
            api: self.client(&token_principal(token)),
            context: CredentialContext::delegated(token),
        }
    }

    fn with_sheet<T>(
        &self,
        principal: &str,
        spreadsheet_id: &str,
        f: impl FnOnce(&mut Spreadsheet) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state();
        let sheet = state.get_mut(spreadsheet_id).ok_or_else(|| {
            SheetError::remote(
                RemoteErrorKind::Other,
                Some(404),
                format!("Requested entity was not found: {spreadsheet_id}"),
            )
        })?;
        if let Some(allowed) = &sheet.allowed {
            if !allowed.contains(principal) {
                return Err(SheetError::remote(
                    RemoteErrorKind::PermissionDenied,
                    Some(403),
                    "The caller does not have permission",
                ));
            }
        }
        f(sheet)
    }
}

/// One principal's view of [`MemorySheets`]
pub struct MemoryClient {
    sheets: Arc<MemorySheets>,
    principal: String,
}

#[async_trait]
impl SheetsApi for MemoryClient {
    async fn get_spreadsheet_metadata(&self, spreadsheet_id: &str) -> Result<Vec<TabInfo>> {
        _ = self.sheets.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.sheets.with_sheet(&self.principal, spreadsheet_id, |sheet| {
            Ok(sheet
                .tabs
                .iter()
                .enumerate()
                .map(|(index, t)| TabInfo {
                    title: t.title.clone(),
                    tab_id: t.tab_id,
                    index,
                })
                .collect())
        })
    }

    async fn get_values(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>> {
        let range = A1Range::parse(range)?;
        self.sheets.with_sheet(&self.principal, spreadsheet_id, |sheet| {
            let tab = sheet.tab(&range.title)?;
            let first_row = range.first_row();
            let last_row = range
                .last_row()
                .unwrap_or(usize::MAX)
                .min(tab.rows.len().saturating_sub(1));
            let first_col = range.first_col();

            let mut out: Vec<Vec<String>> = Vec::new();
            if first_row < tab.rows.len() && first_row <= last_row {
                for row in &tab.rows[first_row..=last_row] {
                    let last_col = range.last_col().map_or(row.len(), |c| (c + 1).min(row.len()));
                    let cells = if first_col < last_col {
                        trimmed(&row[first_col..last_col])
                    } else {
                        Vec::new()
                    };
                    out.push(cells);
                }
            }
            while out.last().is_some_and(Vec::is_empty) {
                _ = out.pop();
            }
            Ok(out)
        })
    }

    async fn update_values(&self, spreadsheet_id: &str, range: &str, values: Vec<Vec<String>>) -> Result<()> {
        let range = A1Range::parse(range)?;
        self.sheets.with_sheet(&self.principal, spreadsheet_id, |sheet| {
            let tab = sheet.tab_mut(&range.title)?;
            write_matrix(tab, range.first_row(), range.first_col(), values);
            Ok(())
        })
    }

    async fn append_values(&self, spreadsheet_id: &str, range: &str, values: Vec<Vec<String>>) -> Result<()> {
        let range = A1Range::parse(range)?;
        self.sheets.with_sheet(&self.principal, spreadsheet_id, |sheet| {
            let tab = sheet.tab_mut(&range.title)?;
            let used = tab
                .rows
                .iter()
                .rposition(|r| r.iter().any(|c| !c.is_empty()))
                .map_or(0, |i| i + 1);
            let start = used.max(range.first_row());
            write_matrix(tab, start, range.first_col(), values);
            Ok(())
        })
    }

    async fn batch_update_values(&self, spreadsheet_id: &str, data: Vec<ValueRange>) -> Result<()> {
        {
            let mut fail_after = self
                .sheets
                .fail_value_batches_after
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match fail_after.as_mut() {
                Some(0) => {
                    return Err(SheetError::remote(
                        RemoteErrorKind::RateLimited,
                        Some(429),
                        "Quota exceeded for quota metric 'Write requests'",
                    ));
                }
                Some(n) => *n -= 1,
                None => {}
            }
        }

        let parsed = data
            .into_iter()
            .map(|vr| A1Range::parse(&vr.range).map(|r| (r, vr.values)))
            .collect::<Result<Vec<_>>>()?;
        let count = parsed.len();

        self.sheets.with_sheet(&self.principal, spreadsheet_id, |sheet| {
            // Validate every range before writing any.
            for (range, _) in &parsed {
                _ = sheet.tab(&range.title)?;
            }
            for (range, values) in parsed {
                let tab = sheet.tab_mut(&range.title)?;
                write_matrix(tab, range.first_row(), range.first_col(), values);
            }
            Ok(())
        })?;

        _ = self.sheets.value_batch_calls.fetch_add(1, Ordering::SeqCst);
        self.sheets
            .batch_sizes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(count);
        Ok(())
    }

    async fn batch_structural_update(&self, spreadsheet_id: &str, requests: Vec<StructuralRequest>) -> Result<()> {
        self.sheets.with_sheet(&self.principal, spreadsheet_id, |sheet| {
            let mut staged = sheet.clone();
            for request in &requests {
                staged.apply(request)?;
            }
            *sheet = staged;
            Ok(())
        })?;
        _ = self.sheets.structural_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector handing out [`MemoryClient`]s, counting how many it built
pub struct MemoryConnector {
    sheets: Arc<MemorySheets>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    #[must_use]
    pub fn new(sheets: Arc<MemorySheets>) -> Self {
        Self {
            sheets,
            connects: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, credential: &Credential) -> Result<Connected> {
        _ = self.connects.fetch_add(1, Ordering::SeqCst);
        let kind = credential.kind().as_str();
        debug!("Issuing in-memory {kind} client", kind: kind);
        let principal = match credential {
            Credential::Delegated { token } => token_principal(token),
            Credential::ServiceIdentity(_) => SERVICE_PRINCIPAL.to_string(),
        };
        Ok(Connected {
            api: self.sheets.client(&principal),
            expires_at: None,
        })
    }
}
