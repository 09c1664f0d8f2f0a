//! Sheetstore - a record store on top of spreadsheet tabs
//!
//! Each tab of a configured spreadsheet is a table: row 1 holds the header,
//! column A holds each record's 1-based position, and text longer than one
//! cell is spread over groups of columns.
//!
//! Set SHEETSTORE_LOG to control logging:
//! - SHEETSTORE_LOG=off (default) - silent
//! - SHEETSTORE_LOG=info - structural mutations
//! - SHEETSTORE_LOG=debug - detailed diagnostics
//!
//! # Architecture
//!
//! - **SheetStore**: owns shared state and exposes record and table operations
//! - **CredentialBroker**: picks and caches the delegated or service identity client
//! - **MetadataCache**: TTL cache of tab listings
//! - **HeaderGuard**: writes each tab's header row once
//! - **positions**: renumbers the position column after row changes
//! - **lifecycle**: dated tabs and tab ordering
//! - **SheetsApi**: the remote API seam, over HTTP or in memory

/// Remote table API seam and request types
pub mod api;

/// Cell chunk codec
pub mod codec;

pub mod config;
pub mod credentials;
pub mod error;
pub mod header_guard;

/// HTTP client for the remote table API
pub mod http;

pub mod lifecycle;

/// In-memory remote table API
pub mod memory;

pub mod metadata_cache;
pub mod positions;

/// A1 ranges and column letters
pub mod range;

pub mod resolver;
pub mod retry;
pub mod schema;
pub mod store;

pub use api::{SheetsApi, StructuralRequest, TabInfo, ValueRange};
pub use config::{ServiceIdentityKey, SpreadsheetConfig, StoreConfig, load_config};
pub use credentials::{Access, CredentialBroker, CredentialContext, CredentialKind};
pub use error::{RemoteErrorKind, Result, SheetError};
pub use positions::RenumberReport;
pub use schema::{Record, TableSchema};
pub use store::SheetStore;
