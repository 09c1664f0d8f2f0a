// Error types for spreadsheet-backed storage
use thiserror::Error;

/// Sub-classification of a non-success answer from the remote table API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Quota exhausted; retry with backoff
    RateLimited,
    /// The credential lacks an access grant; retrying will not help
    PermissionDenied,
    /// The call did not finish within the request timeout
    Timeout,
    /// Anything else the service rejected
    Other,
}

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Table '{name}' not found, candidates were: [{}]", .candidates.join(", "))]
    TableNotFound {
        name: String,
        candidates: Vec<String>,
    },

    #[error("Record at position {position} not found in '{table}' ({count} records)")]
    RecordNotFound {
        table: String,
        position: usize,
        count: usize,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Remote API error ({kind:?}{}): {message}", .status.map(|s| format!(", HTTP {s}")).unwrap_or_default())]
    Remote {
        kind: RemoteErrorKind,
        status: Option<u16>,
        message: String,
    },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("{operation} did not complete: {source}")]
    Incomplete {
        operation: String,
        #[source]
        source: Box<SheetError>,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SheetError>;

impl SheetError {
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        SheetError::Configuration(msg.into())
    }

    pub fn remote<S: Into<String>>(kind: RemoteErrorKind, status: Option<u16>, message: S) -> Self {
        SheetError::Remote {
            kind,
            status,
            message: message.into(),
        }
    }

    pub fn incomplete<S: Into<String>>(operation: S, source: SheetError) -> Self {
        SheetError::Incomplete {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// True for the not-found class (missing tab or record)
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SheetError::TableNotFound { .. } | SheetError::RecordNotFound { .. }
        )
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Rate limits and timeouts are transient. An incomplete multi-step
    /// operation is retryable when its cause is.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            SheetError::Remote { kind, .. } => {
                matches!(kind, RemoteErrorKind::RateLimited | RemoteErrorKind::Timeout)
            }
            SheetError::Http(e) => e.is_timeout(),
            SheetError::Incomplete { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    #[must_use]
    pub fn remote_kind(&self) -> Option<RemoteErrorKind> {
        match self {
            SheetError::Remote { kind, .. } => Some(*kind),
            SheetError::Http(e) if e.is_timeout() => Some(RemoteErrorKind::Timeout),
            SheetError::Incomplete { source, .. } => source.remote_kind(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classes() {
        let limited = SheetError::remote(RemoteErrorKind::RateLimited, Some(429), "quota");
        assert!(limited.is_retryable());

        let denied = SheetError::remote(RemoteErrorKind::PermissionDenied, Some(403), "no grant");
        assert!(!denied.is_retryable());

        let partial = SheetError::incomplete("renumber", limited);
        assert!(partial.is_retryable());
        assert_eq!(partial.remote_kind(), Some(RemoteErrorKind::RateLimited));

        assert!(!SheetError::configuration("missing key").is_retryable());
    }

    #[test]
    fn test_table_not_found_lists_candidates() {
        let err = SheetError::TableNotFound {
            name: "projects".to_string(),
            candidates: vec!["Notes".to_string(), "JAN 25".to_string()],
        };
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Table 'projects' not found, candidates were: [Notes, JAN 25]"
        );
    }
}
