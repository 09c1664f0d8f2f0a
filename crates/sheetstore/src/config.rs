use crate::codec::DEFAULT_MAX_CELL_LEN;
use crate::error::{Result, SheetError};
use crate::schema::TableSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Environment variable that overrides the service identity client secret
pub const SERVICE_SECRET_ENV: &str = "SHEETSTORE_SERVICE_CLIENT_SECRET";

pub const DEFAULT_API_BASE_URL: &str = "https://sheets.googleapis.com";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_METADATA_TTL_SECS: u64 = 60;

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.to_string()
}

fn default_scopes() -> Vec<String> {
    vec![SPREADSHEETS_SCOPE.to_string()]
}

fn default_max_cell_len() -> usize {
    DEFAULT_MAX_CELL_LEN
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_metadata_ttl_secs() -> u64 {
    DEFAULT_METADATA_TTL_SECS
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_delegated_cache_limit() -> usize {
    256
}

/// Long-lived key material for the backend's own identity
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServiceIdentityKey {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

impl fmt::Debug for ServiceIdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceIdentityKey")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// One spreadsheet and the column layout its tabs share
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SpreadsheetConfig {
    /// Name callers use to address the spreadsheet
    pub alias: String,
    pub spreadsheet_id: String,
    #[serde(flatten)]
    pub schema: TableSchema,
    /// Tab kept at index 0 when tabs are reordered
    #[serde(default)]
    pub pinned_tab: Option<String>,
}

/// Store configuration
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoreConfig {
    /// The single spreadsheet reached with the caller's own token
    #[serde(default)]
    pub restricted_spreadsheet_id: Option<String>,
    #[serde(default)]
    pub service_identity: Option<ServiceIdentityKey>,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_max_cell_len")]
    pub max_cell_len: usize,
    /// Most value updates sent in one call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_metadata_ttl_secs")]
    pub metadata_ttl_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_delegated_cache_limit")]
    pub delegated_cache_limit: usize,
    #[serde(default)]
    pub spreadsheets: Vec<SpreadsheetConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            restricted_spreadsheet_id: None,
            service_identity: None,
            api_base_url: default_api_base_url(),
            max_cell_len: default_max_cell_len(),
            batch_size: default_batch_size(),
            metadata_ttl_secs: default_metadata_ttl_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            delegated_cache_limit: default_delegated_cache_limit(),
            spreadsheets: Vec::new(),
        }
    }
}

impl StoreConfig {
    /// Parse and validate YAML configuration
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let mut config: StoreConfig = serde_yaml_ng::from_str(content)?;
        config.apply_env();
        validate_config(&config)?;
        Ok(config)
    }

    /// Take secrets from the environment when present
    pub fn apply_env(&mut self) {
        if let (Some(identity), Ok(secret)) = (
            self.service_identity.as_mut(),
            std::env::var(SERVICE_SECRET_ENV),
        ) {
            if !secret.is_empty() {
                identity.client_secret = secret;
            }
        }
    }

    pub fn spreadsheet(&self, alias: &str) -> Result<&SpreadsheetConfig> {
        self.spreadsheets
            .iter()
            .find(|s| s.alias == alias)
            .ok_or_else(|| {
                SheetError::configuration(format!(
                    "no spreadsheet configured with alias '{alias}', known: [{}]",
                    self.spreadsheets
                        .iter()
                        .map(|s| s.alias.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }

    #[must_use]
    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_ttl_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<StoreConfig> {
    let content = std::fs::read_to_string(&path).map_err(|e| {
        SheetError::configuration(format!(
            "failed to read config file {}: {e}",
            path.as_ref().display()
        ))
    })?;
    StoreConfig::from_yaml_str(&content)
}

/// Validate configuration
pub(crate) fn validate_config(config: &StoreConfig) -> Result<()> {
    if config.max_cell_len == 0 {
        return Err(SheetError::configuration("max_cell_len must be greater than 0"));
    }
    if config.batch_size == 0 {
        return Err(SheetError::configuration("batch_size must be greater than 0"));
    }
    if config.request_timeout_secs == 0 {
        return Err(SheetError::configuration("request_timeout_secs must be greater than 0"));
    }

    let mut aliases = HashSet::new();
    for sheet in &config.spreadsheets {
        if sheet.alias.is_empty() {
            return Err(SheetError::configuration(format!(
                "spreadsheet alias cannot be empty (id {})",
                sheet.spreadsheet_id
            )));
        }
        if sheet.spreadsheet_id.is_empty() {
            return Err(SheetError::configuration(format!(
                "spreadsheet_id cannot be empty for '{}'",
                sheet.alias
            )));
        }
        if !aliases.insert(sheet.alias.as_str()) {
            return Err(SheetError::configuration(format!(
                "spreadsheet alias '{}' is configured twice",
                sheet.alias
            )));
        }
        let mut names = HashSet::new();
        for name in sheet.schema.field_names() {
            if name.is_empty() || name == crate::schema::POSITION_HEADER || !names.insert(name) {
                return Err(SheetError::configuration(format!(
                    "invalid or duplicate field '{name}' in '{}'",
                    sheet.alias
                )));
            }
        }
    }

    if let Some(restricted) = &config.restricted_spreadsheet_id {
        if restricted.is_empty() {
            return Err(SheetError::configuration("restricted_spreadsheet_id cannot be empty"));
        }
    }

    if let Some(identity) = &config.service_identity {
        if identity.client_id.is_empty() {
            return Err(SheetError::configuration("service_identity.client_id cannot be empty"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
restricted_spreadsheet_id: "restricted-1"
service_identity:
  client_id: "backend"
  client_secret: "s3cret"
spreadsheets:
  - alias: questions
    spreadsheet_id: "sheet-q"
    fields: [topic]
    chunked_fields: [question, answer, imageList, firstImage]
  - alias: work
    spreadsheet_id: "sheet-w"
    fields: [date, summary]
    pinned_tab: "Summary"
"#;

    #[test]
    fn test_defaults_and_layout() {
        let config = StoreConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.max_cell_len, 50_000);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.metadata_ttl(), Duration::from_secs(60));
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);

        let questions = config.spreadsheet("questions").unwrap();
        assert_eq!(questions.schema.chunk_width(), 4);

        let work = config.spreadsheet("work").unwrap();
        assert_eq!(work.pinned_tab.as_deref(), Some("Summary"));

        let identity = config.service_identity.as_ref().unwrap();
        assert_eq!(identity.scopes, vec![SPREADSHEETS_SCOPE.to_string()]);
        assert!(!format!("{identity:?}").contains("s3cret"));
    }

    #[test]
    fn test_unknown_alias_is_configuration_error() {
        let config = StoreConfig::from_yaml_str(SAMPLE).unwrap();
        let err = config.spreadsheet("notes").unwrap_err();
        assert!(matches!(err, SheetError::Configuration(_)));
        assert!(err.to_string().contains("questions, work"));
    }

    #[test]
    fn test_rejects_duplicate_alias() {
        let yaml = r#"
spreadsheets:
  - { alias: a, spreadsheet_id: "1" }
  - { alias: a, spreadsheet_id: "2" }
"#;
        assert!(matches!(
            StoreConfig::from_yaml_str(yaml),
            Err(SheetError::Configuration(_))
        ));
    }

    #[test]
    fn test_rejects_position_as_field() {
        let yaml = r#"
spreadsheets:
  - { alias: a, spreadsheet_id: "1", fields: [position] }
"#;
        assert!(StoreConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheets.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.spreadsheets.len(), 2);

        let missing = load_config(dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(SheetError::Configuration(_))));
    }
}
