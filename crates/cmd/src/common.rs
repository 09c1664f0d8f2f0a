use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::ValueEnum;
use sheetstore::{Access, CredentialKind, Record, SheetError, SheetStore};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "SHEETSTORE_CONFIG";

/// Credential to use regardless of the targeted spreadsheet
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum CredentialChoice {
    /// The caller's own bearer token
    Delegated,
    /// The backend's service identity
    Service,
}

impl From<CredentialChoice> for CredentialKind {
    fn from(choice: CredentialChoice) -> Self {
        match choice {
            CredentialChoice::Delegated => CredentialKind::Delegated,
            CredentialChoice::Service => CredentialKind::ServiceIdentity,
        }
    }
}

/// Get the config path with an optional override, falling back to SHEETSTORE_CONFIG
pub fn get_config_path_with_override(override_path: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(path);
    }

    env::var(CONFIG_ENV)
        .map_err(|_| anyhow!("{CONFIG_ENV} environment variable not set and --config not given"))
        .map(PathBuf::from)
}

/// Load configuration and build a store talking HTTP
pub fn open_store(config_path: Option<PathBuf>) -> Result<SheetStore> {
    let path = get_config_path_with_override(config_path)?;
    let config = sheetstore::load_config(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    SheetStore::over_http(config).with_context(|| "Failed to create store")
}

/// Credentials for this invocation
#[must_use]
pub fn access_from(token: Option<String>, force: Option<CredentialChoice>) -> Access {
    let access = match token {
        Some(token) => Access::with_token(token),
        None => Access::service(),
    };
    match force {
        Some(choice) => access.forcing(choice.into()),
        None => access,
    }
}

/// Parse `name=value` arguments; values may contain '='
pub fn parse_fields(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut fields = BTreeMap::new();
    for pair in pairs {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected name=value, got '{pair}'"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("Empty field name in '{pair}'"));
        }
        if fields.insert(name.to_string(), value.to_string()).is_some() {
            return Err(anyhow!("Field '{name}' given twice"));
        }
    }
    Ok(fields)
}

/// JSON form of a record for output
#[must_use]
pub fn record_json(record: &Record) -> serde_json::Value {
    serde_json::json!({
        "position": record.position,
        "stored_position": record.stored_position,
        "fields": record.to_map(),
    })
}

/// True when a mutation went through but its renumber pass did not finish
#[must_use]
pub fn is_incomplete(err: &SheetError) -> bool {
    matches!(err, SheetError::Incomplete { .. })
}

#[allow(clippy::print_stdout)]
pub fn print_json(value: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fields() {
        let fields = parse_fields(&["topic=rust".to_string(), "answer=a=b".to_string()]).unwrap();
        assert_eq!(fields.get("topic").map(String::as_str), Some("rust"));
        assert_eq!(fields.get("answer").map(String::as_str), Some("a=b"));

        assert!(parse_fields(&["novalue".to_string()]).is_err());
        assert!(parse_fields(&["=x".to_string()]).is_err());
        assert!(parse_fields(&["a=1".to_string(), "a=2".to_string()]).is_err());
    }

    #[test]
    fn test_config_path_override_wins() {
        let path = PathBuf::from("/tmp/sheets.yaml");
        assert_eq!(
            get_config_path_with_override(Some(path.clone())).unwrap(),
            path
        );
    }

    #[test]
    fn test_access_from() {
        let access = access_from(Some("tok".to_string()), None);
        assert_eq!(access.token(), Some("tok"));
        assert_eq!(access.forced(), None);

        let access = access_from(None, Some(CredentialChoice::Service));
        assert_eq!(access.token(), None);
        assert_eq!(access.forced(), Some(CredentialKind::ServiceIdentity));
    }

    #[test]
    fn test_open_store_reads_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheets.yaml");
        std::fs::write(
            &path,
            "spreadsheets:\n  - { alias: notes, spreadsheet_id: \"abc\", fields: [title] }\n",
        )
        .unwrap();
        let store = open_store(Some(path)).unwrap();
        assert!(store.config().spreadsheet("notes").is_ok());

        assert!(open_store(Some(dir.path().join("missing.yaml"))).is_err());
    }
}
