//! Remote table API over HTTP
//!
//! Talks to the spreadsheets v4 REST endpoints with a bearer token. Values
//! are written RAW so nothing is reinterpreted as a formula or number.

use crate::api::{SheetsApi, StructuralRequest, TabInfo, ValueRange};
use crate::config::ServiceIdentityKey;
use crate::credentials::{Connected, Connector, Credential};
use crate::error::{RemoteErrorKind, Result, SheetError};
use async_trait::async_trait;
use diagnostics::*;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, Scope, TokenResponse, TokenUrl, basic::BasicClient,
    reqwest::async_http_client,
};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

#[derive(Deserialize)]
struct SpreadsheetResponse {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
    #[serde(default)]
    index: usize,
}

#[derive(Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Classify a non-success response
fn status_error(status: StatusCode, body: &str) -> SheetError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());
    let lower = message.to_lowercase();

    let kind = match status {
        StatusCode::TOO_MANY_REQUESTS => RemoteErrorKind::RateLimited,
        StatusCode::FORBIDDEN if lower.contains("quota") || lower.contains("rate limit") => {
            RemoteErrorKind::RateLimited
        }
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => RemoteErrorKind::PermissionDenied,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => RemoteErrorKind::Timeout,
        StatusCode::BAD_REQUEST if lower.contains("already exists") => {
            return SheetError::Conflict(message);
        }
        _ => RemoteErrorKind::Other,
    };
    SheetError::remote(kind, Some(status.as_u16()), message)
}

fn transport_error(e: reqwest::Error) -> SheetError {
    if e.is_timeout() {
        SheetError::remote(RemoteErrorKind::Timeout, None, e.to_string())
    } else {
        SheetError::Http(e)
    }
}

/// Async client for one bearer token
pub struct HttpSheetsApi {
    http_client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpSheetsApi {
    pub fn new(base_url: &str, token: String, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn send<T>(&self, request: reqwest::RequestBuilder) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        if body.trim().is_empty() {
            return Ok(serde_json::from_value(Value::Object(Default::default()))?);
        }
        Ok(serde_json::from_str(&body)?)
    }

    // URL construction helpers
    fn spreadsheet_url(base: &str, spreadsheet_id: &str, suffix: &str) -> Result<Url> {
        let mut url = Url::parse(base)
            .map_err(|e| SheetError::configuration(format!("invalid api_base_url '{base}': {e}")))?;
        _ = url
            .path_segments_mut()
            .map_err(|()| SheetError::configuration(format!("api_base_url '{base}' cannot be a base")))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets"])
            .push(&format!("{spreadsheet_id}{suffix}"));
        Ok(url)
    }

    fn metadata_url(base: &str, spreadsheet_id: &str) -> Result<Url> {
        let mut url = Self::spreadsheet_url(base, spreadsheet_id, "")?;
        _ = url
            .query_pairs_mut()
            .append_pair("fields", "sheets.properties(sheetId,title,index)");
        Ok(url)
    }

    fn values_url(base: &str, spreadsheet_id: &str, range: &str, suffix: &str) -> Result<Url> {
        let mut url = Self::spreadsheet_url(base, spreadsheet_id, "")?;
        _ = url
            .path_segments_mut()
            .map_err(|()| SheetError::configuration(format!("api_base_url '{base}' cannot be a base")))?
            .push("values")
            .push(&format!("{range}{suffix}"));
        Ok(url)
    }

    fn values_batch_url(base: &str, spreadsheet_id: &str) -> Result<Url> {
        let mut url = Self::spreadsheet_url(base, spreadsheet_id, "")?;
        _ = url
            .path_segments_mut()
            .map_err(|()| SheetError::configuration(format!("api_base_url '{base}' cannot be a base")))?
            .push("values:batchUpdate");
        Ok(url)
    }

    fn structural_url(base: &str, spreadsheet_id: &str) -> Result<Url> {
        Self::spreadsheet_url(base, spreadsheet_id, ":batchUpdate")
    }
}

#[async_trait]
impl SheetsApi for HttpSheetsApi {
    async fn get_spreadsheet_metadata(&self, spreadsheet_id: &str) -> Result<Vec<TabInfo>> {
        let url = Self::metadata_url(&self.base_url, spreadsheet_id)?;
        let response: SpreadsheetResponse = self.send(self.http_client.get(url)).await?;
        Ok(response
            .sheets
            .into_iter()
            .map(|s| TabInfo {
                title: s.properties.title,
                tab_id: s.properties.sheet_id,
                index: s.properties.index,
            })
            .collect())
    }

    async fn get_values(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>> {
        let url = Self::values_url(&self.base_url, spreadsheet_id, range, "")?;
        let response: ValuesResponse = self.send(self.http_client.get(url)).await?;
        Ok(response
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn update_values(&self, spreadsheet_id: &str, range: &str, values: Vec<Vec<String>>) -> Result<()> {
        let mut url = Self::values_url(&self.base_url, spreadsheet_id, range, "")?;
        _ = url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let body = json!({ "range": range, "majorDimension": "ROWS", "values": values });
        let _: Value = self.send(self.http_client.put(url).json(&body)).await?;
        Ok(())
    }

    async fn append_values(&self, spreadsheet_id: &str, range: &str, values: Vec<Vec<String>>) -> Result<()> {
        let mut url = Self::values_url(&self.base_url, spreadsheet_id, range, ":append")?;
        _ = url
            .query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let body = json!({ "range": range, "majorDimension": "ROWS", "values": values });
        let _: Value = self.send(self.http_client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn batch_update_values(&self, spreadsheet_id: &str, data: Vec<ValueRange>) -> Result<()> {
        let url = Self::values_batch_url(&self.base_url, spreadsheet_id)?;
        let body = json!({ "valueInputOption": "RAW", "data": data });
        let _: Value = self.send(self.http_client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn batch_structural_update(&self, spreadsheet_id: &str, requests: Vec<StructuralRequest>) -> Result<()> {
        let url = Self::structural_url(&self.base_url, spreadsheet_id)?;
        let requests: Vec<Value> = requests.iter().map(StructuralRequest::to_json).collect();
        let body = json!({ "requests": requests });
        let _: Value = self.send(self.http_client.post(url).json(&body)).await?;
        Ok(())
    }
}

/// Builds [`HttpSheetsApi`] clients, exchanging service identity keys for tokens
pub struct HttpConnector {
    base_url: String,
    timeout: Duration,
}

impl HttpConnector {
    #[must_use]
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.to_string(),
            timeout,
        }
    }

    /// Client-credentials exchange; returns the access token and its lifetime
    async fn service_token(key: &ServiceIdentityKey) -> Result<(String, Option<Duration>)> {
        let oauth_client = BasicClient::new(
            ClientId::new(key.client_id.clone()),
            Some(ClientSecret::new(key.client_secret.clone())),
            AuthUrl::new(key.auth_url.clone())
                .map_err(|e| SheetError::configuration(format!("invalid auth_url: {e}")))?,
            Some(
                TokenUrl::new(key.token_url.clone())
                    .map_err(|e| SheetError::configuration(format!("invalid token_url: {e}")))?,
            ),
        );

        let mut exchange = oauth_client.exchange_client_credentials();
        for scope in &key.scopes {
            exchange = exchange.add_scope(Scope::new(scope.clone()));
        }

        match exchange.request_async(async_http_client).await {
            Ok(token) => Ok((token.access_token().secret().clone(), token.expires_in())),
            Err(e) => Err(SheetError::remote(
                RemoteErrorKind::PermissionDenied,
                None,
                format!("service identity token exchange failed: {e}"),
            )),
        }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, credential: &Credential) -> Result<Connected> {
        match credential {
            Credential::Delegated { token } => {
                let api = HttpSheetsApi::new(&self.base_url, token.clone(), self.timeout)?;
                Ok(Connected {
                    api: Arc::new(api),
                    expires_at: None,
                })
            }
            Credential::ServiceIdentity(key) => {
                let (token, lifetime) = Self::service_token(key).await?;
                let secs = lifetime.map(|d| d.as_secs()).unwrap_or_default();
                debug!("Service identity token issued, valid for {secs}s", secs: secs);
                let api = HttpSheetsApi::new(&self.base_url, token, self.timeout)?;
                Ok(Connected {
                    api: Arc::new(api),
                    expires_at: lifetime.map(|d| Instant::now() + d),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://sheets.googleapis.com";

    #[test]
    fn test_url_construction() {
        assert_eq!(
            HttpSheetsApi::metadata_url(BASE, "abc").unwrap().as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc?fields=sheets.properties%28sheetId%2Ctitle%2Cindex%29"
        );
        assert_eq!(
            HttpSheetsApi::values_url(BASE, "abc", "Notes!A2:Z", "").unwrap().as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values/Notes!A2:Z"
        );
        assert_eq!(
            HttpSheetsApi::values_url(BASE, "abc", "'Project List'!A1", ":append")
                .unwrap()
                .as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values/'Project%20List'!A1:append"
        );
        assert_eq!(
            HttpSheetsApi::values_batch_url(BASE, "abc").unwrap().as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values:batchUpdate"
        );
        assert_eq!(
            HttpSheetsApi::structural_url("http://localhost:8080/", "abc").unwrap().as_str(),
            "http://localhost:8080/v4/spreadsheets/abc:batchUpdate"
        );
    }

    #[test]
    fn test_range_with_slash_stays_one_segment() {
        let url = HttpSheetsApi::values_url(BASE, "abc", "'Q1/Q2'!A1", "").unwrap();
        assert!(url.as_str().ends_with("/values/'Q1%2FQ2'!A1"));
    }

    #[test]
    fn test_status_classification() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = status_error(StatusCode::TOO_MANY_REQUESTS, body);
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::RateLimited));
        assert!(err.to_string().contains("Quota exceeded"));

        let err = status_error(StatusCode::FORBIDDEN, r#"{"error":{"message":"The caller does not have permission"}}"#);
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::PermissionDenied));
        assert!(!err.is_retryable());

        let err = status_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"Invalid requests[0].addSheet: A sheet with the name \"JAN 25\" already exists."}}"#,
        );
        assert!(matches!(err, SheetError::Conflict(_)));

        let err = status_error(StatusCode::BAD_GATEWAY, "upstream reset");
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::Other));
        assert!(err.to_string().contains("upstream reset"));
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(json!("x")), "x");
        assert_eq!(cell_text(json!(3)), "3");
        assert_eq!(cell_text(Value::Null), "");
    }
}
