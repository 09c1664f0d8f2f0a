//! Credential broker
//!
//! Two credential kinds reach the remote service. A delegated credential is
//! the caller's own bearer token and is only used for the restricted
//! spreadsheet. The service identity is the backend's long-lived key and is
//! used for everything else. Clients are cached: delegated ones per token,
//! the service one as a single shared client.
//!
//! Selection never falls back from one kind to the other. A missing token or
//! a missing service key is a configuration error.

use crate::api::SheetsApi;
use crate::config::ServiceIdentityKey;
use crate::error::{Result, SheetError};
use async_trait::async_trait;
use diagnostics::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// Clients whose token expires within this margin are rebuilt
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Delegated,
    ServiceIdentity,
}

impl CredentialKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialKind::Delegated => "delegated",
            CredentialKind::ServiceIdentity => "service_identity",
        }
    }
}

/// Which credential a connection was built from.
///
/// Delegated contexts carry a fingerprint of the token, never the token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialContext {
    pub kind: CredentialKind,
    fingerprint: String,
}

impl CredentialContext {
    #[must_use]
    pub fn service() -> Self {
        Self {
            kind: CredentialKind::ServiceIdentity,
            fingerprint: "service".to_string(),
        }
    }

    #[must_use]
    pub fn delegated(token: &str) -> Self {
        Self {
            kind: CredentialKind::Delegated,
            fingerprint: token_fingerprint(token),
        }
    }

    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..8])
}

/// Material a connector turns into an authenticated client
#[derive(Clone)]
pub enum Credential {
    Delegated { token: String },
    ServiceIdentity(ServiceIdentityKey),
}

impl Credential {
    #[must_use]
    pub fn kind(&self) -> CredentialKind {
        match self {
            Credential::Delegated { .. } => CredentialKind::Delegated,
            Credential::ServiceIdentity(_) => CredentialKind::ServiceIdentity,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Delegated { token } => f
                .debug_struct("Delegated")
                .field("token", &token_fingerprint(token))
                .finish(),
            Credential::ServiceIdentity(key) => f.debug_tuple("ServiceIdentity").field(key).finish(),
        }
    }
}

/// The caller's credentials for one operation.
///
/// Passed explicitly to every store call so nothing about one request's
/// identity lingers for the next.
#[derive(Clone, Default)]
pub struct Access {
    token: Option<String>,
    force: Option<CredentialKind>,
}

impl Access {
    /// No caller token; only the service identity can be used
    #[must_use]
    pub fn service() -> Self {
        Self::default()
    }

    /// Caller-supplied bearer token, used when the restricted spreadsheet is targeted
    #[must_use]
    pub fn with_token<S: Into<String>>(token: S) -> Self {
        Self {
            token: Some(token.into()),
            force: None,
        }
    }

    /// Use `kind` regardless of which spreadsheet is targeted
    #[must_use]
    pub fn forcing(mut self, kind: CredentialKind) -> Self {
        self.force = Some(kind);
        self
    }

    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    #[must_use]
    pub fn forced(&self) -> Option<CredentialKind> {
        self.force
    }
}

impl fmt::Debug for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Access")
            .field("token", &self.token.as_deref().map(token_fingerprint))
            .field("force", &self.force)
            .finish()
    }
}

/// An authenticated client plus the context it was built from
#[derive(Clone)]
pub struct Connection {
    pub api: Arc<dyn SheetsApi>,
    pub context: CredentialContext,
}

/// What a connector hands back: the client and when its token lapses
pub struct Connected {
    pub api: Arc<dyn SheetsApi>,
    pub expires_at: Option<Instant>,
}

/// Builds authenticated clients from credentials
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, credential: &Credential) -> Result<Connected>;
}

struct CachedClient {
    api: Arc<dyn SheetsApi>,
    expires_at: Option<Instant>,
    last_used: Instant,
}

impl CachedClient {
    fn new(connected: Connected) -> Self {
        Self {
            api: connected.api,
            expires_at: connected.expires_at,
            last_used: Instant::now(),
        }
    }

    fn is_fresh(&self) -> bool {
        self.expires_at
            .is_none_or(|at| Instant::now() + EXPIRY_MARGIN < at)
    }
}

pub struct CredentialBroker {
    connector: Arc<dyn Connector>,
    restricted_spreadsheet_id: Option<String>,
    service_key: RwLock<Option<ServiceIdentityKey>>,
    service_client: Mutex<Option<CachedClient>>,
    delegated: Mutex<HashMap<String, CachedClient>>,
    delegated_limit: usize,
}

impl CredentialBroker {
    pub fn new(
        connector: Arc<dyn Connector>,
        restricted_spreadsheet_id: Option<String>,
        service_key: Option<ServiceIdentityKey>,
        delegated_limit: usize,
    ) -> Self {
        Self {
            connector,
            restricted_spreadsheet_id,
            service_key: RwLock::new(service_key),
            service_client: Mutex::new(None),
            delegated: Mutex::new(HashMap::new()),
            delegated_limit: delegated_limit.max(1),
        }
    }

    #[must_use]
    pub fn restricted_spreadsheet_id(&self) -> Option<&str> {
        self.restricted_spreadsheet_id.as_deref()
    }

    /// Credential kind used for `spreadsheet_id`
    #[must_use]
    pub fn select(&self, access: &Access, spreadsheet_id: &str) -> CredentialKind {
        if let Some(kind) = access.forced() {
            return kind;
        }
        match &self.restricted_spreadsheet_id {
            Some(restricted) if restricted == spreadsheet_id => CredentialKind::Delegated,
            _ => CredentialKind::ServiceIdentity,
        }
    }

    /// Authenticated client for `spreadsheet_id`
    pub async fn connect(&self, access: &Access, spreadsheet_id: &str) -> Result<Connection> {
        let kind = self.select(access, spreadsheet_id);
        let kind_name = kind.as_str();
        debug!("Using {kind_name} credential for {spreadsheet_id}", kind_name: kind_name, spreadsheet_id: spreadsheet_id);
        match kind {
            CredentialKind::Delegated => {
                let token = access.token().ok_or_else(|| {
                    SheetError::configuration(format!(
                        "delegated access to spreadsheet {spreadsheet_id} requires a bearer token"
                    ))
                })?;
                self.delegated_connection(token).await
            }
            CredentialKind::ServiceIdentity => self.service_connection().await,
        }
    }

    async fn service_connection(&self) -> Result<Connection> {
        // Held across connect so concurrent first calls build one client.
        let mut slot = self.service_client.lock().await;
        if let Some(cached) = slot.as_mut() {
            if cached.is_fresh() {
                cached.last_used = Instant::now();
                return Ok(Connection {
                    api: cached.api.clone(),
                    context: CredentialContext::service(),
                });
            }
            info!("Service identity token expired, reconnecting");
        }

        let key = self.service_key.read().await.clone().ok_or_else(|| {
            SheetError::configuration("service identity is not configured")
        })?;
        let connected = self
            .connector
            .connect(&Credential::ServiceIdentity(key))
            .await?;
        let cached = CachedClient::new(connected);
        let api = cached.api.clone();
        *slot = Some(cached);
        info!("Service identity client ready");

        Ok(Connection {
            api,
            context: CredentialContext::service(),
        })
    }

    async fn delegated_connection(&self, token: &str) -> Result<Connection> {
        let context = CredentialContext::delegated(token);
        let mut clients = self.delegated.lock().await;

        if let Some(cached) = clients.get_mut(context.fingerprint()) {
            if cached.is_fresh() {
                cached.last_used = Instant::now();
                return Ok(Connection {
                    api: cached.api.clone(),
                    context,
                });
            }
        }

        let connected = self
            .connector
            .connect(&Credential::Delegated {
                token: token.to_string(),
            })
            .await?;

        if clients.len() >= self.delegated_limit && !clients.contains_key(context.fingerprint()) {
            let oldest = clients
                .iter()
                .min_by_key(|(_, c)| c.last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                _ = clients.remove(&oldest);
            }
        }

        let cached = CachedClient::new(connected);
        let api = cached.api.clone();
        _ = clients.insert(context.fingerprint().to_string(), cached);
        let count = clients.len();
        debug!("Delegated client cached ({count} total)", count: count);

        Ok(Connection { api, context })
    }

    /// Replace the service identity key and drop the client built from the old one
    pub async fn reconfigure_service_identity(&self, key: Option<ServiceIdentityKey>) {
        *self.service_key.write().await = key;
        *self.service_client.lock().await = None;
        info!("Service identity reconfigured");
    }

    /// Drop the cached client for a token, e.g. after the caller signs out
    pub async fn forget_token(&self, token: &str) {
        let fingerprint = token_fingerprint(token);
        _ = self.delegated.lock().await.remove(&fingerprint);
    }

    pub async fn cached_delegated_clients(&self) -> usize {
        self.delegated.lock().await.len()
    }
}
