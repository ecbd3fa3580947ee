//! PostgREST-style HTTP adapter for the remote table store.
//!
//! Tables live under `{base}/rest/v1/{table}`, stored procedures under
//! `{base}/rest/v1/rpc/{name}`, and password auth under `{base}/auth/v1`.
//! Every request carries the project's anon key as `apikey`; requests from
//! a signed-in session authenticate with the user's access token instead of
//! the anon key.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use bazaar_core::{Email, UserId};

use super::query::filter_params;
use super::{Connector, Filter, Identity, Query, RemoteError, RemoteStore, Row, Table};
use crate::config::RemoteStoreConfig;

/// Longest slice of an error body kept in logs and error messages.
const ERROR_BODY_PREVIEW: usize = 200;

/// Shares one HTTP client and hands out per-shopper [`RestStore`]s.
#[derive(Clone)]
pub struct RestConnector {
    inner: Arc<RestInner>,
}

struct RestInner {
    client: reqwest::Client,
    rest_base: String,
    auth_base: String,
    anon_key: SecretString,
}

impl RestConnector {
    /// Build the shared client.
    ///
    /// No timeout is applied unless one is configured; the transport default
    /// then governs.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Http` if the TLS backend cannot be initialised.
    pub fn new(config: &RemoteStoreConfig) -> Result<Self, RemoteError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        let base = config.url.as_str().trim_end_matches('/');

        Ok(Self {
            inner: Arc::new(RestInner {
                client,
                rest_base: format!("{base}/rest/v1"),
                auth_base: format!("{base}/auth/v1"),
                anon_key: config.anon_key.clone(),
            }),
        })
    }
}

impl Connector for RestConnector {
    fn connect(&self) -> Arc<dyn RemoteStore> {
        Arc::new(RestStore {
            inner: Arc::clone(&self.inner),
            session: RwLock::new(None),
        })
    }
}

struct AuthSession {
    access_token: SecretString,
}

/// One shopper's view of the remote store.
pub struct RestStore {
    inner: Arc<RestInner>,
    session: RwLock<Option<AuthSession>>,
}

#[derive(Deserialize)]
struct UserPayload {
    id: UserId,
    email: String,
}

#[derive(Deserialize)]
struct TokenPayload {
    access_token: String,
    user: UserPayload,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(alias = "msg", alias = "error_description")]
    message: Option<String>,
}

impl UserPayload {
    fn into_identity(self) -> Result<Identity, RemoteError> {
        let email = Email::parse(&self.email).map_err(|e| RemoteError::Api {
            status: 200,
            message: format!("auth service returned invalid email: {e}"),
        })?;
        Ok(Identity { id: self.id, email })
    }
}

impl RestStore {
    fn table_url(&self, table: Table) -> String {
        format!("{}/{}", self.inner.rest_base, table.as_str())
    }

    /// Start a request authenticated as this session (or anonymously).
    async fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let session = self.session.read().await;
        let bearer = session.as_ref().map_or_else(
            || self.inner.anon_key.expose_secret().to_owned(),
            |s| s.access_token.expose_secret().to_owned(),
        );

        self.inner
            .client
            .request(method, url)
            .header("apikey", self.inner.anon_key.expose_secret())
            .bearer_auth(bearer)
    }

    /// Send and return the body, mapping failures to [`RemoteError`].
    async fn send(&self, request: RequestBuilder) -> Result<String, RemoteError> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(RemoteError::RateLimited(retry_after));
        }

        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!(
                status = %status,
                body = %body.chars().take(ERROR_BODY_PREVIEW).collect::<String>(),
                "Remote store returned non-success status"
            );
            return Err(classify(status, &body));
        }

        Ok(body)
    }

    fn parse_rows(body: &str) -> Result<Vec<Row>, RemoteError> {
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(body).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %body.chars().take(ERROR_BODY_PREVIEW).collect::<String>(),
                "Failed to parse remote rows"
            );
            RemoteError::Parse(e)
        })
    }
}

/// Map a failed response to an error variant.
fn classify(status: StatusCode, body: &str) -> RemoteError {
    let message = serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .and_then(|p| p.message)
        .unwrap_or_else(|| body.chars().take(ERROR_BODY_PREVIEW).collect());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(message),
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        StatusCode::CONFLICT => RemoteError::Conflict(message),
        _ => RemoteError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

fn refuse_unfiltered(table: Table) -> RemoteError {
    RemoteError::Api {
        status: 400,
        message: format!("refusing unfiltered write on {table}"),
    }
}

#[async_trait]
impl RemoteStore for RestStore {
    #[instrument(skip(self, query), fields(table = %table))]
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Row>, RemoteError> {
        let request = self
            .request(Method::GET, &self.table_url(table))
            .await
            .query(&query.to_params());
        let body = self.send(request).await?;
        let rows = Self::parse_rows(&body)?;
        debug!(rows = rows.len(), "select complete");
        Ok(rows)
    }

    #[instrument(skip(self, rows), fields(table = %table, rows = rows.len()))]
    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<Vec<Row>, RemoteError> {
        let request = self
            .request(Method::POST, &self.table_url(table))
            .await
            .header("Prefer", "return=representation")
            .json(&rows);
        let body = self.send(request).await?;
        Self::parse_rows(&body)
    }

    #[instrument(skip(self, filters, patch), fields(table = %table))]
    async fn update(
        &self,
        table: Table,
        filters: &[Filter],
        patch: Row,
    ) -> Result<(), RemoteError> {
        if filters.is_empty() {
            return Err(refuse_unfiltered(table));
        }
        let request = self
            .request(Method::PATCH, &self.table_url(table))
            .await
            .query(&filter_params(filters))
            .header("Prefer", "return=minimal")
            .json(&patch);
        self.send(request).await?;
        Ok(())
    }

    #[instrument(skip(self, filters), fields(table = %table))]
    async fn delete(&self, table: Table, filters: &[Filter]) -> Result<(), RemoteError> {
        if filters.is_empty() {
            return Err(refuse_unfiltered(table));
        }
        let request = self
            .request(Method::DELETE, &self.table_url(table))
            .await
            .query(&filter_params(filters))
            .header("Prefer", "return=minimal");
        self.send(request).await?;
        Ok(())
    }

    #[instrument(skip(self, row), fields(table = %table, on_conflict = %conflict.join(",")))]
    async fn upsert(&self, table: Table, row: Row, conflict: &[&str]) -> Result<(), RemoteError> {
        let request = self
            .request(Method::POST, &self.table_url(table))
            .await
            .query(&[("on_conflict", conflict.join(","))])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row]);
        self.send(request).await?;
        Ok(())
    }

    #[instrument(skip(self, args))]
    async fn rpc(
        &self,
        function: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, RemoteError> {
        let url = format!("{}/rpc/{function}", self.inner.rest_base);
        let request = self.request(Method::POST, &url).await.json(&args);
        let body = self.send(request).await?;
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn current_user(&self) -> Result<Option<Identity>, RemoteError> {
        if self.session.read().await.is_none() {
            return Ok(None);
        }

        let url = format!("{}/user", self.inner.auth_base);
        let request = self.request(Method::GET, &url).await;
        match self.send(request).await {
            Ok(body) => {
                let user: UserPayload = serde_json::from_str(&body)?;
                Ok(Some(user.into_identity()?))
            }
            Err(RemoteError::Unauthorized(reason)) => {
                // Expired or revoked token: fall back to the guest scope.
                tracing::warn!(%reason, "access token rejected, signing session out");
                *self.session.write().await = None;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, password), fields(email = %email))]
    async fn sign_in(&self, email: &Email, password: &str) -> Result<Identity, RemoteError> {
        let url = format!("{}/token", self.inner.auth_base);
        let request = self
            .inner
            .client
            .post(&url)
            .query(&[("grant_type", "password")])
            .header("apikey", self.inner.anon_key.expose_secret())
            .json(&serde_json::json!({
                "email": email.as_str(),
                "password": password,
            }));

        let body = match self.send(request).await {
            Ok(body) => body,
            // The token endpoint answers 400 for bad credentials.
            Err(RemoteError::Api { status: 400, message }) => {
                return Err(RemoteError::Unauthorized(message));
            }
            Err(e) => return Err(e),
        };

        let payload: TokenPayload = serde_json::from_str(&body)?;
        let identity = payload.user.into_identity()?;
        *self.session.write().await = Some(AuthSession {
            access_token: SecretString::from(payload.access_token),
        });
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), RemoteError> {
        if self.session.read().await.is_none() {
            return Ok(());
        }

        let url = format!("{}/logout", self.inner.auth_base);
        let request = self.request(Method::POST, &url).await;
        let result = self.send(request).await;

        // Local credentials go away even if the remote revoke failed.
        *self.session.write().await = None;
        result.map(|_| ())
    }
}
