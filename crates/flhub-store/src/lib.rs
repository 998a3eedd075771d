//! Hosted-platform collaborators: REST store access + auth identification.
//!
//! The platform owns persistence, auth, and realtime delivery. This crate
//! only speaks its rows/auth HTTP endpoints and exposes the two capabilities
//! the rest of the workspace injects: `OpportunityStore` and `AuthProvider`.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use flhub_core::{KeywordRecord, Opportunity};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "flhub-store";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub base_url: String,
    pub service_key: String,
    pub http_timeout: Duration,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("FLHUB_PLATFORM_URL")
                .unwrap_or_else(|_| "http://localhost:54321".to_string()),
            service_key: std::env::var("FLHUB_SERVICE_KEY").unwrap_or_default(),
            http_timeout: Duration::from_secs(
                std::env::var("FLHUB_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(20),
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store returned {status} during {operation}: {detail}")]
    Status {
        status: u16,
        operation: &'static str,
        detail: String,
    },
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("auth request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("token rejected by auth provider")]
    Unauthorized,
}

/// Identified caller as reported by the hosted auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

/// Row-level access this system needs from the hosted store: the two bulk
/// reads feeding a notification run, plus feed/keyword/favorite operations
/// keyed by user.
#[async_trait]
pub trait OpportunityStore: Send + Sync {
    /// Resolve ids to opportunity records. Ids that resolve to nothing are
    /// simply absent from the result; that is not an error.
    async fn opportunities_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Opportunity>, StoreError>;

    /// Newest-first slice of the feed.
    async fn recent_opportunities(&self, limit: usize) -> Result<Vec<Opportunity>, StoreError>;

    /// Full system-wide keyword scan, each row joined to its owning
    /// profile's email.
    async fn keywords_with_emails(&self) -> Result<Vec<KeywordRecord>, StoreError>;

    async fn keywords_for_user(&self, user_id: Uuid) -> Result<Vec<String>, StoreError>;

    async fn add_keyword(&self, user_id: Uuid, term: &str) -> Result<(), StoreError>;

    async fn remove_keyword(&self, user_id: Uuid, term: &str) -> Result<(), StoreError>;

    async fn saved_opportunity_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, StoreError>;

    async fn save_opportunity(
        &self,
        user_id: Uuid,
        opportunity_id: Uuid,
    ) -> Result<(), StoreError>;

    async fn unsave_opportunity(
        &self,
        user_id: Uuid,
        opportunity_id: Uuid,
    ) -> Result<(), StoreError>;
}

/// Session identification via the hosted auth collaborator. Issuance and
/// sign-out stay on the platform; this side only resolves a bearer token to
/// the caller's id and email.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn user_from_token(&self, token: &str) -> Result<AuthUser, AuthError>;
}

const OPPORTUNITY_COLUMNS: &str = "id,title,description,source_url,platform,created_at";

fn in_filter(ids: &[Uuid]) -> String {
    let joined = ids
        .iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({joined})")
}

fn eq_filter(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

/// Keyword row as the store returns it: the profile join is an embedded
/// object that may be null when the foreign key does not resolve.
#[derive(Debug, Deserialize)]
struct KeywordRow {
    user_id: Uuid,
    term: String,
    #[serde(default)]
    profiles: Option<ProfileRow>,
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    email: Option<String>,
}

impl From<KeywordRow> for KeywordRecord {
    fn from(row: KeywordRow) -> Self {
        KeywordRecord {
            user_id: row.user_id,
            term: row.term,
            email: row.profiles.and_then(|p| p.email),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TermRow {
    term: String,
}

#[derive(Debug, Deserialize)]
struct SavedRow {
    opportunity_id: Uuid,
}

/// Store client over the platform's rows API.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
}

impl RestStore {
    pub fn new(config: StoreConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.service_key)
            .context("service key is not a valid header value")?;
        headers.insert("apikey", key);
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.service_key))
            .context("service key is not a valid header value")?;
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .default_headers(headers)
            .build()
            .context("building store http client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn rows_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    async fn expect_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            operation,
            detail,
        })
    }
}

#[async_trait]
impl OpportunityStore for RestStore {
    async fn opportunities_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Opportunity>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .get(self.rows_url("opportunities"))
            .query(&[
                ("select", OPPORTUNITY_COLUMNS.to_string()),
                ("id", in_filter(ids)),
            ])
            .send()
            .await?;
        let rows = Self::expect_success(response, "opportunities_by_ids")
            .await?
            .json::<Vec<Opportunity>>()
            .await?;
        debug!(requested = ids.len(), resolved = rows.len(), "resolved opportunity ids");
        Ok(rows)
    }

    async fn recent_opportunities(&self, limit: usize) -> Result<Vec<Opportunity>, StoreError> {
        let response = self
            .client
            .get(self.rows_url("opportunities"))
            .query(&[
                ("select", OPPORTUNITY_COLUMNS.to_string()),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;
        Ok(Self::expect_success(response, "recent_opportunities")
            .await?
            .json::<Vec<Opportunity>>()
            .await?)
    }

    async fn keywords_with_emails(&self) -> Result<Vec<KeywordRecord>, StoreError> {
        let response = self
            .client
            .get(self.rows_url("keywords"))
            .query(&[("select", "user_id,term,profiles(email)")])
            .send()
            .await?;
        let rows = Self::expect_success(response, "keywords_with_emails")
            .await?
            .json::<Vec<KeywordRow>>()
            .await?;
        Ok(rows.into_iter().map(KeywordRecord::from).collect())
    }

    async fn keywords_for_user(&self, user_id: Uuid) -> Result<Vec<String>, StoreError> {
        let response = self
            .client
            .get(self.rows_url("keywords"))
            .query(&[("select", "term".to_string()), ("user_id", eq_filter(user_id))])
            .send()
            .await?;
        let rows = Self::expect_success(response, "keywords_for_user")
            .await?
            .json::<Vec<TermRow>>()
            .await?;
        Ok(rows.into_iter().map(|row| row.term).collect())
    }

    async fn add_keyword(&self, user_id: Uuid, term: &str) -> Result<(), StoreError> {
        // Uniqueness of (user, term) belongs to the store: duplicate inserts
        // are ignored there instead of being racily pre-checked here.
        let response = self
            .client
            .post(self.rows_url("keywords"))
            .query(&[("on_conflict", "user_id,term")])
            .header("Prefer", "resolution=ignore-duplicates")
            .json(&json!({ "user_id": user_id, "term": term }))
            .send()
            .await?;
        Self::expect_success(response, "add_keyword").await?;
        Ok(())
    }

    async fn remove_keyword(&self, user_id: Uuid, term: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.rows_url("keywords"))
            .query(&[("user_id", eq_filter(user_id)), ("term", eq_filter(term))])
            .send()
            .await?;
        Self::expect_success(response, "remove_keyword").await?;
        Ok(())
    }

    async fn saved_opportunity_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let response = self
            .client
            .get(self.rows_url("saved_opportunities"))
            .query(&[
                ("select", "opportunity_id".to_string()),
                ("user_id", eq_filter(user_id)),
            ])
            .send()
            .await?;
        let rows = Self::expect_success(response, "saved_opportunity_ids")
            .await?
            .json::<Vec<SavedRow>>()
            .await?;
        Ok(rows.into_iter().map(|row| row.opportunity_id).collect())
    }

    async fn save_opportunity(
        &self,
        user_id: Uuid,
        opportunity_id: Uuid,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.rows_url("saved_opportunities"))
            .query(&[("on_conflict", "user_id,opportunity_id")])
            .header("Prefer", "resolution=ignore-duplicates")
            .json(&json!({ "user_id": user_id, "opportunity_id": opportunity_id }))
            .send()
            .await?;
        Self::expect_success(response, "save_opportunity").await?;
        Ok(())
    }

    async fn unsave_opportunity(
        &self,
        user_id: Uuid,
        opportunity_id: Uuid,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.rows_url("saved_opportunities"))
            .query(&[
                ("user_id", eq_filter(user_id)),
                ("opportunity_id", eq_filter(opportunity_id)),
            ])
            .send()
            .await?;
        Self::expect_success(response, "unsave_opportunity").await?;
        Ok(())
    }
}

/// Auth client over the platform's user-identification endpoint.
#[derive(Debug, Clone)]
pub struct RestAuth {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestAuth {
    pub fn new(config: StoreConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .context("building auth http client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.service_key,
        })
    }
}

#[async_trait]
impl AuthProvider for RestAuth {
    async fn user_from_token(&self, token: &str) -> Result<AuthUser, AuthError> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AuthError::Unauthorized);
        }
        let response = response.error_for_status()?;
        Ok(response.json::<AuthUser>().await?)
    }
}
