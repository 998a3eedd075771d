//! Axum HTTP surface for Freelancer Hub: the notification trigger plus the
//! feed/keyword/favorite endpoints consumed by the browser frontend.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::rejection::JsonRejection,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use flhub_core::{matches_keywords, Opportunity};
use flhub_mailer::Mailer;
use flhub_notify::{NotificationService, NotifyError};
use flhub_store::{AuthError, AuthProvider, AuthUser, OpportunityStore, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

pub const CRATE_NAME: &str = "flhub-web";

/// How much of the feed one request returns; realtime inserts reach clients
/// through the platform's change stream, not through this endpoint.
const FEED_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OpportunityStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub mailer: Arc<dyn Mailer>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("missing or invalid bearer token")]
    Unauthorized,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::InvalidInput(message) => {
                (StatusCode::BAD_REQUEST, json!({ "error": message }))
            }
            ApiError::Unauthorized | ApiError::Auth(AuthError::Unauthorized) => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "missing or invalid bearer token" }),
            ),
            ApiError::Auth(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "auth collaborator failure", "details": err.to_string() }),
            ),
            ApiError::Store(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "store failure", "details": err.to_string() }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct NotifyRequest {
    #[serde(rename = "newOpportunityIds")]
    new_opportunity_ids: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
struct FeedQuery {
    filter: Option<String>,
}

#[derive(Debug, Serialize)]
struct FeedItem {
    #[serde(flatten)]
    opportunity: Opportunity,
    saved: bool,
}

#[derive(Debug, Deserialize)]
struct KeywordPayload {
    term: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/api/notify", post(notify_handler))
        .route("/api/feed", get(feed_handler))
        .route("/api/keywords", get(list_keywords_handler).post(add_keyword_handler))
        .route("/api/keywords/{term}", delete(remove_keyword_handler))
        .route(
            "/api/favorites/{opportunity_id}",
            put(save_opportunity_handler).delete(unsave_opportunity_handler),
        )
        .with_state(Arc::new(state))
}

pub async fn serve_from_env(state: AppState) -> anyhow::Result<()> {
    let addr = std::env::var("FLHUB_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "Freelancer Hub API listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({ "message": "Freelancer Hub API is running" }))
}

async fn notify_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NotifyRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(request) = payload
        .map_err(|rejection| ApiError::InvalidInput(format!("invalid payload: {rejection}")))?;

    let service =
        NotificationService::new(Arc::clone(&state.store), Arc::clone(&state.mailer));
    let summary = service
        .run(&request.new_opportunity_ids)
        .await
        .map_err(|err| match err {
            NotifyError::InvalidInput => ApiError::InvalidInput(
                "newOpportunityIds must be a non-empty list of identifiers".to_string(),
            ),
            NotifyError::Store(store_err) => ApiError::Store(store_err),
        })?;

    Ok(Json(json!({
        "message": "notification run complete",
        "notificationsSent": summary.notifications_sent,
    })))
}

async fn feed_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FeedQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<FeedItem>>, ApiError> {
    let user = identify(&state, &headers).await?;

    let opportunities = state.store.recent_opportunities(FEED_LIMIT).await?;
    let saved: HashSet<Uuid> = state
        .store
        .saved_opportunity_ids(user.id)
        .await?
        .into_iter()
        .collect();

    let filter_on = query.filter.as_deref() == Some("keywords");
    let terms = if filter_on {
        state.store.keywords_for_user(user.id).await?
    } else {
        Vec::new()
    };

    let items = opportunities
        .into_iter()
        .filter(|opportunity| {
            // With no terms registered the toggle filters nothing, matching
            // the frontend's behavior.
            !filter_on || terms.is_empty() || matches_keywords(opportunity, &terms)
        })
        .map(|opportunity| FeedItem {
            saved: saved.contains(&opportunity.id),
            opportunity,
        })
        .collect();

    Ok(Json(items))
}

async fn list_keywords_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<String>>, ApiError> {
    let user = identify(&state, &headers).await?;
    Ok(Json(state.store.keywords_for_user(user.id).await?))
}

async fn add_keyword_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<KeywordPayload>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let user = identify(&state, &headers).await?;
    let Json(payload) = payload
        .map_err(|rejection| ApiError::InvalidInput(format!("invalid payload: {rejection}")))?;

    let term = payload.term.trim();
    if term.is_empty() {
        return Err(ApiError::InvalidInput("term must not be blank".to_string()));
    }

    state.store.add_keyword(user.id, term).await?;
    Ok(StatusCode::CREATED)
}

async fn remove_keyword_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(term): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = identify(&state, &headers).await?;
    state.store.remove_keyword(user.id, &term).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn save_opportunity_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(opportunity_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user = identify(&state, &headers).await?;
    state.store.save_opportunity(user.id, opportunity_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unsave_opportunity_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(opportunity_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user = identify(&state, &headers).await?;
    state
        .store
        .unsave_opportunity(user.id, opportunity_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn identify(state: &AppState, headers: &HeaderMap) -> Result<AuthUser, ApiError> {
    let token = bearer_token(headers)?;
    Ok(state.auth.user_from_token(token).await?)
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use flhub_core::KeywordRecord;
    use flhub_mailer::DeliveryOutcome;
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tower::ServiceExt;

    const TOKEN: &str = "session-token";

    struct FakeStore {
        opportunities: Vec<Opportunity>,
        keywords: Vec<KeywordRecord>,
        saved: Vec<Uuid>,
    }

    #[async_trait]
    impl OpportunityStore for FakeStore {
        async fn opportunities_by_ids(
            &self,
            ids: &[Uuid],
        ) -> Result<Vec<Opportunity>, StoreError> {
            Ok(self
                .opportunities
                .iter()
                .filter(|o| ids.contains(&o.id))
                .cloned()
                .collect())
        }

        async fn recent_opportunities(
            &self,
            _limit: usize,
        ) -> Result<Vec<Opportunity>, StoreError> {
            Ok(self.opportunities.clone())
        }

        async fn keywords_with_emails(&self) -> Result<Vec<KeywordRecord>, StoreError> {
            Ok(self.keywords.clone())
        }

        async fn keywords_for_user(&self, user_id: Uuid) -> Result<Vec<String>, StoreError> {
            Ok(self
                .keywords
                .iter()
                .filter(|record| record.user_id == user_id)
                .map(|record| record.term.clone())
                .collect())
        }

        async fn add_keyword(&self, _user_id: Uuid, _term: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn remove_keyword(&self, _user_id: Uuid, _term: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn saved_opportunity_ids(&self, _user_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
            Ok(self.saved.clone())
        }

        async fn save_opportunity(
            &self,
            _user_id: Uuid,
            _opportunity_id: Uuid,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn unsave_opportunity(
            &self,
            _user_id: Uuid,
            _opportunity_id: Uuid,
        ) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct FakeAuth {
        user: AuthUser,
    }

    #[async_trait]
    impl AuthProvider for FakeAuth {
        async fn user_from_token(&self, token: &str) -> Result<AuthUser, AuthError> {
            if token == TOKEN {
                Ok(self.user.clone())
            } else {
                Err(AuthError::Unauthorized)
            }
        }
    }

    #[derive(Default)]
    struct FakeMailer {
        fail_all: bool,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Mailer for FakeMailer {
        async fn send_digest(
            &self,
            email: &str,
            _opportunities: &[Opportunity],
        ) -> DeliveryOutcome {
            if self.fail_all {
                return DeliveryOutcome::Failed {
                    reason: "provider down".to_string(),
                };
            }
            self.sent.lock().unwrap().push(email.to_string());
            DeliveryOutcome::Sent {
                id: "delivery-1".to_string(),
            }
        }
    }

    fn opportunity(id: u128, title: &str, description: Option<&str>) -> Opportunity {
        Opportunity {
            id: Uuid::from_u128(id),
            title: title.to_string(),
            description: description.map(str::to_string),
            source_url: format!("https://jobs.example.com/{id}"),
            platform: None,
            created_at: Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).single().unwrap(),
        }
    }

    fn keyword(user: u128, term: &str, email: &str) -> KeywordRecord {
        KeywordRecord {
            user_id: Uuid::from_u128(user),
            term: term.to_string(),
            email: Some(email.to_string()),
        }
    }

    fn test_state(store: FakeStore, mailer: FakeMailer) -> AppState {
        AppState {
            store: Arc::new(store),
            auth: Arc::new(FakeAuth {
                user: AuthUser {
                    id: Uuid::from_u128(1),
                    email: "a@x.com".to_string(),
                },
            }),
            mailer: Arc::new(mailer),
        }
    }

    fn default_store() -> FakeStore {
        FakeStore {
            opportunities: vec![
                opportunity(1, "Senior React Developer", Some("Remote, TypeScript")),
                opportunity(2, "Python Data Engineer", None),
            ],
            keywords: vec![
                keyword(1, "react", "a@x.com"),
                keyword(2, "python", "b@x.com"),
            ],
            saved: vec![Uuid::from_u128(2)],
        }
    }

    fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn authed_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn root_reports_service_status() {
        let app = app(test_state(default_store(), FakeMailer::default()));
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert!(body["message"].as_str().unwrap().contains("Freelancer Hub"));
    }

    #[tokio::test]
    async fn notify_rejects_missing_field() {
        let app = app(test_state(default_store(), FakeMailer::default()));
        let response = app
            .oneshot(json_request("POST", "/api/notify", r#"{}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response_json(response).await;
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn notify_rejects_empty_id_list() {
        let app = app(test_state(default_store(), FakeMailer::default()));
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/notify",
                r#"{"newOpportunityIds": []}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn notify_reports_zero_for_unresolved_ids() {
        let app = app(test_state(default_store(), FakeMailer::default()));
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/notify",
                r#"{"newOpportunityIds": ["00000000-0000-0000-0000-000000000099"]}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["notificationsSent"], 0);
    }

    #[tokio::test]
    async fn notify_counts_matched_users() {
        let state = test_state(default_store(), FakeMailer::default());
        let app = app(state);
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/notify",
                r#"{"newOpportunityIds": ["00000000-0000-0000-0000-000000000001"]}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["notificationsSent"], 1);
    }

    #[tokio::test]
    async fn notify_succeeds_even_when_every_delivery_fails() {
        let mailer = FakeMailer {
            fail_all: true,
            sent: Mutex::new(Vec::new()),
        };
        let app = app(test_state(default_store(), mailer));
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/notify",
                r#"{"newOpportunityIds": ["00000000-0000-0000-0000-000000000001"]}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["notificationsSent"], 1);
    }

    #[tokio::test]
    async fn feed_requires_identification() {
        let app = app(test_state(default_store(), FakeMailer::default()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/feed")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn feed_marks_saved_rows() {
        let app = app(test_state(default_store(), FakeMailer::default()));
        let response = app.oneshot(authed_request("GET", "/api/feed")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        let saved: Vec<bool> = rows.iter().map(|r| r["saved"].as_bool().unwrap()).collect();
        assert!(saved.contains(&true));
    }

    #[tokio::test]
    async fn feed_filter_applies_the_users_keywords() {
        let app = app(test_state(default_store(), FakeMailer::default()));
        let response = app
            .oneshot(authed_request("GET", "/api/feed?filter=keywords"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], "Senior React Developer");
    }

    #[tokio::test]
    async fn blank_keyword_is_rejected() {
        let app = app(test_state(default_store(), FakeMailer::default()));
        let request = Request::builder()
            .method("POST")
            .uri("/api/keywords")
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"term": "   "}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn favorite_toggle_round_trip() {
        let app = app(test_state(default_store(), FakeMailer::default()));
        let put_response = app
            .clone()
            .oneshot(authed_request(
                "PUT",
                "/api/favorites/00000000-0000-0000-0000-000000000001",
            ))
            .await
            .unwrap();
        assert_eq!(put_response.status(), StatusCode::NO_CONTENT);

        let delete_response = app
            .oneshot(authed_request(
                "DELETE",
                "/api/favorites/00000000-0000-0000-0000-000000000001",
            ))
            .await
            .unwrap();
        assert_eq!(delete_response.status(), StatusCode::NO_CONTENT);
    }
}
