//! API client for the task service.
//!
//! `ApiClient` is what front ends talk to. Authentication calls go out
//! anonymously; every task call goes through the [`AuthPipeline`], so the
//! caller never handles tokens.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::pipeline::{AuthPipeline, PipelineOptions, SessionEndReason, SessionEvent};
use super::request::{ApiRequest, ApiResponse};
use super::transport::HttpTransport;
use crate::auth::{FileTokenStore, SessionData, TokenStore};
use crate::config::Config;
use crate::models::{AuthResponse, Credentials, NewTask, Task, TaskUpdate, UserResponse};

// ============================================================================
// Endpoints
// ============================================================================

const LOGIN_PATH: &str = "/api/auth/login";
const REGISTER_PATH: &str = "/api/auth/register";
const TASKS_PATH: &str = "/api/tasks";

/// API client for the task service.
/// Clone is cheap - all state lives behind the shared pipeline.
#[derive(Clone)]
pub struct ApiClient {
    pipeline: Arc<AuthPipeline>,
}

impl ApiClient {
    pub fn new(pipeline: AuthPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    /// Build the production client: HTTP transport to the configured base
    /// URL and a session persisted in the cache directory.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(
            config.api_base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
        .context("Failed to build HTTP client")?;
        let store = FileTokenStore::open(config.cache_dir()?);
        if store.access_token().is_some() {
            debug!("Restored saved session");
        }

        let options = PipelineOptions {
            coalesce_refresh: config.coalesce_refresh,
        };
        Ok(Self::new(AuthPipeline::with_options(
            Arc::new(transport),
            Arc::new(store),
            options,
        )))
    }

    pub fn pipeline(&self) -> &AuthPipeline {
        &self.pipeline
    }

    /// Listen for session teardown (logout, failed refresh).
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.pipeline.subscribe()
    }

    /// Whether a live access token is held. Never touches the network.
    pub fn is_authenticated(&self) -> bool {
        self.pipeline.is_authenticated()
    }

    /// The user id stored at login, if logged in.
    pub fn user_id(&self) -> Option<String> {
        self.pipeline.store().user_id()
    }

    // ===== Authentication =====

    /// Authenticate and store the resulting session.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
        let request = ApiRequest::post(LOGIN_PATH).json(&Credentials::new(email, password))?;
        let response = self
            .pipeline
            .send_anonymous(&request)
            .await
            .context("Failed to send login request")?
            .error_for_status()
            .context("Login rejected")?;
        let auth: AuthResponse = response.json().context("Failed to parse login response")?;

        self.pipeline.store().set_session(SessionData::new(
            auth.access_token.clone(),
            auth.refresh_token.clone(),
            auth.user_id.clone(),
        ));
        info!(user_id = %auth.user_id, "Login successful");
        Ok(auth)
    }

    /// Create an account. Does not log in.
    pub async fn register(&self, email: &str, password: &str) -> Result<Option<UserResponse>> {
        let request = ApiRequest::post(REGISTER_PATH).json(&Credentials::new(email, password))?;
        let response = self
            .pipeline
            .send_anonymous(&request)
            .await
            .context("Failed to send registration request")?
            .error_for_status()
            .context("Registration rejected")?;
        info!("Registration successful");
        // The body is informational; some deployments answer with no content.
        Ok(response.json().ok())
    }

    /// Forget the session locally and notify subscribers.
    pub fn logout(&self) {
        self.pipeline.end_session(SessionEndReason::LoggedOut);
    }

    // ===== Tasks =====

    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        self.fetch(ApiRequest::get(TASKS_PATH)).await
    }

    pub async fn get_task(&self, id: &str) -> Result<Task> {
        self.fetch(ApiRequest::get(task_path(id))).await
    }

    pub async fn create_task(&self, task: &NewTask) -> Result<Task> {
        self.fetch(ApiRequest::post(TASKS_PATH).json(task)?).await
    }

    pub async fn update_task(&self, id: &str, update: &TaskUpdate) -> Result<Task> {
        self.fetch(ApiRequest::put(task_path(id)).json(update)?).await
    }

    /// Flip the completed flag.
    pub async fn toggle_complete(&self, id: &str) -> Result<Task> {
        self.fetch(ApiRequest::patch(format!("{}/complete", task_path(id))))
            .await
    }

    pub async fn delete_task(&self, id: &str) -> Result<()> {
        self.execute(ApiRequest::delete(task_path(id))).await?;
        Ok(())
    }

    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let description = format!("{} {}", request.method(), request.path());
        let response = self
            .pipeline
            .send(request)
            .await
            .with_context(|| format!("{} failed", description))?;
        response
            .error_for_status()
            .with_context(|| format!("{} failed", description))
    }

    async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let path = request.path().to_string();
        let response = self.execute(request).await?;
        response
            .json()
            .with_context(|| format!("Failed to parse JSON response from {}", path))
    }
}

fn task_path(id: &str) -> String {
    format!("{}/{}", TASKS_PATH, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::pipeline::REFRESH_PATH;
    use crate::api::ApiError;
    use crate::auth::MemoryTokenStore;
    use crate::clock::FixedClock;
    use crate::test_support::{fake_jwt, MockTransport};
    use reqwest::Method;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;

    fn client(transport: &Arc<MockTransport>, store: &Arc<MemoryTokenStore>) -> ApiClient {
        ApiClient::new(
            AuthPipeline::new(transport.clone(), store.clone())
                .with_clock(Arc::new(FixedClock::new(NOW))),
        )
    }

    fn task_json(id: i64, title: &str, completed: bool) -> serde_json::Value {
        json!({
            "id": id,
            "title": title,
            "description": "desc",
            "due_date": "2025-01-02",
            "completed": completed,
            "user_id": 7,
            "created_at": "2025-01-01T09:00:00",
            "updated_at": "2025-01-01T09:00:00"
        })
    }

    #[tokio::test]
    async fn test_login_refresh_replay_scenario() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(
            Method::POST,
            LOGIN_PATH,
            200,
            json!({"access_token": "T1", "refresh_token": "R1", "token_type": "bearer", "user_id": 7}),
        );
        transport.respond(Method::GET, TASKS_PATH, 401, json!({"detail": "Token expired"}));
        transport.respond(Method::GET, TASKS_PATH, 200, json!([task_json(1, "Buy milk", false)]));
        transport.respond(
            Method::POST,
            REFRESH_PATH,
            200,
            json!({"access_token": "T2", "refresh_token": "R1", "token_type": "bearer", "user_id": 7}),
        );
        let store = Arc::new(MemoryTokenStore::new());
        let client = client(&transport, &store);

        let auth = client.login("a@b.com", "x").await.expect("login");
        assert_eq!(auth.user_id, "7");
        assert_eq!(store.access_token().as_deref(), Some("T1"));
        assert_eq!(client.user_id().as_deref(), Some("7"));
        assert_eq!(
            transport.bodies_for(Method::POST, LOGIN_PATH),
            vec![Some(json!({"email": "a@b.com", "password": "x"}))]
        );

        let tasks = client.list_tasks().await.expect("tasks");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Buy milk");

        assert_eq!(
            transport.bodies_for(Method::POST, REFRESH_PATH),
            vec![Some(json!({"refresh_token": "R1"}))]
        );
        assert_eq!(
            transport.bearers_for(Method::GET, TASKS_PATH),
            vec![Some("T1".to_string()), Some("T2".to_string())]
        );
        assert_eq!(store.access_token().as_deref(), Some("T2"));
    }

    #[tokio::test]
    async fn test_login_failure_leaves_store_empty() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(Method::POST, LOGIN_PATH, 401, json!({"detail": "Incorrect email or password"}));
        let store = Arc::new(MemoryTokenStore::new());

        let err = client(&transport, &store).login("a@b.com", "bad").await.unwrap_err();

        assert_eq!(
            err.downcast_ref::<ApiError>(),
            Some(&ApiError::Unauthorized("Incorrect email or password".into()))
        );
        assert!(store.snapshot().is_none());
        assert_eq!(transport.calls_to(Method::POST, REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn test_login_is_sent_without_bearer() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(
            Method::POST,
            LOGIN_PATH,
            200,
            json!({"access_token": "T9", "refresh_token": "R9", "token_type": "bearer", "user_id": 9}),
        );
        let store = Arc::new(MemoryTokenStore::with_session(SessionData::new("T1", "R1", "7")));

        client(&transport, &store).login("a@b.com", "x").await.expect("login");

        assert_eq!(transport.bearers_for(Method::POST, LOGIN_PATH), vec![None]);
        assert_eq!(store.refresh_token().as_deref(), Some("R9"));
        assert_eq!(store.user_id().as_deref(), Some("9"));
    }

    #[tokio::test]
    async fn test_register_has_no_session_side_effect() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(Method::POST, REGISTER_PATH, 201, json!({"id": 3, "email": "a@b.com"}));
        let store = Arc::new(MemoryTokenStore::new());

        let user = client(&transport, &store)
            .register("a@b.com", "Secr3t!pw")
            .await
            .expect("registered");

        assert_eq!(user.map(|u| u.id).as_deref(), Some("3"));
        assert!(store.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_register_conflict_surfaces_detail() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(Method::POST, REGISTER_PATH, 422, json!({"detail": "Email already registered"}));
        let store = Arc::new(MemoryTokenStore::new());

        let err = client(&transport, &store).register("a@b.com", "pw").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ApiError>(),
            Some(&ApiError::Validation("Email already registered".into()))
        );
    }

    #[tokio::test]
    async fn test_task_crud_routes() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(Method::POST, TASKS_PATH, 201, task_json(5, "New", false));
        transport.respond(Method::GET, "/api/tasks/5", 200, task_json(5, "New", false));
        transport.respond(Method::PUT, "/api/tasks/5", 200, task_json(5, "Renamed", false));
        transport.respond(Method::PATCH, "/api/tasks/5/complete", 200, task_json(5, "Renamed", true));
        transport.respond(Method::DELETE, "/api/tasks/5", 204, json!(null));
        let store = Arc::new(MemoryTokenStore::with_session(SessionData::new("T1", "R1", "7")));
        let client = client(&transport, &store);

        let created = client
            .create_task(&NewTask {
                title: "New".into(),
                description: "desc".into(),
                due_date: "2025-01-02".into(),
            })
            .await
            .expect("created");
        assert_eq!(created.id, "5");

        assert_eq!(client.get_task("5").await.expect("fetched").title, "New");

        let update = TaskUpdate {
            title: Some("Renamed".into()),
            ..Default::default()
        };
        assert_eq!(client.update_task("5", &update).await.expect("updated").title, "Renamed");
        assert_eq!(
            transport.bodies_for(Method::PUT, "/api/tasks/5"),
            vec![Some(json!({"title": "Renamed"}))]
        );

        assert!(client.toggle_complete("5").await.expect("toggled").completed);
        client.delete_task("5").await.expect("deleted");

        assert!(transport
            .requests()
            .iter()
            .all(|r| r.bearer.as_deref() == Some("T1")));
    }

    #[tokio::test]
    async fn test_not_found_is_typed() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(Method::DELETE, "/api/tasks/404", 404, json!({"detail": "Task not found"}));
        let store = Arc::new(MemoryTokenStore::with_session(SessionData::new("T1", "R1", "7")));

        let err = client(&transport, &store).delete_task("404").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ApiError>(),
            Some(&ApiError::NotFound("Task not found".into()))
        );
        assert!(store.snapshot().is_some());
    }

    #[tokio::test]
    async fn test_unrecoverable_401_ends_session() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(Method::GET, TASKS_PATH, 401, json!({"detail": "Not authenticated"}));
        let store = Arc::new(MemoryTokenStore::new());
        let client = client(&transport, &store);
        let mut events = client.subscribe();

        let err = client.list_tasks().await.unwrap_err();

        assert!(err.downcast_ref::<ApiError>().is_some_and(ApiError::is_unauthorized));
        assert_eq!(
            events.try_recv().expect("event"),
            SessionEvent::Ended { reason: SessionEndReason::MissingRefreshToken }
        );
    }

    #[tokio::test]
    async fn test_logout_clears_and_notifies() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryTokenStore::with_session(SessionData::new(
            fake_jwt("7", NOW + 600),
            "R1",
            "7",
        )));
        let client = client(&transport, &store);
        let mut events = client.subscribe();
        assert!(client.is_authenticated());

        client.logout();
        client.logout();

        assert!(!client.is_authenticated());
        assert!(client.user_id().is_none());
        assert_eq!(
            events.try_recv().expect("event"),
            SessionEvent::Ended { reason: SessionEndReason::LoggedOut }
        );
        assert!(transport.requests().is_empty());
    }
}
