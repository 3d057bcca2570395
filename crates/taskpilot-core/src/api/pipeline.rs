//! Authenticated request pipeline.
//!
//! Every call to the task API goes through [`AuthPipeline::send`]:
//!
//! 1. Outbound, the current access token (if any) is attached as a bearer
//!    credential. An expired token is still attached; the server decides.
//! 2. Inbound, anything but a 401 goes straight back to the caller.
//! 3. A 401 on the first attempt runs the refresh protocol: exchange the
//!    refresh token for a new access token, then replay the request exactly
//!    once. Whatever the replay returns, including another 401, is final.
//! 4. If there is no refresh token, or the refresh call fails, the session
//!    is torn down and a [`SessionEvent::Ended`] is broadcast so the UI can
//!    send the user back to login.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use super::request::{ApiRequest, ApiResponse, PendingRequest};
use super::transport::Transport;
use super::ApiError;
use crate::auth::TokenStore;
use crate::clock::{Clock, SystemClock};
use crate::models::{RefreshRequest, RefreshResponse};

/// Token refresh endpoint. Called without bearer credentials.
pub const REFRESH_PATH: &str = "/api/auth/refresh";

/// Buffered session events per subscriber before old ones are dropped.
const EVENT_BUFFER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    /// The user logged out.
    LoggedOut,
    /// A request was rejected and there was no refresh token to recover with.
    MissingRefreshToken,
    /// The refresh call itself failed.
    RefreshFailed,
}

impl std::fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEndReason::LoggedOut => write!(f, "logged out"),
            SessionEndReason::MissingRefreshToken => write!(f, "no refresh token"),
            SessionEndReason::RefreshFailed => write!(f, "token refresh failed"),
        }
    }
}

/// Application-level session signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The stored session was cleared; the user has to authenticate again.
    Ended { reason: SessionEndReason },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    /// Serialize refreshes behind one latch. A 401 handler that finds the
    /// token already rotated by a concurrent refresh replays with the new
    /// token instead of refreshing again.
    pub coalesce_refresh: bool,
}

pub struct AuthPipeline {
    transport: Arc<dyn Transport>,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<SessionEvent>,
    refresh_latch: Option<Mutex<()>>,
}

impl AuthPipeline {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn TokenStore>) -> Self {
        Self::with_options(transport, store, PipelineOptions::default())
    }

    pub fn with_options(
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
        options: PipelineOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            transport,
            store,
            clock: Arc::new(SystemClock),
            events,
            refresh_latch: options.coalesce_refresh.then(|| Mutex::new(())),
        }
    }

    /// Replace the clock used for expiry checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Listen for session events. Each subscriber sees events sent after it
    /// subscribed.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Whether a live access token is held. Never touches the network.
    pub fn is_authenticated(&self) -> bool {
        self.store.is_valid(self.clock.as_ref())
    }

    /// Send `request` with bearer injection and refresh-and-retry-once.
    ///
    /// Returns `Ok` with any response that is not a recovered 401, so callers
    /// see 4xx/5xx statuses (and terminal 401s) as responses. Returns `Err`
    /// for transport failures and for a failed refresh.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let pending = PendingRequest::new(request);
        let token = self.store.access_token();
        let response = self.dispatch(&pending, token.as_deref()).await?;

        if !response.is_unauthorized() {
            return Ok(response);
        }
        match pending.into_replay() {
            Some(replay) => self.recover(replay, token, response).await,
            None => Ok(response),
        }
    }

    /// Send `request` exactly as given: no bearer, no refresh protocol.
    /// Used for login, registration and the refresh call itself.
    pub async fn send_anonymous(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.transport.send(request).await
    }

    /// Clear the session and tell subscribers it is over.
    pub fn end_session(&self, reason: SessionEndReason) {
        self.store.clear_session();
        info!(%reason, "Session ended");
        // No subscribers is fine; nobody is waiting to redirect.
        let _ = self.events.send(SessionEvent::Ended { reason });
    }

    /// Exchange `refresh_token` for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let request = ApiRequest::post(REFRESH_PATH).json(&RefreshRequest {
            refresh_token: refresh_token.to_string(),
        })?;
        let response = self.send_anonymous(&request).await?.error_for_status()?;
        let refreshed: RefreshResponse = response.json()?;
        if refreshed.access_token.is_empty() {
            return Err(ApiError::InvalidResponse("refresh returned an empty access token".into()));
        }
        Ok(refreshed)
    }

    async fn dispatch(
        &self,
        pending: &PendingRequest,
        token: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let request = pending.request().authorized(token)?;
        debug!(
            method = %request.method(),
            path = request.path(),
            attempt = ?pending.attempt(),
            authenticated = token.is_some(),
            "Sending request"
        );
        self.transport.send(&request).await
    }

    /// Handle a first-attempt 401. `stale` is the token that was rejected.
    async fn recover(
        &self,
        replay: PendingRequest,
        stale: Option<String>,
        unauthorized: ApiResponse,
    ) -> Result<ApiResponse, ApiError> {
        let latch_guard = match &self.refresh_latch {
            Some(latch) => {
                let guard = latch.lock().await;
                if let Some(current) = self.store.access_token() {
                    if stale.as_deref() != Some(current.as_str()) {
                        debug!(path = replay.request().path(), "Token already rotated, replaying");
                        drop(guard);
                        return self.dispatch(&replay, Some(&current)).await;
                    }
                }
                Some(guard)
            }
            None => None,
        };

        let Some(refresh_token) = self.store.refresh_token() else {
            warn!(path = replay.request().path(), "Unauthorized with no refresh token");
            self.teardown(stale.as_deref(), SessionEndReason::MissingRefreshToken);
            return Ok(unauthorized);
        };

        debug!(path = replay.request().path(), "Access token rejected, refreshing");
        let refreshed = match self.refresh(&refresh_token).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                self.teardown(stale.as_deref(), SessionEndReason::RefreshFailed);
                return Err(e);
            }
        };

        if !self.store.replace_access_token(refreshed.access_token.clone()) {
            // Torn down while the refresh was in flight; don't resurrect it.
            warn!("Session ended during refresh, discarding new token");
            return Ok(unauthorized);
        }
        drop(latch_guard);

        info!("Access token refreshed");
        self.dispatch(&replay, Some(&refreshed.access_token)).await
    }

    /// End the session after an unrecoverable 401. A request that went out
    /// with a token and now finds the store empty lost a race with another
    /// teardown; that one already notified subscribers.
    fn teardown(&self, stale: Option<&str>, reason: SessionEndReason) {
        if stale.is_some() && self.store.access_token().is_none() {
            debug!(%reason, "Session already ended by a concurrent request");
            return;
        }
        self.end_session(reason);
    }
}
