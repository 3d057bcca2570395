//! Shared fixtures for unit tests: a scripted transport and token forging.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

use crate::api::request::{ApiRequest, ApiResponse};
use crate::api::transport::Transport;
use crate::api::ApiError;

/// Build an unsigned JWT-shaped token with the given subject and expiry.
pub fn fake_jwt(sub: &str, exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({ "sub": sub, "exp": exp }).to_string());
    format!("{}.{}.signature", header, payload)
}

type Scripted = Result<ApiResponse, ApiError>;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

/// Transport that answers from per-route queues and records every request.
///
/// Each route pops its queue in order; the last entry stays and answers all
/// further calls. Every call yields once before returning so that
/// concurrently driven requests interleave the way real network calls do.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Scripted>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, method: Method, path: &str, status: u16, body: Value) {
        let status = StatusCode::from_u16(status).expect("valid status code");
        self.script(method, path, Ok(ApiResponse::new(status, body.to_string())));
    }

    pub fn fail(&self, method: Method, path: &str, error: ApiError) {
        self.script(method, path, Err(error));
    }

    fn script(&self, method: Method, path: &str, outcome: Scripted) {
        self.routes
            .lock()
            .expect("routes lock")
            .entry((method, path.to_string()))
            .or_default()
            .push_back(outcome);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn calls_to(&self, method: Method, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    pub fn bearers_for(&self, method: Method, path: &str) -> Vec<Option<String>> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .map(|r| r.bearer)
            .collect()
    }

    pub fn bodies_for(&self, method: Method, path: &str) -> Vec<Option<Value>> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .map(|r| r.body)
            .collect()
    }

    fn next(&self, method: &Method, path: &str) -> Scripted {
        let mut routes = self.routes.lock().expect("routes lock");
        let Some(queue) = routes.get_mut(&(method.clone(), path.to_string())) else {
            return Err(ApiError::Network(format!("no mock for {} {}", method, path)));
        };
        if queue.len() > 1 {
            queue.pop_front().expect("non-empty queue")
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(ApiError::Network(format!("no mock for {} {}", method, path))))
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.requests.lock().expect("requests lock").push(RecordedRequest {
            method: request.method().clone(),
            path: request.path().to_string(),
            bearer: request.bearer().map(String::from),
            body: request.body().cloned(),
        });
        let outcome = self.next(request.method(), request.path());
        tokio::task::yield_now().await;
        outcome
    }
}
