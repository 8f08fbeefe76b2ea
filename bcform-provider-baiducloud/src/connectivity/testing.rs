//! Scripted transport for exercising handlers without network

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Method;

use super::client::{HttpRequest, HttpResponse, Transport};
use crate::error::BceResult;

struct Route {
    method: Method,
    path: String,
    responses: VecDeque<HttpResponse>,
}

/// Answers requests by method and path
///
/// Responses queued for a route are returned in order; the last one repeats.
/// Unknown routes answer 404 `NoSuchObject`.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, method: Method, path: &str, status: u16, body: serde_json::Value) -> &Self {
        let body = if body.is_null() {
            String::new()
        } else {
            body.to_string()
        };
        let response = HttpResponse::new(status, body);
        let mut routes = self.routes.lock().unwrap();
        match routes
            .iter_mut()
            .find(|r| r.method == method && r.path == path)
        {
            Some(route) => route.responses.push_back(response),
            None => routes.push(Route {
                method,
                path: path.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, method: Method, path: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path() == path)
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> BceResult<HttpResponse> {
        let path = request.path().to_string();
        let method = request.method.clone();
        self.requests.lock().unwrap().push(request);

        let mut routes = self.routes.lock().unwrap();
        let response = match routes
            .iter_mut()
            .find(|r| r.method == method && r.path == path)
        {
            Some(route) if route.responses.len() > 1 => route.responses.pop_front(),
            Some(route) => route.responses.front().cloned(),
            None => None,
        };
        Ok(response.unwrap_or_else(|| {
            HttpResponse::new(
                404,
                serde_json::json!({
                    "code": "NoSuchObject",
                    "message": format!("no route for {} {}", method, path),
                    "requestId": "fake"
                })
                .to_string(),
            )
        }))
    }
}
