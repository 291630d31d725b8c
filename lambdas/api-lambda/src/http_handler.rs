use assignment_shared::error::HandlerError;
use assignment_shared::token::{self, TokenError};
use assignment_shared::types::RequestContext;
use assignment_shared::AppState;
use lambda_http::{http::StatusCode, Body, Error, Request, Response};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

use crate::routes::{parse_path, ParsedPath, ResolveError, RouteTable};

/// `user` operations reachable without a bearer token
const PUBLIC_USER_OPERATIONS: &[&str] = &[
    "login",
    "signup",
    "paymentprocess",
    "passwordreset",
    "chatbot",
    "workshopsignup",
];

/// Every way a request can fail before or during its handler
#[derive(Debug, Error)]
pub(crate) enum DispatchError {
    #[error(transparent)]
    Auth(#[from] TokenError),
    #[error(transparent)]
    Config(ResolveError),
    #[error(transparent)]
    RouteNotFound(ResolveError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

impl From<ResolveError> for DispatchError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NoMatch { .. } => DispatchError::RouteNotFound(err),
            other => DispatchError::Config(other),
        }
    }
}

impl DispatchError {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            DispatchError::Auth(_) => "auth",
            DispatchError::Config(_) => "config",
            DispatchError::RouteNotFound(_) => "route_not_found",
            DispatchError::Handler(_) => "handler",
        }
    }
}

fn is_public(path: &ParsedPath) -> bool {
    path.module.as_deref() == Some("user")
        && path
            .operation
            .as_deref()
            .is_some_and(|op| PUBLIC_USER_OPERATIONS.contains(&op))
}

fn authorization(event: &Request) -> Option<&str> {
    event
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
}

async fn dispatch(
    event: Request,
    state: &AppState,
    routes: &RouteTable,
) -> Result<Value, DispatchError> {
    let path = parse_path(event.uri().path());

    let claims = if is_public(&path) {
        None
    } else {
        let bearer = token::bearer_token(authorization(&event))?;
        Some(token::verify(bearer, &state.config.jwt_secret)?)
    };

    let route = routes.resolve(&path, event.method().as_str())?;
    tracing::info!(
        "Dispatching {} /{} to {:?}",
        event.method(),
        path.normalized,
        route.handler
    );

    let ctx = RequestContext::new(event, claims);
    Ok(route.handler.invoke(state, &ctx).await?)
}

fn preflight() -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET,POST,OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type,Authorization")
        .body(Body::Empty)
        .map_err(Box::new)?)
}

fn json_response(status: StatusCode, body: &Value) -> Result<Response<Body>, Error> {
    let builder = Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*");
    let builder = if status.is_success() {
        builder
            .header("Access-Control-Allow-Methods", "GET,POST,OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type,Authorization")
    } else {
        builder
            .header("Access-Control-Allow-Methods", "*")
            .header("Access-Control-Allow-Headers", "*")
    };
    Ok(builder.body(body.to_string().into()).map_err(Box::new)?)
}

/// Main Lambda handler - authenticates and routes through the mapping
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
    routes: Arc<RouteTable>,
) -> Result<Response<Body>, Error> {
    tracing::info!(
        "🚀 API Lambda invoked - Method: {} Path: {}",
        event.method(),
        event.uri().path()
    );

    if event.method() == "OPTIONS" {
        return preflight();
    }

    match dispatch(event, &state, &routes).await {
        Ok(body) => json_response(StatusCode::OK, &body),
        Err(e) => {
            tracing::error!("❌ Request failed ({}): {}", e.kind(), e);
            json_response(StatusCode::UNAUTHORIZED, &json!({ "error": e.to_string() }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assignment_shared::records::{BATCH_TABLE, ROLES_TABLE};
    use assignment_shared::testing::{row, TestHarness, TEST_SECRET};
    use assignment_shared::token::{Claims, Role};
    use crate::routes::EMBEDDED_MAPPING;
    use chrono::Utc;

    fn request(method: &str, path: &str, auth: Option<&str>, body: &str) -> Request {
        let mut builder = lambda_http::http::Request::builder().method(method).uri(path);
        if let Some(auth) = auth {
            builder = builder.header("Authorization", auth);
        }
        let body = if body.is_empty() {
            Body::Empty
        } else {
            Body::Text(body.to_string())
        };
        builder.body(body).unwrap()
    }

    fn bearer(exp_offset: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            email: "a@x.com".to_string(),
            role: Role::Admin,
            exp: now + exp_offset,
            iat: Some(now),
        };
        format!("Bearer {}", token::issue(&claims, TEST_SECRET).unwrap())
    }

    fn harness() -> TestHarness {
        let harness = TestHarness::new();
        harness
            .records
            .insert(BATCH_TABLE, row(&[("BatchName", "B1"), ("email", "a@x.com")]));
        harness
            .records
            .insert(ROLES_TABLE, row(&[("user_id", "a@x.com"), ("role", "admin")]));
        harness
    }

    async fn call(harness: &TestHarness, event: Request) -> (StatusCode, Value) {
        let routes = Arc::new(RouteTable::from_json(EMBEDDED_MAPPING).unwrap());
        let response = function_handler(event, harness.state(), routes).await.unwrap();
        let status = response.status();
        let body = match response.body() {
            Body::Text(text) => serde_json::from_str(text).unwrap(),
            Body::Empty => Value::Null,
            Body::Binary(bytes) => serde_json::from_slice(bytes).unwrap(),
        };
        (status, body)
    }

    #[tokio::test]
    async fn test_options_preflight() {
        let harness = harness();
        let (status, body) = call(&harness, request("OPTIONS", "/anything/at/all", None, "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn test_public_routes_skip_token() {
        let harness = harness();
        harness.identity.allow("a@x.com", "pw");

        let event = request(
            "POST",
            "/user/login",
            None,
            r#"{"email": "a@x.com", "password": "pw"}"#,
        );
        let (status, body) = call(&harness, event).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "admin");

        // allowlisted but unmapped: fails on routing, not on auth
        let (status, body) = call(&harness, request("POST", "/user/chatbot", None, "")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("API 'chatbot' not found in module 'user'"));
    }

    #[tokio::test]
    async fn test_protected_routes_require_valid_token() {
        let harness = harness();

        let (status, body) = call(&harness, request("GET", "/batch/list", None, "")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Authorization header is missing or invalid");

        let (status, body) = call(&harness, request("GET", "/batch/list", Some("Token abc"), "")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Authorization header is missing or invalid");

        let (status, body) = call(&harness, request("GET", "/batch/list", Some("Bearer abc.def.ghi"), "")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid token");

        let expired = bearer(-60);
        let (status, body) = call(&harness, request("GET", "/batch/list", Some(&expired), "")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Token has expired");

        let valid = bearer(3600);
        let (status, body) = call(&harness, request("GET", "/batch/list", Some(&valid), "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"B1": ["a@x.com"]}));
    }

    #[tokio::test]
    async fn test_routing_failures_are_401() {
        let harness = harness();
        let valid = bearer(3600);

        let (status, body) = call(&harness, request("GET", "/unknown/list", Some(&valid), "")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains("Available modules"));

        let (status, body) = call(&harness, request("POST", "/batch/list", Some(&valid), "")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            body["error"],
            "No matching API found for path: batch/list and method: POST"
        );
    }

    #[tokio::test]
    async fn test_handler_failures_are_401() {
        let harness = harness();
        let valid = bearer(3600);

        let (status, body) = call(&harness, request("POST", "/assignment/upload", Some(&valid), "")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid request body: Missing body in event");
    }

    #[test]
    fn test_error_kinds() {
        let not_found = ResolveError::NoMatch {
            path: "a/b".to_string(),
            method: "GET".to_string(),
        };
        assert_eq!(DispatchError::from(not_found).kind(), "route_not_found");
        let unknown = ResolveError::UnknownModule {
            module: "a".to_string(),
            available: vec![],
        };
        assert_eq!(DispatchError::from(unknown).kind(), "config");
        assert_eq!(DispatchError::from(TokenError::Expired).kind(), "auth");
    }
}
