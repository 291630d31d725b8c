use lambda_http::{Body, Request};
use serde::de::DeserializeOwned;

use crate::error::HandlerError;
use crate::token::Claims;

/// What a dispatched handler receives
pub struct RequestContext {
    pub request: Request,
    pub claims: Option<Claims>,
}

impl RequestContext {
    pub fn new(request: Request, claims: Option<Claims>) -> Self {
        Self { request, claims }
    }

    /// Claims of the caller; authenticated routes always carry them
    pub fn claims(&self) -> Result<&Claims, HandlerError> {
        self.claims.as_ref().ok_or(HandlerError::MissingClaims)
    }

    pub fn body_str(&self) -> &str {
        match self.request.body() {
            Body::Text(text) => text,
            Body::Binary(bytes) => std::str::from_utf8(bytes).unwrap_or(""),
            Body::Empty => "",
        }
    }

    /// Parse the JSON request body
    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        let body = self.body_str();
        if body.trim().is_empty() {
            return Err(HandlerError::BadRequest("Missing body in event".to_string()));
        }
        serde_json::from_str(body).map_err(|e| {
            tracing::error!("Failed to parse request body: {}", e);
            HandlerError::BadRequest(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Payload {
        topic: String,
    }

    fn context(body: Body) -> RequestContext {
        let request = lambda_http::http::Request::builder()
            .uri("/assignment/generate")
            .body(body)
            .unwrap();
        RequestContext::new(request, None)
    }

    #[test]
    fn test_json_body_parses_text_and_binary() {
        let ctx = context(Body::Text(r#"{"topic": "Rust"}"#.to_string()));
        assert_eq!(ctx.json_body::<Payload>().unwrap().topic, "Rust");

        let ctx = context(Body::Binary(br#"{"topic": "Go"}"#.to_vec()));
        assert_eq!(ctx.json_body::<Payload>().unwrap().topic, "Go");
    }

    #[test]
    fn test_json_body_rejects_empty_and_invalid() {
        let ctx = context(Body::Empty);
        assert!(matches!(ctx.json_body::<Payload>(), Err(HandlerError::BadRequest(_))));

        let ctx = context(Body::Text("{".to_string()));
        assert!(matches!(ctx.json_body::<Payload>(), Err(HandlerError::BadRequest(_))));
    }

    #[test]
    fn test_claims_required() {
        let ctx = context(Body::Empty);
        assert!(matches!(ctx.claims(), Err(HandlerError::MissingClaims)));
    }
}
