use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Admin,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Role::Student),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Admin => "admin",
        }
    }
}

/// Decoded bearer token payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub email: String,
    pub role: Role,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Authorization header is missing or invalid")]
    MissingHeader,
    #[error("Invalid token")]
    Invalid,
    #[error("Token has expired")]
    Expired,
}

/// Pull the token out of an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: Option<&str>) -> Result<&str, TokenError> {
    let value = header.ok_or(TokenError::MissingHeader)?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or(TokenError::MissingHeader)?
        .split(' ')
        .next()
        .unwrap_or("");
    if token.is_empty() {
        return Err(TokenError::MissingHeader);
    }
    Ok(token)
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation
}

/// Verify an HS256 token against the current clock and return its claims
pub fn verify(token: &str, secret: &str) -> Result<Claims, TokenError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid,
    })
}

/// Sign claims into an HS256 token
pub fn issue(claims: &Claims, secret: &str) -> Result<String, TokenError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| TokenError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use chrono::Utc;

    const SECRET: &str = "test-secret";

    fn claims(exp_offset: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            email: "a@x.com".to_string(),
            role: Role::Student,
            exp: now + exp_offset,
            iat: Some(now),
        }
    }

    #[test]
    fn test_issued_token_verifies() {
        let claims = claims(3600);
        let token = issue(&claims, SECRET).unwrap();
        assert_eq!(verify(&token, SECRET).unwrap(), claims);
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = issue(&claims(-60), SECRET).unwrap();
        assert_eq!(verify(&token, SECRET), Err(TokenError::Expired));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = issue(&claims(3600), SECRET).unwrap();
        assert_eq!(verify(&token, "other"), Err(TokenError::Invalid));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let original = claims(3600);
        let token = issue(&original, SECRET).unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&Claims {
                role: Role::Admin,
                ..original
            })
            .unwrap(),
        );
        let parts: Vec<&str> = token.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        assert_eq!(verify(&forged, SECRET), Err(TokenError::Invalid));
    }

    #[test]
    fn test_malformed_token_rejected() {
        assert_eq!(verify("not-a-token", SECRET), Err(TokenError::Invalid));
        assert_eq!(verify("a.b.c.d", SECRET), Err(TokenError::Invalid));
    }

    #[test]
    fn test_non_hs256_header_rejected() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims(3600)).unwrap());
        let token = format!("{}.{}.", header, payload);
        assert_eq!(verify(&token, SECRET), Err(TokenError::Invalid));

        let hs512 = encode(
            &Header::new(Algorithm::HS512),
            &claims(3600),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert_eq!(verify(&hs512, SECRET), Err(TokenError::Invalid));
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(Some("Bearer abc.def.ghi")), Ok("abc.def.ghi"));
        assert_eq!(bearer_token(None), Err(TokenError::MissingHeader));
        assert_eq!(bearer_token(Some("Basic xyz")), Err(TokenError::MissingHeader));
        assert_eq!(bearer_token(Some("Bearer ")), Err(TokenError::MissingHeader));
    }
}
