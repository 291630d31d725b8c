use async_trait::async_trait;
use aws_sdk_cognitoidentityprovider::types::{AttributeType, AuthFlowType};
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;

use crate::error::{HandlerError, IdentityError};
use crate::token::{self, Claims, Role};
use crate::types::RequestContext;
use crate::AppState;

#[derive(Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Narrow interface over the user pool
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, email: &str, password: &str) -> Result<(), IdentityError>;
    async fn register(&self, email: &str, password: &str) -> Result<(), IdentityError>;
}

type HmacSha256 = Hmac<Sha256>;

/// Compute the SECRET_HASH for Cognito authentication
fn compute_secret_hash(username: &str, client_id: &str, client_secret: &str) -> String {
    let message = format!("{}{}", username, client_id);
    let mut mac = HmacSha256::new_from_slice(client_secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    let result = mac.finalize();
    general_purpose::STANDARD.encode(result.into_bytes())
}

/// Cognito user pool app client
pub struct CognitoIdentity {
    client: CognitoClient,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl CognitoIdentity {
    pub fn new(client: CognitoClient, client_id: Option<String>, client_secret: Option<String>) -> Self {
        Self {
            client,
            client_id,
            client_secret,
        }
    }

    fn client_id(&self) -> Result<&str, IdentityError> {
        self.client_id.as_deref().ok_or(IdentityError::NotConfigured)
    }

    fn secret_hash(&self, email: &str, client_id: &str) -> Option<String> {
        self.client_secret
            .as_deref()
            .map(|secret| compute_secret_hash(email, client_id, secret))
    }
}

fn login_failure_message(error_message: &str) -> &'static str {
    if error_message.contains("NotAuthorizedException") {
        "Incorrect email or password"
    } else if error_message.contains("UserNotConfirmedException") {
        "Please verify your email before logging in"
    } else if error_message.contains("UserNotFoundException") {
        "No account found with this email"
    } else if error_message.contains("PasswordResetRequiredException") {
        "Password reset required"
    } else if error_message.contains("TooManyRequestsException") {
        "Too many login attempts. Please try again later"
    } else {
        "Login failed. Please check your credentials"
    }
}

fn signup_failure_message(error_message: &str) -> &'static str {
    if error_message.contains("InvalidPasswordException") {
        "Password must contain at least 8 characters with uppercase, lowercase, number, and special character"
    } else if error_message.contains("UsernameExistsException") {
        "An account with this email already exists"
    } else if error_message.contains("InvalidParameterException") {
        "Invalid email or password format"
    } else {
        "Signup failed. Please check your credentials and try again."
    }
}

#[async_trait]
impl IdentityProvider for CognitoIdentity {
    async fn authenticate(&self, email: &str, password: &str) -> Result<(), IdentityError> {
        let client_id = self.client_id()?;

        let mut request = self
            .client
            .initiate_auth()
            .auth_flow(AuthFlowType::UserPasswordAuth)
            .client_id(client_id)
            .auth_parameters("USERNAME", email)
            .auth_parameters("PASSWORD", password);
        if let Some(hash) = self.secret_hash(email, client_id) {
            request = request.auth_parameters("SECRET_HASH", hash);
        }

        match request.send().await {
            Ok(response) if response.authentication_result().is_some() => {
                tracing::info!("Authentication successful for user: {}", email);
                Ok(())
            }
            Ok(_) => {
                tracing::error!("No authentication result returned");
                Err(IdentityError::Rejected(
                    "No authentication result returned".to_string(),
                ))
            }
            Err(e) => {
                let error_message = format!("{:?}", e);
                tracing::error!("Cognito authentication error: {}", error_message);
                Err(IdentityError::Rejected(
                    login_failure_message(&error_message).to_string(),
                ))
            }
        }
    }

    async fn register(&self, email: &str, password: &str) -> Result<(), IdentityError> {
        let client_id = self.client_id()?;

        let email_attribute = AttributeType::builder()
            .name("email")
            .value(email)
            .build()
            .map_err(|e| IdentityError::Rejected(format!("Invalid email attribute: {}", e)))?;

        let result = self
            .client
            .sign_up()
            .client_id(client_id)
            .username(email)
            .password(password)
            .set_secret_hash(self.secret_hash(email, client_id))
            .user_attributes(email_attribute)
            .send()
            .await;

        match result {
            Ok(_) => {
                tracing::info!("Signup successful for user: {}", email);
                Ok(())
            }
            Err(e) => {
                let error_message = format!("{:?}", e);
                tracing::error!("Cognito signup error: {}", error_message);
                Err(IdentityError::Rejected(
                    signup_failure_message(&error_message).to_string(),
                ))
            }
        }
    }
}

fn credentials(ctx: &RequestContext) -> Result<CredentialsRequest, HandlerError> {
    let request: CredentialsRequest = ctx.json_body()?;
    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(HandlerError::BadRequest(
            "Email and password are required".to_string(),
        ));
    }
    Ok(request)
}

/// Authenticate against the user pool and issue an application token
pub async fn login(state: &AppState, ctx: &RequestContext) -> Result<Value, HandlerError> {
    let request = credentials(ctx)?;
    let email = request.email.trim();
    tracing::info!("Authenticating user: {}", email);

    state.identity.authenticate(email, &request.password).await?;

    let now = Utc::now();
    if let Err(e) = state.records.touch_last_login(email, &now.to_rfc3339()).await {
        tracing::warn!("Failed to record last login for {}: {}", email, e);
    }

    let role_name = state.records.role_for(email).await?;
    let role = Role::parse(&role_name).ok_or(HandlerError::UnsupportedRole(role_name))?;

    let expires_at = now + Duration::hours(state.config.token_ttl_hours);
    let claims = Claims {
        email: email.to_string(),
        role,
        exp: expires_at.timestamp(),
        iat: Some(now.timestamp()),
    };
    let token = token::issue(&claims, &state.config.jwt_secret)?;

    Ok(json!({
        "message": "Login successful",
        "token": token,
        "email": email,
        "role": role.as_str(),
        "expires_at": expires_at.to_rfc3339(),
    }))
}

/// Register with the user pool and create the user record
pub async fn signup(state: &AppState, ctx: &RequestContext) -> Result<Value, HandlerError> {
    let request = credentials(ctx)?;
    let email = request.email.trim();
    tracing::info!("Signing up user: {}", email);

    state.identity.register(email, &request.password).await?;
    state
        .records
        .create_user(email, &Utc::now().to_rfc3339())
        .await?;

    Ok(json!({"message": "Signup successful. Confirm your email."}))
}
