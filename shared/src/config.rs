use std::env;

/// Bucket names for the three artifact stores
#[derive(Debug, Clone)]
pub struct Buckets {
    pub generated: String,
    pub submitted: String,
    pub evaluated: String,
}

impl Default for Buckets {
    fn default() -> Self {
        Self {
            generated: "generated-assignments".to_string(),
            submitted: "submitted-assignments".to_string(),
            evaluated: "evaluated-reports".to_string(),
        }
    }
}

/// Runtime configuration, read once per cold start
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub buckets: Buckets,
    pub cognito_client_id: Option<String>,
    pub cognito_client_secret: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub generation_model: String,
    pub evaluation_model: String,
    pub mail_from: String,
    pub api_mapping_path: Option<String>,
}

impl Config {
    /// Load configuration from the Lambda environment
    pub fn from_env() -> Result<Self, String> {
        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| "JWT_SECRET must be set".to_string())?;

        let token_ttl_hours = match env::var("TOKEN_TTL_HOURS") {
            Ok(raw) => raw
                .parse::<i64>()
                .map_err(|e| format!("TOKEN_TTL_HOURS must be an integer: {}", e))?,
            Err(_) => 24,
        };

        let defaults = Buckets::default();
        let buckets = Buckets {
            generated: env::var("GENERATED_BUCKET").unwrap_or(defaults.generated),
            submitted: env::var("SUBMITTED_BUCKET").unwrap_or(defaults.submitted),
            evaluated: env::var("EVALUATED_BUCKET").unwrap_or(defaults.evaluated),
        };

        Ok(Self {
            jwt_secret,
            token_ttl_hours,
            buckets,
            cognito_client_id: env::var("COGNITO_CLIENT_ID").ok(),
            cognito_client_secret: env::var("COGNITO_CLIENT_SECRET").ok(),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            generation_model: env::var("GENERATION_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            evaluation_model: env::var("EVALUATION_MODEL")
                .unwrap_or_else(|_| "gpt-4o".to_string()),
            mail_from: env::var("MAIL_FROM")
                .unwrap_or_else(|_| "noreply@craftingbrain.com".to_string()),
            api_mapping_path: env::var("API_MAPPING_PATH").ok(),
        })
    }

    /// Configuration with fixed values, used by tests and local runs
    pub fn with_secret(secret: &str) -> Self {
        Self {
            jwt_secret: secret.to_string(),
            token_ttl_hours: 24,
            buckets: Buckets::default(),
            cognito_client_id: None,
            cognito_client_secret: None,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            generation_model: "gpt-4o-mini".to_string(),
            evaluation_model: "gpt-4o".to_string(),
            mail_from: "noreply@craftingbrain.com".to_string(),
            api_mapping_path: None,
        }
    }
}
