use thiserror::Error;

/// Record store failures, returned from every DynamoDB call
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read table {table}: {message}")]
    Backend { table: String, message: String },
    #[error("Record already exists in table {0}")]
    AlreadyExists(String),
    #[error("No batch record found for email: {0}")]
    BatchNotFound(String),
    #[error("Batch record exists, but no 'BatchName' found for email: {0}")]
    MissingBatchName(String),
    #[error("No role found for user: {0}")]
    RoleNotFound(String),
}

impl StoreError {
    pub fn backend(table: &str, message: impl std::fmt::Display) -> Self {
        StoreError::Backend {
            table: table.to_string(),
            message: message.to_string(),
        }
    }
}

/// Blob store failures
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("S3 list failed for bucket {bucket}: {message}")]
    List { bucket: String, message: String },
    #[error("Metadata fetch failed for {key} in {bucket}: {message}")]
    Head {
        bucket: String,
        key: String,
        message: String,
    },
    #[error("Error generating URL for {key} in {bucket}: {message}")]
    Presign {
        bucket: String,
        key: String,
        message: String,
    },
    #[error("S3 upload failed: {0}")]
    Upload(String),
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
}

/// Language model failures
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Language model is not configured")]
    NotConfigured,
    #[error("API request failed: {0}")]
    Request(String),
    #[error("Language model returned no content")]
    EmptyResponse,
    #[error("Failed to parse model output: {0}")]
    Parse(String),
}

/// Outbound mail failures
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Failed to build email: {0}")]
    Build(String),
    #[error("Failed to send email: {0}")]
    Send(String),
}

/// Identity provider failures, already mapped to user-facing messages
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Identity provider is not configured")]
    NotConfigured,
    #[error("{0}")]
    Rejected(String),
}

/// Failures raised inside a dispatched handler
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Invalid request body: {0}")]
    BadRequest(String),
    #[error("Missing token claims for an authenticated route")]
    MissingClaims,
    #[error("Unsupported role: {0}")]
    UnsupportedRole(String),
    #[error("Download failed: {0}")]
    Download(String),
    #[error("Could not read submission: {0}")]
    Unreadable(String),
    #[error("Evaluation output is invalid: {0}")]
    InvalidEvaluation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Token(#[from] crate::token::TokenError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
