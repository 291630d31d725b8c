pub mod types;
pub mod config;
pub mod error;
pub mod token;
pub mod records;
pub mod dynamo;
pub mod blobs;
pub mod s3;
pub mod llm;
pub mod email;
pub mod auth;
pub mod batches;
pub mod reconcile;
pub mod retrieval;
pub mod assignments;
pub mod submissions;
pub mod evaluator;
pub mod mailing;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::sync::Arc;

use auth::IdentityProvider;
use blobs::BlobStore;
use config::Config;
use email::Mailer;
use llm::LanguageModel;
use records::{RecordStore, Records};

/// Shared application state, built once per cold start
pub struct AppState {
    pub config: Config,
    pub records: Records,
    pub blobs: Arc<dyn BlobStore>,
    pub model: Arc<dyn LanguageModel>,
    pub mailer: Arc<dyn Mailer>,
    pub identity: Arc<dyn IdentityProvider>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: Config,
        record_store: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        model: Arc<dyn LanguageModel>,
        mailer: Arc<dyn Mailer>,
        identity: Arc<dyn IdentityProvider>,
        http: reqwest::Client,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            records: Records::new(record_store),
            blobs,
            model,
            mailer,
            identity,
            http,
        })
    }
}
