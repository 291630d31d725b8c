use assignment_shared::auth::CognitoIdentity;
use assignment_shared::config::Config;
use assignment_shared::dynamo::DynamoRecordStore;
use assignment_shared::email::SesMailer;
use assignment_shared::llm::OpenAiModel;
use assignment_shared::s3::S3BlobStore;
use assignment_shared::AppState;
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_sesv2::Client as SesClient;
use lambda_http::{run, service_fn, tracing, Error, Request};
use std::sync::Arc;

mod http_handler;
mod registry;
mod routes;

use routes::{RouteTable, EMBEDDED_MAPPING};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing::init_default_subscriber();

    let config = Config::from_env()?;

    // Mapping problems fail the cold start instead of every request
    let routes = Arc::new(match config.api_mapping_path.as_deref() {
        Some(path) => RouteTable::from_file(path)?,
        None => RouteTable::from_json(EMBEDDED_MAPPING)?,
    });
    tracing::info!("Loaded {} routes", routes.route_count());

    // Initialize AWS clients once at startup
    let aws = aws_config::load_from_env().await;
    let http = reqwest::Client::new();

    let state = AppState::new(
        config.clone(),
        Arc::new(DynamoRecordStore::new(DynamoClient::new(&aws))),
        Arc::new(S3BlobStore::new(S3Client::new(&aws))),
        Arc::new(OpenAiModel::new(
            http.clone(),
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
        )),
        Arc::new(SesMailer::new(SesClient::new(&aws))),
        Arc::new(CognitoIdentity::new(
            CognitoClient::new(&aws),
            config.cognito_client_id.clone(),
            config.cognito_client_secret.clone(),
        )),
        http,
    );

    run(service_fn(move |event: Request| {
        let state = Arc::clone(&state);
        let routes = Arc::clone(&routes);
        async move { http_handler::function_handler(event, state, routes).await }
    }))
    .await
}
