use serde_json::{json, Value};

use crate::error::HandlerError;
use crate::records::Row;
use crate::types::RequestContext;
use crate::AppState;

fn rows_to_json(rows: Vec<Row>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

/// Batch name to member emails
pub async fn list_batches(state: &AppState, _ctx: &RequestContext) -> Result<Value, HandlerError> {
    let members = state.records.batch_members().await?;
    tracing::info!("Listing {} batches", members.len());
    Ok(json!(members))
}

/// Personal info rows of the caller
pub async fn user_details(state: &AppState, ctx: &RequestContext) -> Result<Value, HandlerError> {
    let claims = ctx.claims()?;
    let rows = state.records.personal_info(Some(&claims.email)).await?;
    Ok(rows_to_json(rows))
}

pub async fn courses(state: &AppState, _ctx: &RequestContext) -> Result<Value, HandlerError> {
    Ok(rows_to_json(state.records.course(None).await?))
}

pub async fn modules(state: &AppState, _ctx: &RequestContext) -> Result<Value, HandlerError> {
    Ok(rows_to_json(state.records.module(None).await?))
}
