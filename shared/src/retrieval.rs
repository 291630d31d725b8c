use chrono::Utc;
use serde_json::{json, Value};

use crate::error::HandlerError;
use crate::reconcile::Reconciler;
use crate::token::Role;
use crate::types::RequestContext;
use crate::AppState;

/// Assignment listing for the caller's role
pub async fn retrieve(state: &AppState, ctx: &RequestContext) -> Result<Value, HandlerError> {
    let email = &ctx.claims()?.email;
    let role_name = state.records.role_for(email).await?;
    tracing::info!("Retrieving assignments for {} as {}", email, role_name);

    let reconciler = Reconciler::new(&state.records, state.blobs.as_ref(), &state.config.buckets);
    let today = Utc::now().date_naive();

    match Role::parse(&role_name) {
        Some(Role::Student) => Ok(serde_json::to_value(
            reconciler.student_view(email, today).await?,
        )?),
        Some(Role::Admin) => {
            let batch_names = state.records.batch_names().await?;
            let assignments = reconciler.admin_view(today).await?;
            Ok(json!({
                "batch_names": batch_names,
                "assignments": assignments,
            }))
        }
        None => Err(HandlerError::UnsupportedRole(role_name)),
    }
}
