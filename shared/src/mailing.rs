use serde::Deserialize;
use serde_json::{json, Value};

use crate::assignments::{assignment_file_name, to_dmy_format};
use crate::blobs::PRESIGN_EXPIRY;
use crate::error::HandlerError;
use crate::types::RequestContext;
use crate::AppState;

fn default_subject() -> String {
    "No Subject".to_string()
}

fn default_message() -> String {
    "No Message".to_string()
}

#[derive(Debug, Deserialize)]
pub struct MailRequest {
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_message")]
    pub message: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
}

fn outcome(success: bool, message: impl Into<String>) -> Value {
    json!({
        "status": if success { "success" } else { "failed" },
        "message": message.into(),
    })
}

/// Pre-signed link to the generated assignment the mail refers to, when it exists
async fn assignment_link(state: &AppState, request: &MailRequest) -> Option<String> {
    let topic = request.topic.as_deref()?;
    let extension = request.extension.as_deref()?;
    let deadline = match to_dmy_format(request.deadline.as_deref()?) {
        Some(deadline) => deadline,
        None => {
            tracing::warn!("Invalid deadline {:?}, sending without link", request.deadline);
            return None;
        }
    };

    let bucket = &state.config.buckets.generated;
    let key = assignment_file_name(topic, &deadline, extension.trim_start_matches('.'));
    if let Err(e) = state.blobs.metadata(bucket, &key).await {
        tracing::warn!("{}", e);
        return None;
    }
    match state.blobs.presign_get(bucket, &key, PRESIGN_EXPIRY).await {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::warn!("{}", e);
            None
        }
    }
}

/// Notify recipients, linking the generated assignment when one matches
pub async fn notify(state: &AppState, ctx: &RequestContext) -> Result<Value, HandlerError> {
    let request: MailRequest = ctx.json_body()?;
    if request.recipients.is_empty() {
        return Ok(outcome(false, "No recipients found"));
    }

    let mut message = request.message.clone();
    if let Some(url) = assignment_link(state, &request).await {
        message.push_str(&format!(
            "\n\nDownload your assignment here (valid for one hour):\n{}",
            url
        ));
    }

    match state
        .mailer
        .send(&state.config.mail_from, &request.recipients, &request.subject, &message)
        .await
    {
        Ok(()) => {
            tracing::info!("Mailed {} recipients", request.recipients.len());
            Ok(outcome(true, "Emails sent successfully"))
        }
        Err(e) => {
            tracing::error!("{}", e);
            Ok(outcome(false, e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, metadata, MemoryBlobStore, TestHarness};

    #[tokio::test]
    async fn test_notify_without_recipients() {
        let harness = TestHarness::new();
        let state = harness.state();

        let ctx = context("POST", "/mail/send", r#"{"subject": "Hi"}"#, None);
        let body = notify(&state, &ctx).await.unwrap();
        assert_eq!(body, json!({"status": "failed", "message": "No recipients found"}));
        assert!(harness.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_notify_appends_assignment_link() {
        let harness = TestHarness::new();
        harness.blobs.insert(
            "generated-assignments",
            "assignment_rust_basics_150825.html",
            metadata(&[("batch_name", "B1")]),
        );
        let state = harness.state();

        let ctx = context(
            "POST",
            "/mail/send",
            r#"{"recipients": ["a@x.com", "b@x.com"], "subject": "New work", "message": "Hello",
                "topic": "Rust Basics", "deadline": "15/08/2025", "extension": "html"}"#,
            None,
        );
        let body = notify(&state, &ctx).await.unwrap();
        assert_eq!(body["status"], "success");

        let sent = harness.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["a@x.com", "b@x.com"]);
        assert_eq!(sent[0].subject, "New work");
        assert!(sent[0].text.starts_with("Hello\n\n"));
        assert!(sent[0].text.ends_with(&MemoryBlobStore::presigned_url(
            "generated-assignments",
            "assignment_rust_basics_150825.html"
        )));
    }

    #[tokio::test]
    async fn test_notify_without_matching_assignment_sends_plain_message() {
        let harness = TestHarness::new();
        let state = harness.state();

        let ctx = context(
            "POST",
            "/mail/send",
            r#"{"recipients": ["a@x.com"], "topic": "Go", "deadline": "nope", "extension": "html"}"#,
            None,
        );
        notify(&state, &ctx).await.unwrap();
        let sent = harness.mailer.sent();
        assert_eq!(sent[0].text, "No Message");
        assert_eq!(sent[0].subject, "No Subject");
    }

    #[tokio::test]
    async fn test_notify_reports_transport_failure() {
        let harness = TestHarness::new();
        harness.mailer.fail();
        let state = harness.state();

        let ctx = context("POST", "/mail/send", r#"{"recipients": ["a@x.com"]}"#, None);
        let body = notify(&state, &ctx).await.unwrap();
        assert_eq!(body["status"], "failed");
        assert!(body["message"].as_str().unwrap().contains("simulated failure"));
    }
}
