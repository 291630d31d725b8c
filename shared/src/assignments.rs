use chrono::{Duration, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::LazyLock;

use crate::blobs::{content_type_for, ObjectMetadata};
use crate::error::{BlobError, HandlerError, ModelError};
use crate::llm::{extract_json, Completion};
use crate::types::RequestContext;
use crate::AppState;

static TOPIC_UNSAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9_]+").expect("topic pattern compiles"));

const SYSTEM_PROMPT: &str = "You are an AI that generates structured JSON responses.";

/// Day-first formats accepted for deadlines besides the canonical `DDMMYY`
const DEADLINE_FORMATS: &[&str] = &[
    "%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y", "%d-%m-%y", "%d/%m/%y", "%d %B %Y", "%d %b %Y",
    "%Y-%m-%d",
];

fn default_topic() -> String {
    "Python".to_string()
}

fn default_file_type() -> String {
    "html".to_string()
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default)]
    pub beginner: u32,
    #[serde(default)]
    pub intermediate: u32,
    #[serde(default)]
    pub advanced: u32,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default = "default_file_type")]
    pub file_type: String,
    #[serde(default)]
    pub batch: Option<String>,
}

/// `[number, text]` pair as the model returns it
pub type Question = (u32, String);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionSet {
    #[serde(default)]
    pub beginner: Vec<Question>,
    #[serde(default)]
    pub intermediate: Vec<Question>,
    #[serde(default)]
    pub advanced: Vec<Question>,
}

impl QuestionSet {
    fn levels(&self) -> [(&'static str, &[Question]); 3] {
        [
            ("Beginner", self.beginner.as_slice()),
            ("Intermediate", self.intermediate.as_slice()),
            ("Advanced", self.advanced.as_slice()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Html,
    Notebook,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Result<Self, BlobError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(OutputFormat::Html),
            "ipynb" => Ok(OutputFormat::Notebook),
            other => Err(BlobError::UnsupportedFileType(other.to_string())),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Html => "html",
            OutputFormat::Notebook => "ipynb",
        }
    }
}

/// Lowercase the topic and collapse everything outside `[a-zA-Z0-9_]` to `_`
pub fn sanitize_topic(topic: &str) -> String {
    TOPIC_UNSAFE
        .replace_all(&topic.trim().to_lowercase(), "_")
        .into_owned()
}

/// Parse a deadline given as `DDMMYY` or a common day-first date
pub fn parse_deadline(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.len() == 6 && raw.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDate::parse_from_str(raw, "%d%m%y").ok();
    }
    DEADLINE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

/// Deadline normalized to `DDMMYY`
pub fn to_dmy_format(raw: &str) -> Option<String> {
    parse_deadline(raw).map(|date| date.format("%d%m%y").to_string())
}

/// Object key of a generated assignment
pub fn assignment_file_name(topic: &str, deadline: &str, extension: &str) -> String {
    format!("assignment_{}_{}.{}", sanitize_topic(topic), deadline, extension)
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn question_prompt(topic: &str, request: &GenerateRequest) -> String {
    format!(
        r#"You are a helpful assistant generating coding interview questions for the topic: **{topic}**.

Please generate the following:
- {beginner} **beginner** questions (easy, concept-based)
- {intermediate} **intermediate** questions (problem-solving based)
- {advanced} **advanced** questions (tricky, involving complex data structures and algorithms, include a HINT in each)

### Output Format:
Return a JSON object with keys `beginner`, `intermediate`, and `advanced`.
Each key should map to a list of items in this format:

{{
  "beginner": [[1, "Beginner question 1"], [2, "Beginner question 2"]],
  "intermediate": [[1, "Intermediate question 1"]],
  "advanced": [[1, "Advanced question 1 (HINT: Add a helpful hint here)"]]
}}
"#,
        topic = topic,
        beginner = request.beginner,
        intermediate = request.intermediate,
        advanced = request.advanced,
    )
}

/// Parse model output into a question set
pub fn parse_questions(raw: &str) -> Result<QuestionSet, ModelError> {
    let value = extract_json(raw)?;
    serde_json::from_value(value).map_err(|e| ModelError::Parse(e.to_string()))
}

pub fn render_html(topic: &str, questions: &QuestionSet) -> String {
    let mut html = format!(
        "<html><head><meta charset=\"utf-8\"><title>{0}</title></head><body><h1>{0}</h1>",
        escape_html(topic)
    );
    for (level, items) in questions.levels() {
        html.push_str(&format!("<h2>{}</h2><ul>", level));
        for (number, text) in items {
            html.push_str(&format!("<li>{}. {}</li>", number, escape_html(text)));
        }
        html.push_str("</ul>");
    }
    html.push_str("</body></html>");
    html
}

fn markdown_cell(index: usize, source: String) -> Value {
    json!({
        "cell_type": "markdown",
        "id": format!("cell-{}", index),
        "metadata": {},
        "source": source,
    })
}

fn code_cell(index: usize, source: &str) -> Value {
    json!({
        "cell_type": "code",
        "execution_count": null,
        "id": format!("cell-{}", index),
        "metadata": {},
        "outputs": [],
        "source": source,
    })
}

/// nbformat 4 notebook with one answer cell per question
pub fn render_notebook(topic: &str, questions: &QuestionSet) -> Value {
    let mut cells = vec![markdown_cell(0, format!("# {}", topic))];
    for (level, items) in questions.levels() {
        cells.push(markdown_cell(cells.len(), format!("## {} Questions", level)));
        for (number, text) in items {
            cells.push(markdown_cell(cells.len(), format!("**Q{}.** {}", number, text)));
            cells.push(code_cell(cells.len(), "# Your code here\n"));
        }
    }

    json!({
        "cells": cells,
        "metadata": {},
        "nbformat": 4,
        "nbformat_minor": 5,
    })
}

fn render(format: OutputFormat, topic: &str, questions: &QuestionSet) -> Result<Vec<u8>, HandlerError> {
    match format {
        OutputFormat::Html => Ok(render_html(topic, questions).into_bytes()),
        OutputFormat::Notebook => Ok(serde_json::to_vec_pretty(&render_notebook(topic, questions))?),
    }
}

/// Generate a question set with the language model and publish it for a batch
pub async fn generate(state: &AppState, ctx: &RequestContext) -> Result<Value, HandlerError> {
    let request: GenerateRequest = ctx.json_body()?;
    let format = OutputFormat::parse(&request.file_type)?;

    let deadline = match request.deadline.as_deref() {
        Some(raw) => to_dmy_format(raw)
            .ok_or_else(|| HandlerError::BadRequest(format!("Invalid deadline: {}", raw)))?,
        None => (Utc::now().date_naive() + Duration::days(1))
            .format("%d%m%y")
            .to_string(),
    };

    tracing::info!(
        "Generating {} assignment on '{}' due {}",
        format.extension(),
        request.topic,
        deadline
    );

    let raw = state
        .model
        .complete(&Completion {
            model: state.config.generation_model.clone(),
            system: SYSTEM_PROMPT.to_string(),
            prompt: question_prompt(&request.topic, &request),
            temperature: 0.8,
            max_tokens: 1024,
        })
        .await?;
    let questions = parse_questions(&raw)?;

    let filename = assignment_file_name(&request.topic, &deadline, format.extension());
    let body = render(format, &request.topic, &questions)?;
    let content_type = content_type_for(format.extension()).unwrap_or("application/octet-stream");

    let mut metadata = ObjectMetadata::new();
    metadata.insert("deadline".to_string(), deadline.clone());
    if let Some(batch) = request.batch.as_deref().filter(|b| !b.is_empty()) {
        metadata.insert("batch_name".to_string(), batch.to_string());
    }

    let file_url = state
        .blobs
        .put(&state.config.buckets.generated, &filename, body, content_type, metadata)
        .await?;

    Ok(json!({
        "message": "Assignment generated and uploaded successfully.",
        "fileUrl": file_url,
        "filename": filename,
        "questions": questions,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::extract_deadline;
    use crate::testing::{context, TestHarness};

    const ANSWER: &str = "```json\n{\"beginner\": [[1, \"What is a list?\"]], \"intermediate\": [], \"advanced\": [[1, \"Use <heap> (HINT: BinaryHeap)\"]]}\n```";

    #[test]
    fn test_sanitize_topic() {
        assert_eq!(sanitize_topic("  Data Structures & Algo "), "data_structures_algo");
        assert_eq!(sanitize_topic("Python"), "python");
    }

    #[test]
    fn test_to_dmy_format() {
        assert_eq!(to_dmy_format("010125").as_deref(), Some("010125"));
        assert_eq!(to_dmy_format("31-12-2025").as_deref(), Some("311225"));
        assert_eq!(to_dmy_format("05/06/2025").as_deref(), Some("050625"));
        assert_eq!(to_dmy_format("2025-06-05").as_deref(), Some("050625"));
        assert_eq!(to_dmy_format("999999"), None);
        assert_eq!(to_dmy_format("soon"), None);
    }

    #[test]
    fn test_file_name_round_trips_deadline() {
        let name = assignment_file_name("Rust Basics", "150825", "ipynb");
        assert_eq!(name, "assignment_rust_basics_150825.ipynb");
        assert_eq!(extract_deadline(&name), NaiveDate::from_ymd_opt(2025, 8, 15));
    }

    #[test]
    fn test_output_format_rejects_binary_documents() {
        assert_eq!(OutputFormat::parse("IPYNB").unwrap(), OutputFormat::Notebook);
        assert!(matches!(
            OutputFormat::parse("pdf"),
            Err(BlobError::UnsupportedFileType(ext)) if ext == "pdf"
        ));
        assert!(OutputFormat::parse("docx").is_err());
    }

    #[test]
    fn test_render_html_escapes_questions() {
        let questions = parse_questions(ANSWER).unwrap();
        let html = render_html("Rust", &questions);
        assert!(html.contains("<h2>Beginner</h2><ul><li>1. What is a list?</li></ul>"));
        assert!(html.contains("Use &lt;heap&gt;"));
        assert!(html.contains("<h2>Intermediate</h2><ul></ul>"));
    }

    #[test]
    fn test_render_notebook_structure() {
        let questions = parse_questions(ANSWER).unwrap();
        let notebook = render_notebook("Rust", &questions);
        assert_eq!(notebook["nbformat"], 4);
        let cells = notebook["cells"].as_array().unwrap();
        // title, three level headings, two question/answer pairs
        assert_eq!(cells.len(), 8);
        assert_eq!(cells[2]["source"], "**Q1.** What is a list?");
        assert_eq!(cells[3]["cell_type"], "code");
    }

    #[tokio::test]
    async fn test_generate_uploads_with_metadata() {
        let harness = TestHarness::new();
        harness.model.push(ANSWER);
        let state = harness.state();

        let ctx = context(
            "POST",
            "/assignment/generate",
            r#"{"topic": "Rust Basics", "beginner": 1, "advanced": 1, "deadline": "15-08-2025", "batch": "B1"}"#,
            None,
        );
        let body = generate(&state, &ctx).await.unwrap();

        assert_eq!(body["filename"], "assignment_rust_basics_150825.html");
        assert_eq!(body["questions"]["beginner"][0][1], "What is a list?");

        let stored = harness
            .blobs
            .object("generated-assignments", "assignment_rust_basics_150825.html")
            .unwrap();
        assert_eq!(stored.content_type, "text/html");
        assert_eq!(stored.metadata["batch_name"], "B1");
        assert_eq!(stored.metadata["deadline"], "150825");

        let calls = harness.model.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].model, "gpt-4o-mini");
        assert!(calls[0].prompt.contains("**Rust Basics**"));
    }

    #[tokio::test]
    async fn test_generate_rejects_pdf_before_calling_model() {
        let harness = TestHarness::new();
        let state = harness.state();

        let ctx = context("POST", "/assignment/generate", r#"{"file_type": "pdf"}"#, None);
        let err = generate(&state, &ctx).await.unwrap_err();
        assert!(matches!(err, HandlerError::Blob(BlobError::UnsupportedFileType(_))));
        assert!(harness.model.calls().is_empty());
    }

    #[tokio::test]
    async fn test_generate_reports_unparseable_answer() {
        let harness = TestHarness::new();
        harness.model.push("I cannot help with that");
        let state = harness.state();

        let ctx = context("POST", "/assignment/generate", r#"{"topic": "Go"}"#, None);
        let err = generate(&state, &ctx).await.unwrap_err();
        assert!(matches!(err, HandlerError::Model(ModelError::Parse(_))));
        assert!(harness.blobs.keys("generated-assignments").is_empty());
    }
}
