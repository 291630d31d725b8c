use lopdf::content::Content;
use lopdf::{Document, Object};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::LazyLock;

use crate::assignments::escape_html;
use crate::blobs::{content_type_for, ObjectMetadata};
use crate::error::{BlobError, HandlerError};
use crate::llm::{extract_json, Completion};
use crate::types::RequestContext;
use crate::AppState;

/// Words per model call
pub const CHUNK_WORDS: usize = 3000;

static QUESTION_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Q(\d+)$").expect("question key pattern compiles"));

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub file_path: String,
    pub student_name: String,
    pub assignment_name: String,
    #[serde(default)]
    pub batch_name: Option<String>,
}

/// One validated entry of the model's evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionEvaluation {
    #[serde(skip)]
    pub number: u32,
    pub question: String,
    pub feedback: String,
    pub score: u8,
    pub verdict: String,
}

impl QuestionEvaluation {
    /// `{"Q<n>": {...}}` as returned to callers
    pub fn to_entry(&self) -> Value {
        let mut entry = Map::new();
        entry.insert(format!("Q{}", self.number), json!(self));
        Value::Object(entry)
    }
}

fn evaluation_prompt(content: &str) -> String {
    format!(
        r#"You are a strict assignment evaluator who excels in every known technology.

The student has submitted an assignment containing multiple questions and answers. Please:
1. Identify all distinct questions and their answers.
2. For each, return feedback, a score from 0 to 10, and whether it's AI-generated or not.

Respond **only in this JSON format**:
{{
  "evaluation": [
    {{
      "Q1": {{
        "Question1": "...",
        "feedback": "...",
        "score": 0-10,
        "verdict": "AI-generated" or "Not AI-generated"
      }}
    }}
  ]
}}

Input:
"""{content}""""#,
        content = content
    )
}

/// Extension of the object a URL points at, ignoring any query string
fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

fn notebook_text(bytes: &[u8]) -> Result<String, HandlerError> {
    let notebook: Value = serde_json::from_slice(bytes)?;
    let cells = notebook
        .get("cells")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let sources: Vec<String> = cells
        .iter()
        .filter_map(|cell| match cell.get("source")? {
            Value::String(text) => Some(text.clone()),
            Value::Array(lines) => Some(lines.iter().filter_map(Value::as_str).collect()),
            _ => None,
        })
        .collect();
    Ok(sources.join("\n"))
}

fn push_shown_text(operand: &Object, out: &mut String) {
    match operand {
        Object::String(bytes, _) => out.push_str(&String::from_utf8_lossy(bytes)),
        Object::Array(items) => items.iter().for_each(|item| push_shown_text(item, out)),
        _ => {}
    }
}

/// Text drawn by `Tj`/`TJ`/`'`/`"` operators, one line per operator
fn pdf_text(bytes: &[u8]) -> Result<String, HandlerError> {
    let doc = Document::load_mem(bytes).map_err(|e| HandlerError::Unreadable(e.to_string()))?;
    let mut out = String::new();

    for page_id in doc.get_pages().into_values() {
        let raw = doc
            .get_page_content(page_id)
            .map_err(|e| HandlerError::Unreadable(e.to_string()))?;
        let content = Content::decode(&raw).map_err(|e| HandlerError::Unreadable(e.to_string()))?;

        for operation in &content.operations {
            match operation.operator.as_str() {
                "Tj" | "TJ" | "'" | "\"" => {
                    operation
                        .operands
                        .iter()
                        .for_each(|operand| push_shown_text(operand, &mut out));
                    out.push('\n');
                }
                _ => {}
            }
        }
    }
    Ok(out)
}

/// Plain text of a submission; DOCX is rejected
pub fn extract_text(extension: Option<&str>, bytes: &[u8]) -> Result<String, HandlerError> {
    if bytes.starts_with(b"%PDF") {
        return pdf_text(bytes);
    }
    match extension {
        Some("pdf") => pdf_text(bytes),
        Some(ext @ "docx") => Err(BlobError::UnsupportedFileType(ext.to_string()).into()),
        Some("ipynb") => notebook_text(bytes),
        _ => Ok(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Split on whitespace into chunks of at most `max_words` words
pub fn chunk_text(text: &str, max_words: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(max_words.max(1))
        .map(|chunk| chunk.join(" "))
        .collect()
}

fn parse_entry(entry: &Value) -> Result<QuestionEvaluation, String> {
    let object = entry.as_object().ok_or("entry is not an object")?;
    let (key, body) = match object.iter().next() {
        Some(pair) if object.len() == 1 => pair,
        _ => return Err("entry must have exactly one question key".to_string()),
    };
    let number = QUESTION_KEY
        .captures(key)
        .and_then(|c| c[1].parse::<u32>().ok())
        .ok_or_else(|| format!("malformed question key {}", key))?;

    let body = body
        .as_object()
        .ok_or_else(|| format!("{} is not an object", key))?;
    let text = |name: &str| body.get(name).and_then(Value::as_str).map(str::to_string);

    let question = body
        .iter()
        .find(|(k, _)| k.to_ascii_lowercase().starts_with("question"))
        .and_then(|(_, v)| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| format!("{} has no question", key))?;
    let feedback = text("feedback").ok_or_else(|| format!("{} has no feedback", key))?;
    let verdict = text("verdict").ok_or_else(|| format!("{} has no verdict", key))?;
    let score = body
        .get("score")
        .and_then(Value::as_u64)
        .filter(|s| *s <= 10)
        .ok_or_else(|| format!("{} score must be an integer from 0 to 10", key))?;

    Ok(QuestionEvaluation {
        number,
        question,
        feedback,
        score: score as u8,
        verdict,
    })
}

/// Validate every entry and order them by question number
pub fn validate_evaluation(entries: &[Value]) -> Result<Vec<QuestionEvaluation>, HandlerError> {
    if entries.is_empty() {
        return Err(HandlerError::InvalidEvaluation(
            "no questions were evaluated".to_string(),
        ));
    }
    let mut evaluated = entries
        .iter()
        .map(parse_entry)
        .collect::<Result<Vec<_>, _>>()
        .map_err(HandlerError::InvalidEvaluation)?;
    evaluated.sort_by_key(|e| e.number);
    Ok(evaluated)
}

pub fn render_report(student: &str, assignment: &str, evaluation: &[QuestionEvaluation]) -> String {
    let mut html = String::from(
        "<html><head><meta charset=\"utf-8\"><title>Assignment Report</title></head><body>",
    );
    html.push_str("<h1>Assignment Report</h1>");
    html.push_str(&format!("<h3>Student Mail: {}</h3>", escape_html(student)));
    html.push_str(&format!("<h3>Assignment Name: {}</h3>", escape_html(assignment)));
    html.push_str("<table border=\"1\"><tr><th>Question</th><th>Feedback</th><th>Verdict</th><th>Score</th></tr>");
    for item in evaluation {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&item.question),
            escape_html(&item.feedback),
            escape_html(&item.verdict),
            item.score
        ));
    }
    html.push_str("</table></body></html>");
    html
}

/// `<email local part>_<assignment stem>.html`
pub fn report_key(email: &str, assignment: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    let stem = assignment.split('.').next().unwrap_or(assignment);
    format!("{}_{}.html", local, stem)
}

async fn evaluate_chunks(state: &AppState, chunks: &[String]) -> Result<Vec<Value>, HandlerError> {
    let mut entries = Vec::new();
    for (idx, chunk) in chunks.iter().enumerate() {
        tracing::info!("Evaluating chunk {}/{}", idx + 1, chunks.len());
        let raw = state
            .model
            .complete(&Completion {
                model: state.config.evaluation_model.clone(),
                system: "You are an Assignment evaluator.".to_string(),
                prompt: evaluation_prompt(chunk),
                temperature: 0.3,
                max_tokens: 4096,
            })
            .await?;

        match extract_json(&raw) {
            Ok(Value::Object(mut parsed)) => match parsed.remove("evaluation") {
                Some(Value::Array(items)) => entries.extend(items),
                _ => tracing::warn!("Chunk {} has no evaluation array", idx + 1),
            },
            Ok(_) => tracing::warn!("Chunk {} is not a JSON object", idx + 1),
            Err(e) => tracing::warn!("Chunk {}: {}", idx + 1, e),
        }
    }
    Ok(entries)
}

/// Evaluate already downloaded submission bytes and publish the report
pub async fn evaluate_submission(
    state: &AppState,
    request: &EvaluateRequest,
    bytes: &[u8],
) -> Result<Value, HandlerError> {
    let text = extract_text(url_extension(&request.file_path).as_deref(), bytes)?;
    let chunks = chunk_text(&text, CHUNK_WORDS);
    let entries = evaluate_chunks(state, &chunks).await?;
    let evaluation = validate_evaluation(&entries)?;

    let report = render_report(&request.student_name, &request.assignment_name, &evaluation);
    let key = report_key(&request.student_name, &request.assignment_name);

    let mut metadata = ObjectMetadata::new();
    metadata.insert("email".to_string(), request.student_name.clone());
    metadata.insert("assignment_name".to_string(), request.assignment_name.clone());
    if let Some(batch) = request.batch_name.as_deref().filter(|b| !b.is_empty()) {
        metadata.insert("batch_name".to_string(), batch.to_string());
    }

    let file_url = state
        .blobs
        .put(
            &state.config.buckets.evaluated,
            &key,
            report.into_bytes(),
            content_type_for("html").unwrap_or("text/html"),
            metadata,
        )
        .await?;
    tracing::info!("Uploaded evaluation report {}", key);

    Ok(json!({
        "message": "Assignment evaluated and report uploaded successfully.",
        "fileUrl": file_url,
        "evaluation": evaluation.iter().map(QuestionEvaluation::to_entry).collect::<Vec<_>>(),
    }))
}

/// Download a submission by its pre-signed URL and evaluate it
pub async fn evaluate(state: &AppState, ctx: &RequestContext) -> Result<Value, HandlerError> {
    let request: EvaluateRequest = ctx.json_body()?;
    tracing::info!(
        "Evaluating {} for {}",
        request.assignment_name,
        request.student_name
    );

    let response = state
        .http
        .get(&request.file_path)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| HandlerError::Download(e.to_string()))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| HandlerError::Download(e.to_string()))?;

    evaluate_submission(state, &request, &bytes).await
}
