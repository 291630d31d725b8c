use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::blobs::{list_keys, BlobStore, ObjectMetadata, PRESIGN_EXPIRY};
use crate::config::Buckets;
use crate::error::{HandlerError, StoreError};
use crate::records::Records;

static DEADLINE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)_(\d{6})\.(pdf|html|docx|ipynb)$").expect("deadline pattern compiles")
});

/// Deadline encoded in the trailing `_DDMMYY.<ext>` of an assignment key
pub fn extract_deadline(key: &str) -> Option<NaiveDate> {
    let captures = DEADLINE_PATTERN.captures(key)?;
    NaiveDate::parse_from_str(&captures[1], "%d%m%y").ok()
}

/// Final path segment of an object key
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

fn display_deadline(deadline: NaiveDate) -> String {
    deadline.format("%d-%m-%Y").to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubmissionLinks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluated_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminAssignment {
    pub name: String,
    pub url: Option<String>,
    pub deadline: String,
    pub submissions: Vec<BTreeMap<String, SubmissionLinks>>,
}

/// Links a student sees on an archived assignment; absent links serialize as null
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArchiveLinks {
    pub submitted_url: Option<String>,
    pub evaluated_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentAssignment {
    pub name: String,
    pub url: Option<String>,
    pub deadline: String,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveLinks>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Partition<T> {
    pub ongoing: Vec<T>,
    pub archive: Vec<T>,
}

impl<T> Default for Partition<T> {
    fn default() -> Self {
        Self {
            ongoing: Vec::new(),
            archive: Vec::new(),
        }
    }
}

impl<T> Partition<T> {
    fn push(&mut self, deadline: NaiveDate, today: NaiveDate, item: T) {
        if deadline >= today {
            self.ongoing.push(item);
        } else {
            self.archive.push(item);
        }
    }
}

pub type AdminView = BTreeMap<String, Partition<AdminAssignment>>;
pub type StudentView = BTreeMap<String, Partition<StudentAssignment>>;

/// assignment name -> email -> links
type SubmissionIndex = BTreeMap<String, BTreeMap<String, SubmissionLinks>>;

#[derive(Clone, Copy)]
enum LinkRole {
    Submitted,
    Evaluated,
}

impl LinkRole {
    fn set(self, links: &mut SubmissionLinks, url: String) {
        match self {
            LinkRole::Submitted => links.submitted_url = Some(url),
            LinkRole::Evaluated => links.evaluated_url = Some(url),
        }
    }
}

fn non_empty<'a>(metadata: &'a ObjectMetadata, name: &str) -> Option<&'a str> {
    metadata
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// Matches generated assignments with submissions and evaluation reports
pub struct Reconciler<'a> {
    records: &'a Records,
    blobs: &'a dyn BlobStore,
    buckets: &'a Buckets,
}

impl<'a> Reconciler<'a> {
    pub fn new(records: &'a Records, blobs: &'a dyn BlobStore, buckets: &'a Buckets) -> Self {
        Self {
            records,
            blobs,
            buckets,
        }
    }

    async fn presign(&self, bucket: &str, key: &str) -> Option<String> {
        match self.blobs.presign_get(bucket, key, PRESIGN_EXPIRY).await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }

    async fn metadata(&self, bucket: &str, key: &str) -> Option<ObjectMetadata> {
        match self.blobs.metadata(bucket, key).await {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }

    /// Index one bucket into `index`; `false` when the bucket could not be listed
    async fn index_bucket(&self, bucket: &str, role: LinkRole, index: &mut SubmissionIndex) -> bool {
        let keys = match list_keys(self.blobs, bucket).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!("Error while processing {}: {}", bucket, e);
                return false;
            }
        };

        for key in keys {
            let Some(metadata) = self.metadata(bucket, &key).await else {
                continue;
            };
            let (Some(email), Some(assignment)) = (
                non_empty(&metadata, "email"),
                non_empty(&metadata, "assignment_name"),
            ) else {
                continue;
            };
            let Some(url) = self.presign(bucket, &key).await else {
                continue;
            };
            let links = index
                .entry(assignment.to_string())
                .or_default()
                .entry(email.to_string())
                .or_default();
            role.set(links, url);
        }
        true
    }

    async fn submission_index(&self) -> Option<SubmissionIndex> {
        let mut index = SubmissionIndex::new();
        if !self
            .index_bucket(&self.buckets.submitted, LinkRole::Submitted, &mut index)
            .await
        {
            return None;
        }
        if !self
            .index_bucket(&self.buckets.evaluated, LinkRole::Evaluated, &mut index)
            .await
        {
            return None;
        }
        Some(index)
    }

    async fn batch_of(&self, key: &str) -> Option<String> {
        self.metadata(&self.buckets.generated, key)
            .await
            .and_then(|m| non_empty(&m, "batch_name").map(str::to_string))
    }

    /// Every batch's assignments with the submissions made against them
    pub async fn admin_view(&self, today: NaiveDate) -> Result<AdminView, HandlerError> {
        let valid_batches = self.records.batch_names().await?;
        let Some(index) = self.submission_index().await else {
            return Ok(AdminView::new());
        };

        let generated = &self.buckets.generated;
        let mut view = AdminView::new();
        for key in list_keys(self.blobs, generated).await? {
            let Some(deadline) = extract_deadline(&key) else {
                continue;
            };
            let Some(batch) = self.batch_of(&key).await else {
                continue;
            };
            if !valid_batches.contains(&batch) {
                continue;
            }

            let name = file_name(&key).to_string();
            let submissions = index
                .get(&name)
                .map(|by_email| {
                    by_email
                        .iter()
                        .map(|(email, links)| BTreeMap::from([(email.clone(), links.clone())]))
                        .collect()
                })
                .unwrap_or_default();

            let item = AdminAssignment {
                url: self.presign(generated, &key).await,
                deadline: display_deadline(deadline),
                name,
                submissions,
            };
            view.entry(batch).or_default().push(deadline, today, item);
        }

        tracing::info!("Reconciled assignments for {} batches", view.len());
        Ok(view)
    }

    /// First object in `bucket` whose metadata names this assignment, member and batch
    async fn find_linked(&self, bucket: &str, assignment: &str, email: &str, batch: &str) -> Option<String> {
        let keys = match list_keys(self.blobs, bucket).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!("Error retrieving from {}: {}", bucket, e);
                return None;
            }
        };

        for key in keys {
            let Some(metadata) = self.metadata(bucket, &key).await else {
                continue;
            };
            let matches = metadata.get("assignment_name").map(String::as_str) == Some(assignment)
                && metadata.get("email").map(String::as_str) == Some(email)
                && metadata.get("batch_name").map(String::as_str) == Some(batch);
            if matches {
                return self.presign(bucket, &key).await;
            }
        }
        None
    }

    /// Assignments of the member's batch; empty when the member has no batch
    pub async fn student_view(&self, email: &str, today: NaiveDate) -> Result<StudentView, HandlerError> {
        let batch = match self.records.batch_name_for_email(email).await {
            Ok(batch) => batch,
            Err(e @ (StoreError::BatchNotFound(_) | StoreError::MissingBatchName(_))) => {
                tracing::info!("{}", e);
                return Ok(StudentView::new());
            }
            Err(e) => return Err(e.into()),
        };

        let generated = &self.buckets.generated;
        let mut files = Partition::default();
        for key in list_keys(self.blobs, generated).await? {
            let Some(deadline) = extract_deadline(&key) else {
                continue;
            };
            if self.batch_of(&key).await.as_deref() != Some(batch.as_str()) {
                continue;
            }

            let archive = if deadline >= today {
                None
            } else {
                let assignment = file_name(&key);
                Some(ArchiveLinks {
                    submitted_url: self
                        .find_linked(&self.buckets.submitted, assignment, email, &batch)
                        .await,
                    evaluated_url: self
                        .find_linked(&self.buckets.evaluated, assignment, email, &batch)
                        .await,
                })
            };

            let item = StudentAssignment {
                url: self.presign(generated, &key).await,
                deadline: display_deadline(deadline),
                name: key,
                archive,
            };
            files.push(deadline, today, item);
        }

        Ok(StudentView::from([(batch, files)]))
    }
}
