use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::StoreError;

/// One table row, attribute name to JSON value
pub type Row = Map<String, Value>;

/// One page of a full table scan
#[derive(Debug, Default)]
pub struct ScanPage {
    pub items: Vec<Row>,
    pub last_evaluated_key: Option<Row>,
}

/// Narrow interface over the key-value store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Equality query on a key attribute
    async fn query(&self, table: &str, key_name: &str, key_value: &str)
        -> Result<Vec<Row>, StoreError>;

    /// One scan page, starting after `start_key` when given
    async fn scan_page(&self, table: &str, start_key: Option<Row>)
        -> Result<ScanPage, StoreError>;

    /// Insert a row; with `unique_key` the insert fails if that attribute already exists
    async fn put(&self, table: &str, row: Row, unique_key: Option<&str>)
        -> Result<(), StoreError>;

    /// Set one attribute on the row identified by `key_name = key_value`
    async fn set_attribute(
        &self,
        table: &str,
        key_name: &str,
        key_value: &str,
        attribute: &str,
        value: Value,
    ) -> Result<(), StoreError>;
}

pub const PERSONAL_INFO_TABLE: &str = "Personalinfo";
pub const COURSE_TABLE: &str = "Course";
pub const MODULE_TABLE: &str = "Module";
pub const BATCH_TABLE: &str = "Batch";
pub const STUDENT_DETAILS_TABLE: &str = "Student Details";
pub const USERS_TABLE: &str = "Users";
pub const ROLES_TABLE: &str = "Roles";

/// Record accessor with the per-table queries handlers use
#[derive(Clone)]
pub struct Records {
    store: Arc<dyn RecordStore>,
}

fn string_field<'a>(row: &'a Row, name: &str) -> Option<&'a str> {
    row.get(name).and_then(|v| v.as_str())
}

impl Records {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Equality lookup when both key parts are given, full paginated scan otherwise
    pub async fn fetch(
        &self,
        table: &str,
        key_name: Option<&str>,
        key_value: Option<&str>,
    ) -> Result<Vec<Row>, StoreError> {
        if let (Some(name), Some(value)) = (key_name, key_value) {
            if !name.is_empty() && !value.is_empty() {
                return self.store.query(table, name, value).await;
            }
        }

        let mut items = Vec::new();
        let mut start_key = None;
        let mut pages = 0;
        loop {
            let page = self.store.scan_page(table, start_key).await?;
            pages += 1;
            items.extend(page.items);
            match page.last_evaluated_key {
                Some(key) => start_key = Some(key),
                None => break,
            }
        }
        tracing::info!("Scanned {} rows from {} in {} pages", items.len(), table, pages);
        Ok(items)
    }

    pub async fn personal_info(&self, email: Option<&str>) -> Result<Vec<Row>, StoreError> {
        self.fetch(PERSONAL_INFO_TABLE, Some("email"), email).await
    }

    pub async fn course(&self, course_id: Option<&str>) -> Result<Vec<Row>, StoreError> {
        self.fetch(COURSE_TABLE, Some("Course ID"), course_id).await
    }

    pub async fn module(&self, module_id: Option<&str>) -> Result<Vec<Row>, StoreError> {
        self.fetch(MODULE_TABLE, Some("Module ID"), module_id).await
    }

    pub async fn student_details(&self, student_id: Option<&str>) -> Result<Vec<Row>, StoreError> {
        self.fetch(STUDENT_DETAILS_TABLE, Some("Student ID"), student_id)
            .await
    }

    pub async fn batch_by_id(&self, batch_id: &str) -> Result<Vec<Row>, StoreError> {
        self.fetch(BATCH_TABLE, Some("Batch ID"), Some(batch_id)).await
    }

    /// Every (batch, member) row
    pub async fn batches(&self) -> Result<Vec<Row>, StoreError> {
        self.fetch(BATCH_TABLE, None, None).await
    }

    /// Batch the member belongs to; the first matching row wins
    pub async fn batch_name_for_email(&self, email: &str) -> Result<String, StoreError> {
        let rows = self.batches().await?;
        let row = rows
            .iter()
            .find(|row| string_field(row, "email") == Some(email))
            .ok_or_else(|| StoreError::BatchNotFound(email.to_string()))?;

        match string_field(row, "BatchName") {
            Some(name) if !name.is_empty() => {
                tracing::info!("Found BatchName '{}' for email '{}'", name, email);
                Ok(name.to_string())
            }
            _ => Err(StoreError::MissingBatchName(email.to_string())),
        }
    }

    /// Distinct batch names, sorted
    pub async fn batch_names(&self) -> Result<Vec<String>, StoreError> {
        let rows = self.batches().await?;
        let names: BTreeSet<String> = rows
            .iter()
            .filter_map(|row| string_field(row, "BatchName"))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Batch name to member emails, in table order
    pub async fn batch_members(&self) -> Result<BTreeMap<String, Vec<String>>, StoreError> {
        let rows = self.batches().await?;
        let mut members: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in &rows {
            let Some(batch) = string_field(row, "BatchName").filter(|b| !b.is_empty()) else {
                continue;
            };
            let entry = members.entry(batch.to_string()).or_default();
            if let Some(email) = string_field(row, "email") {
                entry.push(email.to_string());
            }
        }
        Ok(members)
    }

    pub async fn role_for(&self, email: &str) -> Result<String, StoreError> {
        let rows = self.fetch(ROLES_TABLE, Some("user_id"), Some(email)).await?;
        rows.first()
            .and_then(|row| string_field(row, "role"))
            .map(str::to_string)
            .ok_or_else(|| StoreError::RoleNotFound(email.to_string()))
    }

    /// Insert a user row unless one already exists for the email
    pub async fn create_user(&self, email: &str, created_at: &str) -> Result<(), StoreError> {
        let mut row = Row::new();
        row.insert("email".to_string(), Value::String(email.to_string()));
        row.insert("auth_provider".to_string(), Value::String("email".to_string()));
        row.insert("created_at".to_string(), Value::String(created_at.to_string()));
        self.store.put(USERS_TABLE, row, Some("email")).await
    }

    pub async fn touch_last_login(&self, email: &str, at: &str) -> Result<(), StoreError> {
        self.store
            .set_attribute(
                USERS_TABLE,
                "email",
                email,
                "last_login",
                Value::String(at.to_string()),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{row, MemoryRecordStore};

    fn batch_store() -> Arc<MemoryRecordStore> {
        let store = MemoryRecordStore::new().with_page_size(2);
        store.insert(BATCH_TABLE, row(&[("BatchName", "B1"), ("email", "a@x.com")]));
        store.insert(BATCH_TABLE, row(&[("BatchName", "B1"), ("email", "b@x.com")]));
        store.insert(BATCH_TABLE, row(&[("BatchName", "B2"), ("email", "c@x.com")]));
        store.insert(BATCH_TABLE, row(&[("email", "d@x.com")]));
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_scan_concatenates_pages_in_order() {
        let store = MemoryRecordStore::new().with_page_size(2);
        for i in 0..5 {
            store.insert("X", row(&[("id", &i.to_string())]));
        }
        let store = Arc::new(store);
        let records = Records::new(store.clone());

        let rows = records.fetch("X", None, None).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
        assert_eq!(store.scan_calls("X"), 3);
    }

    #[tokio::test]
    async fn test_fetch_with_key_queries() {
        let store = MemoryRecordStore::new();
        store.insert(PERSONAL_INFO_TABLE, row(&[("email", "a@x.com"), ("name", "A")]));
        store.insert(PERSONAL_INFO_TABLE, row(&[("email", "b@x.com"), ("name", "B")]));
        let records = Records::new(Arc::new(store));

        let rows = records.personal_info(Some("b@x.com")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "B");

        let all = records.personal_info(None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_student_details_and_batch_by_id_query_by_key() {
        let store = MemoryRecordStore::new();
        store.insert(STUDENT_DETAILS_TABLE, row(&[("Student ID", "S1"), ("name", "Ann")]));
        store.insert(STUDENT_DETAILS_TABLE, row(&[("Student ID", "S2"), ("name", "Bob")]));
        store.insert(BATCH_TABLE, row(&[("Batch ID", "7"), ("BatchName", "B1"), ("email", "a@x.com")]));
        store.insert(BATCH_TABLE, row(&[("Batch ID", "8"), ("BatchName", "B2"), ("email", "c@x.com")]));
        let records = Records::new(Arc::new(store));

        let rows = records.student_details(Some("S2")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Bob");
        assert_eq!(records.student_details(None).await.unwrap().len(), 2);

        let rows = records.batch_by_id("8").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["BatchName"], "B2");
        assert!(records.batch_by_id("9").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_reports_store_failure() {
        let store = MemoryRecordStore::new();
        store.fail_table("Course");
        let records = Records::new(Arc::new(store));

        let err = records.course(None).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend { .. }));
    }

    #[tokio::test]
    async fn test_batch_name_for_email() {
        let records = Records::new(batch_store());

        assert_eq!(records.batch_name_for_email("a@x.com").await.unwrap(), "B1");

        let err = records.batch_name_for_email("zz@x.com").await.unwrap_err();
        assert!(err.to_string().contains("No batch record found"));

        let err = records.batch_name_for_email("d@x.com").await.unwrap_err();
        assert!(matches!(err, StoreError::MissingBatchName(_)));
    }

    #[tokio::test]
    async fn test_batch_names_are_distinct() {
        let records = Records::new(batch_store());
        assert_eq!(records.batch_names().await.unwrap(), vec!["B1", "B2"]);
    }

    #[tokio::test]
    async fn test_batch_members_groups_emails() {
        let records = Records::new(batch_store());
        let members = records.batch_members().await.unwrap();
        assert_eq!(members["B1"], vec!["a@x.com", "b@x.com"]);
        assert_eq!(members["B2"], vec!["c@x.com"]);
        assert_eq!(members.len(), 2);
    }

    #[tokio::test]
    async fn test_create_user_rejects_duplicates() {
        let store = Arc::new(MemoryRecordStore::new());
        let records = Records::new(store.clone());

        records.create_user("a@x.com", "2025-01-01T00:00:00Z").await.unwrap();
        let err = records
            .create_user("a@x.com", "2025-01-02T00:00:00Z")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));

        records.touch_last_login("a@x.com", "2025-01-03T00:00:00Z").await.unwrap();
        let users = store.rows(USERS_TABLE);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0]["last_login"], "2025-01-03T00:00:00Z");
        assert_eq!(users[0]["created_at"], "2025-01-01T00:00:00Z");
    }
}
