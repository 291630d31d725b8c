use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use base64::{engine::general_purpose, Engine as _};
use serde_json::{Number, Value};
use std::collections::HashMap;

use crate::error::StoreError;
use crate::records::{RecordStore, Row, ScanPage};

/// DynamoDB-backed record store
pub struct DynamoRecordStore {
    client: DynamoClient,
}

impl DynamoRecordStore {
    pub fn new(client: DynamoClient) -> Self {
        Self { client }
    }
}

/// Convert a DynamoDB attribute into plain JSON
pub fn attribute_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => number_to_json(n),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::L(items) => Value::Array(items.iter().map(attribute_to_json).collect()),
        AttributeValue::M(map) => Value::Object(item_to_row(map)),
        AttributeValue::Ss(items) => {
            Value::Array(items.iter().cloned().map(Value::String).collect())
        }
        AttributeValue::Ns(items) => Value::Array(items.iter().map(|n| number_to_json(n)).collect()),
        AttributeValue::B(blob) => {
            Value::String(general_purpose::STANDARD.encode(blob.as_ref()))
        }
        AttributeValue::Bs(blobs) => Value::Array(
            blobs
                .iter()
                .map(|b| Value::String(general_purpose::STANDARD.encode(b.as_ref())))
                .collect(),
        ),
        _ => Value::Null,
    }
}

fn number_to_json(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

/// Convert plain JSON into a DynamoDB attribute
pub fn json_to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Null => AttributeValue::Null(true),
        Value::Array(items) => AttributeValue::L(items.iter().map(json_to_attribute).collect()),
        Value::Object(map) => AttributeValue::M(row_to_item(map)),
    }
}

pub fn item_to_row(item: &HashMap<String, AttributeValue>) -> Row {
    item.iter()
        .map(|(k, v)| (k.clone(), attribute_to_json(v)))
        .collect()
}

pub fn row_to_item(row: &Row) -> HashMap<String, AttributeValue> {
    row.iter()
        .map(|(k, v)| (k.clone(), json_to_attribute(v)))
        .collect()
}

#[async_trait]
impl RecordStore for DynamoRecordStore {
    async fn query(
        &self,
        table: &str,
        key_name: &str,
        key_value: &str,
    ) -> Result<Vec<Row>, StoreError> {
        let result = self
            .client
            .query()
            .table_name(table)
            .key_condition_expression("#k = :v")
            .expression_attribute_names("#k", key_name)
            .expression_attribute_values(":v", AttributeValue::S(key_value.to_string()))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("DynamoDB query on {} failed: {:?}", table, e);
                StoreError::backend(table, e)
            })?;

        Ok(result.items().iter().map(item_to_row).collect())
    }

    async fn scan_page(&self, table: &str, start_key: Option<Row>) -> Result<ScanPage, StoreError> {
        let result = self
            .client
            .scan()
            .table_name(table)
            .set_exclusive_start_key(start_key.as_ref().map(row_to_item))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("DynamoDB scan on {} failed: {:?}", table, e);
                StoreError::backend(table, e)
            })?;

        Ok(ScanPage {
            items: result.items().iter().map(item_to_row).collect(),
            last_evaluated_key: result.last_evaluated_key().map(item_to_row),
        })
    }

    async fn put(&self, table: &str, row: Row, unique_key: Option<&str>) -> Result<(), StoreError> {
        let mut request = self
            .client
            .put_item()
            .table_name(table)
            .set_item(Some(row_to_item(&row)));

        if let Some(key) = unique_key {
            request = request
                .condition_expression("attribute_not_exists(#k)")
                .expression_attribute_names("#k", key);
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_conditional_check_failed_exception() {
                    Err(StoreError::AlreadyExists(table.to_string()))
                } else {
                    tracing::error!("DynamoDB put on {} failed: {:?}", table, service_error);
                    Err(StoreError::backend(table, service_error))
                }
            }
        }
    }

    async fn set_attribute(
        &self,
        table: &str,
        key_name: &str,
        key_value: &str,
        attribute: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        self.client
            .update_item()
            .table_name(table)
            .key(key_name, AttributeValue::S(key_value.to_string()))
            .update_expression("SET #a = :v")
            .expression_attribute_names("#a", attribute)
            .expression_attribute_values(":v", json_to_attribute(&value))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("DynamoDB update on {} failed: {:?}", table, e);
                StoreError::backend(table, e)
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_to_row_converts_scalars_and_nesting() {
        let mut item = HashMap::new();
        item.insert("BatchName".to_string(), AttributeValue::S("B1".to_string()));
        item.insert("size".to_string(), AttributeValue::N("12".to_string()));
        item.insert("ratio".to_string(), AttributeValue::N("0.5".to_string()));
        item.insert("active".to_string(), AttributeValue::Bool(true));
        item.insert(
            "tags".to_string(),
            AttributeValue::Ss(vec!["a".to_string(), "b".to_string()]),
        );

        let row = item_to_row(&item);
        assert_eq!(
            Value::Object(row),
            json!({"BatchName": "B1", "size": 12, "ratio": 0.5, "active": true, "tags": ["a", "b"]})
        );
    }

    #[test]
    fn test_row_to_item_keeps_key_types() {
        let row = json!({"email": "a@x.com", "Batch ID": 7})
            .as_object()
            .cloned()
            .unwrap();
        let item = row_to_item(&row);
        assert_eq!(item["email"], AttributeValue::S("a@x.com".to_string()));
        assert_eq!(item["Batch ID"], AttributeValue::N("7".to_string()));
    }
}
