//! 検証済みフォームレコードのストレージ（SQLite）

use crate::common::error::{EdcError, EdcResult};
use crate::db::traits::{RecordStore, StoredRecord};
use crate::validation::FieldValue;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

/// フォームレコードのSQLite実装
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

/// sqlx::FromRow用の行構造体
#[derive(Debug, sqlx::FromRow)]
struct FormRecordRow {
    id: i64,
    form_name: String,
    user_id: String,
    created_at: String,
    data: String,
}

impl TryFrom<FormRecordRow> for StoredRecord {
    type Error = EdcError;

    fn try_from(row: FormRecordRow) -> Result<Self, Self::Error> {
        let created_at = chrono::DateTime::parse_from_rfc3339(&row.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| EdcError::Database(format!("Failed to parse created_at: {}", e)))?;
        let data = serde_json::from_str(&row.data)
            .map_err(|e| EdcError::Database(format!("Failed to parse record data: {}", e)))?;

        Ok(StoredRecord {
            id: row.id,
            form_name: row.form_name,
            user_id: row.user_id,
            created_at,
            data,
        })
    }
}

impl SqliteRecordStore {
    /// 新しいSqliteRecordStoreを作成
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn save_record(
        &self,
        form_name: &str,
        user_id: &str,
        cleaned_data: &BTreeMap<String, FieldValue>,
    ) -> EdcResult<i64> {
        let data = serde_json::to_string(cleaned_data)
            .map_err(|e| EdcError::Internal(format!("Failed to serialize record: {}", e)))?;

        let result = sqlx::query(
            "INSERT INTO form_records (form_name, user_id, created_at, data) VALUES (?, ?, ?, ?)",
        )
        .bind(form_name)
        .bind(user_id)
        .bind(Utc::now().to_rfc3339())
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(|e| EdcError::Database(format!("Failed to insert form record: {}", e)))?;

        Ok(result.last_insert_rowid())
    }

    async fn get_record(&self, id: i64) -> EdcResult<Option<StoredRecord>> {
        let row = sqlx::query_as::<_, FormRecordRow>(
            "SELECT id, form_name, user_id, created_at, data FROM form_records WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EdcError::Database(format!("Failed to get form record: {}", e)))?;

        row.map(StoredRecord::try_from).transpose()
    }

    async fn discard_record(&self, id: i64) -> EdcResult<()> {
        sqlx::query("DELETE FROM form_records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| EdcError::Database(format!("Failed to discard form record: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_get_record() {
        let store = SqliteRecordStore::new(crate::db::test_utils::test_db_pool().await);

        let mut cleaned = BTreeMap::new();
        cleaned.insert("age".to_string(), FieldValue::Number(42.0));
        cleaned.insert("arm".to_string(), FieldValue::Choice("B".to_string()));

        let id = store.save_record("enrolment", "u1", &cleaned).await.unwrap();
        let record = store.get_record(id).await.unwrap().expect("record exists");
        assert_eq!(record.form_name, "enrolment");
        assert_eq!(record.user_id, "u1");
        assert_eq!(record.data, serde_json::json!({"age": 42, "arm": "B"}));

        assert!(store.get_record(id + 1).await.unwrap().is_none());

        store.discard_record(id).await.unwrap();
        assert!(store.get_record(id).await.unwrap().is_none());
    }
}
