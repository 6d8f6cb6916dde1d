//! インメモリストア
//!
//! 永続化が不要な組み込み用途とテスト用。ロックを保持したまま
//! 末尾比較と追記を行うため、compare-and-append の意味論はSQLite実装と同じ。

use crate::audit::hash_chain::GENESIS_HASH;
use crate::audit::types::{AuditEntry, AuditFilter};
use crate::common::error::{EdcError, EdcResult};
use crate::db::traits::{AppendOutcome, AuditStore, ChainTail, RecordStore, StoredRecord};
use crate::validation::FieldValue;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// 監査ログのインメモリ実装
#[derive(Clone, Default)]
pub struct MemoryAuditStore {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryAuditStore {
    /// 空のストアを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// 障害を模擬する（trueの間は全操作がDatabaseエラーになる）
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// 保存済みエントリのスナップショット
    pub async fn snapshot(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }

    fn check_available(&self) -> EdcResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EdcError::Database("memory audit store is unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn tail(&self) -> EdcResult<Option<ChainTail>> {
        self.check_available()?;
        Ok(self.entries.read().await.last().map(|e| ChainTail {
            sequence_number: e.sequence_number,
            record_hash: e.record_hash.clone(),
        }))
    }

    async fn append_if_tail(&self, entry: &AuditEntry) -> EdcResult<AppendOutcome> {
        self.check_available()?;
        let mut entries = self.entries.write().await;
        let (tail_seq, tail_hash) = entries
            .last()
            .map(|e| (e.sequence_number, e.record_hash.as_str()))
            .unwrap_or((0, GENESIS_HASH));
        if tail_seq != entry.sequence_number - 1 || tail_hash != entry.previous_hash {
            return Ok(AppendOutcome::Conflict);
        }
        entries.push(entry.clone());
        Ok(AppendOutcome::Appended)
    }

    fn scan(&self, filter: AuditFilter, page_size: u32) -> BoxStream<'static, EdcResult<AuditEntry>> {
        let entries = Arc::clone(&self.entries);
        let unavailable = Arc::clone(&self.unavailable);
        let page_size = page_size.max(1) as usize;

        stream::unfold(Some(0usize), move |cursor| {
            let entries = Arc::clone(&entries);
            let unavailable = Arc::clone(&unavailable);
            let filter = filter.clone();
            async move {
                let start = cursor?;
                if unavailable.load(Ordering::SeqCst) {
                    let err = EdcError::Database("memory audit store is unavailable".to_string());
                    return Some((vec![Err(err)], None));
                }
                let guard = entries.read().await;
                let page: Vec<EdcResult<AuditEntry>> = guard
                    .iter()
                    .skip(start)
                    .take(page_size)
                    .filter(|e| filter.matches(e))
                    .cloned()
                    .map(Ok)
                    .collect();
                let scanned = guard.len().saturating_sub(start).min(page_size);
                if scanned == 0 {
                    return None;
                }
                Some((page, Some(start + scanned)))
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }

    async fn count(&self) -> EdcResult<i64> {
        self.check_available()?;
        Ok(self.entries.read().await.len() as i64)
    }
}

/// フォームレコードのインメモリ実装
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    records: Arc<RwLock<Vec<StoredRecord>>>,
}

impl MemoryRecordStore {
    /// 空のストアを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存件数
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// 空かどうか
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn save_record(
        &self,
        form_name: &str,
        user_id: &str,
        cleaned_data: &BTreeMap<String, FieldValue>,
    ) -> EdcResult<i64> {
        let data = serde_json::to_value(cleaned_data)
            .map_err(|e| EdcError::Internal(format!("Failed to serialize record: {}", e)))?;
        let mut records = self.records.write().await;
        let id = records.last().map(|r| r.id).unwrap_or(0) + 1;
        records.push(StoredRecord {
            id,
            form_name: form_name.to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            data,
        });
        Ok(id)
    }

    async fn get_record(&self, id: i64) -> EdcResult<Option<StoredRecord>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn discard_record(&self, id: i64) -> EdcResult<()> {
        self.records.write().await.retain(|r| r.id != id);
        Ok(())
    }
}
