//! 監査ログストレージ（SQLite）

use crate::audit::{
    hash_chain::{canonical_timestamp, GENESIS_HASH},
    types::{AuditEntry, AuditFilter, AuditStatus},
};
use crate::common::error::{EdcError, EdcResult};
use crate::db::traits::{AppendOutcome, AuditStore, ChainTail};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use sqlx::SqlitePool;

/// 監査ログのSQLite実装
#[derive(Clone)]
pub struct SqliteAuditStore {
    pool: SqlitePool,
}

/// sqlx::FromRow用の行構造体
#[derive(Debug, sqlx::FromRow)]
struct AuditEntryRow {
    sequence_number: i64,
    timestamp: String,
    user_id: String,
    action: String,
    resource: String,
    status: String,
    detail: Option<String>,
    record_hash: String,
    previous_hash: String,
}

/// sqlx::FromRow用の行構造体（末尾）
#[derive(Debug, sqlx::FromRow)]
struct ChainTailRow {
    sequence_number: i64,
    record_hash: String,
}

impl TryFrom<AuditEntryRow> for AuditEntry {
    type Error = EdcError;

    fn try_from(row: AuditEntryRow) -> Result<Self, Self::Error> {
        let timestamp = chrono::DateTime::parse_from_rfc3339(&row.timestamp)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|e| {
                EdcError::Database(format!(
                    "Failed to parse timestamp of audit entry {}: {}",
                    row.sequence_number, e
                ))
            })?;

        Ok(AuditEntry {
            sequence_number: row.sequence_number,
            timestamp,
            user_id: row.user_id,
            action: row.action,
            resource: row.resource,
            status: AuditStatus::from_str(&row.status),
            detail: row.detail,
            record_hash: row.record_hash,
            previous_hash: row.previous_hash,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT sequence_number, timestamp, user_id, action, resource, \
     status, detail, record_hash, previous_hash FROM audit_entries";

impl SqliteAuditStore {
    /// 新しいSqliteAuditStoreを作成
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 接続プール
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_page(
        pool: &SqlitePool,
        filter: &AuditFilter,
        after: i64,
        limit: u32,
    ) -> EdcResult<Vec<AuditEntry>> {
        let (where_clause, bind_values) = build_where_clause(filter);
        let sql = format!(
            "{} WHERE sequence_number > ? {} ORDER BY sequence_number ASC LIMIT ?",
            SELECT_COLUMNS, where_clause
        );

        let mut query = sqlx::query_as::<_, AuditEntryRow>(&sql).bind(after);
        for val in &bind_values {
            query = query.bind(val.as_str());
        }
        query = query.bind(i64::from(limit));

        let rows = query
            .fetch_all(pool)
            .await
            .map_err(|e| EdcError::Database(format!("Failed to query audit entries: {}", e)))?;

        rows.into_iter()
            .map(AuditEntry::try_from)
            .collect::<Result<Vec<_>, _>>()
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn tail(&self) -> EdcResult<Option<ChainTail>> {
        let row = sqlx::query_as::<_, ChainTailRow>(
            "SELECT sequence_number, record_hash FROM audit_entries \
             ORDER BY sequence_number DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EdcError::Database(format!("Failed to read audit tail: {}", e)))?;

        Ok(row.map(|r| ChainTail {
            sequence_number: r.sequence_number,
            record_hash: r.record_hash,
        }))
    }

    async fn append_if_tail(&self, entry: &AuditEntry) -> EdcResult<AppendOutcome> {
        // 末尾の連番とハッシュが一致する場合のみ挿入する（単一文で原子的）
        let result = sqlx::query(
            r#"INSERT INTO audit_entries (
                sequence_number, timestamp, user_id, action, resource,
                status, detail, record_hash, previous_hash
            )
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?
            WHERE (SELECT COALESCE(MAX(sequence_number), 0) FROM audit_entries) = ?
              AND COALESCE(
                    (SELECT record_hash FROM audit_entries ORDER BY sequence_number DESC LIMIT 1),
                    ?
                  ) = ?"#,
        )
        .bind(entry.sequence_number)
        .bind(canonical_timestamp(&entry.timestamp))
        .bind(&entry.user_id)
        .bind(&entry.action)
        .bind(&entry.resource)
        .bind(entry.status.as_str())
        .bind(&entry.detail)
        .bind(&entry.record_hash)
        .bind(&entry.previous_hash)
        .bind(entry.sequence_number - 1)
        .bind(GENESIS_HASH)
        .bind(&entry.previous_hash)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(AppendOutcome::Appended),
            Ok(_) => Ok(AppendOutcome::Conflict),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Ok(AppendOutcome::Conflict)
            }
            Err(e) => Err(EdcError::Database(format!(
                "Failed to append audit entry {}: {}",
                entry.sequence_number, e
            ))),
        }
    }

    fn scan(&self, filter: AuditFilter, page_size: u32) -> BoxStream<'static, EdcResult<AuditEntry>> {
        let page_size = page_size.max(1);
        let state = ScanState {
            pool: self.pool.clone(),
            filter,
            after: 0,
            exhausted: false,
        };

        stream::try_unfold(state, move |state| next_page(state, page_size))
            .map_ok(|page| stream::iter(page).map(Ok::<_, EdcError>))
            .try_flatten()
            .boxed()
    }

    async fn count(&self) -> EdcResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM audit_entries")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EdcError::Database(format!("Failed to count audit entries: {}", e)))
    }
}

/// キーセットページングの状態（最後に返した連番の次から読む）
struct ScanState {
    pool: SqlitePool,
    filter: AuditFilter,
    after: i64,
    exhausted: bool,
}

async fn next_page(
    state: ScanState,
    page_size: u32,
) -> EdcResult<Option<(Vec<AuditEntry>, ScanState)>> {
    if state.exhausted {
        return Ok(None);
    }
    let page =
        SqliteAuditStore::fetch_page(&state.pool, &state.filter, state.after, page_size).await?;
    let Some(last) = page.last().map(|e| e.sequence_number) else {
        return Ok(None);
    };
    let exhausted = page.len() < page_size as usize;
    Ok(Some((
        page,
        ScanState {
            after: last,
            exhausted,
            ..state
        },
    )))
}

/// フィルタ条件から追加のAND条件を生成
///
/// 時刻はハッシュ入力と同じ固定長のRFC 3339表現で保存しているため、
/// 文字列比較で範囲検索できる。
fn build_where_clause(filter: &AuditFilter) -> (String, Vec<String>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut bind_values: Vec<String> = Vec::new();

    if let Some(ref user_id) = filter.user_id {
        conditions.push("user_id = ?".to_string());
        bind_values.push(user_id.clone());
    }

    if let Some(ref action) = filter.action {
        conditions.push("action = ?".to_string());
        bind_values.push(action.clone());
    }

    if let Some(ref status) = filter.status {
        conditions.push("status = ?".to_string());
        bind_values.push(status.as_str().to_string());
    }

    if let Some(ref time_from) = filter.time_from {
        conditions.push("timestamp >= ?".to_string());
        bind_values.push(canonical_timestamp(time_from));
    }

    if let Some(ref time_to) = filter.time_to {
        conditions.push("timestamp <= ?".to_string());
        bind_values.push(canonical_timestamp(time_to));
    }

    let where_clause = conditions
        .iter()
        .map(|c| format!("AND {}", c))
        .collect::<Vec<_>>()
        .join(" ");

    (where_clause, bind_values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::hash_chain::seal;
    use crate::audit::types::{actions, NewAuditEvent};
    use chrono::{Duration, TimeZone, Utc};

    async fn create_test_store() -> SqliteAuditStore {
        SqliteAuditStore::new(crate::db::test_utils::test_db_pool().await)
    }

    async fn append_chain(store: &SqliteAuditStore, events: &[NewAuditEvent]) -> Vec<AuditEntry> {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let mut out = Vec::new();
        for (i, event) in events.iter().enumerate() {
            let tail = store.tail().await.unwrap();
            let (seq, prev) = tail
                .map(|t| (t.sequence_number + 1, t.record_hash))
                .unwrap_or((1, GENESIS_HASH.to_string()));
            let entry = seal(seq, base + Duration::minutes(i as i64), event, &prev);
            assert_eq!(store.append_if_tail(&entry).await.unwrap(), AppendOutcome::Appended);
            out.push(entry);
        }
        out
    }

    #[tokio::test]
    async fn test_append_and_scan_round_trip() {
        let store = create_test_store().await;
        assert_eq!(store.tail().await.unwrap(), None);

        let events = vec![
            NewAuditEvent::new("u1", actions::LOGIN, "session", AuditStatus::Success),
            NewAuditEvent::new("u1", actions::CREATE, "form:ae", AuditStatus::Success)
                .with_detail("record_id=1"),
        ];
        let appended = append_chain(&store, &events).await;

        let scanned: Vec<AuditEntry> = store
            .scan(AuditFilter::default(), 10)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(scanned, appended);
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(
            store.tail().await.unwrap(),
            Some(ChainTail {
                sequence_number: 2,
                record_hash: appended[1].record_hash.clone(),
            })
        );
    }

    #[tokio::test]
    async fn test_append_if_tail_rejects_stale_predecessor() {
        let store = create_test_store().await;
        let event = NewAuditEvent::new("u1", actions::LOGIN, "session", AuditStatus::Success);
        let now = Utc::now();

        let first = seal(1, now, &event, GENESIS_HASH);
        assert_eq!(store.append_if_tail(&first).await.unwrap(), AppendOutcome::Appended);

        // 同じ連番の再追記
        let duplicate = seal(1, now, &event, GENESIS_HASH);
        assert_eq!(store.append_if_tail(&duplicate).await.unwrap(), AppendOutcome::Conflict);

        // 連番は正しいが直前ハッシュが古い
        let stale = seal(2, now, &event, GENESIS_HASH);
        assert_eq!(store.append_if_tail(&stale).await.unwrap(), AppendOutcome::Conflict);

        // 連番を飛ばした追記
        let gap = seal(3, now, &event, &first.record_hash);
        assert_eq!(store.append_if_tail(&gap).await.unwrap(), AppendOutcome::Conflict);

        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_scan_with_filters_and_small_pages() {
        let store = create_test_store().await;
        let events: Vec<NewAuditEvent> = (0..7)
            .map(|i| {
                let user = if i % 2 == 0 { "u1" } else { "u2" };
                let status = if i == 4 { AuditStatus::Failure } else { AuditStatus::Success };
                NewAuditEvent::new(user, actions::LOGIN, "session", status)
            })
            .collect();
        append_chain(&store, &events).await;

        let u1: Vec<i64> = store
            .scan(AuditFilter::default().user("u1"), 2)
            .map_ok(|e| e.sequence_number)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(u1, vec![1, 3, 5, 7]);

        let failures: Vec<i64> = store
            .scan(AuditFilter::default().status(AuditStatus::Failure), 3)
            .map_ok(|e| e.sequence_number)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(failures, vec![5]);

        let from = Utc.with_ymd_and_hms(2024, 3, 1, 8, 2, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 3, 1, 8, 4, 0).unwrap();
        let ranged: Vec<i64> = store
            .scan(AuditFilter::default().between(Some(from), Some(to)), 1)
            .map_ok(|e| e.sequence_number)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(ranged, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_sub_microsecond_bounds_match_memory_store() {
        let store = create_test_store().await;
        let events: Vec<NewAuditEvent> = (0..3)
            .map(|_| NewAuditEvent::new("u1", actions::LOGIN, "session", AuditStatus::Success))
            .collect();
        let appended = append_chain(&store, &events).await;

        let memory = crate::db::MemoryAuditStore::new();
        for entry in &appended {
            memory.append_if_tail(entry).await.unwrap();
        }

        let from = appended[1].timestamp + Duration::nanoseconds(900);
        let to = appended[2].timestamp + Duration::nanoseconds(900);
        let filters = [
            AuditFilter::default().between(Some(from), None),
            AuditFilter::default()
                .between(None, Some(appended[1].timestamp + Duration::nanoseconds(1))),
            AuditFilter {
                time_from: Some(from),
                time_to: Some(to),
                ..AuditFilter::default()
            },
        ];
        for filter in filters {
            let sqlite: Vec<i64> = store
                .scan(filter.clone(), 10)
                .map_ok(|e| e.sequence_number)
                .try_collect()
                .await
                .unwrap();
            let in_memory: Vec<i64> = memory
                .scan(filter.clone(), 10)
                .map_ok(|e| e.sequence_number)
                .try_collect()
                .await
                .unwrap();
            assert_eq!(sqlite, in_memory, "{:?}", filter);
        }
    }

    #[tokio::test]
    async fn test_triggers_forbid_update_and_delete() {
        let store = create_test_store().await;
        append_chain(
            &store,
            &[NewAuditEvent::new("u1", actions::LOGIN, "session", AuditStatus::Success)],
        )
        .await;

        let update = sqlx::query("UPDATE audit_entries SET user_id = 'x' WHERE sequence_number = 1")
            .execute(store.pool())
            .await;
        assert!(update.is_err());

        let delete = sqlx::query("DELETE FROM audit_entries")
            .execute(store.pool())
            .await;
        assert!(delete.is_err());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_reports_database_error() {
        let store = create_test_store().await;
        store.pool().close().await;
        assert!(matches!(store.tail().await, Err(EdcError::Database(_))));
    }
}
